//! `insert-barrier` (§4.7 step 8): per-region forward scan that splices a
//! `barrier` instruction wherever an instruction's local-memref read/write
//! set hazards against everything accumulated since the last one.

use crate::analysis::alias::{self, AliasResults};
use crate::arena::Handle;
use crate::context::CompilerContext;
use crate::ir::{FenceFlags, Function, Instruction, Op, Region, Value};
use crate::ty::{AddressSpace, Type};

pub fn run_on_function(func: &mut Function, ctx: &CompilerContext) {
    let aa = alias::run_on_function(func);
    func.with_body(|func, body| {
        run_on_region(func, body, ctx, &aa);
    });
}

fn take_children(inst: &mut Instruction) -> Vec<Region> {
    let mut out: Vec<Region> = inst.child_regions_mut().iter_mut().map(std::mem::take).collect();
    if let Some((then_r, else_r)) = inst.op.if_regions_mut() {
        out.push(std::mem::take(then_r));
        if let Some(e) = else_r {
            out.push(std::mem::take(e));
        }
    }
    out
}

fn restore_children(inst: &mut Instruction, restored: Vec<Region>) {
    let mut it = restored.into_iter();
    for r in inst.child_regions_mut() {
        *r = it.next().expect("child region count unchanged");
    }
    if let Some((then_r, else_r)) = inst.op.if_regions_mut() {
        *then_r = it.next().expect("child region count unchanged");
        if let Some(e) = else_r {
            *e = it.next().expect("child region count unchanged");
        }
    }
}

fn is_local_memref(func: &Function, ctx: &CompilerContext, v: Handle<Value>) -> bool {
    matches!(
        ctx.resolve_type(func.value(v).ty),
        Type::Memref { addrspace: AddressSpace::Local, .. }
    )
}

/// The local-memref-typed values an instruction (non-recursively) reads
/// or writes, filtering out scalars, globals, and any other address space.
fn direct_rw(inst: &Instruction, func: &Function, ctx: &CompilerContext) -> Vec<Handle<Value>> {
    let candidates: Vec<Handle<Value>> = match &inst.op {
        Op::Axpby { a, b, .. } => vec![*a, *b],
        Op::Sum { a, b, .. } => vec![*a, *b],
        Op::Gemm { a, b, c, .. } => vec![*a, *b, *c],
        Op::Gemv { a, x, y, .. } => vec![*a, *x, *y],
        Op::Ger { x, y, c, .. } => vec![*x, *y, *c],
        Op::Hadamard { a, b, c, .. } => vec![*a, *b, *c],
        Op::Load { src, .. } => vec![*src],
        Op::Store { dst, .. } => vec![*dst],
        _ => Vec::new(),
    };
    candidates.into_iter().filter(|&v| is_local_memref(func, ctx, v)).collect()
}

fn intersects(my_rw: &[Handle<Value>], rw: &[Handle<Value>], aa: &AliasResults) -> bool {
    my_rw.iter().any(|&a| rw.iter().any(|&b| aa.alias(a, b)))
}

fn run_on_region(func: &mut Function, region: &mut Region, ctx: &CompilerContext, aa: &AliasResults) -> Vec<Handle<Value>> {
    let mut rw: Vec<Handle<Value>> = Vec::new();
    let mut i = 0;
    while i < region.insts.len() {
        let handle = region.insts[i];

        let recurses = matches!(
            func.inst(handle).op,
            Op::For { .. } | Op::Foreach { .. } | Op::Parallel { .. } | Op::If { .. }
        );
        let my_rw: Vec<Handle<Value>> = if recurses {
            let children = take_children(&mut func.instructions[handle]);
            let mut restored = Vec::with_capacity(children.len());
            let mut bubbled = Vec::new();
            for mut child in children {
                bubbled.extend(run_on_region(func, &mut child, ctx, aa));
                restored.push(child);
            }
            restore_children(&mut func.instructions[handle], restored);
            bubbled
        } else {
            direct_rw(func.inst(handle), func, ctx)
        };

        if intersects(&my_rw, &rw, aa) {
            let mut scratch = Region::default();
            let (barrier, _) = func.push(
                &mut scratch,
                Instruction::new(
                    Op::Barrier {
                        fence: FenceFlags::LOCAL,
                    },
                    Default::default(),
                ),
                &[],
            );
            region.insts.insert(i, barrier);
            rw.clear();
            i += 1;
        }

        if matches!(func.inst(handle).op, Op::Barrier { .. }) {
            rw.clear();
        }
        rw.extend(my_rw);

        i += 1;
    }
    rw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::ScalarType;

    #[test]
    fn store_then_load_of_same_alloca_gets_a_barrier() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![4], vec![1], AddressSpace::Local).unwrap(),
        );
        let idx_ty = ctx.get_type(Type::Scalar(ScalarType::Index));
        let f32_ty = ctx.get_type(Type::Scalar(ScalarType::F32));

        func.with_body(|func, region| {
            let (_, alloca) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[memref_ty]);
            let zero = func
                .push(
                    region,
                    Instruction::new(Op::Constant { value: crate::ir::ConstantValue::Int(0) }, Default::default()),
                    &[idx_ty],
                )
                .1[0];
            let val = func
                .push(
                    region,
                    Instruction::new(Op::Constant { value: crate::ir::ConstantValue::Float(1.0) }, Default::default()),
                    &[f32_ty],
                )
                .1[0];
            func.push(
                region,
                Instruction::new(
                    Op::Store {
                        val,
                        dst: alloca[0],
                        indices: vec![zero],
                    },
                    Default::default(),
                ),
                &[],
            );
            func.push(
                region,
                Instruction::new(
                    Op::Load {
                        src: alloca[0],
                        indices: vec![zero],
                    },
                    Default::default(),
                ),
                &[f32_ty],
            );
        });

        run_on_function(&mut func, &ctx);

        let ops: Vec<_> = func.body.insts.iter().map(|&h| func.inst(h).op.clone()).collect();
        let store_pos = ops.iter().position(|op| matches!(op, Op::Store { .. })).unwrap();
        let load_pos = ops.iter().position(|op| matches!(op, Op::Load { .. })).unwrap();
        let barrier_pos = ops.iter().position(|op| matches!(op, Op::Barrier { .. })).expect("barrier inserted");
        assert!(store_pos < barrier_pos);
        assert!(barrier_pos < load_pos);
    }

    #[test]
    fn independent_allocas_need_no_barrier() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![4], vec![1], AddressSpace::Local).unwrap(),
        );
        let idx_ty = ctx.get_type(Type::Scalar(ScalarType::Index));
        let f32_ty = ctx.get_type(Type::Scalar(ScalarType::F32));

        func.with_body(|func, region| {
            let (_, a) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[memref_ty]);
            let (_, b) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[memref_ty]);
            let zero = func
                .push(
                    region,
                    Instruction::new(Op::Constant { value: crate::ir::ConstantValue::Int(0) }, Default::default()),
                    &[idx_ty],
                )
                .1[0];
            let val = func
                .push(
                    region,
                    Instruction::new(Op::Constant { value: crate::ir::ConstantValue::Float(1.0) }, Default::default()),
                    &[f32_ty],
                )
                .1[0];
            func.push(
                region,
                Instruction::new(
                    Op::Store {
                        val,
                        dst: a[0],
                        indices: vec![zero],
                    },
                    Default::default(),
                ),
                &[],
            );
            func.push(
                region,
                Instruction::new(
                    Op::Load {
                        src: b[0],
                        indices: vec![zero],
                    },
                    Default::default(),
                ),
                &[f32_ty],
            );
        });

        run_on_function(&mut func, &ctx);

        let ops: Vec<_> = func.body.insts.iter().map(|&h| func.inst(h).op.clone()).collect();
        assert!(!ops.iter().any(|op| matches!(op, Op::Barrier { .. })));
    }
}
