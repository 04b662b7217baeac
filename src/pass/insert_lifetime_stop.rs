//! `insert-lifetime-stop` (§4.7 step 2): backward scan per region that
//! inserts a `lifetime_stop` right after an `alloca`'s last transitive use.

use crate::analysis::alias::{self, AliasResults};
use crate::arena::Handle;
use crate::context::CompilerContext;
use crate::error::Location;
use crate::ir::{Function, Instruction, Op, Region, Value};
use crate::FastHashSet;

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

fn run_on_region(
    func: &mut Function,
    region: &mut Region,
    ctx: &CompilerContext,
    aa: &AliasResults,
) -> FastHashSet<Handle<Value>> {
    let mut rgn_ops = FastHashSet::default();
    if region.is_empty() {
        return rgn_ops;
    }

    let mut allocas: Vec<Handle<Value>> = region
        .insts
        .iter()
        .filter_map(|&h| match func.inst(h).op {
            Op::Alloca => Some(func.inst(h).results[0]),
            _ => None,
        })
        .collect();

    let mut i = region.insts.len();
    while i > 0 {
        i -= 1;
        let handle = region.insts[i];

        let children = take_children(&mut func.instructions[handle]);
        let mut restored = Vec::with_capacity(children.len());
        for mut child in children {
            for v in run_on_region(func, &mut child, ctx, aa) {
                rgn_ops.insert(v);
            }
            restored.push(child);
        }
        restore_children(&mut func.instructions[handle], restored);

        let inst = func.inst(handle);
        for v in inst.operands() {
            if matches!(ctx.resolve_type(func.value(v).ty), crate::ty::Type::Memref { .. }) {
                rgn_ops.insert(aa.root(v));
            }
        }
        for &v in &inst.results {
            if matches!(ctx.resolve_type(func.value(v).ty), crate::ty::Type::Memref { .. }) {
                rgn_ops.insert(aa.root(v));
            }
        }

        let (triggered, remaining): (Vec<_>, Vec<_>) =
            allocas.into_iter().partition(|&a| rgn_ops.contains(&aa.root(a)));
        allocas = remaining;

        for alloca in triggered {
            let mut scratch = Region::default();
            let (stop, _) = func.push(
                &mut scratch,
                Instruction::new(Op::LifetimeStop { obj: alloca }, Location::default()),
                &[],
            );
            region.insts.insert(i + 1, stop);
        }
    }
    rgn_ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{AddressSpace, ScalarType, Type};

    #[test]
    fn lifetime_stop_follows_allocas_last_use() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![4], vec![1], AddressSpace::Local).unwrap(),
        );
        let idx_ty = ctx.get_type(Type::Scalar(ScalarType::Index));

        func.with_body(|func, region| {
            let (_, alloca) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[memref_ty]);
            let zero = func.push(
                region,
                Instruction::new(Op::Constant { value: crate::ir::ConstantValue::Int(0) }, Default::default()),
                &[idx_ty],
            )
            .1[0];
            func.push(
                region,
                Instruction::new(
                    Op::Load { src: alloca[0], indices: vec![zero] },
                    Default::default(),
                ),
                &[ctx.get_type(Type::Scalar(ScalarType::F32))],
            );
            func.push(
                region,
                Instruction::new(Op::GroupId, Default::default()),
                &[idx_ty],
            );
        });

        run_on_function(&mut func, &ctx);

        let ops: Vec<_> = func.body.insts.iter().map(|&h| func.inst(h).op.clone()).collect();
        let stop_pos = ops.iter().position(|op| matches!(op, Op::LifetimeStop { .. })).expect("lifetime_stop inserted");
        let load_pos = ops.iter().position(|op| matches!(op, Op::Load { .. })).unwrap();
        let group_id_pos = ops.iter().position(|op| matches!(op, Op::GroupId)).unwrap();
        assert!(stop_pos > load_pos);
        assert!(stop_pos < group_id_pos);
    }
}
