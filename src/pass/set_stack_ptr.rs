//! `set-stack-ptr` (§4.7 step 3): linear-scan interval allocation, assigning
//! each `alloca` a byte offset into the function's stack frame.

use crate::attribute::{Attribute, NamedAttr};
use crate::context::CompilerContext;
use crate::error::{CompilationError, Status};
use crate::ir::{Function, Instruction, Op, Region};

struct Allocation {
    value: crate::arena::Handle<crate::ir::Value>,
    start: i64,
    stop: i64,
}

pub fn run_on_function(func: &mut Function, ctx: &CompilerContext) -> Result<(), CompilationError> {
    let mut allocs: Vec<Allocation> = Vec::new();
    func.with_body(|func, body| walk_region(func, body, ctx, &mut allocs))
}

/// Swaps a instruction's child regions out (they're embedded by value
/// inside its `Op`), so they can be recursed into while still holding
/// `&mut Function` for the recursive call.
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

fn walk_region(
    func: &mut Function,
    region: &mut Region,
    ctx: &CompilerContext,
    allocs: &mut Vec<Allocation>,
) -> Result<(), CompilationError> {
    for i in 0..region.insts.len() {
        let handle = region.insts[i];

        let children = take_children(&mut func.instructions[handle]);
        let mut restored = Vec::with_capacity(children.len());
        for mut child in children {
            walk_region(func, &mut child, ctx, allocs)?;
            restored.push(child);
        }
        restore_children(&mut func.instructions[handle], restored);

        let inst = func.inst(handle);
        match inst.op {
            Op::Alloca => {
                let result = inst.results[0];
                let loc = inst.loc;
                let ty = ctx.resolve_type(func.value(result).ty);
                let align = ty.element_alignment();
                let size = ty.size_in_bytes().ok_or_else(|| {
                    CompilationError::with_message(
                        loc,
                        Status::InternalCompilerError,
                        "alloca with non-static size reached set-stack-ptr",
                    )
                })?;

                let mut stack_ptr = 0i64;
                let mut insert_at = allocs.len();
                for (idx, a) in allocs.iter().enumerate() {
                    if a.start - stack_ptr >= size {
                        insert_at = idx;
                        break;
                    }
                    stack_ptr = (1 + (a.stop - 1) / i64::from(align)) * i64::from(align);
                }
                allocs.insert(
                    insert_at,
                    Allocation {
                        value: result,
                        start: stack_ptr,
                        stop: stack_ptr + size,
                    },
                );

                let dict = ctx.get_attr(
                    Attribute::dictionary(vec![NamedAttr {
                        name: crate::attribute::keys::STACK_PTR.into(),
                        value: Attribute::Integer(stack_ptr),
                    }])
                    .expect("single-entry dictionary never has duplicate keys"),
                );
                func.instructions[handle].attrs = Some(dict);
            }
            Op::LifetimeStop { obj } => {
                let loc = inst.loc;
                let before = allocs.len();
                allocs.retain(|a| a.value != obj);
                if before - allocs.len() != 1 {
                    return Err(CompilationError::with_message(
                        loc,
                        Status::InternalCompilerError,
                        "lifetime_stop: value not found in list of allocations",
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instruction;
    use crate::ty::{AddressSpace, ScalarType, Type};

    #[test]
    fn first_fit_reuses_freed_gap() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let small = ctx.get_type(
            Type::memref(ScalarType::F32, vec![4], vec![1], AddressSpace::Local).unwrap(),
        );
        let big = ctx.get_type(
            Type::memref(ScalarType::F64, vec![8], vec![1], AddressSpace::Local).unwrap(),
        );

        func.with_body(|func, region| {
            let (_, a) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[small]);
            let (_, b) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[big]);
            func.push(
                region,
                Instruction::new(Op::LifetimeStop { obj: a[0] }, Default::default()),
                &[],
            );
            let (_, c) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[small]);
            let _ = (b, c);
        });

        run_on_function(&mut func, &ctx).unwrap();

        let stack_ptr_of = |func: &Function, ctx: &CompilerContext, h: crate::arena::Handle<crate::ir::Instruction>| {
            func.inst(h)
                .attrs
                .map(|a| ctx.resolve_attr(a))
                .and_then(|a| a.find(crate::attribute::keys::STACK_PTR).and_then(|v| v.as_integer()))
                .unwrap()
        };

        let allocas: Vec<_> = func.body.insts.iter().filter(|&&h| matches!(func.inst(h).op, Op::Alloca)).collect();
        assert_eq!(stack_ptr_of(&func, &ctx, *allocas[0]), 0);
        assert_eq!(stack_ptr_of(&func, &ctx, *allocas[2]), 0);
        assert_eq!(stack_ptr_of(&func, &ctx, *allocas[1]), 16);
    }
}
