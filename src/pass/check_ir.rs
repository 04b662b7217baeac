//! `check-ir` (§4.7 step 1): execution-kind soundness plus yield arity
//! (§8 properties 3 and 4).

use crate::context::CompilerContext;
use crate::error::{CompilationError, Status};
use crate::ir::{Function, InstKind, Op, Region};

/// Runs the pass over `func`, returning the first violation found.
pub fn run_on_function(func: &Function, ctx: &CompilerContext) -> Result<(), CompilationError> {
    check_region(&func.body, func, ctx, false)
}

fn check_region(
    region: &Region,
    func: &Function,
    ctx: &CompilerContext,
    inside_spmd: bool,
) -> Result<(), CompilationError> {
    for &handle in &region.insts {
        let inst = func.inst(handle);
        match inst.kind() {
            InstKind::Collective if inside_spmd => {
                return Err(CompilationError::at(inst.loc, Status::IrCollectiveCalledFromSpmd));
            }
            InstKind::Spmd if !inside_spmd => {
                return Err(CompilationError::at(inst.loc, Status::IrSpmdCalledFromCollective));
            }
            _ => {}
        }

        let child_is_spmd = matches!(inst.op, Op::Foreach { .. } | Op::Parallel { .. });

        for child in inst.child_regions() {
            check_region(child, func, ctx, inside_spmd || child_is_spmd)?;
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            check_region(then_r, func, ctx, inside_spmd)?;
            if let Some(else_r) = else_r {
                check_region(else_r, func, ctx, inside_spmd)?;
            }
        }

        check_yield_arity(inst, func, ctx)?;
    }
    Ok(())
}

fn yield_operands(region: &Region, func: &Function) -> Option<Vec<crate::arena::Handle<crate::ir::Value>>> {
    let last = *region.insts.last()?;
    match &func.inst(last).op {
        Op::Yield { vals } => Some(vals.clone()),
        _ => None,
    }
}

fn check_yield_arity(inst: &crate::ir::Instruction, func: &Function, ctx: &CompilerContext) -> Result<(), CompilationError> {
    let num_results = inst.results.len();
    match &inst.op {
        Op::For { body, .. } => {
            if num_results > 0 {
                verify_region_yield(body, func, ctx, &inst.results, inst.loc)?;
            }
        }
        Op::If {
            then_region,
            else_region,
            ..
        } => {
            if num_results > 0 {
                verify_region_yield(then_region, func, ctx, &inst.results, inst.loc)?;
                let else_region = else_region
                    .as_ref()
                    .ok_or_else(|| CompilationError::at(inst.loc, Status::IrYieldMismatch))?;
                verify_region_yield(else_region, func, ctx, &inst.results, inst.loc)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn verify_region_yield(
    region: &Region,
    func: &Function,
    ctx: &CompilerContext,
    results: &[crate::arena::Handle<crate::ir::Value>],
    loc: crate::error::Location,
) -> Result<(), CompilationError> {
    let yielded = yield_operands(region, func).ok_or_else(|| CompilationError::at(loc, Status::IrYieldMismatch))?;
    if yielded.len() != results.len() {
        return Err(CompilationError::at(loc, Status::IrYieldMismatch));
    }
    for (&y, &r) in yielded.iter().zip(results.iter()) {
        if func.value(y).ty != func.value(r).ty {
            return Err(CompilationError::at(loc, Status::IrYieldMismatch));
        }
    }
    let _ = ctx;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Handle;
    use crate::ir::{FenceFlags, Instruction, RegionKind};
    use crate::ty::{ScalarType, Type};

    fn dummy_result(func: &mut Function, ty: Handle<Type>) -> Handle<crate::ir::Value> {
        func.with_body(|func, region| {
            func.push(region, Instruction::new(Op::GroupId, Default::default()), &[ty])
                .1[0]
        })
    }

    #[test]
    fn barrier_inside_spmd_region_is_rejected() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let idx_ty = ctx.get_type(Type::Scalar(ScalarType::Index));
        let from = dummy_result(&mut func, idx_ty);
        let to = dummy_result(&mut func, idx_ty);

        let mut body = crate::ir::Region::new(RegionKind::Spmd);
        func.push(
            &mut body,
            Instruction::new(Op::Barrier { fence: FenceFlags::LOCAL }, Default::default()),
            &[],
        );
        func.with_body(|func, region| {
            func.push(
                region,
                Instruction::new(
                    Op::Foreach {
                        loop_var_ty: ScalarType::Index,
                        from,
                        to,
                        body,
                    },
                    Default::default(),
                ),
                &[],
            );
        });

        let err = run_on_function(&func, &ctx).unwrap_err();
        assert_eq!(err.status, Status::IrCollectiveCalledFromSpmd);
    }
}
