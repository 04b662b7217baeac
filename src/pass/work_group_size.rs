//! `work-group-size` (§4.7 step 6, §4.12): fills in a function's
//! `subgroup_size`/`work_group_size` attributes when left at `0`, then
//! validates whatever the function ends up with against the target
//! device.

use crate::attribute::{keys, Attribute, NamedAttr};
use crate::context::CompilerContext;
use crate::core_info::{self, CoreInfo, ShapeHint};
use crate::error::{CompilationError, Status};
use crate::ir::{Function, Op, Region};
use crate::ty::Type;

pub fn run_on_function(func: &mut Function, ctx: &CompilerContext, info: &CoreInfo) -> Result<(), CompilationError> {
    let dict = func.attrs.map(|h| ctx.resolve_attr(h));

    let mut subgroup_size = dict
        .as_ref()
        .and_then(|d| d.find(keys::SUBGROUP_SIZE))
        .and_then(Attribute::as_integer)
        .unwrap_or(0) as i32;

    let mut wgs = dict
        .as_ref()
        .and_then(|d| d.find(keys::WORK_GROUP_SIZE))
        .and_then(Attribute::as_integer_array)
        .unwrap_or_default();
    wgs.resize(2, 0);

    if subgroup_size == 0 || wgs[0] == 0 || wgs[1] == 0 {
        let mut shapes = Vec::new();
        collect_shapes(&func.body, func, ctx, &mut shapes);

        if subgroup_size == 0 {
            subgroup_size = core_info::suggest_subgroup_size(&shapes, info);
        }

        if wgs[0] == 0 || wgs[1] == 0 {
            let cfg = info
                .core_config(subgroup_size)
                .ok_or_else(|| CompilationError::at(func.loc, Status::UnsupportedSubgroupSize))?;
            let (tile_x, tile_y) = core_info::suggest_local_tiling(&shapes, subgroup_size, &cfg);
            wgs[0] = tile_x * subgroup_size;
            wgs[1] = tile_y;
        }

        set_func_attrs(func, ctx, subgroup_size, wgs[0], wgs[1]);
    }

    if subgroup_size == 0 {
        return Err(CompilationError::at(func.loc, Status::UnsupportedSubgroupSize));
    }
    if wgs[0] == 0 || wgs[1] == 0 {
        return Err(CompilationError::at(func.loc, Status::UnsupportedWorkGroupSize));
    }
    if wgs[0] % subgroup_size != 0 {
        return Err(CompilationError::with_message(
            func.loc,
            Status::UnsupportedWorkGroupSize,
            "first work-group size mode must be divisible by the subgroup size",
        ));
    }

    let cfg = info
        .core_config(subgroup_size)
        .ok_or_else(|| CompilationError::at(func.loc, Status::UnsupportedSubgroupSize))?;
    if wgs[0] * wgs[1] > cfg.max_work_group_size {
        return Err(CompilationError::at(func.loc, Status::UnsupportedWorkGroupSize));
    }
    Ok(())
}

fn set_func_attrs(func: &mut Function, ctx: &CompilerContext, subgroup_size: i32, wgs0: i32, wgs1: i32) {
    let mut entries = func
        .attrs
        .map(|h| ctx.resolve_attr(h))
        .and_then(|a| match a {
            Attribute::Dictionary(entries) => Some(entries),
            _ => None,
        })
        .unwrap_or_default();
    entries.retain(|e| e.name != keys::SUBGROUP_SIZE && e.name != keys::WORK_GROUP_SIZE);
    entries.push(NamedAttr {
        name: keys::SUBGROUP_SIZE.into(),
        value: Attribute::Integer(subgroup_size as i64),
    });
    entries.push(NamedAttr {
        name: keys::WORK_GROUP_SIZE.into(),
        value: Attribute::Array(vec![Attribute::Integer(wgs0 as i64), Attribute::Integer(wgs1 as i64)]),
    });
    func.attrs = Some(ctx.get_attr(
        Attribute::dictionary(entries).expect("retain-then-push never reintroduces a duplicate key"),
    ));
}

/// Every `blas_a2` instruction's B operand and `blas_a3` instruction's C
/// operand, as `(element, rows, cols)` (`cols == 0` for a 1-d operand),
/// deduplicated.
fn collect_shapes(region: &Region, func: &Function, ctx: &CompilerContext, shapes: &mut Vec<ShapeHint>) {
    for &handle in &region.insts {
        let inst = func.inst(handle);
        let operand = match &inst.op {
            Op::Axpby { b, .. } => Some(*b),
            Op::Sum { b, .. } => Some(*b),
            Op::Gemm { c, .. } => Some(*c),
            Op::Gemv { y, .. } => Some(*y),
            Op::Ger { c, .. } => Some(*c),
            Op::Hadamard { c, .. } => Some(*c),
            _ => None,
        };
        if let Some(v) = operand {
            if let Type::Memref { element, shape, .. } = ctx.resolve_type(func.value(v).ty) {
                let hint = match shape.len() {
                    0 => None,
                    1 => Some(ShapeHint { element, rows: shape[0], cols: 0 }),
                    _ => Some(ShapeHint { element, rows: shape[0], cols: shape[1] }),
                };
                if let Some(hint) = hint {
                    if !shapes.contains(&hint) {
                        shapes.push(hint);
                    }
                }
            }
        }

        for child in inst.child_regions() {
            collect_shapes(child, func, ctx, shapes);
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            collect_shapes(then_r, func, ctx, shapes);
            if let Some(else_r) = else_r {
                collect_shapes(else_r, func, ctx, shapes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{AddressSpace, ScalarType, Transpose};

    #[test]
    fn zero_subgroup_size_is_inferred_and_validated() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![32, 32], vec![1, 32], AddressSpace::Global).unwrap(),
        );
        let a = func.add_param(memref_ty);
        let b = func.add_param(memref_ty);
        let c = func.add_param(memref_ty);
        let scalar_ty = ctx.get_type(Type::Scalar(ScalarType::F32));
        let alpha = func.add_param(scalar_ty);
        let beta = func.add_param(scalar_ty);

        func.with_body(|func, region| {
            func.push(
                region,
                crate::ir::Instruction::new(
                    Op::Gemm {
                        trans_a: Transpose::N,
                        trans_b: Transpose::N,
                        alpha,
                        a,
                        b,
                        beta,
                        c,
                        atomic: false,
                    },
                    Default::default(),
                ),
                &[],
            );
        });

        let info = CoreInfo::pvc();
        run_on_function(&mut func, &ctx, &info).unwrap();

        let dict = ctx.resolve_attr(func.attrs.unwrap());
        let sg = dict.find(keys::SUBGROUP_SIZE).and_then(Attribute::as_integer).unwrap();
        assert!(info.subgroup_sizes.contains(&(sg as i32)));
        let wgs = dict.find(keys::WORK_GROUP_SIZE).and_then(Attribute::as_integer_array).unwrap();
        assert_eq!(wgs[0] % sg, 0);
        assert!(wgs[0] * wgs[1] <= info.max_work_group_size as i64);
    }

    #[test]
    fn unsupported_subgroup_size_is_rejected() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let entries = vec![NamedAttr {
            name: keys::SUBGROUP_SIZE.into(),
            value: Attribute::Integer(7),
        }];
        func.attrs = Some(ctx.get_attr(Attribute::dictionary(entries).unwrap()));
        let info = CoreInfo::pvc();
        let err = run_on_function(&mut func, &ctx, &info).unwrap_err();
        assert_eq!(err.status, Status::UnsupportedSubgroupSize);
    }
}
