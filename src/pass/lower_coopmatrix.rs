//! `lower-coopmatrix` (§4.7 step 4): validates that the function's
//! `subgroup_size` resolves to a `core_config` the target actually offers.
//!
//! The captured source's instruction visitor (`coopmatrix_code_generator`)
//! never actually replaces an instruction — both of its `operator()`
//! overloads unconditionally return `false` — so `run_on_region` only
//! shuffles the instruction list through a temporary and back unchanged.
//! The real KHR-intrinsic-vs-subgroup-shuffle choice happens later, in
//! `spv::codegen`, which consults `analysis::matrix_ext` and
//! `CoreInfo::matrix_ext` directly against the target `core_config` this
//! pass has already confirmed exists.
use crate::attribute::{keys, Attribute};
use crate::context::CompilerContext;
use crate::core_info::CoreInfo;
use crate::error::{CompilationError, Status};
use crate::ir::Function;

pub fn run_on_function(func: &mut Function, ctx: &CompilerContext, info: &CoreInfo) -> Result<(), CompilationError> {
    let subgroup_size = func
        .attrs
        .map(|h| ctx.resolve_attr(h))
        .as_ref()
        .and_then(|d| d.find(keys::SUBGROUP_SIZE))
        .and_then(Attribute::as_integer)
        .unwrap_or(0) as i32;

    info.core_config(subgroup_size)
        .ok_or_else(|| CompilationError::at(func.loc, Status::UnsupportedSubgroupSize))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::NamedAttr;
    use crate::core_info::CoreInfo;

    fn set_subgroup_size(func: &mut Function, ctx: &CompilerContext, subgroup_size: i32) {
        let dict = Attribute::dictionary(vec![NamedAttr {
            name: keys::SUBGROUP_SIZE.into(),
            value: ctx.get_attr(Attribute::Integer(subgroup_size as i64)),
        }])
        .unwrap();
        func.attrs = Some(ctx.get_attr(dict));
    }

    #[test]
    fn supported_subgroup_size_passes() {
        let ctx = CompilerContext::new();
        let info = CoreInfo::pvc();
        let mut func = Function::new("f");
        set_subgroup_size(&mut func, &ctx, 16);

        assert!(run_on_function(&mut func, &ctx, &info).is_ok());
    }

    #[test]
    fn unsupported_subgroup_size_is_rejected() {
        let ctx = CompilerContext::new();
        let info = CoreInfo::pvc();
        let mut func = Function::new("f");
        set_subgroup_size(&mut func, &ctx, 7);

        let err = run_on_function(&mut func, &ctx, &info).unwrap_err();
        assert_eq!(err.status, Status::UnsupportedSubgroupSize);
    }
}
