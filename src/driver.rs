//! The compilation driver (§4.1, §4.7, C1): the fixed pass pipeline that
//! turns a [`Program`] into a [`crate::spv::Module`], plus the named
//! single-pass entry point the tooling layer uses.
//!
//! Grounded on `original_source/src/compiler.cpp` and `src/passes.hpp`:
//! the generic `run_function_pass` template there dispatches on a pass
//! name string to one of a fixed set of free functions, which is exactly
//! what [`run_function_pass`] does here; `compiler.cpp`'s `compile_prog`
//! drives the same nine-stage order `compile_to_spirv` reproduces.

use crate::analysis::matrix_ext;
use crate::core_info::CoreInfo;
use crate::error::{CompilationError, Status};
use crate::ir::Program;
use crate::pass;
use crate::spv::{self, Module};

/// Names accepted by [`run_function_pass`], in pipeline order.
pub const FUNCTION_PASSES: &[&str] = &[
    "check-ir",
    "insert-lifetime-stop",
    "set-stack-ptr",
    "lower-coopmatrix",
    "lower-linalg",
    "work-group-size",
    "alignment-propagation",
    "insert-barrier",
];

pub fn list_function_passes() -> &'static [&'static str] {
    FUNCTION_PASSES
}

/// Runs every pass up to and including code generation, producing a SPIR-V
/// module ready for [`spv::assemble::assemble`].
pub fn compile_to_spirv(program: &mut Program, info: &CoreInfo) -> Result<Module, CompilationError> {
    run_pipeline(program, info)?;
    let mut writer = spv::Writer::new();
    writer.write_program(program, info)
}

/// [`compile_to_spirv`], then serialised to the little-endian byte buffer
/// a host runtime loads directly.
pub fn compile_to_spirv_and_assemble(
    program: &mut Program,
    info: &CoreInfo,
    version: (u8, u8),
) -> Result<Vec<u8>, CompilationError> {
    let module = compile_to_spirv(program, info)?;
    Ok(spv::assemble::assemble_bytes(&module, version))
}

fn run_pipeline(program: &mut Program, info: &CoreInfo) -> Result<(), CompilationError> {
    for func in &program.functions {
        pass::check_ir::run_on_function(func, &program.context)?;
    }
    for func in &mut program.functions {
        pass::insert_lifetime_stop::run_on_function(func, &program.context);
        pass::set_stack_ptr::run_on_function(func, &program.context)?;
        pass::lower_coopmatrix::run_on_function(func, &program.context, info)?;
        pass::lower_linalg::run_on_function(func, &program.context)?;
        pass::work_group_size::run_on_function(func, &program.context, info)?;
        pass::alignment_propagation::run_on_function(func, &program.context, info.default_alignment);
        pass::insert_barrier::run_on_function(func, &program.context);
    }
    Ok(())
}

/// Runs a single named pass over every function in `program`, for tooling
/// that wants to inspect intermediate IR a stage at a time (mirrors
/// `original_source/src/passes.hpp`'s `run_function_pass`).
pub fn run_function_pass(name: &str, program: &mut Program, info: Option<&CoreInfo>) -> Result<(), CompilationError> {
    match name {
        "check-ir" => {
            for func in &program.functions {
                pass::check_ir::run_on_function(func, &program.context)?;
            }
            Ok(())
        }
        "insert-lifetime-stop" => {
            for func in &mut program.functions {
                pass::insert_lifetime_stop::run_on_function(func, &program.context);
            }
            Ok(())
        }
        "set-stack-ptr" => {
            for func in &mut program.functions {
                pass::set_stack_ptr::run_on_function(func, &program.context)?;
            }
            Ok(())
        }
        "lower-coopmatrix" => {
            let info = require_core_info(name, info)?;
            for func in &mut program.functions {
                pass::lower_coopmatrix::run_on_function(func, &program.context, info)?;
            }
            Ok(())
        }
        "lower-linalg" => {
            for func in &mut program.functions {
                pass::lower_linalg::run_on_function(func, &program.context)?;
            }
            Ok(())
        }
        "work-group-size" => {
            let info = require_core_info(name, info)?;
            for func in &mut program.functions {
                pass::work_group_size::run_on_function(func, &program.context, info)?;
            }
            Ok(())
        }
        "alignment-propagation" => {
            let info = require_core_info(name, info)?;
            for func in &mut program.functions {
                pass::alignment_propagation::run_on_function(func, &program.context, info.default_alignment);
            }
            Ok(())
        }
        "insert-barrier" => {
            for func in &mut program.functions {
                pass::insert_barrier::run_on_function(func, &program.context);
            }
            Ok(())
        }
        _ => Err(CompilationError::with_message(
            program.loc,
            Status::InvalidArguments,
            format!("unknown pass name \"{name}\""),
        )),
    }
}

fn require_core_info<'a>(pass_name: &str, info: Option<&'a CoreInfo>) -> Result<&'a CoreInfo, CompilationError> {
    info.ok_or_else(|| {
        CompilationError::with_message(
            crate::error::Location::default(),
            Status::InvalidArguments,
            format!("pass \"{pass_name}\" requires core info"),
        )
    })
}

/// Runs the matrix-extension eligibility analysis standalone, for tooling
/// that wants to inspect it without a full compile (e.g. test fixtures
/// asserting which values fell back to the DIY path).
pub fn run_matrix_ext_analysis(
    program: &Program,
    info: &CoreInfo,
) -> Vec<matrix_ext::MatrixExtAnalysisResult> {
    program
        .functions
        .iter()
        .map(|f| matrix_ext::run_on_function(f, &program.context, info))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;

    #[test]
    fn unknown_pass_name_is_rejected() {
        let ctx = CompilerContext::new();
        let mut program = Program::new(ctx);
        let err = run_function_pass("not-a-real-pass", &mut program, None).unwrap_err();
        assert_eq!(err.status, Status::InvalidArguments);
    }

    #[test]
    fn pass_requiring_core_info_without_it_is_rejected() {
        let ctx = CompilerContext::new();
        let mut program = Program::new(ctx);
        let err = run_function_pass("work-group-size", &mut program, None).unwrap_err();
        assert_eq!(err.status, Status::InvalidArguments);
    }

    #[test]
    fn empty_program_compiles_to_an_empty_module() {
        let ctx = CompilerContext::new();
        let mut program = Program::new(ctx);
        let info = CoreInfo::pvc();
        let module = compile_to_spirv(&mut program, &info).unwrap();
        assert!(module.functions.is_empty());
        assert!(!module.capabilities.is_empty());
    }

    #[test]
    fn list_function_passes_matches_pipeline_order() {
        assert_eq!(list_function_passes(), FUNCTION_PASSES);
    }
}
