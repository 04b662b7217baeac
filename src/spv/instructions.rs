//! One constructor function per SPIR-V instruction this backend actually
//! emits (§4.8). Grounded on the teacher's `back::spv::instructions.rs`
//! `instruction_*` free-function style (build an [`Instruction`], fill in
//! its type/result/operands, return it) rather than a builder-pattern API.

use crate::spv::Instruction;
use spirv::{Op, Word};

fn string_words(s: &str) -> Vec<Word> {
    let bytes = s.as_bytes();
    let mut words: Vec<Word> = bytes
        .chunks(4)
        .map(|chunk| {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(buf)
        })
        .collect();
    if bytes.len() % 4 == 0 {
        words.push(0);
    }
    words
}

//
// Debug & annotation instructions
//

pub fn source(lang: spirv::SourceLanguage, version: u32) -> Instruction {
    let mut i = Instruction::new(Op::Source);
    i.add_operand(lang as u32);
    i.add_operand(version);
    i
}

pub fn name(target_id: Word, s: &str) -> Instruction {
    let mut i = Instruction::new(Op::Name);
    i.add_operand(target_id);
    i.add_operands(string_words(s));
    i
}

pub fn decorate(target_id: Word, decoration: spirv::Decoration, extra: &[Word]) -> Instruction {
    let mut i = Instruction::new(Op::Decorate);
    i.add_operand(target_id);
    i.add_operand(decoration as u32);
    i.add_operands(extra.iter().copied());
    i
}

//
// Mode-setting instructions
//

pub fn capability(cap: spirv::Capability) -> Instruction {
    let mut i = Instruction::new(Op::Capability);
    i.add_operand(cap as u32);
    i
}

pub fn ext_inst_import(id: Word, name: &str) -> Instruction {
    let mut i = Instruction::new(Op::ExtInstImport);
    i.set_result(id);
    i.add_operands(string_words(name));
    i
}

pub fn memory_model(addressing: spirv::AddressingModel, memory: spirv::MemoryModel) -> Instruction {
    let mut i = Instruction::new(Op::MemoryModel);
    i.add_operand(addressing as u32);
    i.add_operand(memory as u32);
    i
}

pub fn entry_point(model: spirv::ExecutionModel, func_id: Word, name: &str, interface: &[Word]) -> Instruction {
    let mut i = Instruction::new(Op::EntryPoint);
    i.add_operand(model as u32);
    i.add_operand(func_id);
    i.add_operands(string_words(name));
    i.add_operands(interface.iter().copied());
    i
}

pub fn execution_mode_local_size(func_id: Word, x: u32, y: u32, z: u32) -> Instruction {
    let mut i = Instruction::new(Op::ExecutionMode);
    i.add_operand(func_id);
    i.add_operand(spirv::ExecutionMode::LocalSize as u32);
    i.add_operand(x);
    i.add_operand(y);
    i.add_operand(z);
    i
}

//
// Type-declaration instructions
//

pub fn type_void(id: Word) -> Instruction {
    let mut i = Instruction::new(Op::TypeVoid);
    i.set_result(id);
    i
}

pub fn type_bool(id: Word) -> Instruction {
    let mut i = Instruction::new(Op::TypeBool);
    i.set_result(id);
    i
}

pub fn type_int(id: Word, width: u32, signed: bool) -> Instruction {
    let mut i = Instruction::new(Op::TypeInt);
    i.set_result(id);
    i.add_operand(width);
    i.add_operand(signed as u32);
    i
}

pub fn type_float(id: Word, width: u32) -> Instruction {
    let mut i = Instruction::new(Op::TypeFloat);
    i.set_result(id);
    i.add_operand(width);
    i
}

pub fn type_pointer(id: Word, storage_class: spirv::StorageClass, pointee: Word) -> Instruction {
    let mut i = Instruction::new(Op::TypePointer);
    i.set_result(id);
    i.add_operand(storage_class as u32);
    i.add_operand(pointee);
    i
}

pub fn type_function(id: Word, return_type: Word, params: &[Word]) -> Instruction {
    let mut i = Instruction::new(Op::TypeFunction);
    i.set_result(id);
    i.add_operand(return_type);
    i.add_operands(params.iter().copied());
    i
}

/// `OpTypeCooperativeMatrixKHR` — used when the matrix-extension analysis
/// keeps a value on the hardware path (§4.8's "prefers ...KHR" branch).
pub fn type_coop_matrix_khr(
    id: Word,
    component_type: Word,
    scope: Word,
    rows: Word,
    cols: Word,
    use_: Word,
) -> Instruction {
    let mut i = Instruction::new(Op::TypeCooperativeMatrixKHR);
    i.set_result(id);
    i.add_operand(component_type);
    i.add_operand(scope);
    i.add_operand(rows);
    i.add_operand(cols);
    i.add_operand(use_);
    i
}

pub fn type_array(id: Word, element_type: Word, length: Word) -> Instruction {
    let mut i = Instruction::new(Op::TypeArray);
    i.set_result(id);
    i.add_operand(element_type);
    i.add_operand(length);
    i
}

//
// Constant instructions
//

pub fn constant_bool(result_type: Word, id: Word, value: bool) -> Instruction {
    let mut i = Instruction::new(if value { Op::ConstantTrue } else { Op::ConstantFalse });
    i.set_type(result_type);
    i.set_result(id);
    i
}

pub fn constant_u32(result_type: Word, id: Word, value: u32) -> Instruction {
    let mut i = Instruction::new(Op::Constant);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(value);
    i
}

pub fn constant_u64(result_type: Word, id: Word, value: u64) -> Instruction {
    let mut i = Instruction::new(Op::Constant);
    i.set_type(result_type);
    i.set_result(id);
    let bits = value.to_le_bytes();
    i.add_operand(u32::from_le_bytes(bits[0..4].try_into().unwrap()));
    i.add_operand(u32::from_le_bytes(bits[4..8].try_into().unwrap()));
    i
}

pub fn constant_f32(result_type: Word, id: Word, value: f32) -> Instruction {
    let mut i = Instruction::new(Op::Constant);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(value.to_bits());
    i
}

pub fn constant_f64(result_type: Word, id: Word, value: f64) -> Instruction {
    let mut i = Instruction::new(Op::Constant);
    i.set_type(result_type);
    i.set_result(id);
    let bits = value.to_bits().to_le_bytes();
    i.add_operand(u32::from_le_bytes(bits[0..4].try_into().unwrap()));
    i.add_operand(u32::from_le_bytes(bits[4..8].try_into().unwrap()));
    i
}

//
// Memory instructions
//

pub fn variable(result_type: Word, id: Word, storage_class: spirv::StorageClass, initializer: Option<Word>) -> Instruction {
    let mut i = Instruction::new(Op::Variable);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(storage_class as u32);
    if let Some(init) = initializer {
        i.add_operand(init);
    }
    i
}

pub fn load(result_type: Word, id: Word, pointer: Word) -> Instruction {
    let mut i = Instruction::new(Op::Load);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(pointer);
    i
}

pub fn store(pointer: Word, object: Word) -> Instruction {
    let mut i = Instruction::new(Op::Store);
    i.add_operand(pointer);
    i.add_operand(object);
    i
}

pub fn in_bounds_access_chain(result_type: Word, id: Word, base: Word, indices: &[Word]) -> Instruction {
    let mut i = Instruction::new(Op::InBoundsAccessChain);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(base);
    i.add_operands(indices.iter().copied());
    i
}

//
// Function structure instructions
//

pub fn function(result_type: Word, id: Word, control: spirv::FunctionControl, fn_type: Word) -> Instruction {
    let mut i = Instruction::new(Op::Function);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(control.bits());
    i.add_operand(fn_type);
    i
}

pub fn function_parameter(result_type: Word, id: Word) -> Instruction {
    let mut i = Instruction::new(Op::FunctionParameter);
    i.set_type(result_type);
    i.set_result(id);
    i
}

pub fn function_end() -> Instruction {
    Instruction::new(Op::FunctionEnd)
}

pub fn label(id: Word) -> Instruction {
    let mut i = Instruction::new(Op::Label);
    i.set_result(id);
    i
}

pub fn branch(target: Word) -> Instruction {
    let mut i = Instruction::new(Op::Branch);
    i.add_operand(target);
    i
}

pub fn branch_conditional(condition: Word, true_label: Word, false_label: Word) -> Instruction {
    let mut i = Instruction::new(Op::BranchConditional);
    i.add_operand(condition);
    i.add_operand(true_label);
    i.add_operand(false_label);
    i
}

pub fn loop_merge(merge_block: Word, continue_target: Word) -> Instruction {
    let mut i = Instruction::new(Op::LoopMerge);
    i.add_operand(merge_block);
    i.add_operand(continue_target);
    i.add_operand(spirv::LoopControl::NONE.bits());
    i
}

pub fn selection_merge(merge_block: Word) -> Instruction {
    let mut i = Instruction::new(Op::SelectionMerge);
    i.add_operand(merge_block);
    i.add_operand(spirv::SelectionControl::NONE.bits());
    i
}

pub fn phi(result_type: Word, id: Word, pairs: &[(Word, Word)]) -> Instruction {
    let mut i = Instruction::new(Op::Phi);
    i.set_type(result_type);
    i.set_result(id);
    for &(value, block) in pairs {
        i.add_operand(value);
        i.add_operand(block);
    }
    i
}

pub fn return_(value: Option<Word>) -> Instruction {
    match value {
        Some(v) => {
            let mut i = Instruction::new(Op::ReturnValue);
            i.add_operand(v);
            i
        }
        None => Instruction::new(Op::Return),
    }
}

pub fn function_call(result_type: Word, id: Word, function_id: Word, args: &[Word]) -> Instruction {
    let mut i = Instruction::new(Op::FunctionCall);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(function_id);
    i.add_operands(args.iter().copied());
    i
}

//
// Arithmetic / compare / cast instructions
//

pub fn binary(op: Op, result_type: Word, id: Word, a: Word, b: Word) -> Instruction {
    let mut i = Instruction::new(op);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(a);
    i.add_operand(b);
    i
}

pub fn unary(op: Op, result_type: Word, id: Word, a: Word) -> Instruction {
    let mut i = Instruction::new(op);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(a);
    i
}

pub fn select(result_type: Word, id: Word, condition: Word, object1: Word, object2: Word) -> Instruction {
    let mut i = Instruction::new(Op::Select);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(condition);
    i.add_operand(object1);
    i.add_operand(object2);
    i
}

//
// Barrier / synchronisation
//

pub fn control_barrier(execution: Word, memory: Word, semantics: Word) -> Instruction {
    let mut i = Instruction::new(Op::ControlBarrier);
    i.add_operand(execution);
    i.add_operand(memory);
    i.add_operand(semantics);
    i
}

//
// Cooperative matrix (KHR)
//

pub fn coop_matrix_load_khr(
    result_type: Word,
    id: Word,
    pointer: Word,
    layout: Word,
    memory_operands: Option<Word>,
) -> Instruction {
    let mut i = Instruction::new(Op::CooperativeMatrixLoadKHR);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(pointer);
    i.add_operand(layout);
    if let Some(mo) = memory_operands {
        i.add_operand(mo);
    }
    i
}

pub fn coop_matrix_store_khr(pointer: Word, object: Word, layout: Word, memory_operands: Option<Word>) -> Instruction {
    let mut i = Instruction::new(Op::CooperativeMatrixStoreKHR);
    i.add_operand(pointer);
    i.add_operand(object);
    i.add_operand(layout);
    if let Some(mo) = memory_operands {
        i.add_operand(mo);
    }
    i
}

pub fn coop_matrix_mul_add_khr(result_type: Word, id: Word, a: Word, b: Word, c: Word) -> Instruction {
    let mut i = Instruction::new(Op::CooperativeMatrixMulAddKHR);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(a);
    i.add_operand(b);
    i.add_operand(c);
    i
}

//
// Subgroup
//

pub fn group_non_uniform_broadcast(result_type: Word, id: Word, execution_scope: Word, value: Word, lane: Word) -> Instruction {
    let mut i = Instruction::new(Op::GroupNonUniformBroadcast);
    i.set_type(result_type);
    i.set_result(id);
    i.add_operand(execution_scope);
    i.add_operand(value);
    i.add_operand(lane);
    i
}
