//! `alignment-propagation` (§4.7 step 7): refines the per-value alignment
//! `analysis::memref` seeds from parameters/`alloca`s forward through
//! `expand`/`fuse`/`subview`, and stamps a per-access `align` attribute
//! onto `load`/`store`/`cooperative_matrix_load`/`cooperative_matrix_store`
//! for codegen to pick an aligned SPIR-V memory operand.

use crate::analysis::gcd::{self, GcdAnalysisResult};
use crate::analysis::memref::{self, MemrefAnalysisResult, MemrefInfo};
use crate::arena::Handle;
use crate::attribute::{keys, Attribute, NamedAttr};
use crate::context::CompilerContext;
use crate::ir::{ConstantValue, Function, Instruction, Op, Region, Value, ValueDef};
use crate::ty::{is_dynamic, Type};
use crate::FastHashMap;

type Known = FastHashMap<Handle<Value>, MemrefInfo>;

pub fn run_on_function(func: &mut Function, ctx: &CompilerContext, default_alignment: i32) {
    let gcd = gcd::run_on_function(func);
    let seed = memref::run_on_function(func, ctx, default_alignment);
    let mut known: Known = FastHashMap::default();
    func.with_body(|func, body| {
        walk_region(func, body, ctx, &gcd, &seed, &mut known);
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

fn info_of(v: Handle<Value>, known: &Known, seed: &MemrefAnalysisResult) -> Option<MemrefInfo> {
    known.get(&v).cloned().or_else(|| seed.get_if(v).cloned())
}

/// Shape/stride gcds for a freshly-derived memref type: static entries
/// seed their own value, dynamic entries fall back to `1` (§8 property 8).
fn shape_stride_gcd(ty: &Type) -> (Vec<i64>, Vec<i64>) {
    match ty {
        Type::Memref { shape, stride, .. } => (
            shape.iter().map(|&s| if is_dynamic(s) { 1 } else { s }).collect(),
            stride.iter().map(|&s| if is_dynamic(s) { 1 } else { s }).collect(),
        ),
        _ => (Vec::new(), Vec::new()),
    }
}

/// The absolute value of a literal integer `Constant` feeding `v`, or `1`
/// (unknown offset, §8 property 8) if `v` isn't one.
fn literal_or_unknown(func: &Function, v: Handle<Value>) -> i64 {
    match func.value(v).def {
        ValueDef::InstResult { inst, .. } => match &func.inst(inst).op {
            Op::Constant {
                value: ConstantValue::Int(c),
            } => c.abs(),
            _ => 1,
        },
        _ => 1,
    }
}

fn stamp_align(func: &mut Function, ctx: &CompilerContext, handle: Handle<Instruction>, align: i32) {
    let dict = ctx.get_attr(
        Attribute::dictionary(vec![NamedAttr {
            name: keys::ALIGN.into(),
            value: Attribute::Integer(align as i64),
        }])
        .expect("single-entry dictionary never has duplicate keys"),
    );
    func.instructions[handle].attrs = Some(dict);
}

fn derive(func: &mut Function, ctx: &CompilerContext, result: Handle<Value>, alignment: i32, known: &mut Known) {
    let ty = ctx.resolve_type(func.value(result).ty);
    let (shape_gcd, stride_gcd) = shape_stride_gcd(&ty);
    known.insert(result, MemrefInfo::new(alignment, ty.element_alignment(), shape_gcd, stride_gcd));
}

fn process_inst(
    func: &mut Function,
    handle: Handle<Instruction>,
    ctx: &CompilerContext,
    gcd: &GcdAnalysisResult,
    seed: &MemrefAnalysisResult,
    known: &mut Known,
) {
    let op = func.inst(handle).op.clone();
    let result = func.inst(handle).results.first().copied();
    match op {
        Op::Expand { src, .. } | Op::Fuse { src, .. } => {
            if let (Some(result), Some(src_info)) = (result, info_of(src, known, seed)) {
                derive(func, ctx, result, src_info.alignment, known);
            }
        }
        Op::Subview { src, offsets, .. } => {
            if let (Some(result), Some(src_info)) = (result, info_of(src, known, seed)) {
                let offset_gcds: Vec<i64> = offsets.iter().map(|&o| o.abs()).collect();
                let alignment = src_info.compute_max_alignment(&offset_gcds);
                derive(func, ctx, result, alignment, known);
            }
        }
        Op::CoopMatrixLoad { src, pos0, pos1, .. } => {
            if let Some(src_info) = info_of(src, known, seed) {
                let align = src_info.compute_max_alignment(&[gcd.get(pos0), gcd.get(pos1)]);
                stamp_align(func, ctx, handle, align);
            }
        }
        Op::CoopMatrixStore { dst, pos0, pos1, .. } => {
            if let Some(dst_info) = info_of(dst, known, seed) {
                let align = dst_info.compute_max_alignment(&[gcd.get(pos0), gcd.get(pos1)]);
                stamp_align(func, ctx, handle, align);
            }
        }
        Op::Load { src, indices } => {
            let src_ty = ctx.resolve_type(func.value(src).ty);
            if matches!(src_ty, Type::Group { .. }) {
                if let (Some(result), Some(src_info)) = (result, info_of(src, known, seed)) {
                    known.insert(result, src_info);
                }
            } else if let Some(src_info) = info_of(src, known, seed) {
                let gcds: Vec<i64> = indices.iter().map(|&v| gcd.get(v)).collect();
                let align = src_info.compute_max_alignment(&gcds);
                stamp_align(func, ctx, handle, align);
            }
        }
        Op::Store { dst, indices, .. } => {
            if let Some(dst_info) = info_of(dst, known, seed) {
                let gcds: Vec<i64> = indices.iter().map(|&v| literal_or_unknown(func, v)).collect();
                let align = dst_info.compute_max_alignment(&gcds);
                stamp_align(func, ctx, handle, align);
            }
        }
        _ => {}
    }
}

fn walk_region(
    func: &mut Function,
    region: &mut Region,
    ctx: &CompilerContext,
    gcd: &GcdAnalysisResult,
    seed: &MemrefAnalysisResult,
    known: &mut Known,
) {
    for i in 0..region.insts.len() {
        let handle = region.insts[i];
        process_inst(func, handle, ctx, gcd, seed, known);

        let children = take_children(&mut func.instructions[handle]);
        let mut restored = Vec::with_capacity(children.len());
        for mut child in children {
            walk_region(func, &mut child, ctx, gcd, seed, known);
            restored.push(child);
        }
        restore_children(&mut func.instructions[handle], restored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{keys, Attribute as Attr, NamedAttr as NA};
    use crate::ty::{AddressSpace, ScalarType};

    fn align_of(func: &Function, ctx: &CompilerContext, h: Handle<Instruction>) -> Option<i64> {
        func.inst(h)
            .attrs
            .map(|a| ctx.resolve_attr(a))
            .and_then(|a| a.find(keys::ALIGN).and_then(Attribute::as_integer))
    }

    #[test]
    fn subview_with_misaligned_offset_drops_below_param_alignment() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![64, 64], vec![1, 64], AddressSpace::Global).unwrap(),
        );
        let param = func.add_param(memref_ty);
        let dict = ctx.get_attr(
            Attr::dictionary(vec![NA {
                name: keys::ALIGNMENT.into(),
                value: Attr::Integer(64),
            }])
            .unwrap(),
        );
        func.param_attrs[0] = Some(dict);

        let small = ctx.get_type(Type::memref(ScalarType::F32, vec![4], vec![1], AddressSpace::Global).unwrap());
        let (store_h, load_h) = func.with_body(|func, region| {
            let sub = func.push(
                region,
                Instruction::new(
                    Op::Subview {
                        src: param,
                        offsets: vec![1, 0],
                        sizes: vec![4, 1],
                    },
                    Default::default(),
                ),
                &[small],
            )
            .1[0];
            let idx_ty = ctx.get_type(Type::Scalar(ScalarType::Index));
            let zero = func
                .push(
                    region,
                    Instruction::new(Op::Constant { value: ConstantValue::Int(0) }, Default::default()),
                    &[idx_ty],
                )
                .1[0];
            let f32_ty = ctx.get_type(Type::Scalar(ScalarType::F32));
            let val = func
                .push(
                    region,
                    Instruction::new(Op::Constant { value: ConstantValue::Float(1.0) }, Default::default()),
                    &[f32_ty],
                )
                .1[0];
            let store_h = func
                .push(
                    region,
                    Instruction::new(
                        Op::Store {
                            val,
                            dst: sub,
                            indices: vec![zero],
                        },
                        Default::default(),
                    ),
                    &[],
                )
                .0;
            let load_h = func
                .push(
                    region,
                    Instruction::new(
                        Op::Load {
                            src: sub,
                            indices: vec![zero],
                        },
                        Default::default(),
                    ),
                    &[f32_ty],
                )
                .0;
            (store_h, load_h)
        });

        run_on_function(&mut func, &ctx, 64);

        // offset 1 element (4 bytes) isn't a multiple of 64, so alignment
        // collapses to the element size.
        assert_eq!(align_of(&func, &ctx, store_h), Some(4));
        assert_eq!(align_of(&func, &ctx, load_h), Some(4));
    }

    #[test]
    fn aligned_subview_keeps_full_alignment() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![64, 64], vec![1, 64], AddressSpace::Global).unwrap(),
        );
        let param = func.add_param(memref_ty);
        let dict = ctx.get_attr(
            Attr::dictionary(vec![NA {
                name: keys::ALIGNMENT.into(),
                value: Attr::Integer(64),
            }])
            .unwrap(),
        );
        func.param_attrs[0] = Some(dict);

        let small = ctx.get_type(Type::memref(ScalarType::F32, vec![64], vec![1], AddressSpace::Global).unwrap());
        let load_h = func.with_body(|func, region| {
            let sub = func
                .push(
                    region,
                    Instruction::new(
                        Op::Subview {
                            src: param,
                            offsets: vec![0, 0],
                            sizes: vec![64, 1],
                        },
                        Default::default(),
                    ),
                    &[small],
                )
                .1[0];
            let idx_ty = ctx.get_type(Type::Scalar(ScalarType::Index));
            let zero = func
                .push(
                    region,
                    Instruction::new(Op::Constant { value: ConstantValue::Int(0) }, Default::default()),
                    &[idx_ty],
                )
                .1[0];
            let f32_ty = ctx.get_type(Type::Scalar(ScalarType::F32));
            func.push(
                region,
                Instruction::new(
                    Op::Load {
                        src: sub,
                        indices: vec![zero],
                    },
                    Default::default(),
                ),
                &[f32_ty],
            )
            .0
        });

        run_on_function(&mut func, &ctx, 64);
        assert_eq!(align_of(&func, &ctx, load_h), Some(64));
    }
}
