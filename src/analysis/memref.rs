//! Memref-info analysis (§4.6): per-value `(alignment, element_size,
//! shape_gcd, stride_gcd)`, seeded from parameter attribute dictionaries
//! and refined for `alloca` results once `set-stack-ptr` has run.

use crate::attribute::{keys, Attribute};
use crate::context::CompilerContext;
use crate::ir::{Function, Op};
use crate::FastHashMap;
use crate::arena::Handle;
use crate::ir::Value;
use crate::ty::{is_dynamic, Type};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemrefInfo {
    pub alignment: i32,
    pub element_size: i32,
    pub shape_gcd: Vec<i64>,
    pub stride_gcd: Vec<i64>,
}

impl MemrefInfo {
    pub fn new(alignment: i32, element_size: i32, shape_gcd: Vec<i64>, stride_gcd: Vec<i64>) -> Self {
        MemrefInfo {
            alignment,
            element_size,
            shape_gcd,
            stride_gcd,
        }
    }

    /// Largest power-of-two divisor of `self.alignment`, no smaller than
    /// `self.element_size`, consistent with `offset_gcds` against
    /// `self.stride_gcd` (ported from `memref_info::compute_max_alignment`).
    pub fn compute_max_alignment(&self, offset_gcds: &[i64]) -> i32 {
        let mut alignment = self.alignment;
        while alignment > self.element_size {
            if is_aligned(offset_gcds, &self.stride_gcd, alignment / self.element_size) {
                return alignment;
            }
            alignment /= 2;
        }
        self.element_size
    }
}

fn is_aligned(offset_gcds: &[i64], stride_gcds: &[i64], alignment: i32) -> bool {
    offset_gcds
        .iter()
        .zip(stride_gcds.iter())
        .all(|(&o, &s)| (o * s) % i64::from(alignment) == 0)
}

#[derive(Debug, Default)]
pub struct MemrefAnalysisResult {
    info: FastHashMap<Handle<Value>, MemrefInfo>,
}

impl MemrefAnalysisResult {
    pub fn get_if(&self, v: Handle<Value>) -> Option<&MemrefInfo> {
        self.info.get(&v)
    }

    fn set(&mut self, v: Handle<Value>, info: MemrefInfo) {
        self.info.insert(v, info);
    }
}

fn seed_from_param_attrs(
    func: &Function,
    ctx: &CompilerContext,
    default_alignment: i32,
    result: &mut MemrefAnalysisResult,
) {
    for (i, &param) in func.body.params.iter().enumerate() {
        let ty = ctx.resolve_type(func.value(param).ty);
        let mr = match &ty {
            Type::Memref { .. } => Some(ty.clone()),
            Type::Group { inner, .. } => Some((**inner).clone()),
            _ => None,
        };
        let Some(Type::Memref { element, shape, stride, .. }) = mr else {
            continue;
        };
        let dict = func.param_attr(i).map(|h| ctx.resolve_attr(h));

        let alignment = dict
            .as_ref()
            .and_then(|d| d.find(keys::ALIGNMENT))
            .and_then(Attribute::as_integer)
            .map(|v| v as i32)
            .unwrap_or(default_alignment);

        let mut shape_gcd = dict
            .as_ref()
            .and_then(|d| d.find(keys::SHAPE_GCD))
            .and_then(Attribute::as_integer_array)
            .unwrap_or_default();
        shape_gcd.resize(shape.len(), 0);
        for (g, &s) in shape_gcd.iter_mut().zip(shape.iter()) {
            if *g == 0 {
                *g = if !is_dynamic(s) { s } else { 1 };
            }
        }

        let mut stride_gcd = dict
            .as_ref()
            .and_then(|d| d.find(keys::STRIDE_GCD))
            .and_then(Attribute::as_integer_array)
            .unwrap_or_default();
        stride_gcd.resize(stride.len(), 0);
        for (g, &s) in stride_gcd.iter_mut().zip(stride.iter()) {
            if *g == 0 {
                *g = if !is_dynamic(s) { s } else { 1 };
            }
        }

        result.set(
            param,
            MemrefInfo::new(alignment, element.size_in_bytes(), shape_gcd, stride_gcd),
        );
    }
}

fn visit_alloca(
    func: &Function,
    ctx: &CompilerContext,
    result_value: Handle<Value>,
    attrs: Option<Handle<Attribute>>,
    default_alignment: i32,
    result: &mut MemrefAnalysisResult,
) {
    let Some(stack_ptr) = attrs
        .map(|h| ctx.resolve_attr(h))
        .and_then(|a| a.find(keys::STACK_PTR).and_then(|v| v.as_integer()))
    else {
        return;
    };
    if stack_ptr < 0 {
        return;
    }
    let ty = ctx.resolve_type(func.value(result_value).ty);
    let Type::Memref { element, shape, stride, .. } = &ty else {
        return;
    };
    let mut alignment = element.size_in_bytes();
    while alignment < default_alignment {
        let doubled = alignment * 2;
        if stack_ptr % i64::from(doubled) != 0 {
            break;
        }
        alignment = doubled;
    }
    result.set(
        result_value,
        MemrefInfo::new(alignment, element.size_in_bytes(), shape.clone(), stride.clone()),
    );
}

/// Runs the analysis over `func`'s body (pre-order walk, same traversal
/// as `gcd`). `default_alignment` comes from `CoreInfo::default_alignment`
/// (§4.11).
pub fn run_on_function(func: &Function, ctx: &CompilerContext, default_alignment: i32) -> MemrefAnalysisResult {
    let mut result = MemrefAnalysisResult::default();
    seed_from_param_attrs(func, ctx, default_alignment, &mut result);
    walk_region(&func.body, func, ctx, default_alignment, &mut result);
    result
}

fn walk_region(
    region: &crate::ir::Region,
    func: &Function,
    ctx: &CompilerContext,
    default_alignment: i32,
    result: &mut MemrefAnalysisResult,
) {
    for &handle in &region.insts {
        let inst = func.inst(handle);
        if let Op::Alloca = &inst.op {
            if let Some(&r) = inst.results.first() {
                visit_alloca(func, ctx, r, inst.attrs, default_alignment, result);
            }
        }
        for child in inst.child_regions() {
            walk_region(child, func, ctx, default_alignment, result);
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            walk_region(then_r, func, ctx, default_alignment, result);
            if let Some(else_r) = else_r {
                walk_region(else_r, func, ctx, default_alignment, result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{AddressSpace, ScalarType};

    #[test]
    fn compute_max_alignment_never_drops_below_element_size() {
        let info = MemrefInfo::new(64, 4, vec![1, 1], vec![1, 64]);
        assert_eq!(info.compute_max_alignment(&[0, 0]), 64);
        assert_eq!(info.compute_max_alignment(&[1, 1]), 4);
    }

    #[test]
    fn alloca_alignment_doubles_while_stack_ptr_congruent() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![64], vec![1], AddressSpace::Local).unwrap(),
        );
        let dict = ctx.get_attr(
            Attribute::dictionary(vec![crate::attribute::NamedAttr {
                name: keys::STACK_PTR.into(),
                value: Attribute::Integer(64),
            }])
            .unwrap(),
        );
        let result_value = func.with_body(|func, region| {
            let mut inst = crate::ir::Instruction::new(Op::Alloca, Default::default());
            inst.attrs = Some(dict);
            func.push(region, inst, &[memref_ty]).1[0]
        });
        let result = run_on_function(&func, &ctx, 64);
        let info = result.get_if(result_value).unwrap();
        assert_eq!(info.alignment, 64);
    }
}
