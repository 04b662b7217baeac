//! Alias analysis (§4.6): traces `expand`/`fuse`/`subview` operand chains
//! back to a root `alloca`/parameter and reports whether two memref
//! values may overlap in storage.

use crate::arena::Handle;
use crate::ir::{Function, Op};
use crate::FastHashMap;
use crate::ir::Value;

#[derive(Debug, Clone, Copy)]
struct Allocation {
    start: i64,
    stop: i64,
}

/// Result of [`run_on_function`]: root-tracing table plus the byte ranges
/// assigned to `alloca`s (populated once `set-stack-ptr` has run).
#[derive(Debug, Default)]
pub struct AliasResults {
    alias: FastHashMap<Handle<Value>, Handle<Value>>,
    allocs: FastHashMap<Handle<Value>, Allocation>,
}

impl AliasResults {
    /// Follows the `alias` chain to the ultimate root value (an `alloca`
    /// result or a function/region parameter).
    pub fn root(&self, v: Handle<Value>) -> Handle<Value> {
        let mut cur = v;
        while let Some(&next) = self.alias.get(&cur) {
            cur = next;
        }
        cur
    }

    /// `true` iff `a` and `b` may refer to overlapping storage: their
    /// roots coincide, or both are `alloca`s with overlapping byte
    /// ranges (§4.6, §8 property 6 consumes this).
    pub fn alias(&self, a: Handle<Value>, b: Handle<Value>) -> bool {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra == rb {
            return true;
        }
        match (self.allocs.get(&ra), self.allocs.get(&rb)) {
            (Some(x), Some(y)) => x.start < y.stop && y.start < x.stop,
            _ => false,
        }
    }
}

pub fn run_on_function(func: &Function) -> AliasResults {
    let mut result = AliasResults::default();
    walk_region(&func.body, func, &mut result);
    result
}

/// [`run_on_function`] plus the `alloca` byte ranges, read back from the
/// `stack_ptr` attribute `set-stack-ptr` (§4.7 step 3) stamps onto each
/// `alloca`. Requires that pass to have already run.
pub fn run_on_function_with_allocations(
    func: &Function,
    ctx: &crate::context::CompilerContext,
) -> AliasResults {
    let mut result = run_on_function(func);
    collect_allocations(&func.body, func, ctx, &mut result);
    result
}

fn collect_allocations(
    region: &crate::ir::Region,
    func: &Function,
    ctx: &crate::context::CompilerContext,
    result: &mut AliasResults,
) {
    for &handle in &region.insts {
        let inst = func.inst(handle);
        if matches!(inst.op, Op::Alloca) {
            if let (Some(&r), Some(stack_ptr)) = (
                inst.results.first(),
                inst.attrs
                    .map(|h| ctx.resolve_attr(h))
                    .and_then(|a| a.find(crate::attribute::keys::STACK_PTR).and_then(|v| v.as_integer())),
            ) {
                let ty = ctx.resolve_type(func.value(r).ty);
                if let Some(size) = ty.size_in_bytes() {
                    result.record_allocation(r, stack_ptr, size);
                }
            }
        }
        for child in inst.child_regions() {
            collect_allocations(child, func, ctx, result);
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            collect_allocations(then_r, func, ctx, result);
            if let Some(else_r) = else_r {
                collect_allocations(else_r, func, ctx, result);
            }
        }
    }
}

fn walk_region(region: &crate::ir::Region, func: &Function, result: &mut AliasResults) {
    for &handle in &region.insts {
        let inst = func.inst(handle);
        match &inst.op {
            Op::Expand { src, .. } | Op::Fuse { src, .. } | Op::Subview { src, .. } => {
                if let Some(&r) = inst.results.first() {
                    let root = result.root(*src);
                    result.alias.insert(r, root);
                }
            }
            _ => {}
        }
        for child in inst.child_regions() {
            walk_region(child, func, result);
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            walk_region(then_r, func, result);
            if let Some(else_r) = else_r {
                walk_region(else_r, func, result);
            }
        }
    }
}

impl AliasResults {
    /// Records the `[stack_ptr, stack_ptr + size_in_bytes)` range for an
    /// `alloca` result; called by `set-stack-ptr` (§4.7 step 3) as it
    /// assigns offsets, since the byte size requires resolving the
    /// result's type through a [`crate::context::CompilerContext`] that
    /// this module's pure IR walk doesn't have access to.
    pub fn record_allocation(&mut self, result: Handle<Value>, stack_ptr: i64, size_in_bytes: i64) {
        self.allocs.insert(
            result,
            Allocation {
                start: stack_ptr,
                stop: stack_ptr + size_in_bytes,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;
    use crate::ir::Instruction;
    use crate::ty::{AddressSpace, ScalarType, Type};

    #[test]
    fn subview_of_alloca_aliases_the_alloca() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let memref_ty = ctx.get_type(
            Type::memref(ScalarType::F32, vec![64], vec![1], AddressSpace::Local).unwrap(),
        );
        let (alloca, subview) = func.with_body(|func, region| {
            let (_, alloca) = func.push(region, Instruction::new(Op::Alloca, Default::default()), &[memref_ty]);
            let (_, subview) = func.push(
                region,
                Instruction::new(
                    Op::Subview {
                        src: alloca[0],
                        offsets: vec![0],
                        sizes: vec![32],
                    },
                    Default::default(),
                ),
                &[memref_ty],
            );
            (alloca[0], subview[0])
        });
        let result = run_on_function(&func);
        assert!(result.alias(alloca, subview));
        assert_eq!(result.root(subview), alloca);
    }

    #[test]
    fn disjoint_allocations_do_not_alias() {
        let mut result = AliasResults::default();
        let mut func = Function::new("f");
        let ctx = CompilerContext::new();
        let memref_ty = ctx.get_type(Type::Scalar(ScalarType::F32));
        let a = func.add_param(memref_ty);
        let b = func.add_param(memref_ty);
        result.record_allocation(a, 0, 16);
        result.record_allocation(b, 16, 16);
        assert!(!result.alias(a, b));
    }
}
