//! Stack high-water mark (§4.6): total bytes needed for a function's
//! `alloca`s, read back from the offsets `set-stack-ptr` assigns.

use crate::context::CompilerContext;
use crate::ir::{Function, Op, Region};

/// Highest `stop` byte over every `alloca` reachable from `func`'s body,
/// i.e. the frame size `set-stack-ptr` (§4.7 step 3) settled on.
/// Requires that pass to have already run; returns `0` for a function
/// with no `alloca`.
pub fn high_water_mark(func: &Function, ctx: &CompilerContext) -> i64 {
    let mut mark = 0;
    walk_region(&func.body, func, ctx, &mut mark);
    mark
}

fn walk_region(region: &Region, func: &Function, ctx: &CompilerContext, mark: &mut i64) {
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
                    *mark = (*mark).max(stack_ptr + size);
                }
            }
        }
        for child in inst.child_regions() {
            walk_region(child, func, ctx, mark);
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            walk_region(then_r, func, ctx, mark);
            if let Some(else_r) = else_r {
                walk_region(else_r, func, ctx, mark);
            }
        }
    }
}
