//! Matrix-extension eligibility analysis (§4.6): which `coopmatrix`-typed
//! values can stay on the hardware matrix-extension path versus needing
//! the subgroup-shuffle ("DIY") fallback `spv::codegen` emits instead.
//!
//! An optimistic worklist: every `coopmatrix` value whose shape/precision
//! the target offers is seeded as eligible, then a fixpoint kill pass
//! walks constraints backward and forward until nothing more is ruled
//! out (ported from `matrix_ext_helper`'s `kill`-and-requeue loop).

use crate::analysis::memref::{self, MemrefAnalysisResult};
use crate::arena::Handle;
use crate::context::CompilerContext;
use crate::core_info::CoreInfo;
use crate::ir::{Function, Instruction, Op, Region, StoreFlag, Transpose, Value};
use crate::ty::MatrixUse;
use crate::{FastHashMap, FastHashSet};

use std::collections::VecDeque;

pub struct MatrixExtAnalysisResult {
    mext: FastHashSet<Handle<Value>>,
}

impl MatrixExtAnalysisResult {
    pub fn get(&self, v: Handle<Value>) -> bool {
        self.mext.contains(&v)
    }
}

pub fn run_on_function(func: &Function, ctx: &CompilerContext, info: &CoreInfo) -> MatrixExtAnalysisResult {
    let Some(matrix_ext) = info.matrix_ext.as_ref() else {
        return MatrixExtAnalysisResult { mext: FastHashSet::default() };
    };
    let memrefs = memref::run_on_function(func, ctx, info.default_alignment);

    let mut mext: FastHashSet<Handle<Value>> = FastHashSet::default();
    let mut q: VecDeque<Handle<Instruction>> = VecDeque::new();
    let mut yield_owner: FastHashMap<Handle<Instruction>, Handle<Instruction>> = FastHashMap::default();

    seed(&func.body, func, ctx, matrix_ext, &mut mext, &mut q, &mut yield_owner, None);

    while let Some(handle) = q.pop_front() {
        visit(handle, func, ctx, matrix_ext, &memrefs, &mut mext, &mut q, &yield_owner);
    }

    MatrixExtAnalysisResult { mext }
}

fn add_if_coopmatrix(
    v: Handle<Value>,
    func: &Function,
    ctx: &CompilerContext,
    matrix_ext: &crate::core_info::MatrixExtInfo,
    mext: &mut FastHashSet<Handle<Value>>,
) -> bool {
    let ty = ctx.resolve_type(func.value(v).ty);
    if let Some((sty, rows, cols, use_)) = ty.as_coopmatrix() {
        if matrix_ext.have_type(sty, rows, cols, use_) {
            mext.insert(v);
            return true;
        }
    }
    false
}

#[allow(clippy::too_many_arguments)]
fn seed(
    region: &Region,
    func: &Function,
    ctx: &CompilerContext,
    matrix_ext: &crate::core_info::MatrixExtInfo,
    mext: &mut FastHashSet<Handle<Value>>,
    q: &mut VecDeque<Handle<Instruction>>,
    yield_owner: &mut FastHashMap<Handle<Instruction>, Handle<Instruction>>,
    owner: Option<Handle<Instruction>>,
) {
    for &handle in &region.insts {
        let inst = func.inst(handle);
        let mut has_one = false;
        for &r in &inst.results {
            has_one |= add_if_coopmatrix(r, func, ctx, matrix_ext, mext);
        }
        for child in inst.child_regions() {
            for &p in &child.params {
                has_one |= add_if_coopmatrix(p, func, ctx, matrix_ext, mext);
            }
        }
        if matches!(inst.op, Op::Yield { .. }) {
            if let Some(owner) = owner {
                yield_owner.insert(handle, owner);
            }
        }
        if has_one {
            q.push_back(handle);
        }

        for child in inst.child_regions() {
            seed(child, func, ctx, matrix_ext, mext, q, yield_owner, Some(handle));
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            seed(then_r, func, ctx, matrix_ext, mext, q, yield_owner, Some(handle));
            if let Some(else_r) = else_r {
                seed(else_r, func, ctx, matrix_ext, mext, q, yield_owner, Some(handle));
            }
        }
    }
}

/// Drops `v` from `mext` (if present) and requeues its defining
/// instruction plus every using instruction — redirecting a use that's a
/// `yield` to the region's owning `for`/`if` instead, since `yield`
/// itself carries no eligibility rule.
fn kill(
    v: Handle<Value>,
    func: &Function,
    mext: &mut FastHashSet<Handle<Value>>,
    q: &mut VecDeque<Handle<Instruction>>,
    yield_owner: &FastHashMap<Handle<Instruction>, Handle<Instruction>>,
) {
    if !mext.remove(&v) {
        return;
    }
    if let crate::ir::ValueDef::InstResult { inst, .. } = func.value(v).def {
        q.push_back(inst);
    }
    for u in func.value(v).uses() {
        match yield_owner.get(&u.inst) {
            Some(&owner) => q.push_back(owner),
            None => q.push_back(u.inst),
        }
    }
}

fn check_2d_block_io(
    operand: Handle<Value>,
    func: &Function,
    ctx: &CompilerContext,
    matrix_ext: &crate::core_info::MatrixExtInfo,
    memrefs: &MemrefAnalysisResult,
) -> bool {
    let ty = ctx.resolve_type(func.value(operand).ty);
    let Some((element, _shape, stride, addrspace)) = ty.as_memref() else {
        return false;
    };
    let Some(info) = memrefs.get_if(operand) else {
        return false;
    };
    let block_io = &matrix_ext.block_io;
    let element_size = i64::from(element.size_in_bytes());

    let base_ok = info.alignment >= block_io.base_address_alignment;
    let row_major = stride.first().copied() == Some(1);
    let row_bytes = stride.get(1).copied().unwrap_or(0) * element_size;
    let stride_ok = row_major
        && row_bytes >= i64::from(block_io.min_stride)
        && row_bytes <= i64::from(block_io.max_stride)
        && row_bytes % i64::from(block_io.stride_alignment) == 0;
    let addrspace_ok = matches!(addrspace, crate::ty::AddressSpace::Global);

    base_ok && stride_ok && addrspace_ok
}

#[allow(clippy::too_many_arguments)]
fn visit(
    handle: Handle<Instruction>,
    func: &Function,
    ctx: &CompilerContext,
    matrix_ext: &crate::core_info::MatrixExtInfo,
    memrefs: &MemrefAnalysisResult,
    mext: &mut FastHashSet<Handle<Value>>,
    q: &mut VecDeque<Handle<Instruction>>,
    yield_owner: &FastHashMap<Handle<Instruction>, Handle<Instruction>>,
) {
    let inst = func.inst(handle);
    let result = inst.results.first().copied();
    let killv = |v: Handle<Value>, mext: &mut FastHashSet<Handle<Value>>, q: &mut VecDeque<Handle<Instruction>>| {
        kill(v, func, mext, q, yield_owner)
    };

    match inst.op.clone() {
        Op::Arith { a, b, .. } => {
            killv(a, mext, q);
            killv(b, mext, q);
            if let Some(r) = result {
                killv(r, mext, q);
            }
        }
        Op::ArithUnary { a, .. } => {
            killv(a, mext, q);
            if let Some(r) = result {
                killv(r, mext, q);
            }
        }
        Op::Cast { a } => {
            killv(a, mext, q);
            if let Some(r) = result {
                killv(r, mext, q);
            }
        }
        Op::CoopMatrixLoad { src, transpose, .. } => {
            let ok = transpose == Transpose::N && check_2d_block_io(src, func, ctx, matrix_ext, memrefs);
            if !ok {
                if let Some(r) = result {
                    killv(r, mext, q);
                }
            }
        }
        Op::CoopMatrixStore { flag, val, dst, .. } => {
            let val_ty = ctx.resolve_type(func.value(val).ty);
            let use_ok = val_ty.as_coopmatrix().map(|(_, _, _, u)| u == MatrixUse::Acc).unwrap_or(false);
            let ok = flag == StoreFlag::Regular && use_ok && check_2d_block_io(dst, func, ctx, matrix_ext, memrefs);
            if !ok {
                killv(val, mext, q);
            }
        }
        Op::CoopMatrixMulAdd { a, b, c } => {
            let at = ctx.resolve_type(func.value(a).ty).as_coopmatrix();
            let bt = ctx.resolve_type(func.value(b).ty).as_coopmatrix();
            let ct = ctx.resolve_type(func.value(c).ty).as_coopmatrix();
            let rt = result.map(|r| ctx.resolve_type(func.value(r).ty)).and_then(|t| t.as_coopmatrix());
            let have_gemm = match (at, bt, ct, rt) {
                (Some(at), Some(bt), Some(ct), Some(rt)) => {
                    mext.contains(&a)
                        && mext.contains(&b)
                        && mext.contains(&c)
                        && result.map(|r| mext.contains(&r)).unwrap_or(false)
                        && matrix_ext.have_gemm(at.0, bt.0, ct.0, rt.0, rt.1, rt.2, at.2)
                }
                _ => false,
            };
            if !have_gemm {
                killv(a, mext, q);
                killv(b, mext, q);
                killv(c, mext, q);
                if let Some(r) = result {
                    killv(r, mext, q);
                }
            }
        }
        Op::CoopMatrixScale { b, .. } => {
            // No matrix-extension intrinsic multiplies a coopmatrix by a
            // scalar in place; always falls back to the DIY path.
            killv(b, mext, q);
            if let Some(r) = result {
                killv(r, mext, q);
            }
        }
        Op::For { body, init_values, .. } => {
            if let Some(yield_vals) = last_yield(&body, func) {
                for (i, &res) in inst.results.iter().enumerate() {
                    let ty = ctx.resolve_type(func.value(res).ty);
                    if ty.as_coopmatrix().is_none() {
                        continue;
                    }
                    let iter_arg = body.params.get(1 + i).copied();
                    let init = init_values.get(i).copied();
                    let yielded = yield_vals.get(i).copied();
                    let all_have = iter_arg.map(|v| mext.contains(&v)).unwrap_or(false)
                        && init.map(|v| mext.contains(&v)).unwrap_or(false)
                        && yielded.map(|v| mext.contains(&v)).unwrap_or(false)
                        && mext.contains(&res);
                    if !all_have {
                        killv(res, mext, q);
                        if let Some(v) = iter_arg {
                            killv(v, mext, q);
                        }
                        if let Some(v) = init {
                            killv(v, mext, q);
                        }
                        if let Some(v) = yielded {
                            killv(v, mext, q);
                        }
                    }
                }
            }
        }
        Op::If { then_region, else_region, .. } => {
            if let (Some(then_vals), Some(else_r)) = (last_yield(&then_region, func), else_region.as_ref()) {
                if let Some(else_vals) = last_yield(else_r, func) {
                    for (i, &res) in inst.results.iter().enumerate() {
                        let ty = ctx.resolve_type(func.value(res).ty);
                        if ty.as_coopmatrix().is_none() {
                            continue;
                        }
                        let tv = then_vals.get(i).copied();
                        let ev = else_vals.get(i).copied();
                        let all_have = mext.contains(&res)
                            && tv.map(|v| mext.contains(&v)).unwrap_or(false)
                            && ev.map(|v| mext.contains(&v)).unwrap_or(false);
                        if !all_have {
                            killv(res, mext, q);
                            if let Some(v) = tv {
                                killv(v, mext, q);
                            }
                            if let Some(v) = ev {
                                killv(v, mext, q);
                            }
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn last_yield(region: &Region, func: &Function) -> Option<Vec<Handle<Value>>> {
    let last = *region.insts.last()?;
    match &func.inst(last).op {
        Op::Yield { vals } => Some(vals.clone()),
        _ => None,
    }
}
