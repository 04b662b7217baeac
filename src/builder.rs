//! Checked instruction constructors (§4.5, C5).
//!
//! Every method here validates operand types/shapes before handing the
//! instruction to [`Function::push`], synthesizing the result type(s) the
//! same way the source's per-instruction verifier does. Construction
//! never bypasses these checks: there is no raw "append arbitrary op"
//! entry point exposed outside this module.

use crate::context::CompilerContext;
use crate::error::{CompilationError, Location, Status};
use crate::ir::{
    ArithOp, ArithUnaryOp, CmpCond, ConstantValue, FenceFlags, Function, Instruction, Op, Region,
    StoreFlag, Transpose, Value,
};
use crate::arena::Handle;
use crate::ty::{is_dynamic, AddressSpace, MatrixUse, ScalarType, Type, DYNAMIC};

/// Borrows a context and the function under construction; every method
/// appends to a caller-supplied region (the function body or a child
/// region belonging to an instruction already pushed).
pub struct Builder<'a> {
    pub ctx: &'a CompilerContext,
    pub func: &'a mut Function,
}

fn ty_of(func: &Function, v: Handle<Value>) -> Handle<Type> {
    func.value(v).ty
}

impl<'a> Builder<'a> {
    pub fn new(ctx: &'a CompilerContext, func: &'a mut Function) -> Self {
        Builder { ctx, func }
    }

    fn push1(
        &mut self,
        region: &mut Region,
        op: Op,
        loc: Location,
        result_ty: Handle<Type>,
    ) -> Handle<Value> {
        let inst = Instruction::new(op, loc);
        let (_, results) = self.func.push(region, inst, &[result_ty]);
        results[0]
    }

    fn push0(&mut self, region: &mut Region, op: Op, loc: Location) {
        let inst = Instruction::new(op, loc);
        self.func.push(region, inst, &[]);
    }

    fn scalar_of(&self, v: Handle<Value>) -> Result<ScalarType, CompilationError> {
        let ty = self.ctx.resolve_type(ty_of(self.func, v));
        ty.as_scalar().ok_or_else(|| CompilationError::new(Status::IrExpectedScalar))
    }

    fn memref_of(
        &self,
        v: Handle<Value>,
    ) -> Result<(ScalarType, Vec<i64>, Vec<i64>, AddressSpace), CompilationError> {
        let ty = self.ctx.resolve_type(ty_of(self.func, v));
        ty.as_memref()
            .map(|(el, shape, stride, a)| (el, shape.to_vec(), stride.to_vec(), a))
            .ok_or_else(|| CompilationError::new(Status::IrExpectedMemref))
    }

    // ---- Arithmetic -------------------------------------------------

    pub fn arith(
        &mut self,
        region: &mut Region,
        op: ArithOp,
        a: Handle<Value>,
        b: Handle<Value>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let ta = ty_of(self.func, a);
        let tb = ty_of(self.func, b);
        if ta != tb {
            return Err(CompilationError::at(loc, Status::IrScalarMismatch));
        }
        Ok(self.push1(region, Op::Arith { op, a, b }, loc, ta))
    }

    pub fn arith_unary(
        &mut self,
        region: &mut Region,
        op: ArithUnaryOp,
        a: Handle<Value>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let ta = ty_of(self.func, a);
        Ok(self.push1(region, Op::ArithUnary { op, a }, loc, ta))
    }

    pub fn cmp(
        &mut self,
        region: &mut Region,
        cond: CmpCond,
        a: Handle<Value>,
        b: Handle<Value>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        if ty_of(self.func, a) != ty_of(self.func, b) {
            return Err(CompilationError::at(loc, Status::IrScalarMismatch));
        }
        let bool_ty = self.ctx.get_type(Type::Bool);
        Ok(self.push1(region, Op::Cmp { cond, a, b }, loc, bool_ty))
    }

    pub fn cast(
        &mut self,
        region: &mut Region,
        a: Handle<Value>,
        to_ty: Handle<Type>,
        loc: Location,
    ) -> Handle<Value> {
        self.push1(region, Op::Cast { a }, loc, to_ty)
    }

    pub fn constant(
        &mut self,
        region: &mut Region,
        value: ConstantValue,
        ty: Handle<Type>,
        loc: Location,
    ) -> Handle<Value> {
        self.push1(region, Op::Constant { value }, loc, ty)
    }

    // ---- Memref ops ---------------------------------------------------

    pub fn alloca(&mut self, region: &mut Region, ty: Handle<Type>, loc: Location) -> Handle<Value> {
        self.push1(region, Op::Alloca, loc, ty)
    }

    pub fn load(
        &mut self,
        region: &mut Region,
        src: Handle<Value>,
        indices: Vec<Handle<Value>>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let (element, shape, ..) = self.memref_of(src)?;
        if indices.len() != shape.len() && indices.len() != 1 {
            return Err(CompilationError::at(loc, Status::IrInvalidNumberOfIndices));
        }
        let result_ty = self.ctx.get_type(Type::Scalar(element));
        Ok(self.push1(region, Op::Load { src, indices }, loc, result_ty))
    }

    pub fn store(
        &mut self,
        region: &mut Region,
        val: Handle<Value>,
        dst: Handle<Value>,
        indices: Vec<Handle<Value>>,
        loc: Location,
    ) -> Result<(), CompilationError> {
        let (element, shape, ..) = self.memref_of(dst)?;
        if indices.len() != shape.len() && indices.len() != 1 {
            return Err(CompilationError::at(loc, Status::IrInvalidNumberOfIndices));
        }
        let val_ty = self.scalar_of(val)?;
        if val_ty != element {
            return Err(CompilationError::at(loc, Status::IrScalarMismatch));
        }
        self.push0(region, Op::Store { val, dst, indices }, loc);
        Ok(())
    }

    pub fn expand(
        &mut self,
        region: &mut Region,
        src: Handle<Value>,
        mode: i64,
        shape_vals: Vec<i64>,
        shape_value_handles: Vec<Handle<Value>>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let (element, mut shape, _stride, addrspace) = self.memref_of(src)?;
        if shape_vals.len() < 2 {
            return Err(CompilationError::at(loc, Status::IrExpandShapeOrderTooSmall));
        }
        let dyn_count = shape_vals.iter().filter(|s| is_dynamic(**s)).count();
        if dyn_count > 1 {
            return Err(CompilationError::at(loc, Status::IrMultipleDynamicModes));
        }
        let idx = mode as usize;
        if idx >= shape.len() {
            return Err(CompilationError::at(loc, Status::IrOutOfBounds));
        }
        if dyn_count == 0 && !is_dynamic(shape[idx]) {
            let product: i64 = shape_vals.iter().product();
            if product != shape[idx] {
                return Err(CompilationError::at(loc, Status::IrExpandShapeMismatch));
            }
        }
        shape.splice(idx..idx + 1, shape_vals);
        let result_ty = self.ctx.get_type(Type::memref(element, shape, vec![], addrspace)?);
        Ok(self.push1(
            region,
            Op::Expand {
                src,
                mode,
                shape: shape_value_handles,
            },
            loc,
            result_ty,
        ))
    }

    pub fn fuse(
        &mut self,
        region: &mut Region,
        src: Handle<Value>,
        from: i64,
        to: i64,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let (element, mut shape, _stride, addrspace) = self.memref_of(src)?;
        if from < 0 || to as usize >= shape.len() || from > to {
            return Err(CompilationError::at(loc, Status::IrOutOfBounds));
        }
        let (from, to) = (from as usize, to as usize);
        let fused: i64 = if shape[from..=to].iter().any(|s| is_dynamic(*s)) {
            DYNAMIC
        } else {
            shape[from..=to].iter().product()
        };
        shape.splice(from..=to, [fused]);
        let result_ty = self.ctx.get_type(Type::memref(element, shape, vec![], addrspace)?);
        Ok(self.push1(region, Op::Fuse { src, from: from as i64, to: to as i64 }, loc, result_ty))
    }

    pub fn subview(
        &mut self,
        region: &mut Region,
        src: Handle<Value>,
        offsets: Vec<i64>,
        sizes: Vec<i64>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let (element, shape, stride, addrspace) = self.memref_of(src)?;
        if offsets.len() != shape.len() || sizes.len() != shape.len() {
            return Err(CompilationError::at(loc, Status::IrInvalidNumberOfIndices));
        }
        for (&off, &sz) in offsets.iter().zip(sizes.iter()) {
            if is_dynamic(off) || off < 0 || (sz <= 0 && !is_dynamic(sz)) {
                return Err(CompilationError::at(loc, Status::IrInvalidSlice));
            }
        }
        let result_ty = self
            .ctx
            .get_type(Type::memref(element, sizes.clone(), stride, addrspace)?);
        Ok(self.push1(region, Op::Subview { src, offsets, sizes }, loc, result_ty))
    }

    pub fn size(
        &mut self,
        region: &mut Region,
        src: Handle<Value>,
        mode: i64,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let (_, shape, ..) = self.memref_of(src)?;
        if mode < 0 || mode as usize >= shape.len() {
            return Err(CompilationError::at(loc, Status::IrOutOfBounds));
        }
        let index_ty = self.ctx.get_type(Type::Scalar(ScalarType::Index));
        Ok(self.push1(region, Op::Size { src, mode }, loc, index_ty))
    }

    // ---- BLAS -----------------------------------------------------------

    fn check_rank2(&self, v: Handle<Value>, loc: Location) -> Result<(ScalarType, Vec<i64>), CompilationError> {
        let (element, shape, ..) = self.memref_of(v)?;
        if shape.len() != 2 {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        Ok((element, shape))
    }

    fn dims(shape: &[i64], trans: Transpose) -> (i64, i64) {
        match trans {
            Transpose::N => (shape[0], shape[1]),
            Transpose::T => (shape[1], shape[0]),
        }
    }

    fn dims_compatible(a: i64, b: i64) -> bool {
        is_dynamic(a) || is_dynamic(b) || a == b
    }

    pub fn gemm(
        &mut self,
        region: &mut Region,
        trans_a: Transpose,
        trans_b: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        b: Handle<Value>,
        beta: Handle<Value>,
        c: Handle<Value>,
        atomic: bool,
        loc: Location,
    ) -> Result<(), CompilationError> {
        let (_, a_shape) = self.check_rank2(a, loc)?;
        let (_, b_shape) = self.check_rank2(b, loc)?;
        let (_, c_shape) = self.check_rank2(c, loc)?;
        let (m_a, k_a) = Self::dims(&a_shape, trans_a);
        let (k_b, n_b) = Self::dims(&b_shape, trans_b);
        if !Self::dims_compatible(k_a, k_b)
            || !Self::dims_compatible(m_a, c_shape[0])
            || !Self::dims_compatible(n_b, c_shape[1])
        {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        self.push0(
            region,
            Op::Gemm {
                trans_a,
                trans_b,
                alpha,
                a,
                b,
                beta,
                c,
                atomic,
            },
            loc,
        );
        Ok(())
    }

    pub fn gemv(
        &mut self,
        region: &mut Region,
        trans_a: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        x: Handle<Value>,
        beta: Handle<Value>,
        y: Handle<Value>,
        atomic: bool,
        loc: Location,
    ) -> Result<(), CompilationError> {
        let (_, a_shape) = self.check_rank2(a, loc)?;
        let (m, k) = Self::dims(&a_shape, trans_a);
        let (_, x_shape, ..) = self.memref_of(x)?;
        let (_, y_shape, ..) = self.memref_of(y)?;
        if x_shape.len() != 1 || y_shape.len() != 1 {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        if !Self::dims_compatible(k, x_shape[0]) || !Self::dims_compatible(m, y_shape[0]) {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        self.push0(
            region,
            Op::Gemv {
                trans_a,
                alpha,
                a,
                x,
                beta,
                y,
                atomic,
            },
            loc,
        );
        Ok(())
    }

    pub fn ger(
        &mut self,
        region: &mut Region,
        alpha: Handle<Value>,
        x: Handle<Value>,
        y: Handle<Value>,
        beta: Handle<Value>,
        c: Handle<Value>,
        atomic: bool,
        loc: Location,
    ) -> Result<(), CompilationError> {
        let (_, x_shape, ..) = self.memref_of(x)?;
        let (_, y_shape, ..) = self.memref_of(y)?;
        let (_, c_shape) = self.check_rank2(c, loc)?;
        if x_shape.len() != 1
            || y_shape.len() != 1
            || !Self::dims_compatible(x_shape[0], c_shape[0])
            || !Self::dims_compatible(y_shape[0], c_shape[1])
        {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        self.push0(
            region,
            Op::Ger {
                alpha,
                x,
                y,
                beta,
                c,
                atomic,
            },
            loc,
        );
        Ok(())
    }

    pub fn hadamard(
        &mut self,
        region: &mut Region,
        alpha: Handle<Value>,
        a: Handle<Value>,
        b: Handle<Value>,
        beta: Handle<Value>,
        c: Handle<Value>,
        atomic: bool,
        loc: Location,
    ) -> Result<(), CompilationError> {
        let (_, a_shape, ..) = self.memref_of(a)?;
        let (_, b_shape, ..) = self.memref_of(b)?;
        let (_, c_shape, ..) = self.memref_of(c)?;
        if a_shape.len() != b_shape.len() || a_shape.len() != c_shape.len() {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        self.push0(
            region,
            Op::Hadamard {
                alpha,
                a,
                b,
                beta,
                c,
                atomic,
            },
            loc,
        );
        Ok(())
    }

    pub fn axpby(
        &mut self,
        region: &mut Region,
        trans_a: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        beta: Handle<Value>,
        b: Handle<Value>,
        atomic: bool,
        loc: Location,
    ) -> Result<(), CompilationError> {
        let (_, a_shape, ..) = self.memref_of(a)?;
        let (_, b_shape, ..) = self.memref_of(b)?;
        let a_dims = if a_shape.len() == 2 {
            Self::dims(&a_shape, trans_a)
        } else if a_shape.len() == 1 {
            (a_shape[0], a_shape[0])
        } else {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        };
        if b_shape.len() != a_shape.len() {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        let b_first = b_shape[0];
        if !Self::dims_compatible(a_dims.0, b_first) {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        self.push0(
            region,
            Op::Axpby {
                trans_a,
                alpha,
                a,
                beta,
                b,
                atomic,
            },
            loc,
        );
        Ok(())
    }

    pub fn sum(
        &mut self,
        region: &mut Region,
        trans_a: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        beta: Handle<Value>,
        b: Handle<Value>,
        atomic: bool,
        loc: Location,
    ) -> Result<(), CompilationError> {
        self.memref_of(a)?;
        self.memref_of(b)?;
        self.push0(
            region,
            Op::Sum {
                trans_a,
                alpha,
                a,
                beta,
                b,
                atomic,
            },
            loc,
        );
        Ok(())
    }

    // ---- Cooperative matrix --------------------------------------------

    pub fn coopmatrix_load(
        &mut self,
        region: &mut Region,
        src: Handle<Value>,
        pos0: Handle<Value>,
        pos1: Handle<Value>,
        transpose: Transpose,
        result_ty: Handle<Type>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        self.memref_of(src)?;
        let resolved = self.ctx.resolve_type(result_ty);
        if resolved.as_coopmatrix().is_none() {
            return Err(CompilationError::at(loc, Status::IrExpectedVectorOrMatrix));
        }
        Ok(self.push1(
            region,
            Op::CoopMatrixLoad {
                src,
                pos0,
                pos1,
                transpose,
            },
            loc,
            result_ty,
        ))
    }

    pub fn coopmatrix_store(
        &mut self,
        region: &mut Region,
        flag: StoreFlag,
        val: Handle<Value>,
        dst: Handle<Value>,
        pos0: Handle<Value>,
        pos1: Handle<Value>,
        loc: Location,
    ) -> Result<(), CompilationError> {
        let val_ty = self.ctx.resolve_type(ty_of(self.func, val));
        let (_, _, _, use_) = val_ty
            .as_coopmatrix()
            .ok_or_else(|| CompilationError::at(loc, Status::IrExpectedVectorOrMatrix))?;
        if use_ != MatrixUse::Acc {
            return Err(CompilationError::at(loc, Status::IrExpectedVectorOrMatrix));
        }
        self.memref_of(dst)?;
        self.push0(
            region,
            Op::CoopMatrixStore {
                flag,
                val,
                dst,
                pos0,
                pos1,
            },
            loc,
        );
        Ok(())
    }

    pub fn coopmatrix_mul_add(
        &mut self,
        region: &mut Region,
        a: Handle<Value>,
        b: Handle<Value>,
        c: Handle<Value>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        let at = self
            .ctx
            .resolve_type(ty_of(self.func, a))
            .as_coopmatrix()
            .ok_or_else(|| CompilationError::at(loc, Status::IrExpectedVectorOrMatrix))?;
        let bt = self
            .ctx
            .resolve_type(ty_of(self.func, b))
            .as_coopmatrix()
            .ok_or_else(|| CompilationError::at(loc, Status::IrExpectedVectorOrMatrix))?;
        let ct = self
            .ctx
            .resolve_type(ty_of(self.func, c))
            .as_coopmatrix()
            .ok_or_else(|| CompilationError::at(loc, Status::IrExpectedVectorOrMatrix))?;
        if at.3 != MatrixUse::A || bt.3 != MatrixUse::B || ct.3 != MatrixUse::Acc {
            return Err(CompilationError::at(loc, Status::IrExpectedVectorOrMatrix));
        }
        if at.1 != ct.1 || bt.2 != ct.2 || at.2 != bt.1 {
            return Err(CompilationError::at(loc, Status::IrIncompatibleShapes));
        }
        let result_ty = ty_of(self.func, c);
        Ok(self.push1(region, Op::CoopMatrixMulAdd { a, b, c }, loc, result_ty))
    }

    pub fn coopmatrix_scale(
        &mut self,
        region: &mut Region,
        alpha: Handle<Value>,
        b: Handle<Value>,
        loc: Location,
    ) -> Result<Handle<Value>, CompilationError> {
        self.scalar_of(alpha)?;
        let ty = ty_of(self.func, b);
        Ok(self.push1(region, Op::CoopMatrixScale { alpha, b }, loc, ty))
    }

    // ---- Control flow ----------------------------------------------------

    pub fn yield_(&mut self, region: &mut Region, vals: Vec<Handle<Value>>, loc: Location) {
        self.push0(region, Op::Yield { vals }, loc);
    }

    pub fn parallel(&mut self, region: &mut Region, body: Region, loc: Location) {
        self.push0(region, Op::Parallel { body }, loc);
    }

    pub fn barrier(&mut self, region: &mut Region, fence: FenceFlags, loc: Location) {
        self.push0(region, Op::Barrier { fence }, loc);
    }

    pub fn lifetime_stop(&mut self, region: &mut Region, obj: Handle<Value>, loc: Location) {
        self.push0(region, Op::LifetimeStop { obj }, loc);
    }

    pub fn group_id(&mut self, region: &mut Region, loc: Location) -> Handle<Value> {
        let ty = self.ctx.get_type(Type::Scalar(ScalarType::Index));
        self.push1(region, Op::GroupId, loc, ty)
    }

    pub fn subgroup_local_id(&mut self, region: &mut Region, loc: Location) -> Handle<Value> {
        let ty = self.ctx.get_type(Type::Scalar(ScalarType::Index));
        self.push1(region, Op::SubgroupLocalId, loc, ty)
    }

    pub fn subgroup_broadcast(
        &mut self,
        region: &mut Region,
        a: Handle<Value>,
        lane: Handle<Value>,
        loc: Location,
    ) -> Handle<Value> {
        let ty = ty_of(self.func, a);
        self.push1(region, Op::SubgroupBroadcast { a, lane }, loc, ty)
    }
}
