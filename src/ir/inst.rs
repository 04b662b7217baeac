//! Instructions: the opcode set from §3.4 and their execution-kind
//! classification consulted by `check-ir` (§4.7 step 1, property 3 in §8).

use crate::arena::Handle;
use crate::attribute::Attribute;
use crate::error::Location;
use crate::ir::region::Region;
use crate::ir::value::Value;
use crate::ty::ScalarType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithUnaryOp {
    Neg,
    Not,
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpCond {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    N,
    T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFlag {
    Regular,
    AtomicAdd,
}

bitflags::bitflags! {
    /// Memory fences a `barrier` instruction waits on (§3.4, §4.8).
    pub struct FenceFlags: u32 {
        const GLOBAL = 0b01;
        const LOCAL  = 0b10;
    }
}

/// A literal constant payload; type comes from the result value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Execution context an instruction requires of its parent region
/// (§3.4, §4.7 step 1, §8 property 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstKind {
    Mixed,
    Collective,
    Spmd,
}

/// One instruction. Operands/results/child regions are owned by the
/// instruction the way `SPEC_FULL.md` §3.4 describes; operands are arena
/// handles rather than pointers (§9 design note).
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Op,
    pub results: Vec<Handle<Value>>,
    pub attrs: Option<Handle<Attribute>>,
    pub loc: Location,
}

impl Instruction {
    pub fn new(op: Op, loc: Location) -> Self {
        Instruction {
            op,
            results: Vec::new(),
            attrs: None,
            loc,
        }
    }

    /// Every value this instruction reads, across both its direct
    /// operands and its child regions' `for`/`if` iter-initializers.
    /// Used by the use-list maintenance helpers in `function.rs`.
    pub fn operands(&self) -> Vec<Handle<Value>> {
        self.op.operands()
    }

    pub fn child_regions(&self) -> &[Region] {
        self.op.child_regions()
    }

    pub fn child_regions_mut(&mut self) -> &mut [Region] {
        self.op.child_regions_mut()
    }

    /// Classifies the instruction per §3.4/§4.7 step 1.
    pub fn kind(&self) -> InstKind {
        use InstKind::*;
        use Op::*;
        match &self.op {
            Alloca { .. } => Collective,
            Barrier { .. } => Collective,
            Parallel { .. } => Collective,
            LifetimeStop { .. } => Collective,
            Foreach { .. } => Collective,
            Axpby { .. } | Sum { .. } | Gemm { .. } | Gemv { .. } | Ger { .. } | Hadamard { .. } => {
                Collective
            }

            SubgroupId | SubgroupLocalId | SubgroupBroadcast { .. } => Spmd,

            Arith { .. }
            | ArithUnary { .. }
            | Cmp { .. }
            | Cast { .. }
            | Constant { .. }
            | Load { .. }
            | Store { .. }
            | Expand { .. }
            | Fuse { .. }
            | Subview { .. }
            | Size { .. }
            | CoopMatrixLoad { .. }
            | CoopMatrixStore { .. }
            | CoopMatrixMulAdd { .. }
            | CoopMatrixScale { .. }
            | CoopMatrixApply { .. }
            | For { .. }
            | If { .. }
            | Yield { .. }
            | GroupId
            | GroupSize
            | NumSubgroups
            | SubgroupSize => Mixed,
        }
    }
}

/// The opcode set (§3.4). Each variant's child regions (if any) are
/// embedded directly rather than referenced by handle — they are
/// exclusively owned by this instruction and never aliased.
#[derive(Debug, Clone)]
pub enum Op {
    Arith {
        op: ArithOp,
        a: Handle<Value>,
        b: Handle<Value>,
    },
    ArithUnary {
        op: ArithUnaryOp,
        a: Handle<Value>,
    },
    Cmp {
        cond: CmpCond,
        a: Handle<Value>,
        b: Handle<Value>,
    },
    Cast {
        a: Handle<Value>,
    },
    Constant {
        value: ConstantValue,
    },
    Alloca,
    Load {
        src: Handle<Value>,
        indices: Vec<Handle<Value>>,
    },
    Store {
        val: Handle<Value>,
        dst: Handle<Value>,
        indices: Vec<Handle<Value>>,
    },
    Expand {
        src: Handle<Value>,
        mode: i64,
        shape: Vec<Handle<Value>>,
    },
    Fuse {
        src: Handle<Value>,
        from: i64,
        to: i64,
    },
    Subview {
        src: Handle<Value>,
        /// Never the `dynamic` sentinel (`ir_invalid_slice`).
        offsets: Vec<i64>,
        /// May carry `crate::ty::DYNAMIC` entries.
        sizes: Vec<i64>,
    },
    Size {
        src: Handle<Value>,
        mode: i64,
    },

    Axpby {
        trans_a: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        beta: Handle<Value>,
        b: Handle<Value>,
        atomic: bool,
    },
    Sum {
        trans_a: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        beta: Handle<Value>,
        b: Handle<Value>,
        atomic: bool,
    },
    Gemm {
        trans_a: Transpose,
        trans_b: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        b: Handle<Value>,
        beta: Handle<Value>,
        c: Handle<Value>,
        atomic: bool,
    },
    Gemv {
        trans_a: Transpose,
        alpha: Handle<Value>,
        a: Handle<Value>,
        x: Handle<Value>,
        beta: Handle<Value>,
        y: Handle<Value>,
        atomic: bool,
    },
    Ger {
        alpha: Handle<Value>,
        x: Handle<Value>,
        y: Handle<Value>,
        beta: Handle<Value>,
        c: Handle<Value>,
        atomic: bool,
    },
    Hadamard {
        alpha: Handle<Value>,
        a: Handle<Value>,
        b: Handle<Value>,
        beta: Handle<Value>,
        c: Handle<Value>,
        atomic: bool,
    },

    CoopMatrixLoad {
        src: Handle<Value>,
        pos0: Handle<Value>,
        pos1: Handle<Value>,
        transpose: Transpose,
    },
    CoopMatrixStore {
        flag: StoreFlag,
        val: Handle<Value>,
        dst: Handle<Value>,
        pos0: Handle<Value>,
        pos1: Handle<Value>,
    },
    CoopMatrixMulAdd {
        a: Handle<Value>,
        b: Handle<Value>,
        c: Handle<Value>,
    },
    CoopMatrixScale {
        alpha: Handle<Value>,
        b: Handle<Value>,
    },
    /// Element-wise application of `body` (a single-scalar-parameter
    /// region yielding one scalar) to every component of `a`.
    CoopMatrixApply {
        a: Handle<Value>,
        body: Region,
    },

    For {
        loop_var_ty: ScalarType,
        from: Handle<Value>,
        to: Handle<Value>,
        step: Option<Handle<Value>>,
        init_values: Vec<Handle<Value>>,
        body: Region,
    },
    Foreach {
        loop_var_ty: ScalarType,
        from: Handle<Value>,
        to: Handle<Value>,
        body: Region,
    },
    If {
        cond: Handle<Value>,
        then_region: Region,
        else_region: Option<Region>,
    },
    Parallel {
        body: Region,
    },
    Yield {
        vals: Vec<Handle<Value>>,
    },

    GroupId,
    GroupSize,
    NumSubgroups,
    SubgroupId,
    SubgroupLocalId,
    SubgroupSize,
    SubgroupBroadcast {
        a: Handle<Value>,
        lane: Handle<Value>,
    },
    Barrier {
        fence: FenceFlags,
    },

    LifetimeStop {
        obj: Handle<Value>,
    },
}

impl Op {
    /// Flat list of every value operand, used for use-list maintenance
    /// and by analyses that don't care about per-operand roles.
    pub fn operands(&self) -> Vec<Handle<Value>> {
        use Op::*;
        match self {
            Arith { a, b, .. } => vec![*a, *b],
            ArithUnary { a, .. } => vec![*a],
            Cmp { a, b, .. } => vec![*a, *b],
            Cast { a } => vec![*a],
            Constant { .. } => vec![],
            Alloca => vec![],
            Load { src, indices, .. } => {
                let mut v = vec![*src];
                v.extend(indices);
                v
            }
            Store {
                val, dst, indices, ..
            } => {
                let mut v = vec![*val, *dst];
                v.extend(indices);
                v
            }
            Expand { src, shape, .. } => {
                let mut v = vec![*src];
                v.extend(shape);
                v
            }
            Fuse { src, .. } => vec![*src],
            Subview { src, .. } => vec![*src],
            Size { src, .. } => vec![*src],

            Axpby { alpha, a, beta, b, .. } => vec![*alpha, *a, *beta, *b],
            Sum { alpha, a, beta, b, .. } => vec![*alpha, *a, *beta, *b],
            Gemm {
                alpha,
                a,
                b,
                beta,
                c,
                ..
            } => vec![*alpha, *a, *b, *beta, *c],
            Gemv {
                alpha,
                a,
                x,
                beta,
                y,
                ..
            } => vec![*alpha, *a, *x, *beta, *y],
            Ger {
                alpha,
                x,
                y,
                beta,
                c,
                ..
            } => vec![*alpha, *x, *y, *beta, *c],
            Hadamard {
                alpha,
                a,
                b,
                beta,
                c,
                ..
            } => vec![*alpha, *a, *b, *beta, *c],

            CoopMatrixLoad { src, pos0, pos1, .. } => vec![*src, *pos0, *pos1],
            CoopMatrixStore {
                val,
                dst,
                pos0,
                pos1,
                ..
            } => vec![*val, *dst, *pos0, *pos1],
            CoopMatrixMulAdd { a, b, c } => vec![*a, *b, *c],
            CoopMatrixScale { alpha, b } => vec![*alpha, *b],
            CoopMatrixApply { a, .. } => vec![*a],

            For {
                from,
                to,
                step,
                init_values,
                ..
            } => {
                let mut v = vec![*from, *to];
                v.extend(*step);
                v.extend(init_values);
                v
            }
            Foreach { from, to, .. } => vec![*from, *to],
            If { cond, .. } => vec![*cond],
            Parallel { .. } => vec![],
            Yield { vals } => vals.clone(),

            GroupId | GroupSize | NumSubgroups | SubgroupId | SubgroupLocalId | SubgroupSize => {
                vec![]
            }
            SubgroupBroadcast { a, lane } => vec![*a, *lane],
            Barrier { .. } => vec![],

            LifetimeStop { obj } => vec![*obj],
        }
    }

    pub fn child_regions(&self) -> &[Region] {
        use Op::*;
        match self {
            CoopMatrixApply { body, .. } | For { body, .. } | Foreach { body, .. } | Parallel { body } => {
                std::slice::from_ref(body)
            }
            If { then_region, .. } => std::slice::from_ref(then_region),
            _ => &[],
        }
    }

    pub fn child_regions_mut(&mut self) -> &mut [Region] {
        use Op::*;
        match self {
            CoopMatrixApply { body, .. } | For { body, .. } | Foreach { body, .. } | Parallel { body } => {
                std::slice::from_mut(body)
            }
            If { then_region, .. } => std::slice::from_mut(then_region),
            _ => &mut [],
        }
    }

    /// `If`'s `else_region` isn't reachable through `child_regions` since
    /// that method returns a slice; callers needing both arms use this.
    pub fn if_regions(&self) -> Option<(&Region, Option<&Region>)> {
        match self {
            Op::If {
                then_region,
                else_region,
                ..
            } => Some((then_region, else_region.as_ref())),
            _ => None,
        }
    }

    pub fn if_regions_mut(&mut self) -> Option<(&mut Region, Option<&mut Region>)> {
        match self {
            Op::If {
                then_region,
                else_region,
                ..
            } => Some((then_region, else_region.as_mut())),
            _ => None,
        }
    }
}
