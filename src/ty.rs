//! Immutable, hash-consed data types (§3.3).

use crate::error::{CompilationError, Status};

/// Sentinel used in `memref`/`group`/`coopmatrix` shape and stride entries
/// to mean "determined at run time" (source: `INT64_MIN`).
pub const DYNAMIC: i64 = i64::MIN;

pub fn is_dynamic(v: i64) -> bool {
    v == DYNAMIC
}

/// Scalar element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Index,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bf16,
    F16,
}

impl ScalarType {
    /// Size in bytes. `Index` follows the machine pointer width convention
    /// used throughout the source (64-bit on every supported target).
    pub fn size_in_bytes(self) -> i32 {
        match self {
            ScalarType::Bool | ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 | ScalarType::Bf16 | ScalarType::F16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 | ScalarType::Index => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ScalarType::F32 | ScalarType::F64 | ScalarType::Bf16 | ScalarType::F16
        )
    }

    pub fn is_integer(self) -> bool {
        !self.is_float() && !matches!(self, ScalarType::Bool)
    }
}

/// Address space a `memref` lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Global,
    Local,
}

/// `use` side of a cooperative matrix: which GEMM operand it plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixUse {
    A,
    B,
    Acc,
}

/// A hash-consed immutable data type (§3.3). `Memref`/`Group`/`CoopMatrix`
/// carry owned `Vec`s, so equality (used by the uniquer, `UniqueArena`'s
/// `FxHashMap<Type, Handle<Type>>`) is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Scalar(ScalarType),
    Memref {
        element: ScalarType,
        shape: Vec<i64>,
        stride: Vec<i64>,
        addrspace: AddressSpace,
    },
    Group {
        inner: Box<Type>,
        size: i64,
        offset: i64,
    },
    CoopMatrix {
        component: ScalarType,
        rows: i64,
        cols: i64,
        use_: MatrixUse,
    },
}

/// Computes the canonical column-major stride for `shape`:
/// `[1, s0, s0*s1, ...]`, propagating `DYNAMIC` once any earlier shape
/// entry is dynamic (§3.3).
pub fn canonical_stride(shape: &[i64]) -> Vec<i64> {
    let mut stride = Vec::with_capacity(shape.len());
    let mut acc: i64 = 1;
    let mut dynamic = false;
    for &s in shape {
        stride.push(if dynamic { DYNAMIC } else { acc });
        if is_dynamic(s) {
            dynamic = true;
        } else if !dynamic {
            acc = acc.saturating_mul(s);
        }
    }
    stride
}

impl Type {
    /// Builds a `memref` type, filling in the canonical stride when `stride`
    /// is empty and validating shape/stride lengths and non-negativity
    /// (modulo the `DYNAMIC` sentinel).
    pub fn memref(
        element: ScalarType,
        shape: Vec<i64>,
        stride: Vec<i64>,
        addrspace: AddressSpace,
    ) -> Result<Type, CompilationError> {
        let stride = if stride.is_empty() {
            canonical_stride(&shape)
        } else {
            stride
        };
        if shape.len() != stride.len() {
            return Err(CompilationError::new(Status::IrShapeStrideMismatch));
        }
        for &s in &shape {
            if s < 0 && !is_dynamic(s) {
                return Err(CompilationError::new(Status::IrInvalidShape));
            }
        }
        for &s in &stride {
            if s < 0 && !is_dynamic(s) {
                return Err(CompilationError::new(Status::IrInvalidShape));
            }
        }
        Ok(Type::Memref {
            element,
            shape,
            stride,
            addrspace,
        })
    }

    pub fn group(inner: Type, size: i64, offset: i64) -> Result<Type, CompilationError> {
        if !matches!(inner, Type::Memref { .. }) {
            return Err(CompilationError::new(Status::IrExpectedMemref));
        }
        if size < 0 && !is_dynamic(size) {
            return Err(CompilationError::new(Status::IrInvalidShape));
        }
        Ok(Type::Group {
            inner: Box::new(inner),
            size,
            offset,
        })
    }

    /// Builds a `coopmatrix` type. `rows` must be a positive power of two;
    /// `cols` must be positive (§3.3).
    pub fn coopmatrix(
        component: ScalarType,
        rows: i64,
        cols: i64,
        use_: MatrixUse,
    ) -> Result<Type, CompilationError> {
        if rows <= 0 || (rows & (rows - 1)) != 0 {
            return Err(CompilationError::new(Status::IrInvalidShape));
        }
        if cols <= 0 {
            return Err(CompilationError::new(Status::IrInvalidShape));
        }
        Ok(Type::CoopMatrix {
            component,
            rows,
            cols,
            use_,
        })
    }

    pub fn as_memref(&self) -> Option<(ScalarType, &[i64], &[i64], AddressSpace)> {
        match self {
            Type::Memref {
                element,
                shape,
                stride,
                addrspace,
            } => Some((*element, shape, stride, *addrspace)),
            _ => None,
        }
    }

    pub fn as_coopmatrix(&self) -> Option<(ScalarType, i64, i64, MatrixUse)> {
        match self {
            Type::CoopMatrix {
                component,
                rows,
                cols,
                use_,
            } => Some((*component, *rows, *cols, *use_)),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// `element_size * stride.last() * shape.last()` for a fully static
    /// memref, `None` ("dynamic") otherwise. `None` on non-memref types.
    pub fn size_in_bytes(&self) -> Option<i64> {
        let (element, shape, stride, _) = self.as_memref()?;
        if shape.is_empty() {
            return Some(element.size_in_bytes() as i64);
        }
        let last_shape = *shape.last().unwrap();
        let last_stride = *stride.last().unwrap();
        if is_dynamic(last_shape) || is_dynamic(last_stride) {
            return None;
        }
        Some(element.size_in_bytes() as i64 * last_stride * last_shape)
    }

    /// Natural alignment of a memref's element type; used by `set-stack-ptr`
    /// as the minimum alignment for an `alloca`.
    pub fn element_alignment(&self) -> i32 {
        self.as_memref()
            .map(|(el, ..)| el.size_in_bytes())
            .unwrap_or(1)
    }

    /// "Distributed mode" of a coopmatrix per §3.3: column for `use=b`,
    /// row otherwise. Returns `(rows, cols)` with the distributed dimension
    /// first.
    pub fn coopmatrix_components_per_work_item(&self, subgroup_size: i64) -> Option<i64> {
        let (_, rows, cols, use_) = self.as_coopmatrix()?;
        let (distributed, other) = match use_ {
            MatrixUse::B => (cols, rows),
            _ => (rows, cols),
        };
        let per_lane = (distributed + subgroup_size - 1) / subgroup_size;
        Some(per_lane * other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_stride_is_column_major() {
        assert_eq!(canonical_stride(&[64, 32]), vec![1, 64]);
        assert_eq!(canonical_stride(&[2, 3, 4]), vec![1, 2, 6]);
    }

    #[test]
    fn canonical_stride_propagates_dynamic() {
        assert_eq!(canonical_stride(&[DYNAMIC, 4]), vec![1, DYNAMIC]);
    }

    #[test]
    fn memref_get_with_empty_stride_equals_explicit_canonical_stride() {
        let a = Type::memref(ScalarType::F32, vec![64, 32], vec![], AddressSpace::Global).unwrap();
        let b = Type::memref(
            ScalarType::F32,
            vec![64, 32],
            canonical_stride(&[64, 32]),
            AddressSpace::Global,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn memref_dynamic_shape_is_allowed() {
        let ty = Type::memref(ScalarType::F32, vec![DYNAMIC], vec![1], AddressSpace::Global);
        assert!(ty.is_ok());
        assert_eq!(ty.unwrap().size_in_bytes(), None);
    }

    #[test]
    fn memref_rejects_mismatched_shape_stride_length() {
        let err = Type::memref(
            ScalarType::F32,
            vec![64, 32],
            vec![1],
            AddressSpace::Global,
        )
        .unwrap_err();
        assert_eq!(err.status, Status::IrShapeStrideMismatch);
    }

    #[test]
    fn coopmatrix_rejects_non_power_of_two_rows() {
        let err =
            Type::coopmatrix(ScalarType::F32, 3, 16, MatrixUse::A).unwrap_err();
        assert_eq!(err.status, Status::IrInvalidShape);
    }

    #[test]
    fn coopmatrix_rejects_negative_rows() {
        let err =
            Type::coopmatrix(ScalarType::F32, -1, 16, MatrixUse::A).unwrap_err();
        assert_eq!(err.status, Status::IrInvalidShape);
    }

    #[test]
    fn size_in_bytes_matches_stride_times_shape() {
        let ty = Type::memref(ScalarType::F32, vec![64, 32], vec![1, 64], AddressSpace::Global)
            .unwrap();
        assert_eq!(ty.size_in_bytes(), Some(4 * 64 * 32));
    }
}
