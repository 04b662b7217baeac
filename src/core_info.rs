//! Target-device description (§4.11): register file size, work-group size
//! ceiling, supported subgroup sizes, optional feature flags, and the
//! cooperative-matrix block-I/O constraint table consulted by
//! `pass::lower_coopmatrix` (§4.7 step 4) and `pass::work_group_size`
//! (§4.7 step 6).
//!
//! The device-info database itself (which architectures map to which
//! numbers) is an external collaborator per §1 — this module reproduces
//! only the shape of its output, plus one concrete preset (`CoreInfo::pvc`)
//! ported from the source's `pvc_matrix_ext_types`/`_diy` tables.

use crate::ty::{MatrixUse, ScalarType};

bitflags::bitflags! {
    /// Optional hardware features a kernel may request (§4.11).
    pub struct CoreFeatureFlags: u32 {
        /// Doubles the register file per vector engine at the cost of
        /// halving concurrently resident hardware threads.
        const LARGE_REGISTER_FILE = 0x1;
    }
}

/// SPIR-V capabilities/extensions the target is known to support; gates
/// which intrinsics `lower_coopmatrix`/`spv::codegen` may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpirvFeature {
    CooperativeMatrixKhr,
    SubgroupShuffle,
    Int64Atomics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmMnk {
    pub m: i64,
    pub n: i64,
    pub k: i64,
}

/// One supported `(a, b, acc)` precision combination for matrix-extension
/// instructions, plus the `(M, N, K)` block sizes it's offered at.
#[derive(Debug, Clone)]
pub struct MatrixExtType {
    pub a: ScalarType,
    pub b: ScalarType,
    pub acc: Vec<ScalarType>,
    pub mnk: Vec<GemmMnk>,
}

impl MatrixExtType {
    pub fn have_acc(&self, acc: ScalarType) -> bool {
        self.acc.contains(&acc)
    }

    /// Whether this precision offers a block of `rows x cols` for operand
    /// role `use_` (A: `M x K`, B: `K x N`, Acc: `M x N`).
    pub fn have_type(&self, sty: ScalarType, rows: i64, cols: i64, use_: MatrixUse) -> bool {
        match use_ {
            MatrixUse::A => self.a == sty && self.mnk.iter().any(|mnk| mnk.m == rows && mnk.k == cols),
            MatrixUse::B => self.b == sty && self.mnk.iter().any(|mnk| mnk.k == rows && mnk.n == cols),
            MatrixUse::Acc => self.have_acc(sty) && self.mnk.iter().any(|mnk| mnk.m == rows && mnk.n == cols),
        }
    }
}

/// Block-load/store alignment/stride constraints a matrix-extension
/// intrinsic's memory operand must satisfy.
#[derive(Debug, Clone, Copy)]
pub struct MatrixExtBlockIoInfo {
    pub base_address_alignment: i32,
    pub min_stride: i32,
    pub max_stride: i32,
    pub pos0_alignment: i32,
    pub stride_alignment: i32,
    pub width_alignment: i32,
}

/// Cooperative-matrix-intrinsic capability description for one target.
#[derive(Debug, Clone)]
pub struct MatrixExtInfo {
    pub required_subgroup_size: i32,
    pub block_io: MatrixExtBlockIoInfo,
    pub types: Vec<MatrixExtType>,
}

impl MatrixExtInfo {
    pub fn have_dpas(&self) -> bool {
        !self.types.is_empty()
    }

    pub fn get_precision(&self, a: ScalarType, b: ScalarType, acc: ScalarType) -> Option<&MatrixExtType> {
        self.types.iter().find(|t| t.a == a && t.b == b && t.have_acc(acc))
    }

    pub fn have_precision(&self, a: ScalarType, b: ScalarType, acc: ScalarType) -> bool {
        self.get_precision(a, b, acc).is_some()
    }

    pub fn have_type(&self, sty: ScalarType, rows: i64, cols: i64, use_: MatrixUse) -> bool {
        self.types.iter().any(|t| t.have_type(sty, rows, cols, use_))
    }

    pub fn have_gemm(
        &self,
        a: ScalarType,
        b: ScalarType,
        c: ScalarType,
        d: ScalarType,
        m: i64,
        n: i64,
        k: i64,
    ) -> bool {
        self.types.iter().any(|t| {
            t.have_type(a, m, k, MatrixUse::A)
                && t.have_type(b, k, n, MatrixUse::B)
                && t.have_type(c, m, n, MatrixUse::Acc)
                && t.have_type(d, m, n, MatrixUse::Acc)
        })
    }
}

/// KHR `cooperative_matrix` block sizes offered by Ponte Vecchio, ported
/// directly from the source's `pvc_matrix_ext_types` table.
pub fn pvc_matrix_ext_types() -> Vec<MatrixExtType> {
    fn mnk(entries: &[(i64, i64, i64)]) -> Vec<GemmMnk> {
        entries.iter().map(|&(m, n, k)| GemmMnk { m, n, k }).collect()
    }
    vec![
        MatrixExtType {
            a: ScalarType::I8,
            b: ScalarType::I8,
            acc: vec![ScalarType::I32],
            mnk: mnk(&[(16, 1, 32), (16, 2, 32), (16, 4, 32), (16, 8, 32)]),
        },
        MatrixExtType {
            a: ScalarType::F16,
            b: ScalarType::F16,
            acc: vec![ScalarType::F16, ScalarType::F32],
            mnk: mnk(&[(16, 1, 16), (16, 2, 16), (16, 4, 16), (16, 8, 16)]),
        },
        MatrixExtType {
            a: ScalarType::Bf16,
            b: ScalarType::Bf16,
            acc: vec![ScalarType::Bf16, ScalarType::F32],
            mnk: mnk(&[(16, 1, 16), (16, 2, 16), (16, 4, 16), (16, 8, 16)]),
        },
    ]
}

/// Wider block sizes reachable without the KHR intrinsic, via the
/// subgroup-shuffle ("DIY") lowering, ported from `pvc_matrix_ext_types_diy`.
pub fn pvc_matrix_ext_types_diy() -> Vec<MatrixExtType> {
    fn mnk(entries: &[(i64, i64, i64)]) -> Vec<GemmMnk> {
        entries.iter().map(|&(m, n, k)| GemmMnk { m, n, k }).collect()
    }
    vec![
        MatrixExtType {
            a: ScalarType::I8,
            b: ScalarType::I8,
            acc: vec![ScalarType::I32],
            mnk: mnk(&[
                (16, 8, 32),
                (32, 8, 32),
                (64, 8, 32),
                (16, 16, 32),
                (32, 16, 32),
                (64, 16, 32),
                (16, 32, 32),
                (32, 32, 32),
                (64, 32, 32),
                (16, 8, 64),
                (32, 8, 64),
                (64, 8, 64),
                (16, 16, 64),
                (32, 16, 64),
                (64, 16, 64),
                (16, 32, 64),
                (32, 32, 64),
                (64, 32, 64),
            ]),
        },
        MatrixExtType {
            a: ScalarType::F16,
            b: ScalarType::F16,
            acc: vec![ScalarType::F16, ScalarType::F32],
            mnk: mnk(&[
                (16, 8, 16),
                (32, 8, 16),
                (16, 16, 16),
                (32, 16, 16),
                (16, 32, 16),
                (32, 32, 16),
                (16, 8, 32),
                (32, 8, 32),
                (16, 16, 32),
                (32, 16, 32),
                (16, 32, 32),
                (32, 32, 32),
            ]),
        },
        MatrixExtType {
            a: ScalarType::Bf16,
            b: ScalarType::Bf16,
            acc: vec![ScalarType::Bf16, ScalarType::F32],
            mnk: mnk(&[
                (16, 8, 16),
                (32, 8, 16),
                (16, 16, 16),
                (32, 16, 16),
                (16, 32, 16),
                (32, 32, 16),
                (16, 8, 32),
                (32, 8, 32),
                (16, 16, 32),
                (32, 16, 32),
                (16, 32, 32),
                (32, 32, 32),
            ]),
        },
    ]
}

/// Per-subgroup-size device limits, looked up via `CoreInfo::core_config`.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub subgroup_size: i32,
    pub max_work_group_size: i32,
}

/// Target-device description threaded through the pipeline from
/// `driver::compile_to_spirv` onward (§4.11).
#[derive(Debug, Clone, Default)]
pub struct CoreInfo {
    pub register_space: i32,
    pub max_work_group_size: i32,
    pub subgroup_sizes: Vec<i32>,
    pub core_features: CoreFeatureFlags,
    pub spirv_features: Vec<SpirvFeature>,
    pub default_alignment: i32,
    pub matrix_ext: Option<MatrixExtInfo>,
}

impl CoreInfo {
    /// A generic device with no matrix extension and a single subgroup
    /// size, mirroring `tinytc_core_info_generic_create`.
    pub fn generic(register_space: i32, max_work_group_size: i32, subgroup_sizes: Vec<i32>) -> Self {
        CoreInfo {
            register_space,
            max_work_group_size,
            subgroup_sizes,
            core_features: CoreFeatureFlags::empty(),
            spirv_features: Vec::new(),
            default_alignment: 8,
            matrix_ext: None,
        }
    }

    /// Ponte Vecchio, mirroring `tinytc_core_info_intel_create_from_arch`
    /// with `tinytc_intel_gpu_architecture_pvc`.
    pub fn pvc() -> Self {
        CoreInfo {
            register_space: 64 * 1024,
            max_work_group_size: 1024,
            subgroup_sizes: vec![16, 32],
            core_features: CoreFeatureFlags::empty(),
            spirv_features: vec![SpirvFeature::CooperativeMatrixKhr, SpirvFeature::SubgroupShuffle],
            default_alignment: 64,
            matrix_ext: Some(MatrixExtInfo {
                required_subgroup_size: 16,
                block_io: MatrixExtBlockIoInfo {
                    base_address_alignment: 64,
                    min_stride: 16,
                    max_stride: i32::MAX,
                    pos0_alignment: 1,
                    stride_alignment: 4,
                    width_alignment: 4,
                },
                types: pvc_matrix_ext_types(),
            }),
        }
    }

    pub fn have_spirv_feature(&self, feature: SpirvFeature) -> bool {
        self.spirv_features.contains(&feature)
    }

    /// Per-subgroup-size limits; `None` if `subgroup_size` isn't among
    /// `self.subgroup_sizes` (source: `core_info::get_core_config` throwing
    /// `std::out_of_range`).
    pub fn core_config(&self, subgroup_size: i32) -> Option<CoreConfig> {
        if !self.subgroup_sizes.contains(&subgroup_size) {
            return None;
        }
        Some(CoreConfig {
            subgroup_size,
            max_work_group_size: self.max_work_group_size,
        })
    }
}

/// A `(rows, cols)` shape — `cols == 0` for a vector — seen as a BLAS
/// instruction's B/C operand, collected by `pass::work_group_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeHint {
    pub element: ScalarType,
    pub rows: i64,
    pub cols: i64,
}

/// Picks a subgroup size from `info.subgroup_sizes` when a function
/// doesn't pin one down explicitly.
///
/// Not ported from the source — the device-info heuristic
/// (`device_info.cpp`) wasn't present in the retrieval pack. This
/// reproduces only the documented contract (pick one of
/// `info.subgroup_sizes`): prefer the largest size that evenly divides
/// every statically-known row count seen, falling back to the smallest
/// available size when none does or no shape is known.
pub fn suggest_subgroup_size(shapes: &[ShapeHint], info: &CoreInfo) -> i32 {
    let mut sizes = info.subgroup_sizes.clone();
    sizes.sort_unstable();
    let best = sizes.iter().rev().find(|&&sg| {
        shapes
            .iter()
            .all(|s| crate::ty::is_dynamic(s.rows) || s.rows % i64::from(sg) == 0)
    });
    best.or(sizes.first()).copied().unwrap_or(1)
}

/// Suggests a `(tile_x, tile_y)` work-group tiling: `tile_x` subgroups
/// along the row dimension (final `work_group_size[0]` is
/// `tile_x * subgroup_size`), `tile_y` along the column dimension.
///
/// Also not ported (see `suggest_subgroup_size`): greedily doubles
/// `tile_y` while it still divides `cfg.max_work_group_size /
/// subgroup_size` and every statically-known column count, then fixes
/// `tile_x = 1`.
pub fn suggest_local_tiling(shapes: &[ShapeHint], subgroup_size: i32, cfg: &CoreConfig) -> (i32, i32) {
    let budget = (cfg.max_work_group_size / subgroup_size.max(1)).max(1);
    let mut tile_y = 1;
    while tile_y * 2 <= budget
        && shapes
            .iter()
            .all(|s| crate::ty::is_dynamic(s.cols) || s.cols == 0 || s.cols % i64::from(tile_y * 2) == 0)
    {
        tile_y *= 2;
    }
    (1, tile_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pvc_matrix_ext_type_have_type_matches_a_block() {
        let types = pvc_matrix_ext_types();
        let f16 = &types[1];
        assert!(f16.have_type(ScalarType::F16, 16, 16, MatrixUse::A));
        assert!(!f16.have_type(ScalarType::F16, 17, 16, MatrixUse::A));
    }

    #[test]
    fn have_gemm_requires_every_operand_precision_and_shape() {
        let info = MatrixExtInfo {
            required_subgroup_size: 16,
            block_io: MatrixExtBlockIoInfo {
                base_address_alignment: 64,
                min_stride: 16,
                max_stride: i32::MAX,
                pos0_alignment: 1,
                stride_alignment: 4,
                width_alignment: 4,
            },
            types: pvc_matrix_ext_types(),
        };
        assert!(info.have_gemm(ScalarType::F16, ScalarType::F16, ScalarType::F32, ScalarType::F32, 16, 16, 16));
        assert!(!info.have_gemm(ScalarType::F16, ScalarType::F16, ScalarType::F32, ScalarType::F32, 17, 16, 16));
    }

    #[test]
    fn core_config_is_none_for_unsupported_subgroup_size() {
        let info = CoreInfo::pvc();
        assert!(info.core_config(16).is_some());
        assert!(info.core_config(8).is_none());
    }

    #[test]
    fn suggest_subgroup_size_prefers_largest_divisor() {
        let info = CoreInfo::pvc();
        let shapes = [ShapeHint { element: ScalarType::F32, rows: 32, cols: 32 }];
        assert_eq!(suggest_subgroup_size(&shapes, &info), 32);
    }

    #[test]
    fn suggest_local_tiling_respects_work_group_budget() {
        let cfg = CoreConfig { subgroup_size: 16, max_work_group_size: 1024 };
        let shapes = [ShapeHint { element: ScalarType::F32, rows: 256, cols: 256 }];
        let (tile_x, tile_y) = suggest_local_tiling(&shapes, 16, &cfg);
        assert_eq!(tile_x, 1);
        assert!(tile_y * 16 <= 1024);
        assert_eq!(256 % tile_y, 0);
    }
}
