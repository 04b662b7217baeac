//! Just-in-time compiler middle end for TTL, a domain-specific tensor
//! kernel language, targeting SPIR-V for Intel GPU runtimes (OpenCL, Level
//! Zero).
//!
//! The crate never performs I/O, never loads plugins, and is oblivious to
//! any host runtime: it consumes a [`crate::ir::Program`] built through
//! [`crate::builder`] plus a [`crate::core_info::CoreInfo`] describing the
//! target device, and produces a [`crate::spv::Module`] (optionally
//! assembled to a byte buffer via [`crate::spv::assemble`]) or a structured
//! [`crate::error::CompilationError`].
//!
//! The driving entry points are [`crate::driver::compile_to_spirv`] and
//! [`crate::driver::compile_to_spirv_and_assemble`].

#![deny(clippy::panic)]

pub mod analysis;
pub mod arena;
pub mod attribute;
pub mod builder;
pub mod context;
pub mod core_info;
pub mod driver;
pub mod error;
pub mod ir;
pub mod pass;
pub mod spv;
pub mod ty;

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

/// Hash map that is faster but not resilient to DoS attacks. Used for every
/// uniquer/lookup table in the compiler (not exposed across module
/// boundaries where iteration order would leak into output).
pub type FastHashMap<K, V> = HashMap<K, V, BuildHasherDefault<fxhash::FxHasher>>;
/// Hash set counterpart of [`FastHashMap`].
pub type FastHashSet<K> = HashSet<K, BuildHasherDefault<fxhash::FxHasher>>;

/// Number of bytes; used for sizes, offsets and alignments throughout.
pub type Bytes = i64;
