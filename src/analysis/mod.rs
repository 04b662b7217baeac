//! Read-only analyses consulted by the transform passes (§4.6, C6).

pub mod alias;
pub mod gcd;
pub mod matrix_ext;
pub mod memref;
pub mod stack;
