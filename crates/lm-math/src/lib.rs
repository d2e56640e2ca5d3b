//! Dense and sparse numeric primitives for the language-model toolkit.
//!
//! This crate owns every piece of arithmetic shared by the higher layers:
//! the dense [`Matrix`] type used for layer activations and weights, the
//! sparse formats consumed by the segment/one-shot weight update paths, and
//! the quantized wire codec used by the persistence layer. It deliberately
//! has no BLAS or SIMD backend; a future backend can be slotted in behind
//! [`gemm`] without touching callers.

mod error;
mod matrix;
mod quant;
mod sparse;

pub use error::MathError;
pub use matrix::{colsum_into, gemm, Matrix, MatrixView, Transpose};
pub use quant::{
    compress_zero_runs, decompress_zero_runs, dequantize_short, quantize_short, NumericFlags,
};
pub use sparse::{Coo, Csc};

/// Result alias for fallible numeric operations.
pub type Result<T> = std::result::Result<T, MathError>;
