//! Core traits and types shared across attention implementations.
//!
//! Kernels operate on tensors with layout `[batch, seq_len, channels]` and
//! return a tensor of the same shape. The axial orchestrator only relies on
//! the [`Attention`] trait, so alternative kernels can be slotted in per axis.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{AxialConfig, ScoreNormalization, ScoreScale};
pub use errors::AttentionError;

/// Unified interface for sequence self-attention kernels.
///
/// * `x` has layout `[batch, seq_len, channels]` with `channels == self.dim()`.
/// * The returned tensor has the same shape as `x`.
pub trait Attention {
    /// Channel width the kernel was built for.
    fn dim(&self) -> usize;

    /// Attend over the sequence axis of `x`.
    fn attend(&self, x: &Tensor) -> Result<Tensor, AttentionError>;
}
