//! Portable attention kernels built from Candle primitives.
//!
//! These paths favour clarity over absolute performance and serve as the
//! per-axis kernel of the axial orchestrator.

pub mod self_attention;

pub use self_attention::SelfAttention;
