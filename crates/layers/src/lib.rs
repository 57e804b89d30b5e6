//! Building blocks for the axial attention crate.
//!
//! The crate hosts the dense projections attention kernels call into,
//! together with the dtype policy and validation helpers they share. All
//! components are assembled from Candle primitives and report failures
//! through `candle_core::Result` so they compose with ordinary tensor ops.

pub mod checks;
pub mod dtypes;
pub mod linear;

pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit, LinearLayer};
