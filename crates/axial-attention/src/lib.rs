//! Axial multi-head self-attention for the transformer project.
//!
//! Full self-attention over an N-dimensional grid costs quadratically in the
//! product of all axes. Axial attention factors it into one pass per content
//! axis: the input is permuted so the attended axis and the channel axis are
//! trailing, every other axis (batch included) is folded into a synthetic
//! batch, a [`SelfAttention`] kernel runs over the resulting
//! `[batch, seq, channel]` view, and the per-axis results are restored to the
//! original layout and summed elementwise.
//!
//! The crate splits into three pieces:
//!
//! * [`permutation`] computes the permutation and inverse permutation for each
//!   axial pass from `(num_dimensions, dim_index)` alone.
//! * [`reference`] hosts the multi-head self-attention kernel.
//! * [`axial`] composes the two into [`AxialAttention`].
//!
//! By default value mixing uses raw scaled scores without a softmax, so the
//! weights of a row do not sum to one, and the scale is the merged channel
//! width raised to `-0.5`. Both are selectable through [`AxialConfig`], see
//! [`ScoreNormalization`] and [`ScoreScale`].

pub mod axial;
pub mod core;
pub mod permutation;
pub mod reference;

pub use axial::AxialAttention;
pub use crate::core::{Attention, AttentionError, AxialConfig, ScoreNormalization, ScoreScale};
pub use permutation::{calculate_permutations, AxialPlan};
pub use reference::SelfAttention;
