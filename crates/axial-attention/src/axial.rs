//! Axial attention over tensors of arbitrary rank.
//!
//! [`AxialAttention`] owns one kernel per content axis together with the
//! [`AxialPlan`] that routes that axis to the kernel. Each pass reads only the
//! original input; the passes are combined by elementwise summation.

use std::fmt;
use std::sync::OnceLock;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;

use crate::core::{Attention, AttentionError, AxialConfig, ScoreNormalization, ScoreScale};
use crate::permutation::{calculate_permutations, AxialPlan};
use crate::reference::SelfAttention;

/// Sum of per-axis self-attention passes over an N-dimensional tensor.
pub struct AxialAttention<A = SelfAttention> {
    config: AxialConfig,
    rank: usize,
    dim_index: usize,
    plans: Vec<AxialPlan>,
    kernels: Vec<A>,
    first_call: OnceLock<()>,
}

impl<A> fmt::Debug for AxialAttention<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxialAttention")
            .field("config", &self.config)
            .field("dim_index", &self.dim_index)
            .field("plans", &self.plans)
            .finish()
    }
}

impl AxialAttention<SelfAttention> {
    /// Randomly initialised kernels, one per content axis.
    ///
    /// `AXIAL_SCORE_NORMALIZATION` and `AXIAL_SCORE_SCALE` override the
    /// scoring modes in `config` when set.
    pub fn new(mut config: AxialConfig, device: &Device, dtype: DType) -> Result<Self, AttentionError> {
        config.apply_env_overrides();
        config.validate()?;
        let kernels = (0..config.num_dimensions)
            .map(|_| {
                SelfAttention::new(config.dim, config.heads, device, dtype)
                    .map(|kernel| configure_kernel(kernel, &config))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_kernels(config, kernels)
    }

    /// Kernels whose weights are registered under `axial.{i}` in `vb`.
    ///
    /// Environment overrides apply as in [`AxialAttention::new`].
    pub fn from_var_builder(mut config: AxialConfig, vb: VarBuilder) -> Result<Self, AttentionError> {
        config.apply_env_overrides();
        config.validate()?;
        let vb = vb.pp("axial");
        let kernels = (0..config.num_dimensions)
            .map(|index| {
                SelfAttention::from_var_builder(config.dim, config.heads, vb.pp(index.to_string()))
                    .map(|kernel| configure_kernel(kernel, &config))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_kernels(config, kernels)
    }
}

impl<A: Attention> AxialAttention<A> {
    /// Pair caller-built kernels with the plans derived from `config`.
    ///
    /// `kernels[i]` serves the `i`-th content axis in ascending axis order.
    pub fn from_kernels(config: AxialConfig, kernels: Vec<A>) -> Result<Self, AttentionError> {
        config.validate()?;
        let plans = calculate_permutations(config.num_dimensions, config.dim_index)?;
        if kernels.len() != plans.len() {
            return Err(AttentionError::InvalidConfig(format!(
                "expected {} kernels, one per content axis, got {}",
                plans.len(),
                kernels.len()
            )));
        }
        if let Some(kernel) = kernels.iter().find(|kernel| kernel.dim() != config.dim) {
            return Err(AttentionError::InvalidConfig(format!(
                "kernel width {} does not match dim {}",
                kernel.dim(),
                config.dim
            )));
        }
        let (rank, dim_index) = config
            .total_dimensions()
            .zip(config.resolved_dim_index())
            .ok_or_else(|| {
                AttentionError::InvalidConfig(format!("dim_index {} is out of range", config.dim_index))
            })?;

        if config.score_normalization == ScoreNormalization::Raw {
            log::warn!(
                "axial attention mixes values with raw scaled scores (no softmax); weights do not sum to one"
            );
        }
        if config.score_scale == ScoreScale::MergedDim {
            log::debug!(
                "axial attention scales scores by dim^-0.5 = {:.6} rather than head_dim^-0.5",
                (config.dim as f64).powf(-0.5)
            );
        }

        Ok(Self {
            config,
            rank,
            dim_index,
            plans,
            kernels,
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &AxialConfig {
        &self.config
    }

    /// Permutation pairs, one per content axis.
    pub fn plans(&self) -> &[AxialPlan] {
        &self.plans
    }

    pub fn kernels(&self) -> &[A] {
        &self.kernels
    }

    /// Absolute index of the channel axis.
    pub fn dim_index(&self) -> usize {
        self.dim_index
    }

    /// Apply every axial pass to `x` and sum the results.
    ///
    /// `x` must have rank `num_dimensions + 2` and extent `dim` along the
    /// channel axis; the output has the same shape.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        self.check_input(x)?;
        if self.first_call.set(()).is_ok() {
            log::info!(
                "axial_attention init {} passes={} device={:?} dtype={:?}",
                self.config,
                self.plans.len(),
                x.device().location(),
                x.dtype()
            );
        }

        let mut total: Option<Tensor> = None;
        for (plan, kernel) in self.plans.iter().zip(&self.kernels) {
            let pass = Self::run_pass(plan, kernel, x)?;
            total = Some(match total {
                Some(sum) => sum.add(&pass)?,
                None => pass,
            });
        }
        let total = total.ok_or_else(|| {
            AttentionError::InvalidConfig("axial attention has no content axes".to_string())
        })?;
        Ok(total.contiguous()?)
    }

    /// Run the `index`-th axial pass alone, returning a tensor shaped like `x`.
    pub fn attend_axis(&self, x: &Tensor, index: usize) -> Result<Tensor, AttentionError> {
        let (plan, kernel) = self
            .plans
            .get(index)
            .zip(self.kernels.get(index))
            .ok_or_else(|| {
                AttentionError::InvalidConfig(format!(
                    "axial pass {index} does not exist; module has {}",
                    self.plans.len()
                ))
            })?;
        self.check_input(x)?;
        Self::run_pass(plan, kernel, x)
    }

    /// Permute, flatten, attend, restore. `x` must already have passed `check_input`.
    fn run_pass(plan: &AxialPlan, kernel: &A, x: &Tensor) -> Result<Tensor, AttentionError> {
        let permuted = x.permute(plan.permutation.clone())?;
        let shape = permuted.dims().to_vec();
        let (seq, dim) = (shape[shape.len() - 2], shape[shape.len() - 1]);
        let flattened = permuted.reshape(((), seq, dim))?;
        log::debug!(
            "axial pass axis={} permuted={:?} flattened={:?}",
            plan.axis,
            shape,
            flattened.dims()
        );

        let attended = kernel.attend(&flattened)?;
        let restored = attended.reshape(shape)?;
        Ok(restored.permute(plan.inverse.clone())?)
    }

    fn check_input(&self, x: &Tensor) -> Result<(), AttentionError> {
        let expected = self.rank;
        if x.rank() != expected {
            return Err(AttentionError::shape(format!(
                "input tensor does not have the correct number of dimensions: expected {expected}, got shape {:?}",
                x.dims()
            )));
        }
        let extent = x.dims()[self.dim_index];
        if extent != self.config.dim {
            return Err(AttentionError::shape(format!(
                "input tensor does not have the correct input dimension: axis {} has extent {extent}, expected {}",
                self.dim_index, self.config.dim
            )));
        }
        Ok(())
    }
}

impl<A: Attention> Module for AxialAttention<A> {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        AxialAttention::forward(self, xs).map_err(candle_core::Error::wrap)
    }
}

fn configure_kernel(kernel: SelfAttention, config: &AxialConfig) -> SelfAttention {
    kernel
        .with_score_scale(config.score_scale)
        .with_score_normalization(config.score_normalization)
}
