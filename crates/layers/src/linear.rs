//! Linear and affine projection helpers.
//!
//! Linear layers expect inputs shaped `(batch, seq, in_dim)` or `(rows, in_dim)`
//! and return tensors with the trailing dimension replaced by the output size.
//! Fused variants pack `num_projections` outputs side by side as
//! `(batch, seq, num_projections * output_dim)` so callers can chunk them into
//! query, key and value. Weights follow the `[out_dim, in_dim]` convention and
//! the forward pass computes `x @ W^T`, casting through a
//! [`PrecisionPolicy`] so reduced precision parameters still matmul in `f32`.

use candle_core::{DType, Device, Error, Result, Tensor};
use candle_nn::{init::Init, VarBuilder};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension per projection shard.
    pub output_dim: usize,
    /// Number of projections fused together (1 for standard linear).
    pub fused_projections: usize,
}

impl LinearConfig {
    /// Creates a configuration for a single bias-free projection.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            fused_projections: 1,
        }
    }

    /// Packs `count` projections of `output_dim` features into one weight.
    pub fn fused(mut self, count: usize) -> Self {
        self.fused_projections = count;
        self
    }

    /// Total number of output features produced by the layer.
    pub fn total_output_dim(&self) -> usize {
        self.output_dim * self.fused_projections
    }
}

/// Shared interface for affine projections.
pub trait LinearLayer: Send + Sync {
    /// Returns the static configuration used to validate inputs.
    fn config(&self) -> &LinearConfig;

    /// Applies the linear projection, promoting to the compute dtype when needed.
    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal initialisation.
    KaimingNormal { negative_slope: f64 },
    /// Scales another policy.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl Default for LinearInit {
    /// Kaiming uniform with `a = sqrt(5)`, i.e. `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    fn default() -> Self {
        Self::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }
}

impl LinearInit {
    /// Convenience helper to scale an existing policy.
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    /// Resolves the policy into a concrete distribution for a `[out, in]` weight.
    pub fn to_init(&self, shape: (usize, usize)) -> Init {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        match self {
            LinearInit::XavierUniform => {
                let bound = (6.0 / (fan_in + fan_out)).sqrt();
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                }
            }
            LinearInit::XavierNormal => Init::Randn {
                mean: 0.0,
                stdev: (2.0 / (fan_in + fan_out)).sqrt(),
            },
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3f64.sqrt() * gain / fan_in.sqrt();
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                }
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0 / (1.0 + negative_slope.powi(2))).sqrt();
                Init::Randn {
                    mean: 0.0,
                    stdev: gain / fan_in.sqrt(),
                }
            }
            LinearInit::Scaled { base, scale } => match base.to_init(shape) {
                Init::Uniform { lo, up } => Init::Uniform {
                    lo: lo * scale,
                    up: up * scale,
                },
                Init::Randn { mean, stdev } => Init::Randn {
                    mean: mean * scale,
                    stdev: stdev * scale,
                },
                Init::Const(value) => Init::Const(value * scale),
                other => other,
            },
        }
    }

    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let weight = match self.to_init(shape) {
            Init::Uniform { lo, up } => Tensor::rand(lo as f32, up as f32, shape, device)?,
            Init::Randn { mean, stdev } => Tensor::randn(mean as f32, stdev as f32, shape, device)?,
            Init::Const(value) => Tensor::full(value as f32, shape, device)?,
            other => return Err(Error::Msg(format!("unsupported linear init {other:?}"))),
        };
        weight.to_dtype(dtype)
    }
}

/// Bias-free dense projection with a mixed-precision aware forward pass.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
}

impl Linear {
    /// Constructs a linear layer from a pre-existing weight.
    pub fn new(config: LinearConfig, weight: Tensor) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Ok(Self { config, weight })
    }

    /// Builds a linear layer with randomly initialised weights following `init`.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample((config.total_output_dim(), config.input_dim), device, dtype)?;
        Self::new(config, weight)
    }

    /// Registers the parameter as `weight` under `vb` so it is tracked as a
    /// trainable variable when `vb` is backed by a `VarMap`.
    pub fn from_var_builder(config: LinearConfig, init: &LinearInit, vb: VarBuilder) -> Result<Self> {
        let shape = (config.total_output_dim(), config.input_dim);
        let weight = vb.get_with_hints(shape, "weight", init.to_init(shape))?;
        Self::new(config, weight)
    }

    /// Returns the weight tensor shaped `[total_output_dim, input_dim]`.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.total_output_dim(), config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, &checks::FLOAT_DTYPES)
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        checks::expect_dtype_in("linear.input", hidden, &checks::FLOAT_DTYPES)?;
        match hidden.dims() {
            [batch, seq, _] => {
                checks::expect_last_dim("linear.input", hidden, self.config.input_dim)?;
                if *batch == 0 || *seq == 0 {
                    Err(Error::Msg("batch/seq dimensions must be non-zero".into()))
                } else {
                    Ok(())
                }
            }
            [_, _] => checks::expect_last_dim("linear.input", hidden, self.config.input_dim),
            _ => Err(Error::Msg(
                "linear expects input shaped [B, T, H_in] or [T, H_in]".into(),
            )),
        }
    }
}

impl LinearLayer for Linear {
    fn config(&self) -> &LinearConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(&self.weight)?.t()?;
        let out_dim = self.config.total_output_dim();

        let output = match *input.dims() {
            [batch, seq, in_dim] => input
                .reshape((batch * seq, in_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, out_dim))?,
            _ => input.matmul(&weight_t)?,
        };

        policy.cast_to_storage(&output)
    }
}
