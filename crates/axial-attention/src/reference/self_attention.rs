//! Multi-head self-attention over `[batch, seq, dim]` tensors.
//!
//! A single fused bias-free projection produces query, key and value; heads
//! are folded into the batch axis, scores are scaled dot products between all
//! pairs of positions, values are mixed with those scores, heads are unfolded
//! and a final bias-free projection maps back to `dim`.
//!
//! With the default [`ScoreNormalization::Raw`] the scores are used as value
//! weights directly, without a softmax, and with [`ScoreScale::MergedDim`] the
//! scale is `dim^-0.5` rather than `head_dim^-0.5`. Conventional scaled
//! dot-product attention is [`ScoreScale::HeadDim`] with
//! [`ScoreNormalization::Softmax`].

use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::softmax_last_dim;
use candle_nn::VarBuilder;
use layers::{
    checks, dtypes::PrecisionPolicy, Linear, LinearConfig, LinearInit, LinearLayer,
};

use crate::core::{Attention, AttentionError, ScoreNormalization, ScoreScale};

/// Multi-head self-attention kernel with its own projection weights.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    dim: usize,
    heads: usize,
    to_qkv: Linear,
    to_out: Linear,
    policy: PrecisionPolicy,
    score_scale: ScoreScale,
    score_normalization: ScoreNormalization,
}

impl SelfAttention {
    /// Random initialisation with the default [`LinearInit`].
    pub fn new(dim: usize, heads: usize, device: &Device, dtype: DType) -> Result<Self, AttentionError> {
        Self::with_init(dim, heads, &LinearInit::default(), device, dtype)
    }

    pub fn with_init(
        dim: usize,
        heads: usize,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        validate_heads(dim, heads)?;
        let to_qkv = Linear::with_init(qkv_config(dim), init, device, dtype)?;
        let to_out = Linear::with_init(LinearConfig::new(dim, dim), init, device, dtype)?;
        Ok(Self::assemble(dim, heads, to_qkv, to_out, dtype))
    }

    /// Registers `to_qkv.weight` and `to_out.weight` under `vb`.
    pub fn from_var_builder(dim: usize, heads: usize, vb: VarBuilder) -> Result<Self, AttentionError> {
        validate_heads(dim, heads)?;
        let init = LinearInit::default();
        let dtype = vb.dtype();
        let to_qkv = Linear::from_var_builder(qkv_config(dim), &init, vb.pp("to_qkv"))?;
        let to_out = Linear::from_var_builder(LinearConfig::new(dim, dim), &init, vb.pp("to_out"))?;
        Ok(Self::assemble(dim, heads, to_qkv, to_out, dtype))
    }

    /// Builds the kernel from explicit weights.
    ///
    /// `qkv_weight` is `[3 * dim, dim]` with query, key and value rows stacked
    /// in that order; `out_weight` is `[dim, dim]`.
    pub fn from_weights(
        dim: usize,
        heads: usize,
        qkv_weight: Tensor,
        out_weight: Tensor,
    ) -> Result<Self, AttentionError> {
        validate_heads(dim, heads)?;
        let dtype = qkv_weight.dtype();
        let to_qkv = Linear::new(qkv_config(dim), qkv_weight)?;
        let to_out = Linear::new(LinearConfig::new(dim, dim), out_weight.to_dtype(dtype)?)?;
        Ok(Self::assemble(dim, heads, to_qkv, to_out, dtype))
    }

    fn assemble(dim: usize, heads: usize, to_qkv: Linear, to_out: Linear, dtype: DType) -> Self {
        Self {
            dim,
            heads,
            to_qkv,
            to_out,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            score_scale: ScoreScale::default(),
            score_normalization: ScoreNormalization::default(),
        }
    }

    pub fn with_score_scale(mut self, score_scale: ScoreScale) -> Self {
        self.score_scale = score_scale;
        self
    }

    pub fn with_score_normalization(mut self, score_normalization: ScoreNormalization) -> Self {
        self.score_normalization = score_normalization;
        self
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    pub fn head_dim(&self) -> usize {
        self.dim / self.heads
    }

    pub fn score_scale(&self) -> ScoreScale {
        self.score_scale
    }

    pub fn score_normalization(&self) -> ScoreNormalization {
        self.score_normalization
    }

    /// Fused query/key/value projection.
    pub fn to_qkv(&self) -> &Linear {
        &self.to_qkv
    }

    /// Output projection.
    pub fn to_out(&self) -> &Linear {
        &self.to_out
    }

    /// Factor applied to every query/key dot product.
    pub fn scale(&self) -> f64 {
        let width = match self.score_scale {
            ScoreScale::MergedDim => self.dim,
            ScoreScale::HeadDim => self.head_dim(),
        };
        (width as f64).powf(-0.5)
    }

    /// `[batch, seq, dim]` -> `[batch * heads, seq, head_dim]`.
    fn merge_heads(&self, x: &Tensor, batch: usize, seq: usize) -> candle_core::Result<Tensor> {
        x.reshape((batch, seq, self.heads, self.head_dim()))?
            .transpose(1, 2)?
            .reshape((batch * self.heads, seq, self.head_dim()))
    }

    /// `[batch * heads, seq, head_dim]` -> `[batch, seq, dim]`.
    fn split_heads(&self, x: &Tensor, batch: usize, seq: usize) -> candle_core::Result<Tensor> {
        x.reshape((batch, self.heads, seq, self.head_dim()))?
            .transpose(1, 2)?
            .reshape((batch, seq, self.dim))
    }

    /// Attention-weighted values with heads unfolded, left in the compute dtype.
    fn mix_values(&self, x: &Tensor, batch: usize, seq: usize) -> candle_core::Result<Tensor> {
        let qkv = self.to_qkv.forward(x, &self.policy)?;
        let qkv = self.policy.cast_for_matmul(&qkv)?;
        let chunks = qkv.chunk(3, D::Minus1)?;
        let q = self.merge_heads(&chunks[0], batch, seq)?;
        let k = self.merge_heads(&chunks[1], batch, seq)?;
        let v = self.merge_heads(&chunks[2], batch, seq)?;

        let scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(self.scale(), 0.0)?;
        let weights = match self.score_normalization {
            ScoreNormalization::Raw => scores,
            ScoreNormalization::Softmax => softmax_last_dim(&scores)?,
        };
        let mixed = weights.matmul(&v)?;
        self.split_heads(&mixed, batch, seq)
    }
}

impl Attention for SelfAttention {
    fn dim(&self) -> usize {
        self.dim
    }

    fn attend(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        checks::expect_dtype_in("self_attention.input", x, &checks::FLOAT_DTYPES).map_err(|_| {
            AttentionError::UnsupportedDType {
                requested: format!("{:?}", x.dtype()),
            }
        })?;
        let (batch, seq, dim) = x.dims3().map_err(|_| {
            AttentionError::shape(format!(
                "self-attention expects [batch, seq, {}], got {:?}",
                self.dim,
                x.dims()
            ))
        })?;
        if dim != self.dim {
            return Err(AttentionError::shape(format!(
                "self-attention expects channel width {}, got {dim}",
                self.dim
            )));
        }

        let merged = self.mix_values(x, batch, seq)?;
        let output = self.to_out.forward(&merged, &self.policy)?;
        Ok(output.to_dtype(x.dtype())?)
    }
}

fn qkv_config(dim: usize) -> LinearConfig {
    LinearConfig::new(dim, dim).fused(3)
}

fn validate_heads(dim: usize, heads: usize) -> Result<(), AttentionError> {
    if dim == 0 || heads == 0 {
        return Err(AttentionError::InvalidConfig(format!(
            "dim ({dim}) and heads ({heads}) must be greater than zero"
        )));
    }
    if dim % heads != 0 {
        return Err(AttentionError::InvalidConfig(format!(
            "hidden dimension {dim} must be divisible by number of heads {heads}"
        )));
    }
    Ok(())
}
