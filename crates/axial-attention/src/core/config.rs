//! Configuration options for axial attention.
//!
//! [`AxialConfig`] captures the structural hyper-parameters (channel width,
//! number of content axes, heads, channel axis) plus the two scoring knobs
//! that select the score scale and whether a softmax is applied. The
//! struct deserialises from JSON or TOML and can be tweaked at run time
//! through environment overrides.

use std::{fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::core::AttentionError;
use crate::permutation::normalize_axis;

/// Environment variable overriding [`AxialConfig::score_normalization`].
pub const ENV_SCORE_NORMALIZATION: &str = "AXIAL_SCORE_NORMALIZATION";
/// Environment variable overriding [`AxialConfig::score_scale`].
pub const ENV_SCORE_SCALE: &str = "AXIAL_SCORE_SCALE";

/// Serialises tests that mutate the scoring environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Width used to scale the query/key dot products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScale {
    /// `dim^-0.5` with `dim` the full channel width before the head split.
    #[default]
    MergedDim,
    /// `head_dim^-0.5`, the conventional scaled dot-product factor.
    HeadDim,
}

/// How scaled scores are turned into value weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreNormalization {
    /// Scaled scores weight the values directly; rows do not sum to one.
    #[default]
    Raw,
    /// Softmax over the key axis.
    Softmax,
}

impl FromStr for ScoreScale {
    type Err = AttentionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merged" | "merged_dim" => Ok(Self::MergedDim),
            "head" | "head_dim" => Ok(Self::HeadDim),
            other => Err(AttentionError::InvalidConfig(format!(
                "unknown score scale '{other}' (expected merged|head)"
            ))),
        }
    }
}

impl FromStr for ScoreNormalization {
    type Err = AttentionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" | "none" => Ok(Self::Raw),
            "softmax" => Ok(Self::Softmax),
            other => Err(AttentionError::InvalidConfig(format!(
                "unknown score normalization '{other}' (expected raw|softmax)"
            ))),
        }
    }
}

/// Configuration driving [`AxialAttention`](crate::AxialAttention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxialConfig {
    /// Channel width; the extent of the input along `dim_index`.
    pub dim: usize,
    /// Number of content axes, excluding batch and channel.
    #[serde(default = "default_num_dimensions")]
    pub num_dimensions: usize,
    /// Attention heads per axial kernel. Must divide `dim`.
    #[serde(default = "default_heads")]
    pub heads: usize,
    /// Channel axis; negative values count from the end.
    #[serde(default = "default_dim_index")]
    pub dim_index: isize,
    #[serde(default)]
    pub score_scale: ScoreScale,
    #[serde(default)]
    pub score_normalization: ScoreNormalization,
}

impl AxialConfig {
    /// Channel-last 2D configuration with eight heads.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            num_dimensions: default_num_dimensions(),
            heads: default_heads(),
            dim_index: default_dim_index(),
            score_scale: ScoreScale::default(),
            score_normalization: ScoreNormalization::default(),
        }
    }

    pub fn with_num_dimensions(mut self, num_dimensions: usize) -> Self {
        self.num_dimensions = num_dimensions;
        self
    }

    pub fn with_heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    pub fn with_dim_index(mut self, dim_index: isize) -> Self {
        self.dim_index = dim_index;
        self
    }

    pub fn with_score_scale(mut self, score_scale: ScoreScale) -> Self {
        self.score_scale = score_scale;
        self
    }

    pub fn with_score_normalization(mut self, score_normalization: ScoreNormalization) -> Self {
        self.score_normalization = score_normalization;
        self
    }

    /// Rank of the tensors the module accepts: content axes plus batch and channel.
    ///
    /// `None` when `num_dimensions` is too large for the rank to be represented.
    pub fn total_dimensions(&self) -> Option<usize> {
        self.num_dimensions.checked_add(2)
    }

    /// Absolute channel axis, or `None` when `dim_index` falls outside the rank.
    pub fn resolved_dim_index(&self) -> Option<usize> {
        normalize_axis(self.dim_index, self.total_dimensions()?)
    }

    /// Per-head channel width.
    pub fn head_dim(&self) -> usize {
        if self.heads == 0 {
            0
        } else {
            self.dim / self.heads
        }
    }

    /// Check every structural invariant, reporting all violations at once.
    pub fn validate(&self) -> Result<(), AttentionError> {
        let mut errors = Vec::new();

        if self.dim == 0 {
            errors.push("dim must be greater than 0".to_string());
        }
        if self.heads == 0 {
            errors.push("heads must be greater than 0".to_string());
        } else if self.dim % self.heads != 0 {
            errors.push(format!(
                "hidden dimension {} must be divisible by number of heads {}",
                self.dim, self.heads
            ));
        }
        if self.num_dimensions == 0 {
            errors.push("num_dimensions must be at least 1".to_string());
        }
        match self.total_dimensions() {
            None => errors.push(format!(
                "num_dimensions {} overflows the tensor rank",
                self.num_dimensions
            )),
            Some(rank) => match normalize_axis(self.dim_index, rank) {
                None => errors.push(format!(
                    "dim_index {} is out of range for rank {rank}",
                    self.dim_index
                )),
                Some(0) => errors.push(format!(
                    "dim_index {} resolves to the batch axis",
                    self.dim_index
                )),
                Some(_) => {}
            },
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AttentionError::InvalidConfig(errors.join("; ")))
        }
    }

    /// Load and validate a configuration from a `.json` or `.toml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AttentionError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: AxialConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|err| {
                AttentionError::InvalidConfig(format!("{}: {err}", path.display()))
            })?,
            Some("toml") | None => toml::from_str(&contents).map_err(|err| {
                AttentionError::InvalidConfig(format!("{}: {err}", path.display()))
            })?,
            Some(other) => {
                return Err(AttentionError::InvalidConfig(format!(
                    "unsupported configuration extension '{other}'"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply `AXIAL_SCORE_NORMALIZATION` / `AXIAL_SCORE_SCALE` when set.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(ENV_SCORE_NORMALIZATION) {
            match raw.parse() {
                Ok(value) => self.score_normalization = value,
                Err(err) => log::warn!("ignoring {ENV_SCORE_NORMALIZATION}: {err}"),
            }
        }
        if let Ok(raw) = std::env::var(ENV_SCORE_SCALE) {
            match raw.parse() {
                Ok(value) => self.score_scale = value,
                Err(err) => log::warn!("ignoring {ENV_SCORE_SCALE}: {err}"),
            }
        }
    }
}

impl fmt::Display for AxialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dim={} num_dimensions={} heads={} dim_index={} score_scale={:?} score_normalization={:?}",
            self.dim,
            self.num_dimensions,
            self.heads,
            self.dim_index,
            self.score_scale,
            self.score_normalization
        )
    }
}

fn default_num_dimensions() -> usize {
    2
}

fn default_heads() -> usize {
    8
}

fn default_dim_index() -> isize {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_follow_channel_last_2d_layout() {
        let config = AxialConfig::new(64);
        assert_eq!(config.num_dimensions, 2);
        assert_eq!(config.heads, 8);
        assert_eq!(config.dim_index, -1);
        assert_eq!(config.total_dimensions(), Some(4));
        assert_eq!(config.resolved_dim_index(), Some(3));
        assert_eq!(config.head_dim(), 8);
        assert_eq!(config.score_scale, ScoreScale::MergedDim);
        assert_eq!(config.score_normalization, ScoreNormalization::Raw);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn indivisible_heads_are_rejected() {
        let err = AxialConfig::new(10).with_heads(3).validate().unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig(ref msg) if msg.contains("divisible")));
    }

    #[test]
    fn batch_and_out_of_range_channel_axes_are_rejected() {
        let config = |dim_index| AxialConfig::new(4).with_heads(2).with_dim_index(dim_index);

        // -4 + 4 lands on the batch axis.
        let err = config(-4).validate().unwrap_err().to_string();
        assert_eq!(err, "invalid configuration: dim_index -4 resolves to the batch axis");

        // Zero is not treated as positive, so it resolves to the rank itself.
        for dim_index in [0, 4, -5] {
            let err = config(dim_index).validate().unwrap_err().to_string();
            assert_eq!(
                err,
                format!("invalid configuration: dim_index {dim_index} is out of range for rank 4")
            );
        }

        assert!(config(1).validate().is_ok());
        assert!(config(-1).validate().is_ok());
    }

    #[test]
    fn oversized_num_dimensions_is_a_config_error() {
        let config = AxialConfig::new(4).with_heads(2).with_num_dimensions(usize::MAX);
        assert_eq!(config.total_dimensions(), None);
        assert_eq!(config.resolved_dim_index(), None);

        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, AttentionError::InvalidConfig(ref msg) if msg.contains("overflows the tensor rank")),
            "{err}"
        );
    }

    #[test]
    fn validation_collects_every_violation() {
        let err = AxialConfig::new(0)
            .with_heads(0)
            .with_num_dimensions(0)
            .validate()
            .unwrap_err()
            .to_string();
        assert!(err.contains("dim must be greater than 0"));
        assert!(err.contains("heads must be greater than 0"));
        assert!(err.contains("num_dimensions must be at least 1"));
    }

    #[test]
    fn loads_toml_with_defaults() -> Result<(), AttentionError> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "dim = 16\nheads = 4\nscore_normalization = \"softmax\"")?;

        let config = AxialConfig::from_path(file.path())?;
        assert_eq!(config.dim, 16);
        assert_eq!(config.heads, 4);
        assert_eq!(config.num_dimensions, 2);
        assert_eq!(config.dim_index, -1);
        assert_eq!(config.score_normalization, ScoreNormalization::Softmax);
        assert_eq!(config.score_scale, ScoreScale::MergedDim);
        Ok(())
    }

    #[test]
    fn loads_json_and_validates() -> Result<(), AttentionError> {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
        write!(
            file,
            r#"{{"dim": 12, "num_dimensions": 3, "heads": 5, "dim_index": 1}}"#
        )?;
        let err = AxialConfig::from_path(file.path()).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig(_)));

        let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
        write!(
            file,
            r#"{{"dim": 12, "num_dimensions": 3, "heads": 4, "dim_index": 1, "score_scale": "head_dim"}}"#
        )?;
        let config = AxialConfig::from_path(file.path())?;
        assert_eq!(config.total_dimensions(), Some(5));
        assert_eq!(config.resolved_dim_index(), Some(1));
        assert_eq!(config.score_scale, ScoreScale::HeadDim);
        Ok(())
    }

    #[test]
    fn unknown_extension_is_rejected() -> Result<(), AttentionError> {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
        let err = AxialConfig::from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("yaml"));
        Ok(())
    }

    #[test]
    fn scoring_modes_parse_from_strings() {
        assert_eq!("Softmax".parse::<ScoreNormalization>().ok(), Some(ScoreNormalization::Softmax));
        assert_eq!(" raw ".parse::<ScoreNormalization>().ok(), Some(ScoreNormalization::Raw));
        assert_eq!("head".parse::<ScoreScale>().ok(), Some(ScoreScale::HeadDim));
        assert_eq!("merged_dim".parse::<ScoreScale>().ok(), Some(ScoreScale::MergedDim));
        assert!("sparsemax".parse::<ScoreNormalization>().is_err());
    }

    #[test]
    fn env_overrides_replace_scoring_modes() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::env::set_var(ENV_SCORE_NORMALIZATION, "softmax");
        std::env::set_var(ENV_SCORE_SCALE, "bogus");
        let mut config = AxialConfig::new(8);
        config.apply_env_overrides();
        std::env::remove_var(ENV_SCORE_NORMALIZATION);
        std::env::remove_var(ENV_SCORE_SCALE);

        assert_eq!(config.score_normalization, ScoreNormalization::Softmax);
        assert_eq!(config.score_scale, ScoreScale::MergedDim);
    }
}
