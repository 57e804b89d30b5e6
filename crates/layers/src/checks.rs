//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Floating point dtypes accepted by projection weights and activations.
pub const FLOAT_DTYPES: [DType; 4] = [DType::F16, DType::BF16, DType::F32, DType::F64];

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Ensures the trailing dimension equals `dim`.
pub fn expect_last_dim(label: &str, tensor: &Tensor, dim: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&last) if last == dim => Ok(()),
        _ => Err(Error::Msg(format!(
            "{label}: expected trailing dimension {dim}, got shape {:?}",
            tensor.dims()
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn shape_checks_report_the_label() -> Result<()> {
        let tensor = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu)?;
        expect_rank("x", &tensor, 3)?;
        expect_shape("x", &tensor, &[2, 3, 4])?;
        expect_last_dim("x", &tensor, 4)?;

        let err = expect_shape("proj.weight", &tensor, &[2, 4]).unwrap_err();
        assert!(err.to_string().contains("proj.weight"));
        assert!(expect_rank("x", &tensor, 2).is_err());
        assert!(expect_last_dim("x", &tensor, 3).is_err());
        Ok(())
    }

    #[test]
    fn integer_dtypes_are_rejected() -> Result<()> {
        let tensor = Tensor::zeros(4, DType::U32, &Device::Cpu)?;
        assert!(expect_dtype_in("x", &tensor, &FLOAT_DTYPES).is_err());
        let tensor = tensor.to_dtype(DType::BF16)?;
        expect_dtype_in("x", &tensor, &FLOAT_DTYPES)
    }
}
