//! Axis permutations that make each content axis attendable.
//!
//! For a tensor of rank `num_dimensions + 2` (batch first, one channel axis
//! somewhere after it) every content axis gets an [`AxialPlan`]: a
//! permutation that keeps the remaining axes in ascending order and moves the
//! content axis and then the channel axis to the end, plus the inverse that
//! restores the original order. Only index arithmetic happens here; no tensor
//! data is touched.

use crate::core::AttentionError;

/// Permutation pair for one axial pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxialPlan {
    /// The content axis attended over in this pass, in original numbering.
    pub axis: usize,
    /// Ordering that yields `[rest.., axis, channel]`.
    pub permutation: Vec<usize>,
    /// Satisfies `inverse[permutation[k]] == k`.
    pub inverse: Vec<usize>,
}

/// Resolve a possibly negative axis against `rank`.
///
/// Strictly positive values are taken as-is; zero and negative values are
/// offset by `rank`, so `-1` is the last axis and `0` resolves to `rank`,
/// which is out of range. Returns `None` when the result is not in `[0, rank)`.
pub fn normalize_axis(axis: isize, rank: usize) -> Option<usize> {
    let rank = isize::try_from(rank).ok()?;
    let resolved = if axis > 0 { axis } else { axis + rank };
    if (0..rank).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// Whether `candidate` is a bijection on `[0, candidate.len())`.
pub fn is_permutation(candidate: &[usize]) -> bool {
    let mut seen = vec![false; candidate.len()];
    for &index in candidate {
        match seen.get_mut(index) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// Inverse of a valid permutation.
pub fn invert_permutation(permutation: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; permutation.len()];
    for (position, &axis) in permutation.iter().enumerate() {
        inverse[axis] = position;
    }
    inverse
}

/// Compute one [`AxialPlan`] per content axis, in ascending axis order.
///
/// `dim_index` is resolved with [`normalize_axis`] against
/// `num_dimensions + 2`; it must land on a non-batch axis.
pub fn calculate_permutations(
    num_dimensions: usize,
    dim_index: isize,
) -> Result<Vec<AxialPlan>, AttentionError> {
    if num_dimensions == 0 {
        return Err(AttentionError::InvalidConfig(
            "num_dimensions must be at least 1".to_string(),
        ));
    }
    let total_dimensions = num_dimensions.checked_add(2).ok_or_else(|| {
        AttentionError::InvalidConfig(format!(
            "num_dimensions {num_dimensions} overflows the tensor rank"
        ))
    })?;
    let channel = match normalize_axis(dim_index, total_dimensions) {
        Some(0) => {
            return Err(AttentionError::InvalidConfig(format!(
                "dim_index {dim_index} resolves to the batch axis"
            )))
        }
        Some(channel) => channel,
        None => {
            return Err(AttentionError::InvalidConfig(format!(
                "dim_index {dim_index} is out of range for rank {total_dimensions}"
            )))
        }
    };

    let plans = (1..total_dimensions)
        .filter(|&axis| axis != channel)
        .map(|axis| {
            let mut permutation: Vec<usize> = (0..total_dimensions)
                .filter(|&other| other != axis && other != channel)
                .collect();
            permutation.extend([axis, channel]);
            let inverse = invert_permutation(&permutation);
            AxialPlan {
                axis,
                permutation,
                inverse,
            }
        })
        .collect();
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(permutation: &[usize], items: &[usize]) -> Vec<usize> {
        permutation.iter().map(|&index| items[index]).collect()
    }

    #[test]
    fn channel_last_2d_plans() -> Result<(), AttentionError> {
        let plans = calculate_permutations(2, -1)?;
        assert_eq!(
            plans,
            vec![
                AxialPlan {
                    axis: 1,
                    permutation: vec![0, 2, 1, 3],
                    inverse: vec![0, 2, 1, 3],
                },
                AxialPlan {
                    axis: 2,
                    permutation: vec![0, 1, 2, 3],
                    inverse: vec![0, 1, 2, 3],
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn channel_first_plans_move_channel_last() -> Result<(), AttentionError> {
        let plans = calculate_permutations(2, 1)?;
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].axis, 2);
        assert_eq!(plans[0].permutation, vec![0, 3, 2, 1]);
        assert_eq!(plans[0].inverse, vec![0, 3, 2, 1]);
        assert_eq!(plans[1].axis, 3);
        assert_eq!(plans[1].permutation, vec![0, 2, 3, 1]);
        assert_eq!(plans[1].inverse, vec![0, 3, 1, 2]);
        Ok(())
    }

    #[test]
    fn every_plan_round_trips_to_identity() -> Result<(), AttentionError> {
        for num_dimensions in 1..=5usize {
            let rank = num_dimensions + 2;
            let identity: Vec<usize> = (0..rank).collect();
            let channel_axes = (1..rank as isize).chain(-(rank as isize) + 1..0);
            for dim_index in channel_axes {
                let plans = calculate_permutations(num_dimensions, dim_index)?;
                assert_eq!(plans.len(), num_dimensions);
                let channel = normalize_axis(dim_index, rank).unwrap();
                for plan in &plans {
                    assert!(is_permutation(&plan.permutation));
                    assert_eq!(plan.permutation[0], 0, "batch axis stays first");
                    assert_eq!(plan.permutation[rank - 2], plan.axis);
                    assert_eq!(plan.permutation[rank - 1], channel);
                    let permuted = apply(&plan.permutation, &identity);
                    assert_eq!(apply(&plan.inverse, &permuted), identity);
                    let inverted = apply(&plan.inverse, &identity);
                    assert_eq!(apply(&plan.permutation, &inverted), identity);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn oversized_rank_is_rejected_without_overflow() {
        let err = calculate_permutations(usize::MAX, -1).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig(ref msg) if msg.contains("overflows")));
    }

    #[test]
    fn plans_enumerate_axes_in_ascending_order_skipping_channel() -> Result<(), AttentionError> {
        let axes: Vec<usize> = calculate_permutations(4, 3)?
            .into_iter()
            .map(|plan| plan.axis)
            .collect();
        assert_eq!(axes, vec![1, 2, 4, 5]);
        Ok(())
    }

    #[test]
    fn normalization_follows_trailing_convention() {
        assert_eq!(normalize_axis(-1, 4), Some(3));
        assert_eq!(normalize_axis(-4, 4), Some(0));
        assert_eq!(normalize_axis(2, 4), Some(2));
        assert_eq!(normalize_axis(0, 4), None);
        assert_eq!(normalize_axis(4, 4), None);
        assert_eq!(normalize_axis(-5, 4), None);
    }

    #[test]
    fn unsupported_configurations_are_rejected() {
        assert!(matches!(
            calculate_permutations(0, -1),
            Err(AttentionError::InvalidConfig(_))
        ));
        assert!(matches!(
            calculate_permutations(2, -4),
            Err(AttentionError::InvalidConfig(_))
        ));
        assert!(matches!(
            calculate_permutations(2, 0),
            Err(AttentionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn permutation_checks() {
        assert!(is_permutation(&[2, 0, 1]));
        assert!(!is_permutation(&[0, 0, 1]));
        assert!(!is_permutation(&[0, 3, 1]));
        assert_eq!(invert_permutation(&[2, 0, 1]), vec![1, 2, 0]);
    }
}
