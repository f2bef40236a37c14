//! Mask-weighted normalisation shared by the RPN and box regression losses.

use burn::tensor::{backend::Backend, Tensor};

/// Sums an already mask-weighted loss and divides by the number of active mask entries.
///
/// `epsilon` keeps the denominator positive, so an all-zero mask yields exactly `0`.
pub(crate) fn masked_mean<const D: usize, B: Backend>(
    weighted: Tensor<B, D>,
    mask: Tensor<B, D>,
    epsilon: f64,
) -> Tensor<B, 1> {
    weighted.sum() / mask.sum().add_scalar(epsilon)
}
