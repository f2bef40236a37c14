//! Training losses for Faster R-CNN style two-stage object detectors.
//!
//! This crate provides the four objectives of a region proposal network (RPN) plus
//! detection head, built on the Burn deep learning framework. Every loss is a plain
//! tensor expression, so it runs on any Burn backend and is differentiable with respect
//! to the predictions on any autodiff backend.
//!
//! ## Loss Functions
//!
//! ### Region Proposal Network
//! - **[`RpnClassificationLoss`]**: Mask-normalised binary cross-entropy on anchor objectness
//! - **[`RpnRegressionLoss`]**: Mask-normalised smooth-L1 on anchor box offsets
//!
//! ### Detection Head
//! - **[`ClassificationLoss`]**: Categorical cross-entropy averaged over proposals
//! - **[`ClassRegressionLoss`]**: Mask-normalised smooth-L1 on class-specific box offsets
//!
//! ### Building Blocks
//! - **[`MaskedSmoothL1Loss`]**: The smooth-L1 criterion shared by both regression losses
//! - **[`FasterRcnnLoss`]**: Weighted sum of all four terms with a per-term breakdown
//!
//! ## Packed Targets
//!
//! Masked losses read their mask from the leading channels of `y_true`, so a single
//! ground-truth tensor carries both which elements participate and what they should be:
//!
//! | Loss | `y_true` channels | `y_pred` channels |
//! |------|-------------------|-------------------|
//! | RPN classification | `[mask A][target A]` | `A` |
//! | RPN regression | `[mask 4A][target 4A]` | `4A` |
//! | Class regression | `[mask 4C][target 4C]` | `4C` |
//!
//! The masked losses divide by `sum(mask) + eps`, so a batch with no active anchor
//! yields a loss of exactly zero.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, tensor::{Tensor, TensorData}};
//! use frcnn_loss::RpnRegressionLossConfig;
//!
//! let device = Default::default();
//! let loss = RpnRegressionLossConfig::new().with_anchors(1).init();
//!
//! let y_true = Tensor::<NdArray, 4>::from_data(
//!     TensorData::from([[[[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]]]]),
//!     &device,
//! );
//! let y_pred = Tensor::<NdArray, 4>::from_data(TensorData::from([[[[0.5, 0.5, 0.5, 0.5]]]]), &device);
//!
//! let value = loss.forward(y_true, y_pred);
//! assert_eq!(value.dims(), [1]);
//! ```

mod class_regression;
mod classification;
mod error;
mod faster_rcnn;
mod masked;
mod rpn_classification;
mod rpn_regression;
mod smooth_l1;

pub use class_regression::{ClassRegressionLoss, ClassRegressionLossConfig};
pub use classification::{ClassificationLoss, ClassificationLossConfig};
pub use error::FasterRcnnLossError;
pub use faster_rcnn::{FasterRcnnLoss, FasterRcnnLossConfig, FasterRcnnTensors, LossWeightsConfig};
pub use rpn_classification::{RpnClassificationLoss, RpnClassificationLossConfig};
pub use rpn_regression::{RpnRegressionLoss, RpnRegressionLossConfig};
pub use smooth_l1::{MaskedSmoothL1Loss, MaskedSmoothL1LossConfig};
