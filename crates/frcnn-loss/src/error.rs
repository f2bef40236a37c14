//! Error types for Faster R-CNN loss computation.

use thiserror::Error;

/// Errors reported when loss inputs do not follow the packed channel layout.
///
/// The individual losses panic with the [`Display`](std::fmt::Display) text of these
/// errors, while [`FasterRcnnLoss`](crate::FasterRcnnLoss) returns them to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FasterRcnnLossError {
    /// The channel (last) dimension of a tensor does not match the configured layout.
    #[error("{loss}: {tensor} channel dimension must be {expected}, got {actual}")]
    ChannelMismatch {
        loss: &'static str,
        tensor: &'static str,
        expected: String,
        actual: usize,
    },

    /// Leading (non-channel) dimensions of `y_true` and `y_pred` differ.
    #[error("{loss}: leading dimensions of y_true {target_shape:?} do not match y_pred {pred_shape:?}")]
    IncompatibleShapes {
        loss: &'static str,
        target_shape: Vec<usize>,
        pred_shape: Vec<usize>,
    },

    /// A configuration value is out of range.
    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },
}

impl FasterRcnnLossError {
    /// Compares every dimension except the last one.
    pub(crate) fn check_leading_dims(
        loss: &'static str,
        target_shape: &[usize],
        pred_shape: &[usize],
    ) -> Result<(), Self> {
        let (target_leading, pred_leading) = (
            &target_shape[..target_shape.len() - 1],
            &pred_shape[..pred_shape.len() - 1],
        );
        if target_leading == pred_leading {
            Ok(())
        } else {
            Err(Self::IncompatibleShapes {
                loss,
                target_shape: target_shape.to_vec(),
                pred_shape: pred_shape.to_vec(),
            })
        }
    }
}
