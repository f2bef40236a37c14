//! Objectness loss of the region proposal network.
//!
//! `y_true` packs a per-anchor validity mask and the binary objectness target along the
//! channel axis:
//! ```text
//! y_true[..., 0..A]   mask (1 = anchor contributes, 0 = ignored)
//! y_true[..., A..2A]  target (1 = foreground, 0 = background)
//! y_pred[..., 0..A]   predicted objectness probability
//! ```
//! The loss is binary cross-entropy weighted by the mask and normalised by the mask:
//! ```text
//! Loss = sum(mask * BCE(target, pred)) / (sum(mask) + eps)
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

use crate::{error::FasterRcnnLossError, masked::masked_mean};

const NAME: &str = "RpnClassificationLoss";

/// Configuration for creating a [RPN classification loss](RpnClassificationLoss).
#[derive(Config, Debug)]
pub struct RpnClassificationLossConfig {
    /// Anchors per sliding position (scales × aspect ratios). Default: 9
    #[config(default = 9)]
    pub anchors: usize,
    /// Clamp bound for probabilities and normalisation epsilon. Default: 1e-7
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl RpnClassificationLossConfig {
    /// Initialize [RPN classification loss](RpnClassificationLoss).
    pub fn init(&self) -> RpnClassificationLoss {
        self.assertions();
        RpnClassificationLoss {
            anchors: self.anchors,
            epsilon: self.epsilon,
        }
    }

    fn assertions(&self) {
        assert!(
            self.anchors > 0,
            "Anchors for RpnClassificationLoss must be positive, got {}",
            self.anchors
        );
        assert!(
            self.epsilon > 0.0 && self.epsilon < 0.5,
            "Epsilon for RpnClassificationLoss must be in (0, 0.5), got {}",
            self.epsilon
        );
    }
}

/// Mask-normalised binary cross-entropy over anchor objectness scores.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct RpnClassificationLoss {
    /// Anchors per sliding position.
    pub anchors: usize,
    /// Probability clamp bound and normalisation epsilon.
    pub epsilon: f64,
}

impl Default for RpnClassificationLoss {
    fn default() -> Self {
        RpnClassificationLossConfig::new().init()
    }
}

impl ModuleDisplay for RpnClassificationLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("anchors", &self.anchors)
            .add("epsilon", &self.epsilon)
            .optional()
    }
}

impl RpnClassificationLoss {
    /// Create a new RPN classification loss for `anchors` anchors per position.
    pub fn new(anchors: usize) -> Self {
        RpnClassificationLossConfig::new()
            .with_anchors(anchors)
            .init()
    }

    /// Compute the mask-normalised loss.
    ///
    /// # Shapes
    ///
    /// - y_true: `[batch, height, width, >= 2 * anchors]`
    /// - y_pred: `[batch, height, width, >= anchors]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(y_true.clone(), y_pred);
        let mask = y_true.narrow(3, 0, self.anchors);
        masked_mean(loss, mask, self.epsilon)
    }

    /// Compute the masked elementwise binary cross-entropy without reduction.
    ///
    /// Masked-out anchors are zeroed before any summation takes place.
    ///
    /// # Shapes
    ///
    /// - y_true: `[batch, height, width, >= 2 * anchors]`
    /// - y_pred: `[batch, height, width, >= anchors]`
    /// - output: `[batch, height, width, anchors]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        y_true: Tensor<B, 4>,
        y_pred: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.assertions(&y_true, &y_pred);

        let mask = y_true.clone().narrow(3, 0, self.anchors);
        let target = y_true.narrow(3, self.anchors, self.anchors);
        let prob = y_pred
            .narrow(3, 0, self.anchors)
            .clamp(self.epsilon, 1.0 - self.epsilon);

        let log_prob = prob.clone().log();
        let log_not_prob = prob.neg().add_scalar(1.0).log();
        let bce = (target.clone() * log_prob + target.neg().add_scalar(1.0) * log_not_prob).neg();

        mask * bce
    }

    /// Checks the channel layout of `y_true` and `y_pred` against the anchor count.
    pub fn validate(
        &self,
        target_shape: &[usize],
        pred_shape: &[usize],
    ) -> Result<(), FasterRcnnLossError> {
        let pred_channels = pred_shape[pred_shape.len() - 1];
        if pred_channels < self.anchors {
            return Err(FasterRcnnLossError::ChannelMismatch {
                loss: NAME,
                tensor: "y_pred",
                expected: format!("at least {}", self.anchors),
                actual: pred_channels,
            });
        }

        let target_channels = target_shape[target_shape.len() - 1];
        if target_channels < 2 * self.anchors {
            return Err(FasterRcnnLossError::ChannelMismatch {
                loss: NAME,
                tensor: "y_true",
                expected: format!("at least {}", 2 * self.anchors),
                actual: target_channels,
            });
        }

        FasterRcnnLossError::check_leading_dims(NAME, target_shape, pred_shape)
    }

    fn assertions<B: Backend>(&self, y_true: &Tensor<B, 4>, y_pred: &Tensor<B, 4>) {
        if let Err(err) = self.validate(&y_true.dims(), &y_pred.dims()) {
            panic!("{err}");
        }
    }
}
