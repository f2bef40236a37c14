//! Classification loss of the detection head.
//!
//! Every proposal contributes, so there is no mask: the per-proposal categorical
//! cross-entropy is averaged over all proposals of all images.
//! ```text
//! Loss = mean_n( -sum_c y_true[n, c] * log(y_pred[n, c]) )
//! ```
//! Predictions are probability distributions (typically softmax outputs). They are
//! renormalised along the class axis and clamped to `[eps, 1 - eps]` before the log.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

/// Configuration for creating a [classification loss](ClassificationLoss).
#[derive(Config, Debug)]
pub struct ClassificationLossConfig {
    /// Probability clamp bound. Default: 1e-7
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl ClassificationLossConfig {
    /// Initialize [classification loss](ClassificationLoss).
    pub fn init(&self) -> ClassificationLoss {
        assert!(
            self.epsilon > 0.0 && self.epsilon < 0.5,
            "Epsilon for ClassificationLoss must be in (0, 0.5), got {}",
            self.epsilon
        );
        ClassificationLoss {
            epsilon: self.epsilon,
        }
    }
}

/// Mean categorical cross-entropy over detection proposals.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct ClassificationLoss {
    /// Probability clamp bound.
    pub epsilon: f64,
}

impl Default for ClassificationLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for ClassificationLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("epsilon", &self.epsilon).optional()
    }
}

impl ClassificationLoss {
    /// Create a new classification loss with default configuration.
    pub fn new() -> Self {
        ClassificationLossConfig::new().init()
    }

    /// Compute the cross-entropy averaged over every proposal.
    ///
    /// # Shapes
    ///
    /// - y_true: `[...dims, classes]` (one-hot)
    /// - y_pred: `[...dims, classes]`
    /// - output: `[1]`
    pub fn forward<const D: usize, B: Backend>(
        &self,
        y_true: Tensor<B, D>,
        y_pred: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        self.forward_no_reduction(y_true, y_pred).mean()
    }

    /// Compute the per-proposal cross-entropy.
    ///
    /// # Shapes
    ///
    /// - y_true: `[...dims, classes]` (one-hot)
    /// - y_pred: `[...dims, classes]`
    /// - output: `[...dims, 1]`
    pub fn forward_no_reduction<const D: usize, B: Backend>(
        &self,
        y_true: Tensor<B, D>,
        y_pred: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let target_dims = y_true.dims();
        let pred_dims = y_pred.dims();
        assert_eq!(
            target_dims, pred_dims,
            "Shape of y_true ({target_dims:?}) must match y_pred ({pred_dims:?})"
        );

        let probs = y_pred.clone() / y_pred.sum_dim(D - 1);
        let log_probs = probs.clamp(self.epsilon, 1.0 - self.epsilon).log();

        (y_true * log_probs).sum_dim(D - 1).neg()
    }
}
