//! Class-specific box regression loss of the detection head.
//!
//! Every proposal predicts four offsets per class; only the slots of the ground-truth
//! class carry a non-zero mask.
//! ```text
//! y_true[..., 0..4C]   mask
//! y_true[..., 4C..8C]  target offsets
//! y_pred[..., 0..4C]   predicted offsets
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

use crate::{
    error::FasterRcnnLossError,
    smooth_l1::{check_packed, MaskedSmoothL1Loss, MaskedSmoothL1LossConfig},
};

/// Configuration for creating a [class regression loss](ClassRegressionLoss).
#[derive(Config, Debug)]
pub struct ClassRegressionLossConfig {
    /// Number of object classes.
    pub classes: usize,
    /// Smooth-L1 settings.
    #[config(default = "MaskedSmoothL1LossConfig::new()")]
    pub smooth_l1: MaskedSmoothL1LossConfig,
}

impl ClassRegressionLossConfig {
    /// Initialize [class regression loss](ClassRegressionLoss).
    pub fn init(&self) -> ClassRegressionLoss {
        assert!(
            self.classes > 0,
            "Classes for ClassRegressionLoss must be positive, got {}",
            self.classes
        );
        ClassRegressionLoss {
            classes: self.classes,
            smooth_l1: self.smooth_l1.init(),
        }
    }
}

/// Mask-normalised smooth-L1 loss over per-class proposal offsets.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct ClassRegressionLoss {
    /// Number of object classes.
    pub classes: usize,
    /// Shared smooth-L1 criterion.
    pub smooth_l1: MaskedSmoothL1Loss,
}

impl ModuleDisplay for ClassRegressionLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("classes", &self.classes)
            .add("smooth_l1", &self.smooth_l1)
            .optional()
    }
}

impl ClassRegressionLoss {
    /// Create a new class regression loss for `classes` classes.
    pub fn new(classes: usize) -> Self {
        ClassRegressionLossConfig::new(classes).init()
    }

    /// Number of regression channels in `y_pred`.
    pub const fn width(&self) -> usize {
        4 * self.classes
    }

    /// Compute the mask-normalised smooth-L1 loss.
    ///
    /// # Shapes
    ///
    /// - y_true: `[batch, proposals, 8 * classes]`
    /// - y_pred: `[batch, proposals, 4 * classes]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(&self, y_true: Tensor<B, 3>, y_pred: Tensor<B, 3>) -> Tensor<B, 1> {
        if let Err(err) = self.validate(&y_true.dims(), &y_pred.dims()) {
            panic!("{err}");
        }
        self.smooth_l1.forward_packed(y_true, y_pred)
    }

    /// Checks the packed channel layout against the class count.
    pub fn validate(
        &self,
        target_shape: &[usize],
        pred_shape: &[usize],
    ) -> Result<(), FasterRcnnLossError> {
        check_packed("ClassRegressionLoss", target_shape, pred_shape, self.width())
    }
}
