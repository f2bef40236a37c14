//! Box-offset regression loss of the region proposal network.
//!
//! Each anchor regresses four offsets. `y_true` packs a per-coordinate mask followed by
//! the regression target:
//! ```text
//! y_true[..., 0..4A]   mask
//! y_true[..., 4A..8A]  target offsets
//! y_pred[..., 0..4A]   predicted offsets
//! ```
//! See [`MaskedSmoothL1Loss`] for the formula.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

use crate::{
    error::FasterRcnnLossError,
    smooth_l1::{check_packed, MaskedSmoothL1Loss, MaskedSmoothL1LossConfig},
};

/// Configuration for creating a [RPN regression loss](RpnRegressionLoss).
#[derive(Config, Debug)]
pub struct RpnRegressionLossConfig {
    /// Anchors per sliding position. Default: 9
    #[config(default = 9)]
    pub anchors: usize,
    /// Smooth-L1 settings.
    #[config(default = "MaskedSmoothL1LossConfig::new()")]
    pub smooth_l1: MaskedSmoothL1LossConfig,
}

impl RpnRegressionLossConfig {
    /// Initialize [RPN regression loss](RpnRegressionLoss).
    pub fn init(&self) -> RpnRegressionLoss {
        assert!(
            self.anchors > 0,
            "Anchors for RpnRegressionLoss must be positive, got {}",
            self.anchors
        );
        RpnRegressionLoss {
            anchors: self.anchors,
            smooth_l1: self.smooth_l1.init(),
        }
    }
}

/// Mask-normalised smooth-L1 loss over anchor box offsets.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct RpnRegressionLoss {
    /// Anchors per sliding position.
    pub anchors: usize,
    /// Shared smooth-L1 criterion.
    pub smooth_l1: MaskedSmoothL1Loss,
}

impl Default for RpnRegressionLoss {
    fn default() -> Self {
        RpnRegressionLossConfig::new().init()
    }
}

impl ModuleDisplay for RpnRegressionLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("anchors", &self.anchors)
            .add("smooth_l1", &self.smooth_l1)
            .optional()
    }
}

impl RpnRegressionLoss {
    /// Create a new RPN regression loss for `anchors` anchors per position.
    pub fn new(anchors: usize) -> Self {
        RpnRegressionLossConfig::new().with_anchors(anchors).init()
    }

    /// Number of regression channels in `y_pred`.
    pub const fn width(&self) -> usize {
        4 * self.anchors
    }

    /// Compute the mask-normalised smooth-L1 loss.
    ///
    /// # Shapes
    ///
    /// - y_true: `[batch, height, width, 8 * anchors]`
    /// - y_pred: `[batch, height, width, 4 * anchors]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(&self, y_true: Tensor<B, 4>, y_pred: Tensor<B, 4>) -> Tensor<B, 1> {
        if let Err(err) = self.validate(&y_true.dims(), &y_pred.dims()) {
            panic!("{err}");
        }
        self.smooth_l1.forward_packed(y_true, y_pred)
    }

    /// Checks the packed channel layout against the anchor count.
    pub fn validate(
        &self,
        target_shape: &[usize],
        pred_shape: &[usize],
    ) -> Result<(), FasterRcnnLossError> {
        check_packed("RpnRegressionLoss", target_shape, pred_shape, self.width())
    }
}
