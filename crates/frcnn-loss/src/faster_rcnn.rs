//! Combined Faster R-CNN training objective.
//!
//! A two-stage detector produces four outputs: RPN objectness, RPN box offsets,
//! detection-head class probabilities and detection-head class-specific box offsets.
//! [`FasterRcnnLoss`] evaluates the matching loss on each and returns their weighted sum.

use std::collections::HashMap;

use burn::{prelude::*, tensor::cast::ToElement};

use crate::{
    classification::{ClassificationLoss, ClassificationLossConfig},
    class_regression::{ClassRegressionLoss, ClassRegressionLossConfig},
    error::FasterRcnnLossError,
    rpn_classification::{RpnClassificationLoss, RpnClassificationLossConfig},
    rpn_regression::{RpnRegressionLoss, RpnRegressionLossConfig},
    smooth_l1::MaskedSmoothL1LossConfig,
};

/// Per-term weights of the combined loss. A weight of `0.0` disables the term.
#[derive(Config, Debug)]
pub struct LossWeightsConfig {
    #[config(default = 1.0)]
    pub rpn_classification: f64,
    #[config(default = 1.0)]
    pub rpn_regression: f64,
    #[config(default = 1.0)]
    pub classification: f64,
    #[config(default = 1.0)]
    pub regression: f64,
}

/// Configuration for the combined [Faster R-CNN loss](FasterRcnnLoss).
#[derive(Config, Debug)]
pub struct FasterRcnnLossConfig {
    /// Number of object classes of the detection head.
    pub classes: usize,
    /// Anchors per sliding position of the RPN. Default: 9
    #[config(default = 9)]
    pub anchors: usize,
    /// Per-term weights.
    #[config(default = "LossWeightsConfig::new()")]
    pub weights: LossWeightsConfig,
    /// Epsilon shared by every term. Default: 1e-7
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl FasterRcnnLossConfig {
    /// Checks the configuration without building the loss.
    ///
    /// # Errors
    /// Returns [`FasterRcnnLossError::InvalidParameter`] for a zero anchor or class count,
    /// an epsilon outside `(0, 0.5)`, negative or non-finite weights, or when every
    /// weight is zero.
    pub fn validate(&self) -> Result<(), FasterRcnnLossError> {
        if self.anchors == 0 {
            return Err(FasterRcnnLossError::InvalidParameter {
                parameter: "anchors",
                reason: "must be positive".to_owned(),
            });
        }
        if self.classes == 0 {
            return Err(FasterRcnnLossError::InvalidParameter {
                parameter: "classes",
                reason: "must be positive".to_owned(),
            });
        }
        if !(self.epsilon > 0.0 && self.epsilon < 0.5) {
            return Err(FasterRcnnLossError::InvalidParameter {
                parameter: "epsilon",
                reason: format!("must be in (0, 0.5), got {}", self.epsilon),
            });
        }

        let weights = [
            ("weights.rpn_classification", self.weights.rpn_classification),
            ("weights.rpn_regression", self.weights.rpn_regression),
            ("weights.classification", self.weights.classification),
            ("weights.regression", self.weights.regression),
        ];
        for (parameter, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(FasterRcnnLossError::InvalidParameter {
                    parameter,
                    reason: format!("must be finite and non-negative, got {weight}"),
                });
            }
        }
        if weights.iter().all(|(_, weight)| *weight == 0.0) {
            return Err(FasterRcnnLossError::InvalidParameter {
                parameter: "weights",
                reason: "at least one loss term must be enabled".to_owned(),
            });
        }

        Ok(())
    }

    /// Initialize the combined loss.
    pub fn init(&self) -> FasterRcnnLoss {
        if let Err(err) = self.validate() {
            panic!("{err}");
        }

        let weights = &self.weights;
        let smooth_l1 = MaskedSmoothL1LossConfig::new().with_epsilon(self.epsilon);

        FasterRcnnLoss {
            rpn_classification_weight: weights.rpn_classification,
            rpn_regression_weight: weights.rpn_regression,
            classification_weight: weights.classification,
            regression_weight: weights.regression,

            rpn_classification: (weights.rpn_classification > 0.0).then(|| {
                RpnClassificationLossConfig::new()
                    .with_anchors(self.anchors)
                    .with_epsilon(self.epsilon)
                    .init()
            }),
            rpn_regression: (weights.rpn_regression > 0.0).then(|| {
                RpnRegressionLossConfig::new()
                    .with_anchors(self.anchors)
                    .with_smooth_l1(smooth_l1.clone())
                    .init()
            }),
            classification: (weights.classification > 0.0).then(|| {
                ClassificationLossConfig::new()
                    .with_epsilon(self.epsilon)
                    .init()
            }),
            regression: (weights.regression > 0.0).then(|| {
                ClassRegressionLossConfig::new(self.classes)
                    .with_smooth_l1(smooth_l1.clone())
                    .init()
            }),
        }
    }
}

/// The four detector outputs, or the four matching encoded targets.
///
/// # Shapes
///
/// - rpn_classification: `[batch, height, width, channels]`
/// - rpn_regression: `[batch, height, width, channels]`
/// - classification: `[batch, proposals, classes]`
/// - regression: `[batch, proposals, channels]`
#[derive(Clone, Debug)]
pub struct FasterRcnnTensors<B: Backend> {
    pub rpn_classification: Tensor<B, 4>,
    pub rpn_regression: Tensor<B, 4>,
    pub classification: Tensor<B, 3>,
    pub regression: Tensor<B, 3>,
}

/// Weighted sum of the RPN and detection-head losses.
#[derive(Module, Clone, Debug)]
pub struct FasterRcnnLoss {
    rpn_classification_weight: f64,
    rpn_regression_weight: f64,
    classification_weight: f64,
    regression_weight: f64,

    // Terms with a zero weight are not built
    pub rpn_classification: Option<RpnClassificationLoss>,
    pub rpn_regression: Option<RpnRegressionLoss>,
    pub classification: Option<ClassificationLoss>,
    pub regression: Option<ClassRegressionLoss>,
}

impl FasterRcnnLoss {
    /// Get a copy of the current loss weights.
    pub const fn loss_weights(&self) -> LossWeightsConfig {
        LossWeightsConfig {
            rpn_classification: self.rpn_classification_weight,
            rpn_regression: self.rpn_regression_weight,
            classification: self.classification_weight,
            regression: self.regression_weight,
        }
    }

    /// Checks every enabled term's inputs against its channel layout.
    ///
    /// # Errors
    /// Returns the first layout violation found, in RPN-then-head order.
    pub fn validate<B: Backend>(
        &self,
        targets: &FasterRcnnTensors<B>,
        predictions: &FasterRcnnTensors<B>,
    ) -> Result<(), FasterRcnnLossError> {
        if let Some(loss) = &self.rpn_classification {
            loss.validate(
                &targets.rpn_classification.dims(),
                &predictions.rpn_classification.dims(),
            )?;
        }
        if let Some(loss) = &self.rpn_regression {
            loss.validate(
                &targets.rpn_regression.dims(),
                &predictions.rpn_regression.dims(),
            )?;
        }
        if self.classification.is_some() {
            let target_shape = targets.classification.dims();
            let pred_shape = predictions.classification.dims();
            if target_shape != pred_shape {
                return Err(FasterRcnnLossError::IncompatibleShapes {
                    loss: "ClassificationLoss",
                    target_shape: target_shape.to_vec(),
                    pred_shape: pred_shape.to_vec(),
                });
            }
        }
        if let Some(loss) = &self.regression {
            loss.validate(&targets.regression.dims(), &predictions.regression.dims())?;
        }
        Ok(())
    }

    /// Compute the weighted total loss.
    ///
    /// # Errors
    /// Returns a [`FasterRcnnLossError`] when any input violates its channel layout.
    pub fn forward<B: Backend>(
        &self,
        targets: FasterRcnnTensors<B>,
        predictions: FasterRcnnTensors<B>,
    ) -> Result<Tensor<B, 1>, FasterRcnnLossError> {
        let device = targets.classification.device();
        let terms = self.weighted_terms(targets, predictions)?;

        Ok(terms
            .into_iter()
            .map(|(_, loss)| loss)
            .reduce(|total, loss| total + loss)
            .unwrap_or_else(|| Tensor::zeros([1], &device)))
    }

    /// Compute the weighted total loss together with a per-term breakdown.
    ///
    /// Breakdown keys are `rpn_cls`, `rpn_reg`, `cls` and `reg`; disabled terms are absent.
    /// Reading the breakdown synchronises with the backend.
    ///
    /// # Errors
    /// Returns a [`FasterRcnnLossError`] when any input violates its channel layout.
    pub fn forward_detailed<B: Backend>(
        &self,
        targets: FasterRcnnTensors<B>,
        predictions: FasterRcnnTensors<B>,
    ) -> Result<(Tensor<B, 1>, HashMap<String, f64>), FasterRcnnLossError> {
        let device = targets.classification.device();
        let terms = self.weighted_terms(targets, predictions)?;

        let mut loss_dict = HashMap::with_capacity(terms.len());
        let mut total: Option<Tensor<B, 1>> = None;
        for (name, loss) in terms {
            loss_dict.insert(name.to_owned(), loss.clone().into_scalar().to_f64());
            total = Some(match total {
                Some(total) => total + loss,
                None => loss,
            });
        }
        tracing::debug!(?loss_dict, "faster r-cnn loss breakdown");

        let total = total.unwrap_or_else(|| Tensor::zeros([1], &device));
        Ok((total, loss_dict))
    }

    fn weighted_terms<B: Backend>(
        &self,
        targets: FasterRcnnTensors<B>,
        predictions: FasterRcnnTensors<B>,
    ) -> Result<Vec<(&'static str, Tensor<B, 1>)>, FasterRcnnLossError> {
        self.validate(&targets, &predictions)?;

        let mut terms = Vec::with_capacity(4);
        if let Some(ref loss) = self.rpn_classification {
            let value = loss
                .forward(targets.rpn_classification, predictions.rpn_classification)
                .mul_scalar(self.rpn_classification_weight);
            terms.push(("rpn_cls", value));
        }
        if let Some(ref loss) = self.rpn_regression {
            let value = loss
                .forward(targets.rpn_regression, predictions.rpn_regression)
                .mul_scalar(self.rpn_regression_weight);
            terms.push(("rpn_reg", value));
        }
        if let Some(ref loss) = self.classification {
            let value = loss
                .forward(targets.classification, predictions.classification)
                .mul_scalar(self.classification_weight);
            terms.push(("cls", value));
        }
        if let Some(ref loss) = self.regression {
            let value = loss
                .forward(targets.regression, predictions.regression)
                .mul_scalar(self.regression_weight);
            terms.push(("reg", value));
        }
        tracing::trace!(terms = terms.len(), "computed weighted loss terms");

        Ok(terms)
    }
}
