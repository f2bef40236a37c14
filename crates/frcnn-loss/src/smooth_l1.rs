//! Masked smooth-L1 (robust L1) loss for bounding-box regression.
//!
//! For a residual `d = target - pred` the elementwise loss is
//! ```text
//! l(d) = 0.5 * d^2                  if |d| <= delta
//!        delta * (|d| - 0.5 * delta) otherwise
//! ```
//! which, for the default `delta = 1`, is the familiar `|d| - 0.5` linear branch.
//! Value and slope of the two branches agree at `|d| = delta`.
//!
//! The reduced loss weights every element by a mask and normalises by the mask:
//! ```text
//! Loss = sum(mask * l(d)) / (sum(mask) + eps)
//! ```

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    tensor::{backend::Backend, Tensor},
};

use crate::{error::FasterRcnnLossError, masked::masked_mean};

/// Configuration for creating a [masked smooth-L1 loss](MaskedSmoothL1Loss).
#[derive(Config, Debug)]
pub struct MaskedSmoothL1LossConfig {
    /// Residual magnitude where the loss switches from quadratic to linear. Default: 1.0
    #[config(default = 1.0)]
    pub delta: f64,
    /// Added to the mask sum to keep the normalisation finite. Default: 1e-7
    #[config(default = 1e-7)]
    pub epsilon: f64,
}

impl MaskedSmoothL1LossConfig {
    /// Initialize [masked smooth-L1 loss](MaskedSmoothL1Loss).
    pub fn init(&self) -> MaskedSmoothL1Loss {
        self.assertions();
        MaskedSmoothL1Loss {
            delta: self.delta,
            epsilon: self.epsilon,
        }
    }

    fn assertions(&self) {
        assert!(
            self.delta > 0.0,
            "Delta for MaskedSmoothL1Loss must be positive, got {}",
            self.delta
        );
        assert!(
            self.epsilon > 0.0,
            "Epsilon for MaskedSmoothL1Loss must be positive, got {}",
            self.epsilon
        );
    }
}

/// Smooth-L1 loss weighted by a mask and normalised by the mask sum.
///
/// Used by both [`RpnRegressionLoss`](crate::RpnRegressionLoss) and
/// [`ClassRegressionLoss`](crate::ClassRegressionLoss), which differ only in how wide the
/// packed mask/target slices are.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct MaskedSmoothL1Loss {
    /// Transition point between the quadratic and linear branches.
    pub delta: f64,
    /// Normalisation epsilon.
    pub epsilon: f64,
}

impl Default for MaskedSmoothL1Loss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for MaskedSmoothL1Loss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("delta", &self.delta)
            .add("epsilon", &self.epsilon)
            .optional()
    }
}

impl MaskedSmoothL1Loss {
    /// Create a new masked smooth-L1 loss with default configuration.
    pub fn new() -> Self {
        MaskedSmoothL1LossConfig::new().init()
    }

    /// Compute the mask-normalised loss.
    ///
    /// # Shapes
    ///
    /// - mask: `[...dims]`
    /// - targets: `[...dims]`
    /// - predictions: `[...dims]`
    /// - output: `[1]`
    pub fn forward<const D: usize, B: Backend>(
        &self,
        mask: Tensor<B, D>,
        targets: Tensor<B, D>,
        predictions: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        let mask_dims = mask.dims();
        let pred_dims = predictions.dims();
        assert_eq!(
            mask_dims, pred_dims,
            "Shape of mask ({mask_dims:?}) must match predictions ({pred_dims:?})"
        );

        let weighted = mask.clone() * self.forward_no_reduction(targets, predictions);
        masked_mean(weighted, mask, self.epsilon)
    }

    /// Compute the loss on `y_true` holding `[mask | target]` along the last axis.
    ///
    /// The slice width is taken from `y_pred`: with `w = y_pred.dims()[D - 1]`,
    /// the mask is `y_true[..., 0..w]` and the target is `y_true[..., w..2w]`.
    ///
    /// # Shapes
    ///
    /// - y_true: `[...dims, 2 * w]`
    /// - y_pred: `[...dims, w]`
    /// - output: `[1]`
    pub fn forward_packed<const D: usize, B: Backend>(
        &self,
        y_true: Tensor<B, D>,
        y_pred: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        let width = y_pred.dims()[D - 1];
        if let Err(err) =
            check_packed("MaskedSmoothL1Loss", &y_true.dims(), &y_pred.dims(), width)
        {
            panic!("{err}");
        }
        tracing::trace!(width, dims = ?y_pred.dims(), "smooth-l1 packed slices");

        let mask = y_true.clone().narrow(D - 1, 0, width);
        let targets = y_true.narrow(D - 1, width, width);
        self.forward(mask, targets, y_pred)
    }

    /// Elementwise smooth-L1 of `targets - predictions`, without masking or reduction.
    ///
    /// # Shapes
    ///
    /// - targets: `[...dims]`
    /// - predictions: `[...dims]`
    /// - output: `[...dims]`
    pub fn forward_no_reduction<const D: usize, B: Backend>(
        &self,
        targets: Tensor<B, D>,
        predictions: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let target_dims = targets.dims();
        let pred_dims = predictions.dims();
        assert_eq!(
            target_dims, pred_dims,
            "Shape of targets ({target_dims:?}) must match predictions ({pred_dims:?})"
        );

        let residual = targets - predictions;
        let abs = residual.clone().abs();
        let inside = abs.clone().lower_equal_elem(self.delta);

        let quadratic = residual.powf_scalar(2.0).mul_scalar(0.5);
        let linear = abs.sub_scalar(0.5 * self.delta).mul_scalar(self.delta);

        linear.mask_where(inside, quadratic)
    }
}

/// Validates a packed `[mask | target]` tensor against a `width`-channel prediction.
pub(crate) fn check_packed(
    loss: &'static str,
    target_shape: &[usize],
    pred_shape: &[usize],
    width: usize,
) -> Result<(), FasterRcnnLossError> {
    let pred_channels = pred_shape[pred_shape.len() - 1];
    if pred_channels != width {
        return Err(FasterRcnnLossError::ChannelMismatch {
            loss,
            tensor: "y_pred",
            expected: width.to_string(),
            actual: pred_channels,
        });
    }

    let target_channels = target_shape[target_shape.len() - 1];
    if target_channels != 2 * width {
        return Err(FasterRcnnLossError::ChannelMismatch {
            loss,
            tensor: "y_true",
            expected: (2 * width).to_string(),
            actual: target_channels,
        });
    }

    FasterRcnnLossError::check_leading_dims(loss, target_shape, pred_shape)
}

#[cfg(test)]
mod tests {
    use burn::tensor::{cast::ToElement, TensorData, Tolerance, Transaction};

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    #[test]
    fn smooth_l1_no_reduction_matches_both_branches() {
        let device = Default::default();
        let loss = MaskedSmoothL1Loss::new();

        let targets =
            Tensor::<TestBackend, 1>::from_data(TensorData::from([0.0, 0.0, 0.0, 0.0]), &device);
        let preds =
            Tensor::<TestBackend, 1>::from_data(TensorData::from([0.5, -1.0, 3.0, 0.0]), &device);

        // d = [-0.5, 1, -3, 0] -> [0.125, 0.5, 2.5, 0]
        loss.forward_no_reduction(targets, preds)
            .into_data()
            .assert_approx_eq::<f32>(
                &TensorData::from([0.125, 0.5, 2.5, 0.0]),
                Tolerance::default(),
            );
    }

    #[test]
    fn smooth_l1_is_symmetric_in_residual() {
        let device = Default::default();
        let loss = MaskedSmoothL1Loss::new();

        let residuals = [0.25, 0.9, 1.0, 1.7, 4.0];
        let zeros = Tensor::<TestBackend, 1>::zeros([residuals.len()], &device);
        let positive = Tensor::<TestBackend, 1>::from_data(TensorData::from(residuals), &device);

        let forward = loss.forward_no_reduction(positive.clone(), zeros.clone());
        let backward = loss.forward_no_reduction(zeros, positive);

        let [forward_data, backward_data] = Transaction::default()
            .register(forward)
            .register(backward)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        forward_data.assert_approx_eq::<f32>(&backward_data, Tolerance::default());
    }

    #[test]
    fn smooth_l1_value_and_slope_converge_at_transition() {
        let device = Default::default();
        let loss = MaskedSmoothL1Loss::new();

        for step in [1e-1, 1e-2, 1e-3] {
            let targets = Tensor::<TestAutodiffBackend, 1>::from_data(
                TensorData::from([1.0 - step, 1.0 + step]),
                &device,
            )
            .require_grad();
            let preds = Tensor::<TestAutodiffBackend, 1>::zeros([2], &device);

            let values = loss.forward_no_reduction(targets.clone(), preds);
            let grads = values.clone().sum().backward();
            let slopes = targets
                .grad(&grads)
                .expect("targets should have a gradient")
                .into_data()
                .to_vec::<f32>()
                .expect("float gradient");
            let values = values
                .into_data()
                .to_vec::<f32>()
                .expect("float values");

            let value_gap = (values[1] - values[0]).abs() as f64;
            let slope_gap = (slopes[1] - slopes[0]).abs() as f64;
            assert!(value_gap <= 2.5 * step, "value gap {value_gap} at step {step}");
            assert!(slope_gap <= 1.5 * step, "slope gap {slope_gap} at step {step}");
        }
    }

    #[test]
    fn smooth_l1_custom_delta_scales_linear_branch() {
        let device = Default::default();
        let loss = MaskedSmoothL1LossConfig::new().with_delta(2.0).init();

        let targets = Tensor::<TestBackend, 1>::from_data(TensorData::from([1.0, 3.0]), &device);
        let preds = Tensor::<TestBackend, 1>::zeros([2], &device);

        // |1| <= 2 -> 0.5; |3| > 2 -> 2 * (3 - 1) = 4
        loss.forward_no_reduction(targets, preds)
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.5, 4.0]), Tolerance::default());
    }

    #[test]
    fn smooth_l1_forward_normalises_by_mask_sum() {
        let device = Default::default();
        let loss = MaskedSmoothL1Loss::new();

        let mask = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0, 0.0], [1.0, 1.0]]),
            &device,
        );
        let targets = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        let preds = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[0.5, 10.0], [2.0, 0.0]]),
            &device,
        );

        // (0.125 + 1.5 + 0) / 3, the masked 10.0 residual is ignored
        loss.forward(mask, targets, preds)
            .into_data()
            .assert_approx_eq::<f32>(
                &TensorData::from([1.625 / 3.0]),
                Tolerance::relative(1e-5),
            );
    }

    #[test]
    fn smooth_l1_forward_packed_reads_mask_then_target() {
        let device = Default::default();
        let loss = MaskedSmoothL1Loss::new();

        let y_true = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]]),
            &device,
        );
        let y_pred =
            Tensor::<TestBackend, 2>::from_data(TensorData::from([[0.5, 0.5, 0.5, 0.5]]), &device);

        loss.forward_packed(y_true, y_pred)
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.125]), Tolerance::relative(1e-5));
    }

    #[test]
    fn smooth_l1_forward_zero_mask_returns_exact_zero() {
        let device = Default::default();
        let loss = MaskedSmoothL1Loss::new();

        let mask = Tensor::<TestBackend, 1>::zeros([3], &device);
        let targets = Tensor::<TestBackend, 1>::zeros([3], &device);
        let preds =
            Tensor::<TestBackend, 1>::from_data(TensorData::from([5.0, -7.0, 0.3]), &device);

        let value = loss.forward(mask, targets, preds).into_scalar().to_f64();
        assert_eq!(value, 0.0);
    }

    #[test]
    #[should_panic = "MaskedSmoothL1Loss: y_true channel dimension must be 8, got 6"]
    fn smooth_l1_forward_packed_wrong_target_width_panics() {
        let device = Default::default();
        let loss = MaskedSmoothL1Loss::new();

        let y_true = Tensor::<TestBackend, 2>::zeros([1, 6], &device);
        let y_pred = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        let _ = loss.forward_packed(y_true, y_pred);
    }

    #[test]
    #[should_panic = "Delta for MaskedSmoothL1Loss must be positive"]
    fn smooth_l1_config_zero_delta_panics() {
        let _loss = MaskedSmoothL1LossConfig::new().with_delta(0.0).init();
    }

    #[test]
    fn smooth_l1_display_shows_delta() {
        let loss = MaskedSmoothL1LossConfig::new().with_delta(0.5).init();
        let display_str = format!("{loss}");
        assert!(display_str.contains("MaskedSmoothL1Loss"));
        assert!(display_str.contains("delta: 0.5"));
    }
}
