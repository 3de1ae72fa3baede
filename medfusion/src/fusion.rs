//! The fusion bridge between a vision branch and a tabular branch.
//!
//! The vision branch is a single label network with two outputs. The
//! positive column of its output is min-max normalised over the current
//! batch, appended to the tabular inputs as one extra feature, and the
//! result goes through the tabular branch (which may have several heads).
//!
//! The normalisation is relative to the batch: the same sample can get a
//! different signal in a different batch.

use crate::backbones::Family;
use crate::heads::{ComposedConfig, ComposedNetwork, Outputs};
use crate::prelude::*;

/// Number of outputs of the vision branch: a negative and a positive
/// likelihood.
pub const VISION_OUTPUTS: usize = 2;

/// Column of the vision output that is passed on.
pub const POSITIVE_COLUMN: usize = 1;

/// Maps `x` to `[0, 1]` using its own minimum and maximum. A constant `x`
/// (including a single sample) maps to zeros.
///
/// ```rust
/// # use medfusion::prelude::*;
/// let dev: Cpu = Default::default();
/// let x: Tensor<f32> = dev.tensor_from_vec(vec![2.0, 4.0, 3.0], [3, 1]).unwrap();
/// assert_eq!(normalize_batch(x).unwrap().as_vec(), [0.0, 1.0, 0.5]);
/// ```
pub fn normalize_batch<E: Dtype>(x: Tensor<E>) -> Result<Tensor<E>, Error> {
    let min = x.try_min_value()?;
    let max = x.try_max_value()?;
    if min == max {
        x.try_sub_scalar(min)
    } else {
        x.try_sub_scalar(min)?.try_div_scalar(max - min)
    }
}

/// The per forward values of the bridge. Recomputed on every call.
#[derive(Debug, Clone)]
pub struct FusionState<E> {
    /// Positive column of the vision output, `(B, 1)`.
    pub raw: Tensor<E>,
    /// `raw` after [normalize_batch].
    pub normalized: Tensor<E>,
}

impl<E: Dtype> FusionState<E> {
    pub fn try_new(vision: Outputs<E>) -> Result<Self, Error> {
        let Outputs::Single(vision) = vision else {
            return Err(Error::InvalidArgument(
                "the vision branch of a fusion network must have a single output".into(),
            ));
        };
        let raw = vision.try_select_column(POSITIVE_COLUMN)?;
        let (min, max) = (raw.try_min_value()?, raw.try_max_value()?);
        tracing::debug!(batch = raw.dims()[0], %min, %max, "fusion signal normalised");
        let normalized = normalize_batch(raw.clone())?;
        Ok(Self { raw, normalized })
    }

    /// Appends the normalised signal to `inputs` as the last feature.
    pub fn try_append_to(&self, inputs: Tensor<E>) -> Result<Tensor<E>, Error> {
        Tensor::try_concat_along(&[inputs, self.normalized.clone()], 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    pub mlp: ComposedConfig,
    pub cnn: ComposedConfig,
}

impl FusionConfig {
    /// `num_inputs` counts the tabular inputs only; the tabular branch
    /// receives one more.
    pub fn new(
        mlp: Family,
        cnn: Family,
        num_inputs: usize,
        in_channel: usize,
        labels: Vec<(String, usize)>,
    ) -> Self {
        Self {
            mlp: ComposedConfig::new(mlp, num_inputs + 1, labels),
            cnn: ComposedConfig::new(
                cnn,
                in_channel,
                vec![("likelihood".to_string(), VISION_OUTPUTS)],
            ),
        }
    }
}

impl<E: Dtype> BuildOnDevice<E> for FusionConfig {
    type Built = FusionNet<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        Ok(FusionNet {
            mlp: self.mlp.try_build_on_device(device)?,
            cnn: self.cnn.try_build_on_device(device)?,
        })
    }
}

/// Tabular branch `mlp` fed by the vision branch `cnn`.
#[derive(Debug, Clone, TensorCollection)]
pub struct FusionNet<E> {
    #[module]
    pub mlp: ComposedNetwork<E>,
    #[module]
    pub cnn: ComposedNetwork<E>,
}

impl<E: Dtype> FusionNet<E> {
    /// Inference forward that also returns the bridge values.
    pub fn try_forward_with_state(
        &self,
        inputs: Tensor<E>,
        image: Tensor<E>,
    ) -> Result<(Outputs<E>, FusionState<E>), Error> {
        let state = FusionState::try_new(self.cnn.try_forward(image)?)?;
        let outputs = self.mlp.try_forward(state.try_append_to(inputs)?)?;
        Ok((outputs, state))
    }
}

impl<E: Dtype> Module<(Tensor<E>, Tensor<E>)> for FusionNet<E> {
    type Output = Outputs<E>;

    fn try_forward(&self, (inputs, image): (Tensor<E>, Tensor<E>)) -> Result<Self::Output, Error> {
        self.try_forward_with_state(inputs, image)
            .map(|(outputs, _)| outputs)
    }

    fn try_forward_mut(
        &mut self,
        (inputs, image): (Tensor<E>, Tensor<E>),
    ) -> Result<Self::Output, Error> {
        let state = FusionState::try_new(self.cnn.try_forward_mut(image)?)?;
        self.mlp.try_forward_mut(state.try_append_to(inputs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heads::get_output;
    use crate::tests::*;

    #[test]
    fn test_normalize_endpoints_are_exact() {
        let dev: TestDevice = Default::default();
        let x = dev
            .tensor_from_vec(vec![0.3 as TestDtype, -1.7, 2.9, 0.1], [4, 1])
            .unwrap();
        let y = normalize_batch(x).unwrap().as_vec();
        let min = y.iter().copied().fold(TestDtype::INFINITY, TestDtype::min);
        let max = y.iter().copied().fold(TestDtype::NEG_INFINITY, TestDtype::max);
        assert_eq!(min, 0.0);
        assert_eq!(max, 1.0);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 1.0);
    }

    #[test]
    fn test_normalize_constant_batch_is_zero() {
        let dev: TestDevice = Default::default();
        let x = dev.tensor_from_vec(vec![0.7 as TestDtype; 5], [5, 1]).unwrap();
        assert_eq!(normalize_batch(x).unwrap().as_vec(), vec![0.0; 5]);
        let single = dev.tensor_from_vec(vec![-3.0 as TestDtype], [1, 1]).unwrap();
        assert_eq!(normalize_batch(single).unwrap().as_vec(), [0.0]);
    }

    #[test]
    fn test_normalize_depends_on_batch() {
        let dev: TestDevice = Default::default();
        let a = dev.tensor_from_vec(vec![1.0 as TestDtype, 2.0], [2, 1]).unwrap();
        let b = dev.tensor_from_vec(vec![1.0 as TestDtype, 3.0], [2, 1]).unwrap();
        assert_eq!(normalize_batch(a).unwrap().as_vec(), [0.0, 1.0]);
        assert_eq!(normalize_batch(b).unwrap().as_vec(), [0.0, 1.0]);
        let c = dev
            .tensor_from_vec(vec![1.0 as TestDtype, 2.0, 3.0], [3, 1])
            .unwrap();
        assert_eq!(normalize_batch(c).unwrap().as_vec(), [0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_fusion_state_selects_positive_column() {
        let dev: TestDevice = Default::default();
        let vision = dev
            .tensor_from_vec(vec![9.0 as TestDtype, 1.0, -9.0, 3.0, 0.0, 2.0], [3, 2])
            .unwrap();
        let state = FusionState::try_new(Outputs::Single(vision)).unwrap();
        assert_eq!(state.raw.dims(), &[3, 1]);
        assert_eq!(state.raw.as_vec(), [1.0, 3.0, 2.0]);
        assert_eq!(state.normalized.as_vec(), [0.0, 1.0, 0.5]);

        let inputs = dev.try_ones::<TestDtype>([3, 2]).unwrap();
        let fused = state.try_append_to(inputs).unwrap();
        assert_eq!(fused.dims(), &[3, 3]);
        assert_eq!(fused.as_vec(), [1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.5]);
    }

    #[test]
    fn test_fusion_keys_and_widths() {
        let dev: TestDevice = Default::default();
        let cfg = FusionConfig::new(
            Family::Mlp,
            Family::ResNet18,
            4,
            1,
            vec![("a".to_string(), 2), ("b".to_string(), 2)],
        );
        let net: FusionNet<TestDtype> = cfg.try_build_on_device(&dev).unwrap();
        let mut keys = Vec::new();
        net.iter_tensors("", &mut |k, _, t| keys.push((k.to_string(), t.dims().to_vec())));
        assert_eq!(keys[0], ("mlp.mlp.linear_0.weight".to_string(), vec![256, 5]));
        assert!(keys.contains(&("mlp.fc_multi.fc_b.weight".to_string(), vec![2, 256])));
        assert!(keys.contains(&("cnn.conv1.weight".to_string(), vec![64, 1, 7, 7])));
        assert!(keys.contains(&("cnn.fc.weight".to_string(), vec![2, 512])));
        assert!(keys.iter().all(|(k, _)| !k.contains("..") && !k.ends_with('.')));
    }

    #[test]
    fn test_fusion_forward_with_constant_image() {
        let dev: TestDevice = Default::default();
        let cfg = FusionConfig::new(
            Family::Mlp,
            Family::ResNet18,
            3,
            1,
            vec![("a".to_string(), 2), ("b".to_string(), 2)],
        );
        let net = dev.try_build_module::<TestDtype, _>(cfg).unwrap();
        // identical images give identical vision outputs in inference mode
        let inputs = dev.try_ones::<TestDtype>([2, 3]).unwrap();
        let image = dev.try_ones::<TestDtype>([2, 1, 32, 32]).unwrap();
        let (outputs, state) = net.try_forward_with_state(inputs, image).unwrap();
        assert_eq!(state.normalized.as_vec(), [0.0, 0.0]);
        assert_eq!(get_output(&outputs, "a").unwrap().dims(), &[2, 2]);
        assert_eq!(get_output(&outputs, "b").unwrap().dims(), &[2, 2]);
    }

    #[test]
    fn test_fusion_batch_mismatch_is_an_error() {
        let dev: TestDevice = Default::default();
        let cfg = FusionConfig::new(
            Family::Mlp,
            Family::ResNet18,
            3,
            1,
            vec![("a".to_string(), 2)],
        );
        let net = dev.try_build_module::<TestDtype, _>(cfg).unwrap();
        let inputs = dev.try_ones::<TestDtype>([3, 3]).unwrap();
        let image = dev.try_ones::<TestDtype>([2, 1, 32, 32]).unwrap();
        assert!(net.try_forward((inputs, image)).is_err());
    }
}
