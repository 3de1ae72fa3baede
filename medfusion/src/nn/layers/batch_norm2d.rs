use crate::prelude::*;

/// Batch normalization for images as described in
/// [Batch Normalization: Accelerating Deep Network Training
/// by Reducing Internal Covariate Shift](https://arxiv.org/abs/1502.03167)
///
/// # Training vs Inference
///
/// ### Training ([Module::try_forward_mut])
/// - Running statistics: updated with momentum
/// - Normalization: calculated using batch stats
///
/// ### Inference ([Module::try_forward])
/// - Running statistics: **not** updated
/// - Normalization: calculated using running stats
///
/// Examples:
/// ```rust
/// # use medfusion::prelude::*;
/// # let dev: Cpu = Default::default();
/// let bn = dev.try_build_module::<f32, _>(BatchNorm2DConfig::new(3)).unwrap();
/// let _ = bn.try_forward(dev.try_zeros([4, 3, 2, 2]).unwrap()).unwrap();
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchNorm2DConfig {
    pub chan: usize,
    pub epsilon: f64,
    pub momentum: f64,
}

impl BatchNorm2DConfig {
    /// `epsilon = 1e-5` and `momentum = 0.1`.
    pub fn new(chan: usize) -> Self {
        Self {
            chan,
            epsilon: 1e-5,
            momentum: 0.1,
        }
    }

    pub fn with_eps_momentum(mut self, epsilon: f64, momentum: f64) -> Self {
        self.epsilon = epsilon;
        self.momentum = momentum;
        self
    }
}

impl<E: Dtype> BuildOnDevice<E> for BatchNorm2DConfig {
    type Built = BatchNorm2D<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        Ok(BatchNorm2D {
            scale: device.try_ones([self.chan])?,
            bias: device.try_zeros([self.chan])?,
            running_mean: device.try_zeros([self.chan])?,
            running_var: device.try_ones([self.chan])?,
            epsilon: self.epsilon,
            momentum: self.momentum,
        })
    }
}

/// See [BatchNorm2DConfig]
#[derive(Clone, Debug)]
pub struct BatchNorm2D<E> {
    pub scale: Tensor<E>,
    pub bias: Tensor<E>,
    pub running_mean: Tensor<E>,
    pub running_var: Tensor<E>,
    pub epsilon: f64,
    pub momentum: f64,
}

impl<E: Dtype> TensorCollection<E> for BatchNorm2D<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        f(&join_location(location, "weight"), TensorOptions::ones(), &self.scale);
        f(&join_location(location, "bias"), TensorOptions::zeros(), &self.bias);
        f(
            &join_location(location, "running_mean"),
            TensorOptions::buffer(ParamInit::Zeros),
            &self.running_mean,
        );
        f(
            &join_location(location, "running_var"),
            TensorOptions::buffer(ParamInit::Ones),
            &self.running_var,
        );
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        f(&join_location(location, "weight"), TensorOptions::ones(), &mut self.scale)?;
        f(&join_location(location, "bias"), TensorOptions::zeros(), &mut self.bias)?;
        f(
            &join_location(location, "running_mean"),
            TensorOptions::buffer(ParamInit::Zeros),
            &mut self.running_mean,
        )?;
        f(
            &join_location(location, "running_var"),
            TensorOptions::buffer(ParamInit::Ones),
            &mut self.running_var,
        )
    }
}

impl<E: Dtype> Module<Tensor<E>> for BatchNorm2D<E> {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.infer_fwd(x)
    }
    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.train_fwd(x)
    }
}

impl<E: Dtype> BatchNorm2D<E> {
    fn cast(v: f64) -> Result<E, Error> {
        E::from_f64(v).ok_or_else(|| Error::InvalidArgument(format!("{v} not representable")))
    }

    /// `scale / sqrt(var + eps)` and `bias - mean * that` per channel.
    fn affine(&self, mean: &[E], var: &[E]) -> Result<(Vec<E>, Vec<E>), Error> {
        let eps = Self::cast(self.epsilon)?;
        let mut a = Vec::with_capacity(mean.len());
        let mut b = Vec::with_capacity(mean.len());
        for (((m, v), s), c) in mean
            .iter()
            .zip(var.iter())
            .zip(self.scale.as_slice())
            .zip(self.bias.as_slice())
        {
            let k = *s / (*v + eps).sqrt();
            a.push(k);
            b.push(*c - *m * k);
        }
        Ok((a, b))
    }

    /// batchnorm forward for training
    fn train_fwd(&mut self, x: Tensor<E>) -> Result<Tensor<E>, Error> {
        let [batch, chan, h, w] = x.try_dims::<4>("batch_norm2d")?;
        if chan != self.scale.len() {
            return Err(Error::ShapeMismatch {
                op: "batch_norm2d",
                lhs: x.dims().to_vec(),
                rhs: self.scale.dims().to_vec(),
            });
        }
        let n = (batch * h * w) as f64;
        if n < 2.0 {
            return Err(Error::InvalidArgument(format!(
                "batch_norm2d needs more than one value per channel in training, got {:?}",
                x.shape()
            )));
        }
        let (mean, var) = x.try_channel_moments()?;

        let momentum = Self::cast(self.momentum)?;
        let keep = E::one() - momentum;
        // NOTE: uses unbiased variance in running estimate
        let unbias = Self::cast(n / (n - 1.0))?;
        let running_mean: Vec<E> = self
            .running_mean
            .as_slice()
            .iter()
            .zip(mean.iter())
            .map(|(r, m)| *r * keep + *m * momentum)
            .collect();
        let running_var: Vec<E> = self
            .running_var
            .as_slice()
            .iter()
            .zip(var.iter())
            .map(|(r, v)| *r * keep + *v * unbias * momentum)
            .collect();
        self.running_mean.copy_from(&running_mean)?;
        self.running_var.copy_from(&running_var)?;

        let (a, b) = self.affine(&mean, &var)?;
        x.try_channel_affine(&a, &b)
    }

    /// batchnorm forward for inference
    pub fn infer_fwd(&self, x: Tensor<E>) -> Result<Tensor<E>, Error> {
        let (a, b) = self.affine(self.running_mean.as_slice(), self.running_var.as_slice())?;
        x.try_channel_affine(&a, &b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_batchnorm2d_forward_mut_updates_running_stats() {
        let dev = TestDevice::seed_from_u64(0);
        let mut bn = dev
            .try_build_module::<TestDtype, _>(BatchNorm2DConfig::new(2))
            .unwrap();
        // channel 0 holds 1, 3, 5, 7 and channel 1 holds 0, 0, 2, 2
        let x = dev
            .tensor_from_vec(
                vec![1.0 as TestDtype, 3.0, 0.0, 0.0, 5.0, 7.0, 2.0, 2.0],
                [2, 2, 1, 2],
            )
            .unwrap();
        let y = bn.try_forward_mut(x).unwrap();

        let s5 = (5.0 as TestDtype + 1e-5).sqrt();
        let s1 = (1.0 as TestDtype + 1e-5).sqrt();
        assert_close!(
            y.as_vec(),
            vec![-3.0 / s5, -1.0 / s5, -1.0 / s1, -1.0 / s1, 1.0 / s5, 3.0 / s5, 1.0 / s1, 1.0 / s1]
        );
        assert_close!(bn.running_mean.as_vec(), vec![0.4, 0.1]);
        // 0.9 * 1 + 0.1 * var * 4 / 3
        assert_close!(
            bn.running_var.as_vec(),
            vec![0.9 + 0.1 * 5.0 * 4.0 / 3.0, 0.9 + 0.1 * 4.0 / 3.0]
        );
    }

    #[test]
    fn test_batchnorm2d_forward_uses_running_stats() {
        let dev: TestDevice = Default::default();
        let mut bn = dev
            .try_build_module::<TestDtype, _>(BatchNorm2DConfig::new(1))
            .unwrap();
        bn.running_mean.copy_from(&[1.0]).unwrap();
        bn.running_var.copy_from(&[4.0]).unwrap();
        bn.epsilon = 0.0;
        let x = dev
            .tensor_from_vec(vec![1.0 as TestDtype, 3.0, 5.0], [1, 1, 1, 3])
            .unwrap();
        assert_close!(bn.try_forward(x).unwrap().as_vec(), vec![0.0, 1.0, 2.0]);
        assert_eq!(bn.running_mean.as_vec(), [1.0]);
    }

    #[test]
    fn test_single_value_training_is_rejected() {
        let dev: TestDevice = Default::default();
        let mut bn = dev
            .try_build_module::<TestDtype, _>(BatchNorm2DConfig::new(3))
            .unwrap();
        let x = dev.try_zeros::<TestDtype>([1, 3, 1, 1]).unwrap();
        assert!(bn.try_forward_mut(x).is_err());
    }

    #[test]
    fn test_buffers_are_not_trainable() {
        let dev: TestDevice = Default::default();
        let bn = dev
            .try_build_module::<TestDtype, _>(BatchNorm2DConfig::new(3))
            .unwrap();
        assert_eq!(bn.num_trainable_params(), 6);
        assert_eq!(bn.num_tensor_elements(), 12);
    }
}
