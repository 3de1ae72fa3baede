use crate::prelude::*;

/// A linear transformation of the form `x * weight^T + bias`, where `weight`
/// is a `(out, inp)` matrix and `bias` is a `(out,)` vector.
///
/// Example:
/// ```rust
/// # use medfusion::prelude::*;
/// # let dev: Cpu = Default::default();
/// let model = dev.try_build_module::<f32, _>(LinearConfig::new(5, 2)).unwrap();
/// let y = model.try_forward(dev.try_zeros([10, 5]).unwrap()).unwrap();
/// assert_eq!(y.dims(), &[10, 2]);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinearConfig {
    pub inp: usize,
    pub out: usize,
}

impl LinearConfig {
    pub fn new(inp: usize, out: usize) -> Self {
        Self { inp, out }
    }
}

impl<E: Dtype> BuildOnDevice<E> for LinearConfig {
    type Built = Linear<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        Ok(Linear {
            weight: device.try_zeros([self.out, self.inp])?,
            bias: device.try_zeros([self.out])?,
        })
    }
}

/// See [LinearConfig].
#[derive(Clone, Debug)]
pub struct Linear<E> {
    pub weight: Tensor<E>,
    pub bias: Tensor<E>,
}

impl<E: Dtype> Linear<E> {
    pub fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }
}

impl<E: Dtype> TensorCollection<E> for Linear<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        let options = TensorOptions::uniform(1.0 / (self.in_features() as f64).sqrt());
        f(&join_location(location, "weight"), options, &self.weight);
        f(&join_location(location, "bias"), options, &self.bias);
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let options = TensorOptions::uniform(1.0 / (self.in_features() as f64).sqrt());
        f(&join_location(location, "weight"), options, &mut self.weight)?;
        f(&join_location(location, "bias"), options, &mut self.bias)
    }
}

impl<E: Dtype> Module<Tensor<E>> for Linear<E> {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let weight = self.weight.clone().try_transpose()?;
        x.try_matmul(&weight)?.try_add_bias1d(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    const W: [f64; 10] = [
        -0.3458893, -0.30371523, -0.3712057, 0.14303583, -0.0268966,
        0.11733949, 0.14059687, -0.10670426, -0.09373143, 0.18974298,
    ];
    const B: [f64; 2] = [0.3765365, -0.290717];

    fn to_dtype(x: &[f64]) -> Vec<TestDtype> {
        x.iter().map(|&v| v as TestDtype).collect()
    }

    #[test]
    fn test_forward_2d() {
        let dev: TestDevice = Default::default();

        let model = Linear {
            weight: dev.tensor_from_vec(to_dtype(&W), [2, 5]).unwrap(),
            bias: dev.tensor_from_vec(to_dtype(&B), [2]).unwrap(),
        };

        let x = dev
            .tensor_from_vec(
                to_dtype(&[-0.8808001, 2.4185333, 2.2478335, 0.0565211, 2.031299]),
                [1, 5],
            )
            .unwrap();
        let y = model.try_forward(x).unwrap();
        assert_close!(y.as_vec(), vec![-0.93430865, 0.08624211]);
    }

    #[test]
    fn test_reset_params_bounds() {
        let dev: TestDevice = Default::default();
        let model = dev
            .try_build_module::<TestDtype, _>(LinearConfig::new(16, 4))
            .unwrap();
        let bound = 0.25;
        assert!(model.weight.as_vec().iter().all(|w| w.abs() <= bound));
        assert!(model.bias.as_vec().iter().all(|b| b.abs() <= bound));
        assert!(model.weight.as_vec().iter().any(|w| *w != 0.0));
        assert_eq!(model.num_trainable_params(), 16 * 4 + 4);
    }

    #[test]
    fn test_wrong_input_width() {
        let dev: TestDevice = Default::default();
        let model = dev
            .try_build_module::<TestDtype, _>(LinearConfig::new(3, 2))
            .unwrap();
        let x = dev.try_zeros::<TestDtype>([4, 5]).unwrap();
        assert!(model.try_forward(x).is_err());
    }

    #[test]
    fn test_keys() {
        let dev: TestDevice = Default::default();
        let model = dev
            .try_build_module::<TestDtype, _>(LinearConfig::new(3, 2))
            .unwrap();
        let mut keys = Vec::new();
        model.iter_tensors("fc", &mut |k, _, _| keys.push(k.to_string()));
        assert_eq!(keys, ["fc.weight", "fc.bias"]);
    }
}
