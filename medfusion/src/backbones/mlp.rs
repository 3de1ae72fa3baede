use crate::prelude::*;

/// The hidden part of the tabular network: `linear -> relu -> dropout` per
/// hidden layer. The output projection is attached by [crate::heads] as `fc`.
///
/// Tensors are stored as `linear_{i}.weight` and `linear_{i}.bias`.
#[derive(Debug, Clone, PartialEq)]
pub struct MlpConfig {
    pub num_inputs: usize,
    pub hidden: Vec<usize>,
    pub dropout: f64,
}

impl MlpConfig {
    /// Three hidden layers of 256 units with dropout 0.2.
    pub fn new(num_inputs: usize) -> Self {
        Self {
            num_inputs,
            hidden: vec![256, 256, 256],
            dropout: 0.2,
        }
    }

    pub fn feature_width(&self) -> usize {
        self.hidden.last().copied().unwrap_or(self.num_inputs)
    }
}

impl<E: Dtype> BuildOnDevice<E> for MlpConfig {
    type Built = MlpTrunk<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        let mut blocks = Vec::with_capacity(self.hidden.len());
        let mut inp = self.num_inputs;
        for &out in self.hidden.iter() {
            let linear = LinearConfig::new(inp, out).try_build_on_device(device)?;
            blocks.push((linear, ReLU, Dropout::new(self.dropout)));
            inp = out;
        }
        Ok(MlpTrunk { blocks })
    }
}

#[derive(Debug, Clone)]
pub struct MlpTrunk<E> {
    pub blocks: Vec<(Linear<E>, ReLU, Dropout)>,
}

impl<E: Dtype> MlpTrunk<E> {
    pub fn num_inputs(&self) -> Option<usize> {
        self.blocks.first().map(|(l, _, _)| l.in_features())
    }
}

impl<E: Dtype> TensorCollection<E> for MlpTrunk<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        for (i, (linear, _, _)) in self.blocks.iter().enumerate() {
            linear.iter_tensors(&join_location(location, &format!("linear_{i}")), f);
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for (i, (linear, _, _)) in self.blocks.iter_mut().enumerate() {
            linear.try_iter_tensors_mut(&join_location(location, &format!("linear_{i}")), f)?;
        }
        Ok(())
    }
}

impl<E: Dtype> Module<Tensor<E>> for MlpTrunk<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.blocks.try_forward(x)
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.blocks.try_forward_mut(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_mlp_keys_and_widths() {
        let dev: TestDevice = Default::default();
        let m = dev
            .try_build_module::<TestDtype, _>(MlpConfig::new(7))
            .unwrap();
        let mut keys = Vec::new();
        m.iter_tensors("mlp", &mut |k, _, t| keys.push((k.to_string(), t.dims().to_vec())));
        assert_eq!(
            keys,
            [
                ("mlp.linear_0.weight".to_string(), vec![256, 7]),
                ("mlp.linear_0.bias".to_string(), vec![256]),
                ("mlp.linear_1.weight".to_string(), vec![256, 256]),
                ("mlp.linear_1.bias".to_string(), vec![256]),
                ("mlp.linear_2.weight".to_string(), vec![256, 256]),
                ("mlp.linear_2.bias".to_string(), vec![256]),
            ]
        );
        assert_eq!(m.num_inputs(), Some(7));
    }

    #[test]
    fn test_mlp_forward_shapes() {
        let dev: TestDevice = Default::default();
        let mut m = dev
            .try_build_module::<TestDtype, _>(MlpConfig::new(4))
            .unwrap();
        let x = dev.try_ones::<TestDtype>([5, 4]).unwrap();
        assert_eq!(m.try_forward(x.clone()).unwrap().dims(), &[5, 256]);
        assert_eq!(m.try_forward_mut(x).unwrap().dims(), &[5, 256]);
        let bad = dev.try_ones::<TestDtype>([5, 3]).unwrap();
        assert!(m.try_forward(bad).is_err());
    }

    #[test]
    fn test_inference_is_deterministic() {
        let dev: TestDevice = Default::default();
        let m = dev
            .try_build_module::<TestDtype, _>(MlpConfig::new(3))
            .unwrap();
        let x = dev.try_ones::<TestDtype>([2, 3]).unwrap();
        let a = m.try_forward(x.clone()).unwrap();
        let b = m.try_forward(x).unwrap();
        assert_eq!(a.as_vec(), b.as_vec());
    }
}
