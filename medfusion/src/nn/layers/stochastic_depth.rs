use crate::prelude::*;

use super::parameterless;

/// Randomly drops whole samples of a residual branch during training, as
/// described in [Deep Networks with Stochastic Depth](https://arxiv.org/abs/1603.09382).
///
/// Calls [Tensor::try_drop_samples()] in [Module::try_forward_mut()], and
/// does nothing in [Module::try_forward()].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StochasticDepth {
    pub p: f64,
}

parameterless!(StochasticDepth);

impl<E: Dtype> Module<Tensor<E>> for StochasticDepth {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        Ok(x)
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_drop_samples(self.p)
    }
}
