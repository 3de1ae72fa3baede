use crate::prelude::*;

use super::parameterless;

/// Calls [Tensor::try_sigmoid()], `1 / (1 + exp(-x))`.
#[derive(Default, Debug, Clone, Copy)]
pub struct Sigmoid;

parameterless!(Sigmoid);

impl<E: Dtype> Module<Tensor<E>> for Sigmoid {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_sigmoid()
    }
}
