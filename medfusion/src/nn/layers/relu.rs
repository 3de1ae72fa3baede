use crate::prelude::*;

use super::parameterless;

/// Calls [Tensor::try_relu()], `max(0, x)`.
#[derive(Default, Debug, Clone, Copy)]
pub struct ReLU;

parameterless!(ReLU);

impl<E: Dtype> Module<Tensor<E>> for ReLU {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_relu()
    }
}
