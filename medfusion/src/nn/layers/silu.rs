use crate::prelude::*;

use super::parameterless;

/// Calls [Tensor::try_silu()], `x * sigmoid(x)`.
#[derive(Default, Debug, Clone, Copy)]
pub struct SiLU;

parameterless!(SiLU);

impl<E: Dtype> Module<Tensor<E>> for SiLU {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_silu()
    }
}
