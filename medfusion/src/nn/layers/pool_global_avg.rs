use crate::prelude::*;

use super::parameterless;

/// Averages each channel over the spatial axes, `(B, C, H, W) -> (B, C)`.
/// Equivalent to an adaptive average pool to `1x1` followed by a flatten.
#[derive(Default, Debug, Clone, Copy)]
pub struct AvgPoolGlobal;

parameterless!(AvgPoolGlobal);

impl<E: Dtype> Module<Tensor<E>> for AvgPoolGlobal {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_avg_pool_global()
    }
}
