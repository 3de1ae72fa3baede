/// Implements [medfusion_core::nn_traits::BuildOnDevice] and an empty
/// [medfusion_core::nn_traits::TensorCollection] for a layer without
/// tensors. The layer is its own config.
macro_rules! parameterless {
    ($Ty:ty) => {
        impl<E: medfusion_core::dtypes::Dtype> medfusion_core::nn_traits::BuildOnDevice<E> for $Ty {
            type Built = Self;
            fn try_build_on_device(
                &self,
                _: &medfusion_core::tensor::Cpu,
            ) -> Result<Self::Built, medfusion_core::tensor::Error> {
                Ok(self.clone())
            }
        }

        impl<E: medfusion_core::dtypes::Dtype> medfusion_core::nn_traits::TensorCollection<E> for $Ty {
            fn iter_tensors(
                &self,
                _: &str,
                _: &mut dyn FnMut(
                    &str,
                    medfusion_core::nn_traits::TensorOptions,
                    &medfusion_core::tensor::Tensor<E>,
                ),
            ) {
            }

            fn try_iter_tensors_mut(
                &mut self,
                _: &str,
                _: &mut dyn FnMut(
                    &str,
                    medfusion_core::nn_traits::TensorOptions,
                    &mut medfusion_core::tensor::Tensor<E>,
                ) -> Result<(), medfusion_core::tensor::Error>,
            ) -> Result<(), medfusion_core::tensor::Error> {
                Ok(())
            }
        }
    };
}
pub(crate) use parameterless;

mod batch_norm2d;
mod conv2d;
mod dropout;
mod linear;
mod pool_2d;
mod pool_global_avg;
mod relu;
mod sigmoid;
mod silu;
mod stochastic_depth;

pub use batch_norm2d::{BatchNorm2D, BatchNorm2DConfig};
pub use conv2d::{Conv2D, Conv2DConfig};
pub use dropout::Dropout;
pub use linear::{Linear, LinearConfig};
pub use pool_2d::{AvgPool2D, MaxPool2D};
pub use pool_global_avg::AvgPoolGlobal;
pub use relu::ReLU;
pub use sigmoid::Sigmoid;
pub use silu::SiLU;
pub use stochastic_depth::StochasticDepth;
