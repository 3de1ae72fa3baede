use crate::prelude::*;

use super::parameterless;

/// Max pooling over `(B, C, H, W)` images.
///
/// **Pytorch Equivalent**: `torch.nn.MaxPool2d(kernel, stride, padding)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool2D {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

/// Average pooling over `(B, C, H, W)` images. Padding counts towards the
/// average.
///
/// **Pytorch Equivalent**: `torch.nn.AvgPool2d(kernel, stride, padding)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvgPool2D {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

parameterless!(MaxPool2D);
parameterless!(AvgPool2D);

impl MaxPool2D {
    fn params(&self) -> Pool2DParams {
        Pool2DParams {
            kernel: self.kernel_size,
            stride: self.stride,
            padding: self.padding,
        }
    }
}

impl AvgPool2D {
    fn params(&self) -> Pool2DParams {
        Pool2DParams {
            kernel: self.kernel_size,
            stride: self.stride,
            padding: self.padding,
        }
    }
}

impl<E: Dtype> Module<Tensor<E>> for MaxPool2D {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_max_pool2d(self.params())
    }
}

impl<E: Dtype> Module<Tensor<E>> for AvgPool2D {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_avg_pool2d(self.params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_resnet_stem_pool_shape() {
        let dev: TestDevice = Default::default();
        let pool = MaxPool2D {
            kernel_size: 3,
            stride: 2,
            padding: 1,
        };
        let y = pool
            .try_forward(dev.try_zeros::<TestDtype>([1, 4, 16, 16]).unwrap())
            .unwrap();
        assert_eq!(y.dims(), &[1, 4, 8, 8]);
    }

    #[test]
    fn test_transition_pool_halves() {
        let dev: TestDevice = Default::default();
        let pool = AvgPool2D {
            kernel_size: 2,
            stride: 2,
            padding: 0,
        };
        let y = pool
            .try_forward(dev.try_ones::<TestDtype>([2, 3, 4, 6]).unwrap())
            .unwrap();
        assert_eq!(y.dims(), &[2, 3, 2, 3]);
        assert!(y.as_vec().iter().all(|&v| v == 1.0));
    }
}
