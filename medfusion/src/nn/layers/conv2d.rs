use crate::prelude::*;

/// Performs *batched* 2d convolutions on images.
///
/// **Pytorch Equivalent**: `torch.nn.Conv2d(in_chan, out_chan, kernel, stride, padding, dilation, groups, bias)`
///
/// Only `(B, C, H, W)` images are accepted. The filter has shape
/// `(out_chan, in_chan / groups, kernel, kernel)`.
///
/// Example:
/// ```rust
/// # use medfusion::prelude::*;
/// # let dev: Cpu = Default::default();
/// let cfg = Conv2DConfig::new(3, 8, 3).with_stride(2).with_padding(1);
/// let conv = dev.try_build_module::<f32, _>(cfg).unwrap();
/// let y = conv.try_forward(dev.try_zeros([2, 3, 16, 16]).unwrap()).unwrap();
/// assert_eq!(y.dims(), &[2, 8, 8, 8]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2DConfig {
    pub in_chan: usize,
    pub out_chan: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
    pub groups: usize,
    pub bias: bool,
}

impl Conv2DConfig {
    /// A stride 1, unpadded, ungrouped convolution without bias.
    pub fn new(in_chan: usize, out_chan: usize, kernel_size: usize) -> Self {
        Self {
            in_chan,
            out_chan,
            kernel_size,
            stride: 1,
            padding: 0,
            dilation: 1,
            groups: 1,
            bias: false,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_bias(mut self) -> Self {
        self.bias = true;
        self
    }
}

impl<E: Dtype> BuildOnDevice<E> for Conv2DConfig {
    type Built = Conv2D<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        if self.groups == 0 || self.in_chan % self.groups != 0 || self.out_chan % self.groups != 0
        {
            return Err(Error::InvalidArgument(format!(
                "conv groups={} must divide in={} and out={}",
                self.groups, self.in_chan, self.out_chan
            )));
        }
        let k = self.kernel_size;
        Ok(Conv2D {
            weight: device.try_zeros([self.out_chan, self.in_chan / self.groups, k, k])?,
            bias: if self.bias {
                Some(device.try_zeros([self.out_chan])?)
            } else {
                None
            },
            params: Conv2DParams {
                stride: self.stride,
                padding: self.padding,
                dilation: self.dilation,
                groups: self.groups,
            },
        })
    }
}

/// The module built with [Conv2DConfig]. See [Conv2DConfig] for usage.
#[derive(Debug, Clone)]
pub struct Conv2D<E> {
    pub weight: Tensor<E>,
    pub bias: Option<Tensor<E>>,
    pub params: Conv2DParams,
}

impl<E: Dtype> Conv2D<E> {
    fn init_bound(&self) -> f64 {
        let dims = self.weight.dims();
        let fan_in = dims[1] * dims[2] * dims[3];
        (1.0 / fan_in.max(1) as f64).sqrt()
    }
}

impl<E: Dtype> TensorCollection<E> for Conv2D<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        let options = TensorOptions::uniform(self.init_bound());
        f(&join_location(location, "weight"), options, &self.weight);
        if let Some(bias) = &self.bias {
            f(&join_location(location, "bias"), options, bias);
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let options = TensorOptions::uniform(self.init_bound());
        f(&join_location(location, "weight"), options, &mut self.weight)?;
        if let Some(bias) = &mut self.bias {
            f(&join_location(location, "bias"), options, bias)?;
        }
        Ok(())
    }
}

impl<E: Dtype> Module<Tensor<E>> for Conv2D<E> {
    type Output = Tensor<E>;
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let y = x.try_conv2d(&self.weight, self.params)?;
        match &self.bias {
            Some(bias) => y.try_add_bias2d(bias),
            None => Ok(y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_grouped_conv_shapes() {
        let dev: TestDevice = Default::default();
        let cfg = Conv2DConfig::new(8, 8, 3).with_padding(1).with_groups(8);
        let conv = dev.try_build_module::<TestDtype, _>(cfg).unwrap();
        assert_eq!(conv.weight.dims(), &[8, 1, 3, 3]);
        let y = conv
            .try_forward(dev.try_zeros([2, 8, 5, 5]).unwrap())
            .unwrap();
        assert_eq!(y.dims(), &[2, 8, 5, 5]);
    }

    #[test]
    fn test_bias_is_added_per_channel() {
        let dev: TestDevice = Default::default();
        let mut conv = dev
            .try_build_module::<TestDtype, _>(Conv2DConfig::new(1, 2, 1).with_bias())
            .unwrap();
        conv.weight.copy_from(&[0.0, 0.0]).unwrap();
        conv.bias.as_mut().unwrap().copy_from(&[1.0, -1.0]).unwrap();
        let y = conv
            .try_forward(dev.try_ones([1, 1, 2, 2]).unwrap())
            .unwrap();
        assert_eq!(y.as_vec(), [1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_bad_groups() {
        let dev: TestDevice = Default::default();
        let cfg = Conv2DConfig::new(3, 8, 3).with_groups(2);
        assert!(dev.try_build_module::<TestDtype, _>(cfg).is_err());
    }

    #[test]
    fn test_unbiased_conv_has_only_weight() {
        let dev: TestDevice = Default::default();
        let conv = dev
            .try_build_module::<TestDtype, _>(Conv2DConfig::new(3, 4, 3))
            .unwrap();
        let mut keys = Vec::new();
        conv.iter_tensors("conv1", &mut |k, _, _| keys.push(k.to_string()));
        assert_eq!(keys, ["conv1.weight"]);
    }
}
