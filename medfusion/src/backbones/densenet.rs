//! DenseNet as described in [Densely Connected Convolutional Networks](https://arxiv.org/abs/1608.06993).
//!
//! Tensor names follow torchvision's `densenet161` without the
//! `classifier`: `features.conv0`, `features.denseblock{i}.denselayer{j}`,
//! `features.transition{i}` and `features.norm5`.

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseNetConfig {
    pub in_channel: usize,
    pub growth_rate: usize,
    pub block_config: Vec<usize>,
    pub num_init_features: usize,
    pub bn_size: usize,
}

impl DenseNetConfig {
    /// DenseNet-161: growth 48, blocks `(6, 12, 36, 24)`, 96 initial features.
    pub fn densenet161(in_channel: usize) -> Self {
        Self {
            in_channel,
            growth_rate: 48,
            block_config: vec![6, 12, 36, 24],
            num_init_features: 96,
            bn_size: 4,
        }
    }

    /// Channel count entering each dense block, plus the final width.
    fn block_widths(&self) -> (Vec<usize>, usize) {
        let mut widths = Vec::with_capacity(self.block_config.len());
        let mut num_features = self.num_init_features;
        for (i, &num_layers) in self.block_config.iter().enumerate() {
            widths.push(num_features);
            num_features += num_layers * self.growth_rate;
            if i + 1 != self.block_config.len() {
                num_features /= 2;
            }
        }
        (widths, num_features)
    }

    pub fn feature_width(&self) -> usize {
        self.block_widths().1
    }
}

impl<E: Dtype> BuildOnDevice<E> for DenseNetConfig {
    type Built = DenseNet<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        let (widths, out) = self.block_widths();
        let mut blocks = Vec::with_capacity(widths.len());
        for (i, (&inp, &num_layers)) in widths.iter().zip(self.block_config.iter()).enumerate() {
            let mut layers = Vec::with_capacity(num_layers);
            for j in 0..num_layers {
                layers.push(self.dense_layer(inp + j * self.growth_rate, device)?);
            }
            let transition = if i + 1 != widths.len() {
                let c = inp + num_layers * self.growth_rate;
                Some(Transition {
                    norm: BatchNorm2DConfig::new(c).try_build_on_device(device)?,
                    relu: ReLU,
                    conv: Conv2DConfig::new(c, c / 2, 1).try_build_on_device(device)?,
                    pool: AvgPool2D {
                        kernel_size: 2,
                        stride: 2,
                        padding: 0,
                    },
                })
            } else {
                None
            };
            blocks.push((DenseBlock { layers }, transition));
        }

        let features = DenseFeatures {
            conv0: Conv2DConfig::new(self.in_channel, self.num_init_features, 7)
                .with_stride(2)
                .with_padding(3)
                .try_build_on_device(device)?,
            norm0: BatchNorm2DConfig::new(self.num_init_features).try_build_on_device(device)?,
            relu0: ReLU,
            pool0: MaxPool2D {
                kernel_size: 3,
                stride: 2,
                padding: 1,
            },
            blocks,
            norm5: BatchNorm2DConfig::new(out).try_build_on_device(device)?,
        };
        Ok(DenseNet {
            features,
            relu: ReLU,
            avgpool: AvgPoolGlobal,
        })
    }
}

impl DenseNetConfig {
    fn dense_layer<E: Dtype>(&self, inp: usize, device: &Cpu) -> Result<DenseLayer<E>, Error> {
        let mid = self.bn_size * self.growth_rate;
        Ok(DenseLayer {
            norm1: BatchNorm2DConfig::new(inp).try_build_on_device(device)?,
            relu1: ReLU,
            conv1: Conv2DConfig::new(inp, mid, 1).try_build_on_device(device)?,
            norm2: BatchNorm2DConfig::new(mid).try_build_on_device(device)?,
            relu2: ReLU,
            conv2: Conv2DConfig::new(mid, self.growth_rate, 3)
                .with_padding(1)
                .try_build_on_device(device)?,
        })
    }
}

/// Maps `(B, in_channel, H, W)` to `(B, feature_width)`.
#[derive(Debug, Clone, Sequential)]
pub struct DenseNet<E> {
    pub features: DenseFeatures<E>,
    pub relu: ReLU,
    pub avgpool: AvgPoolGlobal,
}

#[derive(Debug, Clone)]
pub struct DenseFeatures<E> {
    pub conv0: Conv2D<E>,
    pub norm0: BatchNorm2D<E>,
    pub relu0: ReLU,
    pub pool0: MaxPool2D,
    /// Every dense block with the transition that follows it. The last
    /// block has none.
    pub blocks: Vec<(DenseBlock<E>, Option<Transition<E>>)>,
    pub norm5: BatchNorm2D<E>,
}

impl<E: Dtype> TensorCollection<E> for DenseFeatures<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        self.conv0.iter_tensors(&join_location(location, "conv0"), f);
        self.norm0.iter_tensors(&join_location(location, "norm0"), f);
        for (i, (block, transition)) in self.blocks.iter().enumerate() {
            block.iter_tensors(&join_location(location, &format!("denseblock{}", i + 1)), f);
            transition.iter_tensors(&join_location(location, &format!("transition{}", i + 1)), f);
        }
        self.norm5.iter_tensors(&join_location(location, "norm5"), f);
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.conv0
            .try_iter_tensors_mut(&join_location(location, "conv0"), f)?;
        self.norm0
            .try_iter_tensors_mut(&join_location(location, "norm0"), f)?;
        for (i, (block, transition)) in self.blocks.iter_mut().enumerate() {
            block.try_iter_tensors_mut(
                &join_location(location, &format!("denseblock{}", i + 1)),
                f,
            )?;
            transition.try_iter_tensors_mut(
                &join_location(location, &format!("transition{}", i + 1)),
                f,
            )?;
        }
        self.norm5
            .try_iter_tensors_mut(&join_location(location, "norm5"), f)
    }
}

impl<E: Dtype> Module<Tensor<E>> for DenseFeatures<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let x = self.norm0.try_forward(self.conv0.try_forward(x)?)?;
        let x = self.pool0.try_forward(self.relu0.try_forward(x)?)?;
        let x = self.blocks.try_forward(x)?;
        self.norm5.try_forward(x)
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let x = self.conv0.try_forward_mut(x)?;
        let x = self.norm0.try_forward_mut(x)?;
        let x = self.pool0.try_forward(self.relu0.try_forward(x)?)?;
        let x = self.blocks.try_forward_mut(x)?;
        self.norm5.try_forward_mut(x)
    }
}

/// Dense layers stored as `denselayer1`, `denselayer2`, ...
#[derive(Debug, Clone)]
pub struct DenseBlock<E> {
    pub layers: Vec<DenseLayer<E>>,
}

impl<E: Dtype> TensorCollection<E> for DenseBlock<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        for (i, layer) in self.layers.iter().enumerate() {
            layer.iter_tensors(&join_location(location, &format!("denselayer{}", i + 1)), f);
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.try_iter_tensors_mut(
                &join_location(location, &format!("denselayer{}", i + 1)),
                f,
            )?;
        }
        Ok(())
    }
}

impl<E: Dtype> Module<Tensor<E>> for DenseBlock<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.layers.try_forward(x)
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.layers.try_forward_mut(x)
    }
}

/// Bottleneck `norm -> relu -> 1x1 conv -> norm -> relu -> 3x3 conv` whose
/// `growth_rate` new channels are appended to its input.
#[derive(Debug, Clone, TensorCollection)]
pub struct DenseLayer<E> {
    #[module]
    pub norm1: BatchNorm2D<E>,
    pub relu1: ReLU,
    #[module]
    pub conv1: Conv2D<E>,
    #[module]
    pub norm2: BatchNorm2D<E>,
    pub relu2: ReLU,
    #[module]
    pub conv2: Conv2D<E>,
}

impl<E: Dtype> Module<Tensor<E>> for DenseLayer<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let y = self.norm1.try_forward(x.clone())?;
        let y = self.conv1.try_forward(self.relu1.try_forward(y)?)?;
        let y = self.norm2.try_forward(y)?;
        let y = self.conv2.try_forward(self.relu2.try_forward(y)?)?;
        Tensor::try_concat_along(&[x, y], 1)
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let y = self.norm1.try_forward_mut(x.clone())?;
        let y = self.conv1.try_forward_mut(self.relu1.try_forward(y)?)?;
        let y = self.norm2.try_forward_mut(y)?;
        let y = self.conv2.try_forward_mut(self.relu2.try_forward(y)?)?;
        Tensor::try_concat_along(&[x, y], 1)
    }
}

/// Halves both the channels and the spatial size between dense blocks.
#[derive(Debug, Clone, Sequential)]
pub struct Transition<E> {
    pub norm: BatchNorm2D<E>,
    pub relu: ReLU,
    pub conv: Conv2D<E>,
    pub pool: AvgPool2D,
}
