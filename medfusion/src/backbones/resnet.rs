//! ResNet as described in [Deep Residual Learning for Image Recognition](https://arxiv.org/abs/1512.03385).
//!
//! Tensors are named like torchvision's `resnet18`/`resnet50` without the
//! final `fc`, so pretrained files load directly.

use crate::prelude::*;

/// Residual block kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Two 3x3 convolutions, expansion 1.
    Basic,
    /// 1x1, 3x3, 1x1 convolutions with the stride on the 3x3 one, expansion 4.
    Bottleneck,
}

impl BlockKind {
    pub fn expansion(&self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResNetConfig {
    pub in_channel: usize,
    pub block: BlockKind,
    pub layers: [usize; 4],
}

impl ResNetConfig {
    pub fn resnet18(in_channel: usize) -> Self {
        Self {
            in_channel,
            block: BlockKind::Basic,
            layers: [2, 2, 2, 2],
        }
    }

    pub fn resnet50(in_channel: usize) -> Self {
        Self {
            in_channel,
            block: BlockKind::Bottleneck,
            layers: [3, 4, 6, 3],
        }
    }

    pub fn feature_width(&self) -> usize {
        512 * self.block.expansion()
    }

    fn stage(
        &self,
        inplanes: &mut usize,
        planes: usize,
        blocks: usize,
        stride: usize,
    ) -> Vec<ResBlockConfig> {
        let mut stage = Vec::with_capacity(blocks);
        for i in 0..blocks {
            stage.push(ResBlockConfig {
                kind: self.block,
                inplanes: *inplanes,
                planes,
                stride: if i == 0 { stride } else { 1 },
            });
            *inplanes = planes * self.block.expansion();
        }
        stage
    }
}

impl<E: Dtype> BuildOnDevice<E> for ResNetConfig {
    type Built = ResNet<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        let mut inplanes = 64;
        let layer1 = self.stage(&mut inplanes, 64, self.layers[0], 1);
        let layer2 = self.stage(&mut inplanes, 128, self.layers[1], 2);
        let layer3 = self.stage(&mut inplanes, 256, self.layers[2], 2);
        let layer4 = self.stage(&mut inplanes, 512, self.layers[3], 2);
        Ok(ResNet {
            conv1: Conv2DConfig::new(self.in_channel, 64, 7)
                .with_stride(2)
                .with_padding(3)
                .try_build_on_device(device)?,
            bn1: BatchNorm2DConfig::new(64).try_build_on_device(device)?,
            relu: ReLU,
            maxpool: MaxPool2D {
                kernel_size: 3,
                stride: 2,
                padding: 1,
            },
            layer1: layer1.try_build_on_device(device)?,
            layer2: layer2.try_build_on_device(device)?,
            layer3: layer3.try_build_on_device(device)?,
            layer4: layer4.try_build_on_device(device)?,
            avgpool: AvgPoolGlobal,
        })
    }
}

/// Maps `(B, in_channel, H, W)` to `(B, 512 * expansion)`.
#[derive(Debug, Clone, Sequential)]
pub struct ResNet<E> {
    pub conv1: Conv2D<E>,
    pub bn1: BatchNorm2D<E>,
    pub relu: ReLU,
    pub maxpool: MaxPool2D,
    pub layer1: Vec<ResBlock<E>>,
    pub layer2: Vec<ResBlock<E>>,
    pub layer3: Vec<ResBlock<E>>,
    pub layer4: Vec<ResBlock<E>>,
    pub avgpool: AvgPoolGlobal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResBlockConfig {
    pub kind: BlockKind,
    pub inplanes: usize,
    pub planes: usize,
    pub stride: usize,
}

impl<E: Dtype> BuildOnDevice<E> for ResBlockConfig {
    type Built = ResBlock<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        let out = self.planes * self.kind.expansion();
        let downsample = if self.stride != 1 || self.inplanes != out {
            Some((
                Conv2DConfig::new(self.inplanes, out, 1)
                    .with_stride(self.stride)
                    .try_build_on_device(device)?,
                BatchNorm2DConfig::new(out).try_build_on_device(device)?,
            ))
        } else {
            None
        };
        let p = self.planes;
        let block = match self.kind {
            BlockKind::Basic => ResBlock {
                conv1: Conv2DConfig::new(self.inplanes, p, 3)
                    .with_stride(self.stride)
                    .with_padding(1)
                    .try_build_on_device(device)?,
                bn1: BatchNorm2DConfig::new(p).try_build_on_device(device)?,
                conv2: Conv2DConfig::new(p, p, 3)
                    .with_padding(1)
                    .try_build_on_device(device)?,
                bn2: BatchNorm2DConfig::new(p).try_build_on_device(device)?,
                conv3: None,
                bn3: None,
                downsample,
            },
            BlockKind::Bottleneck => ResBlock {
                conv1: Conv2DConfig::new(self.inplanes, p, 1).try_build_on_device(device)?,
                bn1: BatchNorm2DConfig::new(p).try_build_on_device(device)?,
                conv2: Conv2DConfig::new(p, p, 3)
                    .with_stride(self.stride)
                    .with_padding(1)
                    .try_build_on_device(device)?,
                bn2: BatchNorm2DConfig::new(p).try_build_on_device(device)?,
                conv3: Some(Conv2DConfig::new(p, out, 1).try_build_on_device(device)?),
                bn3: Some(BatchNorm2DConfig::new(out).try_build_on_device(device)?),
                downsample,
            },
        };
        Ok(block)
    }
}

/// A basic block (`conv3`/`bn3` absent) or a bottleneck block.
#[derive(Debug, Clone, TensorCollection)]
pub struct ResBlock<E> {
    #[module]
    pub conv1: Conv2D<E>,
    #[module]
    pub bn1: BatchNorm2D<E>,
    #[module]
    pub conv2: Conv2D<E>,
    #[module]
    pub bn2: BatchNorm2D<E>,
    #[module]
    pub conv3: Option<Conv2D<E>>,
    #[module]
    pub bn3: Option<BatchNorm2D<E>>,
    #[module]
    pub downsample: Option<(Conv2D<E>, BatchNorm2D<E>)>,
}

impl<E: Dtype> Module<Tensor<E>> for ResBlock<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let identity = self.downsample.try_forward(x.clone())?;
        let x = self.conv1.try_forward(x)?;
        let x = self.bn1.try_forward(x)?.try_relu()?;
        let x = self.conv2.try_forward(x)?;
        let mut x = self.bn2.try_forward(x)?;
        if let (Some(conv3), Some(bn3)) = (&self.conv3, &self.bn3) {
            x = bn3.try_forward(conv3.try_forward(x.try_relu()?)?)?;
        }
        x.try_add(identity)?.try_relu()
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let identity = self.downsample.try_forward_mut(x.clone())?;
        let x = self.conv1.try_forward_mut(x)?;
        let x = self.bn1.try_forward_mut(x)?.try_relu()?;
        let x = self.conv2.try_forward_mut(x)?;
        let mut x = self.bn2.try_forward_mut(x)?;
        if let (Some(conv3), Some(bn3)) = (&mut self.conv3, &mut self.bn3) {
            x = bn3.try_forward_mut(conv3.try_forward_mut(x.try_relu()?)?)?;
        }
        x.try_add(identity)?.try_relu()
    }
}
