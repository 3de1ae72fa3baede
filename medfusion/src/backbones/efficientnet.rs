//! EfficientNet as described in [EfficientNet: Rethinking Model Scaling for
//! Convolutional Neural Networks](https://arxiv.org/abs/1905.11946).
//!
//! The B0 stage table is scaled by a width and a depth multiplier. Tensor
//! names follow torchvision's `efficientnet_b*` without the `classifier`:
//! `features.{stage}.{block}.block.{layer}`.

use crate::prelude::*;

/// `(expand_ratio, kernel, stride, in, out, layers)` of EfficientNet-B0.
const B0_STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 32, 16, 1),
    (6, 3, 2, 16, 24, 2),
    (6, 5, 2, 24, 40, 2),
    (6, 3, 2, 40, 80, 3),
    (6, 5, 1, 80, 112, 3),
    (6, 5, 2, 112, 192, 4),
    (6, 3, 1, 192, 320, 1),
];

/// Rounds `v` to the nearest multiple of `divisor`, never going more than
/// 10% below `v`.
fn make_divisible(v: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let rounded = (((v + d / 2.0) as usize) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * v {
        rounded + divisor
    } else {
        rounded
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EfficientNetConfig {
    pub in_channel: usize,
    pub width_mult: f64,
    pub depth_mult: f64,
    pub stochastic_depth_prob: f64,
    pub bn_epsilon: f64,
    pub bn_momentum: f64,
}

impl EfficientNetConfig {
    fn scaled(in_channel: usize, width_mult: f64, depth_mult: f64) -> Self {
        Self {
            in_channel,
            width_mult,
            depth_mult,
            stochastic_depth_prob: 0.2,
            bn_epsilon: 1e-5,
            bn_momentum: 0.1,
        }
    }

    pub fn b0(in_channel: usize) -> Self {
        Self::scaled(in_channel, 1.0, 1.0)
    }

    pub fn b2(in_channel: usize) -> Self {
        Self::scaled(in_channel, 1.1, 1.2)
    }

    pub fn b4(in_channel: usize) -> Self {
        Self::scaled(in_channel, 1.4, 1.8)
    }

    pub fn b6(in_channel: usize) -> Self {
        Self {
            bn_epsilon: 1e-3,
            bn_momentum: 0.01,
            ..Self::scaled(in_channel, 1.8, 2.6)
        }
    }

    fn channels(&self, c: usize) -> usize {
        make_divisible(c as f64 * self.width_mult, 8)
    }

    fn depth(&self, layers: usize) -> usize {
        (layers as f64 * self.depth_mult).ceil() as usize
    }

    fn norm(&self, chan: usize) -> BatchNorm2DConfig {
        BatchNorm2DConfig::new(chan).with_eps_momentum(self.bn_epsilon, self.bn_momentum)
    }

    /// Width of the last 1x1 convolution, four times the last stage width.
    pub fn feature_width(&self) -> usize {
        4 * self.channels(B0_STAGES[B0_STAGES.len() - 1].4)
    }

    fn conv_norm_act<E: Dtype>(
        &self,
        conv: Conv2DConfig,
        device: &Cpu,
    ) -> Result<(Conv2D<E>, BatchNorm2D<E>, SiLU), Error> {
        Ok((
            conv.try_build_on_device(device)?,
            self.norm(conv.out_chan).try_build_on_device(device)?,
            SiLU,
        ))
    }

    fn mb_conv<E: Dtype>(
        &self,
        (expand_ratio, kernel, stride, inp, out): (usize, usize, usize, usize, usize),
        sd_prob: f64,
        device: &Cpu,
    ) -> Result<MBConv<E>, Error> {
        let expanded = make_divisible((inp * expand_ratio) as f64, 8);
        let mut block = Vec::with_capacity(4);
        if expanded != inp {
            block.push(MBConvLayer::ConvNormAct(
                self.conv_norm_act(Conv2DConfig::new(inp, expanded, 1), device)?,
            ));
        }
        block.push(MBConvLayer::ConvNormAct(self.conv_norm_act(
            Conv2DConfig::new(expanded, expanded, kernel)
                .with_stride(stride)
                .with_padding((kernel - 1) / 2)
                .with_groups(expanded),
            device,
        )?));
        let squeeze = (inp / 4).max(1);
        block.push(MBConvLayer::SqueezeExcitation(SqueezeExcitation {
            avgpool: AvgPoolGlobal,
            fc1: Conv2DConfig::new(expanded, squeeze, 1)
                .with_bias()
                .try_build_on_device(device)?,
            activation: SiLU,
            fc2: Conv2DConfig::new(squeeze, expanded, 1)
                .with_bias()
                .try_build_on_device(device)?,
            scale_activation: Sigmoid,
        }));
        block.push(MBConvLayer::Project((
            Conv2DConfig::new(expanded, out, 1).try_build_on_device(device)?,
            self.norm(out).try_build_on_device(device)?,
        )));
        Ok(MBConv {
            block,
            stochastic_depth: StochasticDepth { p: sd_prob },
            use_res_connect: stride == 1 && inp == out,
        })
    }
}

impl<E: Dtype> BuildOnDevice<E> for EfficientNetConfig {
    type Built = EfficientNet<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        let stem = self.channels(B0_STAGES[0].3);
        let mut features = Vec::with_capacity(B0_STAGES.len() + 2);
        features.push(FeatureStage::ConvNormAct(self.conv_norm_act(
            Conv2DConfig::new(self.in_channel, stem, 3)
                .with_stride(2)
                .with_padding(1),
            device,
        )?));

        let total_blocks: usize = B0_STAGES.iter().map(|s| self.depth(s.5)).sum();
        let mut block_id = 0;
        for &(expand_ratio, kernel, stride, inp, out, layers) in B0_STAGES.iter() {
            let (inp, out) = (self.channels(inp), self.channels(out));
            let mut stage = Vec::new();
            for i in 0..self.depth(layers) {
                let sd_prob = self.stochastic_depth_prob * block_id as f64 / total_blocks as f64;
                let setting = if i == 0 {
                    (expand_ratio, kernel, stride, inp, out)
                } else {
                    (expand_ratio, kernel, 1, out, out)
                };
                stage.push(self.mb_conv(setting, sd_prob, device)?);
                block_id += 1;
            }
            features.push(FeatureStage::Stage(stage));
        }

        let last = self.channels(B0_STAGES[B0_STAGES.len() - 1].4);
        features.push(FeatureStage::ConvNormAct(self.conv_norm_act(
            Conv2DConfig::new(last, self.feature_width(), 1),
            device,
        )?));
        Ok(EfficientNet {
            features,
            avgpool: AvgPoolGlobal,
        })
    }
}

/// Maps `(B, in_channel, H, W)` to `(B, feature_width)`.
#[derive(Debug, Clone, Sequential)]
pub struct EfficientNet<E> {
    pub features: Vec<FeatureStage<E>>,
    pub avgpool: AvgPoolGlobal,
}

/// One entry of `features`: the stem and head convolutions, or a stage of
/// MBConv blocks.
#[derive(Debug, Clone)]
pub enum FeatureStage<E> {
    ConvNormAct((Conv2D<E>, BatchNorm2D<E>, SiLU)),
    Stage(Vec<MBConv<E>>),
}

impl<E: Dtype> TensorCollection<E> for FeatureStage<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        match self {
            Self::ConvNormAct(m) => m.iter_tensors(location, f),
            Self::Stage(m) => m.iter_tensors(location, f),
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        match self {
            Self::ConvNormAct(m) => m.try_iter_tensors_mut(location, f),
            Self::Stage(m) => m.try_iter_tensors_mut(location, f),
        }
    }
}

impl<E: Dtype> Module<Tensor<E>> for FeatureStage<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::ConvNormAct(m) => m.try_forward(x),
            Self::Stage(m) => m.try_forward(x),
        }
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::ConvNormAct(m) => m.try_forward_mut(x),
            Self::Stage(m) => m.try_forward_mut(x),
        }
    }
}

/// Inverted residual block: optional 1x1 expansion, depthwise convolution,
/// squeeze-excitation and a 1x1 projection without activation.
#[derive(Debug, Clone, TensorCollection)]
pub struct MBConv<E> {
    #[module]
    pub block: Vec<MBConvLayer<E>>,
    pub stochastic_depth: StochasticDepth,
    pub use_res_connect: bool,
}

impl<E: Dtype> Module<Tensor<E>> for MBConv<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let y = self.block.try_forward(x.clone())?;
        if self.use_res_connect {
            self.stochastic_depth.try_forward(y)?.try_add(x)
        } else {
            Ok(y)
        }
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let y = self.block.try_forward_mut(x.clone())?;
        if self.use_res_connect {
            self.stochastic_depth.try_forward_mut(y)?.try_add(x)
        } else {
            Ok(y)
        }
    }
}

#[derive(Debug, Clone)]
pub enum MBConvLayer<E> {
    ConvNormAct((Conv2D<E>, BatchNorm2D<E>, SiLU)),
    Project((Conv2D<E>, BatchNorm2D<E>)),
    SqueezeExcitation(SqueezeExcitation<E>),
}

impl<E: Dtype> TensorCollection<E> for MBConvLayer<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        match self {
            Self::ConvNormAct(m) => m.iter_tensors(location, f),
            Self::Project(m) => m.iter_tensors(location, f),
            Self::SqueezeExcitation(m) => m.iter_tensors(location, f),
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        match self {
            Self::ConvNormAct(m) => m.try_iter_tensors_mut(location, f),
            Self::Project(m) => m.try_iter_tensors_mut(location, f),
            Self::SqueezeExcitation(m) => m.try_iter_tensors_mut(location, f),
        }
    }
}

impl<E: Dtype> Module<Tensor<E>> for MBConvLayer<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::ConvNormAct(m) => m.try_forward(x),
            Self::Project(m) => m.try_forward(x),
            Self::SqueezeExcitation(m) => m.try_forward(x),
        }
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::ConvNormAct(m) => m.try_forward_mut(x),
            Self::Project(m) => m.try_forward_mut(x),
            Self::SqueezeExcitation(m) => m.try_forward_mut(x),
        }
    }
}

/// Rescales every channel by a gate computed from the globally pooled input.
#[derive(Debug, Clone, TensorCollection)]
pub struct SqueezeExcitation<E> {
    pub avgpool: AvgPoolGlobal,
    #[module]
    pub fc1: Conv2D<E>,
    pub activation: SiLU,
    #[module]
    pub fc2: Conv2D<E>,
    pub scale_activation: Sigmoid,
}

impl<E: Dtype> Module<Tensor<E>> for SqueezeExcitation<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let [b, c, _, _] = x.try_dims::<4>("squeeze excitation")?;
        let s = self.avgpool.try_forward(x.clone())?.try_reshape([b, c, 1, 1])?;
        let s = self.activation.try_forward(self.fc1.try_forward(s)?)?;
        let s = self.scale_activation.try_forward(self.fc2.try_forward(s)?)?;
        x.try_mul_channels(&s.try_reshape([b, c])?)
    }
}
