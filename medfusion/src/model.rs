//! The model lifecycle.
//!
//! [Model] owns one [ModelVariant] bound to a [Placement], the parameters
//! it was built from and at most one stored [WeightSnapshot]. It switches
//! between training and evaluation, runs forward passes, stores, saves and
//! loads weights, and rebuilds its network from scratch on demand.

use crate::device::{AcceleratorRuntime, Bound, HostOnly, Placement, Scatter};
use crate::error::{ModelError, Result};
use crate::fusion::{FusionConfig, FusionNet};
use crate::heads::{ComposedConfig, ComposedNetwork, Outputs};
use crate::params::ModelParams;
use crate::prelude::*;
use crate::weights::{self, WeightSnapshot};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Which branches a model has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Mlp,
    Vision,
    Fusion,
}

impl VariantKind {
    /// Picks the variant from the tabular and vision family names.
    pub fn select(mlp: Option<&str>, net: Option<&str>) -> Result<Self> {
        match (mlp, net) {
            (Some(_), None) => Ok(Self::Mlp),
            (None, Some(_)) => Ok(Self::Vision),
            (Some(_), Some(_)) => Ok(Self::Fusion),
            (None, None) => Err(ModelError::NoBranch),
        }
    }

    pub fn has_tabular(&self) -> bool {
        matches!(self, Self::Mlp | Self::Fusion)
    }

    pub fn has_vision(&self) -> bool {
        matches!(self, Self::Vision | Self::Fusion)
    }

    /// The forward input keys this variant requires.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Mlp => &["inputs"],
            Self::Vision => &["image"],
            Self::Fusion => &["inputs", "image"],
        }
    }
}

impl std::fmt::Display for VariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Mlp => "mlp",
            Self::Vision => "vision",
            Self::Fusion => "fusion",
        })
    }
}

/// Builds a [ModelVariant].
#[derive(Debug, Clone, PartialEq)]
pub enum VariantConfig {
    Mlp(ComposedConfig),
    Vision(ComposedConfig),
    Fusion(FusionConfig),
}

impl VariantConfig {
    /// Resolves families and labels. `params` should already be validated.
    pub fn from_params(params: &ModelParams) -> Result<Self> {
        let labels = params.label_set()?.to_vec();
        let config = match (params.mlp_family()?, params.net_family()?) {
            (Some(mlp), None) => Self::Mlp(ComposedConfig::new(mlp, params.mlp_num_inputs, labels)),
            (None, Some(net)) => Self::Vision(ComposedConfig::new(net, params.in_channel, labels)),
            (Some(mlp), Some(net)) => Self::Fusion(FusionConfig::new(
                mlp,
                net,
                params.mlp_num_inputs,
                params.in_channel,
                labels,
            )),
            (None, None) => return Err(ModelError::NoBranch),
        };
        Ok(config)
    }

    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Mlp(_) => VariantKind::Mlp,
            Self::Vision(_) => VariantKind::Vision,
            Self::Fusion(_) => VariantKind::Fusion,
        }
    }
}

impl<E: Dtype> BuildOnDevice<E> for VariantConfig {
    type Built = ModelVariant<E>;
    fn try_build_on_device(&self, device: &Cpu) -> std::result::Result<Self::Built, Error> {
        Ok(match self {
            Self::Mlp(c) => ModelVariant::Mlp(c.try_build_on_device(device)?),
            Self::Vision(c) => ModelVariant::Vision(c.try_build_on_device(device)?),
            Self::Fusion(c) => ModelVariant::Fusion(c.try_build_on_device(device)?),
        })
    }
}

/// Exactly one of the three network shapes.
#[derive(Debug, Clone)]
pub enum ModelVariant<E> {
    Mlp(ComposedNetwork<E>),
    Vision(ComposedNetwork<E>),
    Fusion(FusionNet<E>),
}

impl<E: Dtype> ModelVariant<E> {
    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Mlp(_) => VariantKind::Mlp,
            Self::Vision(_) => VariantKind::Vision,
            Self::Fusion(_) => VariantKind::Fusion,
        }
    }

    /// The network reading images, if any.
    pub fn vision(&self) -> Option<&ComposedNetwork<E>> {
        match self {
            Self::Mlp(_) => None,
            Self::Vision(net) => Some(net),
            Self::Fusion(net) => Some(&net.cnn),
        }
    }

    fn vision_mut(&mut self) -> Option<&mut ComposedNetwork<E>> {
        match self {
            Self::Mlp(_) => None,
            Self::Vision(net) => Some(net),
            Self::Fusion(net) => Some(&mut net.cnn),
        }
    }

    /// The network whose heads produce the outputs.
    pub fn prediction(&self) -> &ComposedNetwork<E> {
        match self {
            Self::Mlp(net) | Self::Vision(net) => net,
            Self::Fusion(net) => &net.mlp,
        }
    }
}

impl<E: Dtype> TensorCollection<E> for ModelVariant<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        match self {
            Self::Mlp(net) | Self::Vision(net) => net.iter_tensors(location, f),
            Self::Fusion(net) => net.iter_tensors(location, f),
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> std::result::Result<(), Error>,
    ) -> std::result::Result<(), Error> {
        match self {
            Self::Mlp(net) | Self::Vision(net) => net.try_iter_tensors_mut(location, f),
            Self::Fusion(net) => net.try_iter_tensors_mut(location, f),
        }
    }
}

fn missing(key: &str) -> Error {
    Error::InvalidArgument(format!("forward input is missing {key}"))
}

impl<E: Dtype> Module<ModelInput<E>> for ModelVariant<E> {
    type Output = Outputs<E>;

    fn try_forward(&self, x: ModelInput<E>) -> std::result::Result<Self::Output, Error> {
        match self {
            Self::Mlp(net) => net.try_forward(x.inputs.ok_or_else(|| missing("inputs"))?),
            Self::Vision(net) => net.try_forward(x.image.ok_or_else(|| missing("image"))?),
            Self::Fusion(net) => net.try_forward((
                x.inputs.ok_or_else(|| missing("inputs"))?,
                x.image.ok_or_else(|| missing("image"))?,
            )),
        }
    }

    fn try_forward_mut(&mut self, x: ModelInput<E>) -> std::result::Result<Self::Output, Error> {
        match self {
            Self::Mlp(net) => net.try_forward_mut(x.inputs.ok_or_else(|| missing("inputs"))?),
            Self::Vision(net) => net.try_forward_mut(x.image.ok_or_else(|| missing("image"))?),
            Self::Fusion(net) => net.try_forward_mut((
                x.inputs.ok_or_else(|| missing("inputs"))?,
                x.image.ok_or_else(|| missing("image"))?,
            )),
        }
    }
}

/// One forward batch: a `(batch, features)` tabular matrix under `inputs`,
/// a `(batch, channels, height, width)` image tensor under `image`, or both.
#[derive(Debug, Clone)]
pub struct ModelInput<E> {
    pub inputs: Option<Tensor<E>>,
    pub image: Option<Tensor<E>>,
}

impl<E: Dtype> ModelInput<E> {
    pub fn tabular(inputs: Tensor<E>) -> Self {
        Self {
            inputs: Some(inputs),
            image: None,
        }
    }

    pub fn image(image: Tensor<E>) -> Self {
        Self {
            inputs: None,
            image: Some(image),
        }
    }

    pub fn fusion(inputs: Tensor<E>, image: Tensor<E>) -> Self {
        Self {
            inputs: Some(inputs),
            image: Some(image),
        }
    }

    /// The keys present, in the order `inputs`, `image`.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::with_capacity(2);
        if self.inputs.is_some() {
            keys.push("inputs");
        }
        if self.image.is_some() {
            keys.push("image");
        }
        keys
    }
}

impl<E: Dtype> Scatter for ModelInput<E> {
    fn batch_size(&self) -> usize {
        self.inputs
            .as_ref()
            .or(self.image.as_ref())
            .map_or(0, |t| t.batch_size())
    }

    fn try_narrow(&self, start: usize, len: usize) -> std::result::Result<Self, Error> {
        Ok(Self {
            inputs: self
                .inputs
                .as_ref()
                .map(|t| t.try_narrow(start, len))
                .transpose()?,
            image: self
                .image
                .as_ref()
                .map(|t| t.try_narrow(start, len))
                .transpose()?,
        })
    }
}

/// Lifecycle state of a [Model]. A constructed model behaves like one in
/// evaluation mode until [Model::train] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Constructed,
    Training,
    Evaluation,
}

/// A composed network with its lifecycle.
#[derive(Debug)]
pub struct Model<E: Dtype = f32> {
    params: ModelParams,
    config: VariantConfig,
    runtime: Arc<dyn AcceleratorRuntime>,
    device: Cpu,
    network: Bound<ModelVariant<E>>,
    mode: Mode,
    snapshot: Option<WeightSnapshot<E>>,
}

impl<E: Dtype> Model<E> {
    /// Builds a model on the host. Requesting accelerators fails.
    pub fn new(params: ModelParams) -> Result<Self> {
        Self::with_runtime(params, Arc::new(HostOnly))
    }

    /// Validates `params`, builds the network and binds it to the
    /// accelerators `runtime` reports. Nothing is returned unless every
    /// step succeeds.
    pub fn with_runtime(params: ModelParams, runtime: Arc<dyn AcceleratorRuntime>) -> Result<Self> {
        params.validate()?;
        let config = VariantConfig::from_params(&params)?;
        let placement = Placement::resolve(&params.gpu_ids, runtime.as_ref())?;
        let device = Cpu::seed_from_u64(params.seed.unwrap_or_else(rand::random));
        let network = build_network(&config, &params, &device)?;
        tracing::info!(
            variant = %config.kind(),
            mlp = params.mlp.as_deref().unwrap_or("-"),
            net = params.net.as_deref().unwrap_or("-"),
            labels = params.labels.len(),
            params = network.num_trainable_params(),
            "model constructed"
        );
        Ok(Self {
            network: Bound::bind(network, placement),
            params,
            config,
            runtime,
            device,
            mode: Mode::Constructed,
            snapshot: None,
        })
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn config(&self) -> &VariantConfig {
        &self.config
    }

    pub fn kind(&self) -> VariantKind {
        self.config.kind()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn device(&self) -> &Cpu {
        &self.device
    }

    pub fn runtime(&self) -> &dyn AcceleratorRuntime {
        self.runtime.as_ref()
    }

    pub fn placement(&self) -> &Placement {
        self.network.placement()
    }

    /// The primary replica of the network.
    pub fn network(&self) -> &ModelVariant<E> {
        self.network.primary()
    }

    /// The most recently stored snapshot.
    pub fn snapshot(&self) -> Option<&WeightSnapshot<E>> {
        self.snapshot.as_ref()
    }

    pub fn train(&mut self) {
        self.mode = Mode::Training;
    }

    pub fn eval(&mut self) {
        self.mode = Mode::Evaluation;
    }

    /// Checks `input` has exactly the keys of this variant and the shapes
    /// the parameters describe.
    pub fn check_input(&self, input: &ModelInput<E>) -> Result<()> {
        let kind = self.kind();
        let keys = input.keys();
        if keys != kind.required_keys() {
            return Err(ModelError::InputMismatch(format!(
                "{kind} model needs {:?}, got {keys:?}",
                kind.required_keys()
            )));
        }
        if let Some(inputs) = &input.inputs {
            match inputs.dims() {
                &[batch, width] if batch > 0 && width == self.params.mlp_num_inputs => {}
                dims => {
                    return Err(ModelError::InputMismatch(format!(
                        "inputs must be (batch, {}), got {dims:?}",
                        self.params.mlp_num_inputs
                    )))
                }
            }
        }
        if let Some(image) = &input.image {
            let size_ok = |h: usize, w: usize| match self.params.vit_image_size {
                Some(size) => h == size && w == size,
                None => h > 0 && w > 0,
            };
            match image.dims() {
                &[batch, c, h, w] if batch > 0 && c == self.params.in_channel && size_ok(h, w) => {}
                dims => {
                    return Err(ModelError::InputMismatch(format!(
                        "image must be (batch, {}, height, width){}, got {dims:?}",
                        self.params.in_channel,
                        self.params
                            .vit_image_size
                            .map(|s| format!(" with height = width = {s}"))
                            .unwrap_or_default()
                    )))
                }
            }
        }
        if let (Some(inputs), Some(image)) = (&input.inputs, &input.image) {
            if inputs.batch_size() != image.batch_size() {
                return Err(ModelError::InputMismatch(format!(
                    "inputs hold {} samples but image holds {}",
                    inputs.batch_size(),
                    image.batch_size()
                )));
            }
        }
        Ok(())
    }

    /// Runs one batch. In training mode dropout is active and batch norm
    /// uses and updates batch statistics.
    pub fn try_forward(&mut self, input: ModelInput<E>) -> Result<Outputs<E>> {
        self.check_input(&input)?;
        let outputs = match self.mode {
            Mode::Training => self.network.try_forward_mut(input)?,
            Mode::Constructed | Mode::Evaluation => self.network.try_forward(input)?,
        };
        Ok(outputs)
    }

    /// Keeps a copy of the current weights of the primary replica, tagged
    /// with `epoch`. Replaces any earlier snapshot.
    pub fn store_weight(&mut self, epoch: usize) -> &WeightSnapshot<E> {
        tracing::debug!(epoch, "weight stored");
        self.snapshot
            .insert(WeightSnapshot::capture(self.network.primary(), epoch))
    }

    /// Writes the stored snapshot under `dir` and returns the file path.
    pub fn save_weight(&self, dir: &Path, as_best: bool) -> Result<PathBuf> {
        self.snapshot
            .as_ref()
            .ok_or(ModelError::NoSnapshot)?
            .save(dir, as_best)
    }

    /// Overwrites every parameter and buffer with the weight file at
    /// `path`. Nothing changes if the file does not fit.
    pub fn load_weight(&mut self, path: &Path) -> Result<()> {
        weights::load_into(self.network.primary_mut(), path)
    }

    /// Throws the network away and builds a fresh one from the parameters
    /// the model was constructed with, on the same placement.
    pub fn init_network(&mut self) -> Result<()> {
        let network = build_network(&self.config, &self.params, &self.device)?;
        self.network.replace(network);
        let placement = self.network.placement().clone();
        self.network.rebind(placement);
        self.mode = Mode::Constructed;
        tracing::info!(variant = %self.kind(), "network reinitialised");
        Ok(())
    }
}

fn build_network<E: Dtype>(
    config: &VariantConfig,
    params: &ModelParams,
    device: &Cpu,
) -> Result<ModelVariant<E>> {
    let mut network = device.try_build_module::<E, _>(config.clone())?;
    if params.pretrained {
        if config.kind().has_tabular() {
            tracing::warn!("pretrained weights do not exist for the tabular branch, ignoring");
        }
        if let Some(net) = network.vision_mut() {
            let path = params
                .pretrained_dir
                .join(format!("{}.safetensors", net.family.canonical_name()));
            weights::load_pretrained(&mut net.extractor, &path)?;
        }
    }
    Ok(network)
}
