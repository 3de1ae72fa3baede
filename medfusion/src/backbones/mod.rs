//! Backbone families and the registry that builds their feature extractors.
//!
//! Every family is a closed [Family] variant with one entry in a static
//! table ([FamilyEntry]). The entry knows the names the family is accepted
//! under, the convention of its terminal projection ([TerminalKind]), the
//! prefix used for per label head keys and how to configure its feature
//! extractor. Adding a family means adding a variant and a table row.
//!
//! Extractors never contain their terminal projection; [crate::heads]
//! attaches it (or one head per label) afterwards.
//!
//! ```rust
//! # use medfusion::prelude::*;
//! let family: Family = "ResNet18".parse().unwrap();
//! assert_eq!(family.extractor_config(3).feature_width(), 512);
//! assert!("VGG16".parse::<Family>().is_err());
//! ```

mod densenet;
mod efficientnet;
mod mlp;
mod resnet;

pub use densenet::{DenseBlock, DenseFeatures, DenseLayer, DenseNet, DenseNetConfig, Transition};
pub use efficientnet::{
    EfficientNet, EfficientNetConfig, FeatureStage, MBConv, MBConvLayer, SqueezeExcitation,
};
pub use mlp::{MlpConfig, MlpTrunk};
pub use resnet::{BlockKind, ResBlock, ResBlockConfig, ResNet, ResNetConfig};

use crate::prelude::*;

/// A closed set of supported backbone families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Mlp,
    ResNet18,
    ResNet50,
    DenseNet,
    EfficientNetB0,
    EfficientNetB2,
    EfficientNetB4,
    EfficientNetB6,
}

/// How the terminal projection of a family is laid out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TerminalKind {
    /// A single linear layer stored as `fc`.
    Fc,
    /// A single linear layer stored as `classifier`.
    Classifier,
    /// `classifier.0` is a dropout with probability `p` and
    /// `classifier.1` is the linear layer.
    DropoutClassifier { p: f64 },
}

impl TerminalKind {
    /// Name of the attribute the terminal layer lives under.
    pub fn attr(&self) -> &'static str {
        match self {
            Self::Fc => "fc",
            Self::Classifier | Self::DropoutClassifier { .. } => "classifier",
        }
    }
}

/// One row of the registry.
#[derive(Debug)]
pub struct FamilyEntry {
    pub family: Family,
    /// Every name accepted by [Family::from_name]. The first one is the
    /// canonical name.
    pub names: &'static [&'static str],
    pub terminal: TerminalKind,
    /// Per label heads are keyed `{head_prefix}_{label}`.
    pub head_prefix: &'static str,
    /// Builds the extractor config from the input width: number of tabular
    /// inputs for the MLP, number of image channels otherwise.
    pub extractor: fn(usize) -> ExtractorConfig,
}

static REGISTRY: [FamilyEntry; 8] = [
    FamilyEntry {
        family: Family::Mlp,
        names: &["MLP"],
        terminal: TerminalKind::Fc,
        head_prefix: "fc",
        extractor: mlp_extractor,
    },
    FamilyEntry {
        family: Family::ResNet18,
        names: &["ResNet18"],
        terminal: TerminalKind::Fc,
        head_prefix: "fc",
        extractor: resnet18_extractor,
    },
    FamilyEntry {
        family: Family::ResNet50,
        names: &["ResNet", "ResNet50"],
        terminal: TerminalKind::Fc,
        head_prefix: "fc",
        extractor: resnet50_extractor,
    },
    FamilyEntry {
        family: Family::DenseNet,
        names: &["DenseNet", "DenseNet161"],
        terminal: TerminalKind::Classifier,
        head_prefix: "fc",
        extractor: densenet161_extractor,
    },
    FamilyEntry {
        family: Family::EfficientNetB0,
        names: &["B0", "EfficientNet-B0"],
        terminal: TerminalKind::DropoutClassifier { p: 0.2 },
        head_prefix: "block",
        extractor: efficientnet_b0_extractor,
    },
    FamilyEntry {
        family: Family::EfficientNetB2,
        names: &["B2", "EfficientNet-B2"],
        terminal: TerminalKind::DropoutClassifier { p: 0.3 },
        head_prefix: "block",
        extractor: efficientnet_b2_extractor,
    },
    FamilyEntry {
        family: Family::EfficientNetB4,
        names: &["B4", "EfficientNet-B4"],
        terminal: TerminalKind::DropoutClassifier { p: 0.4 },
        head_prefix: "block",
        extractor: efficientnet_b4_extractor,
    },
    FamilyEntry {
        family: Family::EfficientNetB6,
        names: &["B6", "EfficientNet-B6"],
        terminal: TerminalKind::DropoutClassifier { p: 0.5 },
        head_prefix: "block",
        extractor: efficientnet_b6_extractor,
    },
];

fn mlp_extractor(num_inputs: usize) -> ExtractorConfig {
    ExtractorConfig::Mlp(MlpConfig::new(num_inputs))
}

fn resnet18_extractor(in_channel: usize) -> ExtractorConfig {
    ExtractorConfig::ResNet(ResNetConfig::resnet18(in_channel))
}

fn resnet50_extractor(in_channel: usize) -> ExtractorConfig {
    ExtractorConfig::ResNet(ResNetConfig::resnet50(in_channel))
}

fn densenet161_extractor(in_channel: usize) -> ExtractorConfig {
    ExtractorConfig::DenseNet(DenseNetConfig::densenet161(in_channel))
}

fn efficientnet_b0_extractor(in_channel: usize) -> ExtractorConfig {
    ExtractorConfig::EfficientNet(EfficientNetConfig::b0(in_channel))
}

fn efficientnet_b2_extractor(in_channel: usize) -> ExtractorConfig {
    ExtractorConfig::EfficientNet(EfficientNetConfig::b2(in_channel))
}

fn efficientnet_b4_extractor(in_channel: usize) -> ExtractorConfig {
    ExtractorConfig::EfficientNet(EfficientNetConfig::b4(in_channel))
}

fn efficientnet_b6_extractor(in_channel: usize) -> ExtractorConfig {
    ExtractorConfig::EfficientNet(EfficientNetConfig::b6(in_channel))
}

impl Family {
    /// Resolves a family from one of its accepted names. Names are case
    /// sensitive.
    pub fn from_name(name: &str) -> crate::Result<Self> {
        REGISTRY
            .iter()
            .find(|entry| entry.names.contains(&name))
            .map(|entry| entry.family)
            .ok_or_else(|| ModelError::UnknownFamily(name.to_string()))
    }

    pub fn all() -> impl Iterator<Item = Family> {
        REGISTRY.iter().map(|entry| entry.family)
    }

    pub fn entry(&self) -> &'static FamilyEntry {
        // every variant has exactly one row
        match REGISTRY.iter().find(|entry| entry.family == *self) {
            Some(entry) => entry,
            None => unreachable!("{self:?} is missing from the registry"),
        }
    }

    pub fn canonical_name(&self) -> &'static str {
        self.entry().names[0]
    }

    pub fn terminal(&self) -> TerminalKind {
        self.entry().terminal
    }

    pub fn head_prefix(&self) -> &'static str {
        self.entry().head_prefix
    }

    /// `true` for every family that consumes images.
    pub fn is_vision(&self) -> bool {
        !matches!(self, Self::Mlp)
    }

    pub fn extractor_config(&self, input: usize) -> ExtractorConfig {
        (self.entry().extractor)(input)
    }
}

impl std::str::FromStr for Family {
    type Err = ModelError;
    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_name(s)
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Configuration of a feature extractor of any family.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorConfig {
    Mlp(MlpConfig),
    ResNet(ResNetConfig),
    DenseNet(DenseNetConfig),
    EfficientNet(EfficientNetConfig),
}

impl ExtractorConfig {
    /// Width of the feature vector the built extractor produces per sample.
    pub fn feature_width(&self) -> usize {
        match self {
            Self::Mlp(c) => c.feature_width(),
            Self::ResNet(c) => c.feature_width(),
            Self::DenseNet(c) => c.feature_width(),
            Self::EfficientNet(c) => c.feature_width(),
        }
    }
}

impl<E: Dtype> BuildOnDevice<E> for ExtractorConfig {
    type Built = FeatureExtractor<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        Ok(match self {
            Self::Mlp(c) => FeatureExtractor::Mlp(c.try_build_on_device(device)?),
            Self::ResNet(c) => FeatureExtractor::ResNet(c.try_build_on_device(device)?),
            Self::DenseNet(c) => FeatureExtractor::DenseNet(c.try_build_on_device(device)?),
            Self::EfficientNet(c) => {
                FeatureExtractor::EfficientNet(c.try_build_on_device(device)?)
            }
        })
    }
}

/// A built feature extractor. Maps a batch of inputs to `(B, feature_width)`.
#[derive(Debug, Clone)]
pub enum FeatureExtractor<E> {
    Mlp(MlpTrunk<E>),
    ResNet(ResNet<E>),
    DenseNet(DenseNet<E>),
    EfficientNet(EfficientNet<E>),
}

impl<E: Dtype> TensorCollection<E> for FeatureExtractor<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        match self {
            Self::Mlp(m) => m.iter_tensors(location, f),
            Self::ResNet(m) => m.iter_tensors(location, f),
            Self::DenseNet(m) => m.iter_tensors(location, f),
            Self::EfficientNet(m) => m.iter_tensors(location, f),
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        match self {
            Self::Mlp(m) => m.try_iter_tensors_mut(location, f),
            Self::ResNet(m) => m.try_iter_tensors_mut(location, f),
            Self::DenseNet(m) => m.try_iter_tensors_mut(location, f),
            Self::EfficientNet(m) => m.try_iter_tensors_mut(location, f),
        }
    }
}

impl<E: Dtype> Module<Tensor<E>> for FeatureExtractor<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::Mlp(m) => m.try_forward(x),
            Self::ResNet(m) => m.try_forward(x),
            Self::DenseNet(m) => m.try_forward(x),
            Self::EfficientNet(m) => m.try_forward(x),
        }
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::Mlp(m) => m.try_forward_mut(x),
            Self::ResNet(m) => m.try_forward_mut(x),
            Self::DenseNet(m) => m.try_forward_mut(x),
            Self::EfficientNet(m) => m.try_forward_mut(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_names() {
        let cases = [
            ("MLP", Family::Mlp),
            ("ResNet18", Family::ResNet18),
            ("ResNet", Family::ResNet50),
            ("ResNet50", Family::ResNet50),
            ("DenseNet", Family::DenseNet),
            ("DenseNet161", Family::DenseNet),
            ("B0", Family::EfficientNetB0),
            ("EfficientNet-B2", Family::EfficientNetB2),
            ("B4", Family::EfficientNetB4),
            ("EfficientNet-B6", Family::EfficientNetB6),
        ];
        for (name, family) in cases {
            assert_eq!(Family::from_name(name).unwrap(), family, "{name}");
        }
    }

    #[test]
    fn test_unknown_names() {
        for name in ["", "mlp", "resnet18", "B1", "ViT", "DenseNet121"] {
            assert!(matches!(
                Family::from_name(name),
                Err(ModelError::UnknownFamily(n)) if n == name
            ));
        }
    }

    #[test]
    fn test_every_family_has_one_entry() {
        assert_eq!(Family::all().count(), REGISTRY.len());
        for family in Family::all() {
            assert_eq!(family.entry().family, family);
            assert_eq!(Family::from_name(family.canonical_name()).unwrap(), family);
        }
    }

    #[test]
    fn test_terminal_conventions() {
        assert_eq!(Family::Mlp.terminal().attr(), "fc");
        assert_eq!(Family::ResNet50.terminal().attr(), "fc");
        assert_eq!(Family::DenseNet.terminal().attr(), "classifier");
        assert_eq!(
            Family::EfficientNetB4.terminal(),
            TerminalKind::DropoutClassifier { p: 0.4 }
        );
        assert_eq!(Family::ResNet18.head_prefix(), "fc");
        assert_eq!(Family::EfficientNetB0.head_prefix(), "block");
        assert!(!Family::Mlp.is_vision());
        assert!(Family::DenseNet.is_vision());
    }

    #[test]
    fn test_feature_widths() {
        let widths = [
            (Family::Mlp, 256),
            (Family::ResNet18, 512),
            (Family::ResNet50, 2048),
            (Family::DenseNet, 2208),
            (Family::EfficientNetB0, 1280),
            (Family::EfficientNetB2, 1408),
            (Family::EfficientNetB4, 1792),
            (Family::EfficientNetB6, 2304),
        ];
        for (family, width) in widths {
            assert_eq!(family.extractor_config(3).feature_width(), width, "{family}");
        }
    }
}
