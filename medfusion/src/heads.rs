//! Head composition: a feature extractor plus its terminal projection, or
//! one independent projection per label.
//!
//! With a single label the network looks exactly like the reference
//! backbone: the extractor's tensors sit at the root (or under `mlp` for the
//! tabular family) and the terminal layer under `fc`, `classifier` or
//! `classifier.1`. The forward pass returns [Outputs::Single].
//!
//! With several labels the extractor moves under `extractor` (still `mlp`
//! for the tabular family) and the heads live under `fc_multi`, keyed
//! `fc_{label}` or `block_{label}` depending on the family. The forward pass
//! returns [Outputs::Multi]; use [get_output] to pick a label regardless of
//! the prefix.
//!
//! ```rust
//! # use medfusion::prelude::*;
//! let dev: Cpu = Default::default();
//! let labels = vec![("a".to_string(), 2), ("b".to_string(), 3)];
//! let cfg = ComposedConfig::new(Family::Mlp, 4, labels);
//! let net = dev.try_build_module::<f32, _>(cfg).unwrap();
//! let out = net.try_forward(dev.try_zeros([6, 4]).unwrap()).unwrap();
//! assert_eq!(get_output(&out, "b").unwrap().dims(), &[6, 3]);
//! ```

use crate::backbones::{ExtractorConfig, Family, FeatureExtractor, TerminalKind};
use crate::error::ModelError;
use crate::prelude::*;

/// Location of the per label heads of a multi label network.
pub const MULTI_HEAD_LOCATION: &str = "fc_multi";

/// Builds a [Head]. `dropout` carries the dropout layer and the key its
/// linear layer is stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadConfig {
    pub inp: usize,
    pub out: usize,
    pub dropout: Option<(Dropout, String)>,
}

impl<E: Dtype> BuildOnDevice<E> for HeadConfig {
    type Built = Head<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        let linear = LinearConfig::new(self.inp, self.out).try_build_on_device(device)?;
        Ok(match &self.dropout {
            None => Head::Linear(linear),
            Some((dropout, linear_key)) => Head::DropoutLinear {
                dropout: *dropout,
                linear,
                linear_key: linear_key.clone(),
            },
        })
    }
}

/// A projection from the feature width to one label's output cardinality.
#[derive(Debug, Clone)]
pub enum Head<E> {
    Linear(Linear<E>),
    /// Dropout followed by a linear layer stored at `{location}.{linear_key}`.
    DropoutLinear {
        dropout: Dropout,
        linear: Linear<E>,
        linear_key: String,
    },
}

impl<E: Dtype> Head<E> {
    pub fn linear(&self) -> &Linear<E> {
        match self {
            Self::Linear(linear) | Self::DropoutLinear { linear, .. } => linear,
        }
    }

    pub fn dropout(&self) -> Option<&Dropout> {
        match self {
            Self::Linear(_) => None,
            Self::DropoutLinear { dropout, .. } => Some(dropout),
        }
    }
}

impl<E: Dtype> TensorCollection<E> for Head<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        match self {
            Self::Linear(linear) => linear.iter_tensors(location, f),
            Self::DropoutLinear {
                linear, linear_key, ..
            } => linear.iter_tensors(&join_location(location, linear_key), f),
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        match self {
            Self::Linear(linear) => linear.try_iter_tensors_mut(location, f),
            Self::DropoutLinear {
                linear, linear_key, ..
            } => linear.try_iter_tensors_mut(&join_location(location, linear_key), f),
        }
    }
}

impl<E: Dtype> Module<Tensor<E>> for Head<E> {
    type Output = Tensor<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::Linear(linear) => linear.try_forward(x),
            Self::DropoutLinear {
                dropout, linear, ..
            } => linear.try_forward(dropout.try_forward(x)?),
        }
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        match self {
            Self::Linear(linear) => linear.try_forward_mut(x),
            Self::DropoutLinear {
                dropout, linear, ..
            } => linear.try_forward_mut(dropout.try_forward_mut(x)?),
        }
    }
}

/// Independent heads, one per label, in label order.
#[derive(Debug, Clone)]
pub struct HeadSet<E> {
    /// `(key, label, head)`; the key is `{prefix}_{label}`.
    pub heads: Vec<(String, String, Head<E>)>,
}

impl<E: Dtype> HeadSet<E> {
    pub fn get(&self, label: &str) -> Option<&Head<E>> {
        self.heads
            .iter()
            .find(|(_, l, _)| l == label)
            .map(|(_, _, head)| head)
    }
}

impl<E: Dtype> TensorCollection<E> for HeadSet<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        for (key, _, head) in self.heads.iter() {
            head.iter_tensors(&join_location(location, key), f);
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for (key, _, head) in self.heads.iter_mut() {
            head.try_iter_tensors_mut(&join_location(location, key), f)?;
        }
        Ok(())
    }
}

impl<E: Dtype> Module<Tensor<E>> for HeadSet<E> {
    type Output = Vec<(String, Tensor<E>)>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.heads
            .iter()
            .map(|(key, _, head)| Ok((key.clone(), head.try_forward(x.clone())?)))
            .collect()
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        self.heads
            .iter_mut()
            .map(|(key, _, head)| Ok((key.clone(), head.try_forward_mut(x.clone())?)))
            .collect()
    }
}

/// What a composed network returns: one tensor when a single label is
/// configured, one tensor per head key otherwise.
#[derive(Debug, Clone)]
pub enum Outputs<E> {
    Single(Tensor<E>),
    Multi(Vec<(String, Tensor<E>)>),
}

impl<E: Dtype> Outputs<E> {
    /// Applies `f` to every tensor, keeping keys and order.
    pub fn try_map<F>(self, mut f: F) -> Result<Self, Error>
    where
        F: FnMut(Tensor<E>) -> Result<Tensor<E>, Error>,
    {
        Ok(match self {
            Self::Single(t) => Self::Single(f(t)?),
            Self::Multi(outputs) => Self::Multi(
                outputs
                    .into_iter()
                    .map(|(k, t)| Ok((k, f(t)?)))
                    .collect::<Result<_, Error>>()?,
            ),
        })
    }

    /// Concatenates outputs computed on consecutive chunks of a batch.
    pub fn try_concat_batches(parts: Vec<Self>) -> Result<Self, Error> {
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            return Err(Error::InvalidArgument("no outputs to gather".into()));
        };
        match first {
            Self::Single(t) => {
                let mut tensors = vec![t];
                for part in parts {
                    match part {
                        Self::Single(t) => tensors.push(t),
                        Self::Multi(_) => return Err(mixed_outputs()),
                    }
                }
                Ok(Self::Single(Tensor::try_concat_along(&tensors, 0)?))
            }
            Self::Multi(first) => {
                let mut columns: Vec<(String, Vec<Tensor<E>>)> =
                    first.into_iter().map(|(k, t)| (k, vec![t])).collect();
                for part in parts {
                    let Self::Multi(outputs) = part else {
                        return Err(mixed_outputs());
                    };
                    if outputs.len() != columns.len() {
                        return Err(mixed_outputs());
                    }
                    for ((key, tensors), (k, t)) in columns.iter_mut().zip(outputs) {
                        if *key != k {
                            return Err(mixed_outputs());
                        }
                        tensors.push(t);
                    }
                }
                let gathered = columns
                    .into_iter()
                    .map(|(k, tensors)| Ok((k, Tensor::try_concat_along(&tensors, 0)?)))
                    .collect::<Result<_, Error>>()?;
                Ok(Self::Multi(gathered))
            }
        }
    }
}

fn mixed_outputs() -> Error {
    Error::InvalidArgument("outputs of different shapes cannot be gathered".into())
}

/// Returns the tensor for `label`.
///
/// A single output is returned as is. Among multiple outputs, the key that
/// ends with `_{label}` is chosen; when several keys match, the shortest
/// one wins, so `fc_b` is preferred over `fc_a_b` for label `b`.
pub fn get_output<'a, E>(outputs: &'a Outputs<E>, label: &str) -> crate::Result<&'a Tensor<E>> {
    match outputs {
        Outputs::Single(t) => Ok(t),
        Outputs::Multi(outputs) => {
            let suffix = format!("_{label}");
            outputs
                .iter()
                .filter(|(k, _)| k.ends_with(&suffix))
                .min_by_key(|(k, _)| k.len())
                .map(|(_, t)| t)
                .ok_or_else(|| ModelError::InvalidLabels(format!("no output for label {label}")))
        }
    }
}

/// Builds a [ComposedNetwork]: the family's extractor plus either its own
/// terminal layer (one label) or a [HeadSet] (several labels).
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedConfig {
    pub family: Family,
    pub extractor: ExtractorConfig,
    /// `(label, number of outputs)` in label order.
    pub labels: Vec<(String, usize)>,
}

impl ComposedConfig {
    /// `input` is the number of tabular inputs for the MLP family and the
    /// number of image channels otherwise.
    pub fn new(family: Family, input: usize, labels: Vec<(String, usize)>) -> Self {
        Self {
            family,
            extractor: family.extractor_config(input),
            labels,
        }
    }

    fn terminal_config(&self, num_outputs: usize) -> HeadConfig {
        let inp = self.extractor.feature_width();
        let dropout = match self.family.terminal() {
            TerminalKind::DropoutClassifier { p } => Some((
                Dropout {
                    p,
                    inplace: true,
                },
                "1".to_string(),
            )),
            TerminalKind::Fc | TerminalKind::Classifier => None,
        };
        HeadConfig {
            inp,
            out: num_outputs,
            dropout,
        }
    }

    fn label_head_config(&self, label: &str, num_outputs: usize) -> HeadConfig {
        let inp = self.extractor.feature_width();
        let dropout = match self.family.terminal() {
            // in place dropout would overwrite the features every other
            // head reads
            TerminalKind::DropoutClassifier { p } => Some((
                Dropout {
                    p,
                    inplace: false,
                },
                format!("1_{label}"),
            )),
            TerminalKind::Fc | TerminalKind::Classifier => None,
        };
        HeadConfig {
            inp,
            out: num_outputs,
            dropout,
        }
    }
}

impl<E: Dtype> BuildOnDevice<E> for ComposedConfig {
    type Built = ComposedNetwork<E>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        let extractor = self.extractor.try_build_on_device(device)?;
        let terminal = match self.labels.as_slice() {
            [] => {
                return Err(Error::InvalidArgument(
                    "at least one label is required".into(),
                ))
            }
            [(_, num_outputs)] => {
                Terminal::Single(self.terminal_config(*num_outputs).try_build_on_device(device)?)
            }
            labels => {
                let prefix = self.family.head_prefix();
                let mut heads = Vec::with_capacity(labels.len());
                for (label, num_outputs) in labels {
                    let head = self
                        .label_head_config(label, *num_outputs)
                        .try_build_on_device(device)?;
                    heads.push((format!("{prefix}_{label}"), label.clone(), head));
                }
                Terminal::Multi(HeadSet { heads })
            }
        };
        Ok(ComposedNetwork {
            family: self.family,
            extractor,
            terminal,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Terminal<E> {
    Single(Head<E>),
    Multi(HeadSet<E>),
}

/// A feature extractor with its heads attached.
#[derive(Debug, Clone)]
pub struct ComposedNetwork<E> {
    pub family: Family,
    pub extractor: FeatureExtractor<E>,
    pub terminal: Terminal<E>,
}

impl<E: Dtype> ComposedNetwork<E> {
    /// Where the extractor's tensors are stored, relative to this network.
    pub fn extractor_location(&self) -> &'static str {
        match (self.family, &self.terminal) {
            (Family::Mlp, _) => "mlp",
            (_, Terminal::Single(_)) => "",
            (_, Terminal::Multi(_)) => "extractor",
        }
    }

    /// Where the terminal layer or the head set is stored, relative to this
    /// network.
    pub fn terminal_location(&self) -> String {
        match &self.terminal {
            Terminal::Single(_) => {
                join_location(self.extractor_location(), self.family.terminal().attr())
            }
            Terminal::Multi(_) => MULTI_HEAD_LOCATION.to_string(),
        }
    }

    /// Every head with the label it predicts. A single label network
    /// reports its terminal layer under an empty label.
    pub fn heads(&self) -> Vec<(&str, &Head<E>)> {
        match &self.terminal {
            Terminal::Single(head) => vec![("", head)],
            Terminal::Multi(set) => set
                .heads
                .iter()
                .map(|(_, label, head)| (label.as_str(), head))
                .collect(),
        }
    }
}

impl<E: Dtype> TensorCollection<E> for ComposedNetwork<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        self.extractor
            .iter_tensors(&join_location(location, self.extractor_location()), f);
        let terminal = join_location(location, &self.terminal_location());
        match &self.terminal {
            Terminal::Single(head) => head.iter_tensors(&terminal, f),
            Terminal::Multi(set) => set.iter_tensors(&terminal, f),
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let extractor = join_location(location, self.extractor_location());
        let terminal = join_location(location, &self.terminal_location());
        self.extractor.try_iter_tensors_mut(&extractor, f)?;
        match &mut self.terminal {
            Terminal::Single(head) => head.try_iter_tensors_mut(&terminal, f),
            Terminal::Multi(set) => set.try_iter_tensors_mut(&terminal, f),
        }
    }
}

impl<E: Dtype> Module<Tensor<E>> for ComposedNetwork<E> {
    type Output = Outputs<E>;

    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let features = self.extractor.try_forward(x)?;
        Ok(match &self.terminal {
            Terminal::Single(head) => Outputs::Single(head.try_forward(features)?),
            Terminal::Multi(set) => Outputs::Multi(set.try_forward(features)?),
        })
    }

    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        let features = self.extractor.try_forward_mut(x)?;
        Ok(match &mut self.terminal {
            Terminal::Single(head) => Outputs::Single(head.try_forward_mut(features)?),
            Terminal::Multi(set) => Outputs::Multi(set.try_forward_mut(features)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    fn labels(names: &[&str], num_outputs: usize) -> Vec<(String, usize)> {
        names.iter().map(|n| (n.to_string(), num_outputs)).collect()
    }

    fn keys<M: TensorCollection<TestDtype>>(m: &M) -> Vec<String> {
        let mut keys = Vec::new();
        m.iter_tensors("", &mut |k, _, _| keys.push(k.to_string()));
        keys
    }

    #[test]
    fn test_single_label_mlp_keeps_fc() {
        let dev: TestDevice = Default::default();
        let net = dev
            .try_build_module::<TestDtype, _>(ComposedConfig::new(Family::Mlp, 5, labels(&["x"], 3)))
            .unwrap();
        assert_eq!(
            keys(&net),
            [
                "mlp.linear_0.weight",
                "mlp.linear_0.bias",
                "mlp.linear_1.weight",
                "mlp.linear_1.bias",
                "mlp.linear_2.weight",
                "mlp.linear_2.bias",
                "mlp.fc.weight",
                "mlp.fc.bias",
            ]
        );
        let out = net.try_forward(dev.try_ones([4, 5]).unwrap()).unwrap();
        let Outputs::Single(t) = &out else {
            panic!("expected a single output");
        };
        assert_eq!(t.dims(), &[4, 3]);
        assert_eq!(get_output(&out, "anything").unwrap().dims(), &[4, 3]);
    }

    #[test]
    fn test_multi_label_mlp_heads() {
        let dev: TestDevice = Default::default();
        let net = dev
            .try_build_module::<TestDtype, _>(ComposedConfig::new(
                Family::Mlp,
                5,
                vec![("a".to_string(), 2), ("b".to_string(), 1)],
            ))
            .unwrap();
        let keys = keys(&net);
        assert!(keys.contains(&"mlp.linear_2.bias".to_string()));
        assert!(!keys.iter().any(|k| k.starts_with("mlp.fc")));
        assert!(keys.contains(&"fc_multi.fc_a.weight".to_string()));
        assert!(keys.contains(&"fc_multi.fc_b.bias".to_string()));

        let out = net.try_forward(dev.try_ones([4, 5]).unwrap()).unwrap();
        let Outputs::Multi(outputs) = &out else {
            panic!("expected a mapping");
        };
        let order: Vec<&str> = outputs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(order, ["fc_a", "fc_b"]);
        assert_eq!(get_output(&out, "a").unwrap().dims(), &[4, 2]);
        assert_eq!(get_output(&out, "b").unwrap().dims(), &[4, 1]);
        assert!(get_output(&out, "c").is_err());
    }

    #[test]
    fn test_heads_are_independent() {
        let dev: TestDevice = Default::default();
        let net = dev
            .try_build_module::<TestDtype, _>(ComposedConfig::new(Family::Mlp, 3, labels(&["a", "b"], 2)))
            .unwrap();
        let heads = net.heads();
        assert_ne!(
            heads[0].1.linear().weight.as_vec(),
            heads[1].1.linear().weight.as_vec()
        );
    }

    #[test]
    fn test_suffix_lookup_prefers_shortest_key() {
        let dev: TestDevice = Default::default();
        let a = dev.try_zeros::<TestDtype>([1, 1]).unwrap();
        let b = dev.try_ones::<TestDtype>([1, 1]).unwrap();
        let out = Outputs::Multi(vec![
            ("block_a_b".to_string(), a.clone()),
            ("block_b".to_string(), b),
            ("fc_a".to_string(), a),
        ]);
        assert_eq!(get_output(&out, "b").unwrap().as_vec(), [1.0]);
        assert_eq!(get_output(&out, "a").unwrap().as_vec(), [0.0]);
    }

    #[test]
    fn test_efficientnet_single_label_classifier() {
        let dev: TestDevice = Default::default();
        let cfg = ComposedConfig::new(Family::EfficientNetB0, 3, labels(&["x"], 2));
        let net: ComposedNetwork<TestDtype> = cfg.try_build_on_device(&dev).unwrap();
        assert_eq!(net.extractor_location(), "");
        assert_eq!(net.terminal_location(), "classifier");
        let keys = keys(&net);
        assert_eq!(keys[0], "features.0.0.weight");
        assert_eq!(keys[keys.len() - 2], "classifier.1.weight");
        let dropout = net.heads()[0].1.dropout().copied().unwrap();
        assert!(dropout.inplace);
        assert_eq!(dropout.p, 0.2);
    }

    #[test]
    fn test_efficientnet_multi_label_dropout_not_inplace() {
        let dev: TestDevice = Default::default();
        for family in [Family::EfficientNetB0, Family::EfficientNetB2] {
            let cfg = ComposedConfig::new(family, 3, labels(&["a", "b", "c"], 2));
            let net: ComposedNetwork<TestDtype> = cfg.try_build_on_device(&dev).unwrap();
            for (_, head) in net.heads() {
                let dropout = head.dropout().unwrap();
                assert!(!dropout.inplace);
            }
            let keys = keys(&net);
            assert!(keys.contains(&"fc_multi.block_b.1_b.weight".to_string()));
            assert!(keys.iter().any(|k| k.starts_with("extractor.features.")));
        }
    }

    #[test]
    fn test_resnet_and_densenet_multi_keys() {
        let dev: TestDevice = Default::default();
        let cfg = ComposedConfig::new(Family::ResNet18, 1, labels(&["a", "b"], 2));
        let net: ComposedNetwork<TestDtype> = cfg.try_build_on_device(&dev).unwrap();
        let keys = keys(&net);
        assert!(keys.contains(&"extractor.conv1.weight".to_string()));
        assert!(keys.contains(&"fc_multi.fc_a.weight".to_string()));
        assert_eq!(net.heads()[0].1.linear().in_features(), 512);

        let cfg = ComposedConfig::new(Family::DenseNet, 3, labels(&["only"], 4));
        assert_eq!(cfg.terminal_config(4).inp, 2208);
        assert_eq!(cfg.label_head_config("only", 4).dropout, None);
    }

    #[test]
    fn test_resnet18_multi_label_forward() {
        let dev: TestDevice = Default::default();
        let cfg = ComposedConfig::new(Family::ResNet18, 1, labels(&["a", "b"], 3));
        let mut net = dev.try_build_module::<TestDtype, _>(cfg).unwrap();
        let x = dev.try_ones::<TestDtype>([2, 1, 32, 32]).unwrap();
        let out = net.try_forward_mut(x).unwrap();
        assert_eq!(get_output(&out, "a").unwrap().dims(), &[2, 3]);
        assert_eq!(get_output(&out, "b").unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn test_concat_batches() {
        let dev: TestDevice = Default::default();
        let a = dev.tensor_from_vec(vec![1.0 as TestDtype, 2.0], [1, 2]).unwrap();
        let b = dev.tensor_from_vec(vec![3.0 as TestDtype, 4.0], [1, 2]).unwrap();
        let out = Outputs::try_concat_batches(vec![
            Outputs::Multi(vec![("fc_x".to_string(), a.clone())]),
            Outputs::Multi(vec![("fc_x".to_string(), b.clone())]),
        ])
        .unwrap();
        assert_eq!(get_output(&out, "x").unwrap().as_vec(), [1.0, 2.0, 3.0, 4.0]);
        let mixed = Outputs::try_concat_batches(vec![
            Outputs::Single(a),
            Outputs::Multi(vec![("fc_x".to_string(), b)]),
        ]);
        assert!(mixed.is_err());
    }

    #[test]
    fn test_no_labels_is_an_error() {
        let dev: TestDevice = Default::default();
        let cfg = ComposedConfig::new(Family::Mlp, 3, vec![]);
        assert!(BuildOnDevice::<TestDtype>::try_build_on_device(&cfg, &dev).is_err());
    }
}
