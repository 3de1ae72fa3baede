//! Construction parameters.
//!
//! [ModelParams] is what a training or testing driver hands to
//! [crate::model::Model::new]. It deserializes from YAML:
//!
//! ```rust
//! # use medfusion::prelude::*;
//! let params: ModelParams = serde_yaml::from_str(
//!     "
//! mlp: MLP
//! net: ResNet18
//! labels: [label_a, label_b]
//! num_outputs_for_label: {label_a: 2, label_b: 3}
//! mlp_num_inputs: 12
//! in_channel: 1
//! ",
//! )
//! .unwrap();
//! assert_eq!(params.variant_kind().unwrap(), VariantKind::Fusion);
//! params.validate().unwrap();
//! ```

use crate::backbones::Family;
use crate::error::{ModelError, Result};
use crate::model::VariantKind;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

/// What the outputs are trained for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Classification,
    Regression,
    /// Survival analysis: one risk output per label.
    Deepsurv,
}

fn default_in_channel() -> usize {
    3
}

fn default_pretrained_dir() -> PathBuf {
    PathBuf::from("pretrained")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Tabular family name, e.g. `MLP`.
    #[serde(default)]
    pub mlp: Option<String>,
    /// Vision family name, e.g. `ResNet18` or `B0`.
    #[serde(default)]
    pub net: Option<String>,
    pub labels: Vec<String>,
    pub num_outputs_for_label: BTreeMap<String, usize>,
    #[serde(default)]
    pub mlp_num_inputs: usize,
    #[serde(default = "default_in_channel")]
    pub in_channel: usize,
    /// When set, images must be exactly this size in both dimensions.
    #[serde(default)]
    pub vit_image_size: Option<usize>,
    #[serde(default)]
    pub pretrained: bool,
    #[serde(default = "default_pretrained_dir")]
    pub pretrained_dir: PathBuf,
    #[serde(default)]
    pub gpu_ids: Vec<usize>,
    #[serde(default)]
    pub task: Task,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ModelParams {
    pub fn builder() -> ModelParamsBuilder {
        ModelParamsBuilder::default()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Which of the three model shapes these parameters describe.
    pub fn variant_kind(&self) -> Result<VariantKind> {
        VariantKind::select(self.mlp.as_deref(), self.net.as_deref())
    }

    /// Resolves the tabular family, checking it is the MLP family.
    pub fn mlp_family(&self) -> Result<Option<Family>> {
        self.mlp
            .as_deref()
            .map(|name| {
                let family = Family::from_name(name)?;
                if family.is_vision() {
                    return Err(ModelError::WrongFamilyKind {
                        name: name.to_string(),
                        role: "tabular",
                    });
                }
                Ok(family)
            })
            .transpose()
    }

    /// Resolves the vision family, checking it consumes images.
    pub fn net_family(&self) -> Result<Option<Family>> {
        self.net
            .as_deref()
            .map(|name| {
                let family = Family::from_name(name)?;
                if !family.is_vision() {
                    return Err(ModelError::WrongFamilyKind {
                        name: name.to_string(),
                        role: "vision",
                    });
                }
                Ok(family)
            })
            .transpose()
    }

    /// The labels with their output cardinalities, in order.
    pub fn label_set(&self) -> Result<LabelSet> {
        LabelSet::new(&self.labels, &self.num_outputs_for_label)
    }

    /// Checks everything a model needs before anything is built.
    pub fn validate(&self) -> Result<()> {
        let kind = self.variant_kind()?;
        self.mlp_family()?;
        self.net_family()?;
        let labels = self.label_set()?;
        if self.task == Task::Deepsurv {
            if let Some((label, n)) = labels.iter().find(|(_, n)| *n != 1) {
                return Err(ModelError::InvalidLabels(format!(
                    "deepsurv needs exactly one output per label, {label} has {n}"
                )));
            }
        }
        if kind.has_tabular() && self.mlp_num_inputs == 0 {
            return Err(ModelError::InvalidParams(
                "mlp_num_inputs must be at least 1".into(),
            ));
        }
        if kind.has_vision() {
            if self.in_channel == 0 {
                return Err(ModelError::InvalidParams(
                    "in_channel must be at least 1".into(),
                ));
            }
            if self.vit_image_size == Some(0) {
                return Err(ModelError::InvalidParams(
                    "vit_image_size must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Builds [ModelParams] in code, starting from the same defaults as the
/// YAML form.
#[derive(Debug, Clone)]
pub struct ModelParamsBuilder {
    params: ModelParams,
}

impl Default for ModelParamsBuilder {
    fn default() -> Self {
        Self {
            params: ModelParams {
                mlp: None,
                net: None,
                labels: Vec::new(),
                num_outputs_for_label: BTreeMap::new(),
                mlp_num_inputs: 0,
                in_channel: default_in_channel(),
                vit_image_size: None,
                pretrained: false,
                pretrained_dir: default_pretrained_dir(),
                gpu_ids: Vec::new(),
                task: Task::default(),
                seed: None,
            },
        }
    }
}

impl ModelParamsBuilder {
    pub fn mlp(mut self, name: &str) -> Self {
        self.params.mlp = Some(name.to_string());
        self
    }

    pub fn net(mut self, name: &str) -> Self {
        self.params.net = Some(name.to_string());
        self
    }

    /// Appends labels with their number of outputs.
    pub fn labels(mut self, labels: &[(&str, usize)]) -> Self {
        for &(label, n) in labels {
            self.params.labels.push(label.to_string());
            self.params.num_outputs_for_label.insert(label.to_string(), n);
        }
        self
    }

    pub fn mlp_num_inputs(mut self, n: usize) -> Self {
        self.params.mlp_num_inputs = n;
        self
    }

    pub fn in_channel(mut self, n: usize) -> Self {
        self.params.in_channel = n;
        self
    }

    pub fn vit_image_size(mut self, size: usize) -> Self {
        self.params.vit_image_size = Some(size);
        self
    }

    pub fn pretrained<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.params.pretrained = true;
        self.params.pretrained_dir = dir.into();
        self
    }

    pub fn gpu_ids(mut self, ids: &[usize]) -> Self {
        self.params.gpu_ids = ids.to_vec();
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.params.task = task;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.params.seed = Some(seed);
        self
    }

    pub fn build(self) -> ModelParams {
        self.params
    }
}

/// Ordered, unique, non-empty labels with their output cardinalities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    entries: Vec<(String, usize)>,
}

impl LabelSet {
    pub fn new(labels: &[String], num_outputs: &BTreeMap<String, usize>) -> Result<Self> {
        if labels.is_empty() {
            return Err(ModelError::InvalidLabels("no labels given".into()));
        }
        let mut seen = HashSet::with_capacity(labels.len());
        let mut entries = Vec::with_capacity(labels.len());
        for label in labels {
            if label.is_empty() {
                return Err(ModelError::InvalidLabels("empty label name".into()));
            }
            if !seen.insert(label.as_str()) {
                return Err(ModelError::InvalidLabels(format!("duplicate label {label}")));
            }
            let n = match num_outputs.get(label) {
                Some(&n) if n >= 1 => n,
                Some(_) => {
                    return Err(ModelError::InvalidLabels(format!(
                        "label {label} needs at least one output"
                    )))
                }
                None => {
                    return Err(ModelError::InvalidLabels(format!(
                        "no number of outputs for label {label}"
                    )))
                }
            };
            entries.push((label.clone(), n));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(l, n)| (l.as_str(), *n))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn to_vec(&self) -> Vec<(String, usize)> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModelParamsBuilder {
        ModelParams::builder()
            .mlp("MLP")
            .labels(&[("a", 2), ("b", 2)])
            .mlp_num_inputs(4)
    }

    #[test]
    fn test_yaml_defaults() {
        let params = ModelParams::from_yaml_str(
            "
net: B0
labels: [x]
num_outputs_for_label: {x: 2}
",
        )
        .unwrap();
        assert_eq!(params.mlp, None);
        assert_eq!(params.in_channel, 3);
        assert_eq!(params.pretrained_dir, PathBuf::from("pretrained"));
        assert_eq!(params.task, Task::Classification);
        assert!(params.gpu_ids.is_empty());
        assert!(!params.pretrained);
        assert_eq!(params.variant_kind().unwrap(), VariantKind::Vision);
        params.validate().unwrap();
    }

    #[test]
    fn test_yaml_task_names() {
        let params = ModelParams::from_yaml_str(
            "
mlp: MLP
labels: [x]
num_outputs_for_label: {x: 1}
mlp_num_inputs: 3
task: deepsurv
",
        )
        .unwrap();
        assert_eq!(params.task, Task::Deepsurv);
        params.validate().unwrap();
        assert!(ModelParams::from_yaml_str("labels: [x]\nnum_outputs_for_label: {x: 1}\ntask: survival\n").is_err());
    }

    #[test]
    fn test_no_branch() {
        let params = ModelParams::builder().labels(&[("a", 2)]).build();
        assert!(matches!(params.validate(), Err(ModelError::NoBranch)));
    }

    #[test]
    fn test_unknown_and_misplaced_families() {
        let params = base().net("VGG").build();
        assert!(matches!(params.validate(), Err(ModelError::UnknownFamily(n)) if n == "VGG"));
        let params = ModelParams::builder()
            .mlp("ResNet18")
            .labels(&[("a", 2)])
            .mlp_num_inputs(4)
            .build();
        assert!(matches!(
            params.validate(),
            Err(ModelError::WrongFamilyKind { role: "tabular", .. })
        ));
        let params = ModelParams::builder().net("MLP").labels(&[("a", 2)]).build();
        assert!(matches!(
            params.validate(),
            Err(ModelError::WrongFamilyKind { role: "vision", .. })
        ));
    }

    #[test]
    fn test_label_problems() {
        let mut params = base().build();
        params.labels.push("a".to_string());
        assert!(matches!(params.validate(), Err(ModelError::InvalidLabels(_))));

        let mut params = base().build();
        params.num_outputs_for_label.remove("b");
        assert!(matches!(params.validate(), Err(ModelError::InvalidLabels(_))));

        let params = base().labels(&[("c", 0)]).build();
        assert!(matches!(params.validate(), Err(ModelError::InvalidLabels(_))));

        let params = ModelParams::builder().mlp("MLP").mlp_num_inputs(2).build();
        assert!(matches!(params.validate(), Err(ModelError::InvalidLabels(_))));

        let params = base().task(Task::Deepsurv).build();
        assert!(matches!(params.validate(), Err(ModelError::InvalidLabels(_))));
    }

    #[test]
    fn test_input_widths() {
        let params = base().mlp_num_inputs(0).build();
        assert!(matches!(params.validate(), Err(ModelError::InvalidParams(_))));
        let params = ModelParams::builder()
            .net("ResNet18")
            .labels(&[("a", 2)])
            .in_channel(0)
            .build();
        assert!(matches!(params.validate(), Err(ModelError::InvalidParams(_))));
        // in_channel does not matter without a vision branch
        base().in_channel(0).build().validate().unwrap();
    }

    #[test]
    fn test_label_set_keeps_order() {
        let params = ModelParams::builder()
            .mlp("MLP")
            .labels(&[("z", 1), ("a", 3), ("m", 2)])
            .mlp_num_inputs(1)
            .build();
        let labels = params.label_set().unwrap();
        assert_eq!(labels.names().collect::<Vec<_>>(), ["z", "a", "m"]);
        assert_eq!(labels.to_vec()[1], ("a".to_string(), 3));
    }
}
