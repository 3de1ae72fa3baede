//! # medfusion
//!
//! Multi-label clinical prediction networks over tabular inputs, images, or
//! both at once.
//!
//! A model is described by [params::ModelParams]: an optional tabular
//! branch (`mlp`), an optional vision branch (`net`), the labels to predict
//! and the number of outputs per label. Which branches are present selects
//! the [model::ModelVariant]:
//!
//! | `mlp` | `net` | variant |
//! | --- | --- | --- |
//! | set | unset | MLP only |
//! | unset | set | vision only |
//! | set | set | fusion |
//!
//! # Composition
//!
//! *See [backbones] and [heads] for more information.*
//!
//! Each backbone family ([backbones::Family]) is built as a pure feature
//! extractor. With a single label the family's own terminal layer (`fc`,
//! `classifier` or `classifier.1`) sits on top of it and the forward pass
//! returns one tensor. With several labels an independent head is attached
//! per label and the forward pass returns one tensor per label, which
//! [heads::get_output] resolves by label name.
//!
//! # Fusion
//!
//! *See [fusion] for more information.*
//!
//! The vision branch produces a two column likelihood. Its positive column is
//! min-max normalised over the batch and appended to the tabular input
//! before the tabular branch runs.
//!
//! # Lifecycle
//!
//! *See [model] and [weights] for more information.*
//!
//! ```rust
//! # use medfusion::prelude::*;
//! # let dir = tempfile::tempdir().unwrap();
//! let params = ModelParams::builder()
//!     .mlp("MLP")
//!     .labels(&[("label_a", 2), ("label_b", 2)])
//!     .mlp_num_inputs(4)
//!     .build();
//! let mut model: Model<f32> = Model::new(params).unwrap();
//! model.eval();
//! let dev = model.device().clone();
//! let input = ModelInput::tabular(dev.try_zeros([3, 4]).unwrap());
//! let outputs = model.try_forward(input).unwrap();
//! assert_eq!(get_output(&outputs, "label_b").unwrap().dims(), &[3, 2]);
//!
//! model.store_weight(1);
//! let path = model.save_weight(dir.path(), false).unwrap();
//! model.init_network().unwrap();
//! model.load_weight(&path).unwrap();
//! ```

extern crate self as medfusion;

pub mod backbones;
pub mod device;
pub mod error;
pub mod fusion;
pub mod heads;
pub mod model;
pub mod nn;
pub mod params;
pub mod weights;

pub use error::{ModelError, Result};
pub use medfusion_core::*;

pub mod prelude {
    pub use crate::backbones::{ExtractorConfig, Family, FeatureExtractor};
    pub use crate::device::{AcceleratorRuntime, Bound, HostOnly, Placement};
    pub use crate::error::ModelError;
    pub use crate::fusion::{normalize_batch, FusionConfig, FusionNet, FusionState};
    pub use crate::heads::{
        get_output, ComposedConfig, ComposedNetwork, Head, HeadConfig, HeadSet, Outputs, Terminal,
    };
    pub use crate::model::{Mode, Model, ModelInput, ModelVariant, VariantConfig, VariantKind};
    pub use crate::nn::*;
    pub use crate::params::{LabelSet, ModelParams, Task};
    pub use crate::weights::{collect_weights, WeightSnapshot};
    pub use medfusion_core::prelude::*;
}
