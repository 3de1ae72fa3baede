//! The crate level error type.

use std::path::PathBuf;

/// Everything that can go wrong while building, binding, running or
/// persisting a model.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("Unknown backbone family: {0}")]
    UnknownFamily(String),

    #[error("Invalid model type: neither a tabular nor a vision branch was given")]
    NoBranch,

    #[error("Backbone {name} cannot be used as the {role} branch")]
    WrongFamilyKind { name: String, role: &'static str },

    #[error("Invalid labels: {0}")]
    InvalidLabels(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("No available accelerator: requested {requested:?}, {available} available")]
    AcceleratorUnavailable { requested: Vec<usize>, available: usize },

    #[error("Input mismatch: {0}")]
    InputMismatch(String),

    #[error("No weight has been stored yet")]
    NoSnapshot,

    #[error("Weight file {}: {reason}", path.display())]
    WeightFormat { path: PathBuf, reason: String },

    #[error("Weight {name}: expected shape {expected:?}, found {found:?}")]
    WeightShape {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Weight file {}: checksum mismatch", path.display())]
    ChecksumMismatch { path: PathBuf },

    #[error("No weight files in {}", .0.display())]
    NoWeights(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Tensor error: {0}")]
    Tensor(#[from] medfusion_core::tensor::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
