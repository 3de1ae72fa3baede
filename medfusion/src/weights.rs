//! Weight snapshots and weight files.
//!
//! A [WeightSnapshot] is a copy of every tensor of a network tagged with an
//! epoch. Tensors share storage copy on write, so capturing is cheap and
//! later training steps never leak into a snapshot.
//!
//! Files are safetensors named `weight_epoch-{epoch:03}.safetensors` (or
//! `..._best.safetensors`) inside a `weights` directory. The header carries
//! the epoch and a SHA-256 checksum of the tensors. Files are written to a
//! `.tmp` sibling first and renamed into place, and loading is strict: the
//! file must hold exactly the tensors of the network, with the same shapes,
//! and a matching checksum.

use crate::error::{ModelError, Result};
use medfusion_core::{
    dtypes::Dtype,
    nn_traits::{serialize_entries, LoadSafeTensors, SafeTensorEntry, TensorCollection},
    tensor::Tensor,
};
use safetensors::SafeTensors;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

/// Name of the directory weight files are saved into.
pub const WEIGHTS_DIR: &str = "weights";

const EXTENSION: &str = "safetensors";

/// `weight_epoch-003.safetensors` or `weight_epoch-003_best.safetensors`.
pub fn weight_file_name(epoch: usize, best: bool) -> String {
    format!(
        "weight_epoch-{epoch:03}{}.{EXTENSION}",
        if best { "_best" } else { "" }
    )
}

/// SHA-256 over names, shapes and bytes, in the given order.
fn checksum<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a [usize], &'a [u8])>,
{
    let mut hasher = Sha256::new();
    for (name, shape, data) in entries {
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((shape.len() as u64).to_le_bytes());
        for &d in shape {
            hasher.update((d as u64).to_le_bytes());
        }
        hasher.update((data.len() as u64).to_le_bytes());
        hasher.update(data);
    }
    format!("{:x}", hasher.finalize())
}

/// Every tensor of a network at some epoch.
#[derive(Debug, Clone)]
pub struct WeightSnapshot<E> {
    epoch: usize,
    tensors: BTreeMap<String, Tensor<E>>,
}

impl<E: Dtype> WeightSnapshot<E> {
    pub fn capture<M: TensorCollection<E>>(module: &M, epoch: usize) -> Self {
        let mut tensors = BTreeMap::new();
        module.iter_tensors("", &mut |key, _, t| {
            tensors.insert(key.to_string(), t.clone());
        });
        Self { epoch, tensors }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn tensors(&self) -> &BTreeMap<String, Tensor<E>> {
        &self.tensors
    }

    pub fn get(&self, key: &str) -> Option<&Tensor<E>> {
        self.tensors.get(key)
    }

    fn entries(&self) -> Vec<SafeTensorEntry> {
        self.tensors
            .iter()
            .map(|(k, t)| (k.clone(), E::DTYPE, t.dims().to_vec(), t.to_le_bytes()))
            .collect()
    }

    pub fn checksum(&self) -> String {
        let entries = self.entries();
        checksum(
            entries
                .iter()
                .map(|(k, _, shape, data)| (k.as_str(), shape.as_slice(), data.as_slice())),
        )
    }

    /// Saves into `<dir>/weights/`. With `as_best`, an existing non-best
    /// file of the same epoch is renamed instead of written again.
    pub fn save(&self, dir: &Path, as_best: bool) -> Result<PathBuf> {
        let dir = dir.join(WEIGHTS_DIR);
        fs::create_dir_all(&dir)?;
        let plain = dir.join(weight_file_name(self.epoch, false));
        let path = if as_best {
            let best = dir.join(weight_file_name(self.epoch, true));
            if plain.exists() {
                fs::rename(&plain, &best)?;
                tracing::info!(from = %plain.display(), to = %best.display(), "weight renamed as best");
                return Ok(best);
            }
            best
        } else {
            plain
        };
        self.write(&path)?;
        tracing::info!(path = %path.display(), epoch = self.epoch, "weight saved");
        Ok(path)
    }

    fn write(&self, path: &Path) -> Result<()> {
        let entries = self.entries();
        let digest = checksum(
            entries
                .iter()
                .map(|(k, _, shape, data)| (k.as_str(), shape.as_slice(), data.as_slice())),
        );
        let metadata = HashMap::from([
            ("epoch".to_string(), self.epoch.to_string()),
            ("checksum".to_string(), digest),
        ]);
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        serialize_entries(&entries, Some(metadata), &tmp)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Copies the snapshot into `module`. Keys and shapes must match exactly.
    pub fn restore_into<M: TensorCollection<E>>(&self, module: &mut M) -> Result<()> {
        let mut expected = BTreeMap::new();
        module.iter_tensors("", &mut |key, _, t| {
            expected.insert(key.to_string(), t.dims().to_vec());
        });
        check_keys(
            &expected,
            self.tensors.iter().map(|(k, t)| (k.as_str(), t.dims())),
            |reason| ModelError::InvalidParams(format!("snapshot does not fit: {reason}")),
        )?;
        module.try_iter_tensors_mut("", &mut |key, _, t| match self.tensors.get(key) {
            Some(src) => t.copy_from(src.as_slice()),
            None => Ok(()),
        })?;
        Ok(())
    }
}

/// Compares the live `expected` keys and shapes with `stored` ones.
fn check_keys<'a, I, F>(expected: &BTreeMap<String, Vec<usize>>, stored: I, err: F) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a [usize])>,
    F: Fn(String) -> ModelError,
{
    let mut seen = 0;
    for (key, shape) in stored {
        let Some(want) = expected.get(key) else {
            return Err(err(format!("unexpected tensor {key}")));
        };
        if want.as_slice() != shape {
            return Err(ModelError::WeightShape {
                name: key.to_string(),
                expected: want.clone(),
                found: shape.to_vec(),
            });
        }
        seen += 1;
    }
    if seen != expected.len() {
        return Err(err(format!(
            "{} tensors missing",
            expected.len().saturating_sub(seen)
        )));
    }
    Ok(())
}

fn format_error(path: &Path, reason: impl ToString) -> ModelError {
    ModelError::WeightFormat {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn map_file(path: &Path) -> Result<memmap2::Mmap> {
    let f = fs::File::open(path)?;
    let buffer = unsafe { memmap2::MmapOptions::new().map(&f)? };
    Ok(buffer)
}

/// Loads the weight file at `path` into `module`.
///
/// Nothing is copied unless the whole file checks out: every tensor of
/// `module` present with the same shape and dtype, no extra tensors, and
/// the checksum (when the header has one) matching the data.
pub fn load_into<E: Dtype, M: TensorCollection<E>>(module: &mut M, path: &Path) -> Result<()> {
    let buffer = map_file(path)?;
    let tensors = SafeTensors::deserialize(&buffer).map_err(|e| format_error(path, e))?;
    let (_, header) = SafeTensors::read_metadata(&buffer).map_err(|e| format_error(path, e))?;

    let stored: BTreeMap<String, _> = tensors.tensors().into_iter().collect();
    if let Some((key, view)) = stored.iter().find(|(_, v)| v.dtype() != E::DTYPE) {
        return Err(format_error(
            path,
            format!("{key} is stored as {:?}, expected {:?}", view.dtype(), E::DTYPE),
        ));
    }

    let mut expected = BTreeMap::new();
    module.iter_tensors("", &mut |key, _, t| {
        expected.insert(key.to_string(), t.dims().to_vec());
    });
    check_keys(
        &expected,
        stored.iter().map(|(k, v)| (k.as_str(), v.shape())),
        |reason| format_error(path, reason),
    )?;

    if let Some(want) = header.metadata().as_ref().and_then(|m| m.get("checksum")) {
        let found = checksum(
            stored
                .iter()
                .map(|(k, v)| (k.as_str(), v.shape(), v.data())),
        );
        if *want != found {
            return Err(ModelError::ChecksumMismatch {
                path: path.to_path_buf(),
            });
        }
    }

    module.try_iter_tensors_mut("", &mut |key, _, t| {
        t.load_safetensor(&tensors, key, false).map(|_| ())
    })?;
    tracing::info!(path = %path.display(), tensors = stored.len(), "weight loaded");
    Ok(())
}

/// Loads published backbone weights into `module`. Tensors in the file that
/// `module` does not have are ignored; every tensor of `module` must be
/// present.
pub fn load_pretrained<E: Dtype, M: TensorCollection<E>>(module: &mut M, path: &Path) -> Result<()> {
    let buffer = map_file(path).map_err(|e| format_error(path, e))?;
    let tensors = SafeTensors::deserialize(&buffer).map_err(|e| format_error(path, e))?;
    module
        .read_safetensors("", &tensors, false)
        .map_err(|e| format_error(path, e))?;
    tracing::info!(path = %path.display(), "pretrained weight loaded");
    Ok(())
}

/// Every weight file in `dir`, oldest first.
pub fn collect_weights<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION) {
            let modified = fs::metadata(&path)?.modified()?;
            files.push((modified, path));
        }
    }
    if files.is_empty() {
        return Err(ModelError::NoWeights(dir.to_path_buf()));
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}
