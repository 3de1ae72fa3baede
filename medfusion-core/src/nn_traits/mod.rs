//! Traits shared by every neural network module.
//!
//! A module is described by a small configuration struct that implements
//! [BuildOnDevice]. Building it allocates the parameters on a [Cpu], and the
//! built module implements [Module] for running forward passes plus
//! [TensorCollection] for walking its parameters and buffers. Parameter
//! initialisation ([ResetParams]), parameter counting ([NumParams]) and
//! safetensors io ([SaveSafeTensors], [LoadSafeTensors]) are all derived
//! from [TensorCollection].

mod tuples;
mod vecs;

use crate::{
    dtypes::Dtype,
    tensor::{Cpu, Error, Tensor},
};
use rand_distr::Uniform;
use std::{collections::HashMap, path::Path};

/// Immutable forward of a module. `try_forward` runs in inference mode:
/// dropout is the identity and batch norm uses its running statistics.
/// `try_forward_mut` runs in training mode and may update buffers.
pub trait Module<X> {
    type Output;

    fn forward(&self, x: X) -> Self::Output {
        self.try_forward(x).unwrap()
    }

    fn try_forward(&self, x: X) -> Result<Self::Output, Error>;

    fn forward_mut(&mut self, x: X) -> Self::Output {
        self.try_forward_mut(x).unwrap()
    }

    fn try_forward_mut(&mut self, x: X) -> Result<Self::Output, Error> {
        self.try_forward(x)
    }
}

/// Something that can be allocated on a device.
pub trait BuildOnDevice<E: Dtype>: Clone {
    type Built: Clone + std::fmt::Debug;
    fn build_on_device(&self, device: &Cpu) -> Self::Built {
        self.try_build_on_device(device).unwrap()
    }
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error>;
}

/// How a tensor is (re)initialised by [ResetParams].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamInit {
    Zeros,
    Ones,
    /// Uniform in `[-bound, bound)`.
    Uniform(f64),
}

/// Per tensor information handed to [TensorCollection::try_iter_tensors_mut].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorOptions {
    pub init: ParamInit,
    /// `false` for buffers like batch norm running statistics.
    pub trainable: bool,
}

impl TensorOptions {
    pub fn zeros() -> Self {
        Self {
            init: ParamInit::Zeros,
            trainable: true,
        }
    }

    pub fn ones() -> Self {
        Self {
            init: ParamInit::Ones,
            trainable: true,
        }
    }

    pub fn uniform(bound: f64) -> Self {
        Self {
            init: ParamInit::Uniform(bound),
            trainable: true,
        }
    }

    pub fn buffer(init: ParamInit) -> Self {
        Self {
            init,
            trainable: false,
        }
    }
}

/// Joins a parent location and a field name with a `.`, the key scheme
/// used in safetensors files. An empty side contributes nothing.
pub fn join_location(location: &str, name: &str) -> String {
    match (location.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => location.to_string(),
        (false, false) => format!("{location}.{name}"),
    }
}

/// A module that owns named tensors.
pub trait TensorCollection<E: Dtype> {
    /// Calls `f` with the full key and options of every tensor, in a stable
    /// order.
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>));

    /// Calls `f` with the full key, options and a mutable reference of every
    /// tensor, in the same order as [TensorCollection::iter_tensors].
    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error>;
}

impl<E: Dtype> TensorCollection<E> for Tensor<E> {
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        f(location, TensorOptions::zeros(), self)
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        f(location, TensorOptions::zeros(), self)
    }
}

/// Re-initialises every tensor according to its [TensorOptions].
pub trait ResetParams<E: Dtype>: TensorCollection<E> {
    fn try_reset_params(&mut self) -> Result<(), Error> {
        self.try_iter_tensors_mut("", &mut |_, options, t| match options.init {
            ParamInit::Zeros => t.try_fill_with_zeros(),
            ParamInit::Ones => t.try_fill_with_ones(),
            ParamInit::Uniform(bound) if bound > 0.0 => {
                let b = E::from_f64(bound).ok_or_else(|| {
                    Error::InvalidArgument(format!("init bound {bound} not representable"))
                })?;
                t.try_fill_with_distr(Uniform::new(-b, b))
            }
            ParamInit::Uniform(_) => t.try_fill_with_zeros(),
        })
    }
}
impl<E: Dtype, T: TensorCollection<E>> ResetParams<E> for T {}

/// Counts scalars.
pub trait NumParams<E: Dtype>: TensorCollection<E> {
    /// Number of trainable scalars. Buffers are not counted.
    fn num_trainable_params(&self) -> usize {
        let mut total = 0;
        self.iter_tensors("", &mut |_, options, t| {
            if options.trainable {
                total += t.len();
            }
        });
        total
    }

    /// Number of scalars across parameters and buffers.
    fn num_tensor_elements(&self) -> usize {
        let mut total = 0;
        self.iter_tensors("", &mut |_, _, t| total += t.len());
        total
    }
}
impl<E: Dtype, T: TensorCollection<E>> NumParams<E> for T {}

/// One serialized tensor: key, dtype, shape and little endian bytes.
pub type SafeTensorEntry = (String, safetensors::Dtype, Vec<usize>, Vec<u8>);

/// Something that can be written to a `.safetensors` file.
pub trait SaveSafeTensors<E: Dtype>: TensorCollection<E> {
    fn write_safetensors(&self, location: &str, tensors: &mut Vec<SafeTensorEntry>) {
        self.iter_tensors(location, &mut |key, _, t| {
            tensors.push((key.to_string(), E::DTYPE, t.dims().to_vec(), t.to_le_bytes()))
        });
    }

    /// Saves every tensor into the `.safetensors` file at `path`.
    ///
    /// ```rust
    /// # use medfusion_core::prelude::*;
    /// # let dir = tempfile::tempdir().unwrap();
    /// let dev: Cpu = Default::default();
    /// let t: Tensor<f32> = dev.try_ones([2, 2]).unwrap();
    /// t.save_safetensors(dir.path().join("t.safetensors")).unwrap();
    /// ```
    fn save_safetensors<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        self.save_safetensors_with_metadata(path, None)
    }

    /// Like [SaveSafeTensors::save_safetensors] but also writes `metadata`
    /// into the file header.
    fn save_safetensors_with_metadata<P: AsRef<Path>>(
        &self,
        path: P,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), Error> {
        let mut tensors = Vec::new();
        self.write_safetensors("", &mut tensors);
        serialize_entries(&tensors, metadata, path.as_ref())
    }
}
impl<E: Dtype, T: TensorCollection<E>> SaveSafeTensors<E> for T {}

/// Writes already collected entries to `path`.
pub fn serialize_entries(
    tensors: &[SafeTensorEntry],
    metadata: Option<HashMap<String, String>>,
    path: &Path,
) -> Result<(), Error> {
    let views = tensors
        .iter()
        .map(|(k, dtype, shape, data)| {
            safetensors::tensor::TensorView::new(*dtype, shape.clone(), data)
                .map(|view| (k.clone(), view))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let views = views.iter().map(|(k, v)| (k.clone(), v)).collect::<Vec<_>>();
    safetensors::serialize_to_file(views, &metadata, path)?;
    Ok(())
}

/// Something that can be loaded from a `.safetensors` file.
pub trait LoadSafeTensors<E: Dtype>: TensorCollection<E> {
    /// Copies every tensor from `tensors`. Fails on the first missing key
    /// unless `skip_missing` is set, and on any dtype or shape mismatch.
    fn read_safetensors(
        &mut self,
        location: &str,
        tensors: &safetensors::SafeTensors,
        skip_missing: bool,
    ) -> Result<(), Error> {
        self.try_iter_tensors_mut(location, &mut |key, _, t| {
            t.load_safetensor(tensors, key, skip_missing).map(|_| ())
        })
    }

    /// Loads data from the `.safetensors` file at `path`.
    fn load_safetensors<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let f = std::fs::File::open(path)?;
        let buffer = unsafe { memmap2::MmapOptions::new().map(&f)? };
        let tensors = safetensors::SafeTensors::deserialize(&buffer)?;
        self.read_safetensors("", &tensors, false)
    }
}
impl<E: Dtype, T: TensorCollection<E>> LoadSafeTensors<E> for T {}

/// Extension method that calls [BuildOnDevice] and then [ResetParams].
pub trait BuildModuleExt {
    fn build_module<E: Dtype, M: BuildOnDevice<E>>(&self, m: M) -> M::Built
    where
        M::Built: ResetParams<E>,
    {
        self.try_build_module(m).unwrap()
    }

    fn try_build_module<E: Dtype, M: BuildOnDevice<E>>(&self, m: M) -> Result<M::Built, Error>
    where
        M::Built: ResetParams<E>;
}

impl BuildModuleExt for Cpu {
    fn try_build_module<E: Dtype, M: BuildOnDevice<E>>(&self, m: M) -> Result<M::Built, Error>
    where
        M::Built: ResetParams<E>,
    {
        let mut module = m.try_build_on_device(self)?;
        module.try_reset_params()?;
        Ok(module)
    }
}
