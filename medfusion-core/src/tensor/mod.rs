//! The [Tensor] struct, the [Cpu] device and the tensor [Error] type.
//!
//! A tensor is a reference counted buffer plus a runtime [Shape]. Cloning a
//! tensor is cheap: the buffer is shared until one of the clones is mutated,
//! at which point that clone copies the data (copy on write).
//!
//! ```rust
//! # use medfusion_core::prelude::*;
//! let dev: Cpu = Default::default();
//! let a: Tensor<f32> = dev.tensor_from_vec(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
//! let b = a.clone().try_relu().unwrap();
//! assert_eq!(b.as_vec(), [1.0, 2.0, 3.0, 4.0]);
//! ```

mod cpu;
mod error;
pub(crate) mod safetensors;

pub use cpu::Cpu;
pub use error::Error;

use crate::{dtypes::Dtype, shapes::Shape};
use rand_distr::Distribution;
use std::sync::Arc;

/// A host resident nd-array with a runtime shape.
#[derive(Clone)]
pub struct Tensor<E> {
    pub(crate) data: Arc<Vec<E>>,
    pub(crate) shape: Shape,
    pub(crate) device: Cpu,
}

impl<E> std::fmt::Debug for Tensor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("dtype", &std::any::type_name::<E>())
            .finish()
    }
}

impl<E: Dtype> Tensor<E> {
    pub(crate) fn from_parts(data: Vec<E>, shape: Shape, device: Cpu) -> Self {
        debug_assert_eq!(data.len(), shape.num_elements());
        Self {
            data: Arc::new(data),
            shape,
            device,
        }
    }

    /// Builds a tensor on the same device as `self`.
    pub(crate) fn with_data(&self, data: Vec<E>, shape: impl Into<Shape>) -> Self {
        Self::from_parts(data, shape.into(), self.device.clone())
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn device(&self) -> &Cpu {
        &self.device
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    /// Copies the data out into a row major vector.
    pub fn as_vec(&self) -> Vec<E> {
        self.data.as_ref().clone()
    }

    /// Mutable access to the buffer. Copies the data first if it is shared
    /// with another tensor.
    pub(crate) fn data_mut(&mut self) -> &mut Vec<E> {
        Arc::make_mut(&mut self.data)
    }

    /// Overwrites the contents with `src`, which must have exactly as many
    /// elements as `self`.
    pub fn copy_from(&mut self, src: &[E]) -> Result<(), Error> {
        if src.len() != self.len() {
            return Err(Error::WrongNumElements {
                expected: self.len(),
                found: src.len(),
            });
        }
        self.data_mut().copy_from_slice(src);
        Ok(())
    }

    /// Returns the same data viewed with a different shape.
    pub fn try_reshape(self, shape: impl Into<Shape>) -> Result<Self, Error> {
        let shape = shape.into();
        if shape.num_elements() != self.len() {
            return Err(Error::ShapeMismatch {
                op: "reshape",
                lhs: self.shape.concrete(),
                rhs: shape.concrete(),
            });
        }
        Ok(Self {
            data: self.data,
            shape,
            device: self.device,
        })
    }

    /// Checks that the tensor has rank `N` and returns its dimensions.
    pub fn try_dims<const N: usize>(&self, op: &'static str) -> Result<[usize; N], Error> {
        let dims = self.dims();
        if dims.len() != N {
            return Err(Error::InvalidArgument(format!(
                "{op} expects a rank {N} tensor, found shape {:?}",
                self.shape
            )));
        }
        let mut out = [0; N];
        out.copy_from_slice(dims);
        Ok(out)
    }

    pub fn try_fill_with_zeros(&mut self) -> Result<(), Error> {
        self.data_mut().fill(E::zero());
        Ok(())
    }

    pub fn try_fill_with_ones(&mut self) -> Result<(), Error> {
        self.data_mut().fill(E::one());
        Ok(())
    }

    /// Fills the tensor with samples from `distr`, drawn from the device rng.
    pub fn try_fill_with_distr<D: Distribution<E>>(&mut self, distr: D) -> Result<(), Error> {
        let device = self.device.clone();
        let mut rng = device.rng();
        for x in self.data_mut().iter_mut() {
            *x = distr.sample(&mut *rng);
        }
        Ok(())
    }

    /// Little endian bytes of every element, in row major order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * std::mem::size_of::<E>());
        for x in self.data.iter() {
            x.write_le_bytes(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_clone_is_copy_on_write() {
        let dev: TestDevice = Default::default();
        let a = dev.tensor_from_vec(vec![1.0 as TestDtype, 2.0], [2]).unwrap();
        let mut b = a.clone();
        b.copy_from(&[3.0, 4.0]).unwrap();
        assert_eq!(a.as_vec(), [1.0, 2.0]);
        assert_eq!(b.as_vec(), [3.0, 4.0]);
    }

    #[test]
    fn test_reshape_checks_elements() {
        let dev: TestDevice = Default::default();
        let a = dev.try_zeros::<TestDtype>([2, 3]).unwrap();
        assert_eq!(a.clone().try_reshape([3, 2]).unwrap().dims(), &[3, 2]);
        assert!(a.try_reshape([4, 2]).is_err());
    }

    #[test]
    fn test_try_dims() {
        let dev: TestDevice = Default::default();
        let a = dev.try_zeros::<TestDtype>([2, 3, 4]).unwrap();
        assert_eq!(a.try_dims::<3>("test").unwrap(), [2, 3, 4]);
        assert!(a.try_dims::<2>("test").is_err());
    }
}
