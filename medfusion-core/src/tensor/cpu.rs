use super::{Error, Tensor};
use crate::{dtypes::Dtype, shapes::Shape};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::Distribution;
use std::sync::{Arc, Mutex, MutexGuard};

/// A device that stores tensors on the heap and runs every operation on the
/// host cpu.
///
/// The random number generator is shared by every clone of a device, so
/// parameter initialisation and dropout masks drawn through any clone advance
/// the same stream.
#[derive(Clone, Debug)]
pub struct Cpu {
    pub(crate) rng: Arc<Mutex<StdRng>>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::seed_from_u64(0)
    }
}

impl Cpu {
    /// Constructs rng with the given seed.
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub(crate) fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates a tensor filled with zeros.
    pub fn try_zeros<E: Dtype>(&self, shape: impl Into<Shape>) -> Result<Tensor<E>, Error> {
        let shape = shape.into();
        let data = vec![E::zero(); shape.num_elements()];
        Ok(Tensor::from_parts(data, shape, self.clone()))
    }

    /// Creates a tensor filled with ones.
    pub fn try_ones<E: Dtype>(&self, shape: impl Into<Shape>) -> Result<Tensor<E>, Error> {
        let shape = shape.into();
        let data = vec![E::one(); shape.num_elements()];
        Ok(Tensor::from_parts(data, shape, self.clone()))
    }

    /// Creates a tensor from row major `data`. The number of elements must
    /// match the shape exactly.
    pub fn tensor_from_vec<E: Dtype>(
        &self,
        data: Vec<E>,
        shape: impl Into<Shape>,
    ) -> Result<Tensor<E>, Error> {
        let shape = shape.into();
        if data.len() != shape.num_elements() {
            return Err(Error::WrongNumElements {
                expected: shape.num_elements(),
                found: data.len(),
            });
        }
        Ok(Tensor::from_parts(data, shape, self.clone()))
    }

    /// Creates a tensor with values sampled from `distr`.
    pub fn try_sample<E: Dtype, D: Distribution<E>>(
        &self,
        shape: impl Into<Shape>,
        distr: D,
    ) -> Result<Tensor<E>, Error> {
        let shape = shape.into();
        let data = {
            let mut rng = self.rng();
            (0..shape.num_elements())
                .map(|_| distr.sample(&mut *rng))
                .collect()
        };
        Ok(Tensor::from_parts(data, shape, self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::Uniform;

    #[test]
    fn test_zeros_and_ones() {
        let dev: Cpu = Default::default();
        let z = dev.try_zeros::<f32>([2, 3]).unwrap();
        assert_eq!(z.as_vec(), vec![0.0; 6]);
        let o = dev.try_ones::<f64>([4]).unwrap();
        assert_eq!(o.as_vec(), vec![1.0; 4]);
    }

    #[test]
    fn test_tensor_from_vec_wrong_len() {
        let dev: Cpu = Default::default();
        let r = dev.tensor_from_vec(vec![1.0f32, 2.0, 3.0], [2, 2]);
        assert!(matches!(
            r,
            Err(Error::WrongNumElements {
                expected: 4,
                found: 3
            })
        ));
    }

    #[test]
    fn test_same_seed_same_samples() {
        let a = Cpu::seed_from_u64(42);
        let b = Cpu::seed_from_u64(42);
        let ta = a.try_sample::<f32, _>([16], Uniform::new(-1.0, 1.0)).unwrap();
        let tb = b.try_sample::<f32, _>([16], Uniform::new(-1.0, 1.0)).unwrap();
        assert_eq!(ta.as_vec(), tb.as_vec());
    }

    #[test]
    fn test_clones_share_rng() {
        let a = Cpu::seed_from_u64(7);
        let b = a.clone();
        let ta = a.try_sample::<f32, _>([8], Uniform::new(0.0, 1.0)).unwrap();
        let tb = b.try_sample::<f32, _>([8], Uniform::new(0.0, 1.0)).unwrap();
        assert_ne!(ta.as_vec(), tb.as_vec());
    }
}
