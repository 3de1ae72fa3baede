use crate::{dtypes::Dtype, tensor::*};
use rand::Rng;

fn check_prob(p: f64, op: &'static str) -> Result<(), Error> {
    if !(0.0..=1.0).contains(&p) {
        return Err(Error::InvalidArgument(format!(
            "{op} probability {p} not in [0, 1]"
        )));
    }
    Ok(())
}

impl<E: Dtype> Tensor<E> {
    /// Zeroes each element with probability `p` and scales the survivors
    /// by `1 / (1 - p)`. The mask is drawn from the tensor's device rng.
    ///
    /// ```rust
    /// # use medfusion_core::prelude::*;
    /// let dev: Cpu = Default::default();
    /// let a: Tensor<f32> = dev.try_ones([4]).unwrap();
    /// let b = a.try_dropout(0.5).unwrap();
    /// assert!(b.as_vec().iter().all(|&x| x == 0.0 || x == 2.0));
    /// ```
    pub fn try_dropout(mut self, p: f64) -> Result<Self, Error> {
        check_prob(p, "dropout")?;
        if p == 0.0 {
            return Ok(self);
        }
        let scale = E::from_f64(1.0 / (1.0 - p)).unwrap_or_else(E::zero);
        let device = self.device.clone();
        let mut rng = device.rng();
        for x in self.data_mut().iter_mut() {
            *x = if p == 1.0 || rng.gen_bool(p) {
                E::zero()
            } else {
                *x * scale
            };
        }
        Ok(self)
    }

    /// Zeroes whole samples (items of the outermost axis) with probability
    /// `p` and scales the survivors by `1 / (1 - p)`. Used for stochastic
    /// depth in residual branches.
    pub fn try_drop_samples(mut self, p: f64) -> Result<Self, Error> {
        check_prob(p, "drop_samples")?;
        if p == 0.0 || self.is_empty() {
            return Ok(self);
        }
        let batch = self.dims().first().copied().unwrap_or(1).max(1);
        let row = self.len() / batch;
        let scale = E::from_f64(1.0 / (1.0 - p)).unwrap_or_else(E::zero);
        let device = self.device.clone();
        let mut rng = device.rng();
        for sample in self.data_mut().chunks_exact_mut(row) {
            let keep = p < 1.0 && !rng.gen_bool(p);
            for x in sample.iter_mut() {
                *x = if keep { *x * scale } else { E::zero() };
            }
        }
        Ok(self)
    }
}
