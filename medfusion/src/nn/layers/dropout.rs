use crate::prelude::*;

use super::parameterless;

/// Calls [Tensor::try_dropout()] in [Module::try_forward_mut()], and does nothing in [Module::try_forward()].
///
/// `inplace` mirrors the flag of the reference layer definitions. A backbone
/// may default to `true`; heads built by [crate::heads] always clear it.
///
/// Examples:
/// ```rust
/// # use medfusion::prelude::*;
/// # let dev: Cpu = Default::default();
/// let mut dropout = Dropout::new(0.5);
/// let x: Tensor<f32> = dev.try_ones([2, 5]).unwrap();
/// let r = dropout.try_forward_mut(x).unwrap();
/// assert!(r.as_vec().iter().all(|&v| v == 0.0 || v == 2.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dropout {
    pub p: f64,
    pub inplace: bool,
}

impl Dropout {
    pub fn new(p: f64) -> Self {
        Self { p, inplace: false }
    }
}

impl Default for Dropout {
    /// Sets `self.p` to `0.5`
    fn default() -> Self {
        Self::new(0.5)
    }
}

parameterless!(Dropout);

impl<E: Dtype> Module<Tensor<E>> for Dropout {
    type Output = Tensor<E>;

    /// Does nothing
    fn try_forward(&self, x: Tensor<E>) -> Result<Self::Output, Error> {
        Ok(x)
    }

    /// Applies dropout to the input tensor.
    fn try_forward_mut(&mut self, x: Tensor<E>) -> Result<Self::Output, Error> {
        x.try_dropout(self.p)
    }
}
