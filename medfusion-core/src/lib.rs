//! # medfusion-core
//!
//! Host tensors with runtime shapes and the module traits that the
//! medfusion networks are built from.
//!
//! # Tensors
//!
//! *See [tensor] and [tensor_ops] for more information.*
//!
//! A [tensor::Tensor] is a reference counted, row major buffer of a float
//! [dtypes::Dtype] together with a [shapes::Shape]. Tensors are allocated by
//! a [tensor::Cpu] device, which also owns the random number generator used
//! for initialisation and dropout.
//!
//! ```rust
//! # use medfusion_core::prelude::*;
//! let dev: Cpu = Cpu::seed_from_u64(42);
//! let x: Tensor<f32> = dev.try_ones([2, 3]).unwrap();
//! let y = x.try_sub_scalar(1.0).unwrap();
//! assert_eq!(y.as_vec(), [0.0; 6]);
//! ```
//!
//! # Modules
//!
//! *See [nn_traits] for more information.*
//!
//! Every layer is described by a configuration that implements
//! [nn_traits::BuildOnDevice]. The built layer implements
//! [nn_traits::Module] for its forward pass and
//! [nn_traits::TensorCollection] for walking its tensors, which in turn
//! gives it parameter initialisation and safetensors io for free.

pub mod dtypes;
pub mod nn_traits;
pub mod shapes;
pub mod tensor;
pub mod tensor_ops;

/// Contains subset of all public exports.
pub mod prelude {
    pub use crate::dtypes::*;
    pub use crate::nn_traits::*;
    pub use crate::shapes::*;
    pub use crate::tensor::*;
    pub use crate::tensor_ops::*;
}

#[cfg(test)]
pub(crate) mod tests {
    pub use num_traits::{Float, NumCast, Zero};

    pub type TestDevice = crate::tensor::Cpu;

    #[cfg(not(feature = "test-f64"))]
    pub type TestDtype = f32;

    #[cfg(feature = "test-f64")]
    pub type TestDtype = f64;

    pub trait AssertClose {
        type Elem: std::fmt::Display + std::fmt::Debug + Copy;
        const DEFAULT_TOLERANCE: Self::Elem;
        fn get_default_tol(&self) -> Self::Elem {
            Self::DEFAULT_TOLERANCE
        }
        fn get_far_pair(
            &self,
            rhs: &Self,
            tolerance: Self::Elem,
        ) -> Option<(Self::Elem, Self::Elem)>;
        fn assert_close(&self, rhs: &Self, tolerance: Self::Elem)
        where
            Self: std::fmt::Debug,
        {
            if let Some((l, r)) = self.get_far_pair(rhs, tolerance) {
                panic!("lhs != rhs | {l} != {r}\n\n{self:?}\n\n{rhs:?}");
            }
        }
    }

    impl AssertClose for f32 {
        type Elem = f32;
        const DEFAULT_TOLERANCE: Self::Elem = 1e-5;
        fn get_far_pair(&self, rhs: &Self, tolerance: f32) -> Option<(f32, f32)> {
            if (self - rhs).abs() > tolerance {
                Some((*self, *rhs))
            } else {
                None
            }
        }
    }

    impl AssertClose for f64 {
        type Elem = f64;
        const DEFAULT_TOLERANCE: Self::Elem = 1e-6;
        fn get_far_pair(&self, rhs: &Self, tolerance: f64) -> Option<(f64, f64)> {
            if (self - rhs).abs() > tolerance {
                Some((*self, *rhs))
            } else {
                None
            }
        }
    }

    impl<T: AssertClose + std::fmt::Debug> AssertClose for Vec<T>
    where
        T::Elem: num_traits::Float,
    {
        type Elem = T::Elem;
        const DEFAULT_TOLERANCE: Self::Elem = T::DEFAULT_TOLERANCE;
        fn get_far_pair(
            &self,
            rhs: &Self,
            tolerance: Self::Elem,
        ) -> Option<(Self::Elem, Self::Elem)> {
            if self.len() != rhs.len() {
                let nan = <T::Elem as num_traits::Float>::nan();
                return Some((nan, nan));
            }
            for (l, r) in self.iter().zip(rhs.iter()) {
                if let Some(pair) = l.get_far_pair(r, tolerance) {
                    return Some(pair);
                }
            }
            None
        }
    }

    macro_rules! assert_close {
        ($Lhs:expr, $Rhs:expr) => {
            let lhs = $Lhs;
            let tol = AssertClose::get_default_tol(&lhs);
            let far_pair = AssertClose::get_far_pair(&lhs, &$Rhs, tol);
            if let Some((l, r)) = far_pair {
                panic!("lhs != rhs | {l} != {r}");
            }
        };
        ($Lhs:expr, $Rhs:expr, $Tolerance:expr) => {{
            let far_pair = $Lhs.get_far_pair(
                &$Rhs,
                num_traits::FromPrimitive::from_f64($Tolerance).unwrap(),
            );
            if let Some((l, r)) = far_pair {
                panic!("lhs != rhs | {l} != {r}");
            }
        }};
    }
    pub(crate) use assert_close;
}
