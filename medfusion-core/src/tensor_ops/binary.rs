use crate::{dtypes::Dtype, tensor::*};

impl<E: Dtype> Tensor<E> {
    fn try_zip_with(mut self, rhs: &Tensor<E>, op: &'static str, f: impl Fn(E, E) -> E) -> Result<Self, Error> {
        if self.shape != rhs.shape {
            return Err(Error::ShapeMismatch {
                op,
                lhs: self.shape.concrete(),
                rhs: rhs.shape.concrete(),
            });
        }
        for (l, r) in self.data_mut().iter_mut().zip(rhs.data.iter()) {
            *l = f(*l, *r);
        }
        Ok(self)
    }

    /// Elementwise `self + rhs`. Shapes must be equal.
    pub fn try_add(self, rhs: Tensor<E>) -> Result<Self, Error> {
        self.try_zip_with(&rhs, "add", |a, b| a + b)
    }

    /// Elementwise `self * rhs`. Shapes must be equal.
    pub fn try_mul(self, rhs: Tensor<E>) -> Result<Self, Error> {
        self.try_zip_with(&rhs, "mul", |a, b| a * b)
    }

    /// Adds `bias` of shape `(C,)` along the last axis of a `(B, C)` tensor.
    pub fn try_add_bias1d(mut self, bias: &Tensor<E>) -> Result<Self, Error> {
        let [_, c] = self.try_dims::<2>("add_bias1d")?;
        if bias.dims() != [c] {
            return Err(Error::ShapeMismatch {
                op: "add_bias1d",
                lhs: self.shape.concrete(),
                rhs: bias.shape.concrete(),
            });
        }
        if c > 0 {
            for row in self.data_mut().chunks_exact_mut(c) {
                for (x, b) in row.iter_mut().zip(bias.data.iter()) {
                    *x = *x + *b;
                }
            }
        }
        Ok(self)
    }

    /// Adds `bias` of shape `(C,)` to every channel of a `(B, C, H, W)` tensor.
    pub fn try_add_bias2d(self, bias: &Tensor<E>) -> Result<Self, Error> {
        let [_, c, _, _] = self.try_dims::<4>("add_bias2d")?;
        if bias.dims() != [c] {
            return Err(Error::ShapeMismatch {
                op: "add_bias2d",
                lhs: self.shape.concrete(),
                rhs: bias.shape.concrete(),
            });
        }
        let ones = vec![E::one(); c];
        self.try_channel_affine(&ones, bias.as_slice())
    }

    /// Multiplies every channel of a `(B, C, H, W)` tensor by the matching
    /// entry of a `(B, C)` tensor. Used by squeeze-and-excitation gates.
    pub fn try_mul_channels(mut self, scale: &Tensor<E>) -> Result<Self, Error> {
        let [b, c, h, w] = self.try_dims::<4>("mul_channels")?;
        if scale.dims() != [b, c] {
            return Err(Error::ShapeMismatch {
                op: "mul_channels",
                lhs: self.shape.concrete(),
                rhs: scale.shape.concrete(),
            });
        }
        let plane = h * w;
        if plane > 0 {
            for (chunk, s) in self.data_mut().chunks_exact_mut(plane).zip(scale.data.iter()) {
                for x in chunk.iter_mut() {
                    *x = *x * *s;
                }
            }
        }
        Ok(self)
    }
}
