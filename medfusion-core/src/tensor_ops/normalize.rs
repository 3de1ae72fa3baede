use crate::{dtypes::Dtype, tensor::*};

impl<E: Dtype> Tensor<E> {
    /// `x * scale[c] + shift[c]` for every channel `c` of a `(B, C, H, W)`
    /// tensor.
    pub fn try_channel_affine(mut self, scale: &[E], shift: &[E]) -> Result<Self, Error> {
        let [_, chan, h, w] = self.try_dims::<4>("channel_affine")?;
        if scale.len() != chan || shift.len() != chan {
            return Err(Error::ShapeMismatch {
                op: "channel_affine",
                lhs: self.shape.concrete(),
                rhs: vec![scale.len(), shift.len()],
            });
        }
        let plane = h * w;
        if plane == 0 {
            return Ok(self);
        }
        for (i, chunk) in self.data_mut().chunks_exact_mut(plane).enumerate() {
            let c = i % chan;
            let (a, b) = (scale[c], shift[c]);
            for x in chunk.iter_mut() {
                *x = *x * a + b;
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::*;

    #[test]
    fn test_channel_affine() {
        let dev: TestDevice = Default::default();
        let a = dev.try_ones::<TestDtype>([2, 2, 1, 1]).unwrap();
        let y = a.try_channel_affine(&[2.0, 3.0], &[0.5, -1.0]).unwrap();
        assert_eq!(y.as_vec(), [2.5, 2.0, 2.5, 2.0]);
    }

    #[test]
    fn test_channel_affine_wrong_width() {
        let dev: TestDevice = Default::default();
        let a = dev.try_ones::<TestDtype>([1, 2, 1, 1]).unwrap();
        assert!(a.try_channel_affine(&[1.0], &[0.0]).is_err());
    }
}
