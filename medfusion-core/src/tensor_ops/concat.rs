use crate::{dtypes::Dtype, tensor::*};

impl<E: Dtype> Tensor<E> {
    /// Concatenates tensors along `axis`. All other dimensions must agree.
    ///
    /// ```rust
    /// # use medfusion_core::prelude::*;
    /// let dev: Cpu = Default::default();
    /// let a: Tensor<f32> = dev.try_zeros([2, 3]).unwrap();
    /// let b: Tensor<f32> = dev.try_ones([2, 1]).unwrap();
    /// let c = Tensor::try_concat_along(&[a, b], 1).unwrap();
    /// assert_eq!(c.dims(), &[2, 4]);
    /// ```
    pub fn try_concat_along(tensors: &[Tensor<E>], axis: usize) -> Result<Self, Error> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::InvalidArgument("concat of zero tensors".into()))?;
        let rank = first.shape.rank();
        if axis >= rank {
            return Err(Error::InvalidArgument(format!(
                "concat axis {axis} out of range for shape {:?}",
                first.shape
            )));
        }
        for t in tensors.iter().skip(1) {
            let same_rank = t.shape.rank() == rank;
            let same_other = same_rank
                && (0..rank).all(|i| i == axis || t.shape.dim(i) == first.shape.dim(i));
            if !same_other {
                return Err(Error::ShapeMismatch {
                    op: "concat",
                    lhs: first.shape.concrete(),
                    rhs: t.shape.concrete(),
                });
            }
        }

        let outer: usize = first.dims()[..axis].iter().product();
        let inner: usize = first.dims()[axis + 1..].iter().product();
        let total_axis: usize = tensors.iter().map(|t| t.shape.dim(axis)).sum();
        let mut out = Vec::with_capacity(outer * total_axis * inner);
        for o in 0..outer {
            for t in tensors {
                let block = t.shape.dim(axis) * inner;
                out.extend_from_slice(&t.as_slice()[o * block..(o + 1) * block]);
            }
        }
        let mut dims = first.shape.concrete();
        dims[axis] = total_axis;
        Ok(first.with_data(out, dims))
    }

    /// Takes `len` consecutive items of the outermost axis starting at `start`.
    pub fn try_narrow_batch(&self, start: usize, len: usize) -> Result<Self, Error> {
        let dims = self.dims();
        let Some(&batch) = dims.first() else {
            return Err(Error::InvalidArgument("narrow of a scalar".into()));
        };
        if start + len > batch {
            return Err(Error::InvalidArgument(format!(
                "narrow [{start}, {}) out of range for batch {batch}",
                start + len
            )));
        }
        let row: usize = dims[1..].iter().product();
        let data = self.as_slice()[start * row..(start + len) * row].to_vec();
        let mut out_dims = dims.to_vec();
        out_dims[0] = len;
        Ok(self.with_data(data, out_dims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_concat_last_axis() {
        let dev: TestDevice = Default::default();
        let a = dev
            .tensor_from_vec(vec![1.0 as TestDtype, 2.0, 3.0, 4.0], [2, 2])
            .unwrap();
        let b = dev.tensor_from_vec(vec![9.0 as TestDtype, 8.0], [2, 1]).unwrap();
        let c = Tensor::try_concat_along(&[a, b], 1).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
        assert_eq!(c.as_vec(), [1.0, 2.0, 9.0, 3.0, 4.0, 8.0]);
    }

    #[test]
    fn test_concat_batch_axis() {
        let dev: TestDevice = Default::default();
        let a = dev.try_zeros::<TestDtype>([1, 2, 2]).unwrap();
        let b = dev.try_ones::<TestDtype>([2, 2, 2]).unwrap();
        let c = Tensor::try_concat_along(&[a, b], 0).unwrap();
        assert_eq!(c.dims(), &[3, 2, 2]);
        assert_eq!(c.as_vec()[..4], [0.0; 4]);
    }

    #[test]
    fn test_concat_mismatch() {
        let dev: TestDevice = Default::default();
        let a = dev.try_zeros::<TestDtype>([2, 2]).unwrap();
        let b = dev.try_zeros::<TestDtype>([3, 1]).unwrap();
        assert!(Tensor::try_concat_along(&[a, b], 1).is_err());
        assert!(Tensor::<TestDtype>::try_concat_along(&[], 0).is_err());
    }

    #[test]
    fn test_narrow_batch() {
        let dev: TestDevice = Default::default();
        let a = dev
            .tensor_from_vec((0..6).map(|i| i as TestDtype).collect(), [3, 2])
            .unwrap();
        assert_eq!(a.try_narrow_batch(1, 2).unwrap().as_vec(), [2.0, 3.0, 4.0, 5.0]);
        assert!(a.try_narrow_batch(2, 2).is_err());
    }
}
