use crate::{dtypes::Dtype, tensor::*};

impl<E: Dtype> Tensor<E> {
    fn try_fold_all(&self, op: &'static str, pick: impl Fn(E, E) -> E) -> Result<E, Error> {
        let mut iter = self.as_slice().iter().copied();
        let first = iter
            .next()
            .ok_or_else(|| Error::InvalidArgument(format!("{op} of an empty tensor")))?;
        Ok(iter.fold(first, pick))
    }

    /// The smallest element of the whole tensor.
    pub fn try_min_value(&self) -> Result<E, Error> {
        self.try_fold_all("min", |a, b| if b < a { b } else { a })
    }

    /// The largest element of the whole tensor.
    pub fn try_max_value(&self) -> Result<E, Error> {
        self.try_fold_all("max", |a, b| if b > a { b } else { a })
    }

    /// Per channel mean and biased variance of a `(B, C, H, W)` tensor,
    /// reduced over the batch and spatial axes.
    pub fn try_channel_moments(&self) -> Result<(Vec<E>, Vec<E>), Error> {
        let [batch, chan, h, w] = self.try_dims::<4>("channel_moments")?;
        let plane = h * w;
        let count = batch * plane;
        if count == 0 {
            return Err(Error::InvalidArgument(
                "channel_moments over an empty batch".into(),
            ));
        }
        let n = E::from_usize(count).unwrap_or_else(E::one);
        let src = self.as_slice();
        let mut mean = vec![E::zero(); chan];
        let mut var = vec![E::zero(); chan];
        for c in 0..chan {
            let values = (0..batch).flat_map(|b| {
                let start = (b * chan + c) * plane;
                src[start..start + plane].iter().copied()
            });
            let m = values.clone().fold(E::zero(), |a, x| a + x) / n;
            let v = values.fold(E::zero(), |a, x| a + (x - m) * (x - m)) / n;
            mean[c] = m;
            var[c] = v;
        }
        Ok((mean, var))
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::*;

    #[test]
    fn test_min_max() {
        let dev: TestDevice = Default::default();
        let a = dev
            .tensor_from_vec(vec![3.0 as TestDtype, -1.0, 7.0, 2.0], [2, 2])
            .unwrap();
        assert_eq!(a.try_min_value().unwrap(), -1.0);
        assert_eq!(a.try_max_value().unwrap(), 7.0);
        let empty = dev.try_zeros::<TestDtype>([0, 2]).unwrap();
        assert!(empty.try_min_value().is_err());
    }

    #[test]
    fn test_channel_moments() {
        let dev: TestDevice = Default::default();
        let a = dev
            .tensor_from_vec(vec![1.0 as TestDtype, 3.0, 0.0, 0.0, 5.0, 7.0, 2.0, 2.0], [2, 2, 1, 2])
            .unwrap();
        let (mean, var) = a.try_channel_moments().unwrap();
        assert_close!(mean, vec![4.0, 1.0]);
        assert_close!(var, vec![5.0, 1.0]);
    }
}
