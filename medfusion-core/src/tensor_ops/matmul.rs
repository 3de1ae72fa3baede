use crate::{dtypes::Dtype, tensor::*};

impl<E: Dtype> Tensor<E> {
    /// Matrix multiplication of a `(M, K)` tensor with a `(K, N)` tensor.
    ///
    /// ```rust
    /// # use medfusion_core::prelude::*;
    /// let dev: Cpu = Default::default();
    /// let a: Tensor<f32> = dev.try_ones([3, 2]).unwrap();
    /// let b: Tensor<f32> = dev.try_ones([2, 4]).unwrap();
    /// assert_eq!(a.try_matmul(&b).unwrap().dims(), &[3, 4]);
    /// ```
    pub fn try_matmul(self, rhs: &Tensor<E>) -> Result<Self, Error> {
        let [m, k] = self.try_dims::<2>("matmul")?;
        let [k2, n] = rhs.try_dims::<2>("matmul")?;
        if k != k2 {
            return Err(Error::ShapeMismatch {
                op: "matmul",
                lhs: self.shape.concrete(),
                rhs: rhs.shape.concrete(),
            });
        }
        let lhs = self.as_slice();
        let rhs = rhs.as_slice();
        let mut out = vec![E::zero(); m * n];
        for i in 0..m {
            let row = &mut out[i * n..(i + 1) * n];
            for p in 0..k {
                let a = lhs[i * k + p];
                if a == E::zero() {
                    continue;
                }
                let r = &rhs[p * n..(p + 1) * n];
                for (o, b) in row.iter_mut().zip(r.iter()) {
                    *o = *o + a * *b;
                }
            }
        }
        Ok(self.with_data(out, [m, n]))
    }

    /// Swaps the two axes of a rank 2 tensor.
    pub fn try_transpose(self) -> Result<Self, Error> {
        let [m, n] = self.try_dims::<2>("transpose")?;
        let src = self.as_slice();
        let mut out = Vec::with_capacity(m * n);
        for j in 0..n {
            for i in 0..m {
                out.push(src[i * n + j]);
            }
        }
        Ok(self.with_data(out, [n, m]))
    }
}
