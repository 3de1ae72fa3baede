use crate::{dtypes::Dtype, tensor::*};

/// Window of a 2d pooling operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool2DParams {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl Pool2DParams {
    fn out_size(&self, input: usize) -> Option<usize> {
        let padded = input + 2 * self.padding;
        if self.stride == 0 || self.kernel == 0 || padded < self.kernel {
            return None;
        }
        Some((padded - self.kernel) / self.stride + 1)
    }
}

#[derive(Clone, Copy)]
enum PoolKind {
    Max,
    Avg,
}

impl<E: Dtype> Tensor<E> {
    fn try_pool2d(self, p: Pool2DParams, kind: PoolKind, op: &'static str) -> Result<Self, Error> {
        let [batch, chan, h, w] = self.try_dims::<4>(op)?;
        if h * w == 0 {
            return Err(Error::InvalidArgument(format!("{op} over an empty image")));
        }
        let (Some(oh), Some(ow)) = (p.out_size(h), p.out_size(w)) else {
            return Err(Error::InvalidArgument(format!(
                "{op} window {p:?} does not fit input {:?}",
                self.shape
            )));
        };
        let src = self.as_slice();
        let area = E::from_usize(p.kernel * p.kernel).unwrap_or_else(E::one);
        let mut out = Vec::with_capacity(batch * chan * oh * ow);
        for plane in src.chunks_exact(h * w).take(batch * chan) {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = match kind {
                        PoolKind::Max => E::neg_infinity(),
                        PoolKind::Avg => E::zero(),
                    };
                    for ky in 0..p.kernel {
                        let y = (oy * p.stride + ky) as isize - p.padding as isize;
                        if y < 0 || y >= h as isize {
                            continue;
                        }
                        for kx in 0..p.kernel {
                            let x = (ox * p.stride + kx) as isize - p.padding as isize;
                            if x < 0 || x >= w as isize {
                                continue;
                            }
                            let v = plane[y as usize * w + x as usize];
                            acc = match kind {
                                PoolKind::Max if v > acc => v,
                                PoolKind::Max => acc,
                                PoolKind::Avg => acc + v,
                            };
                        }
                    }
                    out.push(match kind {
                        PoolKind::Max => acc,
                        PoolKind::Avg => acc / area,
                    });
                }
            }
        }
        Ok(self.with_data(out, [batch, chan, oh, ow]))
    }

    /// Max pooling over `(B, C, H, W)`. Padded positions never win.
    pub fn try_max_pool2d(self, p: Pool2DParams) -> Result<Self, Error> {
        self.try_pool2d(p, PoolKind::Max, "max_pool2d")
    }

    /// Average pooling over `(B, C, H, W)`. Padded positions count as zeros.
    pub fn try_avg_pool2d(self, p: Pool2DParams) -> Result<Self, Error> {
        self.try_pool2d(p, PoolKind::Avg, "avg_pool2d")
    }

    /// Averages each channel over its spatial extent, `(B, C, H, W) -> (B, C)`.
    pub fn try_avg_pool_global(self) -> Result<Self, Error> {
        let [batch, chan, h, w] = self.try_dims::<4>("avg_pool_global")?;
        if h * w == 0 {
            return Err(Error::InvalidArgument(
                "avg_pool_global over an empty spatial extent".into(),
            ));
        }
        let n = E::from_usize(h * w).unwrap_or_else(E::one);
        let out = self
            .as_slice()
            .chunks_exact(h * w)
            .map(|plane| plane.iter().fold(E::zero(), |a, b| a + *b) / n)
            .collect();
        Ok(self.with_data(out, [batch, chan]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_max_pool2d_with_padding() {
        let dev: TestDevice = Default::default();
        let x = dev
            .tensor_from_vec(vec![-1.0 as TestDtype, -2.0, -3.0, -4.0], [1, 1, 2, 2])
            .unwrap();
        let p = Pool2DParams {
            kernel: 3,
            stride: 2,
            padding: 1,
        };
        let y = x.try_max_pool2d(p).unwrap();
        assert_eq!(y.dims(), &[1, 1, 1, 1]);
        assert_eq!(y.as_vec(), [-1.0]);
    }

    #[test]
    fn test_avg_pool2d() {
        let dev: TestDevice = Default::default();
        let x = dev
            .tensor_from_vec((0..16).map(|i| i as TestDtype).collect(), [1, 1, 4, 4])
            .unwrap();
        let p = Pool2DParams {
            kernel: 2,
            stride: 2,
            padding: 0,
        };
        let y = x.try_avg_pool2d(p).unwrap();
        assert_eq!(y.as_vec(), [2.5, 4.5, 10.5, 12.5]);
    }

    #[test]
    fn test_avg_pool_global() {
        let dev: TestDevice = Default::default();
        let x = dev
            .tensor_from_vec(vec![1.0 as TestDtype, 3.0, 5.0, 7.0], [1, 2, 1, 2])
            .unwrap();
        let y = x.try_avg_pool_global().unwrap();
        assert_eq!(y.dims(), &[1, 2]);
        assert_eq!(y.as_vec(), [2.0, 6.0]);
    }

    #[test]
    fn test_pool_window_too_large() {
        let dev: TestDevice = Default::default();
        let x = dev.try_zeros::<TestDtype>([1, 1, 1, 1]).unwrap();
        let p = Pool2DParams {
            kernel: 2,
            stride: 2,
            padding: 0,
        };
        assert!(x.try_avg_pool2d(p).is_err());
    }
}
