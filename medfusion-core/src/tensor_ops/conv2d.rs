use crate::{dtypes::Dtype, tensor::*};

/// Hyper parameters of a 2d convolution. The kernel size is read from the
/// weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2DParams {
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
    pub groups: usize,
}

impl Default for Conv2DParams {
    fn default() -> Self {
        Self {
            stride: 1,
            padding: 0,
            dilation: 1,
            groups: 1,
        }
    }
}

impl Conv2DParams {
    /// Output size along one spatial axis, or `None` if the kernel does not
    /// fit in the padded input.
    pub fn out_size(&self, input: usize, kernel: usize) -> Option<usize> {
        let padded = input + 2 * self.padding;
        let span = self.dilation * (kernel.max(1) - 1) + 1;
        if self.stride == 0 || padded < span {
            return None;
        }
        Some((padded - span) / self.stride + 1)
    }
}

impl<E: Dtype> Tensor<E> {
    /// 2d convolution of a `(B, C, H, W)` image with a
    /// `(O, C / groups, K, K)` filter. Returns `(B, O, H', W')`.
    pub fn try_conv2d(self, weight: &Tensor<E>, p: Conv2DParams) -> Result<Self, Error> {
        let [batch, chan, h, w] = self.try_dims::<4>("conv2d")?;
        let [out_chan, chan_per_group, kh, kw] = weight.try_dims::<4>("conv2d")?;
        let mismatch = || Error::ShapeMismatch {
            op: "conv2d",
            lhs: self.shape.concrete(),
            rhs: weight.shape.concrete(),
        };
        if p.groups == 0 || chan % p.groups != 0 || out_chan % p.groups != 0 {
            return Err(Error::InvalidArgument(format!(
                "conv2d groups={} must divide in={chan} and out={out_chan}",
                p.groups
            )));
        }
        if chan / p.groups != chan_per_group {
            return Err(mismatch());
        }
        let oh = p.out_size(h, kh).ok_or_else(mismatch)?;
        let ow = p.out_size(w, kw).ok_or_else(mismatch)?;
        let out_per_group = out_chan / p.groups;

        let img = self.as_slice();
        let filters = weight.as_slice();
        let mut out = vec![E::zero(); batch * out_chan * oh * ow];
        for b in 0..batch {
            for g in 0..p.groups {
                for o in 0..out_per_group {
                    let oc = g * out_per_group + o;
                    let dst = &mut out[((b * out_chan + oc) * oh) * ow..((b * out_chan + oc + 1) * oh) * ow];
                    for c in 0..chan_per_group {
                        let ic = g * chan_per_group + c;
                        let src = &img[((b * chan + ic) * h) * w..((b * chan + ic + 1) * h) * w];
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let f = filters[((oc * chan_per_group + c) * kh + ky) * kw + kx];
                                if f == E::zero() {
                                    continue;
                                }
                                for oy in 0..oh {
                                    let y = (oy * p.stride + ky * p.dilation) as isize - p.padding as isize;
                                    if y < 0 || y >= h as isize {
                                        continue;
                                    }
                                    let row = &src[y as usize * w..(y as usize + 1) * w];
                                    for ox in 0..ow {
                                        let x = (ox * p.stride + kx * p.dilation) as isize
                                            - p.padding as isize;
                                        if x < 0 || x >= w as isize {
                                            continue;
                                        }
                                        let d = &mut dst[oy * ow + ox];
                                        *d = *d + f * row[x as usize];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(self.with_data(out, [batch, out_chan, oh, ow]))
    }
}
