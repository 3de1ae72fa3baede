//! Operations on tensors like [Tensor::try_matmul()], [Tensor::try_conv2d()],
//! [Tensor::try_concat_along()] and more.
//!
//! Every operation validates the shapes of its operands and returns
//! [crate::tensor::Error] instead of panicking. Operations consume their
//! receiver; clone a tensor first (which is cheap) to keep using it.
//!
//! | Operation | medfusion | pytorch |
//! | --- | --- | --- |
//! | Unary Operations | `a.try_relu()` | `a.relu()` |
//! | Binary Operations | `a.try_add(b)` | `a + b` |
//! | gemm | [Tensor::try_matmul()] | `a @ b` |
//! | 2d Convolution | [Tensor::try_conv2d()] | `torch.conv2d` |
//! | Pooling | [Tensor::try_max_pool2d()] | `torch.max_pool2d` |
//! | Concat | [Tensor::try_concat_along()] | `torch.concat` |
//! | Dropout | [Tensor::try_dropout()] | `torch.dropout` |

mod binary;
mod concat;
mod conv2d;
mod dropout;
mod matmul;
mod normalize;
mod pool2d;
mod reduce;
mod select;
mod unary;

pub use conv2d::Conv2DParams;
pub use pool2d::Pool2DParams;

#[allow(unused_imports)]
use crate::tensor::Tensor;
