use super::{Error, Tensor};
use crate::dtypes::Dtype;
use ::safetensors::tensor::{SafeTensorError, SafeTensors};

impl<E: Dtype> Tensor<E> {
    /// Loads data from the [SafeTensors] entry with the given `key`.
    ///
    /// Returns `Ok(false)` when the key is absent and `skip_missing` is set.
    /// The stored dtype and shape must match `self` exactly.
    pub fn load_safetensor(
        &mut self,
        tensors: &SafeTensors,
        key: &str,
        skip_missing: bool,
    ) -> Result<bool, Error> {
        let tensor_view = match tensors.tensor(key) {
            Ok(ok) => ok,
            Err(SafeTensorError::TensorNotFound(_name)) if skip_missing => {
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if tensor_view.dtype() != E::DTYPE {
            return Err(Error::InvalidArgument(format!(
                "{key}: stored dtype {:?} does not match {:?}",
                tensor_view.dtype(),
                E::DTYPE
            )));
        }
        if tensor_view.shape() != self.dims() {
            return Err(Error::ShapeMismatch {
                op: "load_safetensor",
                lhs: self.shape.concrete(),
                rhs: tensor_view.shape().to_vec(),
            });
        }
        let num_bytes = std::mem::size_of::<E>();
        let data: Vec<E> = tensor_view
            .data()
            .chunks_exact(num_bytes)
            .map(E::from_le_bytes)
            .collect();
        self.copy_from(&data)?;
        Ok(true)
    }
}
