use crate::{dtypes::Dtype, tensor::*};

impl<E: Dtype> Tensor<E> {
    /// Picks column `col` of a `(B, N)` tensor, keeping a trailing unit axis:
    /// the result is `(B, 1)`.
    pub fn try_select_column(self, col: usize) -> Result<Self, Error> {
        let [batch, n] = self.try_dims::<2>("select_column")?;
        if col >= n {
            return Err(Error::InvalidArgument(format!(
                "column {col} out of range for shape {:?}",
                self.shape
            )));
        }
        let out = self.as_slice().chunks_exact(n).map(|row| row[col]).collect();
        Ok(self.with_data(out, [batch, 1]))
    }
}
