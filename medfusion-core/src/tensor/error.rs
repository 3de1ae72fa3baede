/// Represents a number of different errors that can occur from creating tensors
/// or running tensor operations.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Not enough (or too many) elements were provided when creating a tensor
    WrongNumElements { expected: usize, found: usize },
    /// The operands of an operation have incompatible shapes
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    /// An operation received an argument it cannot work with, e.g. a dropout
    /// probability above 1.0 or a pooling window larger than the padded image
    InvalidArgument(String),
    SafeTensorError(safetensors::SafeTensorError),
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}

impl From<safetensors::SafeTensorError> for Error {
    fn from(e: safetensors::SafeTensorError) -> Self {
        Self::SafeTensorError(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e)
    }
}
