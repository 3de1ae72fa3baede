//! Element types that tensors can hold.
//!
//! Only floating point types are supported: every network in medfusion is a
//! float network, and weight files are written with the matching
//! [safetensors::Dtype] tag.

use std::fmt::{Debug, Display};

/// Conversion between an element type and its safetensors representation.
pub trait SafeTensorsDtype: Sized {
    /// The tag written into the safetensors header.
    const DTYPE: safetensors::Dtype;

    /// Appends the little endian bytes of `self` to `out`.
    fn write_le_bytes(&self, out: &mut Vec<u8>);

    /// Reads a value from exactly `size_of::<Self>()` little endian bytes.
    fn from_le_bytes(bytes: &[u8]) -> Self;
}

/// Represents a floating point number that tensors and modules are generic over.
pub trait Dtype:
    'static
    + Copy
    + Clone
    + Default
    + Debug
    + Display
    + PartialOrd
    + Send
    + Sync
    + num_traits::Float
    + num_traits::FromPrimitive
    + num_traits::ToPrimitive
    + rand_distr::uniform::SampleUniform
    + SafeTensorsDtype
{
}

impl Dtype for f32 {}
impl Dtype for f64 {}

impl SafeTensorsDtype for f32 {
    const DTYPE: safetensors::Dtype = safetensors::Dtype::F32;
    fn write_le_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[..4]);
        f32::from_le_bytes(buf)
    }
}

impl SafeTensorsDtype for f64 {
    const DTYPE: safetensors::Dtype = safetensors::Dtype::F64;
    fn write_le_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_bytes_f32() {
        let mut buf = Vec::new();
        1.5f32.write_le_bytes(&mut buf);
        (-2.25f32).write_le_bytes(&mut buf);
        assert_eq!(buf.len(), 8);
        assert_eq!(<f32 as SafeTensorsDtype>::from_le_bytes(&buf[..4]), 1.5);
        assert_eq!(<f32 as SafeTensorsDtype>::from_le_bytes(&buf[4..]), -2.25);
    }

    #[test]
    fn test_le_bytes_f64() {
        let mut buf = Vec::new();
        std::f64::consts::PI.write_le_bytes(&mut buf);
        assert_eq!(
            <f64 as SafeTensorsDtype>::from_le_bytes(&buf),
            std::f64::consts::PI
        );
    }
}
