use crate::{
    dtypes::Dtype,
    tensor::{Cpu, Error, Tensor},
};

use super::{join_location, TensorOptions};

impl<E: Dtype, T: crate::nn_traits::BuildOnDevice<E>> crate::nn_traits::BuildOnDevice<E> for Vec<T> {
    type Built = Vec<T::Built>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        self.iter()
            .map(|m_i| m_i.try_build_on_device(device))
            .collect()
    }
}

impl<E: Dtype, T: crate::nn_traits::TensorCollection<E>> crate::nn_traits::TensorCollection<E>
    for Vec<T>
{
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        for (i, m_i) in self.iter().enumerate() {
            m_i.iter_tensors(&join_location(location, &i.to_string()), f);
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for (i, m_i) in self.iter_mut().enumerate() {
            m_i.try_iter_tensors_mut(&join_location(location, &i.to_string()), f)?;
        }
        Ok(())
    }
}

impl<Input, T: crate::nn_traits::Module<Input, Output = Input>> crate::nn_traits::Module<Input>
    for Vec<T>
{
    type Output = T::Output;

    fn try_forward(&self, mut x: Input) -> Result<Self::Output, Error> {
        for m_i in self.iter() {
            x = m_i.try_forward(x)?;
        }
        Ok(x)
    }
    fn try_forward_mut(&mut self, mut x: Input) -> Result<Self::Output, Error> {
        for m_i in self.iter_mut() {
            x = m_i.try_forward_mut(x)?;
        }
        Ok(x)
    }
}

impl<E: Dtype, T: crate::nn_traits::BuildOnDevice<E>> crate::nn_traits::BuildOnDevice<E>
    for Option<T>
{
    type Built = Option<T::Built>;
    fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
        self.as_ref()
            .map(|m| m.try_build_on_device(device))
            .transpose()
    }
}

impl<E: Dtype, T: crate::nn_traits::TensorCollection<E>> crate::nn_traits::TensorCollection<E>
    for Option<T>
{
    fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<E>)) {
        if let Some(m) = self {
            m.iter_tensors(location, f);
        }
    }

    fn try_iter_tensors_mut(
        &mut self,
        location: &str,
        f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<E>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        match self {
            Some(m) => m.try_iter_tensors_mut(location, f),
            None => Ok(()),
        }
    }
}

/// An absent module is the identity.
impl<Input, T: crate::nn_traits::Module<Input, Output = Input>> crate::nn_traits::Module<Input>
    for Option<T>
{
    type Output = Input;

    fn try_forward(&self, x: Input) -> Result<Self::Output, Error> {
        match self {
            Some(m) => m.try_forward(x),
            None => Ok(x),
        }
    }
    fn try_forward_mut(&mut self, x: Input) -> Result<Self::Output, Error> {
        match self {
            Some(m) => m.try_forward_mut(x),
            None => Ok(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::nn_traits::*;
    use crate::tests::*;

    #[test]
    fn test_vec_keys_are_indexed() {
        let dev: TestDevice = Default::default();
        let v = vec![
            dev.try_zeros::<TestDtype>([1]).unwrap(),
            dev.try_zeros::<TestDtype>([1]).unwrap(),
        ];
        let mut keys = Vec::new();
        v.iter_tensors("", &mut |k, _, _| keys.push(k.to_string()));
        assert_eq!(keys, ["0", "1"]);
    }

    #[test]
    fn test_none_has_no_tensors() {
        let none: Option<crate::tensor::Tensor<TestDtype>> = None;
        assert_eq!(none.num_tensor_elements(), 0);
    }
}
