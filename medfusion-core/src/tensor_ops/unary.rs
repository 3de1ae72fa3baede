use crate::{dtypes::Dtype, tensor::*};

impl<E: Dtype> Tensor<E> {
    fn try_map(mut self, f: impl Fn(E) -> E) -> Result<Self, Error> {
        for x in self.data_mut().iter_mut() {
            *x = f(*x);
        }
        Ok(self)
    }

    /// `max(0, x)`
    pub fn try_relu(self) -> Result<Self, Error> {
        self.try_map(|x| if x > E::zero() { x } else { E::zero() })
    }

    /// `1 / (1 + exp(-x))`
    pub fn try_sigmoid(self) -> Result<Self, Error> {
        self.try_map(|x| E::one() / (E::one() + (-x).exp()))
    }

    /// `x * sigmoid(x)`, also known as swish.
    pub fn try_silu(self) -> Result<Self, Error> {
        self.try_map(|x| x / (E::one() + (-x).exp()))
    }

    pub fn try_sub_scalar(self, s: E) -> Result<Self, Error> {
        self.try_map(|x| x - s)
    }

    pub fn try_div_scalar(self, s: E) -> Result<Self, Error> {
        self.try_map(|x| x / s)
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::*;

    #[test]
    fn test_relu() {
        let dev: TestDevice = Default::default();
        let x = dev
            .tensor_from_vec(vec![-2.0 as TestDtype, -1.0, 0.0, 1.0, 2.0], [5])
            .unwrap();
        assert_eq!(x.try_relu().unwrap().as_vec(), [0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_sigmoid_and_silu() {
        let dev: TestDevice = Default::default();
        let x = dev
            .tensor_from_vec(vec![-1.0 as TestDtype, 0.0, 2.0], [3])
            .unwrap();
        assert_close!(
            x.clone().try_sigmoid().unwrap().as_vec(),
            vec![0.26894143, 0.5, 0.880797]
        );
        assert_close!(
            x.try_silu().unwrap().as_vec(),
            vec![-0.26894143, 0.0, 1.761594]
        );
    }

    #[test]
    fn test_scalar_ops() {
        let dev: TestDevice = Default::default();
        let x = dev
            .tensor_from_vec(vec![2.0 as TestDtype, 4.0], [2])
            .unwrap();
        let y = x.try_sub_scalar(2.0).unwrap().try_div_scalar(2.0).unwrap();
        assert_eq!(y.as_vec(), [0.0, 1.0]);
    }
}
