use crate::{
    dtypes::Dtype,
    tensor::{Cpu, Error, Tensor},
};

use super::{join_location, TensorOptions};

macro_rules! tuple_impls {
    ([$($name:ident),+] [$($idx:tt),+], $last:ident, [$($rev_tail:ident),*]) => {

        impl<Elem: Dtype, $($name: crate::nn_traits::BuildOnDevice<Elem>),+> crate::nn_traits::BuildOnDevice<Elem> for ($($name,)+) {
            type Built = ($($name::Built, )+);
            fn try_build_on_device(&self, device: &Cpu) -> Result<Self::Built, Error> {
                Ok(($(
                    self.$idx.try_build_on_device(device)?,
                )+))
            }
        }

        impl<Elem: Dtype, $($name: crate::nn_traits::TensorCollection<Elem>),+> crate::nn_traits::TensorCollection<Elem> for ($($name,)+) {
            fn iter_tensors(&self, location: &str, f: &mut dyn FnMut(&str, TensorOptions, &Tensor<Elem>)) {
                $(
                    self.$idx.iter_tensors(&join_location(location, stringify!($idx)), f);
                )+
            }

            fn try_iter_tensors_mut(
                &mut self,
                location: &str,
                f: &mut dyn FnMut(&str, TensorOptions, &mut Tensor<Elem>) -> Result<(), Error>,
            ) -> Result<(), Error> {
                $(
                    self.$idx.try_iter_tensors_mut(&join_location(location, stringify!($idx)), f)?;
                )+
                Ok(())
            }
        }

        /*This macro expands like this for a 3-tuple:

        impl<
            Input,

            // `$last:`
            C:

            // `$(Module::<$rev_tail ::Output>, $rev_tail: )+`
            Module<B ::Output>, B:
            Module<A ::Output>, A:

            Module<Input>
        > Module<Input> for (A, B, C) {
            type Output = C::Output;
            fn try_forward(&self, x: Input) -> Result<Self::Output, Error> {
                let x = self.0.try_forward(x)?;
                let x = self.1.try_forward(x)?;
                let x = self.2.try_forward(x)?;
                Ok(x)
            }
        }
        */
        impl<
            Input,
            $last:
            $(crate::nn_traits::Module::<$rev_tail ::Output>, $rev_tail: )*
            crate::nn_traits::Module<Input>
        > crate::nn_traits::Module<Input> for ($($name,)+) {
            type Output = $last ::Output;

            /// Calls forward sequentially on each module in the tuple.
            fn try_forward(&self, x: Input) -> Result<Self::Output, Error> {
                $(let x = self.$idx.try_forward(x)?;)+
                Ok(x)
            }

            /// Calls forward sequentially on each module in the tuple.
            fn try_forward_mut(&mut self, x: Input) -> Result<Self::Output, Error> {
                $(let x = self.$idx.try_forward_mut(x)?;)+
                Ok(x)
            }
        }
    };
}

tuple_impls!([M1][0], M1, []);
tuple_impls!([M1, M2] [0, 1], M2, [M1]);
tuple_impls!([M1, M2, M3] [0, 1, 2], M3, [M2, M1]);
tuple_impls!([M1, M2, M3, M4] [0, 1, 2, 3], M4, [M3, M2, M1]);
tuple_impls!([M1, M2, M3, M4, M5] [0, 1, 2, 3, 4], M5, [M4, M3, M2, M1]);
tuple_impls!([M1, M2, M3, M4, M5, M6] [0, 1, 2, 3, 4, 5], M6, [M5, M4, M3, M2, M1]);

#[cfg(test)]
mod tests {
    use crate::nn_traits::*;
    use crate::tests::*;

    #[test]
    fn test_tuple_keys_are_indexed() {
        let dev: TestDevice = Default::default();
        let t = (
            dev.try_zeros::<TestDtype>([2]).unwrap(),
            dev.try_zeros::<TestDtype>([3]).unwrap(),
        );
        let mut keys = Vec::new();
        t.iter_tensors("block", &mut |k, _, _| keys.push(k.to_string()));
        assert_eq!(keys, ["block.0", "block.1"]);
        assert_eq!(t.num_tensor_elements(), 5);
    }
}
