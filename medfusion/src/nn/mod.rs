//! High level neural network building blocks.
//!
//! Every layer has a configuration that implements [BuildOnDevice]; build
//! it with [BuildModuleExt::try_build_module] to allocate and initialise
//! the parameters in one step:
//!
//! ```rust
//! # use medfusion::prelude::*;
//! let dev: Cpu = Default::default();
//! let model = dev.try_build_module::<f32, _>(LinearConfig::new(5, 2)).unwrap();
//! let x: Tensor<f32> = dev.try_zeros([3, 5]).unwrap();
//! assert_eq!(model.try_forward(x).unwrap().dims(), &[3, 2]);
//! ```
//!
//! Structs made of other modules derive [TensorCollection] (fields marked
//! `#[module]` are stored under the field name) or [Sequential] (every field
//! in order, for both the tensors and the forward pass).
//!
//! Layers run in two modes. [Module::try_forward] is inference:
//! dropout does nothing and batch norm normalises with its running
//! statistics. [Module::try_forward_mut] is training: dropout is active
//! and batch norm uses batch statistics and updates the running ones.

pub mod layers;

pub use layers::*;
pub use medfusion_core::nn_traits::{
    BuildModuleExt, BuildOnDevice, LoadSafeTensors, Module, NumParams, ParamInit, ResetParams,
    SaveSafeTensors, TensorCollection, TensorOptions,
};
pub use medfusion_derives::{Sequential, TensorCollection};

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::tests::*;

    #[derive(Debug, Clone, Sequential)]
    struct Stack<E> {
        hidden: Linear<E>,
        relu: ReLU,
        out: Linear<E>,
    }

    #[derive(Debug, Clone, TensorCollection)]
    struct Gate<E> {
        #[module]
        proj: Linear<E>,
        activation: Sigmoid,
        #[module]
        extra: Option<Linear<E>>,
    }

    fn keys<M: TensorCollection<TestDtype>>(m: &M, location: &str) -> Vec<String> {
        let mut keys = Vec::new();
        m.iter_tensors(location, &mut |k, _, _| keys.push(k.to_string()));
        keys
    }

    #[test]
    fn test_sequential_derive() {
        let dev: TestDevice = Default::default();
        let mut stack: Stack<TestDtype> = Stack {
            hidden: dev.try_build_module::<TestDtype, _>(LinearConfig::new(3, 4)).unwrap(),
            relu: ReLU,
            out: dev.try_build_module::<TestDtype, _>(LinearConfig::new(4, 2)).unwrap(),
        };
        assert_eq!(
            keys(&stack, "net"),
            ["net.hidden.weight", "net.hidden.bias", "net.out.weight", "net.out.bias"]
        );
        assert_eq!(stack.num_trainable_params(), 3 * 4 + 4 + 4 * 2 + 2);

        let x: Tensor<TestDtype> = dev.try_sample([5, 3], rand_distr::StandardNormal).unwrap();
        let manual = stack
            .hidden
            .try_forward(x.clone())
            .and_then(|h| stack.relu.try_forward(h))
            .and_then(|h| stack.out.try_forward(h))
            .unwrap();
        assert_eq!(stack.try_forward(x.clone()).unwrap().as_vec(), manual.as_vec());
        assert_eq!(stack.try_forward_mut(x).unwrap().dims(), &[5, 2]);
    }

    #[test]
    fn test_tensor_collection_derive_skips_unmarked_fields() {
        let dev: TestDevice = Default::default();
        let mut gate: Gate<TestDtype> = Gate {
            proj: dev.try_build_module::<TestDtype, _>(LinearConfig::new(2, 2)).unwrap(),
            activation: Sigmoid,
            extra: None,
        };
        assert_eq!(keys(&gate, ""), ["proj.weight", "proj.bias"]);

        gate.extra = Some(dev.try_build_module::<TestDtype, _>(LinearConfig::new(2, 1)).unwrap());
        assert_eq!(
            keys(&gate, "se"),
            ["se.proj.weight", "se.proj.bias", "se.extra.weight", "se.extra.bias"]
        );
        gate.try_iter_tensors_mut("", &mut |_, _, t| t.try_fill_with_zeros())
            .unwrap();
        assert_eq!(gate.extra.as_ref().unwrap().weight.as_vec(), [0.0; 2]);
    }
}
