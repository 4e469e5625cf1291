//! Explicit parameter registration for composite models.
//!
//! A [Module] lists its direct children by name. Children are either
//! trainable leaf tensors or nested modules. [Module::parameters] walks
//! that tree depth-first, in the order children were listed.

use crate::{
  tensor::Tensor,
  error::Result,
  scalar::Real,
};


/// Direct child of a [Module].

pub enum Component<'a, T: Real> {
  Param(&'a Tensor<T>),
  Module(&'a dyn Module<T>),
}

impl<'a, T: Real> Component<'a, T> {
  pub fn param(tensor: &'a Tensor<T>) -> Self {
    Self::Param(tensor)
  }

  pub fn module<M: Module<T>>(module: &'a M) -> Self {
    Self::Module(module)
  }
}


pub trait Module<T: Real> {
  /// Named direct children, in a stable order.

  fn components(&self) -> Vec<(&'static str, Component<'_, T>)>;

  /// All parameters of this module and its submodules.

  fn parameters(&self) -> Vec<Tensor<T>> {
    self.named_parameters()
      .into_iter()
      .map(|(_, param)| param )
      .collect()
  }

  /// Parameters along with their dotted path, like `encoder.weight`.

  fn named_parameters(&self) -> Vec<(String, Tensor<T>)> {
    let mut params = vec![];
    for (name, component) in self.components() {
      match component {
        Component::Param(param) => params.push((name.to_string(), param.clone())),
        Component::Module(module) => params.extend(
          module.named_parameters()
            .into_iter()
            .map(|(path, param)| (format!("{name}.{path}"), param) )
        ),
      }
    }
    params
  }

  fn num_parameters(&self) -> Result<usize> {
    self.parameters()
      .iter()
      .map(|param| param.value().map(|value| value.size() ) )
      .sum()
  }
}


/// [Module] with a single input and output.

pub trait Layer<T: Real>: Module<T> {
  fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>>;
}
