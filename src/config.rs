use serde::{ Serialize, Deserialize };


/// Evaluation policy of a computation graph.
///
/// Every [Tensor](crate::Tensor) carries the config it was built with and
/// hands it on to the operations applied to it.
///
/// - `lazy`: defer computation until a value is read. Otherwise every
///   operation computes its result right away.
/// - `requires_grad`: record operations for back-propagation. When disabled,
///   operations return detached leaves.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
  pub lazy: bool,
  pub requires_grad: bool,
}

impl Default for EvalConfig {
  fn default() -> Self {
    Self::lazy()
  }
}

impl EvalConfig {
  pub fn lazy() -> Self {
    Self { lazy: true, requires_grad: true }
  }

  pub fn eager() -> Self {
    Self { lazy: false, requires_grad: true }
  }

  pub fn no_grad(self) -> Self {
    Self { requires_grad: false, ..self }
  }
}
