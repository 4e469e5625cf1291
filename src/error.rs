use thiserror::Error;


/// Failures raised while building, realizing or differentiating a graph.
///
/// Errors are raised where they are detected and propagate unchanged
/// through realization and back-propagation.

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
  #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
  ShapeMismatch {
    expected: Vec<usize>,
    got: Vec<usize>,
  },

  #[error("Tensor value is null: {0}")]
  NullValue(String),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Type mismatch: {0}")]
  TypeMismatch(String),

  #[error("Unknown reduction: {0}")]
  UnknownReduction(String),
}

impl Error {
  pub(crate) fn shape(expected: &[usize], got: &[usize]) -> Self {
    Self::ShapeMismatch { expected: expected.to_vec(), got: got.to_vec() }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
