use std::rc::Rc;
use std::cell::RefCell;

use num_traits::NumCast;
use tracing::trace;

mod mops;
mod backward;

pub use mops::{ Operator, Op, Conv, ConvParams, Nll, Reduction };

use crate::{
  internal::*,
  array::NdArray,
  config::EvalConfig,
  error::{ Error, Result },
  scalar::Real,
};


// Graph vertex. Either holds a value from the start (leaf)
// or computes it from its inputs when first read.

#[derive(Debug)]
struct Node<T: Real> {
  id: usize,
  value: RefCell<Option<NdArray<T>>>,
  op: Option<RefCell<Op<T>>>,
  inputs: Vec<Tensor<T>>,
  gradient: RefCell<Option<NdArray<T>>>,
  requires_grad: bool,
  config: EvalConfig,
}

// Inputs are unlinked iteratively, so long chains drop in constant stack space

impl<T: Real> Drop for Node<T> {
  fn drop(&mut self) {
    let mut orphans = std::mem::take(&mut self.inputs);
    while let Some(tensor) = orphans.pop() {
      if let Ok(mut node) = Rc::try_unwrap(tensor.node) {
        orphans.append(&mut node.inputs);
      }
    }
  }
}


/// Node in a computation graph.
///
/// A tensor is either a leaf holding a concrete [NdArray], or the pending
/// result of an [Op] applied to other tensors. Pending results get computed
/// when their value is first read and are cached from then on.
///
/// Cloning a tensor is cheap and yields a handle to the same node.
/// Several consumers may share an input, so graphs form a DAG.
///
/// Calling [backward](Tensor::backward) fills the gradient slot of every
/// node the tensor depends on.

#[derive(Debug, Clone)]
pub struct Tensor<T: Real> {
  node: Rc<Node<T>>,
}

impl<T: Real> From<NdArray<T>> for Tensor<T> {
  fn from(array: NdArray<T>) -> Self {
    Self::new(array)
  }
}

impl<T: Real> Tensor<T> {
  fn leaf(array: NdArray<T>, requires_grad: bool, config: EvalConfig) -> Self {
    Self {
      node: Rc::new(Node {
        id: make_id(),
        value: RefCell::new(Some(array)),
        op: None,
        inputs: vec![],
        gradient: RefCell::new(None),
        requires_grad,
        config,
      }),
    }
  }

  /// Trainable leaf using the default (lazy) evaluation policy.

  pub fn new(array: NdArray<T>) -> Self {
    Self::with_config(array, EvalConfig::default())
  }

  pub fn with_config(array: NdArray<T>, config: EvalConfig) -> Self {
    Self::leaf(array, config.requires_grad, config)
  }

  /// Leaf that never requires a gradient, such as input data or targets.
  ///
  /// Uses the default (lazy) policy. Operators take their policy from their
  /// first input, so use [constant_with_config](Self::constant_with_config)
  /// for constants that lead an eager graph.

  pub fn constant(array: NdArray<T>) -> Self {
    Self::constant_with_config(array, EvalConfig::default())
  }

  pub fn constant_with_config(array: NdArray<T>, config: EvalConfig) -> Self {
    Self::leaf(array, false, config)
  }

  /// Apply `op` to `inputs`, following the evaluation policy in `config`.
  ///
  /// Lazy graphs defer computation until a value is read, eager ones
  /// compute right away. Without gradient tracking, the result is
  /// computed and returned as a detached leaf.

  pub fn from_op(op: Op<T>, inputs: &[&Self], config: EvalConfig) -> Result<Self> {
    if inputs.len() != op.arity() {
      return Err(Error::InvalidParameter(format!(
        "{} expects {} inputs, got {}", op.name(), op.arity(), inputs.len())))
    }
    let tensor = Self {
      node: Rc::new(Node {
        id: make_id(),
        value: RefCell::new(None),
        op: Some(RefCell::new(op)),
        inputs: inputs.iter().map(|&input| input.clone() ).collect(),
        gradient: RefCell::new(None),
        requires_grad: config.requires_grad,
        config,
      }),
    };
    if !config.requires_grad {
      tensor.detach()
    } else {
      if !config.lazy {
        tensor.value()?;
      }
      Ok(tensor)
    }
  }

  fn unary(&self, op: Op<T>) -> Result<Self> {
    Self::from_op(op, &[self], self.node.config)
  }

  fn binary(&self, op: Op<T>, rhs: &Self) -> Result<Self> {
    Self::from_op(op, &[self, rhs], self.node.config)
  }

  pub fn id(&self) -> usize {
    self.node.id
  }

  pub fn config(&self) -> EvalConfig {
    self.node.config
  }

  pub fn requires_grad(&self) -> bool {
    self.node.requires_grad
  }

  pub fn is_leaf(&self) -> bool {
    self.node.op.is_none()
  }

  pub fn is_realized(&self) -> bool {
    self.node.value.borrow().is_some()
  }

  pub fn inputs(&self) -> &[Self] {
    &self.node.inputs
  }

  /// Name of the operator that produces this tensor, if any.

  pub fn op_name(&self) -> Option<&'static str> {
    self.node.op.as_ref().map(|op| op.borrow().name() )
  }

  /// The realized value. Computes and caches it, along with
  /// all unrealized ancestors, on first call.

  pub fn value(&self) -> Result<NdArray<T>> {
    if let Some(value) = self.node.value.borrow().as_ref() {
      return Ok(value.clone())
    }
    // Post-order walk, so inputs get realized before their consumers
    let mut stack = vec![(self.clone(), false)];
    while let Some((tensor, expanded)) = stack.pop() {
      if tensor.is_realized() { continue }
      if expanded {
        tensor.realize()?;
      } else {
        stack.push((tensor.clone(), true));
        for input in tensor.inputs().iter().filter(|input| !input.is_realized() ) {
          stack.push((input.clone(), false));
        }
      }
    }
    self.node.value.borrow().clone()
      .ok_or_else(|| Error::NullValue(format!("tensor {} was not realized", self.id())))
  }

  // Compute this node's value from its already realized inputs
  fn realize(&self) -> Result<()> {
    let op = self.node.op.as_ref()
      .ok_or_else(|| Error::NullValue(format!("leaf {} holds no value", self.id())))?;
    let values = self.node.inputs.iter()
      .map(|input| input.node.value.borrow().clone()
        .ok_or_else(|| Error::NullValue(format!("input {} is not realized", input.id()))) )
      .collect::<Result<Vec<_>>>()?;
    let inputs: Vec<&NdArray<T>> = values.iter().collect();
    let value = op.borrow_mut().compute(&inputs)?;
    trace!(id = self.id(), op = op.borrow().name(), dims = ?value.dims(), "realized");
    *self.node.value.borrow_mut() = Some(value);
    Ok(())
  }

  /// Replace a leaf's value, keeping its extents.

  pub fn set_value(&self, array: NdArray<T>) -> Result<()> {
    if !self.is_leaf() {
      return Err(Error::InvalidParameter(format!(
        "cannot set the value of derived tensor {}", self.id())))
    }
    let mut value = self.node.value.borrow_mut();
    if let Some(current) = value.as_ref() {
      if current.dims() != array.dims() {
        return Err(Error::shape(current.dims(), array.dims()))
      }
    }
    *value = Some(array);
    Ok(())
  }

  pub fn shape(&self) -> Result<Vec<usize>> {
    Ok(self.value()?.dims().to_vec())
  }

  pub fn to_vec(&self) -> Result<Vec<T>> {
    Ok(self.value()?.to_vec())
  }

  pub fn item(&self) -> Result<T> {
    self.value()?.item()
  }

  pub fn sum(&self) -> Result<T> {
    Ok(self.value()?.sum())
  }

  pub fn argmax(&self) -> Result<usize> {
    self.value()?
      .argmax()
      .ok_or_else(|| Error::NullValue(format!("tensor {} is empty", self.id())))
  }

  /// Gradient from the last [backward](Self::backward) pass through this node.

  pub fn gradient(&self) -> Option<NdArray<T>> {
    self.node.gradient.borrow().clone()
  }

  pub(crate) fn set_gradient(&self, gradient: NdArray<T>) {
    *self.node.gradient.borrow_mut() = Some(gradient);
  }

  pub fn clear_gradient(&self) {
    *self.node.gradient.borrow_mut() = None;
  }

  /// New leaf holding this tensor's value, without history or gradient tracking.
  /// Storage is shared copy-on-write.

  pub fn detach(&self) -> Result<Self> {
    Ok(Self::leaf(self.value()?, false, self.node.config))
  }

  /// Propagate `seed` (ones by default) back through the graph,
  /// populating the gradient of every reachable node.

  pub fn backward(&self, seed: Option<NdArray<T>>) -> Result<()> {
    let seed = match seed {
      Some(seed) => seed,
      None => NdArray::ones(&self.shape()?),
    };
    backward::propagate(self, seed)?;
    Ok(())
  }

  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::Add, rhs)
  }

  pub fn add_scalar(&self, scalar: T) -> Result<Self> {
    self.unary(Op::AddScalar(scalar))
  }

  /// Elementwise product.

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::Mul, rhs)
  }

  pub fn mul_scalar(&self, scalar: T) -> Result<Self> {
    self.unary(Op::MulScalar(scalar))
  }

  pub fn matmul(&self, rhs: &Self) -> Result<Self> {
    self.binary(Op::MatMul, rhs)
  }

  pub fn reshape(&self, dims: &[isize]) -> Result<Self> {
    self.unary(Op::Reshape(dims.to_vec()))
  }

  pub fn flatten(&self) -> Result<Self> {
    self.unary(Op::Flatten)
  }

  pub fn transpose(&self) -> Result<Self> {
    self.unary(Op::Transpose)
  }

  pub fn softmax(&self, axis: isize) -> Result<Self> {
    self.unary(Op::Softmax(axis))
  }

  pub fn log(&self) -> Result<Self> {
    self.unary(Op::Log)
  }

  pub fn exp(&self) -> Result<Self> {
    self.unary(Op::Exp)
  }

  pub fn tanh(&self) -> Result<Self> {
    self.unary(Op::Tanh)
  }

  pub fn relu(&self) -> Result<Self> {
    self.unary(Op::ReLU)
  }

  pub fn sigmoid(&self) -> Result<Self> {
    self.unary(Op::Sigmoid)
  }

  pub fn conv1d(&self, weight: &Self, params: ConvParams<T>) -> Result<Self> {
    self.binary(Op::conv1d(params), weight)
  }

  pub fn conv2d(&self, weight: &Self, params: ConvParams<T>) -> Result<Self> {
    self.binary(Op::conv2d(params), weight)
  }

  pub fn nll_loss(&self, target: &Self, reduction: Reduction) -> Result<Self> {
    self.binary(Op::nll_loss(reduction), target)
  }

  /// Compute a function's gradient with respect to a random input
  /// numerically and compare it to the automatically derived one.
  ///
  /// Returns the mean absolute difference between both.

  pub fn check_gradients<F>(dims: &[usize], f: F) -> Result<T>
  where
    F: Fn(&Self) -> Result<Self>
  {
    let cast = |v: f64| <T as NumCast>::from(v)
      .ok_or_else(|| Error::TypeMismatch(format!("{v} is not representable")));
    let eps = cast(1e-3)?;
    let input = NdArray::randn(dims);
    // Gradient of the summed output
    let x = Self::new(input.clone());
    f(&x)?.backward(None)?;
    let grad = x.gradient()
      .ok_or_else(|| Error::NullValue("input received no gradient".to_string()))?;
    let len = input.size();
    let mut total = T::zero();
    for (i, analytic) in grad.iter().enumerate() {
      let offset = NdArray::hot_encode(i, len)?.reshape_to(dims)?.mul_scalar(eps);
      let next = f(&Self::constant(input.add(&offset)?))?.sum()?;
      let prev = f(&Self::constant(input.sub(&offset)?))?.sum()?;
      let numeric = (next - prev) / (eps + eps);
      total += (analytic - numeric).abs();
    }
    Ok(total / cast(len.max(1) as f64)?)
  }
}

impl<T: Real> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self.node.value.borrow().as_ref() {
      Some(value) => write!(f, "Tensor {value}"),
      None => write!(f, "Tensor <pending {}>", self.op_name().unwrap_or("?")),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  fn vec(values: &[f64]) -> Tensor<f64> {
    Tensor::new(NdArray::vec(values))
  }

  #[test]
  fn x_squared() {
    let x = vec(&[3.0, 5.0]);
    let z = x.mul(&x).unwrap().add_scalar(2.0).unwrap();
    z.backward(None).unwrap();
    assert_eq!(z.to_vec(), Ok(vec![11.0, 27.0]));
    assert_eq!(x.gradient().unwrap().to_vec(), vec![6.0, 10.0]);
  }

  #[test]
  fn lazy_realization_is_memoized() {
    let x = vec(&[1.0, 2.0]);
    let y = x.exp().unwrap().mul_scalar(2.0).unwrap();
    assert!(!y.is_realized());
    assert!(!y.inputs()[0].is_realized());
    let first = y.value().unwrap();
    assert!(y.is_realized());
    assert!(y.inputs()[0].is_realized());
    // A second read hands out the cached buffer
    assert!(y.value().unwrap().shares_buffer(&first));
  }

  #[test]
  fn eager_realizes_immediately() {
    let x = Tensor::with_config(NdArray::vec(&[1.0f32, -1.0]), EvalConfig::eager());
    let y = x.relu().unwrap();
    assert!(y.is_realized());
    assert_eq!(y.config(), EvalConfig::eager());
    assert_eq!(y.op_name(), Some("relu"));
  }

  #[test]
  fn no_grad_returns_detached_leaves() {
    let config = EvalConfig::lazy().no_grad();
    let x = Tensor::with_config(NdArray::vec(&[1.0, 2.0]), config);
    let y = x.mul_scalar(3.0).unwrap();
    assert!(y.is_leaf());
    assert!(y.is_realized());
    assert!(!y.requires_grad());
    assert_eq!(y.to_vec(), Ok(vec![3.0, 6.0]));
  }

  #[test]
  fn lazy_errors_surface_on_read() {
    let x = vec(&[1.0, 2.0]);
    let y = vec(&[1.0, 2.0, 3.0]);
    let z = x.add(&y).unwrap();
    assert!(matches!(z.value(), Err(Error::ShapeMismatch { .. })));
    assert!(!z.is_realized());
    let eager = Tensor::with_config(NdArray::vec(&[1.0, 2.0]), EvalConfig::eager());
    assert!(eager.matmul(&eager).is_err());
  }

  #[test]
  fn from_op_checks_arity() {
    let x = vec(&[1.0]);
    assert!(matches!(Tensor::from_op(Op::Add, &[&x], EvalConfig::default()), Err(Error::InvalidParameter(_))));
  }

  #[test]
  fn detach_severs_history() {
    let x = vec(&[1.0, 2.0]);
    let y = x.tanh().unwrap();
    let d = y.detach().unwrap();
    assert!(d.is_leaf());
    assert!(d.inputs().is_empty());
    assert!(!d.requires_grad());
    assert_eq!(d.value().unwrap(), y.value().unwrap());
  }

  #[test]
  fn set_value_keeps_dims() {
    let x = vec(&[1.0, 2.0]);
    x.set_value(NdArray::vec(&[3.0, 4.0])).unwrap();
    assert_eq!(x.to_vec(), Ok(vec![3.0, 4.0]));
    assert_eq!(x.set_value(NdArray::vec(&[1.0])), Err(Error::shape(&[2], &[1])));
    let y = x.exp().unwrap();
    let before = y.value().unwrap();
    assert!(matches!(y.set_value(NdArray::vec(&[0.0, 0.0])), Err(Error::InvalidParameter(_))));
    assert_eq!(y.value(), Ok(before));
  }

  #[test]
  fn constants_follow_their_config() {
    let eager = EvalConfig::eager();
    let w = Tensor::with_config(NdArray::<f64>::ones(&[2,2]), eager);
    let x = Tensor::constant_with_config(NdArray::ones(&[1,2]), eager);
    let y = x.matmul(&w).unwrap();
    assert!(y.is_realized());
    assert!(!x.requires_grad());
    assert_eq!(y.to_vec(), Ok(vec![2.0, 2.0]));
    assert!(!Tensor::constant(NdArray::<f64>::ones(&[1,2])).matmul(&w).unwrap().is_realized());
  }

  #[test]
  fn deep_chains_realize_and_drop() {
    for config in [EvalConfig::lazy(), EvalConfig::eager()] {
      let x = Tensor::with_config(NdArray::vec(&[1.0]), config);
      let mut y = x.clone();
      for _ in 0..20_000 {
        y = y.add_scalar(1.0).unwrap();
      }
      assert_eq!(y.item(), Ok(20_001.0));
      y.backward(None).unwrap();
      assert_eq!(x.gradient().unwrap().to_vec(), vec![1.0]);
      drop(y);
      // The leaf outlives the chain that consumed it
      assert_eq!(x.to_vec(), Ok(vec![1.0]));
    }
  }

  #[test]
  fn accessors() {
    let x = Tensor::new(NdArray::new(&[1,7], vec![1.0, 2.0, 3.0, 4.0, 66.0, 2.0, 3.0]).unwrap());
    assert_eq!(x.argmax(), Ok(4));
    assert_eq!(x.shape(), Ok(vec![1, 7]));
    assert_eq!(x.sum(), Ok(81.0));
    assert!(x.item().is_err());
    assert!(x.to_string().starts_with("Tensor NdArray<float64>[1, 7]"));
    assert!(x.flatten().unwrap().to_string().contains("pending flatten"));
  }

  fn check(dims: &[usize], f: impl Fn(&Tensor<f64>) -> Result<Tensor<f64>>) {
    let diff = Tensor::check_gradients(dims, f).unwrap();
    assert_abs_diff_eq!(diff, 0.0, epsilon = 1e-3);
  }

  #[test]
  fn gradients_match_finite_differences() {
    check(&[3,4], |x| x.tanh()?.mul(x) );
    check(&[3,4], |x| x.sigmoid()?.add_scalar(1.0)?.log() );
    check(&[2,5], |x| x.softmax(-1)?.mul(&x.exp()?) );
    check(&[2,3], |x| x.transpose()?.reshape(&[2,-1])?.exp() );
    check(&[4,3], |x| x.matmul(&x.transpose()?) );
    // Diamond: both branches reach x
    check(&[6], |x| x.mul_scalar(0.5)?.sigmoid()?.add(&x.tanh()?) );
  }

  #[test]
  fn relu_gradient_masks_negative_inputs() {
    let x = vec(&[-2.0, 0.5, 3.0]);
    x.relu().unwrap().mul_scalar(2.0).unwrap().backward(None).unwrap();
    assert_eq!(x.gradient().unwrap().to_vec(), vec![0.0, 2.0, 2.0]);
  }

  #[test]
  fn conv_gradients_match_finite_differences() {
    let kernel = Tensor::constant(NdArray::<f64>::randn(&[3,2,4]));
    let params = ConvParams { stride: 2, padding: 1, pad_value: 0.0 };
    check(&[7,2], |x| x.conv1d(&kernel, params) );

    let kernel = Tensor::constant(NdArray::<f64>::randn(&[2,2,1,3]));
    let params = ConvParams { stride: 1, padding: 0, pad_value: 0.0 };
    check(&[4,3,1], |x| x.conv2d(&kernel, params) );

    // Gradient with respect to the kernel
    let input = Tensor::constant(NdArray::<f64>::randn(&[6,2]));
    let params = ConvParams::default();
    check(&[3,2,2], |w| input.conv1d(w, params) );
  }
}
