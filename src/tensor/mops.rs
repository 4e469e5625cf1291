use std::fmt::Debug;
use std::str::FromStr;

use num_traits::NumCast;
use serde::{ Serialize, Deserialize };

use crate::{
  array::{ NdArray, im2col::{ self, Columns, Geometry } },
  error::{ Error, Result },
  scalar::Real,
};


/// Differentiable computation over a fixed number of input arrays.
///
/// `compute` runs at most once per graph node. Operators may keep state
/// from it to speed up `gradient`, but must reset that state on every call.
///
/// `gradient` receives the gradient of the operator's output and returns
/// one gradient per input, in input order, each shaped like its input.

pub trait Operator<T: Real>: Debug {
  fn compute(&mut self, inputs: &[&NdArray<T>]) -> Result<NdArray<T>>;
  fn gradient(&self, grad: &NdArray<T>, inputs: &[&NdArray<T>]) -> Result<Vec<NdArray<T>>>;
}


/// How a loss folds its per-sample values into a single number.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
  #[default]
  Mean,
  Sum,
}

impl FromStr for Reduction {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "mean" => Ok(Self::Mean),
      "sum" => Ok(Self::Sum),
      _ => Err(Error::UnknownReduction(s.to_string())),
    }
  }
}


/// Placement of convolution windows.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvParams<T> {
  pub stride: usize,
  pub padding: usize,
  pub pad_value: T,
}

impl<T: Real> Default for ConvParams<T> {
  fn default() -> Self {
    Self { stride: 1, padding: 0, pad_value: T::zero() }
  }
}


/// Convolution over `spatial` axes, carried out as im2col followed by a matmul.
///
/// Input is `[..spatial, in_channels]`, weight is `[..kernel, in_channels, out_channels]`.
/// The extracted columns are kept for the backward pass.

#[derive(Debug, Clone)]
pub struct Conv<T: Real> {
  spatial: usize,
  params: ConvParams<T>,
  columns: Option<Columns<T>>,
}

impl<T: Real> Conv<T> {
  pub fn new(spatial: usize, params: ConvParams<T>) -> Self {
    Self { spatial, params, columns: None }
  }

  pub fn params(&self) -> &ConvParams<T> {
    &self.params
  }

  fn extract(&self, input: &NdArray<T>, weight: &NdArray<T>) -> Result<Columns<T>> {
    let d = self.spatial;
    if input.rank() != d + 1 {
      return Err(Error::InvalidParameter(format!(
        "conv{d}d expects input of rank {}, got {}", d + 1, input.rank())))
    }
    if weight.rank() != d + 2 {
      return Err(Error::InvalidParameter(format!(
        "conv{d}d expects weight of rank {}, got {}", d + 2, weight.rank())))
    }
    let channels = input.dims()[d];
    if weight.dims()[d] != channels {
      return Err(Error::shape(&[channels], &weight.dims()[d..d + 1]))
    }
    let geometry = Geometry::new(
      &input.dims()[..d],
      &weight.dims()[..d],
      self.params.stride,
      self.params.padding,
    )?;
    im2col::im2col(input, geometry, self.params.pad_value)
  }

  // Weight as [window_len * in_channels, out_channels]
  fn kernel(&self, weight: &NdArray<T>) -> Result<NdArray<T>> {
    let rows = weight.dims()[..=self.spatial].iter().product();
    weight.reshape_to(&[rows, weight.dims()[self.spatial + 1]])
  }
}

impl<T: Real> Operator<T> for Conv<T> {
  fn compute(&mut self, inputs: &[&NdArray<T>]) -> Result<NdArray<T>> {
    self.columns = None;
    let (input, weight) = (inputs[0], inputs[1]);
    let columns = self.extract(input, weight)?;
    let out = columns.matrix.matmul(&self.kernel(weight)?)?;
    let mut dims = columns.geometry.output();
    dims.push(weight.dims()[self.spatial + 1]);
    let out = out.reshape_to(&dims)?;
    self.columns = Some(columns);
    Ok(out)
  }

  fn gradient(&self, grad: &NdArray<T>, inputs: &[&NdArray<T>]) -> Result<Vec<NdArray<T>>> {
    let (input, weight) = (inputs[0], inputs[1]);
    let extracted;
    let columns = match &self.columns {
      Some(columns) => columns,
      None => {
        extracted = self.extract(input, weight)?;
        &extracted
      },
    };
    let out_channels = weight.dims()[self.spatial + 1];
    let grad = grad.reshape_to(&[columns.matrix.dims()[0], out_channels])?;
    let weight_grad = columns.matrix
      .transpose()
      .matmul(&grad)?
      .reshape_to(weight.dims())?;
    let column_grad = grad.matmul(&self.kernel(weight)?.transpose())?;
    let input_grad = im2col::col2im(&column_grad, columns)?;
    Ok(vec![input_grad, weight_grad])
  }
}


/// Negative log-likelihood of integral class targets.
///
/// `pred` holds log-probabilities `[batch, classes]` (a single `[classes]` row
/// is accepted too), `target` holds one class index per row.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nll {
  pub reduction: Reduction,
}

impl Nll {
  fn labels<T: Real>(pred: &NdArray<T>, target: &NdArray<T>) -> Result<(NdArray<T>, Vec<usize>)> {
    let pred = match pred.rank() {
      1 => pred.reshape_to(&[1, pred.size()])?,
      2 => pred.clone(),
      rank => return Err(Error::InvalidParameter(format!(
        "nll loss expects predictions of rank 1 or 2, got rank {rank}"))),
    };
    let (batch, classes) = (pred.dims()[0], pred.dims()[1]);
    if batch == 0 {
      return Err(Error::InvalidParameter("nll loss needs at least one sample".to_string()))
    }
    if target.dims() != [batch] {
      return Err(Error::shape(&[batch], target.dims()))
    }
    let labels = target.iter()
      .map(|label| {
        if label.fract() != T::zero() || label < T::zero() {
          return Err(Error::TypeMismatch(format!("class index {label:?} is not a natural number")))
        }
        match label.to_usize() {
          Some(idx) if idx < classes => Ok(idx),
          _ => Err(Error::InvalidParameter(format!(
            "class index {label:?} out of range for {classes} classes"))),
        }
      })
      .collect::<Result<Vec<_>>>()?;
    Ok((pred, labels))
  }

  fn scale<T: Real>(&self, batch: usize) -> Result<T> {
    match self.reduction {
      Reduction::Sum => Ok(-T::one()),
      Reduction::Mean => <T as NumCast>::from(batch)
        .map(|n| -T::one() / n )
        .ok_or_else(|| Error::TypeMismatch(format!("batch size {batch} is not representable"))),
    }
  }
}

impl<T: Real> Operator<T> for Nll {
  fn compute(&mut self, inputs: &[&NdArray<T>]) -> Result<NdArray<T>> {
    let (pred, labels) = Self::labels(inputs[0], inputs[1])?;
    let total = labels.iter()
      .enumerate()
      .map(|(row, &label)| pred.get(&[row, label]) )
      .sum::<Result<T>>()?;
    Ok(NdArray::scalar(total * self.scale(labels.len())?))
  }

  fn gradient(&self, grad: &NdArray<T>, inputs: &[&NdArray<T>]) -> Result<Vec<NdArray<T>>> {
    let (pred, labels) = Self::labels(inputs[0], inputs[1])?;
    let step = grad.item()? * self.scale(labels.len())?;
    let mut pred_grad = NdArray::zeros(pred.dims());
    for (row, &label) in labels.iter().enumerate() {
      pred_grad.set(&[row, label], step)?;
    }
    Ok(vec![
      pred_grad.reshape_to(inputs[0].dims())?,
      NdArray::zeros(inputs[1].dims()),
    ])
  }
}


/// All built-in operators.

#[derive(Debug, Clone)]
pub enum Op<T: Real> {
  Add,
  AddScalar(T),
  Mul,
  MulScalar(T),
  MatMul,
  Reshape(Vec<isize>),
  Flatten,
  Transpose,
  Softmax(isize),
  Log,
  Exp,
  Tanh,
  ReLU,
  Sigmoid,
  Conv1d(Conv<T>),
  Conv2d(Conv<T>),
  NllLoss(Nll),
}

impl<T: Real> Op<T> {
  pub fn conv1d(params: ConvParams<T>) -> Self {
    Self::Conv1d(Conv::new(1, params))
  }

  pub fn conv2d(params: ConvParams<T>) -> Self {
    Self::Conv2d(Conv::new(2, params))
  }

  pub fn nll_loss(reduction: Reduction) -> Self {
    Self::NllLoss(Nll { reduction })
  }

  /// Number of inputs this operator consumes.

  pub fn arity(&self) -> usize {
    match self {
      Self::Add | Self::Mul | Self::MatMul => 2,
      Self::Conv1d(_) | Self::Conv2d(_) | Self::NllLoss(_) => 2,
      _ => 1,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Add => "add",
      Self::AddScalar(_) => "add_scalar",
      Self::Mul => "mul",
      Self::MulScalar(_) => "mul_scalar",
      Self::MatMul => "matmul",
      Self::Reshape(_) => "reshape",
      Self::Flatten => "flatten",
      Self::Transpose => "transpose",
      Self::Softmax(_) => "softmax",
      Self::Log => "log",
      Self::Exp => "exp",
      Self::Tanh => "tanh",
      Self::ReLU => "relu",
      Self::Sigmoid => "sigmoid",
      Self::Conv1d(_) => "conv1d",
      Self::Conv2d(_) => "conv2d",
      Self::NllLoss(_) => "nll_loss",
    }
  }
}

impl<T: Real> Operator<T> for Op<T> {
  fn compute(&mut self, inputs: &[&NdArray<T>]) -> Result<NdArray<T>> {
    if inputs.len() != self.arity() {
      return Err(Error::InvalidParameter(format!(
        "{} expects {} inputs, got {}", self.name(), self.arity(), inputs.len())))
    }
    let lhs = inputs[0];
    match self {
      Self::Add => lhs.add(inputs[1]),
      Self::AddScalar(scalar) => Ok(lhs.add_scalar(*scalar)),
      Self::Mul => lhs.mul(inputs[1]),
      Self::MulScalar(scalar) => Ok(lhs.mul_scalar(*scalar)),
      Self::MatMul => lhs.matmul(inputs[1]),
      Self::Reshape(dims) => lhs.reshape(dims),
      Self::Flatten => lhs.flatten(),
      Self::Transpose => Ok(lhs.transpose()),
      Self::Softmax(axis) => lhs.softmax(*axis),
      Self::Log => Ok(lhs.log()),
      Self::Exp => Ok(lhs.exp()),
      Self::Tanh => Ok(lhs.tanh()),
      Self::ReLU => Ok(lhs.relu()),
      Self::Sigmoid => Ok(lhs.sigmoid()),
      Self::Conv1d(conv) | Self::Conv2d(conv) => conv.compute(inputs),
      Self::NllLoss(loss) => loss.compute(inputs),
    }
  }

  fn gradient(&self, grad: &NdArray<T>, inputs: &[&NdArray<T>]) -> Result<Vec<NdArray<T>>> {
    if inputs.len() != self.arity() {
      return Err(Error::InvalidParameter(format!(
        "{} expects {} inputs, got {}", self.name(), self.arity(), inputs.len())))
    }
    let lhs = inputs[0];
    let single = |grad: NdArray<T>| -> Result<Vec<NdArray<T>>> { Ok(vec![grad]) };
    match self {
      Self::Add => Ok(vec![
        grad.clone(),
        reduce_to(grad, inputs[1].dims())?,
      ]),
      Self::AddScalar(_) => single(grad.clone()),
      Self::Mul => Ok(vec![
        grad.mul(inputs[1])?,
        reduce_to(&grad.mul(lhs)?, inputs[1].dims())?,
      ]),
      Self::MulScalar(scalar) => single(grad.mul_scalar(*scalar)),
      Self::MatMul => Ok(vec![
        grad.matmul(&inputs[1].transpose())?,
        lhs.transpose().matmul(grad)?,
      ]),
      Self::Reshape(_) | Self::Flatten => single(grad.reshape_to(lhs.dims())?),
      Self::Transpose => single(grad.transpose()),
      Self::Softmax(axis) => single(lhs.softmax(*axis)?.softmax_backward(grad, *axis)?),
      Self::Log => single(grad.div(lhs)?),
      Self::Exp => single(grad.mul(&lhs.exp())?),
      Self::Tanh => single(grad.zip(&lhs.tanh(), |g, t| g * (T::one() - t * t) )?),
      Self::ReLU => single(grad.zip(lhs, |g, x| if x > T::zero() { g } else { T::zero() } )?),
      Self::Sigmoid => single(grad.zip(&lhs.sigmoid(), |g, s| g * s * (T::one() - s) )?),
      Self::Conv1d(conv) | Self::Conv2d(conv) => conv.gradient(grad, inputs),
      Self::NllLoss(loss) => loss.gradient(grad, inputs),
    }
  }
}

// Sum a gradient down to the dims of a broadcast operand

fn reduce_to<T: Real>(grad: &NdArray<T>, dims: &[usize]) -> Result<NdArray<T>> {
  if grad.dims() == dims {
    return Ok(grad.clone())
  }
  if dims.iter().product::<usize>() == 1 {
    return NdArray::new(dims, vec![grad.sum()])
  }
  let leading = grad.rank()
    .checked_sub(dims.len())
    .ok_or_else(|| Error::shape(dims, grad.dims()))?;
  grad.sum_leading(leading)?.reshape_to(dims)
}
