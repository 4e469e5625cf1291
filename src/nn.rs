//! Thin layers and losses on top of the graph operators.

use crate::{
  array::NdArray,
  config::EvalConfig,
  tensor::{ Tensor, ConvParams, Reduction },
  module::{ Module, Layer, Component },
  error::Result,
  scalar::Real,
};


/// Fully connected layer: `x·W + b`.
///
/// Expects input of shape `[batch, in_size]`.

#[derive(Debug, Clone)]
pub struct Linear<T: Real> {
  pub weight: Tensor<T>,
  pub bias: Tensor<T>,
}

impl<T: Real> Linear<T> {
  pub fn new(in_size: usize, out_size: usize) -> Self {
    Self::with_config(in_size, out_size, EvalConfig::default())
  }

  /// Standard normal weight `[in_size, out_size]`, bias of ones.

  pub fn with_config(in_size: usize, out_size: usize, config: EvalConfig) -> Self {
    Self {
      weight: Tensor::with_config(NdArray::randn(&[in_size, out_size]), config),
      bias: Tensor::with_config(NdArray::ones(&[out_size]), config),
    }
  }
}

impl<T: Real> Module<T> for Linear<T> {
  fn components(&self) -> Vec<(&'static str, Component<'_, T>)> {
    vec![
      ("weight", Component::param(&self.weight)),
      ("bias", Component::param(&self.bias)),
    ]
  }
}

impl<T: Real> Layer<T> for Linear<T> {
  fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
    input.matmul(&self.weight)?.add(&self.bias)
  }
}


/// 1-d convolution over input `[length, in_channels]`.

#[derive(Debug, Clone)]
pub struct Conv1d<T: Real> {
  pub weight: Tensor<T>,
  pub params: ConvParams<T>,
}

impl<T: Real> Conv1d<T> {
  pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize, params: ConvParams<T>) -> Self {
    Self::with_config(in_channels, out_channels, kernel_size, params, EvalConfig::default())
  }

  pub fn with_config(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    params: ConvParams<T>,
    config: EvalConfig,
  ) -> Self {
    let weight = NdArray::randn(&[kernel_size, in_channels, out_channels]);
    Self { weight: Tensor::with_config(weight, config), params }
  }
}

impl<T: Real> Module<T> for Conv1d<T> {
  fn components(&self) -> Vec<(&'static str, Component<'_, T>)> {
    vec![("weight", Component::param(&self.weight))]
  }
}

impl<T: Real> Layer<T> for Conv1d<T> {
  fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
    input.conv1d(&self.weight, self.params)
  }
}


/// 2-d convolution with a square kernel over input `[height, width, in_channels]`.

#[derive(Debug, Clone)]
pub struct Conv2d<T: Real> {
  pub weight: Tensor<T>,
  pub params: ConvParams<T>,
}

impl<T: Real> Conv2d<T> {
  pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize, params: ConvParams<T>) -> Self {
    Self::with_config(in_channels, out_channels, kernel_size, params, EvalConfig::default())
  }

  pub fn with_config(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    params: ConvParams<T>,
    config: EvalConfig,
  ) -> Self {
    let weight = NdArray::randn(&[kernel_size, kernel_size, in_channels, out_channels]);
    Self { weight: Tensor::with_config(weight, config), params }
  }
}

impl<T: Real> Module<T> for Conv2d<T> {
  fn components(&self) -> Vec<(&'static str, Component<'_, T>)> {
    vec![("weight", Component::param(&self.weight))]
  }
}

impl<T: Real> Layer<T> for Conv2d<T> {
  fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
    input.conv2d(&self.weight, self.params)
  }
}


/// Negative log-likelihood of log-probabilities `[batch, classes]`
/// against class indices `[batch]`.

#[derive(Debug, Clone, Copy, Default)]
pub struct NllLoss {
  pub reduction: Reduction,
}

impl NllLoss {
  pub fn new(reduction: Reduction) -> Self {
    Self { reduction }
  }

  pub fn forward<T: Real>(&self, pred: &Tensor<T>, target: &Tensor<T>) -> Result<Tensor<T>> {
    pred.nll_loss(target, self.reduction)
  }
}


/// Elementwise squared error `(x - y)²`. Not reduced.

pub fn l2_loss<T: Real>(x: &Tensor<T>, y: &Tensor<T>) -> Result<Tensor<T>> {
  let diff = x.add(&y.mul_scalar(-T::one())?)?;
  diff.mul(&diff)
}

/// Mean negative log-likelihood of `softmax(x)` against class indices `y`.

pub fn cross_entropy<T: Real>(x: &Tensor<T>, y: &Tensor<T>) -> Result<Tensor<T>> {
  x.softmax(-1)?
    .log()?
    .nll_loss(y, Reduction::Mean)
}


#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  #[test]
  fn linear() {
    let layer = Linear::<f32>::new(3, 2);
    assert_eq!(layer.parameters().len(), 2);
    assert_eq!(layer.num_parameters(), Ok(8));
    let x = Tensor::constant(NdArray::ones(&[4,3]));
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.shape(), Ok(vec![4, 2]));
    y.backward(None).unwrap();
    assert_eq!(layer.bias.gradient().unwrap().to_vec(), vec![4.0, 4.0]);
    assert_eq!(layer.weight.gradient().unwrap(), NdArray::fill(&[3,2], 4.0));
  }

  #[test]
  fn conv_layers() {
    let conv = Conv1d::<f64>::new(16, 32, 3, ConvParams { stride: 2, padding: 1, pad_value: 0.0 });
    let x = Tensor::constant(NdArray::randn(&[10, 16]));
    assert_eq!(conv.forward(&x).unwrap().shape(), Ok(vec![5, 32]));
    assert_eq!(conv.named_parameters()[0].0, "weight");

    let conv = Conv2d::<f64>::new(3, 4, 3, ConvParams::default());
    let x = Tensor::constant(NdArray::randn(&[6, 5, 3]));
    let y = conv.forward(&x).unwrap();
    assert_eq!(y.shape(), Ok(vec![4, 3, 4]));
    y.backward(None).unwrap();
    assert_eq!(conv.weight.gradient().unwrap().dims(), &[3, 3, 3, 4]);
  }

  #[test]
  fn l2() {
    let x = Tensor::new(NdArray::vec(&[1.0, 2.0]));
    let y = Tensor::constant(NdArray::vec(&[3.0, 2.0]));
    let loss = l2_loss(&x, &y).unwrap();
    assert_eq!(loss.to_vec(), Ok(vec![4.0, 0.0]));
    loss.backward(None).unwrap();
    assert_eq!(x.gradient().unwrap().to_vec(), vec![-4.0, 0.0]);
  }

  #[test]
  fn cross_entropy_of_uniform_logits() {
    let x = Tensor::new(NdArray::<f64>::zeros(&[2, 4]));
    let y = Tensor::constant(NdArray::vec(&[1.0, 3.0]));
    let loss = cross_entropy(&x, &y).unwrap();
    assert_abs_diff_eq!(loss.item().unwrap(), 4f64.ln(), epsilon = 1e-12);
    loss.backward(None).unwrap();
    // softmax - one_hot, averaged over the batch
    let grad = x.gradient().unwrap();
    assert_abs_diff_eq!(grad.get(&[0, 0]).unwrap(), 0.125, epsilon = 1e-12);
    assert_abs_diff_eq!(grad.get(&[0, 1]).unwrap(), -0.375, epsilon = 1e-12);
    assert_abs_diff_eq!(grad.get(&[1, 3]).unwrap(), -0.375, epsilon = 1e-12);
  }

  #[test]
  fn nll_module() {
    let pred = Tensor::new(NdArray::vec(&[-0.2, -1.7]));
    let target = Tensor::constant(NdArray::vec(&[1.0]));
    let loss = NllLoss::new(Reduction::Sum).forward(&pred, &target).unwrap();
    assert_eq!(loss.item(), Ok(1.7));
  }
}
