use std::collections::HashMap;

use num_traits::NumCast;
use tracing::debug;

use crate::{
  array::NdArray,
  tensor::Tensor,
  error::{ Error, Result },
  scalar::Real,
};


/// An optimization strategy to be used with [Optimizer].
///
/// Returns the change to be added to the parameter's value.

pub trait Strategy<R: Real> {
  fn update(&mut self, param: &Tensor<R>, grad: &NdArray<R>, rate: R, step: usize) -> Result<NdArray<R>>;
}


/// Generic optimizer that allows for several optimization [strategies](Strategy) to be used.

#[derive(Debug)]
pub struct Optimizer<R: Real, S: Strategy<R>> {
  strategy: S,
  pub learning_rate: R,
  step: usize,
}

impl<R: Real, S: Strategy<R>> Optimizer<R, S> {
  pub fn new(learning_rate: R, strategy: S) -> Self {
    Self { strategy, learning_rate, step: 1 }
  }

  /// Number of steps taken so far.

  pub fn steps(&self) -> usize {
    self.step - 1
  }

  /// Update every parameter that received a gradient, then clear all gradients.
  /// Parameters that don't require a gradient are left untouched.

  pub fn step(&mut self, params: &[Tensor<R>]) -> Result<()> {
    let mut updated = 0;
    for param in params.iter().filter(|param| param.requires_grad() ) {
      let Some(grad) = param.gradient() else { continue };

      // Execute strategy
      let change = self.strategy.update(param, &grad, self.learning_rate, self.step)?;

      // Apply change
      param.set_value(param.value()?.add(&change)?)?;
      updated += 1;
    }

    // Reset gradients
    for param in params {
      param.clear_gradient();
    }

    debug!(step = self.step, updated, "optimizer step");
    self.step += 1;
    Ok(())
  }

  /// Back-propagate from `loss`, then [step](Self::step).

  pub fn minimize(&mut self, loss: &Tensor<R>, params: &[Tensor<R>]) -> Result<()> {
    loss.backward(None)?;
    self.step(params)
  }
}


/// Stochastic Gradient Descent strategy

#[derive(Debug, Clone, Default)]
pub struct Sgd;

impl<R: Real> Strategy<R> for Sgd {
  fn update(&mut self, _param: &Tensor<R>, grad: &NdArray<R>, rate: R, _step: usize) -> Result<NdArray<R>> {
    Ok(grad.mul_scalar(-rate))
  }
}


/// Stochastic Gradient Descent with momentum

#[derive(Debug, Clone)]
pub struct Momentum<R: Real> {
  pub momentum: R,
  v: HashMap<usize, NdArray<R>>,
}

impl<R: Real> Momentum<R> {
  pub fn new(momentum: R) -> Self {
    Self {
      momentum,
      v: HashMap::new(),
    }
  }
}

impl<R: Real> Default for Momentum<R> {
  fn default() -> Self {
    Self::new(<R as NumCast>::from(0.9).unwrap_or_else(R::zero))
  }
}

impl<R: Real> Strategy<R> for Momentum<R> {
  fn update(&mut self, param: &Tensor<R>, grad: &NdArray<R>, rate: R, _step: usize) -> Result<NdArray<R>> {
    let v = self.v
      .entry(param.id())
      .or_insert_with(|| NdArray::zeros(grad.dims()) );
    if v.dims() != grad.dims() {
      return Err(Error::shape(v.dims(), grad.dims()))
    }
    *v = v.mul_scalar(self.momentum).sub(&grad.mul_scalar(rate))?;
    Ok(v.clone())
  }
}
