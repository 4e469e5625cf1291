use rand::Rng;

use crate::{
  internal::*,
  shape::Shape,
  array::NdArray,
  error::{ Error, Result },
  scalar::{ Numeric, Real },
};


impl<T: Numeric> NdArray<T> {
  pub fn zeros(dims: &[usize]) -> Self {
    Self::fill(dims, T::zero())
  }

  pub fn ones(dims: &[usize]) -> Self {
    Self::fill(dims, T::one())
  }

  pub fn arange(dims: &[usize], start: T, step: T) -> Self {
    let mut value = start;
    let data = (0..dims.iter().product())
      .map(|_| {
        let out = value;
        value += step;
        out
      })
      .collect();
    Self::from_shape(Shape::new(dims), data)
  }

  /// Vector of length `size` that is one at `idx` and zero elsewhere.

  pub fn hot_encode(idx: usize, size: usize) -> Result<Self> {
    if idx >= size {
      return Err(Error::InvalidParameter(format!(
        "index {idx} out of range for length {size}")))
    }
    let mut a = vec![T::zero(); size];
    a[idx] = T::one();
    Ok(Self::from_vec(a))
  }

  pub fn add(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a + b )
  }

  pub fn sub(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a - b )
  }

  pub fn mul(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a * b )
  }

  pub fn div(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a / b )
  }

  pub fn add_scalar(&self, scalar: T) -> Self {
    self.map(|a| a + scalar )
  }

  pub fn mul_scalar(&self, scalar: T) -> Self {
    self.map(|a| a * scalar )
  }

  /// Fold all elements, starting from zero.

  pub fn sum(&self) -> T {
    self.iter().fold(T::zero(), |acc, a| acc + a )
  }

  /// Sum over the first `n` axes.

  pub fn sum_leading(&self, n: usize) -> Result<Self> {
    if n > self.rank() {
      return Err(Error::InvalidParameter(format!(
        "cannot reduce {} leading axes of {}", n, self.shape())))
    }
    let dims = self.dims()[n..].to_vec();
    let len: usize = dims.iter().product();
    let mut data = vec![T::zero(); len];
    for (i, a) in self.iter().enumerate() {
      if len > 0 { data[i % len] += a }
    }
    Ok(Self::from_shape(Shape::new(&dims), data))
  }

  pub fn max(&self) -> Option<T> {
    self.iter().reduce(|acc, a| if a > acc { a } else { acc } )
  }

  /// Flat index of the greatest element. Ties resolve to the first occurrence.

  pub fn argmax(&self) -> Option<usize> {
    self.iter()
      .enumerate()
      .reduce(|acc, a| if a.1 > acc.1 { a } else { acc } )
      .map(|(i, _)| i )
  }

  pub fn gt(&self, rhs: &Self) -> Result<NdArray<bool>> {
    self.zip(rhs, |a, b| a > b )
  }
}

impl<T: Real> NdArray<T> {
  /// Uniform samples from [0, 1).

  pub fn rand(dims: &[usize]) -> Self {
    let mut rng = rand::thread_rng();
    let data = (0..dims.iter().product())
      .map(|_| rng.gen_range(T::zero(), T::one()) )
      .collect();
    Self::from_shape(Shape::new(dims), data)
  }

  /// Standard normal samples.

  pub fn randn(dims: &[usize]) -> Self {
    let len = dims.iter().product();
    let mut data = vec![T::zero(); len];
    for i in 0..(len + 1) / 2 {
      let j = i * 2;
      let (r1, r2): (T, T) = randn();
      data[j] = r1;
      data[(j + 1) % len] = r2;
    }
    Self::from_shape(Shape::new(dims), data)
  }

  pub fn neg(&self) -> Self {
    self.map(|a| -a )
  }

  pub fn pow(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, |a, b| a.powf(b) )
  }

  pub fn powf(&self, exp: T) -> Self {
    self.map(|a| a.powf(exp) )
  }

  pub fn exp(&self) -> Self {
    self.map(|a| a.exp() )
  }

  pub fn log(&self) -> Self {
    self.map(|a| a.ln() )
  }

  pub fn log_base(&self, base: T) -> Self {
    self.map(|a| a.log(base) )
  }

  pub fn tanh(&self) -> Self {
    self.map(|a| a.tanh() )
  }

  pub fn relu(&self) -> Self {
    self.map(|a| if a > T::zero() { a } else { T::zero() } )
  }

  pub fn sigmoid(&self) -> Self {
    self.map(|a| T::one() / (T::one() + (-a).exp()) )
  }

  /// Normalized exponentials along `axis`, stabilized by subtracting each row's maximum.

  pub fn softmax(&self, axis: isize) -> Result<Self> {
    let mut data = self.to_vec();
    for_each_lane(self.dims(), axis, |lane| {
      let max = lane.iter()
        .map(|&i| data[i] )
        .fold(T::neg_infinity(), T::max);
      let mut sum = T::zero();
      for &i in lane {
        data[i] = (data[i] - max).exp();
        sum += data[i];
      }
      for &i in lane {
        data[i] /= sum;
      }
    })?;
    Ok(Self::from_shape(Shape::new(self.dims()), data))
  }

  /// Vector-Jacobian product of softmax, given its output `self` and the
  /// incoming gradient.

  pub fn softmax_backward(&self, grad: &Self, axis: isize) -> Result<Self> {
    if grad.dims() != self.dims() {
      return Err(Error::shape(self.dims(), grad.dims()))
    }
    let out = self.to_vec();
    let grad = grad.to_vec();
    let mut data = vec![T::zero(); out.len()];
    for_each_lane(self.dims(), axis, |lane| {
      let dot = lane.iter().fold(T::zero(), |acc, &i| acc + grad[i] * out[i] );
      for &i in lane {
        data[i] = out[i] * (grad[i] - dot);
      }
    })?;
    Ok(Self::from_shape(Shape::new(self.dims()), data))
  }
}

// Visit the contiguous offsets of every 1-d lane running along `axis`

fn for_each_lane(dims: &[usize], axis: isize, mut cb: impl FnMut(&[usize])) -> Result<()> {
  if dims.is_empty() {
    cb(&[0]);
    return Ok(())
  }
  let rank = dims.len() as isize;
  if axis >= rank || axis < -rank {
    return Err(Error::InvalidParameter(format!("axis {axis} out of range for rank {rank}")))
  }
  let axis = negative_index(axis, dims.len(), false);
  let outer: usize = dims[..axis].iter().product();
  let len = dims[axis];
  let inner: usize = dims[axis + 1..].iter().product();
  let mut lane = Vec::with_capacity(len);
  for o in 0..outer {
    for i in 0..inner {
      lane.clear();
      lane.extend((0..len).map(|j| (o * len + j) * inner + i ));
      cb(&lane);
    }
  }
  Ok(())
}
