use itertools::Itertools;
use serde::{ Serialize, Deserialize };

use crate::{
  internal::*,
  error::{ Error, Result },
};


/// Strided view descriptor over a flat buffer.
///
/// The buffer offset of a multi-index `i` is
/// `offset + Σ i[d] * strides[d]`.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
  pub dims: Vec<usize>,
  pub(crate) strides: Vec<isize>,
  pub(crate) offset: usize,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Self {
    let strides = Self::make_strides(dims);
    Self {
      dims: dims.to_vec(),
      strides,
      offset: 0,
    }
  }

  pub fn strided(dims: &[usize], strides: &[isize], offset: usize) -> Self {
    debug_assert_eq!(dims.len(), strides.len());
    Self {
      dims: dims.to_vec(),
      strides: strides.to_vec(),
      offset,
    }
  }

  fn make_strides(dims: &[usize]) -> Vec<isize> {
    if dims.is_empty() { return vec![] }
    let mut strides = vec![0; dims.len()];
    strides[dims.len() - 1] = 1;
    for i in (1..dims.len()).rev() {
      strides[i - 1] = dims[i] as isize * strides[i];
    }
    strides
  }

  pub fn strides(&self) -> &[isize] {
    &self.strides
  }

  pub fn offset(&self) -> usize {
    self.offset
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub(crate) fn index(&self, indices: &[usize]) -> usize {
    debug_assert!(indices.len() <= self.rank());
    (indices.iter()
      .zip(&self.strides)
      .map(|(&i, &s)| i as isize * s)
      .sum::<isize>() + self.offset as isize
    ) as usize
  }

  /// Buffer offset of a complete multi-index, checked against the extents.

  pub fn locate(&self, indices: &[usize]) -> Result<usize> {
    if indices.len() != self.rank() {
      return Err(Error::InvalidParameter(format!(
        "{} indices given for {}", indices.len(), self)))
    }
    self.check_bounds(indices)?;
    Ok(self.index(indices))
  }

  fn check_bounds(&self, indices: &[usize]) -> Result<()> {
    for (d, (&i, &n)) in indices.iter().zip(&self.dims).enumerate() {
      if i >= n {
        return Err(Error::InvalidParameter(format!(
          "index {i} out of bounds for axis {d} of {self}")))
      }
    }
    Ok(())
  }

  pub fn contiguous(&self) -> bool {
    self.strides == Self::make_strides(&self.dims)
  }

  /// Buffer offsets of all elements in row-major logical order.

  pub fn iter(&self) -> Box<dyn Iterator<Item=usize> + '_> {
    if self.contiguous() {
      Box::new(self.offset..self.offset + self.size())
    } else {
      Box::new(ShapeIterator::new(self))
    }
  }

  /// Drop the leading axes, fixing them at `indices`.

  pub fn take(&self, indices: &[usize]) -> Result<Self> {
    if indices.len() > self.rank() {
      return Err(Error::InvalidParameter(format!(
        "cannot slice {} with {} indices", self, indices.len())))
    }
    self.check_bounds(indices)?;
    let dims = self.dims[indices.len()..].to_vec();
    let strides = self.strides[indices.len()..].to_vec();
    let offset = self.index(indices);
    Ok(Self { dims, strides, offset })
  }

  /// Reinterpret a contiguous view with new extents.
  /// A single `-1` entry gets inferred from the remaining ones.

  pub fn reshape(&self, dims: &[isize]) -> Result<Self> {
    if !self.contiguous() {
      return Err(Error::InvalidParameter(format!(
        "cannot reshape non-contiguous {self} without materializing it")))
    }
    let dims = infer_dims(self.size(), dims)?;
    let strides = Self::make_strides(&dims);
    Ok(Self { dims, strides, offset: self.offset })
  }

  pub fn permute(&self, order: &[usize]) -> Result<Self> {
    let valid = order.len() == self.rank()
      && order.iter().all_unique()
      && order.iter().all(|&d| d < self.rank() );
    if !valid {
      return Err(Error::InvalidParameter(format!(
        "{order:?} is not a permutation of the axes of {self}")))
    }
    let dims = order.iter().map(|&d| self.dims[d] ).collect();
    let strides = order.iter().map(|&d| self.strides[d] ).collect();
    Ok(Self { dims, strides, offset: self.offset })
  }

  /// Reverse all axes.

  pub fn transpose(&self) -> Self {
    let mut shape = self.clone();
    shape.dims.reverse();
    shape.strides.reverse();
    shape
  }

  /// Stretch this shape to `dims`, either from a single element
  /// or along missing leading axes.

  pub fn broadcast_to(&self, dims: &[usize]) -> Result<Self> {
    if self.dims == dims {
      Ok(self.clone())
    } else if self.size() == 1 {
      Ok(Self { dims: dims.to_vec(), strides: vec![0; dims.len()], offset: self.offset })
    } else if self.rank() < dims.len() && dims.ends_with(&self.dims) {
      let lead = dims.len() - self.rank();
      let strides = std::iter::repeat(0)
        .take(lead)
        .chain(self.strides.iter().copied())
        .collect();
      Ok(Self { dims: dims.to_vec(), strides, offset: self.offset })
    } else {
      Err(Error::shape(dims, &self.dims))
    }
  }
}

pub(crate) fn infer_dims(size: usize, dims: &[isize]) -> Result<Vec<usize>> {
  let inferred = dims.iter().filter(|&&n| n == -1 ).count();
  if inferred > 1 || dims.iter().any(|&n| n < -1 ) {
    return Err(Error::InvalidParameter(format!(
      "only a single -1 placeholder is allowed in {dims:?}")))
  }
  let known: usize = dims.iter()
    .filter(|&&n| n >= 0 )
    .map(|&n| n as usize )
    .product();
  let known_dims: Vec<usize> = dims.iter().map(|&n| n.max(0) as usize ).collect();
  if inferred == 0 {
    if known != size { return Err(Error::shape(&[size], &known_dims)) }
    return Ok(known_dims)
  }
  if known == 0 || size % known != 0 {
    return Err(Error::shape(&[size], &known_dims))
  }
  Ok(dims.iter().map(|&n| if n == -1 { size / known } else { n as usize } ).collect())
}

impl std::ops::Index<isize> for Shape {
  type Output = usize;

  fn index(&self, i: isize) -> &usize {
    let idx = negative_index(i, self.rank(), false);
    &self.dims[idx]
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Shape{:?}", self.dims)
  }
}


/// Iterate through a [Shape]'s buffer offsets.

pub struct ShapeIterator<'a> {
  shape: &'a Shape,
  counter: Vec<usize>,
  idx: isize,
  finished: bool,
}

impl<'a> ShapeIterator<'a> {
  fn new(shape: &'a Shape) -> Self {
    Self {
      counter: vec![0; shape.rank()],
      idx: shape.offset as isize,
      finished: shape.size() == 0,
      shape,
    }
  }
}

impl<'a> Iterator for ShapeIterator<'a> {
  type Item = usize;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished { return None }
    let out = self.idx as usize;
    let len = self.counter.len();
    if len == 0 { self.finished = true }
    // Walk backward through dimensions
    for cd in (0..len).rev() {
      let count = &mut self.counter[cd];
      // Full turn?
      if *count == self.shape.dims[cd] - 1 {
        if cd == 0 { self.finished = true; break }
        *count = 0;
        let backstride = (self.shape.dims[cd] as isize - 1) * self.shape.strides[cd];
        self.idx -= backstride;
      } else {
        *count += 1;
        self.idx += self.shape.strides[cd];
        break
      }
    }
    Some(out)
  }
}
