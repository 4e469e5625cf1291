use std::rc::Rc;
use std::fmt::Debug;

use itertools::Itertools;
use num_traits::NumCast;

mod cops;
mod lops;
pub mod im2col;

use crate::{
  shape::Shape,
  error::{ Error, Result },
  scalar::{ DType, Element, Numeric },
};


/// Flat, homogeneously typed storage.
///
/// Buffers are shared read-only between an [NdArray] and the views derived
/// from it. Writes go through [NdArray::set], which copies a shared buffer first.

#[derive(Debug, Clone, PartialEq)]
pub struct Buffer<T: Element> {
  cells: Vec<T>,
}

impl<T: Element> Buffer<T> {
  pub fn dtype(&self) -> DType {
    T::DTYPE
  }

  pub fn len(&self) -> usize {
    self.cells.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cells.is_empty()
  }

  pub fn as_slice(&self) -> &[T] {
    &self.cells
  }
}

impl<T: Element> std::ops::Index<usize> for Buffer<T> {
  type Output = T;

  fn index(&self, i: usize) -> &T {
    &self.cells[i]
  }
}


/// Strided N-dimensional view over a reference counted [Buffer].
///
/// Slicing, reshaping and permuting produce new views onto the same
/// buffer without copying. The buffer lives as long as its last view.

#[derive(Debug, Clone)]
pub struct NdArray<T: Element> {
  shape: Shape,
  data: Rc<Buffer<T>>,
}

impl<T: Element> PartialEq for NdArray<T> {
  fn eq(&self, rhs: &Self) -> bool {
    self.shape.dims == rhs.shape.dims && self.iter().eq(rhs.iter())
  }
}

impl<T: Element> NdArray<T> {
  pub(crate) fn from_shape(shape: Shape, data: Vec<T>) -> Self {
    debug_assert_eq!(shape.size(), data.len());
    Self { shape, data: Rc::new(Buffer { cells: data }) }
  }

  pub fn new(dims: &[usize], data: Vec<T>) -> Result<Self> {
    let shape = Shape::new(dims);
    if shape.size() != data.len() {
      return Err(Error::shape(dims, &[data.len()]))
    }
    Ok(Self::from_shape(shape, data))
  }

  pub fn from_vec(vec: Vec<T>) -> Self {
    Self::from_shape(Shape::new(&[vec.len()]), vec)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::from_vec(vec.to_vec())
  }

  pub fn scalar(item: T) -> Self {
    Self::from_shape(Shape::new(&[]), vec![item])
  }

  pub fn fill(dims: &[usize], filler: T) -> Self {
    Self::from_shape(Shape::new(dims), vec![filler; dims.iter().product()])
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  pub fn dtype(&self) -> DType {
    T::DTYPE
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  /// The complete backing buffer, including cells outside this view.

  pub fn raw(&self) -> &Buffer<T> {
    &self.data
  }

  pub fn shares_buffer(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.data, &other.data)
  }

  /// Elements in row-major logical order.

  pub fn iter(&self) -> impl Iterator<Item=T> + '_ {
    self.shape.iter().map(move |i| self.data[i] )
  }

  pub fn to_vec(&self) -> Vec<T> {
    self.iter().collect()
  }

  pub fn into_vec(self) -> Vec<T> {
    if self.shape.contiguous() && self.shape.offset == 0 && self.data.len() == self.size() {
      match Rc::try_unwrap(self.data) {
        Ok(buffer) => buffer.cells,
        Err(data) => data.cells.clone(),
      }
    } else {
      self.to_vec()
    }
  }

  pub fn item(&self) -> Result<T> {
    if self.size() != 1 {
      return Err(Error::shape(&[1], self.dims()))
    }
    Ok(self.data[self.shape.offset])
  }

  pub fn get(&self, indices: &[usize]) -> Result<T> {
    Ok(self.data[self.shape.locate(indices)?])
  }

  /// Write a single cell. A buffer shared with other views gets copied first.

  pub fn set(&mut self, indices: &[usize], value: T) -> Result<()> {
    let idx = self.shape.locate(indices)?;
    Rc::make_mut(&mut self.data).cells[idx] = value;
    Ok(())
  }

  /// Copy the view into a freshly allocated contiguous buffer.

  pub fn materialize(&self) -> Self {
    Self::from_shape(Shape::new(self.dims()), self.to_vec())
  }

  pub fn contiguous(&self) -> Self {
    if self.shape.contiguous() {
      self.clone()
    } else {
      self.materialize()
    }
  }

  /// Fix the leading axes at `indices`, sharing the buffer.

  pub fn slice(&self, indices: &[usize]) -> Result<Self> {
    let shape = self.shape.take(indices)?;
    Ok(Self { shape, data: self.data.clone() })
  }

  /// Change extents, materializing non-contiguous views first.
  /// A single `-1` gets inferred.

  pub fn reshape(&self, dims: &[isize]) -> Result<Self> {
    let this = self.contiguous();
    let shape = this.shape.reshape(dims)?;
    Ok(Self { shape, data: this.data })
  }

  pub fn reshape_to(&self, dims: &[usize]) -> Result<Self> {
    let dims: Vec<isize> = dims.iter().map(|&n| n as isize ).collect();
    self.reshape(&dims)
  }

  pub fn flatten(&self) -> Result<Self> {
    self.reshape(&[1, -1])
  }

  pub fn permute(&self, order: &[usize]) -> Result<Self> {
    let shape = self.shape.permute(order)?;
    Ok(Self { shape, data: self.data.clone() })
  }

  pub fn transpose(&self) -> Self {
    Self { shape: self.shape.transpose(), data: self.data.clone() }
  }

  pub(crate) fn broadcast_to(&self, dims: &[usize]) -> Result<Self> {
    let shape = self.shape.broadcast_to(dims)?;
    Ok(Self { shape, data: self.data.clone() })
  }

  pub fn map<O: Element, F: FnMut(T) -> O>(&self, cb: F) -> NdArray<O> {
    NdArray::from_shape(Shape::new(self.dims()), self.iter().map(cb).collect())
  }

  /// Combine with `rhs` element by element.
  ///
  /// `rhs` must either match this array's shape, hold a single element,
  /// or match its trailing axes.

  pub fn zip<O: Element, F: Fn(T, T) -> O>(&self, rhs: &Self, cb: F) -> Result<NdArray<O>> {
    let rhs = rhs.broadcast_to(self.dims())?;
    let data = self.iter()
      .zip(rhs.iter())
      .map(|(a, b)| cb(a, b) )
      .collect();
    Ok(NdArray::from_shape(Shape::new(self.dims()), data))
  }
}

impl<T: Numeric> NdArray<T> {
  /// Convert to another element kind.

  pub fn cast<O: Numeric>(&self) -> Result<NdArray<O>> {
    let data = self.iter()
      .map(|a| <O as NumCast>::from(a).ok_or_else(|| Error::TypeMismatch(format!(
        "{a:?} cannot be represented as {}", O::DTYPE))))
      .collect::<Result<Vec<_>>>()?;
    Ok(NdArray::from_shape(Shape::new(self.dims()), data))
  }
}

impl<T: Element> std::fmt::Display for NdArray<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "NdArray<{}>{:?} ", T::DTYPE, self.dims())?;
    print_chunks(0, self.dims(), &self.to_vec(), f)
  }
}

fn print_chunks<T: Debug>(idx: usize, dims: &[usize], vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = "  ".repeat(idx);
  if dims.is_empty() {
    writeln!(f, "{indent}{:?}", vec[0])?;
  } else if idx == dims.len() - 1 {
    writeln!(f, "{indent}[{}]", vec.iter().map(|v| format!("{v:?}") ).join(", "))?;
  } else if vec.is_empty() {
    writeln!(f, "{indent}[]")?;
  } else {
    writeln!(f, "{indent}[")?;
    for chunk in vec.chunks(vec.len() / dims[idx].max(1)) {
      print_chunks(idx + 1, dims, chunk, f)?;
    }
    writeln!(f, "{indent}]")?;
  }
  Ok(())
}


#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn new_checks_length() {
    assert!(NdArray::new(&[2,2], vec![1, 2, 3]).is_err());
    let x = NdArray::new(&[2,2], vec![1u8, 2, 3, 4]).unwrap();
    assert_eq!(x.dtype(), DType::U8);
    assert_eq!(x.raw().dtype(), DType::U8);
  }

  #[test]
  fn slice() {
    let x = NdArray::new(&[2,2,2], vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    assert_eq!(x.slice(&[0,0]).unwrap(), NdArray::vec(&[1, 2]));
    assert_eq!(x.slice(&[1,1]).unwrap(), NdArray::vec(&[7, 8]));
    assert_eq!(x.slice(&[1]).unwrap(), NdArray::new(&[2,2], vec![5, 6, 7, 8]).unwrap());
    assert_eq!(x.slice(&[0,1,1]).unwrap().item(), Ok(4));
    assert!(x.slice(&[0]).unwrap().shares_buffer(&x));
  }

  #[test]
  fn permute_shares_buffer() {
    let x = NdArray::new(&[2,3], vec![1, 2, 3, 4, 5, 6]).unwrap();
    let t = x.transpose();
    assert!(t.shares_buffer(&x));
    assert_eq!(t.dims(), &[3,2]);
    assert_eq!(t.to_vec(), vec![1, 4, 2, 5, 3, 6]);
    assert_eq!(t.get(&[2,1]), Ok(6));
  }

  #[test]
  fn reshape_materializes_permuted() {
    let x = NdArray::new(&[2,3], vec![1, 2, 3, 4, 5, 6]).unwrap();
    let r = x.reshape(&[3,-1]).unwrap();
    assert!(r.shares_buffer(&x));
    let r = x.transpose().reshape(&[-1]).unwrap();
    assert!(!r.shares_buffer(&x));
    assert_eq!(r.to_vec(), vec![1, 4, 2, 5, 3, 6]);
    assert_eq!(x.flatten().unwrap().dims(), &[1,6]);
    assert!(matches!(x.reshape(&[4,-1]), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn set_copies_shared_buffer() {
    let x = NdArray::new(&[2,2], vec![1, 2, 3, 4]).unwrap();
    let mut y = x.transpose();
    y.set(&[0,1], 9).unwrap();
    assert_eq!(x.to_vec(), vec![1, 2, 3, 4]);
    assert_eq!(y.to_vec(), vec![1, 9, 2, 4]);
    assert!(!y.shares_buffer(&x));
  }

  #[test]
  fn zip_broadcasts_rows() {
    let x = NdArray::new(&[2,3], vec![1, 2, 3, 4, 5, 6]).unwrap();
    let row = NdArray::vec(&[1, 2, 3]);
    assert_eq!(x.zip(&row, |a, b| a + b ).unwrap().to_vec(), vec![2, 4, 6, 5, 7, 9]);
    let one = NdArray::scalar(10);
    assert_eq!(x.zip(&one, |a, b| a * b ).unwrap().to_vec(), vec![10, 20, 30, 40, 50, 60]);
    assert!(x.zip(&NdArray::vec(&[1, 2]), |a, b| a + b ).is_err());
  }

  #[test]
  fn cast() {
    let x = NdArray::vec(&[1.0, 2.5, 255.0]);
    assert_eq!(x.cast::<u8>().unwrap().to_vec(), vec![1, 2, 255]);
    assert!(matches!(NdArray::vec(&[-1.0]).cast::<u8>(), Err(Error::TypeMismatch(_))));
  }

  #[test]
  fn display() {
    let x = NdArray::new(&[2,2], vec![1, 2, 3, 4]).unwrap();
    assert_eq!(x.to_string(), "NdArray<int32>[2, 2] [\n  [1, 2]\n  [3, 4]\n]\n");
  }

  proptest! {
    #[test]
    fn transpose_round_trip(dims in prop::collection::vec(1usize..4, 1..4)) {
      let size = dims.iter().product::<usize>();
      let x = NdArray::new(&dims, (0..size as i64).collect()).unwrap();
      prop_assert_eq!(x.transpose().transpose(), x);
    }

    #[test]
    fn reshape_round_trip(rows in 1usize..6, cols in 1usize..6) {
      let x = NdArray::new(&[rows, cols], (0..(rows * cols) as i32).collect()).unwrap();
      let flat = x.transpose().reshape(&[-1]).unwrap();
      let back = flat.reshape(&[cols as isize, rows as isize]).unwrap();
      prop_assert_eq!(back.clone(), x.transpose());
      prop_assert_eq!(x.reshape(&[cols as isize, -1]).unwrap().reshape_to(&[rows, cols]).unwrap(), x);
    }
  }
}
