use std::fmt::Debug;

use rand::distributions::uniform::SampleUniform;
use num_traits::{ Num, NumCast, NumAssignOps };
use serde::{ Serialize, Deserialize };

#[cfg(feature = "rayon")]
use rayon::prelude::*;


/// Element kind of a [Buffer](crate::Buffer).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
  I8,
  I16,
  I32,
  I64,
  U8,
  U16,
  U32,
  U64,
  F32,
  F64,
  Bool,
}

impl DType {
  /// Width of a single cell in bytes.

  pub fn size_of(&self) -> usize {
    match self {
      Self::I8 | Self::U8 | Self::Bool => 1,
      Self::I16 | Self::U16 => 2,
      Self::I32 | Self::U32 | Self::F32 => 4,
      Self::I64 | Self::U64 | Self::F64 => 8,
    }
  }

  pub fn is_float(&self) -> bool {
    matches!(self, Self::F32 | Self::F64)
  }

  pub fn is_integer(&self) -> bool {
    !self.is_float() && *self != Self::Bool
  }
}

impl std::fmt::Display for DType {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let name = match self {
      Self::I8 => "int8",
      Self::I16 => "int16",
      Self::I32 => "int32",
      Self::I64 => "int64",
      Self::U8 => "uint8",
      Self::U16 => "uint16",
      Self::U32 => "uint32",
      Self::U64 => "uint64",
      Self::F32 => "float32",
      Self::F64 => "float64",
      Self::Bool => "bool",
    };
    write!(f, "{name}")
  }
}


/// All types that may be stored in an [NdArray](crate::NdArray).

pub trait Element: PartialEq + Clone + Copy + Default + Send + Sync + Debug + 'static {
  const DTYPE: DType;
}


/// Read-only strided matrix handed to a [Numeric::gemm] kernel.

#[derive(Debug, Clone, Copy)]
pub struct MatRef<'a, T> {
  pub data: &'a [T],
  pub offset: usize,
  pub rows: usize,
  pub cols: usize,
  pub row_stride: isize,
  pub col_stride: isize,
}

impl<T: Copy> MatRef<'_, T> {
  #[inline]
  fn at(&self, row: usize, col: usize) -> T {
    let idx = self.offset as isize + row as isize * self.row_stride + col as isize * self.col_stride;
    self.data[idx as usize]
  }
}


/// All numeric types.
///
/// The matrix multiply kernel may be overridden per type.
/// Floats use [matrixmultiply] when the `unsafe` feature is enabled.

pub trait Numeric: Element + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum {
  fn gemm(lhs: MatRef<Self>, rhs: MatRef<Self>) -> Vec<Self> {
    naive_gemm(lhs, rhs)
  }
}


/// All continuous numeric types. Only these can be differentiated.

pub trait Real: Numeric + num_traits::Float + SampleUniform {}


// Row-major product of two strided matrices

pub(crate) fn naive_gemm<T: Numeric>(lhs: MatRef<T>, rhs: MatRef<T>) -> Vec<T> {
  let cols = rhs.cols;
  let mut data = vec![T::zero(); lhs.rows * cols];
  if cols == 0 { return data }

  let fill_row = |i: usize, row: &mut [T]| {
    for (j, cell) in row.iter_mut().enumerate() {
      for k in 0..lhs.cols {
        *cell += lhs.at(i, k) * rhs.at(k, j);
      }
    }
  };

  #[cfg(feature = "rayon")]
  data.par_chunks_mut(cols)
    .enumerate()
    .for_each(|(i, row)| fill_row(i, row) );

  #[cfg(not(feature = "rayon"))]
  data.chunks_mut(cols)
    .enumerate()
    .for_each(|(i, row)| fill_row(i, row) );

  data
}


macro_rules! element {
  ($($t:ty => $kind:ident),*) => {
    $(impl Element for $t {
      const DTYPE: DType = DType::$kind;
    })*
  };
}

element!(
  i8 => I8, i16 => I16, i32 => I32, i64 => I64,
  u8 => U8, u16 => U16, u32 => U32, u64 => U64,
  f32 => F32, f64 => F64,
  bool => Bool
);

impl Numeric for i8 {}
impl Numeric for i16 {}
impl Numeric for i32 {}
impl Numeric for i64 {}
impl Numeric for u8 {}
impl Numeric for u16 {}
impl Numeric for u32 {}
impl Numeric for u64 {}

impl Numeric for f32 {
  #[cfg(feature = "unsafe")]
  fn gemm(lhs: MatRef<Self>, rhs: MatRef<Self>) -> Vec<Self> {
    let mut data = vec![0.0; lhs.rows * rhs.cols];
    if data.is_empty() { return data }
    // Both views were bounds-checked against their buffers on construction
    unsafe {
      matrixmultiply::sgemm(
        lhs.rows,
        lhs.cols,
        rhs.cols,
        1.0,
        lhs.data.as_ptr().add(lhs.offset),
        lhs.row_stride,
        lhs.col_stride,
        rhs.data.as_ptr().add(rhs.offset),
        rhs.row_stride,
        rhs.col_stride,
        0.0,
        data.as_mut_ptr(),
        rhs.cols as isize,
        1,
      );
    }
    data
  }
}

impl Numeric for f64 {
  #[cfg(feature = "unsafe")]
  fn gemm(lhs: MatRef<Self>, rhs: MatRef<Self>) -> Vec<Self> {
    let mut data = vec![0.0; lhs.rows * rhs.cols];
    if data.is_empty() { return data }
    unsafe {
      matrixmultiply::dgemm(
        lhs.rows,
        lhs.cols,
        rhs.cols,
        1.0,
        lhs.data.as_ptr().add(lhs.offset),
        lhs.row_stride,
        lhs.col_stride,
        rhs.data.as_ptr().add(rhs.offset),
        rhs.row_stride,
        rhs.col_stride,
        0.0,
        data.as_mut_ptr(),
        rhs.cols as isize,
        1,
      );
    }
    data
  }
}

impl Real for f32 {}
impl Real for f64 {}
