use tracing::trace_span;

use crate::{
  shape::Shape,
  array::NdArray,
  error::{ Error, Result },
  scalar::{ Numeric, MatRef },
};


impl<T: Numeric> NdArray<T> {
  fn as_matrix(&self) -> MatRef<'_, T> {
    MatRef {
      data: self.raw().as_slice(),
      offset: self.shape().offset(),
      rows: self.dims()[0],
      cols: self.dims()[1],
      row_stride: self.shape().strides()[0],
      col_stride: self.shape().strides()[1],
    }
  }

  /// Matrix product of two rank 2 arrays.
  ///
  /// Operands are read through their strides, so transposed
  /// views don't get copied.

  pub fn matmul(&self, rhs: &Self) -> Result<Self> {
    for operand in [self, rhs] {
      match operand.rank() {
        0 => return Err(Error::TypeMismatch(
          "matmul expects matrices, got a scalar".to_string())),
        2 => {},
        rank => return Err(Error::InvalidParameter(format!(
          "matmul expects rank 2 operands, got rank {rank}"))),
      }
    }
    let (rows, inner, cols) = (self.dims()[0], self.dims()[1], rhs.dims()[1]);
    if rhs.dims()[0] != inner {
      return Err(Error::shape(&[inner, cols], rhs.dims()))
    }
    let _span = trace_span!("matmul", rows, inner, cols).entered();
    let data = T::gemm(self.as_matrix(), rhs.as_matrix());
    Ok(Self::from_shape(Shape::new(&[rows, cols]), data))
  }
}
