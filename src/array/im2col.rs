//! Window extraction that turns convolution into matrix multiplication.
//!
//! An input of shape `[..spatial, channels]` is cut into one window per
//! output position. Every window is flattened into a row of the column
//! matrix, so that convolving with a kernel of shape
//! `[..kernel, channels, out_channels]` becomes a single matmul.

use itertools::Itertools;
use tracing::trace_span;

use crate::{
  shape::Shape,
  array::NdArray,
  error::{ Error, Result },
  scalar::Numeric,
};


/// Per-axis window placement shared by all spatial axes.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
  pub input: Vec<usize>,
  pub kernel: Vec<usize>,
  pub stride: usize,
  pub padding: usize,
}

impl Geometry {
  pub fn new(input: &[usize], kernel: &[usize], stride: usize, padding: usize) -> Result<Self> {
    if stride == 0 {
      return Err(Error::InvalidParameter("stride must be greater than 0".to_string()))
    }
    if input.len() != kernel.len() {
      return Err(Error::InvalidParameter(format!(
        "{}-d kernel cannot slide over {}-d input", kernel.len(), input.len())))
    }
    for (&n, &k) in input.iter().zip(kernel) {
      if k == 0 || k > n + 2 * padding {
        return Err(Error::InvalidParameter(format!(
          "kernel of size {k} does not fit input of size {n} with padding {padding}")))
      }
    }
    Ok(Self { input: input.to_vec(), kernel: kernel.to_vec(), stride, padding })
  }

  /// Number of window positions along each axis:
  /// `floor((n + 2p - k) / s) + 1`

  pub fn output(&self) -> Vec<usize> {
    self.input.iter()
      .zip(&self.kernel)
      .map(|(&n, &k)| (n + 2 * self.padding - k) / self.stride + 1 )
      .collect()
  }

  pub fn window_len(&self) -> usize {
    self.kernel.iter().product()
  }
}


/// Result of the window extraction.

#[derive(Debug, Clone)]
pub struct Columns<T: Numeric> {
  /// `[windows, window_len * channels]`
  pub matrix: NdArray<T>,
  /// For every window, the original input rows it touched, paired
  /// with their position inside the window. Padding is left out.
  pub origins: Vec<Vec<(usize, usize)>>,
  pub geometry: Geometry,
  pub channels: usize,
}

// Row-major multi-indices for the given extents

fn positions(dims: &[usize]) -> impl Iterator<Item=Vec<usize>> + '_ {
  dims.iter()
    .map(|&n| 0..n )
    .multi_cartesian_product()
}

fn linear(indices: &[usize], dims: &[usize]) -> usize {
  indices.iter()
    .zip(dims)
    .fold(0, |acc, (&i, &n)| acc * n + i )
}

/// Extract all windows of `input` (shape `[..geometry.input, channels]`),
/// filling positions that fall into the padding with `pad_value`.

pub fn im2col<T: Numeric>(input: &NdArray<T>, geometry: Geometry, pad_value: T) -> Result<Columns<T>> {
  let spatial = geometry.input.len();
  if input.rank() != spatial + 1 || input.dims()[..spatial] != geometry.input[..] {
    let mut expected = geometry.input.clone();
    expected.push(input.dims().last().copied().unwrap_or(0));
    return Err(Error::shape(&expected, input.dims()))
  }
  let channels = input.dims()[spatial];
  let output = geometry.output();
  let window_len = geometry.window_len();
  let _span = trace_span!("im2col", ?output, window_len, channels).entered();

  let source = input.to_vec();
  let num_windows: usize = output.iter().product();
  let mut data = Vec::with_capacity(num_windows * window_len * channels);
  let mut origins = Vec::with_capacity(num_windows);

  for out in positions(&output) {
    let mut touched = vec![];
    for (w, offsets) in positions(&geometry.kernel).enumerate() {
      // Coordinates in the unpadded input, if inside
      let origin: Option<Vec<usize>> = out.iter()
        .zip(&offsets)
        .zip(&geometry.input)
        .map(|((&o, &k), &n)| {
          let padded = o * geometry.stride + k;
          padded.checked_sub(geometry.padding).filter(|&i| i < n )
        })
        .collect();
      match origin {
        Some(coords) => {
          let row = linear(&coords, &geometry.input);
          data.extend_from_slice(&source[row * channels..(row + 1) * channels]);
          touched.push((row, w));
        },
        None => data.extend(std::iter::repeat(pad_value).take(channels)),
      }
    }
    origins.push(touched);
  }

  let matrix = NdArray::from_shape(Shape::new(&[num_windows, window_len * channels]), data);
  Ok(Columns { matrix, origins, geometry, channels })
}

/// Scatter gradients of the column matrix back onto the input rows.
/// Rows touched by several overlapping windows accumulate.

pub fn col2im<T: Numeric>(grad: &NdArray<T>, columns: &Columns<T>) -> Result<NdArray<T>> {
  if grad.dims() != columns.matrix.dims() {
    return Err(Error::shape(columns.matrix.dims(), grad.dims()))
  }
  let channels = columns.channels;
  let width = grad.dims()[1];
  let grad = grad.to_vec();
  let rows: usize = columns.geometry.input.iter().product();
  let mut out = vec![T::zero(); rows * channels];
  for (window, touched) in columns.origins.iter().enumerate() {
    for &(row, w) in touched {
      let src = window * width + w * channels;
      for c in 0..channels {
        out[row * channels + c] += grad[src + c];
      }
    }
  }
  let mut dims = columns.geometry.input.clone();
  dims.push(channels);
  Ok(NdArray::from_shape(Shape::new(&dims), out))
}
