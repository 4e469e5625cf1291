//! Lazy computation graphs with reverse-mode automatic differentiation.
//! Small. Few dependencies. CPU only.
//!
//! # Features
//!
//! - **Zero-copy views**: Arrays may be sliced, reshaped and transposed
//! without copying any data. Views share their buffer until written to.
//!
//! - **Lazy or eager**: Graphs either defer computation until a value is
//! read, or compute every node as soon as it is built. The policy is an
//! explicit [EvalConfig] value that travels with the graph.
//!
//! - **Exact gradients**: Back-propagation visits nodes in reverse topological
//! order, so gradients arriving along several paths get summed before they
//! are passed on.
//!
//! - **Convolutions**: 1-d and 2-d convolutions with stride and padding,
//! implemented via im2col and matrix multiplication.
//!
//! - **Typed storage**: Arrays can hold any integer or float type, as well as
//! booleans. Graphs and gradients work over [scalar::Real] types.
//!
//! # Examples
//!
//! Evaluating and minimizing a small linear model:
//! ```
//! use lazygrad::{ NdArray, Tensor, Module, Layer, nn, optimize::{ Optimizer, Sgd } };
//!
//! fn main() -> lazygrad::Result<()> {
//!   let model = nn::Linear::<f32>::new(2, 1);
//!   let mut optimizer = Optimizer::new(0.01, Sgd);
//!
//!   let x = Tensor::constant(NdArray::new(&[1, 2], vec![1.0, 2.0])?);
//!   let y = Tensor::constant(NdArray::new(&[1, 1], vec![0.5])?);
//!
//!   for _ in 0..10 {
//!     let loss = nn::l2_loss(&model.forward(&x)?, &y)?;
//!     optimizer.minimize(&loss, &model.parameters())?;
//!   }
//!   Ok(())
//! }
//! ```
//!
//! Building a graph lazily:
//! ```
//! use lazygrad::{ NdArray, Tensor };
//!
//! let x = Tensor::new(NdArray::vec(&[1.0, 2.0, 3.0]));
//! let y = x.mul(&x).unwrap().add_scalar(1.0).unwrap();
//! assert!(!y.is_realized());
//!
//! y.backward(None).unwrap();
//! assert_eq!(y.to_vec().unwrap(), vec![2.0, 5.0, 10.0]);
//! assert_eq!(x.gradient().unwrap().to_vec(), vec![2.0, 4.0, 6.0]);
//! ```
//!
//! ## More examples
//! Check the `/demos` folder for more example code.
//!
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)*: Accelerated matrix math using [matrixmultiply] crate.
//! - `rayon`: Multi-threaded matrix multiplication for non-float types.

mod internal;
mod shape;
mod array;
mod config;
mod error;
mod tensor;
mod module;

pub mod scalar;
pub mod nn;
pub mod optimize;

pub use shape::Shape;
pub use array::{ Buffer, NdArray, im2col };
pub use config::EvalConfig;
pub use error::{ Error, Result };
pub use tensor::{ Tensor, Operator, Op, Conv, ConvParams, Nll, Reduction };
pub use module::{ Module, Layer, Component };
