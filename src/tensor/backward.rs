use std::collections::HashMap;

use tracing::{ debug, trace };

use crate::{
  array::NdArray,
  tensor::{ Tensor, Operator },
  error::{ Error, Result },
  scalar::Real,
};


// Number of edges pointing into every node reachable from `output`.
// An input consumed twice by the same node counts twice.

fn count_consumers<T: Real>(output: &Tensor<T>) -> HashMap<usize, usize> {
  let mut consumers = HashMap::from([(output.id(), 0)]);
  let mut stack = vec![output.clone()];
  while let Some(node) = stack.pop() {
    for input in node.inputs() {
      let count = consumers.entry(input.id()).or_insert(0);
      if *count == 0 {
        stack.push(input.clone());
      }
      *count += 1;
    }
  }
  consumers
}

/// Reverse-mode pass from `output`, seeded with `seed`.
///
/// A node is processed only once every consumer has delivered its
/// contribution, so gradients arriving along several paths get summed
/// before being handed on. Returns the number of processed nodes.

pub(crate) fn propagate<T: Real>(output: &Tensor<T>, seed: NdArray<T>) -> Result<usize> {
  let dims = output.shape()?;
  if seed.dims() != dims {
    return Err(Error::shape(&dims, seed.dims()))
  }
  let mut pending = count_consumers(output);
  debug!(output = output.id(), nodes = pending.len(), "backward pass");

  let mut contributions: HashMap<usize, Vec<NdArray<T>>> = HashMap::from([(output.id(), vec![seed])]);
  let mut ready = vec![output.clone()];
  let mut processed = 0;

  while let Some(node) = ready.pop() {
    let mut grads = contributions.remove(&node.id()).unwrap_or_default().into_iter();
    let first = grads.next()
      .ok_or_else(|| Error::NullValue(format!("node {} received no gradient", node.id())))?;
    let grad = grads.try_fold(first, |acc, g| acc.add(&g) )?;
    node.set_gradient(grad.clone());
    processed += 1;

    if let Some(op) = &node.node.op {
      let values = node.inputs().iter()
        .map(|input| input.value() )
        .collect::<Result<Vec<_>>>()?;
      let inputs: Vec<&NdArray<T>> = values.iter().collect();
      let input_grads = op.borrow().gradient(&grad, &inputs)?;
      debug_assert_eq!(input_grads.len(), inputs.len());
      trace!(id = node.id(), op = op.borrow().name(), "propagated");

      for (input, input_grad) in node.inputs().iter().zip(input_grads) {
        contributions.entry(input.id()).or_default().push(input_grad);
        let count = pending.get_mut(&input.id())
          .ok_or_else(|| Error::NullValue(format!("node {} is not part of the graph", input.id())))?;
        *count -= 1;
        if *count == 0 {
          ready.push(input.clone());
        }
      }
    }
  }

  debug!(output = output.id(), processed, "backward pass done");
  Ok(processed)
}


#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;

  fn leaf(values: &[f64]) -> Tensor<f64> {
    Tensor::new(NdArray::vec(values))
  }

  #[test]
  fn counts_every_edge() {
    let x = leaf(&[1.0]);
    let y = x.mul(&x).unwrap();
    let z = y.add(&x).unwrap();
    let counts = count_consumers(&z);
    assert_eq!(counts[&z.id()], 0);
    assert_eq!(counts[&y.id()], 1);
    assert_eq!(counts[&x.id()], 3);
  }

  #[test]
  fn diamond_sums_both_paths() {
    // y = tanh(x) + exp(x)
    let x = leaf(&[0.3, -0.7]);
    let y = x.tanh().unwrap().add(&x.exp().unwrap()).unwrap();
    assert_eq!(propagate(&y, NdArray::ones(&[2])), Ok(4));
    let grad = x.gradient().unwrap().to_vec();
    for (g, v) in grad.iter().zip([0.3f64, -0.7]) {
      assert_abs_diff_eq!(*g, 1.0 - v.tanh().powi(2) + v.exp(), epsilon = 1e-12);
    }
  }

  #[test]
  fn same_input_in_both_positions() {
    let x = leaf(&[2.0, -3.0]);
    let y = x.add(&x).unwrap();
    y.backward(None).unwrap();
    assert_eq!(x.gradient().unwrap().to_vec(), vec![2.0, 2.0]);
  }

  #[test]
  fn gradient_slots_are_overwritten() {
    let x = leaf(&[1.0]);
    let y = x.mul_scalar(3.0).unwrap();
    y.backward(None).unwrap();
    y.backward(None).unwrap();
    assert_eq!(x.gradient().unwrap().to_vec(), vec![3.0]);
    assert_eq!(y.gradient().unwrap().to_vec(), vec![1.0]);
  }

  #[test]
  fn explicit_seed() {
    let x = leaf(&[1.0, 2.0]);
    let y = x.mul_scalar(2.0).unwrap();
    y.backward(Some(NdArray::vec(&[1.0, 10.0]))).unwrap();
    assert_eq!(x.gradient().unwrap().to_vec(), vec![2.0, 20.0]);
    assert!(matches!(y.backward(Some(NdArray::vec(&[1.0]))), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn matmul_gradients() {
    let x = Tensor::new(NdArray::new(&[2,3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap());
    let w = Tensor::new(NdArray::new(&[3,1], vec![1.0, 0.0, -1.0]).unwrap());
    let z = x.matmul(&w).unwrap();
    z.backward(None).unwrap();
    assert_eq!(x.gradient().unwrap(), NdArray::new(&[2,3], vec![1.0, 0.0, -1.0, 1.0, 0.0, -1.0]).unwrap());
    assert_eq!(w.gradient().unwrap(), NdArray::new(&[3,1], vec![5.0, 7.0, 9.0]).unwrap());
  }

  #[test]
  fn shared_subgraph_only_counted_once() {
    // h feeds two consumers, each of which feeds the output
    let x = leaf(&[0.5]);
    let h = x.exp().unwrap();
    let a = h.mul_scalar(2.0).unwrap();
    let b = h.mul(&h).unwrap();
    let y = a.add(&b).unwrap();
    y.backward(None).unwrap();
    let e = 0.5f64.exp();
    assert_abs_diff_eq!(h.gradient().unwrap().item().unwrap(), 2.0 + 2.0 * e, epsilon = 1e-12);
    assert_abs_diff_eq!(x.gradient().unwrap().item().unwrap(), (2.0 + 2.0 * e) * e, epsilon = 1e-12);
  }
}
