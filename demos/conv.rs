// This example demonstrates a tiny 2-d convolutional classifier,
// evaluated eagerly so every node gets computed right when it's built.

use lazygrad::{
  NdArray, Tensor, EvalConfig, ConvParams, Module, Layer, Result,
  nn::{ self, Conv2d, Linear },
  optimize::{ Optimizer, Sgd },
};

fn main() -> Result<()> {
  let config = EvalConfig::eager();
  let params = ConvParams { stride: 1, padding: 1, pad_value: 0.0 };
  let conv = Conv2d::<f64>::with_config(1, 4, 3, params, config);
  let head = Linear::with_config(8 * 8 * 4, 10, config);
  let parameters: Vec<_> = conv.parameters().into_iter().chain(head.parameters()).collect();

  let mut optimizer = Optimizer::new(1e-4, Sgd);

  // --- Insert real data here ---
  let image = Tensor::with_config(NdArray::rand(&[8, 8, 1]), config);
  let label = Tensor::with_config(NdArray::vec(&[3.0]), config);

  for step in 0..20 {
    let features = conv.forward(&image)?.tanh()?.flatten()?;
    let logits = head.forward(&features)?;
    let loss = nn::cross_entropy(&logits, &label)?;
    println!("step {step}: loss {}, predicted class {}", loss.item()?, logits.argmax()?);
    optimizer.minimize(&loss, &parameters)?;
  }
  Ok(())
}
