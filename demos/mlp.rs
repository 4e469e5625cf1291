// This example demonstrates building a simple multi layer perceptron
// from the built-in layers and training it on a toy classification task.

// Parameters get registered explicitly through the Module trait, and a fresh
// lazy graph gets built for every training step.

use lazygrad::{
  NdArray, Tensor, Module, Layer, Component, Result,
  nn::{ self, Linear },
  optimize::{ Optimizer, Momentum },
};

struct Perceptron {
  hidden: Linear<f32>,
  output: Linear<f32>,
}

impl Perceptron {
  pub fn new(input_size: usize, classes: usize) -> Self {
    Self {
      hidden: Linear::new(input_size, 16),
      output: Linear::new(16, classes),
    }
  }
}

impl Module<f32> for Perceptron {
  fn components(&self) -> Vec<(&'static str, Component<'_, f32>)> {
    vec![
      ("hidden", Component::module(&self.hidden)),
      ("output", Component::module(&self.output)),
    ]
  }
}

impl Layer<f32> for Perceptron {
  fn forward(&self, input: &Tensor<f32>) -> Result<Tensor<f32>> {
    let t = self.hidden.forward(input)?.relu()?;
    self.output.forward(&t)
  }
}

fn main() -> Result<()> {
  let model = Perceptron::new(4, 2);
  let mut optimizer = Optimizer::new(0.001, Momentum::default());

  // --- Insert real data here ---
  // Class is 1 whenever the first feature is positive
  let data = NdArray::<f32>::randn(&[32, 4]);
  let labels: Vec<f32> = (0..32)
    .map(|row| if data.get(&[row, 0]).unwrap_or(0.0) > 0.0 { 1.0 } else { 0.0 } )
    .collect();
  let input = Tensor::constant(data);
  let target = Tensor::constant(NdArray::from_vec(labels));

  for epoch in 0..50 {
    let loss = nn::cross_entropy(&model.forward(&input)?, &target)?;
    if epoch % 10 == 0 {
      println!("epoch {epoch}: loss {}", loss.item()?);
    }
    optimizer.minimize(&loss, &model.parameters())?;
  }

  println!("{} trainable parameters", model.num_parameters()?);
  Ok(())
}
