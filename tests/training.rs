use lazygrad::{
  NdArray, Tensor, EvalConfig, ConvParams, Module, Layer, Component,
  nn::{ self, Linear, Conv1d },
  optimize::{ Optimizer, Sgd, Momentum },
  Result,
};


struct TwoLayer {
  hidden: Linear<f64>,
  output: Linear<f64>,
}

impl TwoLayer {
  fn new(config: EvalConfig) -> Self {
    Self {
      hidden: Linear::with_config(4, 8, config),
      output: Linear::with_config(8, 1, config),
    }
  }
}

impl Module<f64> for TwoLayer {
  fn components(&self) -> Vec<(&'static str, Component<'_, f64>)> {
    vec![
      ("hidden", Component::module(&self.hidden)),
      ("output", Component::module(&self.output)),
    ]
  }
}

impl Layer<f64> for TwoLayer {
  fn forward(&self, input: &Tensor<f64>) -> Result<Tensor<f64>> {
    self.output.forward(&self.hidden.forward(input)?)
  }
}


fn l2_training(config: EvalConfig) -> Vec<f64> {
  let model = TwoLayer::new(config);
  let x = Tensor::with_config(NdArray::randn(&[16, 4]).mul_scalar(0.5), config);
  let y = Tensor::with_config(NdArray::randn(&[16, 1]), config);
  let mut optimizer = Optimizer::new(1e-4, Sgd);
  (0..5)
    .map(|_| {
      let loss = nn::l2_loss(&model.forward(&x).unwrap(), &y).unwrap();
      let total = loss.sum().unwrap();
      optimizer.minimize(&loss, &model.parameters()).unwrap();
      total
    })
    .collect()
}

#[test]
fn two_layer_l2_loss_decreases() {
  for config in [EvalConfig::lazy(), EvalConfig::eager()] {
    let losses = l2_training(config);
    for pair in losses.windows(2) {
      assert!(pair[1] <= pair[0] + 1e-9, "loss increased: {losses:?}");
    }
    assert!(losses[4] < losses[0]);
  }
}

#[test]
fn parameters_follow_registration_order() {
  let model = TwoLayer::new(EvalConfig::default());
  let names: Vec<_> = model.named_parameters().into_iter().map(|(name, _)| name ).collect();
  assert_eq!(names, vec!["hidden.weight", "hidden.bias", "output.weight", "output.bias"]);
  assert_eq!(model.parameters()[2].id(), model.output.weight.id());
  assert_eq!(model.num_parameters(), Ok(4 * 8 + 8 + 8 + 1));
}

#[test]
fn lazy_and_eager_graphs_agree() {
  let x = NdArray::<f64>::randn(&[3, 4]);
  let w = NdArray::<f64>::randn(&[4, 2]);
  let run = |config: EvalConfig| {
    let x = Tensor::with_config(x.clone(), config);
    let w = Tensor::with_config(w.clone(), config);
    let y = x.matmul(&w).unwrap().tanh().unwrap().softmax(-1).unwrap();
    assert_eq!(y.is_realized(), !config.lazy);
    y.backward(None).unwrap();
    (y.value().unwrap(), x.gradient().unwrap(), w.gradient().unwrap())
  };
  assert_eq!(run(EvalConfig::lazy()), run(EvalConfig::eager()));
}

#[test]
fn detached_values_stop_gradients() {
  let x = Tensor::new(NdArray::vec(&[1.0f64, 2.0]));
  let frozen = x.exp().unwrap().detach().unwrap();
  let y = x.mul(&frozen).unwrap();
  y.backward(None).unwrap();
  // Only the direct path contributes
  assert_eq!(x.gradient().unwrap(), frozen.value().unwrap());
}

#[test]
fn conv_classifier_learns() {
  let conv = Conv1d::<f64>::new(2, 4, 3, ConvParams::default());
  let head = Linear::<f64>::new(24, 3);
  let params: Vec<_> = conv.parameters().into_iter().chain(head.parameters()).collect();
  let x = Tensor::constant(NdArray::randn(&[8, 2]));
  let y = Tensor::constant(NdArray::vec(&[2.0]));
  let mut optimizer = Optimizer::new(1e-3, Momentum::default());
  let losses: Vec<f64> = (0..10)
    .map(|_| {
      let features = conv.forward(&x).unwrap().relu().unwrap().flatten().unwrap();
      let loss = nn::cross_entropy(&head.forward(&features).unwrap(), &y).unwrap();
      let value = loss.item().unwrap();
      optimizer.minimize(&loss, &params).unwrap();
      value
    })
    .collect();
  assert!(losses[9] < losses[0], "loss did not decrease: {losses:?}");
  assert!(params.iter().all(|p| p.gradient().is_none() ));
}

#[test]
fn no_grad_inference() {
  let model = TwoLayer::new(EvalConfig::lazy().no_grad());
  let x = Tensor::with_config(NdArray::ones(&[2, 4]), EvalConfig::lazy().no_grad());
  let y = model.forward(&x).unwrap();
  assert!(y.is_leaf());
  assert_eq!(y.shape(), Ok(vec![2, 1]));
}
