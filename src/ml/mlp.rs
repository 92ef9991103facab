//! Multi-layer perceptron regressor on burn: ReLU hidden layers, linear output, squared loss
//! with an L2 penalty, trained with mini-batch Adam.

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::module::{AutodiffModule, Param};
use burn::nn::loss::{MseLoss, Reduction};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::{ElementConversion, TensorData};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::MlError;

/// Backend a fitted network runs inference on.
pub type Inference = NdArray<f32>;
type Training = Autodiff<Inference>;

/// Learning rates below this end training early.
const MIN_LEARNING_RATE: f64 = 1e-6;
const LEARNING_RATE_DECAY: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    pub hidden_layers: Vec<usize>,
    /// L2 penalty.
    pub alpha: f64,
    pub learning_rate_init: f64,
    pub beta_1: f64,
    pub beta_2: f64,
    pub epsilon: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Minimum loss improvement that resets the no-improvement counter.
    pub tol: f64,
    pub n_iter_no_change: usize,
    pub seed: u64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![256, 128],
            alpha: 1e-3,
            learning_rate_init: 1e-3,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
            batch_size: 32,
            max_epochs: 1000,
            tol: 1e-4,
            n_iter_no_change: 10,
            seed: 42,
        }
    }
}

/// Plain copy of one [`Linear`] layer: `x · weights + bias`, with `weights` shaped `[in, out]`.
///
/// This is the persisted form of a fitted network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseLayer {
    /// Glorot-uniform initialisation for weights and bias alike.
    fn glorot(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
        let weights = Array2::from_shape_simple_fn((fan_in, fan_out), || {
            rng.random_range(-bound..bound)
        });
        let bias = Array1::from_shape_simple_fn(fan_out, || rng.random_range(-bound..bound));
        Self { weights, bias }
    }

    fn from_linear<B: Backend>(linear: &Linear<B>) -> Self {
        let [rows, cols] = linear.weight.val().dims();
        let weights: Vec<f64> = linear.weight.val().into_data().iter::<f64>().collect();
        let bias: Vec<f64> = linear.bias.as_ref().map_or_else(
            || vec![0.0; cols],
            |bias| bias.val().into_data().iter::<f64>().collect(),
        );
        Self {
            weights: Array2::from_shape_fn((rows, cols), |(r, c)| weights[r * cols + c]),
            bias: Array1::from(bias),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn to_linear<B: Backend>(&self, device: &B::Device) -> Linear<B> {
        let (rows, cols) = self.weights.dim();
        let weights: Vec<f32> = self.weights.iter().map(|&w| w as f32).collect();
        let bias: Vec<f32> = self.bias.iter().map(|&b| b as f32).collect();

        let mut linear = LinearConfig::new(rows, cols).init(device);
        linear.weight = Param::from_tensor(Tensor::from_data(
            TensorData::new(weights, [rows, cols]),
            device,
        ));
        linear.bias = Some(Param::from_tensor(Tensor::from_data(
            TensorData::new(bias, [cols]),
            device,
        )));
        linear
    }
}

/// Hidden `Linear → ReLU` blocks followed by a single-unit `Linear` output.
#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Network<B> {
    /// Rebuilds a network from its layer copies, checking that consecutive layers connect.
    fn from_layers(layers: &[DenseLayer], device: &B::Device) -> Result<Self, MlError> {
        let Some((output, hidden)) = layers.split_last() else {
            return Err(MlError::MalformedLayers { layer: 0 });
        };
        let mut width = None;
        for (index, layer) in layers.iter().enumerate() {
            let (rows, cols) = layer.weights.dim();
            if rows == 0 || layer.bias.len() != cols || width.is_some_and(|w| w != rows) {
                return Err(MlError::MalformedLayers { layer: index });
            }
            width = Some(cols);
        }
        if width != Some(1) {
            return Err(MlError::MalformedLayers {
                layer: layers.len() - 1,
            });
        }

        Ok(Self {
            hidden: hidden.iter().map(|l| l.to_linear(device)).collect(),
            output: output.to_linear(device),
            activation: Relu::new(),
        })
    }

    /// `[batch, features]` in, `[batch, 1]` out.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = input;
        for linear in &self.hidden {
            x = self.activation.forward(linear.forward(x));
        }
        self.output.forward(x)
    }

    /// Hidden layers in order, then the output layer.
    pub fn linears(&self) -> impl Iterator<Item = &Linear<B>> {
        self.hidden.iter().chain(std::iter::once(&self.output))
    }

    /// Sum of squared weights; biases are not penalised.
    fn weight_penalty(&self) -> Tensor<B, 1> {
        let device = self.output.weight.val().device();
        self.linears()
            .fold(Tensor::zeros([1], &device), |total, linear| {
                let weight = linear.weight.val();
                total + (weight.clone() * weight).sum()
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "FittedWeights", try_from = "FittedWeights")]
pub struct MlpRegressor {
    network: Network<Inference>,
    epochs: usize,
    loss_curve: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct FittedWeights {
    layers: Vec<DenseLayer>,
    epochs: usize,
    loss_curve: Vec<f64>,
}

impl From<MlpRegressor> for FittedWeights {
    fn from(model: MlpRegressor) -> Self {
        Self {
            layers: model.layers(),
            epochs: model.epochs,
            loss_curve: model.loss_curve,
        }
    }
}

impl TryFrom<FittedWeights> for MlpRegressor {
    type Error = MlError;

    fn try_from(fitted: FittedWeights) -> Result<Self, Self::Error> {
        Ok(Self {
            network: Network::from_layers(&fitted.layers, &NdArrayDevice::default())?,
            epochs: fitted.epochs,
            loss_curve: fitted.loss_curve,
        })
    }
}

impl PartialEq for MlpRegressor {
    fn eq(&self, other: &Self) -> bool {
        self.epochs == other.epochs
            && self.loss_curve == other.loss_curve
            && self.layers() == other.layers()
    }
}

/// Counts epochs whose loss fails to beat the best seen by at least `tol`.
struct Plateau {
    best_loss: f64,
    no_improvement: usize,
}

impl Plateau {
    fn observe(&mut self, loss: f64, tol: f64) {
        if loss > self.best_loss - tol {
            self.no_improvement += 1;
        } else {
            self.no_improvement = 0;
        }
        if loss < self.best_loss {
            self.best_loss = loss;
        }
    }
}

impl MlpRegressor {
    /// Fits a fresh network on `x` (`[samples, features]`) against `y`.
    ///
    /// Each step minimises half the batch MSE plus `alpha / 2n` times the squared weights.
    ///
    /// # Errors
    /// Empty input, mismatched sample counts, or a non-finite loss.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        config: &MlpConfig,
    ) -> Result<Self, MlError> {
        let samples = x.nrows();
        if samples == 0 || x.ncols() == 0 {
            return Err(MlError::Empty);
        }
        if y.len() != samples {
            return Err(MlError::TargetMismatch {
                samples,
                targets: y.len(),
            });
        }

        let device = NdArrayDevice::default();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut widths = Vec::with_capacity(config.hidden_layers.len() + 2);
        widths.push(x.ncols());
        widths.extend(&config.hidden_layers);
        widths.push(1);
        let initial: Vec<DenseLayer> = widths
            .windows(2)
            .map(|pair| DenseLayer::glorot(pair[0], pair[1], &mut rng))
            .collect();
        let mut network: Network<Training> = Network::from_layers(&initial, &device)?;

        let mut optimizer = AdamConfig::new()
            .with_beta_1(config.beta_1 as f32)
            .with_beta_2(config.beta_2 as f32)
            .with_epsilon(config.epsilon as f32)
            .init();
        let loss_fn = MseLoss::new();

        let batch_size = config.batch_size.clamp(1, samples);
        let targets = y.to_owned().insert_axis(Axis(1));
        let mut learning_rate = config.learning_rate_init;
        let mut plateau = Plateau {
            best_loss: f64::INFINITY,
            no_improvement: 0,
        };
        let mut indices: Vec<usize> = (0..samples).collect();
        let mut loss_curve = Vec::new();

        for epoch in 1..=config.max_epochs {
            indices.shuffle(&mut rng);
            let mut accumulated = 0.0;

            for batch in indices.chunks(batch_size) {
                let n = batch.len() as f64;
                let xb = matrix::<Training>(x.select(Axis(0), batch).view(), &device);
                let yb = matrix::<Training>(targets.select(Axis(0), batch).view(), &device);

                let predictions = network.forward(xb);
                let loss = loss_fn
                    .forward(predictions, yb, Reduction::Mean)
                    .mul_scalar(0.5)
                    + network
                        .weight_penalty()
                        .mul_scalar(0.5 * config.alpha / n);
                let batch_loss: f64 = loss.clone().into_scalar().elem();

                let grads = GradientsParams::from_grads(loss.backward(), &network);
                network = optimizer.step(learning_rate, network, grads);
                accumulated += batch_loss * n;
            }

            let epoch_loss = accumulated / samples as f64;
            if !epoch_loss.is_finite() {
                return Err(MlError::Diverged { epoch });
            }
            loss_curve.push(epoch_loss);
            debug!(epoch, loss = epoch_loss, "mlp epoch finished");

            plateau.observe(epoch_loss, config.tol);
            if plateau.no_improvement > config.n_iter_no_change {
                learning_rate /= LEARNING_RATE_DECAY;
                plateau.no_improvement = 0;
                debug!(epoch, learning_rate, "loss plateaued; lowering learning rate");
                if learning_rate < MIN_LEARNING_RATE {
                    break;
                }
            }
        }

        Ok(Self {
            network: network.valid(),
            epochs: loss_curve.len(),
            loss_curve,
        })
    }

    /// # Errors
    /// [`MlError::FeatureMismatch`] when `x` is not as wide as the training data.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, MlError> {
        if x.ncols() != self.n_features() {
            return Err(MlError::FeatureMismatch {
                expected: self.n_features(),
                actual: x.ncols(),
            });
        }
        if x.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }
        let output = self
            .network
            .forward(matrix::<Inference>(x, &NdArrayDevice::default()));
        Ok(output.into_data().iter::<f64>().collect())
    }

    #[must_use]
    pub fn network(&self) -> &Network<Inference> {
        &self.network
    }

    /// Copies the fitted weights out of the network, input layer first.
    #[must_use]
    pub fn layers(&self) -> Vec<DenseLayer> {
        self.network.linears().map(DenseLayer::from_linear).collect()
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.network
            .linears()
            .next()
            .map_or(0, |linear| linear.weight.val().dims()[0])
    }

    #[must_use]
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    #[must_use]
    pub fn loss_curve(&self) -> &[f64] {
        &self.loss_curve
    }
}

#[allow(clippy::cast_possible_truncation)]
fn matrix<B: Backend>(values: ArrayView2<'_, f64>, device: &B::Device) -> Tensor<B, 2> {
    let (rows, cols) = values.dim();
    let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(data, [rows, cols]), device)
}
