mod error;
mod metrics;
mod model;
mod optim;
mod sample;
mod trace;
mod train;
mod utils;

pub use error::*;
pub use metrics::*;
pub use model::*;
pub use optim::*;
pub use sample::*;
pub use trace::*;
pub use train::*;
pub use utils::*;

use clap::ValueEnum;
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// A small trainable taken/not-taken classifier, updated one sample at a
/// time with immediate gradient feedback.
///
/// Call order per sample: `zero_grad`, `forward`, `loss`, `backward_step`.
/// `forward` caches whatever the following backward pass needs; recurrent
/// models also advance their carried hidden state. `decide` turns the raw
/// prediction scores into the discrete direction used for scoring.
pub trait PredictorModel {
    fn forward(&mut self, feature: ArrayView1<f64>) -> Array1<f64>;
    fn loss(&self, prediction: &Array1<f64>, label: Label) -> f64;
    fn decide(&self, prediction: &Array1<f64>) -> bool;
    fn zero_grad(&mut self);
    /// Backward pass for the most recent `forward`, then one optimizer step.
    fn backward_step(&mut self, prediction: &Array1<f64>, label: Label);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ModelKind {
    /// affine L->1, tanh squash, squared error against a signed label
    LinearBinary,
    /// affine L->2, log-softmax, cross-entropy against the 0/1 class
    LinearSoftmax,
    /// single-layer GRU with a 2-class log-softmax head
    Recurrent,
}

pub fn list_predictor_models() -> Vec<String> {
    ModelKind::value_variants()
        .iter()
        .filter_map(|kind| kind.to_possible_value())
        .map(|value| value.get_name().to_string())
        .collect()
}

pub fn new_predictor_model(
    kind: ModelKind,
    bhr_len: usize,
    hidden_size: usize,
    learning_rate: f64,
    rng: &mut StdRng,
) -> Box<dyn PredictorModel + Send> {
    match kind {
        ModelKind::LinearBinary => Box::new(LinearBinary::new(bhr_len, learning_rate, rng)),
        ModelKind::LinearSoftmax => Box::new(LinearSoftmax::new(bhr_len, learning_rate, rng)),
        ModelKind::Recurrent => Box::new(Recurrent::new(bhr_len, hidden_size, learning_rate, rng)),
    }
}
