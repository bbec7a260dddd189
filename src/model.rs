use crate::{Adam, Label, Param1, Param2, PredictorModel};
use ndarray::{Array, Array1, Array2, ArrayView1, Axis};
use rand::{Rng, rngs::StdRng};

fn uniform_init2(rng: &mut StdRng, rows: usize, cols: usize, bound: f64) -> Array2<f64> {
    Array::from_shape_fn((rows, cols), |_| rng.gen_range(-bound..bound))
}

fn uniform_init1(rng: &mut StdRng, len: usize, bound: f64) -> Array1<f64> {
    Array::from_shape_fn(len, |_| rng.gen_range(-bound..bound))
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let a = a.view().insert_axis(Axis(1));
    let b = b.view().insert_axis(Axis(0));
    a.dot(&b)
}

fn log_softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let log_sum = logits.mapv(|v| (v - max).exp()).sum().ln();
    logits.mapv(|v| v - max - log_sum)
}

fn class_target(label: Label) -> usize {
    label.taken() as usize
}

fn signed_target(label: Label) -> f64 {
    if label.taken() { 1.0 } else { -1.0 }
}

/// Softmax gradient at the logits for a 2-class log-probability prediction.
fn two_class_dlogits(log_probs: &Array1<f64>, label: Label) -> Array1<f64> {
    let mut dlogits = log_probs.mapv(f64::exp);
    dlogits[class_target(label)] -= 1.0;
    dlogits
}

/// One affine unit squashed by tanh, trained with squared error against a
/// signed (-1/+1) target. Decision is the sign of the output.
pub struct LinearBinary {
    w: Param1,
    b: Param1,
    opt: Adam,
    input: Array1<f64>,
}

impl LinearBinary {
    pub fn new(bhr_len: usize, learning_rate: f64, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (bhr_len as f64).sqrt();
        LinearBinary {
            w: Param1::new(uniform_init1(rng, bhr_len, bound)),
            b: Param1::new(uniform_init1(rng, 1, bound)),
            opt: Adam::new(learning_rate),
            input: Array1::zeros(bhr_len),
        }
    }
}

impl PredictorModel for LinearBinary {
    fn forward(&mut self, feature: ArrayView1<f64>) -> Array1<f64> {
        self.input = feature.to_owned();
        let z = self.w.value.dot(&feature) + self.b.value[0];
        ndarray::array![z.tanh()]
    }

    fn loss(&self, prediction: &Array1<f64>, label: Label) -> f64 {
        let diff = prediction[0] - signed_target(label);
        diff * diff
    }

    fn decide(&self, prediction: &Array1<f64>) -> bool {
        prediction[0] > 0.0
    }

    fn zero_grad(&mut self) {
        self.w.zero_grad();
        self.b.zero_grad();
    }

    fn backward_step(&mut self, prediction: &Array1<f64>, label: Label) {
        let y = prediction[0];
        // d(y - t)^2 / dz through tanh
        let dz = 2.0 * (y - signed_target(label)) * (1.0 - y * y);
        self.w.grad.scaled_add(dz, &self.input);
        self.b.grad[0] += dz;

        self.opt.begin_step();
        self.opt.update(&mut self.w);
        self.opt.update(&mut self.b);
    }
}

/// One affine layer to two classes with a log-softmax output, trained with
/// sum-reduced cross-entropy against the 0/1 class. Decision is the argmax.
pub struct LinearSoftmax {
    w: Param2,
    b: Param1,
    opt: Adam,
    input: Array1<f64>,
}

impl LinearSoftmax {
    pub fn new(bhr_len: usize, learning_rate: f64, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (bhr_len as f64).sqrt();
        LinearSoftmax {
            w: Param2::new(uniform_init2(rng, 2, bhr_len, bound)),
            b: Param1::new(uniform_init1(rng, 2, bound)),
            opt: Adam::new(learning_rate),
            input: Array1::zeros(bhr_len),
        }
    }
}

impl PredictorModel for LinearSoftmax {
    fn forward(&mut self, feature: ArrayView1<f64>) -> Array1<f64> {
        self.input = feature.to_owned();
        let logits = self.w.value.dot(&feature) + &self.b.value;
        log_softmax(&logits)
    }

    fn loss(&self, prediction: &Array1<f64>, label: Label) -> f64 {
        -prediction[class_target(label)]
    }

    fn decide(&self, prediction: &Array1<f64>) -> bool {
        prediction[1] > prediction[0]
    }

    fn zero_grad(&mut self) {
        self.w.zero_grad();
        self.b.zero_grad();
    }

    fn backward_step(&mut self, prediction: &Array1<f64>, label: Label) {
        let dlogits = two_class_dlogits(prediction, label);
        self.w.grad += &outer(&dlogits, &self.input);
        self.b.grad += &dlogits;

        self.opt.begin_step();
        self.opt.update(&mut self.w);
        self.opt.update(&mut self.b);
    }
}

/// Activations cached by the GRU forward pass for the following backward.
struct GruStep {
    input: Array1<f64>,
    h_prev: Array1<f64>,
    r: Array1<f64>,
    z: Array1<f64>,
    n: Array1<f64>,
    /// `w_hn . h_prev + b_hn`, needed for the reset-gate gradient
    hn_lin: Array1<f64>,
    h_new: Array1<f64>,
}

/// Single-layer GRU (input `bhr_len`, hidden `hidden_size`) feeding an affine
/// two-class head with a log-softmax output and sum-reduced cross-entropy.
///
/// The hidden state carried between calls is a plain value copy, so each
/// backward pass stops at the previous step's output. That is the
/// detach-between-steps of the original harness and keeps memory bounded.
pub struct Recurrent {
    w_ir: Param2,
    w_iz: Param2,
    w_in: Param2,
    w_hr: Param2,
    w_hz: Param2,
    w_hn: Param2,
    b_ir: Param1,
    b_iz: Param1,
    b_in: Param1,
    b_hr: Param1,
    b_hz: Param1,
    b_hn: Param1,
    fc_w: Param2,
    fc_b: Param1,
    opt: Adam,
    hidden: Array1<f64>,
    step: Option<GruStep>,
}

impl Recurrent {
    pub fn new(bhr_len: usize, hidden_size: usize, learning_rate: f64, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (hidden_size as f64).sqrt();
        Recurrent {
            w_ir: Param2::new(uniform_init2(rng, hidden_size, bhr_len, bound)),
            w_iz: Param2::new(uniform_init2(rng, hidden_size, bhr_len, bound)),
            w_in: Param2::new(uniform_init2(rng, hidden_size, bhr_len, bound)),
            w_hr: Param2::new(uniform_init2(rng, hidden_size, hidden_size, bound)),
            w_hz: Param2::new(uniform_init2(rng, hidden_size, hidden_size, bound)),
            w_hn: Param2::new(uniform_init2(rng, hidden_size, hidden_size, bound)),
            b_ir: Param1::new(uniform_init1(rng, hidden_size, bound)),
            b_iz: Param1::new(uniform_init1(rng, hidden_size, bound)),
            b_in: Param1::new(uniform_init1(rng, hidden_size, bound)),
            b_hr: Param1::new(uniform_init1(rng, hidden_size, bound)),
            b_hz: Param1::new(uniform_init1(rng, hidden_size, bound)),
            b_hn: Param1::new(uniform_init1(rng, hidden_size, bound)),
            fc_w: Param2::new(uniform_init2(rng, 2, hidden_size, bound)),
            fc_b: Param1::new(uniform_init1(rng, 2, bound)),
            opt: Adam::new(learning_rate),
            hidden: Array1::zeros(hidden_size),
            step: None,
        }
    }

    /// Carried hidden state, value only.
    pub fn hidden(&self) -> &Array1<f64> {
        &self.hidden
    }
}

impl PredictorModel for Recurrent {
    fn forward(&mut self, feature: ArrayView1<f64>) -> Array1<f64> {
        let input = feature.to_owned();
        let h_prev = self.hidden.clone();

        let r = (self.w_ir.value.dot(&input)
            + &self.b_ir.value
            + self.w_hr.value.dot(&h_prev)
            + &self.b_hr.value)
            .mapv(|v| 1.0 / (1.0 + (-v).exp()));
        let z = (self.w_iz.value.dot(&input)
            + &self.b_iz.value
            + self.w_hz.value.dot(&h_prev)
            + &self.b_hz.value)
            .mapv(|v| 1.0 / (1.0 + (-v).exp()));
        let hn_lin = self.w_hn.value.dot(&h_prev) + &self.b_hn.value;
        let n = (self.w_in.value.dot(&input) + &self.b_in.value + &r * &hn_lin).mapv(f64::tanh);
        let h_new = (1.0 - &z) * &n + &z * &h_prev;

        let logits = self.fc_w.value.dot(&h_new) + &self.fc_b.value;
        let log_probs = log_softmax(&logits);

        // carry the value forward, the gradient stops here
        self.hidden = h_new.clone();
        self.step = Some(GruStep {
            input,
            h_prev,
            r,
            z,
            n,
            hn_lin,
            h_new,
        });

        log_probs
    }

    fn loss(&self, prediction: &Array1<f64>, label: Label) -> f64 {
        -prediction[class_target(label)]
    }

    fn decide(&self, prediction: &Array1<f64>) -> bool {
        prediction[1] > prediction[0]
    }

    fn zero_grad(&mut self) {
        self.w_ir.zero_grad();
        self.w_iz.zero_grad();
        self.w_in.zero_grad();
        self.w_hr.zero_grad();
        self.w_hz.zero_grad();
        self.w_hn.zero_grad();
        self.b_ir.zero_grad();
        self.b_iz.zero_grad();
        self.b_in.zero_grad();
        self.b_hr.zero_grad();
        self.b_hz.zero_grad();
        self.b_hn.zero_grad();
        self.fc_w.zero_grad();
        self.fc_b.zero_grad();
    }

    fn backward_step(&mut self, prediction: &Array1<f64>, label: Label) {
        let step = match self.step.take() {
            Some(step) => step,
            // backward without a preceding forward is a no-op
            None => return,
        };

        let dlogits = two_class_dlogits(prediction, label);
        self.fc_w.grad += &outer(&dlogits, &step.h_new);
        self.fc_b.grad += &dlogits;
        let dh = self.fc_w.value.t().dot(&dlogits);

        // h' = (1 - z) * n + z * h_prev
        let dn = &dh * &(1.0 - &step.z);
        let dz = &dh * &(&step.h_prev - &step.n);

        // n = tanh(w_in x + b_in + r * (w_hn h + b_hn))
        let da_n = &dn * &step.n.mapv(|n| 1.0 - n * n);
        self.w_in.grad += &outer(&da_n, &step.input);
        self.b_in.grad += &da_n;
        let dhn = &da_n * &step.r;
        self.w_hn.grad += &outer(&dhn, &step.h_prev);
        self.b_hn.grad += &dhn;
        let dr = &da_n * &step.hn_lin;

        let da_r = &dr * &step.r.mapv(|r| r * (1.0 - r));
        self.w_ir.grad += &outer(&da_r, &step.input);
        self.b_ir.grad += &da_r;
        self.w_hr.grad += &outer(&da_r, &step.h_prev);
        self.b_hr.grad += &da_r;

        let da_z = &dz * &step.z.mapv(|z| z * (1.0 - z));
        self.w_iz.grad += &outer(&da_z, &step.input);
        self.b_iz.grad += &da_z;
        self.w_hz.grad += &outer(&da_z, &step.h_prev);
        self.b_hz.grad += &da_z;

        self.opt.begin_step();
        self.opt.update(&mut self.w_ir);
        self.opt.update(&mut self.w_iz);
        self.opt.update(&mut self.w_in);
        self.opt.update(&mut self.w_hr);
        self.opt.update(&mut self.w_hz);
        self.opt.update(&mut self.w_hn);
        self.opt.update(&mut self.b_ir);
        self.opt.update(&mut self.b_iz);
        self.opt.update(&mut self.b_in);
        self.opt.update(&mut self.b_hr);
        self.opt.update(&mut self.b_hz);
        self.opt.update(&mut self.b_hn);
        self.opt.update(&mut self.fc_w);
        self.opt.update(&mut self.fc_b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn train_once(model: &mut dyn PredictorModel, feature: &Array1<f64>, label: Label) -> f64 {
        model.zero_grad();
        let prediction = model.forward(feature.view());
        let loss = model.loss(&prediction, label);
        model.backward_step(&prediction, label);
        loss
    }

    #[test]
    fn linear_binary_fits_a_constant_branch() {
        let mut model = LinearBinary::new(4, 0.05, &mut rng());
        let feature = array![1.0, 0.0, 1.0, 1.0];
        let label = Label::Signed(1.0);

        let first_loss = train_once(&mut model, &feature, label);
        for _ in 0..200 {
            train_once(&mut model, &feature, label);
        }
        let prediction = model.forward(feature.view());
        assert!(model.decide(&prediction));
        assert!(model.loss(&prediction, label) < first_loss);
        assert!(model.loss(&prediction, label) < 0.1);
    }

    #[test]
    fn linear_binary_decision_is_sign() {
        let model = LinearBinary::new(2, 0.1, &mut rng());
        assert!(model.decide(&array![0.3]));
        assert!(!model.decide(&array![-0.3]));
    }

    #[test]
    fn linear_softmax_fits_both_classes() {
        let mut model = LinearSoftmax::new(4, 0.05, &mut rng());
        let taken = array![1.0, 1.0, 0.0, 0.0];
        let not_taken = array![0.0, 0.0, 1.0, 1.0];

        for _ in 0..300 {
            train_once(&mut model, &taken, Label::Class(1));
            train_once(&mut model, &not_taken, Label::Class(0));
        }

        let prediction = model.forward(taken.view());
        assert!(model.decide(&prediction));
        let prediction = model.forward(not_taken.view());
        assert!(!model.decide(&prediction));
    }

    #[test]
    fn log_softmax_output_is_normalized() {
        let mut model = LinearSoftmax::new(3, 0.1, &mut rng());
        let prediction = model.forward(array![1.0, 0.0, 1.0].view());
        let total: f64 = prediction.mapv(f64::exp).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // cross-entropy of a 2-class log-softmax is always positive
        assert!(model.loss(&prediction, Label::Class(1)) > 0.0);
    }

    #[test]
    fn recurrent_fits_a_constant_branch() {
        let mut model = Recurrent::new(4, 2, 0.05, &mut rng());
        let feature = array![1.0, 0.0, 1.0, 0.0];
        let label = Label::Class(1);

        let mut last_loss = f64::INFINITY;
        for _ in 0..300 {
            last_loss = train_once(&mut model, &feature, label);
        }
        assert!(last_loss < 0.2);
        let prediction = model.forward(feature.view());
        assert!(model.decide(&prediction));
    }

    #[test]
    fn recurrent_carries_hidden_state_by_value() {
        let mut model = Recurrent::new(3, 2, 0.1, &mut rng());
        assert!(model.hidden().iter().all(|&h| h == 0.0));

        let feature = array![1.0, 0.0, 1.0];
        let _ = model.forward(feature.view());
        let after_first = model.hidden().clone();
        assert!(after_first.iter().any(|&h| h != 0.0));

        // same input, different carried state: the state advanced
        let _ = model.forward(feature.view());
        assert_ne!(&after_first, model.hidden());
        assert!(model.hidden().iter().all(|&h| h.is_finite()));
    }

    #[test]
    fn gru_gradients_match_finite_differences() {
        // check one input-weight gradient against a numeric derivative
        let mut model = Recurrent::new(2, 3, 0.1, &mut rng());
        let feature = array![1.0, 0.0];
        let label = Label::Class(1);

        let eps = 1e-6;
        let base = model.w_in.value[[0, 0]];

        model.w_in.value[[0, 0]] = base + eps;
        let up = {
            let hidden = model.hidden.clone();
            let prediction = model.forward(feature.view());
            model.hidden = hidden;
            model.loss(&prediction, label)
        };
        model.w_in.value[[0, 0]] = base - eps;
        let down = {
            let hidden = model.hidden.clone();
            let prediction = model.forward(feature.view());
            model.hidden = hidden;
            model.loss(&prediction, label)
        };
        model.w_in.value[[0, 0]] = base;

        let numeric = (up - down) / (2.0 * eps);

        model.zero_grad();
        let prediction = model.forward(feature.view());
        // compute gradients without stepping the optimizer: use a zero-lr copy
        model.opt = Adam::new(0.0);
        model.backward_step(&prediction, label);
        let analytic = model.w_in.grad[[0, 0]];

        assert!(
            (numeric - analytic).abs() < 1e-5,
            "numeric {} vs analytic {}",
            numeric,
            analytic
        );
    }
}
