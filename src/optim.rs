use ndarray::{Array, Dimension, Ix1, Ix2, Zip};

/// A trainable tensor: value, gradient accumulator and Adam moments.
///
/// Keeping the moments next to the value means optimizer state can never be
/// shared across model instances.
#[derive(Debug, Clone)]
pub struct Param<D: Dimension> {
    pub value: Array<f64, D>,
    pub grad: Array<f64, D>,
    m: Array<f64, D>,
    v: Array<f64, D>,
}

pub type Param1 = Param<Ix1>;
pub type Param2 = Param<Ix2>;

impl<D: Dimension> Param<D> {
    pub fn new(value: Array<f64, D>) -> Self {
        let dim = value.raw_dim();
        Param {
            value,
            grad: Array::zeros(dim.clone()),
            m: Array::zeros(dim.clone()),
            v: Array::zeros(dim),
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// Adam with the usual defaults (beta1 = 0.9, beta2 = 0.999, eps = 1e-8).
///
/// `begin_step` advances the shared timestep once per training step; `update`
/// then applies the bias-corrected moment update to one parameter.
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: i32,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
        }
    }

    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    pub fn update<D: Dimension>(&self, param: &mut Param<D>) {
        debug_assert!(self.t > 0, "begin_step before update");
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        let Param { value, grad, m, v } = param;
        Zip::from(value)
            .and(&*grad)
            .and(m)
            .and(v)
            .for_each(|value, &grad, m, v| {
                *m = self.beta1 * *m + (1.0 - self.beta1) * grad;
                *v = self.beta2 * *v + (1.0 - self.beta2) * grad * grad;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *value -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn first_step_moves_by_roughly_lr() {
        let mut param = Param::new(array![1.0]);
        let mut adam = Adam::new(0.1);

        param.grad[0] = 4.0;
        adam.begin_step();
        adam.update(&mut param);

        // with bias correction the first step is lr * sign(grad)
        assert!((param.value[0] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn converges_on_a_quadratic() {
        // minimize (x - 3)^2
        let mut param = Param::new(array![0.0]);
        let mut adam = Adam::new(0.15);

        for _ in 0..500 {
            param.zero_grad();
            param.grad[0] = 2.0 * (param.value[0] - 3.0);
            adam.begin_step();
            adam.update(&mut param);
        }

        assert!((param.value[0] - 3.0).abs() < 0.05);
    }

    #[test]
    fn zero_grad_clears_accumulator() {
        let mut param = Param::new(array![[1.0, 2.0], [3.0, 4.0]]);
        param.grad.fill(7.0);
        param.zero_grad();
        assert!(param.grad.iter().all(|&g| g == 0.0));
    }
}
