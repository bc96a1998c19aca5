//! Single-feature linear regression trained by gradient descent.
//!
//! The model maps a position `x` to a value `y` with `y = w * x + b`. Inputs
//! and targets are standardised before training so a fixed learning rate
//! works regardless of the price scale; predictions are mapped back to the
//! original scale.
use rand::Rng;
use rand::seq::SliceRandom;

pub const BATCH_SIZE: usize = 32;

/// Updates parameters in place from their gradients.
pub trait Optimizer: Send {
    fn step(&mut self, params: &mut [f64], grads: &[f64]);
}

/// Adam with the usual defaults for the moment decay rates.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        if self.m.len() != params.len() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
        }
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for (i, (param, grad)) in params.iter_mut().zip(grads).enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grad;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grad * grad;
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            *param -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

/// Mean and standard deviation used to standardise one variable.
#[derive(Debug, Clone, Copy)]
struct Scale {
    mean: f64,
    std: f64,
}

impl Scale {
    fn of(values: &[f64]) -> Self {
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        Self {
            mean,
            std: if std > f64::EPSILON { std } else { 1.0 },
        }
    }

    fn apply(&self, v: f64) -> f64 {
        (v - self.mean) / self.std
    }

    fn invert(&self, v: f64) -> f64 {
        v * self.std + self.mean
    }
}

pub struct LinearRegression<O: Optimizer> {
    weight: f64,
    bias: f64,
    optimizer: O,
    xs: Vec<f64>,
    ys: Vec<f64>,
    x_scale: Scale,
    y_scale: Scale,
    order: Vec<usize>,
}

impl<O: Optimizer> LinearRegression<O> {
    /// Prepares a model for `xs -> ys`. The weight starts at a random value
    /// (Glorot-uniform for a 1x1 kernel), the bias at zero.
    ///
    /// `xs` and `ys` must have the same length.
    pub fn new<R: Rng>(xs: &[f64], ys: &[f64], optimizer: O, rng: &mut R) -> Self {
        debug_assert_eq!(xs.len(), ys.len());
        let x_scale = Scale::of(xs);
        let y_scale = Scale::of(ys);
        let limit = 3f64.sqrt();

        Self {
            weight: rng.gen_range(-limit..limit),
            bias: 0.0,
            optimizer,
            xs: xs.iter().map(|&x| x_scale.apply(x)).collect(),
            ys: ys.iter().map(|&y| y_scale.apply(y)).collect(),
            x_scale,
            y_scale,
            order: (0..xs.len()).collect(),
        }
    }

    /// One pass over the training data in shuffled mini-batches, minimising
    /// mean squared error. Returns the mean loss seen during the pass.
    pub fn train_epoch<R: Rng>(&mut self, rng: &mut R) -> f64 {
        self.order.shuffle(rng);
        let mut total_loss = 0.0;

        for batch in self.order.chunks(BATCH_SIZE) {
            let n = batch.len() as f64;
            let (mut grad_w, mut grad_b) = (0.0, 0.0);
            for &i in batch {
                let err = self.weight * self.xs[i] + self.bias - self.ys[i];
                grad_w += 2.0 * err * self.xs[i];
                grad_b += 2.0 * err;
                total_loss += err * err;
            }

            let mut params = [self.weight, self.bias];
            self.optimizer.step(&mut params, &[grad_w / n, grad_b / n]);
            [self.weight, self.bias] = params;
        }

        total_loss / self.order.len().max(1) as f64
    }

    /// Evaluates the fitted line at each `x`, in the original units.
    pub fn predict(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter()
            .map(|&x| {
                let y = self.weight * self.x_scale.apply(x) + self.bias;
                self.y_scale.invert(y)
            })
            .collect()
    }
}
