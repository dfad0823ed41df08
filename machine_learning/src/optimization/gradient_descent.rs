use super::Optimizer;

/// Stochastic gradient descent, optionally with momentum.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<f32>,
}

impl GradientDescent {
    /// Returns a new `GradientDescent` without momentum.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            velocity: Vec::new(),
        }
    }

    /// Sets the momentum factor, the fraction of the previous step carried into the next one.
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the velocity, with a length of `learning_rate`.
    ///
    /// The velocity starts as the first gradient and is then updated as
    /// `velocity = momentum * velocity + grad`.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) {
        let lr = self.learning_rate;

        if self.momentum == 0.0 {
            for (w, g) in params.iter_mut().zip(grad) {
                *w -= lr * g;
            }

            return;
        }

        if self.velocity.len() != grad.len() {
            self.velocity = grad.to_vec();
        } else {
            let m = self.momentum;
            self.velocity
                .iter_mut()
                .zip(grad)
                .for_each(|(v, g)| *v = m * *v + g);
        }

        for (w, v) in params.iter_mut().zip(&self.velocity) {
            *w -= lr * v;
        }
    }
}
