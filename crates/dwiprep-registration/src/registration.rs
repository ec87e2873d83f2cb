use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use dwiprep_core::image::Image;
use dwiprep_core::transform::Transform;
use crate::error::Result;
use crate::metric::Metric;
use crate::optimizer::Optimizer;
use crate::validation::{check_finite_loss, validate_iterations, validate_learning_rate, ConvergenceChecker};
use std::marker::PhantomData;

/// Iterations between loss log lines.
const LOG_EVERY: usize = 50;

/// Gradient-descent registration of a trainable transform.
pub struct Registration<B, O, M, T>
where
    B: AutodiffBackend,
    O: Optimizer<T, B>,
    M: Metric<B>,
    T: Transform<B, 3> + AutodiffModule<B>,
{
    optimizer: O,
    metric: M,
    convergence: Option<ConvergenceChecker>,
    _phantom: PhantomData<(B, T)>,
}

impl<B, O, M, T> Registration<B, O, M, T>
where
    B: AutodiffBackend,
    O: Optimizer<T, B>,
    M: Metric<B>,
    T: Transform<B, 3> + AutodiffModule<B>,
{
    pub fn new(optimizer: O, metric: M) -> Self {
        Self {
            optimizer,
            metric,
            convergence: None,
            _phantom: PhantomData,
        }
    }

    /// Stop early once the loss plateaus.
    pub fn with_convergence(mut self, checker: ConvergenceChecker) -> Self {
        self.convergence = Some(checker);
        self
    }

    /// Run up to `iterations` steps and return the optimised transform.
    ///
    /// Fails on a non-finite loss rather than returning a diverged estimate.
    pub fn execute(
        &mut self,
        fixed: &Image<B, 3>,
        moving: &Image<B, 3>,
        mut transform: T,
        iterations: usize,
        learning_rate: f64,
    ) -> Result<T> {
        validate_iterations(iterations)?;
        validate_learning_rate(learning_rate)?;
        self.optimizer.set_learning_rate(learning_rate);

        let mut history = Vec::with_capacity(iterations);
        for i in 0..iterations {
            let loss = self.metric.forward(fixed, moving, &transform);
            let value = loss.clone().into_scalar().elem::<f64>();
            check_finite_loss(value, i)?;

            if i % LOG_EVERY == 0 {
                tracing::info!("Iteration {}: {} {:.6}", i, self.metric.name(), value);
            }
            history.push(value);
            if let Some(checker) = &self.convergence {
                if checker.check_convergence(&history) {
                    tracing::debug!("Converged after {} steps", self.optimizer.steps());
                    break;
                }
            }

            let grads = loss.backward();
            let grads_params = GradientsParams::from_grads(grads, &transform);
            transform = self.optimizer.step(transform, grads_params);
        }
        Ok(transform)
    }
}
