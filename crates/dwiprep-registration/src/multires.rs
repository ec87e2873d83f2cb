use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use dwiprep_core::filter::DownsampleFilter;
use dwiprep_core::image::Image;
use dwiprep_core::transform::Transform;
use crate::error::Result;
use crate::metric::Metric;
use crate::optimizer::Optimizer;
use crate::registration::Registration;
use crate::validation::ConvergenceChecker;
use std::marker::PhantomData;

/// One pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub shrink_factor: usize,
    pub iterations: usize,
    pub learning_rate: f64,
}

/// Coarse-to-fine schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSchedule {
    pub levels: Vec<Level>,
}

impl RegistrationSchedule {
    /// Power-of-two shrinking, coarsest first, same iterations and rate per level.
    pub fn new(levels: usize, iterations: usize, learning_rate: f64) -> Self {
        let levels = (0..levels.max(1))
            .rev()
            .map(|exponent| Level {
                shrink_factor: 1 << exponent,
                iterations,
                learning_rate,
            })
            .collect();
        Self { levels }
    }
}

/// Multi-resolution registration framework.
///
/// Transform parameters live in physical space, so the estimate from one
/// level initialises the next without rescaling.
pub struct MultiResolutionRegistration<B, M, T> {
    metric: M,
    _phantom: PhantomData<(B, T)>,
}

impl<B, M, T> MultiResolutionRegistration<B, M, T>
where
    B: AutodiffBackend,
    M: Metric<B> + Clone,
    T: Transform<B, 3> + AutodiffModule<B>,
{
    pub fn new(metric: M) -> Self {
        Self {
            metric,
            _phantom: PhantomData,
        }
    }

    pub fn execute<F, O>(
        &self,
        fixed: &Image<B, 3>,
        moving: &Image<B, 3>,
        mut transform: T,
        optimizer_factory: F,
        schedule: &RegistrationSchedule,
    ) -> Result<T>
    where
        F: Fn(f64) -> O,
        O: Optimizer<T, B>,
    {
        let count = schedule.levels.len();
        for (i, level) in schedule.levels.iter().enumerate() {
            let filter = DownsampleFilter::new(level.shrink_factor);
            let fixed_level = filter.apply(fixed);
            let moving_level = filter.apply(moving);

            tracing::info!(
                "Starting level {}/{} (shrink {}, lr={}, iters={}), fixed {:?}, moving {:?}",
                i + 1,
                count,
                level.shrink_factor,
                level.learning_rate,
                level.iterations,
                fixed_level.shape(),
                moving_level.shape()
            );

            let optimizer = optimizer_factory(level.learning_rate);
            let mut registration = Registration::new(optimizer, self.metric.clone())
                .with_convergence(ConvergenceChecker::default());
            transform = registration.execute(
                &fixed_level,
                &moving_level,
                transform,
                level.iterations,
                level.learning_rate,
            )?;
        }
        Ok(transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_coarse_to_fine() {
        let schedule = RegistrationSchedule::new(3, 100, 0.05);
        let factors: Vec<usize> = schedule.levels.iter().map(|l| l.shrink_factor).collect();
        assert_eq!(factors, vec![4, 2, 1]);
        assert_eq!(RegistrationSchedule::new(0, 10, 0.1).levels.len(), 1);
    }
}
