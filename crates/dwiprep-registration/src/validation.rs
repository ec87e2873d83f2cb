//! Input and numerical checks for the native optimisation loop.

use crate::error::{RegistrationError, Result};

/// Reject learning rates the optimiser cannot make progress with.
pub fn validate_learning_rate(lr: f64) -> Result<()> {
    if !lr.is_finite() || lr <= 0.0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "Learning rate must be positive, got {}",
            lr
        )));
    }
    if lr > 10.0 {
        return Err(RegistrationError::invalid_configuration(format!("Learning rate too large: {}", lr)));
    }
    if lr < 1e-10 {
        return Err(RegistrationError::invalid_configuration(format!("Learning rate too small: {}", lr)));
    }
    Ok(())
}

pub fn validate_iterations(iterations: usize) -> Result<()> {
    if iterations == 0 {
        return Err(RegistrationError::invalid_configuration("Iterations must be positive"));
    }
    if iterations > 1_000_000 {
        return Err(RegistrationError::invalid_configuration(format!("Iterations too large: {}", iterations)));
    }
    Ok(())
}

/// A NaN or infinite loss means the estimate has diverged.
pub fn check_finite_loss(loss: f64, iteration: usize) -> Result<()> {
    if loss.is_finite() {
        Ok(())
    } else {
        Err(RegistrationError::numerical_instability(format!(
            "loss became {} at iteration {}",
            loss, iteration
        )))
    }
}

/// Check for convergence based on loss history.
#[derive(Debug, Clone)]
pub struct ConvergenceChecker {
    /// Minimum relative improvement over the window to keep going.
    pub min_improvement: f64,
    /// Number of iterations in the window.
    pub patience: usize,
}

impl Default for ConvergenceChecker {
    fn default() -> Self {
        Self {
            min_improvement: 1e-6,
            patience: 50,
        }
    }
}

impl ConvergenceChecker {
    pub fn new(min_improvement: f64, patience: usize) -> Self {
        Self {
            min_improvement,
            patience,
        }
    }

    /// True once the last `patience` iterations improved less than `min_improvement`.
    pub fn check_convergence(&self, loss_history: &[f64]) -> bool {
        if loss_history.len() < self.patience + 1 {
            return false;
        }
        let window = &loss_history[loss_history.len() - self.patience - 1..];
        let (first, last) = match (window.first(), window.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => return false,
        };
        let relative_improvement = (first - last) / (first.abs() + 1e-10);
        relative_improvement < self.min_improvement
    }
}
