//! Error types for alignment, merge and QC operations.
//!
//! Every error reports an [`ErrorKind`] so batch drivers can tell missing
//! inputs from failed registrations and tool failures without matching on
//! message text.

use dwiprep_core::image::SeriesError;
use dwiprep_core::transform::TransformError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// An expected input file is absent.
    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),

    /// Estimation did not produce a usable transform for this run.
    #[error("Registration failed for {run}: {reason}")]
    RegistrationFailed { run: String, reason: String },

    /// A stored or estimated matrix cannot be used.
    #[error("Degenerate transform: {0}")]
    DegenerateTransform(#[from] TransformError),

    /// Image, direction and strength counts disagree.
    #[error("Index mismatch: {images} volumes, {directions} directions, {strengths} strengths")]
    IndexMismatch {
        images: usize,
        directions: usize,
        strengths: usize,
    },

    /// Volumes could not be assembled into a series.
    #[error("Invalid image series: {0}")]
    InvalidSeries(#[from] SeriesError),

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} did not finish within {seconds} s")]
    ExternalToolTimeout { tool: String, seconds: u64 },

    #[error("{tool} reported success but {} is missing", .path.display())]
    MissingOutput { tool: String, path: PathBuf },

    /// No volume falls below the b0 threshold.
    #[error("No reference volumes below b={threshold} in {}", .table.display())]
    NoReferenceVolumes { table: PathBuf, threshold: f64 },

    #[error("Template unavailable: {}", .0.display())]
    TemplateUnavailable(PathBuf),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// File-level failure from the I/O layer.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

/// Coarse error class, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MissingInput,
    RegistrationFailed,
    IndexMismatch,
    ExternalTool,
    Configuration,
    Numerical,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MissingInput => "missing-input",
            ErrorKind::RegistrationFailed => "registration-failed",
            ErrorKind::IndexMismatch => "index-mismatch",
            ErrorKind::ExternalTool => "external-tool",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Numerical => "numerical",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<std::io::Error> for RegistrationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.into())
    }
}

impl RegistrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingInput(_) | Self::TemplateUnavailable(_) | Self::NoReferenceVolumes { .. } => {
                ErrorKind::MissingInput
            }
            Self::RegistrationFailed { .. } | Self::DegenerateTransform(_) => ErrorKind::RegistrationFailed,
            Self::IndexMismatch { .. } | Self::InvalidSeries(_) | Self::ShapeMismatch { .. } => {
                ErrorKind::IndexMismatch
            }
            Self::ExternalToolFailed { .. } | Self::ExternalToolTimeout { .. } | Self::MissingOutput { .. } => {
                ErrorKind::ExternalTool
            }
            Self::NumericalInstability(_) => ErrorKind::Numerical,
            Self::InvalidConfiguration(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Create a registration failure for `run`.
    pub fn registration_failed(run: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::RegistrationFailed {
            run: run.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a numerical instability error.
    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Attribute an estimation failure to `run`.
    ///
    /// Divergence and degenerate matrices become `RegistrationFailed`; tool
    /// and input errors keep their own kind.
    pub fn in_run(self, run: &str) -> Self {
        match self {
            Self::RegistrationFailed { reason, .. } => Self::registration_failed(run, reason),
            err @ (Self::NumericalInstability(_) | Self::DegenerateTransform(_)) => {
                Self::registration_failed(run, err)
            }
            other => other,
        }
    }

    /// Check that `path` exists, reporting it as a missing input otherwise.
    pub fn require(path: impl Into<PathBuf>) -> Result<PathBuf> {
        let path = path.into();
        if path.exists() {
            Ok(path)
        } else {
            Err(Self::MissingInput(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistrationError::registration_failed("run 1", "loss is NaN");
        assert_eq!(err.to_string(), "Registration failed for run 1: loss is NaN");
        assert_eq!(err.kind(), ErrorKind::RegistrationFailed);
    }

    #[test]
    fn test_kinds_are_distinct_for_batch_reporting() {
        let missing = RegistrationError::MissingInput(PathBuf::from("/nope.nii.gz"));
        let mismatch = RegistrationError::IndexMismatch { images: 5, directions: 4, strengths: 5 };
        let tool = RegistrationError::ExternalToolTimeout { tool: "eddy".into(), seconds: 3 };

        assert_eq!(missing.kind().as_str(), "missing-input");
        assert_eq!(mismatch.kind().as_str(), "index-mismatch");
        assert_eq!(tool.kind().as_str(), "external-tool");
        assert!(mismatch.to_string().contains("4 directions"));
    }

    #[test]
    fn test_io_wraps_anyhow_context() {
        let err: RegistrationError = anyhow::anyhow!("disk full").context("Failed to write x").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "Failed to write x");
    }

    #[test]
    fn test_require() {
        assert!(RegistrationError::require("/definitely/not/here").is_err());
        assert!(RegistrationError::require(std::env::temp_dir()).is_ok());
    }

    #[test]
    fn test_shape_mismatch() {
        let err = RegistrationError::ShapeMismatch {
            expected: vec![10, 10],
            actual: vec![5, 5],
        };
        let err_str = err.to_string();
        assert!(err_str.contains("expected"));
        assert!(err_str.contains("got"));
    }
}
