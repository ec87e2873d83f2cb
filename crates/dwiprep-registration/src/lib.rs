//! Alignment, merge and quality control for multi-run diffusion data.
//!
//! The engines here carry each run's image series, direction table and
//! strength table through the same chain of transforms, so volume `k` of an
//! output always matches entry `k` of its tables.

pub mod error;
pub mod metric;
pub mod optimizer;
pub mod registration;
pub mod multires;
pub mod validation;
pub mod external;
pub mod backend;
pub mod gradients;
pub mod merge;
pub mod within;
pub mod template;
pub mod quality;

pub use error::{ErrorKind, RegistrationError, Result};
pub use validation::ConvergenceChecker;
pub use backend::{Aligner, Interpolation, RegistrationBackend, Resampler};
pub use merge::{DatasetPaths, DiffusionDataset};
pub use within::{register_within_subject, WithinResult, WithinRun};
pub use template::{register_to_template, TemplateInputs, TemplateOutputs, TemplateResult};
pub use quality::{Confidence, OverlapReport, QcStatus, QcThresholds};
