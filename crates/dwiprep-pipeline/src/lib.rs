//! Stage drivers, configuration and batch orchestration for the diffusion
//! preprocessing pipeline.
//!
//! Each stage reads the previous stage's artifacts from the filesystem, so
//! any stage can be rerun on its own once its inputs exist.

pub mod config;
pub mod discovery;
pub mod stages;
pub mod report;
pub mod cli;

pub use config::PipelineConfig;
pub use discovery::{RunFiles, RunPair, RunRecord, Session, SessionDirs};
pub use report::{format_duration, BatchSummary, SubjectResult};
pub use stages::{run_stage, run_subject, OutcomeStatus, Stage, StageContext, StageOutcome};

/// Backend used for image arithmetic and resampling.
pub type Cpu = burn_ndarray::NdArray<f32>;

/// Backend used for gradient-based estimation.
pub type CpuAutodiff = burn::backend::Autodiff<Cpu>;
