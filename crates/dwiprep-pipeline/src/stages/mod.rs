//! Stage drivers.
//!
//! Every stage runs once per session of a subject and returns one
//! [`StageOutcome`] per session. A failed session never panics or aborts
//! other subjects; the outcome carries the error kind for the batch report.

pub mod topup;
pub mod skullstrip;
pub mod eddy;
pub mod within;
pub mod template;
pub mod qc;

use crate::config::{BackendKind, PipelineConfig};
use crate::discovery::{subject_sessions, Session, SessionDirs};
use crate::report::SubjectResult;
use crate::{Cpu, CpuAutodiff};
use dwiprep_registration::backend::{FlirtAligner, FlirtResampler, FslTools, NativeAligner, NativeResampler};
use dwiprep_registration::external::ToolCommand;
use dwiprep_registration::{ErrorKind, RegistrationBackend, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Topup,
    SkullStrip,
    Eddy,
    RegWithin,
    RegTemplate,
    Qc,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Topup,
        Stage::SkullStrip,
        Stage::Eddy,
        Stage::RegWithin,
        Stage::RegTemplate,
        Stage::Qc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Topup => "topup",
            Stage::SkullStrip => "skull-strip",
            Stage::Eddy => "eddy",
            Stage::RegWithin => "reg-within",
            Stage::RegTemplate => "reg-template",
            Stage::Qc => "qc",
        }
    }

    /// Root whose subject folders define the sessions this stage processes.
    fn session_root(self, config: &PipelineConfig) -> PathBuf {
        let paths = &config.paths;
        match self {
            Stage::Topup | Stage::Eddy => paths.input_dir.clone(),
            Stage::SkullStrip => paths.b0_correction_root(),
            Stage::RegWithin => paths.eddy_root(),
            Stage::RegTemplate => paths.reg_within_root(),
            Stage::Qc => paths.reg_template_root(),
        }
    }

    fn is_done(self, ctx: &StageContext, dirs: &SessionDirs) -> bool {
        let runs = ctx.config.acquisition.runs_per_session;
        match self {
            Stage::Topup => topup::is_done(dirs, runs),
            Stage::SkullStrip => skullstrip::is_done(dirs, runs),
            Stage::Eddy => eddy::is_done(dirs, runs),
            Stage::RegWithin => within::is_done(dirs),
            Stage::RegTemplate => template::is_done(dirs),
            Stage::Qc => qc::is_done(dirs),
        }
    }

    fn execute(self, ctx: &StageContext, session: &Session, dirs: &SessionDirs) -> Result<()> {
        match self {
            Stage::Topup => topup::run(ctx, dirs),
            Stage::SkullStrip => skullstrip::run(ctx, session, dirs),
            Stage::Eddy => eddy::run(ctx, dirs),
            Stage::RegWithin => within::run(ctx, dirs),
            Stage::RegTemplate => template::run(ctx, dirs),
            Stage::Qc => qc::run(ctx, session, dirs),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded,
    Skipped,
    Failed,
}

/// Result of one stage on one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub subject: String,
    pub session: Option<String>,
    pub stage: Stage,
    pub status: OutcomeStatus,
    pub elapsed_seconds: f64,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }
}

/// Everything a stage needs besides its session.
pub struct StageContext {
    pub config: PipelineConfig,
    pub backend: RegistrationBackend,
    pub device: burn_ndarray::NdArrayDevice,
}

impl StageContext {
    pub fn new(config: PipelineConfig) -> Self {
        let device = burn_ndarray::NdArrayDevice::default();
        let backend = registration_backend(&config, device);
        Self { config, backend, device }
    }

    /// An external program configured under `[tools]`.
    pub fn tool(&self, name: &str, program: &Path) -> ToolCommand {
        ToolCommand::new(name, program)
            .envs(&self.config.tools.env_pairs())
            .timeout(self.config.tools.timeout())
    }
}

fn registration_backend(config: &PipelineConfig, device: burn_ndarray::NdArrayDevice) -> RegistrationBackend {
    match config.registration.backend {
        BackendKind::Fsl => {
            let tools = FslTools {
                flirt: config.tools.flirt.clone(),
                env: config.tools.env_pairs(),
                timeout: config.tools.timeout(),
            };
            RegistrationBackend::new(FlirtAligner::new(tools.clone()), FlirtResampler::new(tools))
        }
        BackendKind::Native => RegistrationBackend::new(
            NativeAligner::<CpuAutodiff>::new(config.registration.native.clone(), device),
            NativeResampler::<Cpu>::new(device),
        ),
    }
}

/// Run `stage` for every session of `subject`.
pub fn run_stage(ctx: &StageContext, stage: Stage, subject: &str) -> Vec<StageOutcome> {
    let started = Instant::now();
    let sessions = match subject_sessions(&stage.session_root(&ctx.config), subject) {
        Ok(sessions) => sessions,
        Err(err) => {
            let session = Session::new(subject, None);
            return vec![failed(&session, stage, started, &err)];
        }
    };

    sessions
        .iter()
        .map(|session| run_session(ctx, stage, session))
        .collect()
}

/// Run `stages` in order for one subject, stopping at the first failure.
pub fn run_subject(ctx: &StageContext, subject: &str, stages: &[Stage]) -> SubjectResult {
    let started = Instant::now();
    let mut outcomes = Vec::new();
    for &stage in stages {
        let stage_outcomes = run_stage(ctx, stage, subject);
        let failed = stage_outcomes.iter().any(StageOutcome::is_failure);
        outcomes.extend(stage_outcomes);
        if failed {
            tracing::warn!("Stopping {} after {} failed", subject, stage);
            break;
        }
    }
    SubjectResult {
        subject: subject.to_string(),
        outcomes,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    }
}

fn run_session(ctx: &StageContext, stage: Stage, session: &Session) -> StageOutcome {
    let started = Instant::now();
    let dirs = SessionDirs::new(&ctx.config, session);

    if !ctx.config.force_reprocess && stage.is_done(ctx, &dirs) {
        tracing::info!("{} already done for {}; skipping", stage, session.label());
        return outcome(session, stage, OutcomeStatus::Skipped, started);
    }

    tracing::info!("Running {} for {}", stage, session.label());
    match stage.execute(ctx, session, &dirs) {
        Ok(()) => {
            tracing::info!(
                "{} finished for {} in {}",
                stage,
                session.label(),
                crate::report::format_duration(started.elapsed().as_secs_f64())
            );
            outcome(session, stage, OutcomeStatus::Succeeded, started)
        }
        Err(err) => failed(session, stage, started, &err),
    }
}

fn outcome(session: &Session, stage: Stage, status: OutcomeStatus, started: Instant) -> StageOutcome {
    StageOutcome {
        subject: session.subject.clone(),
        session: session.session.clone(),
        stage,
        status,
        elapsed_seconds: started.elapsed().as_secs_f64(),
        error_kind: None,
        error: None,
    }
}

fn failed(session: &Session, stage: Stage, started: Instant, err: &dwiprep_registration::RegistrationError) -> StageOutcome {
    tracing::error!(
        subject = %session.subject,
        session = session.session_or_empty(),
        stage = stage.name(),
        kind = %err.kind(),
        "{}",
        err
    );
    StageOutcome {
        error_kind: Some(err.kind()),
        error: Some(err.to_string()),
        ..outcome(session, stage, OutcomeStatus::Failed, started)
    }
}
