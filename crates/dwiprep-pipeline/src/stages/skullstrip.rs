//! Brain extraction on the unwarped b0 series, with a brain-volume check.
//!
//! Every attempt appends one row to `qc_summary.csv` under the QC root, so
//! failures are visible next to successes.

use super::{topup, StageContext};
use crate::discovery::{Session, SessionDirs};
use crate::Cpu;
use dwiprep_io::{append_record, read_reference_volume};
use dwiprep_registration::{QcStatus, RegistrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Subjects running on different workers share one summary file.
static SUMMARY_LOCK: Mutex<()> = Mutex::new(());

pub const SUMMARY_FILE: &str = "qc_summary.csv";

/// Base name handed to BET; it appends `.nii.gz` and `_mask.nii.gz`.
pub fn output_base(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("mask_bet_scan{run}"))
}

/// Brain-extracted b0.
pub fn brain(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("mask_bet_scan{run}.nii.gz"))
}

/// Binary brain mask.
pub fn mask(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("mask_bet_scan{run}_mask.nii.gz"))
}

pub(crate) fn is_done(dirs: &SessionDirs, runs: usize) -> bool {
    (0..runs).all(|n| mask(&dirs.skull_strip, n).exists())
}

/// One row of `qc_summary.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkullStripRecord {
    pub subject_id: String,
    pub session: String,
    pub input_file: String,
    pub output_file: String,
    pub modality: String,
    pub qc_status: QcStatus,
    pub brain_volume_ml: Option<f64>,
    pub error_message: String,
}

/// Millilitres covered by non-zero voxels of the mask.
pub fn brain_volume_ml(mask: &Path, device: &burn_ndarray::NdArrayDevice) -> Result<f64> {
    let image = read_reference_volume::<Cpu, _>(mask, device)?;
    let voxels = image.values().iter().filter(|&&v| v > 0.0).count();
    Ok(voxels as f64 * image.voxel_volume() / 1000.0)
}

fn classify_volume(ctx: &StageContext, volume_ml: f64) -> QcStatus {
    let range = &ctx.config.skull_strip;
    if (range.brain_volume_min_ml..=range.brain_volume_max_ml).contains(&volume_ml) {
        QcStatus::Pass
    } else {
        tracing::warn!(
            "Brain volume {:.1} ml outside [{}, {}]",
            volume_ml,
            range.brain_volume_min_ml,
            range.brain_volume_max_ml
        );
        QcStatus::Fail
    }
}

fn strip_run(ctx: &StageContext, dirs: &SessionDirs, run: usize) -> Result<f64> {
    let input = RegistrationError::require(topup::unwarped(&dirs.b0_correction, run))?;
    ctx.tool("bet", &ctx.config.tools.bet)
        .arg(&input)
        .arg(output_base(&dirs.skull_strip, run))
        .arg("-m")
        .arg("-f")
        .arg(ctx.config.skull_strip.fractional_intensity.to_string())
        .expect_output(brain(&dirs.skull_strip, run))
        .expect_output(mask(&dirs.skull_strip, run))
        .run()?;
    brain_volume_ml(&mask(&dirs.skull_strip, run), &ctx.device)
}

pub(crate) fn run(ctx: &StageContext, session: &Session, dirs: &SessionDirs) -> Result<()> {
    std::fs::create_dir_all(&dirs.skull_strip)?;
    let summary = ctx.config.paths.qc_root().join(SUMMARY_FILE);

    for n in 0..ctx.config.acquisition.runs_per_session {
        let result = strip_run(ctx, dirs, n);
        let (qc_status, brain_volume_ml, error_message) = match &result {
            Ok(volume) => (classify_volume(ctx, *volume), Some(*volume), String::new()),
            Err(err) => (QcStatus::Error, None, err.to_string()),
        };
        let guard = SUMMARY_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        append_record(
            &summary,
            &SkullStripRecord {
                subject_id: session.subject.clone(),
                session: session.session_or_empty().to_string(),
                input_file: topup::unwarped(&dirs.b0_correction, n).display().to_string(),
                output_file: mask(&dirs.skull_strip, n).display().to_string(),
                modality: "dwi".to_string(),
                qc_status,
                brain_volume_ml,
                error_message,
            },
        )?;
        drop(guard);
        let volume = result?;
        tracing::info!("Run {}: brain volume {:.1} ml ({})", n, volume, qc_status);
    }
    Ok(())
}
