//! Susceptibility distortion estimation from opposed-polarity b0 volumes.
//!
//! For each run the b0 volumes of both polarities are stacked (positive
//! first), an acquisition-parameter file with one line per stacked volume
//! is written, and `topup` produces the field coefficients and the unwarped
//! b0 series that the later stages use.

use super::StageContext;
use crate::discovery::{discover_runs, RunPair, RunRecord, SessionDirs};
use crate::Cpu;
use dwiprep_io::{read_bvals, read_image_space, read_metadata, read_nifti_series, write_acqparams, write_indices, write_nifti_series};
use dwiprep_registration::{RegistrationError, Result};
use std::path::{Path, PathBuf};

pub fn stacked_b0(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("b0_all_scan_{run}.nii.gz"))
}

pub fn acqparams(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("acq_scan_{run}.txt"))
}

/// Base name passed to `--out`.
pub fn results_base(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("topup_results_{run}"))
}

pub fn unwarped(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("b0_unwarped_{run}.nii.gz"))
}

pub(crate) fn is_done(dirs: &SessionDirs, runs: usize) -> bool {
    (0..runs).all(|n| unwarped(&dirs.b0_correction, n).exists())
}

/// `TotalReadoutTime` from a run sidecar. Never defaulted.
pub(crate) fn readout_time(record: &RunRecord) -> Result<f64> {
    let meta = read_metadata(&record.files.json)?;
    meta.total_readout_time.ok_or_else(|| {
        tracing::error!("{} has no TotalReadoutTime", record.files.json.display());
        RegistrationError::MissingInput(record.files.json.clone())
    })
}

/// Reference-volume indices of one run, failing when there are none.
pub(crate) fn reference_indices(record: &RunRecord, threshold: f64) -> Result<Vec<usize>> {
    let bvals = read_bvals(&record.files.bval)?;
    let indices = dwiprep_core::diffusion::b0_indices(&bvals, threshold);
    if indices.is_empty() {
        return Err(RegistrationError::NoReferenceVolumes {
            table: record.files.bval.clone(),
            threshold,
        });
    }
    tracing::debug!("{} b0 volumes in {}: {:?}", indices.len(), record.files.bval.display(), indices);
    Ok(indices)
}

/// topup's default profile subsamples by two, which needs even dimensions.
fn profile_for(ctx: &StageContext, image: &Path) -> Result<String> {
    let dims = read_image_space(image)?.dims;
    let paths = &ctx.config.paths;
    if dims.iter().any(|d| d % 2 == 1) {
        tracing::info!("Odd grid {:?}; using {}", dims, paths.topup_config_odd);
        Ok(paths.topup_config_odd.clone())
    } else {
        Ok(paths.topup_config.clone())
    }
}

fn correct_run(ctx: &StageContext, pair: &RunPair, out: &Path) -> Result<()> {
    let n = pair.index;
    let threshold = ctx.config.acquisition.b0_threshold;
    let readout = readout_time(&pair.positive)?;

    let positive_idx = reference_indices(&pair.positive, threshold)?;
    let negative_idx = reference_indices(&pair.negative, threshold)?;
    write_indices(out.join(format!("b0_indices_AP_{n}.txt")), &positive_idx)?;
    write_indices(out.join(format!("b0_indices_PA_{n}.txt")), &negative_idx)?;

    let positive = read_nifti_series::<Cpu, _>(&pair.positive.files.dwi, &ctx.device)?.select(&positive_idx)?;
    let negative = read_nifti_series::<Cpu, _>(&pair.negative.files.dwi, &ctx.device)?.select(&negative_idx)?;
    let stacked = positive.concat(negative)?;
    write_nifti_series(stacked_b0(out, n), &stacked)?;
    write_acqparams(acqparams(out, n), readout, positive_idx.len(), negative_idx.len())?;
    tracing::info!(
        "Run {}: {} + {} b0 volumes, readout {} s",
        n,
        positive_idx.len(),
        negative_idx.len(),
        readout
    );

    let profile = profile_for(ctx, &stacked_b0(out, n))?;
    let base = results_base(out, n);
    let mut coefficients = base.clone().into_os_string();
    coefficients.push("_fieldcoef.nii.gz");

    ctx.tool("topup", &ctx.config.tools.topup)
        .flag("imain", stacked_b0(out, n))
        .flag("datain", acqparams(out, n))
        .flag("config", &profile)
        .flag("out", &base)
        .flag("iout", unwarped(out, n))
        .expect_output(PathBuf::from(coefficients))
        .expect_output(unwarped(out, n))
        .run()?;
    Ok(())
}

pub(crate) fn run(ctx: &StageContext, dirs: &SessionDirs) -> Result<()> {
    let pairs = discover_runs(&dirs.input, &ctx.config.acquisition)?;
    std::fs::create_dir_all(&dirs.b0_correction)?;
    for pair in &pairs {
        correct_run(ctx, pair, &dirs.b0_correction)?;
    }
    Ok(())
}
