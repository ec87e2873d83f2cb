//! Motion and eddy-current correction of the merged AP+PA series.

use super::{topup, StageContext};
use crate::discovery::{discover_runs, RunPair, RunRecord, SessionDirs};
use crate::Cpu;
use dwiprep_io::{eddy_index, read_metadata, read_reference_volume, write_acqparams, write_indices, write_nifti, write_slspec};
use dwiprep_registration::merge::merge_runs;
use dwiprep_registration::{DatasetPaths, DiffusionDataset, RegistrationError, Result};
use std::path::{Path, PathBuf};

pub fn merged(dir: &Path, run: usize) -> DatasetPaths {
    DatasetPaths::with_stem(dir, &format!("dwi_merged_{run}"))
}

pub fn index_file(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("index_{run}.txt"))
}

pub fn acqparams(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("acqparams_{run}.txt"))
}

pub fn slspec(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("slspec_{run}.txt"))
}

pub fn b0_extract(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("b0_extract{run}.nii.gz"))
}

pub fn mask(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("mask_bet{run}_mask.nii.gz"))
}

/// Base name passed to `--out`.
pub fn output_base(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("eddy_aligned_{run}"))
}

pub fn corrected(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("eddy_aligned_{run}.nii.gz"))
}

pub fn rotated_bvecs(dir: &Path, run: usize) -> PathBuf {
    dir.join(format!("eddy_aligned_{run}.eddy_rotated_bvecs"))
}

pub(crate) fn is_done(dirs: &SessionDirs, runs: usize) -> bool {
    (0..runs).all(|n| rotated_bvecs(&dirs.eddy, n).exists())
}

fn load(record: &RunRecord, device: &burn_ndarray::NdArrayDevice) -> Result<DiffusionDataset<Cpu>> {
    let paths = DatasetPaths::new(&record.files.dwi, &record.files.bval, &record.files.bvec);
    DiffusionDataset::load(&paths, device).map_err(|e| {
        tracing::error!("Cannot load {} run {}: {}", record.polarity, record.index, e);
        e
    })
}

/// Slice acquisition order from the run sidecar, or the configured fallback.
fn slice_order(ctx: &StageContext, record: &RunRecord) -> Result<Option<Vec<usize>>> {
    if !ctx.config.eddy.slice_to_slice {
        return Ok(None);
    }
    if let Some(order) = read_metadata(&record.files.json)?.slice_order() {
        return Ok(Some(order));
    }
    if let Some(fallback) = &ctx.config.eddy.fallback_slice_timing {
        let order = read_metadata(fallback)?.slice_order();
        if order.is_some() {
            tracing::warn!("No SliceTiming in {}; using {}", record.files.json.display(), fallback.display());
        }
        return Ok(order);
    }
    tracing::warn!("No slice timing for run {}; slice-to-volume correction disabled", record.index);
    Ok(None)
}

fn correct_run(ctx: &StageContext, dirs: &SessionDirs, pair: &RunPair) -> Result<()> {
    let n = pair.index;
    let out = &dirs.eddy;
    let threshold = ctx.config.acquisition.b0_threshold;
    let unwarped = RegistrationError::require(topup::unwarped(&dirs.b0_correction, n))?;

    let positive = load(&pair.positive, &ctx.device)?;
    let negative = load(&pair.negative, &ctx.device)?;
    let n_positive = positive.len();
    let n_negative = negative.len();
    let n_b0_positive = positive.table().b0_indices(threshold).len();
    let n_b0_negative = negative.table().b0_indices(threshold).len();
    if n_b0_positive == 0 || n_b0_negative == 0 {
        let table = if n_b0_positive == 0 { &pair.positive } else { &pair.negative };
        return Err(RegistrationError::NoReferenceVolumes {
            table: table.files.bval.clone(),
            threshold,
        });
    }

    let merged_paths = merged(out, n);
    merge_runs(vec![positive, negative])?.save(&merged_paths)?;
    write_indices(index_file(out, n), &eddy_index(n_positive, n_b0_positive, n_negative))?;
    write_acqparams(acqparams(out, n), topup::readout_time(&pair.positive)?, n_b0_positive, n_b0_negative)?;
    tracing::info!("Run {}: merged {} AP + {} PA volumes", n, n_positive, n_negative);

    let b0 = read_reference_volume::<Cpu, _>(&unwarped, &ctx.device)?;
    write_nifti(b0_extract(out, n), &b0)?;
    ctx.tool("bet", &ctx.config.tools.bet)
        .arg(b0_extract(out, n))
        .arg(out.join(format!("mask_bet{n}")))
        .arg("-m")
        .arg("-f")
        .arg(ctx.config.skull_strip.fractional_intensity.to_string())
        .expect_output(mask(out, n))
        .run()?;

    let mut eddy = ctx
        .tool("eddy", &ctx.config.tools.eddy)
        .flag("imain", &merged_paths.image)
        .flag("mask", mask(out, n))
        .flag("acqp", acqparams(out, n))
        .flag("index", index_file(out, n))
        .flag("bvecs", &merged_paths.bvec)
        .flag("bvals", &merged_paths.bval)
        .flag("topup", topup::results_base(&dirs.b0_correction, n))
        .flag("out", output_base(out, n))
        .args(["--repol", "--ol_nstd=3.5", "--ol_nvox=250", "--flm=quadratic"]);

    if let Some(order) = slice_order(ctx, &pair.positive)? {
        write_slspec(slspec(out, n), &order)?;
        eddy = eddy
            .arg("--mporder=6")
            .flag("slspec", slspec(out, n))
            .args(["--s2v_niter=5", "--s2v_lambda=1", "--s2v_interp=trilinear"]);
    }

    eddy.expect_output(corrected(out, n))
        .expect_output(rotated_bvecs(out, n))
        .run()?;
    Ok(())
}

pub(crate) fn run(ctx: &StageContext, dirs: &SessionDirs) -> Result<()> {
    let pairs = discover_runs(&dirs.input, &ctx.config.acquisition)?;
    std::fs::create_dir_all(&dirs.eddy)?;
    for pair in &pairs {
        correct_run(ctx, dirs, pair)?;
    }
    Ok(())
}
