//! Within-subject alignment of runs 1..N onto run 0, then merge.
//!
//! For every later run the engine estimates a rigid transform between
//! reference volumes, resamples the full series onto run 0's grid, rotates
//! the direction table, and finally concatenates all runs in run order. Any
//! failure aborts the subject; no partial combined dataset is written.

use crate::backend::{Interpolation, RegistrationBackend};
use crate::error::{RegistrationError, Result};
use crate::gradients::{check_counts, rotate_table};
use crate::merge::{merge_runs, DatasetPaths, DiffusionDataset};
use burn::tensor::backend::Backend;
use dwiprep_core::diffusion::GradientTable;
use dwiprep_core::transform::{Dof, SpatialTransform};
use dwiprep_io::{read_gradient_table, read_nifti_series, read_volume_count, write_bvecs};
use std::path::{Path, PathBuf};

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct WithinRun {
    /// Brain-extracted b0 used for estimation.
    pub reference: PathBuf,
    pub dataset: DatasetPaths,
}

/// Output naming under the within-subject folder.
#[derive(Debug, Clone)]
pub struct WithinOutputs {
    dir: PathBuf,
}

impl WithinOutputs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn matrix(&self, run: usize) -> PathBuf {
        self.dir.join(format!("transf_{run}_to_0.mat"))
    }

    pub fn reference(&self, run: usize) -> PathBuf {
        self.dir.join(format!("b0_reg_{run}_to_0.nii.gz"))
    }

    pub fn image(&self, run: usize) -> PathBuf {
        self.dir.join(format!("dwi_{run}_to_0.nii.gz"))
    }

    pub fn bvec(&self, run: usize) -> PathBuf {
        self.dir.join(format!("dwi_{run}_to_0_reg.bvec"))
    }

    pub fn combined(&self) -> DatasetPaths {
        DatasetPaths::with_stem(&self.dir, "dwi_all_combined")
    }
}

#[derive(Debug, Clone)]
pub struct WithinResult {
    /// Forward transform of run `i + 1` onto run 0.
    pub transforms: Vec<SpatialTransform>,
    /// Volume count contributed by each run, in run order.
    pub volumes_per_run: Vec<usize>,
    pub combined: DatasetPaths,
}

impl WithinResult {
    pub fn total_volumes(&self) -> usize {
        self.volumes_per_run.iter().sum()
    }
}

fn run_label(run: usize) -> String {
    format!("run {run}")
}

/// A later run after alignment: resampled image on disk plus rotated table.
struct AlignedRun {
    image: PathBuf,
    table: GradientTable,
}

/// Align runs 1..N onto run 0 and write the combined dataset.
pub fn register_within_subject<B: Backend>(
    backend: &RegistrationBackend,
    runs: &[WithinRun],
    output_dir: &Path,
    device: &B::Device,
) -> Result<WithinResult> {
    let Some(base) = runs.first() else {
        return Err(RegistrationError::invalid_configuration("no runs to register"));
    };
    for run in runs {
        RegistrationError::require(&run.reference)?;
        run.dataset.require()?;
    }
    std::fs::create_dir_all(output_dir)?;
    let outputs = WithinOutputs::new(output_dir);

    let mut transforms = Vec::with_capacity(runs.len().saturating_sub(1));
    let mut aligned = Vec::with_capacity(runs.len().saturating_sub(1));
    for (i, run) in runs.iter().enumerate().skip(1) {
        let label = run_label(i);
        tracing::info!("Aligning {} onto run 0 with {}", label, backend.aligner.name());

        let transform = backend
            .aligner
            .align(&run.reference, &base.reference, Dof::Rigid, &outputs.matrix(i), &outputs.reference(i))
            .map_err(|e| e.in_run(&label))?;

        backend
            .resampler
            .apply(
                &run.dataset.image,
                &base.dataset.image,
                &outputs.matrix(i),
                Interpolation::Linear,
                &outputs.image(i),
            )
            .map_err(|e| e.in_run(&label))?;

        let table = read_gradient_table(&run.dataset.bval, &run.dataset.bvec)?;
        check_counts(read_volume_count(&outputs.image(i))?, &table)?;
        let rotated = rotate_table(&table, &transform).map_err(|e| e.in_run(&label))?;
        write_bvecs(outputs.bvec(i), rotated.bvecs())?;

        transforms.push(transform);
        aligned.push(AlignedRun {
            image: outputs.image(i),
            table: rotated,
        });
    }

    if runs.len() == 1 {
        tracing::info!("Single run; copying it through as the combined dataset");
    }

    let mut datasets = Vec::with_capacity(runs.len());
    datasets.push(DiffusionDataset::<B>::load(&base.dataset, device)?);
    for run in aligned {
        let series = read_nifti_series::<B, _>(&run.image, device)?;
        datasets.push(DiffusionDataset::new(series, run.table)?);
    }
    let volumes_per_run = datasets.iter().map(DiffusionDataset::len).collect();

    let merged = merge_runs(datasets)?;
    let combined = outputs.combined();
    merged.save(&combined)?;
    tracing::info!("Combined {} runs into {} volumes", runs.len(), merged.len());

    Ok(WithinResult {
        transforms,
        volumes_per_run,
        combined,
    })
}
