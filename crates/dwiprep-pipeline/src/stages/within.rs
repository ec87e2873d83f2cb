//! Align every later run onto run 0 and merge.

use super::{eddy, skullstrip, StageContext};
use crate::discovery::SessionDirs;
use crate::Cpu;
use dwiprep_registration::within::WithinOutputs;
use dwiprep_registration::{register_within_subject, DatasetPaths, Result, WithinRun};

pub(crate) fn is_done(dirs: &SessionDirs) -> bool {
    WithinOutputs::new(&dirs.reg_within).combined().missing().is_none()
}

/// Per-run inputs as left behind by the skull-strip and eddy stages.
pub fn inputs(dirs: &SessionDirs, runs: usize) -> Vec<WithinRun> {
    (0..runs)
        .map(|n| WithinRun {
            reference: skullstrip::brain(&dirs.skull_strip, n),
            dataset: DatasetPaths::new(
                eddy::corrected(&dirs.eddy, n),
                eddy::merged(&dirs.eddy, n).bval,
                eddy::rotated_bvecs(&dirs.eddy, n),
            ),
        })
        .collect()
}

pub(crate) fn run(ctx: &StageContext, dirs: &SessionDirs) -> Result<()> {
    let runs = inputs(dirs, ctx.config.acquisition.runs_per_session);
    let result = register_within_subject::<Cpu>(&ctx.backend, &runs, &dirs.reg_within, &ctx.device)?;
    tracing::info!(
        "Combined {} volumes from {} runs into {}",
        result.total_volumes(),
        result.volumes_per_run.len(),
        result.combined.image.display()
    );
    Ok(())
}
