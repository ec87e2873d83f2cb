//! Rigid then affine registration of the combined dataset to the template.

use super::{skullstrip, StageContext};
use crate::discovery::SessionDirs;
use dwiprep_registration::within::WithinOutputs;
use dwiprep_registration::{register_to_template, Result, TemplateInputs, TemplateOutputs};

pub(crate) fn is_done(dirs: &SessionDirs) -> bool {
    TemplateOutputs::new(&dirs.reg_template).all().iter().all(|p| p.exists())
}

pub fn inputs(ctx: &StageContext, dirs: &SessionDirs) -> TemplateInputs {
    TemplateInputs {
        reference: skullstrip::brain(&dirs.skull_strip, 0),
        dataset: WithinOutputs::new(&dirs.reg_within).combined(),
        mask: skullstrip::mask(&dirs.skull_strip, 0),
        template: ctx.config.paths.template.clone(),
    }
}

pub(crate) fn run(ctx: &StageContext, dirs: &SessionDirs) -> Result<()> {
    let result = register_to_template(&ctx.backend, &inputs(ctx, dirs), &dirs.reg_template)?;
    if let Some(composed) = &result.composed {
        let t = composed.translation();
        tracing::info!(
            "Template registration done; net translation ({:.2}, {:.2}, {:.2}) mm",
            t.x,
            t.y,
            t.z
        );
    }
    Ok(())
}
