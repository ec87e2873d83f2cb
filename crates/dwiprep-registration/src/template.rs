//! Two-stage registration of a subject into template space.
//!
//! The rigid stage aligns the subject's reference volume to the template.
//! The affine stage then refines from the rigid output, so its moving space
//! is the rigid result. Both matrices are applied to the diffusion series and
//! the brain mask one after the other, through two separate resamplings.

use crate::backend::{Interpolation, RegistrationBackend};
use crate::error::{RegistrationError, Result};
use crate::gradients::{check_counts, rotate_table};
use crate::merge::DatasetPaths;
use dwiprep_core::transform::{Dof, SpatialTransform};
use dwiprep_io::{read_gradient_table, read_image_space, read_volume_count, write_bvecs};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TemplateInputs {
    /// Subject reference volume (brain-extracted b0).
    pub reference: PathBuf,
    /// Combined within-subject dataset.
    pub dataset: DatasetPaths,
    /// Binary brain mask on the subject grid.
    pub mask: PathBuf,
    pub template: PathBuf,
}

/// Output naming under the template folder.
#[derive(Debug, Clone)]
pub struct TemplateOutputs {
    pub rigid_matrix: PathBuf,
    pub rigid_reference: PathBuf,
    pub affine_matrix: PathBuf,
    pub affine_reference: PathBuf,
    pub rigid_image: PathBuf,
    pub affine_image: PathBuf,
    pub rigid_bvec: PathBuf,
    pub affine_bvec: PathBuf,
    pub bval: PathBuf,
    pub rigid_mask: PathBuf,
    pub affine_mask: PathBuf,
}

impl TemplateOutputs {
    pub fn new(dir: &Path) -> Self {
        Self {
            rigid_matrix: dir.join("rigid_to_template.mat"),
            rigid_reference: dir.join("b0_reg_rigid.nii.gz"),
            affine_matrix: dir.join("affine_to_template.mat"),
            affine_reference: dir.join("b0_reg_affine.nii.gz"),
            rigid_image: dir.join("dwi_reg_rigid.nii.gz"),
            affine_image: dir.join("dwi_reg_affine.nii.gz"),
            rigid_bvec: dir.join("bvec_reg_rigid.bvec"),
            affine_bvec: dir.join("bvec_reg_affine.bvec"),
            bval: dir.join("bval_final.bval"),
            rigid_mask: dir.join("mask_reg_rigid.nii.gz"),
            affine_mask: dir.join("mask_reg_affine.nii.gz"),
        }
    }

    /// Final dataset in template space.
    pub fn dataset(&self) -> DatasetPaths {
        DatasetPaths::new(&self.affine_image, &self.bval, &self.affine_bvec)
    }

    /// Every artifact the stage leaves behind, in creation order.
    pub fn all(&self) -> Vec<&Path> {
        vec![
            &self.rigid_matrix,
            &self.rigid_reference,
            &self.affine_matrix,
            &self.affine_reference,
            &self.rigid_image,
            &self.affine_image,
            &self.rigid_bvec,
            &self.affine_bvec,
            &self.bval,
            &self.rigid_mask,
            &self.affine_mask,
        ]
        .into_iter()
        .map(PathBuf::as_path)
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TemplateResult {
    pub rigid: SpatialTransform,
    pub affine: SpatialTransform,
    /// `affine · rigid`, for reporting. Resampling never uses it.
    pub composed: Option<SpatialTransform>,
    pub outputs: TemplateOutputs,
}

/// Register the subject to the template and carry its data along.
pub fn register_to_template(
    backend: &RegistrationBackend,
    inputs: &TemplateInputs,
    output_dir: &Path,
) -> Result<TemplateResult> {
    if !inputs.template.exists() {
        return Err(RegistrationError::TemplateUnavailable(inputs.template.clone()));
    }
    read_image_space(&inputs.template).map_err(|e| {
        tracing::error!("Cannot read template: {:#}", e);
        RegistrationError::TemplateUnavailable(inputs.template.clone())
    })?;
    RegistrationError::require(&inputs.reference)?;
    RegistrationError::require(&inputs.mask)?;
    inputs.dataset.require()?;

    // Validate before any output is written.
    let table = read_gradient_table(&inputs.dataset.bval, &inputs.dataset.bvec)?;
    check_counts(read_volume_count(&inputs.dataset.image)?, &table)?;

    std::fs::create_dir_all(output_dir)?;
    let out = TemplateOutputs::new(output_dir);
    let aligner = &backend.aligner;
    let resampler = &backend.resampler;

    tracing::info!("Rigid registration to {}", inputs.template.display());
    let rigid = aligner
        .align(&inputs.reference, &inputs.template, Dof::Rigid, &out.rigid_matrix, &out.rigid_reference)
        .map_err(|e| e.in_run("rigid to template"))?;

    tracing::info!("Affine refinement from the rigid result");
    let affine = aligner
        .align(&out.rigid_reference, &inputs.template, Dof::Affine, &out.affine_matrix, &out.affine_reference)
        .map_err(|e| e.in_run("affine to template"))?;

    tracing::info!("Applying rigid then affine to the diffusion series");
    resampler.apply(&inputs.dataset.image, &inputs.template, &out.rigid_matrix, Interpolation::Linear, &out.rigid_image)?;
    resampler.apply(&out.rigid_image, &inputs.template, &out.affine_matrix, Interpolation::Linear, &out.affine_image)?;

    let rigid_table = rotate_table(&table, &rigid).map_err(|e| e.in_run("rigid to template"))?;
    write_bvecs(&out.rigid_bvec, rigid_table.bvecs())?;
    let affine_table = rotate_table(&rigid_table, &affine).map_err(|e| e.in_run("affine to template"))?;
    write_bvecs(&out.affine_bvec, affine_table.bvecs())?;

    tracing::info!("Applying rigid then affine to the brain mask");
    resampler.apply(&inputs.mask, &inputs.template, &out.rigid_matrix, Interpolation::NearestNeighbour, &out.rigid_mask)?;
    resampler.apply(&out.rigid_mask, &inputs.template, &out.affine_matrix, Interpolation::NearestNeighbour, &out.affine_mask)?;

    std::fs::copy(&inputs.dataset.bval, &out.bval)?;

    let composed = match rigid.then(&affine) {
        Ok(composed) => {
            let t = composed.translation();
            tracing::debug!("Composed translation ({:.3}, {:.3}, {:.3})", t.x, t.y, t.z);
            Some(composed)
        }
        Err(e) => {
            tracing::warn!("Rigid and affine matrices do not compose: {}", e);
            None
        }
    };

    Ok(TemplateResult {
        rigid,
        affine,
        composed,
        outputs: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_dataset_names() {
        let out = TemplateOutputs::new(Path::new("/t"));
        let final_set = out.dataset();
        assert_eq!(final_set.image, PathBuf::from("/t/dwi_reg_affine.nii.gz"));
        assert_eq!(final_set.bval, PathBuf::from("/t/bval_final.bval"));
        assert_eq!(final_set.bvec, PathBuf::from("/t/bvec_reg_affine.bvec"));
        assert_eq!(out.all().len(), 11);
    }
}
