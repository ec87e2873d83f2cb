//! FLIRT-driven estimation and application.

use super::{Aligner, Interpolation, Resampler};
use crate::error::Result;
use crate::external::ToolCommand;
use dwiprep_core::transform::{Dof, MatrixConvention, SpatialTransform};
use dwiprep_io::{read_image_space, read_matrix};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How to invoke FLIRT.
#[derive(Debug, Clone)]
pub struct FslTools {
    pub flirt: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl FslTools {
    fn flirt(&self) -> ToolCommand {
        ToolCommand::new("flirt", &self.flirt)
            .envs(&self.env)
            .timeout(self.timeout)
    }
}

/// `flirt -in -ref -out -omat -dof`.
#[derive(Debug, Clone)]
pub struct FlirtAligner {
    tools: FslTools,
}

impl FlirtAligner {
    pub fn new(tools: FslTools) -> Self {
        Self { tools }
    }
}

impl Aligner for FlirtAligner {
    fn align(
        &self,
        moving: &Path,
        fixed: &Path,
        dof: Dof,
        matrix_out: &Path,
        image_out: &Path,
    ) -> Result<SpatialTransform> {
        self.tools
            .flirt()
            .arg("-in")
            .arg(moving)
            .arg("-ref")
            .arg(fixed)
            .arg("-out")
            .arg(image_out)
            .arg("-omat")
            .arg(matrix_out)
            .arg("-dof")
            .arg(dof.degrees().to_string())
            .expect_output(matrix_out)
            .expect_output(image_out)
            .run()?;

        let matrix = read_matrix(matrix_out)?;
        let transform = SpatialTransform::new(
            matrix,
            dof,
            MatrixConvention::FslScaled,
            read_image_space(moving)?,
            read_image_space(fixed)?,
        )?;
        Ok(transform)
    }

    fn name(&self) -> &'static str {
        "fsl"
    }
}

/// `flirt -applyxfm -init`.
#[derive(Debug, Clone)]
pub struct FlirtResampler {
    tools: FslTools,
}

impl FlirtResampler {
    pub fn new(tools: FslTools) -> Self {
        Self { tools }
    }
}

impl Resampler for FlirtResampler {
    fn apply(
        &self,
        input: &Path,
        reference: &Path,
        matrix: &Path,
        interpolation: Interpolation,
        output: &Path,
    ) -> Result<()> {
        self.tools
            .flirt()
            .arg("-in")
            .arg(input)
            .arg("-ref")
            .arg(reference)
            .arg("-applyxfm")
            .arg("-init")
            .arg(matrix)
            .arg("-out")
            .arg(output)
            .arg("-interp")
            .arg(interpolation.flirt_name())
            .expect_output(output)
            .run()?;
        Ok(())
    }
}
