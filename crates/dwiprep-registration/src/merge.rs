//! Diffusion datasets and run merging.

use crate::error::{RegistrationError, Result};
use crate::gradients::check_counts;
use burn::tensor::backend::Backend;
use dwiprep_core::diffusion::GradientTable;
use dwiprep_core::image::{ImageSeries, SeriesError};
use dwiprep_io::{read_gradient_table, read_nifti_series, write_gradient_table, write_nifti_series};
use std::path::{Path, PathBuf};

/// The three files that make up one diffusion dataset on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub image: PathBuf,
    pub bval: PathBuf,
    pub bvec: PathBuf,
}

impl DatasetPaths {
    pub fn new(image: impl Into<PathBuf>, bval: impl Into<PathBuf>, bvec: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            bval: bval.into(),
            bvec: bvec.into(),
        }
    }

    /// `{stem}.nii.gz`, `{stem}.bval` and `{stem}.bvec` under `dir`.
    pub fn with_stem(dir: &Path, stem: &str) -> Self {
        Self::new(
            dir.join(format!("{stem}.nii.gz")),
            dir.join(format!("{stem}.bval")),
            dir.join(format!("{stem}.bvec")),
        )
    }

    /// First missing file, if any.
    pub fn missing(&self) -> Option<&Path> {
        [&self.image, &self.bval, &self.bvec]
            .into_iter()
            .find(|p| !p.exists())
            .map(PathBuf::as_path)
    }

    pub fn require(&self) -> Result<()> {
        match self.missing() {
            Some(path) => Err(RegistrationError::MissingInput(path.to_path_buf())),
            None => Ok(()),
        }
    }
}

/// An image series with its gradient table, counts checked on construction.
#[derive(Debug, Clone)]
pub struct DiffusionDataset<B: Backend> {
    series: ImageSeries<B>,
    table: GradientTable,
}

impl<B: Backend> DiffusionDataset<B> {
    pub fn new(series: ImageSeries<B>, table: GradientTable) -> Result<Self> {
        check_counts(series.len(), &table)?;
        Ok(Self { series, table })
    }

    /// Load and validate the dataset stored at `paths`.
    pub fn load(paths: &DatasetPaths, device: &B::Device) -> Result<Self> {
        paths.require()?;
        let series = read_nifti_series::<B, _>(&paths.image, device)?;
        let table = read_gradient_table(&paths.bval, &paths.bvec)?;
        Self::new(series, table)
    }

    /// Write image and tables; counts are already consistent.
    pub fn save(&self, paths: &DatasetPaths) -> Result<()> {
        write_nifti_series(&paths.image, &self.series)?;
        write_gradient_table(&paths.bval, &paths.bvec, &self.table)?;
        Ok(())
    }

    pub fn series(&self) -> &ImageSeries<B> {
        &self.series
    }

    pub fn table(&self) -> &GradientTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn into_parts(self) -> (ImageSeries<B>, GradientTable) {
        (self.series, self.table)
    }

    /// Volumes at `indices`, with their table entries, in the order given.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let series = self.series.select(indices)?;
        let table = self.table.select(indices).ok_or_else(|| RegistrationError::IndexMismatch {
            images: series.len(),
            directions: self.table.len(),
            strengths: self.table.len(),
        })?;
        Self::new(series, table)
    }

    /// Replace the table, e.g. with a rotated copy.
    pub fn with_table(self, table: GradientTable) -> Result<Self> {
        Self::new(self.series, table)
    }
}

/// Concatenate `runs` along the volume axis in the order given.
///
/// Images, directions and strengths are appended in the same run order, so
/// volume `k` of the result keeps its own table entry. All runs must share a
/// grid shape.
pub fn merge_runs<B: Backend>(runs: Vec<DiffusionDataset<B>>) -> Result<DiffusionDataset<B>> {
    let mut runs = runs.into_iter();
    let first = runs.next().ok_or(RegistrationError::InvalidSeries(SeriesError::Empty))?;
    let (mut series, mut table) = first.into_parts();

    for (offset, run) in runs.enumerate() {
        if run.series.shape() != series.shape() {
            return Err(RegistrationError::ShapeMismatch {
                expected: series.shape().to_vec(),
                actual: run.series.shape().to_vec(),
            });
        }
        if !run.series.reference().same_grid(series.reference()) {
            tracing::warn!("Run {} has the same shape as run 0 but different geometry", offset + 1);
        }
        table = table.concat(&run.table);
        series = series.concat(run.series)?;
    }

    let merged = DiffusionDataset::new(series, table)?;
    tracing::debug!("Merged dataset has {} volumes", merged.len());
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use dwiprep_core::image::Image;
    use dwiprep_core::spatial::{Direction3, Point3, Spacing3, Vector3};

    type B = NdArray<f32>;

    fn dataset(markers: &[f32], shape: [usize; 3]) -> DiffusionDataset<B> {
        let device = Default::default();
        let volumes = markers
            .iter()
            .map(|&m| {
                let data = Tensor::<B, 3>::ones(shape, &device) * m;
                Image::new(data, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
            })
            .collect();
        let series = ImageSeries::new(volumes).unwrap();
        let bvals = markers.iter().map(|&m| m as f64).collect();
        let bvecs = markers.iter().map(|_| Vector3::x()).collect();
        DiffusionDataset::new(series, GradientTable::new(bvals, bvecs).unwrap()).unwrap()
    }

    #[test]
    fn test_three_plus_two_volumes() {
        let a = dataset(&[0.0, 1000.0, 1001.0], [2, 2, 2]);
        let b = dataset(&[5.0, 2000.0], [2, 2, 2]);
        let merged = merge_runs(vec![a, b]).unwrap();

        assert_eq!(merged.len(), 5);
        assert_eq!(merged.table().bvecs().len(), 5);
        assert_eq!(merged.table().bvals(), &[0.0, 1000.0, 1001.0, 5.0, 2000.0]);
        let markers: Vec<f32> = merged.series().iter().map(|v| v.values()[0]).collect();
        assert_eq!(markers, vec![0.0, 1000.0, 1001.0, 5.0, 2000.0]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let a = dataset(&[1.0], [2, 2, 2]);
        let b = dataset(&[2.0], [2, 2, 3]);
        let err = merge_runs(vec![a, b]).unwrap_err();
        assert!(matches!(err, RegistrationError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_empty_merge_rejected() {
        assert!(merge_runs::<B>(Vec::new()).is_err());
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let series = dataset(&[1.0, 2.0], [2, 2, 2]).into_parts().0;
        let table = GradientTable::new(vec![0.0], vec![Vector3::x()]).unwrap();
        let err = DiffusionDataset::new(series, table).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IndexMismatch);
    }

    #[test]
    fn test_select_keeps_table_in_step() {
        let d = dataset(&[0.0, 1000.0, 3.0], [2, 2, 2]);
        let b0 = d.select(&d.table().b0_indices(50.0)).unwrap();
        assert_eq!(b0.table().bvals(), &[0.0, 3.0]);
        let markers: Vec<f32> = b0.series().iter().map(|v| v.values()[0]).collect();
        assert_eq!(markers, vec![0.0, 3.0]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths::with_stem(dir.path(), "run");
        assert_eq!(paths.missing(), Some(paths.image.as_path()));

        dataset(&[0.0, 1000.0], [2, 3, 4]).save(&paths).unwrap();
        let loaded = DiffusionDataset::<B>::load(&paths, &Default::default()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.series().shape(), [2, 3, 4]);
        assert_eq!(loaded.table().bvals(), &[0.0, 1000.0]);
    }
}
