#![allow(dead_code)]

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use dwiprep_core::diffusion::GradientTable;
use dwiprep_core::image::{Image, ImageSeries};
use dwiprep_core::spatial::{Direction3, Point3, Spacing3, Vector3};
use dwiprep_io::{write_gradient_table, write_nifti, write_nifti_series};
use dwiprep_registration::DatasetPaths;
use std::path::{Path, PathBuf};

/// Gaussian ellipsoid on a `[z, y, x]` grid, centred at `center` (x, y, z voxels).
pub fn ellipsoid<B: Backend>(shape: [usize; 3], center: [f64; 3], radii: [f64; 3], device: &B::Device) -> Image<B, 3> {
    let [nz, ny, nx] = shape;
    let mut values = Vec::with_capacity(nz * ny * nx);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let dx = (x as f64 - center[0]) / radii[0];
                let dy = (y as f64 - center[1]) / radii[1];
                let dz = (z as f64 - center[2]) / radii[2];
                values.push((100.0 * (-(dx * dx + dy * dy + dz * dz) / 2.0).exp()) as f32);
            }
        }
    }
    let data = Tensor::<B, 3>::from_data(TensorData::new(values, shape), device);
    Image::new(data, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
}

/// A volume filled with `value`.
pub fn constant<B: Backend>(shape: [usize; 3], value: f32, device: &B::Device) -> Image<B, 3> {
    let data = Tensor::<B, 3>::ones(shape, device) * value;
    Image::new(data, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
}

/// Write a run whose volume `k` is filled with `markers[k]` and whose
/// strengths equal the markers. Directions all point along x.
pub fn write_marked_run<B: Backend>(dir: &Path, stem: &str, markers: &[f32], device: &B::Device) -> DatasetPaths {
    let shape = [4, 4, 4];
    let volumes = markers.iter().map(|&m| constant::<B>(shape, m, device)).collect();
    let series = ImageSeries::new(volumes).unwrap();
    let table = GradientTable::new(
        markers.iter().map(|&m| m as f64).collect(),
        markers.iter().map(|_| Vector3::x()).collect(),
    )
    .unwrap();

    let paths = DatasetPaths::with_stem(dir, stem);
    write_nifti_series(&paths.image, &series).unwrap();
    write_gradient_table(&paths.bval, &paths.bvec, &table).unwrap();
    paths
}

pub fn write_volume<B: Backend>(path: &Path, image: &Image<B, 3>) -> PathBuf {
    write_nifti(path, image).unwrap();
    path.to_path_buf()
}

/// A stand-in for `flirt` that copies `-in` to `-out` and writes the matrix
/// held in `FAKE_FLIRT_MATRIX` (identity by default). Exits 1 when `-dof`
/// equals `FAKE_FLIRT_FAIL_DOF`. Every call is appended to `flirt.log`.
#[cfg(unix)]
pub fn fake_flirt(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/flirt.log"
in=""; out=""; omat=""; dof=""
while [ $# -gt 0 ]; do
  case "$1" in
    -in) in="$2"; shift ;;
    -out) out="$2"; shift ;;
    -omat) omat="$2"; shift ;;
    -dof) dof="$2"; shift ;;
  esac
  shift
done
if [ -n "$FAKE_FLIRT_FAIL_DOF" ] && [ "$dof" = "$FAKE_FLIRT_FAIL_DOF" ]; then
  echo "flirt: cost function did not converge" >&2
  exit 1
fi
cp "$in" "$out"
if [ -n "$omat" ]; then
  echo "${FAKE_FLIRT_MATRIX:-1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1}" > "$omat"
fi
"#;
    let path = dir.join("flirt");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn flirt_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("flirt.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
