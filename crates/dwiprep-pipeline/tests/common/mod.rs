#![allow(dead_code)]

use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use dwiprep_core::diffusion::GradientTable;
use dwiprep_core::image::{Image, ImageSeries};
use dwiprep_core::spatial::{Direction3, Point3, Spacing3, Vector3};
use dwiprep_io::{write_gradient_table, write_nifti, write_nifti_series};
use dwiprep_pipeline::PipelineConfig;
use std::path::{Path, PathBuf};

pub type B = NdArray<f32>;

pub const SHAPE: [usize; 3] = [4, 4, 4];

pub const SIDECAR: &str = r#"{"TotalReadoutTime": 0.05, "SliceTiming": [0.0, 0.5, 0.25, 0.75]}"#;

pub fn constant(value: f32) -> Image<B, 3> {
    let n: usize = SHAPE.iter().product();
    let data = Tensor::<B, 3>::from_data(TensorData::new(vec![value; n], SHAPE), &Default::default());
    Image::new(data, Point3::origin(), Spacing3::new(2.0, 2.0, 2.0), Direction3::identity())
}

/// Write the four files of one run; volume `k` is filled with `100 + bvals[k]`.
pub fn write_run(dir: &Path, label: &str, polarity: &str, bvals: &[f64], sidecar: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let stem = dir.join(format!("HCD0001_dMRI_{label}_{polarity}"));
    let volumes = bvals.iter().map(|&b| constant(100.0 + b as f32)).collect();
    let series = ImageSeries::new(volumes).unwrap();
    let table = GradientTable::new(bvals.to_vec(), bvals.iter().map(|_| Vector3::x()).collect()).unwrap();

    write_nifti_series(stem.with_extension("nii.gz"), &series).unwrap();
    write_gradient_table(stem.with_extension("bval"), stem.with_extension("bvec"), &table).unwrap();
    std::fs::write(stem.with_extension("json"), sidecar).unwrap();
}

/// Raw data for one subject: two runs, three AP and two PA volumes each.
pub fn write_subject(input: &Path, subject: &str, sidecar: &str) -> PathBuf {
    let dir = input.join(subject).join("unprocessed/Diffusion");
    for label in ["dir98", "dir99"] {
        write_run(&dir, label, "AP", &[0.0, 1000.0, 2000.0], sidecar);
        write_run(&dir, label, "PA", &[5.0, 1000.0], sidecar);
    }
    dir
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let script = format!("#!/bin/sh\necho \"{name} $*\" >> \"$(dirname \"$0\")/tools.log\"\n{body}");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Stand-ins for the FSL programs. They copy inputs to the declared
/// outputs; `flirt` writes an identity matrix. `eddy` exits 1 when
/// `FAKE_EDDY_FAIL` is set.
#[cfg(unix)]
pub fn install_tools(dir: &Path, config: &mut PipelineConfig) {
    std::fs::create_dir_all(dir).unwrap();
    config.tools.topup = write_script(
        dir,
        "topup",
        r#"for arg in "$@"; do
  case "$arg" in
    --imain=*) imain="${arg#--imain=}" ;;
    --out=*) out="${arg#--out=}" ;;
    --iout=*) iout="${arg#--iout=}" ;;
  esac
done
cp "$imain" "$iout"
: > "${out}_fieldcoef.nii.gz"
"#,
    );
    config.tools.bet = write_script(
        dir,
        "bet",
        r#"in="$1"; out="$2"
case "$in" in *.nii.gz) ;; *) in="$in.nii.gz" ;; esac
cp "$in" "$out.nii.gz"
cp "$in" "${out}_mask.nii.gz"
"#,
    );
    config.tools.eddy = write_script(
        dir,
        "eddy",
        r#"if [ -n "$FAKE_EDDY_FAIL" ]; then
  echo "eddy: out of memory" >&2
  exit 1
fi
for arg in "$@"; do
  case "$arg" in
    --imain=*) imain="${arg#--imain=}" ;;
    --bvecs=*) bvecs="${arg#--bvecs=}" ;;
    --out=*) out="${arg#--out=}" ;;
  esac
done
cp "$imain" "$out.nii.gz"
cp "$bvecs" "$out.eddy_rotated_bvecs"
"#,
    );
    config.tools.flirt = write_script(
        dir,
        "flirt",
        r#"while [ $# -gt 0 ]; do
  case "$1" in
    -in) in="$2"; shift ;;
    -out) out="$2"; shift ;;
    -omat) omat="$2"; shift ;;
  esac
  shift
done
cp "$in" "$out"
if [ -n "$omat" ]; then
  echo "1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1" > "$omat"
fi
"#,
    );
    config.tools.timeout_seconds = Some(60);
}

/// Tool invocations so far, one line per call, prefixed with the tool name.
pub fn tool_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("tools.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// A configuration rooted in `root` with a template on the subject grid.
///
/// The 4³ test volumes hold 64 voxels, so the sparse-mask cut-off is lowered
/// to keep the overlap measurements normal.
pub fn config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.qc.min_overlap_voxels = 10;
    config.paths.input_dir = root.join("input");
    config.paths.output_dir = root.join("output");
    config.paths.template = root.join("template.nii.gz");
    write_nifti(&config.paths.template, &constant(300.0)).unwrap();
    config
}
