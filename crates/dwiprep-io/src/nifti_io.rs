//! NIfTI volume and series I/O.
//!
//! Volumes are stored `[Z, Y, X]` in memory and `(x, y, z[, t])` on disk.
//! Geometry comes from the sform when present, else the qform, else pixdim
//! alone. Written files carry both sform and qform built from the image
//! geometry, so a resampled image keeps a correct voxel-to-world affine.

use anyhow::{bail, Context, Result};
use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use nalgebra::{Rotation3, UnitQuaternion};
use ndarray::{ArrayD, IxDyn};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use nifti::writer::WriterOptions;
use dwiprep_core::image::{Image, ImageSeries};
use dwiprep_core::spatial::{Direction3, Matrix4, Point3, Spacing3, Vector3};
use dwiprep_core::transform::ImageSpace;
use std::path::Path;

/// Voxel geometry decoded from a header.
struct Geometry {
    origin: Point3,
    spacing: Spacing3,
    direction: Direction3,
}

fn header_affine(header: &NiftiHeader) -> [[f32; 4]; 4] {
    if header.sform_code > 0 {
        [header.srow_x, header.srow_y, header.srow_z, [0.0, 0.0, 0.0, 1.0]]
    } else if header.qform_code > 0 {
        let b = header.quatern_b;
        let c = header.quatern_c;
        let d = header.quatern_d;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] == 0.0 { 1.0 } else { header.pixdim[0] };

        let r11 = a * a + b * b - c * c - d * d;
        let r12 = 2.0 * b * c - 2.0 * a * d;
        let r13 = 2.0 * b * d + 2.0 * a * c;
        let r21 = 2.0 * b * c + 2.0 * a * d;
        let r22 = a * a + c * c - b * b - d * d;
        let r23 = 2.0 * c * d - 2.0 * a * b;
        let r31 = 2.0 * b * d - 2.0 * a * c;
        let r32 = 2.0 * c * d + 2.0 * a * b;
        let r33 = a * a + d * d - c * c - b * b;

        let dx = header.pixdim[1];
        let dy = header.pixdim[2];
        let dz = header.pixdim[3] * qfac;

        [
            [r11 * dx, r12 * dy, r13 * dz, header.quatern_x],
            [r21 * dx, r22 * dy, r23 * dz, header.quatern_y],
            [r31 * dx, r32 * dy, r33 * dz, header.quatern_z],
            [0.0, 0.0, 0.0, 1.0],
        ]
    } else {
        let dx = header.pixdim[1];
        let dy = header.pixdim[2];
        let dz = header.pixdim[3];
        [
            [dx, 0.0, 0.0, 0.0],
            [0.0, dy, 0.0, 0.0],
            [0.0, 0.0, dz, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }
}

fn geometry_from_header(header: &NiftiHeader) -> Geometry {
    let affine = header_affine(header);
    let column = |c: usize| Vector3::new(affine[0][c] as f64, affine[1][c] as f64, affine[2][c] as f64);
    let columns = [column(0), column(1), column(2)];
    let axes = [Vector3::x(), Vector3::y(), Vector3::z()];

    let mut spacing = Spacing3::zeros();
    let mut direction = Direction3::identity();
    for c in 0..3 {
        let norm = columns[c].norm();
        spacing[c] = if norm > 1e-9 { norm } else { 1.0 };
        let unit = if norm > 1e-9 { columns[c] / norm } else { axes[c] };
        direction.set_column(c, &unit);
    }

    Geometry {
        origin: Point3::new(affine[0][3] as f64, affine[1][3] as f64, affine[2][3] as f64),
        spacing,
        direction,
    }
}

/// Header carrying the geometry of `image` as sform and qform.
fn header_for<B: Backend>(image: &Image<B, 3>, volumes: usize) -> NiftiHeader {
    let spacing = image.spacing();
    let origin = image.origin();
    let mut rotation = *image.direction();

    let qfac = if rotation.determinant() < 0.0 {
        let flipped = -rotation.column(2);
        rotation.set_column(2, &flipped);
        -1.0
    } else {
        1.0
    };
    let mut q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&rotation));
    if q.w < 0.0 {
        q = UnitQuaternion::new_unchecked(-q.into_inner());
    }

    let affine = image.affine();
    let row = |r: usize| {
        [
            affine[(r, 0)] as f32,
            affine[(r, 1)] as f32,
            affine[(r, 2)] as f32,
            affine[(r, 3)] as f32,
        ]
    };

    let mut header = NiftiHeader::default();
    header.pixdim = [
        qfac as f32,
        spacing[0] as f32,
        spacing[1] as f32,
        spacing[2] as f32,
        if volumes > 1 { 1.0 } else { 0.0 },
        0.0,
        0.0,
        0.0,
    ];
    // millimetres and seconds
    header.xyzt_units = 2 | 8;
    header.qform_code = 1;
    header.sform_code = 1;
    header.quatern_b = q.i as f32;
    header.quatern_c = q.j as f32;
    header.quatern_d = q.k as f32;
    header.quatern_x = origin[0] as f32;
    header.quatern_y = origin[1] as f32;
    header.quatern_z = origin[2] as f32;
    header.srow_x = row(0);
    header.srow_y = row(1);
    header.srow_z = row(2);
    header
}

/// Grid size and voxel-to-world affine, from the header alone.
pub fn read_image_space<P: AsRef<Path>>(path: P) -> Result<ImageSpace> {
    let path = path.as_ref();
    let header = NiftiHeader::from_file(path)
        .with_context(|| format!("Failed to read NIfTI header {}", path.display()))?;
    if header.dim[0] < 3 {
        bail!("{} has {} dimensions, expected at least 3", path.display(), header.dim[0]);
    }
    let affine = header_affine(&header);
    let mut matrix = Matrix4::identity();
    for r in 0..3 {
        for c in 0..4 {
            matrix[(r, c)] = affine[r][c] as f64;
        }
    }
    Ok(ImageSpace {
        dims: [header.dim[1] as usize, header.dim[2] as usize, header.dim[3] as usize],
        affine: matrix,
    })
}

/// Number of volumes along the fourth axis (1 for a 3-D file).
pub fn read_volume_count<P: AsRef<Path>>(path: P) -> Result<usize> {
    let path = path.as_ref();
    let header = NiftiHeader::from_file(path)
        .with_context(|| format!("Failed to read NIfTI header {}", path.display()))?;
    Ok(if header.dim[0] >= 4 { (header.dim[4] as usize).max(1) } else { 1 })
}

/// Read every volume of a 3-D or 4-D NIfTI file.
pub fn read_nifti_series<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<ImageSeries<B>> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let geometry = geometry_from_header(obj.header());

    let array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;
    let shape = array.shape().to_vec();
    let (nx, ny, nz, nt) = match shape.as_slice() {
        [nx, ny, nz] => (*nx, *ny, *nz, 1),
        [nx, ny, nz, nt] => (*nx, *ny, *nz, *nt),
        other => bail!("Expected 3D or 4D NIfTI file {}, found shape {:?}", path.display(), other),
    };

    // Reversing the axes makes logical iteration run x fastest, t slowest.
    let values: Vec<f32> = array.reversed_axes().iter().copied().collect();
    let per_volume = nx * ny * nz;

    let volumes = values
        .chunks_exact(per_volume)
        .take(nt)
        .map(|chunk| {
            let data = Tensor::<B, 3>::from_data(TensorData::new(chunk.to_vec(), [nz, ny, nx]), device);
            Image::new(data, geometry.origin, geometry.spacing, geometry.direction)
        })
        .collect();

    ImageSeries::new(volumes).with_context(|| format!("Invalid image series in {}", path.display()))
}

/// Read a single 3-D volume. A 4-D file is accepted only when it holds one volume.
pub fn read_nifti<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B, 3>> {
    let path = path.as_ref();
    let series = read_nifti_series(path, device)?;
    if series.len() != 1 {
        bail!("Expected a single volume in {}, found {}", path.display(), series.len());
    }
    Ok(series.reference().clone())
}

/// Read the first volume of a 3-D or 4-D file, as registration tools do
/// when given a 4-D reference.
pub fn read_reference_volume<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B, 3>> {
    let series = read_nifti_series(path.as_ref(), device)?;
    if series.len() > 1 {
        tracing::debug!(
            "Using first of {} volumes in {} as reference",
            series.len(),
            path.as_ref().display()
        );
    }
    Ok(series.reference().clone())
}

fn write_array<B: Backend>(path: &Path, reference: &Image<B, 3>, values: Vec<f32>, dims: &[usize]) -> Result<()> {
    // `dims` is slowest-first; the file wants the reverse.
    let array = ArrayD::from_shape_vec(IxDyn(dims), values)
        .context("Failed to create ndarray")?
        .reversed_axes();
    let volumes = if dims.len() == 4 { dims[0] } else { 1 };
    let header = header_for(reference, volumes);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&array)
        .with_context(|| format!("Failed to write NIfTI file {}", path.display()))?;
    Ok(())
}

/// Write a single volume.
pub fn write_nifti<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B, 3>) -> Result<()> {
    let [nz, ny, nx] = image.shape();
    write_array(path.as_ref(), image, image.values(), &[nz, ny, nx])
}

/// Write a series as a 4-D file, volumes in series order.
pub fn write_nifti_series<B: Backend, P: AsRef<Path>>(path: P, series: &ImageSeries<B>) -> Result<()> {
    let [nz, ny, nx] = series.shape();
    let mut values = Vec::with_capacity(series.len() * nz * ny * nx);
    for volume in series.iter() {
        values.extend(volume.values());
    }
    write_array(path.as_ref(), series.reference(), values, &[series.len(), nz, ny, nx])
}
