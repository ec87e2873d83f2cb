//! FSL-style gradient tables.
//!
//! `.bval`: whitespace-separated strengths, possibly wrapped over several lines.
//! `.bvec`: 3 rows × N columns, or N rows × 3 columns (detected on read,
//! always written as 3 × N).

use anyhow::{bail, Context, Result};
use dwiprep_core::diffusion::GradientTable;
use dwiprep_core::spatial::Vector3;
use std::fmt::Write as _;
use std::path::Path;

fn read_rows(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.split_whitespace()
                .map(|token| {
                    token
                        .parse::<f64>()
                        .with_context(|| format!("Invalid number {:?} in {}", token, path.display()))
                })
                .collect()
        })
        .collect()
}

pub fn read_bvals<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    Ok(read_rows(path.as_ref())?.into_iter().flatten().collect())
}

pub fn read_bvecs<P: AsRef<Path>>(path: P) -> Result<Vec<Vector3>> {
    let path = path.as_ref();
    let rows = read_rows(path)?;

    let three_by_n = rows.len() == 3 && rows.iter().all(|r| r.len() == rows[0].len());
    if three_by_n {
        let n = rows[0].len();
        return Ok((0..n).map(|i| Vector3::new(rows[0][i], rows[1][i], rows[2][i])).collect());
    }
    if rows.iter().all(|r| r.len() == 3) {
        return Ok(rows.iter().map(|r| Vector3::new(r[0], r[1], r[2])).collect());
    }
    bail!(
        "{} is neither 3xN nor Nx3 ({} rows, first row has {} entries)",
        path.display(),
        rows.len(),
        rows.first().map_or(0, Vec::len)
    )
}

/// Read a strength/direction pair, rejecting tables of unequal length.
pub fn read_gradient_table<P: AsRef<Path>, Q: AsRef<Path>>(bval: P, bvec: Q) -> Result<GradientTable> {
    let bvals = read_bvals(bval.as_ref())?;
    let bvecs = read_bvecs(bvec.as_ref())?;
    GradientTable::new(bvals, bvecs).with_context(|| {
        format!("{} and {} disagree", bval.as_ref().display(), bvec.as_ref().display())
    })
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

fn join_row(values: impl Iterator<Item = f64>) -> String {
    let mut line = String::new();
    for (i, v) in values.enumerate() {
        if i > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{:.6}", v);
    }
    line.push('\n');
    line
}

pub fn write_bvals<P: AsRef<Path>>(path: P, bvals: &[f64]) -> Result<()> {
    write_text(path.as_ref(), &join_row(bvals.iter().copied()))
}

pub fn write_bvecs<P: AsRef<Path>>(path: P, bvecs: &[Vector3]) -> Result<()> {
    let mut text = String::new();
    for axis in 0..3 {
        text.push_str(&join_row(bvecs.iter().map(|v| v[axis])));
    }
    write_text(path.as_ref(), &text)
}

pub fn write_gradient_table<P: AsRef<Path>, Q: AsRef<Path>>(bval: P, bvec: Q, table: &GradientTable) -> Result<()> {
    write_bvals(bval, table.bvals())?;
    write_bvecs(bvec, table.bvecs())
}
