//! Acquisition metadata and the positional text files consumed by the
//! distortion and motion correctors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Phase-encode polarity of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarity {
    /// Anterior→posterior, phase-encode row `0 1 0`.
    #[serde(rename = "AP")]
    Positive,
    /// Posterior→anterior, phase-encode row `0 -1 0`.
    #[serde(rename = "PA")]
    Negative,
}

impl Polarity {
    /// Positive first: the order reference volumes are stacked in.
    pub const ALL: [Polarity; 2] = [Polarity::Positive, Polarity::Negative];

    pub fn phase_encode(self) -> [i32; 3] {
        match self {
            Polarity::Positive => [0, 1, 0],
            Polarity::Negative => [0, -1, 0],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Polarity::Positive => "AP",
            Polarity::Negative => "PA",
        }
    }
}

impl std::fmt::Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The subset of a BIDS-style run sidecar the pipeline uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    #[serde(rename = "TotalReadoutTime", default)]
    pub total_readout_time: Option<f64>,

    #[serde(rename = "SliceTiming", default)]
    pub slice_timing: Option<Vec<f64>>,

    #[serde(rename = "PhaseEncodingDirection", default)]
    pub phase_encoding_direction: Option<String>,
}

impl AcquisitionMetadata {
    /// Slice acquisition order, if timing is present.
    pub fn slice_order(&self) -> Option<Vec<usize>> {
        self.slice_timing.as_deref().filter(|t| !t.is_empty()).map(slice_order)
    }
}

pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<AcquisitionMetadata> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid acquisition metadata in {}", path.display()))
}

/// Indices that sort `timing` ascending; equal times keep slice order.
pub fn slice_order(timing: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..timing.len()).collect();
    order.sort_by(|&a, &b| timing[a].total_cmp(&timing[b]));
    order
}

/// Per-volume row into the acquisition-parameter file for the motion corrector:
/// every positive volume points at line 1, every negative volume at the first
/// line after the positive reference volumes.
pub fn eddy_index(n_positive: usize, n_positive_b0: usize, n_negative: usize) -> Vec<usize> {
    std::iter::repeat(1)
        .take(n_positive)
        .chain(std::iter::repeat(n_positive_b0 + 1).take(n_negative))
        .collect()
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// Render the acquisition-parameter lines, positive polarity first.
pub fn acqparams_text(readout_time: f64, n_positive: usize, n_negative: usize) -> String {
    let mut text = String::new();
    let lines = std::iter::repeat(Polarity::Positive)
        .take(n_positive)
        .chain(std::iter::repeat(Polarity::Negative).take(n_negative));
    for polarity in lines {
        let [x, y, z] = polarity.phase_encode();
        let _ = writeln!(text, "{} {} {} {}", x, y, z, readout_time);
    }
    text
}

pub fn write_acqparams<P: AsRef<Path>>(path: P, readout_time: f64, n_positive: usize, n_negative: usize) -> Result<()> {
    write_text(path.as_ref(), &acqparams_text(readout_time, n_positive, n_negative))
}

/// One integer per line.
pub fn write_indices<P: AsRef<Path>>(path: P, indices: &[usize]) -> Result<()> {
    let mut text = String::new();
    for i in indices {
        let _ = writeln!(text, "{}", i);
    }
    write_text(path.as_ref(), &text)
}

pub fn write_slspec<P: AsRef<Path>>(path: P, order: &[usize]) -> Result<()> {
    write_indices(path, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_one_reference_per_polarity() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("acq_scan_0.txt");
        write_acqparams(&path, 0.05, 1, 1)?;
        assert_eq!(std::fs::read_to_string(&path)?, "0 1 0 0.05\n0 -1 0 0.05\n");
        Ok(())
    }

    #[test]
    fn test_positive_lines_come_first() {
        let text = acqparams_text(0.0342, 2, 3);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[..2].iter().all(|l| *l == "0 1 0 0.0342"));
        assert!(lines[2..].iter().all(|l| *l == "0 -1 0 0.0342"));
    }

    #[test]
    fn test_eddy_index_layout() {
        assert_eq!(eddy_index(3, 2, 2), vec![1, 1, 1, 3, 3]);
        assert!(eddy_index(0, 0, 0).is_empty());
    }

    #[test]
    fn test_slice_order_is_argsort() {
        assert_eq!(slice_order(&[0.0, 0.5, 0.25, 0.75]), vec![0, 2, 1, 3]);
        assert_eq!(slice_order(&[0.1, 0.0, 0.1]), vec![1, 0, 2]);
    }

    #[test]
    fn test_metadata_fields() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"TotalReadoutTime": 0.0501, "SliceTiming": [0.0, 1.0, 0.5],
                "PhaseEncodingDirection": "j-", "Manufacturer": "X"}"#,
        )?;
        let meta = read_metadata(&path)?;
        assert_eq!(meta.total_readout_time, Some(0.0501));
        assert_eq!(meta.slice_order(), Some(vec![0, 2, 1]));
        assert_eq!(meta.phase_encoding_direction.as_deref(), Some("j-"));
        Ok(())
    }

    #[test]
    fn test_missing_readout_time_is_absent() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("run.json");
        std::fs::write(&path, "{}")?;
        let meta = read_metadata(&path)?;
        assert_eq!(meta.total_readout_time, None);
        assert_eq!(meta.slice_order(), None);
        Ok(())
    }
}
