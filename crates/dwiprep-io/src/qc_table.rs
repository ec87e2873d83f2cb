//! CSV tables for quality-control results.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Overwrite `path` with a header row and `rows`.
pub fn write_table<P: AsRef<Path>>(path: P, headers: &[String], rows: &[Vec<String>]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush().with_context(|| format!("Failed to write {}", path.display()))
}

/// Append one serialized record, writing the header only when the file is new.
pub fn append_record<P: AsRef<Path>, S: Serialize>(path: P, record: &S) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
    writer.serialize(record)?;
    writer.flush().with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_records<P: AsRef<Path>, D: DeserializeOwned>(path: P) -> Result<Vec<D>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .map(|r| r.with_context(|| format!("Malformed row in {}", path.display())))
        .collect()
}
