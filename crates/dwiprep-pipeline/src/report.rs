//! Batch summary and `registration_report.json`.

use crate::stages::{Stage, StageOutcome};
use anyhow::Context;
use chrono::{DateTime, Local};
use dwiprep_registration::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "registration_report.json";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `1h 2m 3s`, `2m 3s` or `3s`; fractions are truncated.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

/// Every stage outcome of one subject, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectResult {
    pub subject: String,
    pub outcomes: Vec<StageOutcome>,
    pub elapsed_seconds: f64,
}

impl SubjectResult {
    pub fn first_failure(&self) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.is_failure())
    }

    pub fn succeeded(&self) -> bool {
        self.first_failure().is_none()
    }
}

/// Outcome of a whole batch. Built once, after every subject has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub start_time: String,
    pub end_time: String,
    pub stages: Vec<Stage>,
    pub total_subjects: usize,
    pub successful_subjects: Vec<String>,
    /// Subjects that failed for any reason other than missing inputs.
    pub failed_subjects: Vec<String>,
    pub missing_subjects: Vec<String>,
    /// First failure per subject, as `stage: message`.
    pub errors: BTreeMap<String, String>,
    pub processing_times: BTreeMap<String, f64>,
    pub average_processing_time: Option<f64>,
    /// Percentage of processed subjects that succeeded.
    pub success_rate: Option<f64>,
    pub results: Vec<SubjectResult>,
}

impl BatchSummary {
    pub fn new(started: DateTime<Local>, finished: DateTime<Local>, stages: &[Stage], results: Vec<SubjectResult>) -> Self {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut missing = Vec::new();
        let mut errors = BTreeMap::new();
        let mut times = BTreeMap::new();

        for result in &results {
            times.insert(result.subject.clone(), result.elapsed_seconds);
            match result.first_failure() {
                None => successful.push(result.subject.clone()),
                Some(outcome) => {
                    let message = outcome.error.clone().unwrap_or_default();
                    errors.insert(result.subject.clone(), format!("{}: {}", outcome.stage, message));
                    if outcome.error_kind == Some(ErrorKind::MissingInput) {
                        missing.push(result.subject.clone());
                    } else {
                        failed.push(result.subject.clone());
                    }
                }
            }
        }

        let processed = successful.len() + failed.len();
        let success_rate = if processed > 0 {
            Some(successful.len() as f64 / processed as f64 * 100.0)
        } else if !results.is_empty() {
            Some(0.0)
        } else {
            None
        };
        let average = (!times.is_empty()).then(|| times.values().sum::<f64>() / times.len() as f64);

        Self {
            start_time: started.format(TIME_FORMAT).to_string(),
            end_time: finished.format(TIME_FORMAT).to_string(),
            stages: stages.to_vec(),
            total_subjects: results.len(),
            successful_subjects: successful,
            failed_subjects: failed,
            missing_subjects: missing,
            errors,
            processing_times: times,
            average_processing_time: average,
            success_rate,
            results,
        }
    }

    /// Exit status for the batch command.
    pub fn all_succeeded(&self) -> bool {
        self.successful_subjects.len() == self.total_subjects
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE);
        let text = serde_json::to_string_pretty(self).context("Failed to serialize batch report")?;
        std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
        Ok(path)
    }

    pub fn log(&self) {
        tracing::info!(
            "Batch finished: {} subjects, {} succeeded, {} failed, {} missing inputs",
            self.total_subjects,
            self.successful_subjects.len(),
            self.failed_subjects.len(),
            self.missing_subjects.len()
        );
        if let Some(rate) = self.success_rate {
            tracing::info!("Success rate: {:.2}%", rate);
        }
        if let Some(average) = self.average_processing_time {
            tracing::info!("Average time per subject: {}", format_duration(average));
        }
        for (subject, error) in &self.errors {
            tracing::warn!("{}: {}", subject, error);
        }
    }
}
