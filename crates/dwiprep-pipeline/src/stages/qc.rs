//! Quality-control tables for one subject or session.
//!
//! Three CSV files are written under the session's QC folder: an artifact
//! inventory, within-subject overlap scores and template overlap scores.
//! Measurement problems are recorded as `ERROR` rows instead of failing the
//! stage, so a partially processed subject still gets a report.

use super::{eddy, skullstrip, topup, StageContext};
use crate::discovery::{find_first, Session, SessionDirs};
use crate::Cpu;
use dwiprep_io::write_table;
use dwiprep_registration::quality::{measure_overlap_files, overall_status};
use dwiprep_registration::within::WithinOutputs;
use dwiprep_registration::{Confidence, OverlapReport, QcStatus, Result, TemplateOutputs};
use std::path::{Path, PathBuf};

pub const EXISTENCE_FILE: &str = "file_existance.csv";
pub const WITHIN_FILE: &str = "within_subject_registraction_qc.csv";
pub const TEMPLATE_FILE: &str = "template_registraction_qc.csv";

pub(crate) fn is_done(dirs: &SessionDirs) -> bool {
    dirs.qc.join(TEMPLATE_FILE).exists()
}

/// Outcome of one overlap check.
#[derive(Debug, Clone, PartialEq)]
pub struct TagResult {
    pub tag: String,
    pub status: QcStatus,
    pub dice: Option<f64>,
    pub confidence: Option<Confidence>,
    pub offset_mm: Option<f64>,
}

impl TagResult {
    fn measured(tag: &str, report: OverlapReport) -> Self {
        Self {
            tag: tag.to_string(),
            status: report.status,
            dice: report.dice,
            confidence: Some(report.confidence),
            offset_mm: report.offset_mm,
        }
    }

    fn status_only(tag: &str, status: QcStatus) -> Self {
        Self {
            tag: tag.to_string(),
            status,
            dice: None,
            confidence: None,
            offset_mm: None,
        }
    }

    fn cells(&self) -> [String; 4] {
        [
            self.status.to_string(),
            self.dice.map(|d| format!("{:.4}", d)).unwrap_or_default(),
            self.confidence.map(|c| c.to_string()).unwrap_or_default(),
            self.offset_mm.map(|o| format!("{:.2}", o)).unwrap_or_default(),
        ]
    }
}

/// Header and single data row of a registration table.
pub fn registration_table(session: &Session, results: &[TagResult]) -> (Vec<String>, Vec<String>) {
    let mut headers = vec!["subject_id".to_string(), "session".to_string()];
    let mut row = vec![session.subject.clone(), session.session_or_empty().to_string()];
    for result in results {
        for column in ["status", "dice", "confidence", "offset_mm"] {
            headers.push(format!("{}_{}", result.tag, column));
        }
        row.extend(result.cells());
    }
    headers.push("overall_status".to_string());
    row.push(overall_status(results.iter().map(|r| r.status)).to_string());
    (headers, row)
}

fn measure(ctx: &StageContext, tag: &str, registered: &Path, target: &Path) -> TagResult {
    for path in [registered, target] {
        if !path.exists() {
            tracing::warn!("{}: {} is missing", tag, path.display());
            return TagResult::status_only(tag, QcStatus::Error);
        }
    }
    match measure_overlap_files::<Cpu>(registered, target, &ctx.config.qc, &ctx.device) {
        Ok(report) => {
            tracing::info!("{}: {} (dice {:?}, {})", tag, report.status, report.dice, report.confidence);
            TagResult::measured(tag, report)
        }
        Err(err) => {
            tracing::error!("{}: overlap measurement failed: {}", tag, err);
            TagResult::status_only(tag, QcStatus::Error)
        }
    }
}

/// Overlap of each aligned run's reference with run 0's.
pub fn within_results(ctx: &StageContext, dirs: &SessionDirs) -> Vec<TagResult> {
    let runs = ctx.config.acquisition.runs_per_session;
    if runs < 2 {
        return vec![TagResult::status_only("within", QcStatus::Skip)];
    }
    let outputs = WithinOutputs::new(&dirs.reg_within);
    let target = skullstrip::brain(&dirs.skull_strip, 0);
    (1..runs)
        .map(|i| measure(ctx, &format!("run{i}"), &outputs.reference(i), &target))
        .collect()
}

/// Overlap of the rigid and affine outputs with the template.
pub fn template_results(ctx: &StageContext, dirs: &SessionDirs) -> Vec<TagResult> {
    ["rigid", "affine"]
        .into_iter()
        .map(|tag| {
            let tiers = vec![format!("*b0_reg_{tag}.nii.gz"), format!("*b0*reg*{tag}.nii.gz")];
            match find_first(&dirs.reg_template, &tiers) {
                Ok(registered) => measure(ctx, tag, &registered, &ctx.config.paths.template),
                Err(err) => {
                    tracing::warn!("{}: {}", tag, err);
                    TagResult::status_only(tag, QcStatus::Error)
                }
            }
        })
        .collect()
}

/// Every artifact the stages should have produced, with its stage name.
pub fn expected_artifacts(ctx: &StageContext, dirs: &SessionDirs) -> Vec<(&'static str, PathBuf)> {
    let mut files = Vec::new();
    for n in 0..ctx.config.acquisition.runs_per_session {
        files.push(("topup", topup::unwarped(&dirs.b0_correction, n)));
        files.push(("topup", topup::acqparams(&dirs.b0_correction, n)));
        files.push(("skull-strip", skullstrip::brain(&dirs.skull_strip, n)));
        files.push(("skull-strip", skullstrip::mask(&dirs.skull_strip, n)));
        files.push(("eddy", eddy::corrected(&dirs.eddy, n)));
        files.push(("eddy", eddy::rotated_bvecs(&dirs.eddy, n)));
    }
    let combined = WithinOutputs::new(&dirs.reg_within).combined();
    for path in [combined.image, combined.bval, combined.bvec] {
        files.push(("reg-within", path));
    }
    let template = TemplateOutputs::new(&dirs.reg_template);
    for path in template.all() {
        files.push(("reg-template", path.to_path_buf()));
    }
    files
}

fn write_existence(ctx: &StageContext, session: &Session, dirs: &SessionDirs) -> Result<usize> {
    let headers: Vec<String> = ["subject_id", "session", "stage", "file", "status"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let mut missing = 0;
    let rows: Vec<Vec<String>> = expected_artifacts(ctx, dirs)
        .into_iter()
        .map(|(stage, path)| {
            let status = if path.exists() {
                QcStatus::Pass
            } else {
                missing += 1;
                QcStatus::Fail
            };
            vec![
                session.subject.clone(),
                session.session_or_empty().to_string(),
                stage.to_string(),
                path.display().to_string(),
                status.to_string(),
            ]
        })
        .collect();
    write_table(dirs.qc.join(EXISTENCE_FILE), &headers, &rows)?;
    Ok(missing)
}

pub(crate) fn run(ctx: &StageContext, session: &Session, dirs: &SessionDirs) -> Result<()> {
    std::fs::create_dir_all(&dirs.qc)?;

    let missing = write_existence(ctx, session, dirs)?;
    if missing > 0 {
        tracing::warn!("{} expected artifacts missing for {}", missing, session.label());
    }

    let within = within_results(ctx, dirs);
    let (headers, row) = registration_table(session, &within);
    write_table(dirs.qc.join(WITHIN_FILE), &headers, &[row])?;

    let template = template_results(ctx, dirs);
    let (headers, row) = registration_table(session, &template);
    write_table(dirs.qc.join(TEMPLATE_FILE), &headers, &[row])?;

    tracing::info!(
        "QC for {}: within {}, template {}",
        session.label(),
        overall_status(within.iter().map(|r| r.status)),
        overall_status(template.iter().map(|r| r.status))
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_columns_per_tag() {
        let session = Session::new("sub-01", Some("2021-01-01".into()));
        let results = vec![
            TagResult {
                tag: "rigid".into(),
                status: QcStatus::Pass,
                dice: Some(0.91234),
                confidence: Some(Confidence::Normal),
                offset_mm: None,
            },
            TagResult {
                tag: "affine".into(),
                status: QcStatus::Warning,
                dice: None,
                confidence: Some(Confidence::Degraded),
                offset_mm: Some(3.5),
            },
        ];
        let (headers, row) = registration_table(&session, &results);
        assert_eq!(headers[2..6], ["rigid_status", "rigid_dice", "rigid_confidence", "rigid_offset_mm"]);
        assert_eq!(row[2..6], ["PASS", "0.9123", "normal", ""]);
        assert_eq!(row[6..10], ["WARNING", "", "degraded", "3.50"]);
        assert_eq!(headers.last().map(String::as_str), Some("overall_status"));
        assert_eq!(row.last().map(String::as_str), Some("WARNING"));
    }

    #[test]
    fn test_error_fails_overall() {
        let session = Session::new("sub-01", None);
        let results = vec![
            TagResult::status_only("run1", QcStatus::Pass),
            TagResult::status_only("run2", QcStatus::Error),
        ];
        let (_, row) = registration_table(&session, &results);
        assert_eq!(row[1], "");
        assert_eq!(row.last().map(String::as_str), Some("FAIL"));
    }
}
