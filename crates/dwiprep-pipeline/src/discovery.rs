//! Subject, session and run discovery.

use crate::config::{AcquisitionConfig, PipelineConfig};
use chrono::NaiveDate;
use dwiprep_io::Polarity;
use dwiprep_registration::{RegistrationError, Result};
use std::path::{Path, PathBuf};

/// One unit of processing: a subject, or one dated session of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Session {
    pub subject: String,
    pub session: Option<String>,
}

impl Session {
    pub fn new(subject: impl Into<String>, session: Option<String>) -> Self {
        Self {
            subject: subject.into(),
            session,
        }
    }

    /// `root/subject[/session]`.
    pub fn dir(&self, root: &Path) -> PathBuf {
        let dir = root.join(&self.subject);
        match &self.session {
            Some(session) => dir.join(session),
            None => dir,
        }
    }

    pub fn label(&self) -> String {
        match &self.session {
            Some(session) => format!("{}/{}", self.subject, session),
            None => self.subject.clone(),
        }
    }

    /// Session column value in QC tables.
    pub fn session_or_empty(&self) -> &str {
        self.session.as_deref().unwrap_or("")
    }
}

/// `YYYY-MM-DD`, optionally followed by `_anything`.
pub fn is_session_name(name: &str) -> bool {
    let Some(date) = name.get(..10) else {
        return false;
    };
    let rest = &name[10..];
    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() && (rest.is_empty() || rest.starts_with('_'))
}

fn child_dirs(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Dated session folders directly below `subject_dir`, sorted.
pub fn list_sessions(subject_dir: &Path) -> Result<Vec<String>> {
    if !subject_dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(child_dirs(subject_dir)?
        .into_iter()
        .filter(|name| is_session_name(name))
        .collect())
}

/// Sessions of `subject` under `root`; the subject folder itself when it has none.
pub fn subject_sessions(root: &Path, subject: &str) -> Result<Vec<Session>> {
    let sessions = list_sessions(&root.join(subject))?;
    if sessions.is_empty() {
        return Ok(vec![Session::new(subject, None)]);
    }
    tracing::debug!("{} has sessions {:?}", subject, sessions);
    Ok(sessions
        .into_iter()
        .map(|s| Session::new(subject, Some(s)))
        .collect())
}

/// Subject folders under `input_dir`, sorted.
pub fn list_subjects(input_dir: &Path) -> Result<Vec<String>> {
    if !input_dir.is_dir() {
        return Err(RegistrationError::MissingInput(input_dir.to_path_buf()));
    }
    child_dirs(input_dir)
}

/// Stage folders of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDirs {
    pub input: PathBuf,
    pub b0_correction: PathBuf,
    pub skull_strip: PathBuf,
    pub eddy: PathBuf,
    pub reg_within: PathBuf,
    pub reg_template: PathBuf,
    pub qc: PathBuf,
}

impl SessionDirs {
    pub fn new(config: &PipelineConfig, session: &Session) -> Self {
        let paths = &config.paths;
        let mut input = session.dir(&paths.input_dir);
        if let Some(sub) = &paths.input_subdir {
            input = input.join(sub);
        }
        Self {
            input,
            b0_correction: session.dir(&paths.b0_correction_root()),
            skull_strip: session.dir(&paths.skull_strip_root()),
            eddy: session.dir(&paths.eddy_root()),
            reg_within: session.dir(&paths.reg_within_root()),
            reg_template: session.dir(&paths.reg_template_root()),
            qc: session.dir(&paths.qc_root()),
        }
    }
}

/// First file matching the earliest tier that matches anything.
///
/// Within a tier, matches are sorted and the first is taken.
pub fn find_first(dir: &Path, tiers: &[String]) -> Result<PathBuf> {
    let Some(dir_str) = dir.to_str() else {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} is not valid UTF-8",
            dir.display()
        )));
    };
    let base = glob::Pattern::escape(dir_str);

    for (tier, pattern) in tiers.iter().enumerate() {
        let full = format!("{}/{}", base, pattern);
        let paths = glob::glob(&full)
            .map_err(|e| RegistrationError::invalid_configuration(format!("bad pattern {:?}: {}", pattern, e)))?;
        let mut matches: Vec<PathBuf> = paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect();
        if matches.is_empty() {
            continue;
        }
        matches.sort();
        if matches.len() > 1 {
            tracing::warn!(
                "{} files match {:?} in {}; using {}",
                matches.len(),
                pattern,
                dir.display(),
                matches[0].display()
            );
        }
        if tier > 0 {
            tracing::warn!("Pattern tier {} ({:?}) matched in {}", tier, pattern, dir.display());
        } else {
            tracing::debug!("Pattern tier 0 ({:?}) matched in {}", pattern, dir.display());
        }
        return Ok(matches.swap_remove(0));
    }

    let expected = tiers.first().map_or_else(|| dir.to_path_buf(), |p| dir.join(p));
    Err(RegistrationError::MissingInput(expected))
}

/// The four files of one acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    pub dwi: PathBuf,
    pub bval: PathBuf,
    pub bvec: PathBuf,
    pub json: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub index: usize,
    pub polarity: Polarity,
    pub files: RunFiles,
}

/// Locate run `index` of the given polarity in `dir`.
pub fn discover_run(dir: &Path, index: usize, polarity: Polarity, acquisition: &AcquisitionConfig) -> Result<RunRecord> {
    let patterns = acquisition.patterns(index, polarity).ok_or_else(|| {
        RegistrationError::invalid_configuration(format!("no {} patterns for run {}", polarity, index))
    })?;
    let files = RunFiles {
        dwi: find_first(dir, &patterns.dwi)?,
        bval: find_first(dir, &patterns.bval)?,
        bvec: find_first(dir, &patterns.bvec)?,
        json: find_first(dir, &patterns.json)?,
    };
    tracing::info!("Run {} {}: {}", index, polarity, files.dwi.display());
    Ok(RunRecord { index, polarity, files })
}

/// Both polarities of one run index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPair {
    pub index: usize,
    pub positive: RunRecord,
    pub negative: RunRecord,
}

/// Every configured run of a session, in run order.
pub fn discover_runs(dir: &Path, acquisition: &AcquisitionConfig) -> Result<Vec<RunPair>> {
    (0..acquisition.runs_per_session)
        .map(|index| {
            Ok(RunPair {
                index,
                positive: discover_run(dir, index, Polarity::Positive, acquisition)?,
                negative: discover_run(dir, index, Polarity::Negative, acquisition)?,
            })
        })
        .collect()
}
