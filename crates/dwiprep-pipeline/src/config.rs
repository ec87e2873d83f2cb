//! Pipeline configuration.
//!
//! One immutable [`PipelineConfig`] is loaded at startup and handed by
//! reference to every stage. Every field has a default, so a TOML file only
//! needs the values that differ.

use dwiprep_core::diffusion::DEFAULT_B0_THRESHOLD;
use dwiprep_io::Polarity;
use dwiprep_registration::backend::NativeSettings;
use dwiprep_registration::{QcThresholds, RegistrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "DWIPREP_CONFIG";

/// File looked for in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "dwiprep.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rerun stages whose outputs already exist.
    pub force_reprocess: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Subjects processed concurrently by `dwiprep batch`.
    pub workers: usize,
    pub paths: PathsConfig,
    pub acquisition: AcquisitionConfig,
    pub tools: ToolsConfig,
    pub registration: RegistrationConfig,
    pub skull_strip: SkullStripConfig,
    pub eddy: EddyConfig,
    pub qc: QcThresholds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            force_reprocess: false,
            log_level: "info".to_string(),
            workers: 1,
            paths: PathsConfig::default(),
            acquisition: AcquisitionConfig::default(),
            tools: ToolsConfig::default(),
            registration: RegistrationConfig::default(),
            skull_strip: SkullStripConfig::default(),
            eddy: EddyConfig::default(),
            qc: QcThresholds::default(),
        }
    }
}

/// Input location and per-stage output folders.
///
/// Stage folders are joined onto `output_dir` unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    /// Folder below each subject (or session) holding the raw runs.
    pub input_subdir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub b0_correction: PathBuf,
    pub skull_strip: PathBuf,
    pub eddy: PathBuf,
    pub reg_within: PathBuf,
    pub reg_template: PathBuf,
    pub qc: PathBuf,
    pub template: PathBuf,
    /// topup profile for grids with even dimensions.
    pub topup_config: String,
    /// topup profile when any spatial dimension is odd.
    pub topup_config_odd: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            input_subdir: Some(PathBuf::from("unprocessed/Diffusion")),
            output_dir: PathBuf::from("output"),
            b0_correction: PathBuf::from("B0_correction"),
            skull_strip: PathBuf::from("Skull_stripping"),
            eddy: PathBuf::from("Eddy_correction"),
            reg_within: PathBuf::from("Reg_within_and_merged"),
            reg_template: PathBuf::from("Reg_MNI"),
            qc: PathBuf::from("QC"),
            template: PathBuf::from("tpl-MNI152NLin2009cAsym_res-01_desc-brain_T1w.nii.gz"),
            topup_config: "b02b0.cnf".to_string(),
            topup_config_odd: "b02b0_1.cnf".to_string(),
        }
    }
}

impl PathsConfig {
    fn stage(&self, folder: &Path) -> PathBuf {
        self.output_dir.join(folder)
    }

    pub fn b0_correction_root(&self) -> PathBuf {
        self.stage(&self.b0_correction)
    }

    pub fn skull_strip_root(&self) -> PathBuf {
        self.stage(&self.skull_strip)
    }

    pub fn eddy_root(&self) -> PathBuf {
        self.stage(&self.eddy)
    }

    pub fn reg_within_root(&self) -> PathBuf {
        self.stage(&self.reg_within)
    }

    pub fn reg_template_root(&self) -> PathBuf {
        self.stage(&self.reg_template)
    }

    pub fn qc_root(&self) -> PathBuf {
        self.stage(&self.qc)
    }
}

/// Candidate glob patterns for the four files of one run.
///
/// Each list is an ordered set of tiers: the first pattern that matches
/// anything wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPatterns {
    pub dwi: Vec<String>,
    pub bval: Vec<String>,
    pub bvec: Vec<String>,
    pub json: Vec<String>,
}

impl RunPatterns {
    /// Strict name first, then a relaxed fallback.
    fn tiered(label: &str, polarity: Polarity) -> Self {
        let p = polarity.label();
        let tiers = |ext: &str| {
            vec![
                format!("*_dMRI_{label}_{p}.{ext}"),
                format!("*{label}*{p}*.{ext}"),
            ]
        };
        Self {
            dwi: tiers("nii.gz"),
            bval: tiers("bval"),
            bvec: tiers("bvec"),
            json: tiers("json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Strength below which a volume is a b0 reference.
    pub b0_threshold: f64,
    pub runs_per_session: usize,
    /// Per run index, positive polarity.
    pub positive: Vec<RunPatterns>,
    /// Per run index, negative polarity.
    pub negative: Vec<RunPatterns>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        let labels = ["dir98", "dir99"];
        Self {
            b0_threshold: DEFAULT_B0_THRESHOLD,
            runs_per_session: labels.len(),
            positive: labels.iter().map(|l| RunPatterns::tiered(l, Polarity::Positive)).collect(),
            negative: labels.iter().map(|l| RunPatterns::tiered(l, Polarity::Negative)).collect(),
        }
    }
}

impl AcquisitionConfig {
    pub fn patterns(&self, run: usize, polarity: Polarity) -> Option<&RunPatterns> {
        match polarity {
            Polarity::Positive => self.positive.get(run),
            Polarity::Negative => self.negative.get(run),
        }
    }
}

/// External programs and how to call them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub flirt: PathBuf,
    pub topup: PathBuf,
    pub eddy: PathBuf,
    pub bet: PathBuf,
    /// Per-invocation limit; absent means wait indefinitely.
    pub timeout_seconds: Option<u64>,
    pub env: BTreeMap<String, String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("FSLOUTPUTTYPE".to_string(), "NIFTI_GZ".to_string());
        Self {
            flirt: PathBuf::from("flirt"),
            topup: PathBuf::from("topup"),
            eddy: PathBuf::from("eddy"),
            bet: PathBuf::from("bet"),
            timeout_seconds: Some(24 * 3600),
            env,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Fsl,
    Native,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub backend: BackendKind,
    pub native: NativeSettings,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fsl,
            native: NativeSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkullStripConfig {
    /// BET `-f`; smaller values give a larger brain outline.
    pub fractional_intensity: f64,
    pub brain_volume_min_ml: f64,
    pub brain_volume_max_ml: f64,
}

impl Default for SkullStripConfig {
    fn default() -> Self {
        Self {
            fractional_intensity: 0.4,
            brain_volume_min_ml: 800.0,
            brain_volume_max_ml: 2000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EddyConfig {
    pub slice_to_slice: bool,
    /// Sidecar whose `SliceTiming` is used when a run's own has none.
    pub fallback_slice_timing: Option<PathBuf>,
}

impl Default for EddyConfig {
    fn default() -> Self {
        Self {
            slice_to_slice: true,
            fallback_slice_timing: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| RegistrationError::invalid_configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RegistrationError::invalid_configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// `explicit`, else `$DWIPREP_CONFIG`, else `./dwiprep.toml`, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::load(local);
        }
        tracing::debug!("No configuration file found; using defaults");
        Ok(Self::default())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RegistrationError::invalid_configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(RegistrationError::invalid_configuration(msg));
        let acq = &self.acquisition;
        if acq.runs_per_session == 0 {
            return fail("acquisition.runs_per_session must be at least 1".into());
        }
        if acq.positive.len() != acq.runs_per_session || acq.negative.len() != acq.runs_per_session {
            return fail(format!(
                "acquisition has {} positive and {} negative pattern sets for {} runs",
                acq.positive.len(),
                acq.negative.len(),
                acq.runs_per_session
            ));
        }
        if !(acq.b0_threshold.is_finite() && acq.b0_threshold > 0.0) {
            return fail(format!("acquisition.b0_threshold must be positive, got {}", acq.b0_threshold));
        }
        if !(0.0..=1.0).contains(&self.qc.warning) || self.qc.warning > self.qc.pass || self.qc.pass > 1.0 {
            return fail(format!(
                "qc thresholds must satisfy 0 <= warning <= pass <= 1 (warning {}, pass {})",
                self.qc.warning, self.qc.pass
            ));
        }
        if !(0.0..1.0).contains(&self.skull_strip.fractional_intensity) {
            return fail("skull_strip.fractional_intensity must lie in [0, 1)".into());
        }
        if self.skull_strip.brain_volume_min_ml > self.skull_strip.brain_volume_max_ml {
            return fail("skull_strip brain volume range is empty".into());
        }
        if self.workers == 0 {
            return fail("workers must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = PipelineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            force_reprocess = true

            [acquisition]
            b0_threshold = 100.0

            [registration]
            backend = "native"

            [registration.native]
            iterations = 20
            "#,
        )
        .unwrap();
        assert!(config.force_reprocess);
        assert_eq!(config.acquisition.b0_threshold, 100.0);
        assert_eq!(config.acquisition.runs_per_session, 2);
        assert_eq!(config.registration.backend, BackendKind::Native);
        assert_eq!(config.registration.native.iterations, 20);
        assert_eq!(config.registration.native.pyramid_levels, 3);
        assert_eq!(config.qc.pass, 0.8);
        assert_eq!(config.tools.env.get("FSLOUTPUTTYPE").map(String::as_str), Some("NIFTI_GZ"));
    }

    #[test]
    fn test_pattern_count_must_match_runs() {
        let err = PipelineConfig::from_toml_str("[acquisition]\nruns_per_session = 3\n").unwrap_err();
        assert_eq!(err.kind(), dwiprep_registration::ErrorKind::Configuration);
    }

    #[test]
    fn test_inverted_qc_thresholds_rejected() {
        assert!(PipelineConfig::from_toml_str("[qc]\npass = 0.6\nwarning = 0.7\n").is_err());
    }

    #[test]
    fn test_stage_roots() {
        let mut config = PipelineConfig::default();
        config.paths.output_dir = PathBuf::from("/data/out");
        assert_eq!(config.paths.eddy_root(), PathBuf::from("/data/out/Eddy_correction"));
        config.paths.qc = PathBuf::from("/elsewhere/QC");
        assert_eq!(config.paths.qc_root(), PathBuf::from("/elsewhere/QC"));
    }

    #[test]
    fn test_default_patterns() {
        let acq = AcquisitionConfig::default();
        let pa = acq.patterns(1, Polarity::Negative).unwrap();
        assert_eq!(pa.dwi[0], "*_dMRI_dir99_PA.nii.gz");
        assert_eq!(pa.json[1], "*dir99*PA*.json");
        assert!(acq.patterns(2, Polarity::Positive).is_none());
    }
}
