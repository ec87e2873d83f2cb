//! Command-line front ends.
//!
//! `dwiprep` runs whole batches or single stages; the `dwiprep-<stage>`
//! binaries each run one stage for one subject. All of them exit 0 on
//! success and 1 on usage, configuration or processing errors.

use crate::config::{PipelineConfig, DEFAULT_CONFIG_FILE};
use crate::discovery::list_subjects;
use crate::report::BatchSummary;
use crate::stages::{run_stage, run_subject, Stage, StageContext};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Set up logging. `RUST_LOG` wins over the configured level.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    // A subscriber may already be installed when called twice in one process.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Parser, Debug)]
#[command(name = "dwiprep")]
#[command(about = "Diffusion MRI preprocessing: distortion, motion and registration stages")]
pub struct Cli {
    /// Configuration file (default: $DWIPREP_CONFIG, then ./dwiprep.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run stages for many subjects
    Batch {
        /// Subjects to process (default: every folder under the input directory)
        subjects: Vec<String>,

        /// Stages to run, in pipeline order (default: all)
        #[arg(short, long, value_enum, value_delimiter = ',')]
        stages: Vec<Stage>,

        /// Rerun stages whose outputs exist
        #[arg(short, long)]
        force: bool,
    },

    /// Run one stage for one subject
    Stage {
        #[arg(value_enum)]
        stage: Stage,
        subject_id: String,
    },

    /// Write the effective configuration as TOML
    WriteConfig {
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments of the single-stage binaries.
#[derive(Parser, Debug)]
pub struct StageArgs {
    pub subject_id: String,

    /// Configuration file (default: $DWIPREP_CONFIG, then ./dwiprep.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Parse arguments, printing help or usage errors. Usage errors exit 1.
fn parse<P: Parser>() -> Result<P, ExitCode> {
    P::try_parse().map_err(|err| {
        let _ = err.print();
        if err.use_stderr() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    })
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ExitCode> {
    PipelineConfig::resolve(path).map_err(|err| {
        eprintln!("Error: {}", err);
        ExitCode::FAILURE
    })
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Entry point of the `dwiprep-<stage>` binaries.
pub fn stage_main(stage: Stage) -> ExitCode {
    let args = match parse::<StageArgs>() {
        Ok(args) => args,
        Err(code) => return code,
    };
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(code) => return code,
    };
    init_tracing(&config.log_level);
    run_single(StageContext::new(config), stage, &args.subject_id)
}

fn run_single(ctx: StageContext, stage: Stage, subject: &str) -> ExitCode {
    let outcomes = run_stage(&ctx, stage, subject);
    exit_code(outcomes.iter().all(|o| !o.is_failure()))
}

/// Subjects named on the command line, or every subject folder.
fn batch_subjects(config: &PipelineConfig, requested: Vec<String>) -> dwiprep_registration::Result<Vec<String>> {
    if !requested.is_empty() {
        return Ok(requested);
    }
    list_subjects(&config.paths.input_dir)
}

/// Run `stages` for every subject on a pool of `config.workers` threads.
pub fn run_batch(ctx: &StageContext, subjects: &[String], stages: &[Stage]) -> BatchSummary {
    let started = chrono::Local::now();
    tracing::info!(
        "Processing {} subjects with {} workers: {}",
        subjects.len(),
        ctx.config.workers,
        stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );

    let run_all = || -> Vec<_> {
        subjects
            .par_iter()
            .map(|subject| run_subject(ctx, subject, stages))
            .collect()
    };
    let results = match rayon::ThreadPoolBuilder::new().num_threads(ctx.config.workers).build() {
        Ok(pool) => pool.install(run_all),
        Err(err) => {
            tracing::warn!("Cannot build worker pool ({}); using the global pool", err);
            run_all()
        }
    };

    BatchSummary::new(started, chrono::Local::now(), stages, results)
}

fn batch(mut config: PipelineConfig, subjects: Vec<String>, mut stages: Vec<Stage>, force: bool) -> ExitCode {
    config.force_reprocess |= force;
    if stages.is_empty() {
        stages = Stage::ALL.to_vec();
    }
    stages.sort();
    stages.dedup();

    let subjects = match batch_subjects(&config, subjects) {
        Ok(subjects) => subjects,
        Err(err) => {
            tracing::error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    let report_dir = config.paths.output_dir.clone();
    let ctx = StageContext::new(config);

    let summary = run_batch(&ctx, &subjects, &stages);
    summary.log();
    if let Err(err) = summary.write(&report_dir) {
        tracing::error!("{}", err);
        return ExitCode::FAILURE;
    }
    exit_code(summary.all_succeeded())
}

fn write_config(config: &PipelineConfig, output: &Path, force: bool) -> ExitCode {
    if output.exists() && !force {
        eprintln!("Error: {} exists; pass --force to overwrite", output.display());
        return ExitCode::FAILURE;
    }
    let written = config
        .to_toml_string()
        .and_then(|text| std::fs::write(output, text).map_err(Into::into));
    match written {
        Ok(()) => {
            println!("Wrote {}", output.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

/// Entry point of `dwiprep`.
pub fn main() -> ExitCode {
    let cli = match parse::<Cli>() {
        Ok(cli) => cli,
        Err(code) => return code,
    };
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(code) => return code,
    };
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Batch { subjects, stages, force } => batch(config, subjects, stages, force),
        Commands::Stage { stage, subject_id } => run_single(StageContext::new(config), stage, &subject_id),
        Commands::WriteConfig { output, force } => write_config(&config, &output, force),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
        StageArgs::command().debug_assert();
    }

    #[test]
    fn test_batch_stage_list() {
        let cli = Cli::try_parse_from(["dwiprep", "batch", "s1", "s2", "--stages", "reg-within,qc"]).unwrap();
        match cli.command {
            Commands::Batch { subjects, stages, force } => {
                assert_eq!(subjects, vec!["s1", "s2"]);
                assert_eq!(stages, vec![Stage::RegWithin, Stage::Qc]);
                assert!(!force);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stage_requires_subject() {
        let err = Cli::try_parse_from(["dwiprep", "stage", "eddy"]).unwrap_err();
        assert!(err.use_stderr());
        assert!(StageArgs::try_parse_from(["dwiprep-eddy", "sub-01", "--config", "x.toml"]).is_ok());
    }
}
