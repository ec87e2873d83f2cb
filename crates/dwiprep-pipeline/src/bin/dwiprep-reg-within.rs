use dwiprep_pipeline::Stage;
use std::process::ExitCode;

fn main() -> ExitCode {
    dwiprep_pipeline::cli::stage_main(Stage::RegWithin)
}
