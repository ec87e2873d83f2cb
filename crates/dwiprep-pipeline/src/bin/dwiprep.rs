use std::process::ExitCode;

fn main() -> ExitCode {
    dwiprep_pipeline::cli::main()
}
