use std::process::ExitCode;

fn main() -> ExitCode {
    signflow_cli::run()
}
