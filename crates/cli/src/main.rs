use std::process::ExitCode;

fn main() -> ExitCode {
    sokoni_cli::run()
}
