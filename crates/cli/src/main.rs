use std::process::ExitCode;

fn main() -> ExitCode {
    leasecheck_cli::run()
}
