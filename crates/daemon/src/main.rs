use std::process::ExitCode;

use clap::Parser;

use hgcs_daemon::Args;

fn main() -> ExitCode {
    let args = Args::parse();
    match hgcs_daemon::run(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("hgcs: {err:#}");
            ExitCode::FAILURE
        }
    }
}
