//! jump-ssh - Entry point
//!
//! Parses CLI arguments, runs one `list` or `exec`, prints the JSON record on
//! stdout and exits non-zero when it reports a failure.

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jump_ssh::config::Args;
use jump_ssh::report::{ExecutionResult, Report, RequestContext};
use jump_ssh::JumpSshError;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only the JSON record
    let filter = EnvFilter::try_from_env("JUMP_SSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let report = match Args::try_parse() {
        Ok(args) => jump_ssh::run(args).await,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let err = JumpSshError::invalid_request(e.to_string().trim().to_string());
            Report::from(ExecutionResult::failed(&err, RequestContext::default()))
        }
    };

    println!("{}", report.to_json());

    if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
