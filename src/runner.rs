//! Invocation flow
//!
//! `exec` walks `Start → ConfigLoaded → HostResolved → CommandComposed →
//! Executed → Reported`. Any error ends the walk and is reported in the
//! same record shape; nothing after the failing step runs.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::{compose, effective_workdir};
use crate::config::{load_config, Args, Command, Config};
use crate::error::{JumpSshError, Result};
use crate::hosts::resolve;
use crate::report::{ExecutionResult, HostList, Report, RequestContext};
use crate::ssh::{BastionExecutor, CommandOutput, RemoteExecutor};

/// A single `exec` request from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Requested host name, matched case-insensitively
    pub host: String,

    /// Raw command
    pub command: String,

    /// Explicit working directory
    pub workdir: Option<String>,

    /// Command timeout override in seconds
    pub timeout_secs: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(host: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
            workdir: None,
            timeout_secs: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Steps of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ConfigLoaded,
    HostResolved,
    CommandComposed,
    Executed,
    Reported,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::ConfigLoaded => "config loaded",
            Stage::HostResolved => "host resolved",
            Stage::CommandComposed => "command composed",
            Stage::Executed => "executed",
            Stage::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Run the parsed command line
pub async fn run(args: Args) -> Report {
    let path = args.config_path();
    let config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("failed at {}: {}", Stage::Start, e);
            return ExecutionResult::failed(&e, RequestContext::default()).into();
        }
    };
    debug!("Stage: {}", Stage::ConfigLoaded);

    match args.command {
        Command::List => run_list(&config),
        Command::Exec {
            host,
            cmd,
            workdir,
            timeout,
        } => {
            let request = ExecutionRequest {
                host,
                command: cmd,
                workdir,
                timeout_secs: timeout,
            };
            let executor = BastionExecutor::new(&config);
            run_exec(&config, &request, &executor).await.into()
        }
    }
}

/// `list`: the whitelist in configured order
pub fn run_list(config: &Config) -> Report {
    HostList::new(config.allowed_hosts.clone()).into()
}

/// `exec`: resolve, compose, execute, report
///
/// The whitelist check happens before `executor` is touched.
pub async fn run_exec<E>(config: &Config, request: &ExecutionRequest, executor: &E) -> ExecutionResult
where
    E: RemoteExecutor + ?Sized,
{
    let mut context = RequestContext::default();
    let mut stage = Stage::ConfigLoaded;

    let result = match exec_steps(config, request, executor, &mut context, &mut stage).await {
        Ok(output) => {
            info!("'{}' succeeded", request.host);
            ExecutionResult::succeeded(context, &output)
        }
        Err(e) => {
            warn!("failed after {}: {}", stage, e);
            ExecutionResult::failed(&e, context)
        }
    };
    debug!("Stage: {}", Stage::Reported);
    result
}

async fn exec_steps<E>(
    config: &Config,
    request: &ExecutionRequest,
    executor: &E,
    context: &mut RequestContext,
    stage: &mut Stage,
) -> Result<CommandOutput>
where
    E: RemoteExecutor + ?Sized,
{
    let host = resolve(&request.host, &config.allowed_hosts)?;
    context.host = Some(host.clone());
    *stage = Stage::HostResolved;

    let command = compose(host, &request.command, request.workdir.as_deref())?;
    context.workdir = effective_workdir(host, request.workdir.as_deref()).map(str::to_string);
    context.command = Some(command.clone());
    *stage = Stage::CommandComposed;
    debug!("Composed command for '{}': {}", host.name, command);

    let limit = match request.timeout_secs {
        Some(0) => return Err(JumpSshError::invalid_request("--timeout must be positive")),
        Some(secs) => Duration::from_secs(secs),
        None => config.timeouts.command,
    };

    let output = executor.execute(host, &command, limit).await?;
    *stage = Stage::Executed;

    match output.exit_code {
        Some(code) if code != 0 => Err(JumpSshError::RemoteCommand {
            exit_code: code,
            output: output.combined_output(),
        }),
        _ => Ok(output),
    }
}
