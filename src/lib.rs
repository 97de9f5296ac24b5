//! jump-ssh - Whitelisted remote command execution through a bastion host
//!
//! This crate lets an automated agent run shell commands on a fixed set of
//! pre-approved servers that are only reachable through a JumpServer-style
//! bastion. The agent names a host; it never sees credentials and cannot
//! reach anything that is not on the whitelist.
//!
//! # Flow
//!
//! 1. Load the YAML configuration (bastion credentials, allowed hosts)
//! 2. Resolve the requested host name against the whitelist
//! 3. Compose the remote command (`cd <dir> && ...` when a workdir applies)
//! 4. Log into the bastion and reach the target, by menu search or tunnel
//! 5. Print one JSON result; exit non-zero on failure
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! jump-ssh list
//! jump-ssh exec --host VM-4-13 --cmd "git pull"
//! jump-ssh --config ./config.yaml exec --host VM-4-13 --workdir /opt/app --cmd "ls"
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod hosts;
pub mod report;
pub mod runner;
pub mod ssh;

// Re-exports for convenience
pub use command::{compose, effective_workdir};
pub use config::{load_config, Args, BastionCredentials, Config, Timeouts};
pub use error::{JumpSshError, Result};
pub use hosts::{resolve, AllowedHost, Selector};
pub use report::{ExecutionResult, HostList, Report, RequestContext};
pub use runner::{run, run_exec, run_list, ExecutionRequest};
pub use ssh::{BastionExecutor, CommandOutput, RemoteExecutor};
