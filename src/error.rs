//! Error types for jump-ssh

use thiserror::Error;

/// Main error type for jump-ssh
///
/// Every variant is reported to the caller as a failure record; the
/// [`kind`](JumpSshError::kind) string is the stable, machine-readable tag.
#[derive(Debug, Error)]
pub enum JumpSshError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected before anything was composed (e.g. empty command)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested host is not on the whitelist
    #[error("host '{requested}' is not in the allowed list. available: {available:?}")]
    HostNotAllowed {
        requested: String,
        available: Vec<String>,
    },

    /// Bastion unreachable or authentication rejected
    #[error("Bastion connection error: {0}")]
    BastionConnect(String),

    /// Bastion could not locate or reach the target
    #[error("Target resolution error: {0}")]
    TargetResolution(String),

    /// Transport failure during the relayed session
    #[error("Session IO error: {0}")]
    SessionIo(String),

    /// A session step did not complete in time
    #[error("Timed out after {secs}s while {stage}")]
    Timeout { stage: String, secs: u64 },

    /// Command ran but exited non-zero
    #[error("remote command exited with status {exit_code}: {output}")]
    RemoteCommand { exit_code: u32, output: String },
}

/// Result type alias using JumpSshError
pub type Result<T> = std::result::Result<T, JumpSshError>;

impl JumpSshError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        JumpSshError::Config(msg.into())
    }

    /// Create an invalid request error from a string
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        JumpSshError::InvalidRequest(msg.into())
    }

    /// Create a bastion connection error from a string
    pub fn bastion(msg: impl Into<String>) -> Self {
        JumpSshError::BastionConnect(msg.into())
    }

    /// Create a target resolution error from a string
    pub fn target(msg: impl Into<String>) -> Self {
        JumpSshError::TargetResolution(msg.into())
    }

    /// Create a session IO error from a string
    pub fn session_io(msg: impl Into<String>) -> Self {
        JumpSshError::SessionIo(msg.into())
    }

    /// Create a timeout error for the named stage
    pub fn timeout(stage: impl Into<String>, secs: u64) -> Self {
        JumpSshError::Timeout {
            stage: stage.into(),
            secs,
        }
    }

    /// Stable error kind reported as `error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            JumpSshError::Config(_) => "ConfigError",
            JumpSshError::InvalidRequest(_) => "InvalidRequest",
            JumpSshError::HostNotAllowed { .. } => "HostNotAllowedError",
            JumpSshError::BastionConnect(_) => "BastionConnectError",
            JumpSshError::TargetResolution(_) => "TargetResolutionError",
            JumpSshError::SessionIo(_) | JumpSshError::Timeout { .. } => "SessionIOError",
            JumpSshError::RemoteCommand { .. } => "RemoteCommandError",
        }
    }
}
