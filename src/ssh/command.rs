//! Command output and exec-channel collection
//!
//! Provides the `CommandOutput` struct and output collection for commands run
//! on a plain exec channel (targets reached by direct address).

use std::time::Duration;

use russh::client::{self, Handle};
use russh::{Channel, ChannelMsg};
use tokio::time::timeout;
use tracing::debug;

use super::handler::SshHandler;
use super::terminal::tail;
use crate::error::{JumpSshError, Result};

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command (empty when run on a PTY)
    pub stderr: String,

    /// Exit code of the command (if available)
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Output with exit status 0
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Check if the command succeeded (exit code 0 or no exit code available)
    pub fn success(&self) -> bool {
        self.exit_code.is_none_or(|code| code == 0)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stdout.ends_with('\n') {
            format!("{}{}", self.stdout, self.stderr)
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run `command` on a new exec channel and collect its output
///
/// Opening the channel counts against `limit` as well.
///
/// # Returns
/// * `Ok(CommandOutput)` - Output and exit status
/// * `Err(JumpSshError::Timeout)` - If the command outlives `limit`
/// * `Err(JumpSshError::SessionIo)` - If the channel fails, closes without
///   an exit status, or the command is killed by a signal
pub async fn exec_on_channel(
    handle: &Handle<SshHandler>,
    command: &str,
    limit: Duration,
) -> Result<CommandOutput> {
    match timeout(limit, exec_and_collect(handle, command)).await {
        Ok(output) => output,
        Err(_) => Err(JumpSshError::timeout(
            "waiting for the remote command",
            limit.as_secs(),
        )),
    }
}

async fn exec_and_collect(handle: &Handle<SshHandler>, command: &str) -> Result<CommandOutput> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| JumpSshError::session_io(format!("Failed to open channel: {}", e)))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| JumpSshError::session_io(format!("Failed to exec command: {}", e)))?;

    collect_channel_output(channel).await
}

/// Collect output from a channel until it closes
async fn collect_channel_output(mut channel: Channel<client::Msg>) -> Result<CommandOutput> {
    let mut collector = OutputCollector::default();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => collector.stdout(&data),
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    collector.stderr(&data);
                } else {
                    collector.stdout(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => collector.exit_status(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                return Err(JumpSshError::session_io(format!(
                    "remote command killed by signal {:?}",
                    signal_name
                )));
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    collector.finish()
}

/// Raw exec-channel output, decoded once the channel has ended
///
/// Bytes are kept as received so multibyte characters split across packets
/// survive.
#[derive(Debug, Default)]
struct OutputCollector {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
}

impl OutputCollector {
    fn stdout(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
    }

    fn stderr(&mut self, data: &[u8]) {
        self.stderr.extend_from_slice(data);
    }

    fn exit_status(&mut self, code: u32) {
        self.exit_code = Some(code);
    }

    /// A channel that ended without an exit status lost its session
    fn finish(self) -> Result<CommandOutput> {
        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_code: self.exit_code,
        };

        if output.exit_code.is_none() {
            return Err(JumpSshError::session_io(format!(
                "channel closed without exit status, last output: {:?}",
                tail(&output.combined_output())
            )));
        }

        debug!(
            "Command completed: exit_code={:?}, stdout_len={}, stderr_len={}",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }
}
