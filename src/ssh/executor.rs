//! Bastion session executor
//!
//! [`RemoteExecutor`] is the seam between the invocation flow and the
//! network. [`BastionExecutor`] is the real implementation: one bastion
//! session per call, closed on every exit path, and no retries.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::command::{exec_on_channel, CommandOutput};
use super::connection::BastionConnection;
use super::menu::{JumpMenu, MenuTimings};
use super::terminal::Terminal;
use crate::config::{BastionCredentials, Config, Timeouts};
use crate::error::Result;
use crate::hosts::{AllowedHost, Selector};

/// Runs an already-composed command on a whitelisted host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `command` on `host`
    ///
    /// A non-zero exit status is returned as `Ok` with the exit code set;
    /// only transport failures are errors.
    async fn execute(&self, host: &AllowedHost, command: &str, timeout: Duration) -> Result<CommandOutput>;
}

/// Executor that relays through the configured bastion
#[derive(Debug, Clone)]
pub struct BastionExecutor {
    credentials: BastionCredentials,
    timeouts: Timeouts,
}

impl BastionExecutor {
    /// Create an executor from the loaded configuration
    pub fn new(config: &Config) -> Self {
        Self {
            credentials: config.bastion.clone(),
            timeouts: config.timeouts,
        }
    }

    async fn run_via_menu(
        &self,
        bastion: &BastionConnection,
        token: &str,
        command: &str,
        limit: Duration,
    ) -> Result<CommandOutput> {
        let terminal = bastion.open_shell(self.timeouts.expect).await?;
        let timings = MenuTimings::new(self.timeouts.expect);
        run_menu_session(terminal, timings, token, command, marker_id(), limit).await
    }

    async fn run_direct(
        &self,
        bastion: &BastionConnection,
        ip: &str,
        port: u16,
        user: Option<&str>,
        command: &str,
        limit: Duration,
    ) -> Result<CommandOutput> {
        let user = user.unwrap_or(&self.credentials.user);
        let target = bastion
            .open_tunnel(ip, port, user, &self.credentials, self.timeouts.connect)
            .await?;

        let result = exec_on_channel(target.handle(), command, limit)
            .await
            .map(|output| CommandOutput {
                stdout: output.combined_output(),
                stderr: String::new(),
                exit_code: output.exit_code,
            });

        target.close().await;
        result
    }
}

#[async_trait]
impl RemoteExecutor for BastionExecutor {
    async fn execute(&self, host: &AllowedHost, command: &str, timeout: Duration) -> Result<CommandOutput> {
        info!("Executing on '{}' via {}", host.name, host.selector.describe());

        let bastion = BastionConnection::connect(&self.credentials, self.timeouts.connect).await?;

        let result = match &host.selector {
            Selector::Search { token } => self.run_via_menu(&bastion, token, command, timeout).await,
            Selector::Direct { ip, port, user } => {
                self.run_direct(&bastion, ip, *port, user.as_deref(), command, timeout)
                    .await
            }
        };

        bastion.close().await;

        match &result {
            Ok(output) => debug!("'{}' finished with exit code {:?}", host.name, output.exit_code),
            Err(e) => warn!("'{}' failed: {}", host.name, e),
        }
        result
    }
}

/// Walk the menu to `token`, run `command` and close the terminal
///
/// The terminal is closed exactly once, whatever the outcome.
async fn run_menu_session<T: Terminal>(
    terminal: T,
    timings: MenuTimings,
    token: &str,
    command: &str,
    marker_id: u64,
    limit: Duration,
) -> Result<CommandOutput> {
    let mut menu = JumpMenu::new(terminal, timings);

    let result = async {
        menu.wait_for_menu().await?;
        menu.select_target(token).await?;
        menu.run(command, marker_id, limit).await
    }
    .await;

    menu.into_inner().close().await;
    result
}

/// Distinct per invocation; only has to differ from anything the command prints
fn marker_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
