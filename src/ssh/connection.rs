//! Bastion connection
//!
//! One SSH session to the bastion per invocation. From it the executor opens
//! either an interactive PTY shell (menu-driven targets) or a `direct-tcpip`
//! tunnel carrying a nested SSH session (targets with a fixed address).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::handler::SshHandler;
use super::terminal::PtyTerminal;
use crate::config::BastionCredentials;
use crate::error::{JumpSshError, Result};

/// PTY size requested from the bastion; wide enough that echoed commands
/// rarely wrap
const PTY_COLS: u32 = 220;
const PTY_ROWS: u32 = 50;

/// Keepalive interval; a peer that misses `KEEPALIVE_MAX` replies in a row
/// ends the session
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const KEEPALIVE_MAX: usize = 3;

/// Authenticated session to the bastion
pub struct BastionConnection {
    handle: Handle<SshHandler>,
    label: String,
}

/// SSH session to a target, tunnelled through the bastion
pub struct TargetConnection {
    handle: Handle<SshHandler>,
    label: String,
}

impl BastionConnection {
    /// Connect to the bastion and authenticate
    ///
    /// Any failure here is a `BastionConnect` error.
    pub async fn connect(credentials: &BastionCredentials, connect_timeout: Duration) -> Result<Self> {
        let label = format!("{}:{}", credentials.host, credentials.port);
        info!("Connecting to bastion {}...", label);

        let addr = (credentials.host.as_str(), credentials.port);

        let connect_result = timeout(
            connect_timeout,
            client::connect(session_config(), addr, SshHandler::new(label.clone())),
        )
        .await;

        let mut handle = match connect_result {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                error!("Bastion connection failed: {}", e);
                return Err(JumpSshError::bastion(format!("{}: {}", label, e)));
            }
            Err(_) => {
                error!("Bastion connection timeout after {}s", connect_timeout.as_secs());
                return Err(JumpSshError::bastion(format!(
                    "{}: connection timeout after {}s",
                    label,
                    connect_timeout.as_secs()
                )));
            }
        };

        let auth_result = timeout(
            connect_timeout,
            authenticate(&mut handle, &credentials.user, credentials),
        )
        .await;

        match auth_result {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(JumpSshError::bastion(format!("{}: {}", label, reason))),
            Err(_) => {
                return Err(JumpSshError::bastion(format!(
                    "{}: authentication timeout after {}s",
                    label,
                    connect_timeout.as_secs()
                )));
            }
        }

        info!("Logged into bastion {}@{}", credentials.user, label);
        Ok(Self { handle, label })
    }

    /// Open an interactive shell on the bastion within `limit`
    pub async fn open_shell(&self, limit: Duration) -> Result<PtyTerminal> {
        let channel = within(limit, "opening a shell on the bastion", async {
            let channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(|e| JumpSshError::session_io(format!("Failed to open channel: {}", e)))?;

            channel
                .request_pty(true, "xterm", PTY_COLS, PTY_ROWS, 0, 0, &[])
                .await
                .map_err(|e| JumpSshError::session_io(format!("Failed to request PTY: {}", e)))?;

            channel
                .request_shell(true)
                .await
                .map_err(|e| JumpSshError::session_io(format!("Failed to request shell: {}", e)))?;

            Ok(channel)
        })
        .await?;

        debug!("PTY shell opened on {}", self.label);
        Ok(PtyTerminal::new(channel))
    }

    /// Tunnel to `ip:port` and log in there as `user`
    ///
    /// The target authenticates with the bastion secret. A tunnel the bastion
    /// refuses, or a login the target rejects, is a `TargetResolution` error.
    pub async fn open_tunnel(
        &self,
        ip: &str,
        port: u16,
        user: &str,
        credentials: &BastionCredentials,
        connect_timeout: Duration,
    ) -> Result<TargetConnection> {
        let label = format!("{}:{}", ip, port);
        debug!("Opening tunnel to {} through {}", label, self.label);

        let channel = within(
            connect_timeout,
            format!("opening a tunnel to {}", label),
            async {
                self.handle
                    .channel_open_direct_tcpip(ip, u32::from(port), "127.0.0.1", 0)
                    .await
                    .map_err(|e| {
                        JumpSshError::target(format!("bastion refused tunnel to {}: {}", label, e))
                    })
            },
        )
        .await?;

        let connect_result = timeout(
            connect_timeout,
            client::connect_stream(session_config(), channel.into_stream(), SshHandler::new(label.clone())),
        )
        .await;

        let mut handle = match connect_result {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(JumpSshError::target(format!(
                    "SSH through tunnel to {} failed: {}",
                    label, e
                )));
            }
            Err(_) => {
                return Err(JumpSshError::timeout(
                    format!("connecting to {} through the bastion", label),
                    connect_timeout.as_secs(),
                ));
            }
        };

        within(connect_timeout, format!("logging into {}", label), async {
            authenticate(&mut handle, user, credentials)
                .await
                .map_err(|reason| JumpSshError::target(format!("{}@{}: {}", user, label, reason)))
        })
        .await?;

        info!("Connected to {}@{} through {}", user, label, self.label);
        Ok(TargetConnection { handle, label })
    }

    /// Close the bastion session
    pub async fn close(self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
        debug!("Bastion session {} closed", self.label);
    }
}

impl TargetConnection {
    /// Session handle for opening exec channels
    pub fn handle(&self) -> &Handle<SshHandler> {
        &self.handle
    }

    /// Close the tunnelled session
    pub async fn close(self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
        debug!("Target session {} closed", self.label);
    }
}

/// Client settings shared by the bastion and tunnelled sessions
fn session_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        ..Default::default()
    })
}

/// Run one session step, turning expiry of `limit` into a `Timeout` error
pub(crate) async fn within<T>(
    limit: Duration,
    stage: impl Into<String>,
    step: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(limit, step).await {
        Ok(result) => result,
        Err(_) => Err(JumpSshError::timeout(stage, limit.as_secs())),
    }
}

/// Authenticate with the password, else the private key
///
/// The error is a bare reason; callers attach the peer and error kind.
async fn authenticate(
    handle: &mut Handle<SshHandler>,
    user: &str,
    credentials: &BastionCredentials,
) -> std::result::Result<(), String> {
    if let Some(ref password) = credentials.password {
        debug!("Attempting password authentication for user '{}'", user);
        let auth_result = handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| e.to_string())?;

        return if auth_result.success() {
            debug!("Password authentication successful");
            Ok(())
        } else {
            Err("password authentication rejected".to_string())
        };
    }

    if let Some(ref key_content) = credentials.private_key {
        debug!("Attempting key authentication for user '{}'", user);

        let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
            .map_err(|e| format!("failed to parse private key: {}", e))?;

        let hash_alg = handle.best_supported_rsa_hash().await.ok().flatten().flatten();
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

        let auth_result = handle
            .authenticate_publickey(user, key_with_alg)
            .await
            .map_err(|e| e.to_string())?;

        return if auth_result.success() {
            debug!("Key authentication successful");
            Ok(())
        } else {
            Err("key authentication rejected".to_string())
        };
    }

    Err("no authentication method available (require password or private_key)".to_string())
}
