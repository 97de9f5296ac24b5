//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait for the bastion session and
//! for sessions tunnelled through it.

/// SSH client handler for russh
///
/// Server keys are accepted without verification; the bastion is reached by
/// a fixed configured address and whitelisted targets are only reachable
/// through it.
#[derive(Debug, Clone)]
pub struct SshHandler {
    /// Peer label used in log lines
    peer: String,
}

impl SshHandler {
    /// Create a new SSH handler for the named peer
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into() }
    }

    /// Peer label
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "Accepting {} host key for {}",
            server_public_key.algorithm(),
            self.peer
        );
        Ok(true)
    }
}
