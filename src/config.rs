//! Configuration and CLI argument parsing for jump-ssh
//!
//! The configuration file is YAML. It is parsed into raw `serde` structs that
//! reject unknown keys, then validated into [`Config`], which is immutable for
//! the rest of the invocation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::debug;

use crate::error::{JumpSshError, Result};
use crate::hosts::{AllowedHost, Selector};

/// Config file used when neither `--config` nor `JUMP_SSH_CONFIG` is set
pub const DEFAULT_CONFIG_PATH: &str = "resources/config.yaml";

/// Default SSH port for the bastion and direct targets
pub const DEFAULT_PORT: u16 = 22;

/// Bastion connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Timeout for each bastion menu prompt in seconds
pub const DEFAULT_EXPECT_TIMEOUT_SECS: u64 = 15;

/// Remote command timeout in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// jump-ssh CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "jump-ssh")]
#[command(version)]
#[command(about = "Run whitelisted shell commands on servers behind a JumpServer bastion")]
pub struct Args {
    /// Path to the configuration file
    #[arg(long, global = true, env = "JUMP_SSH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the servers on the whitelist
    List,

    /// Run a command on a whitelisted server
    Exec {
        /// Target server name (the `name` field of an allowed host)
        #[arg(long)]
        host: String,

        /// Shell command to run
        #[arg(long)]
        cmd: String,

        /// Directory to change into before running the command
        #[arg(long)]
        workdir: Option<String>,

        /// Command timeout in seconds, overrides the configured value
        #[arg(long)]
        timeout: Option<u64>,
    },
}

impl Args {
    /// Config path after applying the default
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

/// Bastion login details
///
/// `Debug` never prints the password or key material.
#[derive(Clone, PartialEq, Eq)]
pub struct BastionCredentials {
    /// Bastion hostname or IP address
    pub host: String,

    /// Bastion SSH port
    pub port: u16,

    /// Bastion username
    pub user: String,

    /// Password for password authentication
    pub password: Option<String>,

    /// Private key content (not path!) for key authentication
    pub private_key: Option<String>,
}

impl fmt::Debug for BastionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BastionCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Session timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus SSH handshake
    pub connect: Duration,

    /// Each bastion menu prompt
    pub expect: Duration,

    /// The remote command itself
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            expect: Duration::from_secs(DEFAULT_EXPECT_TIMEOUT_SECS),
            command: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bastion credentials
    pub bastion: BastionCredentials,

    /// Session timeouts
    pub timeouts: Timeouts,

    /// Whitelist, in file order
    pub allowed_hosts: Vec<AllowedHost>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    jumpserver: RawJumpServer,
    #[serde(default)]
    timeout: RawTimeouts,
    #[serde(default)]
    allowed_hosts: Vec<RawHost>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJumpServer {
    #[serde(default)]
    host: String,
    port: Option<u16>,
    #[serde(default)]
    user: String,
    password: Option<String>,
    private_key: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimeouts {
    connect: Option<u64>,
    expect: Option<u64>,
    command: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHost {
    #[serde(default)]
    name: String,
    #[serde(rename = "match", default, deserialize_with = "scalar_string")]
    token: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    ip: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    default_workdir: Option<String>,
}

/// Accept a string or a bare YAML number (`match: 4.13`) as text
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string, found {:?}",
            other
        ))),
    }
}

/// Load and validate the configuration file
///
/// # Errors
/// Returns `JumpSshError::Config` if the file is missing, is not valid YAML
/// of the expected shape, or fails validation.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let example = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("config.example.yaml");
        return Err(JumpSshError::config(format!(
            "config file not found: {} (see {} for the expected layout)",
            path.display(),
            example.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        JumpSshError::config(format!("failed to read {}: {}", path.display(), e))
    })?;

    let config = parse_config(&content, path.parent())?;
    debug!(
        "Loaded {} allowed hosts from {}",
        config.allowed_hosts.len(),
        path.display()
    );
    Ok(config)
}

/// Parse configuration from YAML text
///
/// A relative `private_key` path is resolved against `base_dir`.
pub fn parse_config(content: &str, base_dir: Option<&Path>) -> Result<Config> {
    let raw: RawConfig = serde_yaml::from_str(content)
        .map_err(|e| JumpSshError::config(format!("invalid config: {}", e)))?;

    let mut errors = Vec::new();

    let bastion = validate_bastion(raw.jumpserver, base_dir, &mut errors);
    let timeouts = validate_timeouts(&raw.timeout, &mut errors);
    let allowed_hosts = validate_hosts(raw.allowed_hosts, &mut errors);

    if !errors.is_empty() {
        return Err(JumpSshError::config(errors.join("; ")));
    }

    Ok(Config {
        bastion,
        timeouts,
        allowed_hosts,
    })
}

fn validate_bastion(
    raw: RawJumpServer,
    base_dir: Option<&Path>,
    errors: &mut Vec<String>,
) -> BastionCredentials {
    if raw.host.trim().is_empty() {
        errors.push("jumpserver.host is required".to_string());
    }
    if raw.user.trim().is_empty() {
        errors.push("jumpserver.user is required".to_string());
    }

    let password = sanitize_password(raw.password);
    let key_configured = raw.private_key.is_some();
    let private_key = raw.private_key.and_then(|key_path| {
        let key_path = match base_dir {
            Some(dir) if key_path.is_relative() => dir.join(key_path),
            _ => key_path,
        };
        match std::fs::read_to_string(&key_path) {
            Ok(content) => Some(content),
            Err(e) => {
                errors.push(format!(
                    "jumpserver.private_key {} could not be read: {}",
                    key_path.display(),
                    e
                ));
                None
            }
        }
    });

    if password.is_none() && !key_configured {
        errors.push("jumpserver.password or jumpserver.private_key is required".to_string());
    }

    BastionCredentials {
        host: raw.host,
        port: raw.port.unwrap_or(DEFAULT_PORT),
        user: raw.user,
        password,
        private_key,
    }
}

fn validate_timeouts(raw: &RawTimeouts, errors: &mut Vec<String>) -> Timeouts {
    let defaults = Timeouts::default();
    let mut pick = |field: &str, value: Option<u64>, default: Duration| match value {
        Some(0) => {
            errors.push(format!("timeout.{} must be positive", field));
            default
        }
        Some(secs) => Duration::from_secs(secs),
        None => default,
    };

    Timeouts {
        connect: pick("connect", raw.connect, defaults.connect),
        expect: pick("expect", raw.expect, defaults.expect),
        command: pick("command", raw.command, defaults.command),
    }
}

fn validate_hosts(raw: Vec<RawHost>, errors: &mut Vec<String>) -> Vec<AllowedHost> {
    if raw.is_empty() {
        errors.push("allowed_hosts is empty".to_string());
        return Vec::new();
    }

    let mut hosts: Vec<AllowedHost> = Vec::with_capacity(raw.len());

    for (index, entry) in raw.into_iter().enumerate() {
        let name = entry.name.trim().to_string();
        if name.is_empty() {
            errors.push(format!("allowed_hosts[{}]: name is required", index));
            continue;
        }

        if hosts.iter().any(|h| h.is_named(&name)) {
            errors.push(format!("allowed_hosts[{}]: duplicate name '{}'", index, name));
            continue;
        }

        let token = entry.token.filter(|t| !t.trim().is_empty());
        let ip = entry.ip.filter(|ip| !ip.trim().is_empty());

        let selector = match (token, ip) {
            (Some(token), None) => {
                if entry.port.is_some() || entry.user.is_some() {
                    errors.push(format!(
                        "allowed_hosts[{}] '{}': port/user only apply to ip entries",
                        index, name
                    ));
                    continue;
                }
                Selector::Search { token }
            }
            (None, Some(ip)) => Selector::Direct {
                ip,
                port: entry.port.unwrap_or(DEFAULT_PORT),
                user: entry.user.filter(|u| !u.is_empty()),
            },
            (Some(_), Some(_)) => {
                errors.push(format!(
                    "allowed_hosts[{}] '{}': set either match or ip, not both",
                    index, name
                ));
                continue;
            }
            (None, None) => {
                errors.push(format!(
                    "allowed_hosts[{}] '{}': match or ip is required",
                    index, name
                ));
                continue;
            }
        };

        hosts.push(AllowedHost {
            name,
            selector,
            default_workdir: entry.default_workdir.filter(|d| !d.is_empty()),
        });
    }

    hosts
}

/// Sanitize password: return None if empty
fn sanitize_password(password: Option<String>) -> Option<String> {
    password.filter(|p| !p.is_empty())
}
