//! Allowed hosts and the whitelist gate
//!
//! [`resolve`] is the only path from a caller-supplied host name to an
//! [`AllowedHost`]. Nothing reaches the network without passing it.

use serde::Serialize;

use crate::error::{JumpSshError, Result};

/// How the bastion reaches a whitelisted host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Selector {
    /// Token typed into the bastion's asset menu
    Search {
        #[serde(rename = "match")]
        token: String,
    },

    /// Address tunnelled through the bastion with `direct-tcpip`
    Direct {
        ip: String,
        port: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<String>,
    },
}

impl Selector {
    /// Short human-readable form for logs
    pub fn describe(&self) -> String {
        match self {
            Selector::Search { token } => format!("match '{}'", token),
            Selector::Direct { ip, port, user } => match user {
                Some(user) => format!("{}@{}:{}", user, ip, port),
                None => format!("{}:{}", ip, port),
            },
        }
    }
}

/// A whitelist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedHost {
    /// Logical name, unique case-insensitively
    pub name: String,

    #[serde(flatten)]
    pub selector: Selector,

    /// Directory to `cd` into when the request names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_workdir: Option<String>,
}

impl AllowedHost {
    /// Create a host reached through the bastion's search menu
    pub fn search(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: Selector::Search {
                token: token.into(),
            },
            default_workdir: None,
        }
    }

    /// Create a host reached by direct address through the bastion
    pub fn direct(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            selector: Selector::Direct {
                ip: ip.into(),
                port,
                user: None,
            },
            default_workdir: None,
        }
    }

    /// Set the default working directory
    pub fn with_default_workdir(mut self, dir: impl Into<String>) -> Self {
        self.default_workdir = Some(dir.into());
        self
    }

    /// Case-insensitive name comparison
    pub fn is_named(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// Configured host names, in configured order
pub fn host_names(hosts: &[AllowedHost]) -> Vec<String> {
    hosts.iter().map(|h| h.name.clone()).collect()
}

/// Resolve a requested host name against the whitelist
///
/// Exact match on `name`, ignoring case. Selector tokens are never matched.
///
/// # Returns
/// * `Ok(&AllowedHost)` - The whitelist entry
/// * `Err(JumpSshError::HostNotAllowed)` - No entry matches; carries the configured names
pub fn resolve<'a>(requested: &str, hosts: &'a [AllowedHost]) -> Result<&'a AllowedHost> {
    hosts
        .iter()
        .find(|h| h.is_named(requested))
        .ok_or_else(|| JumpSshError::HostNotAllowed {
            requested: requested.to_string(),
            available: host_names(hosts),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> Vec<AllowedHost> {
        vec![
            AllowedHost::search("VM-4-13", "4.13").with_default_workdir("~/falsework"),
            AllowedHost::direct("db-1", "10.0.0.5", 22),
        ]
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let hosts = hosts();
        for name in ["vm-4-13", "VM-4-13", "Vm-4-13"] {
            let host = resolve(name, &hosts).unwrap();
            assert_eq!(host.name, "VM-4-13");
        }
    }

    #[test]
    fn test_resolve_unknown_lists_available() {
        let hosts = hosts();
        let err = resolve("unknown", &hosts).unwrap_err();
        match err {
            JumpSshError::HostNotAllowed {
                requested,
                available,
            } => {
                assert_eq!(requested, "unknown");
                assert_eq!(available, vec!["VM-4-13", "db-1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_does_not_match_selector_token() {
        let hosts = hosts();
        assert!(resolve("4.13", &hosts).is_err());
        assert!(resolve("10.0.0.5", &hosts).is_err());
    }

    #[test]
    fn test_resolve_no_prefix_match() {
        let hosts = hosts();
        assert!(resolve("VM-4", &hosts).is_err());
        assert!(resolve("VM-4-13 ", &hosts).is_err());
    }

    #[test]
    fn test_resolve_empty_whitelist() {
        let err = resolve("VM-4-13", &[]).unwrap_err();
        assert!(err.to_string().contains("available: []"));
    }

    #[test]
    fn test_summary_serialization() {
        let hosts = hosts();
        let json = serde_json::to_value(&hosts).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"name": "VM-4-13", "match": "4.13", "default_workdir": "~/falsework"},
                {"name": "db-1", "ip": "10.0.0.5", "port": 22}
            ])
        );
    }

    #[test]
    fn test_selector_describe() {
        let selector = Selector::Direct {
            ip: "10.0.0.5".to_string(),
            port: 2222,
            user: Some("deploy".to_string()),
        };
        assert_eq!(selector.describe(), "deploy@10.0.0.5:2222");
    }
}
