//! Remote command composition
//!
//! The request command is passed through verbatim. The only transformation is
//! the working-directory prefix `cd <dir> && `, so a failed `cd` aborts the
//! command instead of running it in the login directory.

use crate::error::{JumpSshError, Result};
use crate::hosts::AllowedHost;

/// Pick the working directory for a request
///
/// An explicit directory overrides the host default. Empty strings count as
/// absent.
pub fn effective_workdir<'a>(host: &'a AllowedHost, explicit: Option<&'a str>) -> Option<&'a str> {
    explicit
        .filter(|dir| !dir.is_empty())
        .or(host.default_workdir.as_deref())
        .filter(|dir| !dir.is_empty())
}

/// Build the exact command string sent to the remote shell
///
/// # Returns
/// * `Ok(String)` - `cd <dir> && <command>` or `<command>` unchanged
/// * `Err(JumpSshError::InvalidRequest)` - If the command is empty
///
/// # Examples
/// ```
/// use jump_ssh::command::compose;
/// use jump_ssh::hosts::AllowedHost;
///
/// let host = AllowedHost::search("VM-4-13", "4.13").with_default_workdir("~/falsework");
/// assert_eq!(compose(&host, "git pull", None).unwrap(), "cd ~/falsework && git pull");
/// assert_eq!(compose(&host, "ls", Some("/tmp")).unwrap(), "cd /tmp && ls");
/// ```
pub fn compose(host: &AllowedHost, command: &str, explicit_workdir: Option<&str>) -> Result<String> {
    if command.trim().is_empty() {
        return Err(JumpSshError::invalid_request("Command cannot be empty"));
    }

    Ok(match effective_workdir(host, explicit_workdir) {
        Some(dir) => format!("cd {} && {}", dir, command),
        None => command.to_string(),
    })
}
