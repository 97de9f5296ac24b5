//! Structured results
//!
//! Every invocation prints exactly one JSON object. Success and failure share
//! one record shape so callers can parse without branching on the failure
//! type: `output` is set on success, `error` on failure, never both.

use serde::Serialize;

use crate::error::JumpSshError;
use crate::hosts::{AllowedHost, Selector};
use crate::ssh::CommandOutput;

/// What is known about a request when it finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Resolved host
    pub host: Option<AllowedHost>,

    /// Effective working directory
    pub workdir: Option<String>,

    /// Composed command
    pub command: Option<String>,
}

/// Result of `exec`, or any failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(flatten)]
    pub selector: Option<Selector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl ExecutionResult {
    /// A command that ran and exited 0
    pub fn succeeded(context: RequestContext, output: &CommandOutput) -> Self {
        let mut result = Self::from_context(true, context);
        result.exit_code = output.exit_code;
        result.output = Some(output.combined_output());
        result
    }

    /// Any failure, with whatever request context was established
    pub fn failed(error: &JumpSshError, context: RequestContext) -> Self {
        let mut result = Self::from_context(false, context);
        if let JumpSshError::RemoteCommand { exit_code, .. } = error {
            result.exit_code = Some(*exit_code);
        }
        result.error = Some(error.to_string());
        result.error_kind = Some(error.kind());
        result
    }

    fn from_context(success: bool, context: RequestContext) -> Self {
        let (host, selector) = match context.host {
            Some(host) => (Some(host.name), Some(host.selector)),
            None => (None, None),
        };
        Self {
            success,
            host,
            selector,
            workdir: context.workdir,
            command: context.command,
            exit_code: None,
            output: None,
            error: None,
            error_kind: None,
        }
    }
}

/// Result of `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostList {
    pub success: bool,
    pub hosts: Vec<AllowedHost>,
}

impl HostList {
    pub fn new(hosts: Vec<AllowedHost>) -> Self {
        Self {
            success: true,
            hosts,
        }
    }
}

/// The record an invocation prints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Hosts(HostList),
    Execution(ExecutionResult),
}

impl Report {
    /// Whether the invocation succeeded; drives the process exit code
    pub fn success(&self) -> bool {
        match self {
            Report::Hosts(list) => list.success,
            Report::Execution(result) => result.success,
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "error": format!("failed to serialize result: {}", e),
                "error_kind": "SessionIOError",
            })
            .to_string()
        })
    }
}

impl From<ExecutionResult> for Report {
    fn from(result: ExecutionResult) -> Self {
        Report::Execution(result)
    }
}

impl From<HostList> for Report {
    fn from(list: HostList) -> Self {
        Report::Hosts(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext {
            host: Some(AllowedHost::search("VM-4-13", "4.13")),
            workdir: Some("/tmp".to_string()),
            command: Some("cd /tmp && echo hi".to_string()),
        }
    }

    #[test]
    fn test_success_record() {
        let result = ExecutionResult::succeeded(context(), &CommandOutput::ok("hi\n"));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "success": true,
                "host": "VM-4-13",
                "match": "4.13",
                "workdir": "/tmp",
                "command": "cd /tmp && echo hi",
                "exit_code": 0,
                "output": "hi\n"
            })
        );
    }

    #[test]
    fn test_failure_record_has_no_output() {
        let err = JumpSshError::target("bastion found no asset matching '4.13'");
        let result = ExecutionResult::failed(&err, context());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error_kind"], json!("TargetResolutionError"));
        assert!(value.get("output").is_none());
        assert!(value["error"].as_str().unwrap().contains("4.13"));
    }

    #[test]
    fn test_remote_command_failure_carries_exit_code() {
        let err = JumpSshError::RemoteCommand {
            exit_code: 2,
            output: "ls: cannot access 'x'".to_string(),
        };
        let result = ExecutionResult::failed(&err, context());
        assert_eq!(result.exit_code, Some(2));
        assert!(result.output.is_none());
        assert!(result.error.unwrap().contains("cannot access"));
    }

    #[test]
    fn test_failure_without_context() {
        let err = JumpSshError::config("allowed_hosts is empty");
        let report = Report::from(ExecutionResult::failed(&err, RequestContext::default()));
        assert!(!report.success());
        let value: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "error": "Configuration error: allowed_hosts is empty",
                "error_kind": "ConfigError"
            })
        );
    }

    #[test]
    fn test_host_list_report() {
        let report = Report::from(HostList::new(vec![
            AllowedHost::search("VM-4-13", "4.13").with_default_workdir("~/falsework"),
        ]));
        assert!(report.success());
        let value: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "success": true,
                "hosts": [{"name": "VM-4-13", "match": "4.13", "default_workdir": "~/falsework"}]
            })
        );
    }

    #[test]
    fn test_json_keeps_non_ascii() {
        let result = ExecutionResult::succeeded(context(), &CommandOutput::ok("部署完成"));
        let text = Report::from(result).to_json();
        assert!(text.contains("部署完成"));
    }
}
