//! Core types for the harness

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Which kind of machine a target is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Local,
    Virtual,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Local => write!(f, "local"),
            TargetKind::Virtual => write!(f, "virtual"),
        }
    }
}

/// How the automation tool reaches a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "connection", rename_all = "snake_case")]
pub enum ConnectionDescriptor {
    /// Run directly on the controlling host
    Local,
    /// Reach the target over ssh
    Ssh(SshConnection),
}

impl ConnectionDescriptor {
    pub fn kind(&self) -> TargetKind {
        match self {
            ConnectionDescriptor::Local => TargetKind::Local,
            ConnectionDescriptor::Ssh(_) => TargetKind::Virtual,
        }
    }
}

/// Connection parameters for a target reachable over ssh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key_file: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl SshConnection {
    /// Options that skip host key checks for throwaway machines
    pub fn disposable_host_options() -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
        ]
    }

    /// `user@host` destination for ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// A single role parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    /// Read a raw value the way YAML would, falling back to a plain string
    pub fn parse(raw: &str) -> Self {
        serde_yaml::from_str::<ParamValue>(raw)
            .unwrap_or_else(|_| ParamValue::String(raw.to_string()))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

/// Role parameters, ordered by name
pub type Params = BTreeMap<String, ParamValue>;

/// Parse a `key=value` assignment into a parameter
pub fn parse_param(assignment: &str) -> Result<(String, ParamValue)> {
    match assignment.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), ParamValue::parse(value)))
        }
        _ => Err(Error::InvalidConfig(format!(
            "expected key=value, got '{}'",
            assignment
        ))),
    }
}

/// A request to apply one role to a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleInvocation {
    /// Dotted role name, e.g. `com.redhat.tuned`
    pub role_name: String,
    #[serde(default)]
    pub params: Params,
    /// Task file under the role's `test/` directory to run after the role
    #[serde(default)]
    pub test_tasks_file: Option<String>,
}

impl RoleInvocation {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            params: Params::new(),
            test_tasks_file: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_test_tasks_file(mut self, file: impl Into<String>) -> Self {
        self.test_tasks_file = Some(file.into());
        self
    }

    /// Role directory name: the dotted name with dots replaced
    pub fn role_dir_name(&self) -> String {
        self.role_name.replace('.', "_")
    }
}

/// Lifecycle state of a virtual target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Created,
    BootRequested,
    WaitingForReachability,
    Ready,
    Terminated,
    FailedToStart,
}

impl Default for VmState {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Created => write!(f, "created"),
            VmState::BootRequested => write!(f, "boot_requested"),
            VmState::WaitingForReachability => write!(f, "waiting_for_reachability"),
            VmState::Ready => write!(f, "ready"),
            VmState::Terminated => write!(f, "terminated"),
            VmState::FailedToStart => write!(f, "failed_to_start"),
        }
    }
}
