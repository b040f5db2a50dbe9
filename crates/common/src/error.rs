//! Error types for the harness

use thiserror::Error;

use crate::command::CommandError;

/// Result type alias using the harness Error
pub type Result<T> = std::result::Result<T, Error>;

/// Harness error types
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error connecting to the machine after {attempts} attempts")]
    Provisioning { attempts: u32 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Hypervisor error: {0}")]
    Hypervisor(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Asset error: {0}")]
    Asset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Whether this error came from a command that ran and failed, as opposed
    /// to a local problem starting it.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Error::Command(_) | Error::Timeout { .. })
    }
}
