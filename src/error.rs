use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MusterError {
    #[error("Invalid value for '{field}': expected {expected}, got '{value}'")]
    Config {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("Failed to connect SSH session or execute SSH command: {0}")]
    SshError(#[from] openssh::Error),
    #[error("Failed to execute local command: {0}")]
    LocalCommandError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Sync command failed on master '{alias}' ({status})")]
    SyncFailed { alias: String, status: ExitStatus },
}

impl MusterError {
    /// Shorthand for a configuration field that failed validation.
    pub(crate) fn config(field: &'static str, expected: &'static str, value: &str) -> Self {
        Self::Config {
            field,
            expected,
            value: value.to_string(),
        }
    }
}
