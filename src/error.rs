//! Error types for Berth

use thiserror::Error;

/// Result type for Berth operations
pub type Result<T> = std::result::Result<T, BerthError>;

/// Berth error types
#[derive(Error, Debug)]
pub enum BerthError {
    #[error("Compose file parse error: {0}")]
    ComposeParse(String),

    #[error("Compose file not found in {0}")]
    ComposeFileNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service '{service}' must declare exactly one of 'image' or 'build': {reason}")]
    Provisioning { service: String, reason: String },

    #[error("Invalid port specification '{spec}': {reason}")]
    Port { spec: String, reason: String },

    #[error("Invalid volume specification '{spec}': {reason}")]
    Volume { spec: String, reason: String },

    #[error("Interpolation error: {0}")]
    Interpolation(String),

    #[error("Env file error in {path}: {message}")]
    EnvFile { path: String, message: String },

    #[error("Dockerfile parse error at line {line}: {message}")]
    DockerfileParse { line: usize, message: String },

    #[error("Circular dependency detected for service: {0}")]
    CircularDependency(String),

    #[error("Compose file is invalid ({} error(s)): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),

    #[error("Preflight failed ({} problem(s)): {}", .0.len(), .0.join("; "))]
    Preflight(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_yaml::Error> for BerthError {
    fn from(e: serde_yaml::Error) -> Self {
        BerthError::Yaml(e.to_string())
    }
}
