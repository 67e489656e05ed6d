//! Configuration errors, one family per section of [`super::ServerConfigDto`]

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be set")]
    MissingRequired { var: String },

    /// Set but not parsable as the expected type
    #[error("{var}={value:?} cannot be parsed")]
    InvalidValue { var: String, value: String },

    #[error("Cannot read env file {path}: {source}")]
    EnvFileLoad {
        path: PathBuf,
        #[source]
        source: dotenv::Error,
    },

    #[error("ORCH_HTTP_BIND={value:?} is not a socket address")]
    InvalidBindAddress { value: String },

    #[error("Service identity: {0}")]
    Service(String),

    #[error("Database: {0}")]
    Database(String),

    #[error("NATS: {0}")]
    Nats(String),

    #[error("Container registry: {0}")]
    Registry(String),

    #[error("Kubernetes: {0}")]
    Kubernetes(String),

    /// Reconciliation interval or log directory
    #[error("Reconciliation: {0}")]
    Reconciliation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
