//! Configuration module for the orch job orchestrator
//!
//! Configuration is loaded once at startup (`.env` file, then environment),
//! validated, and passed by value into the composition root.
//!
//! ```ignore
//! use orch_shared::config::ConfigLoader;
//! use std::path::PathBuf;
//!
//! let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
//! let config = loader.load_server_config()?;
//! println!("HTTP on {}", config.http.bind_address);
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//!
//! - `ORCH_NATS_URL`: NATS connection URL(s)
//! - `ORCH_REGISTRY_ENDPOINT`: container registry host
//! - `ORCH_MANIFEST_PATH`: job manifest JSON file
//! - `ORCH_LOG_STORE_PATH`: root directory for captured job logs
//!
//! ## Optional
//!
//! - `ORCH_DATABASE_URL`: Postgres stores (in-memory when unset)
//! - `ORCH_HTTP_BIND`: HTTP bind address (default: "0.0.0.0:8080")
//! - `ORCH_RECONCILE_INTERVAL_SECS`: reconciliation period (default: 5)
//! - `ORCH_REGISTRY_REFRESH_SECS`: registry refresh period (default: 60)
//! - `RUST_LOG`: log filter (default: "info")

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{
    DatabaseConfig, HttpConfig, JobSettingsConfig, KubernetesSettings, LoggingConfig, NatsConfig,
    ReconciliationConfig, RegistryConfig, ServerConfigDto, ServiceConfig,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::{
    validate_bind_address, validate_database_url, validate_kubernetes_settings, validate_nats_urls,
    validate_reconciliation_config, validate_registry_config, validate_server_config,
};
