//! Shared building blocks for the orch job orchestrator.
//!
//! Currently this is the configuration layer: DTOs, the `.env`/environment
//! loader and its validators.

pub mod config;

pub use config::{ConfigError, ConfigLoader, ServerConfigDto};
