//! Job Instances Bounded Context
//!
//! Consultas de instancias y almacenamiento de sus logs.

pub mod log_store;
pub mod service;

pub use log_store::LogStore;
pub use service::JobInstanceService;
