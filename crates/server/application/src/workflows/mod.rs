//! Workflows Bounded Context

pub mod service;

pub use service::WorkflowService;
