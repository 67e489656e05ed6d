//! Registry Bounded Context
//!
//! Catálogo de jobs construido desde el registro de contenedores.

pub mod job_registry;

pub use job_registry::*;
