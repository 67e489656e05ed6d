//! Workflows Bounded Context
//!
//! Workflow registrado una sola vez: rutas evento → job. Nunca se modifica.

pub mod aggregate;
pub mod repository;

pub use aggregate::*;
pub use repository::*;
