//! Job Instances Bounded Context
//!
//! Una invocación concreta de un job para un evento, y su repositorio.

pub mod aggregate;
pub mod repository;

pub use aggregate::*;
pub use repository::*;
