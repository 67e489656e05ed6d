//! Jobs Bounded Context
//!
//! Catálogo de jobs desplegables y los puertos que lo alimentan
//! (registro de contenedores + manifiesto de proyectos).

pub mod catalog;
pub mod source;

pub use catalog::*;
pub use source::*;
