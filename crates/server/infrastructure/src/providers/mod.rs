// Proveedores de cluster

pub mod kubernetes;

pub use kubernetes::*;
