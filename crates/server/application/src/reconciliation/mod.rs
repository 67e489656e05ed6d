//! Reconciliation Bounded Context
//!
//! Converge los registros de instancias al estado observado en el cluster.

pub mod instance_reconciler;

pub use instance_reconciler::*;
