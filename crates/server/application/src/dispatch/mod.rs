//! Dispatch Bounded Context
//!
//! Evento → despliegues en el cluster, con rollback local a la ruta fallida.

pub mod event_dispatcher;
pub mod queue;

pub use event_dispatcher::{DispatchOutcome, DispatchStage, EventDispatcher};
pub use queue::{DEFAULT_QUEUE_CAPACITY, DispatchQueue, DispatchWorker, dispatch_queue};
