#![allow(ambiguous_glob_reexports)]
// orch - Domain Layer
// Bounded Contexts:
// - shared_kernel: errores, paginación y referencias job:version
// - jobs: catálogo de jobs y sus fuentes (registro + manifiesto)
// - workflows: workflows y rutas de eventos
// - job_instances: instancias de job y su ciclo de vida
// - cluster: capacidad de despliegue en el cluster
// - events: mensaje de evento entrante

pub mod cluster;
pub mod events;
pub mod job_instances;
pub mod jobs;
pub mod shared_kernel;
pub mod workflows;

pub use cluster::{ClusterDeployer, ClusterError, InstanceFilter, ObservedInstance};
pub use events::{EventMessage, EventSink};
pub use job_instances::*;
pub use jobs::*;
pub use shared_kernel::*;
pub use workflows::*;
