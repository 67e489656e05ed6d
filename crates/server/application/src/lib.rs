// orch - Application Layer
// Casos de uso y procesos en segundo plano por Bounded Context

pub mod dispatch;
pub mod job_instances;
pub mod reconciliation;
pub mod registry;
pub mod workflows;

// Dobles de prueba compartidos con otras capas
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use dispatch::*;
pub use job_instances::*;
pub use reconciliation::*;
pub use registry::*;
pub use workflows::*;
