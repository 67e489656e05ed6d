pub mod job_instance_repository;
pub mod migrations;
pub mod pool;
pub mod workflow_repository;

pub use job_instance_repository::PostgresJobInstanceRepository;
pub use migrations::*;
pub use pool::*;
pub use workflow_repository::PostgresWorkflowRepository;
