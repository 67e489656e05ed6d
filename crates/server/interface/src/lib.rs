// orch - Interface Layer
// Superficie HTTP de consulta y registro

pub mod http;

pub use http::{ApiError, AppState, ServiceInfo, router};
