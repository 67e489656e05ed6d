// orch - Infrastructure Layer
// Implementaciones concretas reorganizadas por tecnología

// Por tecnología
pub mod messaging;
pub mod persistence;

// Capacidades externas del dominio
pub mod providers;
pub mod registry;
