//! Fuentes del catálogo de jobs: registro de contenedores y manifiesto

pub mod file_manifest_reader;
pub mod http_registry_client;

pub use file_manifest_reader::FileManifestReader;
pub use http_registry_client::HttpRegistryClient;
