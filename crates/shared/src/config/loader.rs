//! Configuration loader
//!
//! Loads an optional `.env` file, then builds [`ServerConfigDto`] from
//! `ORCH_*` environment variables and validates it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::dto::{
    DatabaseConfig, HttpConfig, JobSettingsConfig, KubernetesSettings, LoggingConfig, NatsConfig,
    ReconciliationConfig, RegistryConfig, ServerConfigDto, ServiceConfig,
};
use super::error::{ConfigError, Result};
use super::validator::validate_server_config;

/// Variable lookup used to build the configuration.
///
/// Production reads the process environment; tests pass a map.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Configuration loader
///
/// Values already present in the process environment win over the `.env`
/// file, matching `dotenv` semantics.
///
/// # Example
///
/// ```ignore
/// use orch_shared::config::ConfigLoader;
/// use std::path::PathBuf;
///
/// let loader = ConfigLoader::new(Some(PathBuf::from(".env")));
/// let config = loader.load_server_config()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load and validate the server configuration
    pub fn load_server_config(&self) -> Result<ServerConfigDto> {
        if let Some(path) = &self.env_file_path {
            self.load_env_file(path)?;
        }

        let config = ServerConfigDto::from_env()?;
        validate_server_config(&config)?;

        Ok(config)
    }

    fn load_env_file(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ConfigError::EnvFileLoad {
                path: path.to_path_buf(),
                source: dotenv::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path.display()),
                )),
            });
        }

        dotenv::from_path(path).map_err(|e| ConfigError::EnvFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

// ============================================================================
// ServerConfigDto::from_env
// ============================================================================

impl ServerConfigDto {
    /// Build server configuration from environment variables
    ///
    /// # Required Environment Variables
    ///
    /// - `ORCH_NATS_URL`: NATS connection URL(s), comma separated
    /// - `ORCH_REGISTRY_ENDPOINT`: container registry host
    /// - `ORCH_MANIFEST_PATH`: job manifest JSON file
    /// - `ORCH_LOG_STORE_PATH`: root directory for captured job logs
    ///
    /// Everything else has a default; see the section constructors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|var| std::env::var(var).ok())
    }

    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            service: ServiceConfig::from_lookup(vars)?,
            http: HttpConfig::from_lookup(vars)?,
            database: DatabaseConfig::from_lookup(vars)?,
            nats: NatsConfig::from_lookup(vars)?,
            kubernetes: KubernetesSettings::from_lookup(vars)?,
            registry: RegistryConfig::from_lookup(vars)?,
            reconciliation: ReconciliationConfig::from_lookup(vars)?,
            job_settings: JobSettingsConfig::from_lookup(vars)?,
            logging: LoggingConfig::from_lookup(vars),
        })
    }
}

impl ServiceConfig {
    /// - `ORCH_SERVICE_NAME`: default "workflow-manager"
    /// - `ORCH_ENVIRONMENT`: default "dev"
    /// - `ORCH_INSTANCE_ID`: default random UUID
    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            name: optional_var(vars, "ORCH_SERVICE_NAME", "workflow-manager"),
            environment: optional_var(vars, "ORCH_ENVIRONMENT", "dev"),
            instance_id: vars("ORCH_INSTANCE_ID")
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        })
    }
}

impl HttpConfig {
    /// - `ORCH_HTTP_BIND`: default "0.0.0.0:8080"
    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        let raw = optional_var(vars, "ORCH_HTTP_BIND", "0.0.0.0:8080");
        let bind_address = raw
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress { value: raw.clone() })?;

        Ok(Self { bind_address })
    }
}

impl DatabaseConfig {
    /// - `ORCH_DATABASE_URL`: optional; absent means in-memory stores
    /// - `ORCH_DB_POOL_SIZE`: default 10
    /// - `ORCH_DB_CONNECT_TIMEOUT_SECS`: default 30
    fn from_lookup(vars: Lookup<'_>) -> Result<Option<Self>> {
        let Some(url) = vars("ORCH_DATABASE_URL").filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            pool_size: parse_optional_var(vars, "ORCH_DB_POOL_SIZE", 10)?,
            connect_timeout_secs: parse_optional_var(vars, "ORCH_DB_CONNECT_TIMEOUT_SECS", 30)?,
        }))
    }
}

impl NatsConfig {
    /// - `ORCH_NATS_URL`: required, comma-separated for clustering
    /// - `ORCH_NATS_STREAM`: default "ORCH_EVENTS"
    /// - `ORCH_NATS_SUBJECT`: default "orch.events"
    /// - `ORCH_NATS_CONSUMER`: default "workflow-manager"
    /// - `ORCH_NATS_TIMEOUT_SECS`: default 10
    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        let urls_str = required_var(vars, "ORCH_NATS_URL")?;
        let urls: Vec<String> = split_list(&urls_str);

        if urls.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "ORCH_NATS_URL".to_string(),
                value: urls_str,
            });
        }

        Ok(Self {
            urls,
            stream: optional_var(vars, "ORCH_NATS_STREAM", "ORCH_EVENTS"),
            subject: optional_var(vars, "ORCH_NATS_SUBJECT", "orch.events"),
            consumer_name: optional_var(vars, "ORCH_NATS_CONSUMER", "workflow-manager"),
            timeout_secs: parse_optional_var(vars, "ORCH_NATS_TIMEOUT_SECS", 10)?,
        })
    }
}

impl KubernetesSettings {
    /// - `ORCH_K8S_NAMESPACE`: default "default"
    /// - `ORCH_K8S_KUBECONFIG`, `ORCH_K8S_CONTEXT`: optional
    /// - `ORCH_K8S_IDENTITY_NAMESPACE`: default "aad-pod-identity"
    /// - `ORCH_K8S_CONFIG_VISIBILITY_ATTEMPTS`: default 30
    /// - `ORCH_K8S_CONFIG_VISIBILITY_INTERVAL_SECS`: default 2
    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            namespace: optional_var(vars, "ORCH_K8S_NAMESPACE", "default"),
            kubeconfig_path: vars("ORCH_K8S_KUBECONFIG").map(PathBuf::from),
            context: vars("ORCH_K8S_CONTEXT"),
            identity_namespace: optional_var(vars, "ORCH_K8S_IDENTITY_NAMESPACE", "aad-pod-identity"),
            config_visibility_attempts: parse_optional_var(
                vars,
                "ORCH_K8S_CONFIG_VISIBILITY_ATTEMPTS",
                30,
            )?,
            config_visibility_interval_secs: parse_optional_var(
                vars,
                "ORCH_K8S_CONFIG_VISIBILITY_INTERVAL_SECS",
                2,
            )?,
        })
    }
}

impl RegistryConfig {
    /// - `ORCH_REGISTRY_ENDPOINT`: required
    /// - `ORCH_MANIFEST_PATH`: required
    /// - `ORCH_REGISTRY_REPOSITORY_FILTER`: default "jobs/"
    /// - `ORCH_REGISTRY_USERNAME`, `ORCH_REGISTRY_PASSWORD`: optional
    /// - `ORCH_REGISTRY_REFRESH_SECS`: default 60
    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            endpoint: required_var(vars, "ORCH_REGISTRY_ENDPOINT")?,
            repository_filter: optional_var(vars, "ORCH_REGISTRY_REPOSITORY_FILTER", "jobs/"),
            username: vars("ORCH_REGISTRY_USERNAME"),
            password: vars("ORCH_REGISTRY_PASSWORD"),
            manifest_path: PathBuf::from(required_var(vars, "ORCH_MANIFEST_PATH")?),
            refresh_interval_secs: parse_optional_var(vars, "ORCH_REGISTRY_REFRESH_SECS", 60)?,
        })
    }
}

impl ReconciliationConfig {
    /// - `ORCH_LOG_STORE_PATH`: required
    /// - `ORCH_RECONCILE_INTERVAL_SECS`: default 5
    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        Ok(Self {
            interval_secs: parse_optional_var(vars, "ORCH_RECONCILE_INTERVAL_SECS", 5)?,
            log_store_path: PathBuf::from(required_var(vars, "ORCH_LOG_STORE_PATH")?),
        })
    }
}

impl JobSettingsConfig {
    /// - `ORCH_JOB_STORAGES`: optional `name=url` pairs, comma separated
    fn from_lookup(vars: Lookup<'_>) -> Result<Self> {
        let storages = match vars("ORCH_JOB_STORAGES") {
            Some(raw) => parse_key_value_pairs("ORCH_JOB_STORAGES", &raw)?,
            None => BTreeMap::new(),
        };
        Ok(Self { storages })
    }
}

impl LoggingConfig {
    /// - `RUST_LOG`: default "info"
    fn from_lookup(vars: Lookup<'_>) -> Self {
        Self {
            level: optional_var(vars, "RUST_LOG", "info"),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn required_var(vars: Lookup<'_>, var: &str) -> Result<String> {
    vars(var)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            var: var.to_string(),
        })
}

fn optional_var(vars: Lookup<'_>, var: &str, default: &str) -> String {
    vars(var)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse an optional variable, falling back to `default` when unset.
/// A set but unparsable value is an error.
fn parse_optional_var<T>(vars: Lookup<'_>, var: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match vars(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_key_value_pairs(var: &str, raw: &str) -> Result<BTreeMap<String, String>> {
    let mut pairs = BTreeMap::new();
    for entry in split_list(raw) {
        let (key, value) = entry
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                var: var.to_string(),
                value: entry.clone(),
            })?;
        pairs.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(pairs)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ORCH_NATS_URL", "nats://localhost:4222"),
            ("ORCH_REGISTRY_ENDPOINT", "localhost:5000"),
            ("ORCH_MANIFEST_PATH", "/etc/orch/projects.json"),
            ("ORCH_LOG_STORE_PATH", "/var/lib/orch/logs"),
        ]
    }

    #[test]
    fn test_config_loader_default() {
        let loader = ConfigLoader::default();
        assert!(loader.env_file_path.is_none());
    }

    #[test]
    fn test_defaults_applied_when_only_required_vars_set() {
        let pairs = required();
        let vars = lookup_from(&pairs);
        let config = ServerConfigDto::from_lookup(&vars).unwrap();

        assert_eq!(config.service.name, "workflow-manager");
        assert_eq!(config.http.bind_address.port(), 8080);
        assert!(config.database.is_none());
        assert_eq!(config.kubernetes.namespace, "default");
        assert_eq!(config.kubernetes.config_visibility_attempts, 30);
        assert_eq!(config.kubernetes.config_visibility_interval_secs, 2);
        assert_eq!(config.registry.repository_filter, "jobs/");
        assert_eq!(config.registry.refresh_interval_secs, 60);
        assert_eq!(config.reconciliation.interval_secs, 5);
        assert!(config.job_settings.storages.is_empty());
    }

    #[test]
    fn test_missing_registry_endpoint_is_reported() {
        let mut pairs = required();
        pairs.retain(|(k, _)| *k != "ORCH_REGISTRY_ENDPOINT");
        let vars = lookup_from(&pairs);

        match ServerConfigDto::from_lookup(&vars) {
            Err(ConfigError::MissingRequired { var }) => assert_eq!(var, "ORCH_REGISTRY_ENDPOINT"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unparsable_interval_fails_fast() {
        let mut pairs = required();
        pairs.push(("ORCH_RECONCILE_INTERVAL_SECS", "soon"));
        let vars = lookup_from(&pairs);

        assert!(matches!(
            ServerConfigDto::from_lookup(&vars),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_database_and_storages_parsed() {
        let mut pairs = required();
        pairs.push(("ORCH_DATABASE_URL", "postgres://orch:orch@db:5432/orch"));
        pairs.push(("ORCH_DB_POOL_SIZE", "4"));
        pairs.push(("ORCH_JOB_STORAGES", "raw=s3://raw, curated = s3://curated"));
        pairs.push(("ORCH_NATS_URL", "nats://a:4222,nats://b:4222"));
        let vars = lookup_from(&pairs);

        let config = ServerConfigDto::from_lookup(&vars).unwrap();
        let db = config.database.unwrap();
        assert_eq!(db.pool_size, 4);
        assert_eq!(config.nats.urls.len(), 2);
        assert_eq!(
            config.job_settings.storages.get("curated").map(String::as_str),
            Some("s3://curated")
        );
    }

    #[test]
    fn test_unparsable_bind_address_names_variable() {
        let mut pairs = required();
        pairs.push(("ORCH_HTTP_BIND", "localhost"));
        let vars = lookup_from(&pairs);

        match ServerConfigDto::from_lookup(&vars) {
            Err(ConfigError::InvalidBindAddress { value }) => assert_eq!(value, "localhost"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_storage_pair_rejected() {
        assert!(parse_key_value_pairs("ORCH_JOB_STORAGES", "raw").is_err());
        assert!(parse_key_value_pairs("ORCH_JOB_STORAGES", "=s3://x").is_err());
    }

    #[test]
    fn test_missing_env_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(Some(dir.path().join("absent.env")));

        assert!(matches!(
            loader.load_server_config(),
            Err(ConfigError::EnvFileLoad { .. })
        ));
    }

    #[test]
    fn test_env_file_is_loaded_into_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "ORCH_LOADER_TEST_MARKER=from-file").unwrap();

        let loader = ConfigLoader::new(Some(path.clone()));
        loader.load_env_file(&path).unwrap();

        assert_eq!(
            std::env::var("ORCH_LOADER_TEST_MARKER").as_deref(),
            Ok("from-file")
        );
    }
}
