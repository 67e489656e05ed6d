//! Construction of stores and external adapters from configuration

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use orch_server_application::{JobRegistry, JobRegistryConfig};
use orch_server_domain::{JobInstanceRepository, WorkflowRepository};
use orch_server_infrastructure::persistence::{
    DatabasePool, DatabasePoolConfig, InMemoryJobInstanceRepository, InMemoryWorkflowRepository,
    MigrationService, PostgresJobInstanceRepository, PostgresWorkflowRepository,
};
use orch_server_infrastructure::providers::{KubernetesDeployer, KubernetesDeployerConfig};
use orch_server_infrastructure::registry::{FileManifestReader, HttpRegistryClient};
use orch_shared::ServerConfigDto;

/// Workflow and job instance stores, plus the pool backing them if any
pub struct Stores {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub instances: Arc<dyn JobInstanceRepository>,
    pub pool: Option<DatabasePool>,
}

pub async fn init_stores(config: &ServerConfigDto) -> anyhow::Result<Stores> {
    let Some(database) = &config.database else {
        warn!("ORCH_DATABASE_URL not set, records are kept in memory and lost on restart");
        return Ok(Stores {
            workflows: Arc::new(InMemoryWorkflowRepository::new()),
            instances: Arc::new(InMemoryJobInstanceRepository::new()),
            pool: None,
        });
    };

    let pool_config = DatabasePoolConfig::new(
        database.pool_size,
        std::time::Duration::from_secs(database.connect_timeout_secs),
    );
    let pool = DatabasePool::new(&database.url, pool_config).await?;
    info!("✓ Database connected");

    MigrationService::new(pool.pg_pool())
        .run_all()
        .await
        .context("Failed to run database migrations")?;
    info!("✓ Migrations applied");

    Ok(Stores {
        workflows: Arc::new(PostgresWorkflowRepository::new(pool.pg_pool())),
        instances: Arc::new(PostgresJobInstanceRepository::new(pool.pg_pool())),
        pool: Some(pool),
    })
}

pub async fn init_deployer(config: &ServerConfigDto) -> anyhow::Result<KubernetesDeployer> {
    let k8s = &config.kubernetes;
    let mut builder = KubernetesDeployerConfig::builder()
        .namespace(&k8s.namespace)
        .identity_namespace(&k8s.identity_namespace)
        .visibility_poll(
            k8s.config_visibility_attempts,
            k8s.config_visibility_interval(),
        )
        .service(&config.service.name, &config.service.environment)
        .event_bus(config.nats.urls.clone(), &config.nats.subject);
    if let Some(path) = &k8s.kubeconfig_path {
        builder = builder.kubeconfig_path(path.to_string_lossy());
    }
    if let Some(context) = &k8s.context {
        builder = builder.context(context);
    }
    for (name, location) in &config.job_settings.storages {
        builder = builder.add_storage(name, location);
    }

    let deployer = KubernetesDeployer::new(builder.build()?).await?;
    info!(namespace = %k8s.namespace, "✓ Kubernetes deployer ready");
    Ok(deployer)
}

pub fn init_job_registry(config: &ServerConfigDto) -> anyhow::Result<Arc<JobRegistry>> {
    let registry = &config.registry;
    let mut client = HttpRegistryClient::new(&registry.endpoint)?;
    if let (Some(username), Some(password)) = (&registry.username, &registry.password) {
        client = client.with_basic_auth(username, password);
    }
    info!(registry = %client.base_url(), "Container registry configured");

    Ok(Arc::new(JobRegistry::new(
        Arc::new(client),
        Arc::new(FileManifestReader::new(&registry.manifest_path)),
        JobRegistryConfig {
            refresh_interval: registry.refresh_interval(),
            repository_filter: registry.repository_filter.clone(),
        },
    )))
}
