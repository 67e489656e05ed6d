//! Startup module - composition root.
//!
//! Every long-lived service is built here exactly once and handed to its
//! consumers explicitly.

mod nats_init;
mod services_init;
mod shutdown;

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use orch_server_application::{
    DEFAULT_QUEUE_CAPACITY, EventDispatcher, InstanceReconciler, InstanceReconcilerConfig,
    JobInstanceService, LogStore, WorkflowService, dispatch_queue,
};
use orch_server_interface::{AppState, ServiceInfo, router};
use orch_shared::ServerConfigDto;

use shutdown::{BackgroundTasks, ShutdownConfig, ShutdownReason};

/// Current application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the server until a shutdown signal arrives
pub async fn run(config: ServerConfigDto) -> anyhow::Result<()> {
    info!(
        "Starting {} v{} ({}) on {}",
        config.service.name, APP_VERSION, config.service.environment, config.http.bind_address
    );

    let cancel = CancellationToken::new();
    let mut tasks = BackgroundTasks::new();

    let stores = services_init::init_stores(&config).await?;
    let deployer = Arc::new(services_init::init_deployer(&config).await?);
    let log_store = LogStore::new(&config.reconciliation.log_store_path);

    // Job registry refresh loop; the first fetch starts right away
    let registry = services_init::init_job_registry(&config)?;
    tasks.push("job-registry", registry.spawn(cancel.clone()));

    // Single-consumer dispatch queue fed by the event bus
    let dispatcher = Arc::new(EventDispatcher::new(
        config.service.name.clone(),
        stores.workflows.clone(),
        stores.instances.clone(),
        registry.clone(),
        deployer.clone(),
    ));
    let (queue, worker) = dispatch_queue(dispatcher, DEFAULT_QUEUE_CAPACITY);
    tasks.push("dispatch-worker", tokio::spawn(worker.run(cancel.clone())));

    let nats = nats_init::connect(&config.nats).await?;
    let consumer = nats_init::event_consumer(nats.clone(), &config.nats, Arc::new(queue));
    tasks.push("event-consumer", consumer.spawn(cancel.clone()));

    let reconciler = Arc::new(InstanceReconciler::new(
        deployer,
        stores.instances.clone(),
        log_store.clone(),
        InstanceReconcilerConfig {
            tick_interval: config.reconciliation.interval(),
        },
    ));
    tasks.push("reconciler", reconciler.spawn(cancel.clone()));

    // HTTP surface
    let state = AppState {
        workflows: Arc::new(WorkflowService::new(
            stores.workflows.clone(),
            registry.clone(),
        )),
        jobs: registry,
        instances: Arc::new(JobInstanceService::new(stores.instances.clone(), log_store)),
        info: Arc::new(ServiceInfo {
            service_name: config.service.name.clone(),
            environment: config.service.environment.clone(),
            instance_id: config.service.instance_id.clone(),
        }),
    };
    let listener = tokio::net::TcpListener::bind(config.http.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.bind_address))?;
    info!("✓ HTTP server listening on {}", config.http.bind_address);

    let server_cancel = cancel.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(server_cancel.cancelled_owned())
            .await
    });

    let reason = tokio::select! {
        reason = shutdown::wait_for_signal() => reason,
        result = &mut server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
            }
            ShutdownReason::ServerExited
        }
    };
    info!("Shutting down gracefully ({})", reason);

    let clean = tasks.shutdown(&cancel, &ShutdownConfig::default()).await;
    if reason != ShutdownReason::ServerExited {
        match server.await {
            Ok(Ok(())) => info!("HTTP server stopped"),
            Ok(Err(e)) => error!(error = %e, "HTTP server failed during shutdown"),
            Err(e) => error!(error = %e, "HTTP server task failed"),
        }
    }

    // Loops are joined; their dependencies can go now
    if let Err(e) = nats.flush().await {
        error!(error = %e, "Failed to flush NATS connection");
    }
    if let Some(pool) = stores.pool {
        pool.close().await;
    }

    if clean {
        info!("Shutdown complete");
    } else {
        error!("Shutdown complete with components that did not stop cleanly");
    }
    Ok(())
}
