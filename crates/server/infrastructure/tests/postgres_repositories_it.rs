//! Integration tests for the Postgres workflow and job instance repositories
//!
//! These tests require Docker (via Testcontainers).
//! Run with: cargo test --test postgres_repositories_it -- --ignored

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

use orch_server_domain::{
    DomainError, EventRoute, InstanceId, JobInstance, JobInstanceRepository, JobInstanceStatus,
    Page, ServiceIdentity, StatusTransition, Workflow, WorkflowRepository,
};
use orch_server_infrastructure::persistence::{
    MigrationService, PostgresJobInstanceRepository, PostgresWorkflowRepository,
};

async fn setup_database() -> (ContainerAsync<Postgres>, PgPool) {
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .expect("Failed to start Postgres container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

    for _ in 0..30 {
        if PgConnection::connect(&url).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");
    MigrationService::new(pool.clone())
        .run_all()
        .await
        .expect("Failed to run migrations");

    (container, pool)
}

fn workflow(id: &str) -> Workflow {
    Workflow {
        workflow_id: id.to_string(),
        event_routes: vec![EventRoute {
            event_name: "INGESTED".to_string(),
            event_source: Some("ingestor".to_string()),
            job_name: "transcode".to_string(),
            job_version: "1.0".to_string(),
        }],
        created_by: ServiceIdentity {
            client_id: Some("client-1".to_string()),
            tenant_id: None,
            object_id: None,
        },
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_workflow_registration_is_write_once() {
    let (_container, pool) = setup_database().await;
    let repo = PostgresWorkflowRepository::new(pool.clone());

    repo.register(&workflow("W1")).await.unwrap();
    repo.register(&workflow("W2")).await.unwrap();

    let mut changed = workflow("W1");
    changed.event_routes.clear();
    let err = repo.register(&changed).await.unwrap_err();
    assert!(matches!(err, DomainError::WorkflowAlreadyExists { .. }));

    let stored = repo.find_by_id("W1").await.unwrap().unwrap();
    assert_eq!(stored.event_routes, workflow("W1").event_routes);
    assert_eq!(stored.created_by.client_id.as_deref(), Some("client-1"));
    assert!(repo.find_by_id("W9").await.unwrap().is_none());

    let ids: Vec<String> = repo
        .find_all(Page::default())
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.workflow_id)
        .collect();
    assert_eq!(ids, vec!["W1", "W2"]);

    pool.close().await;
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_job_instance_status_never_moves_backwards() {
    let (_container, pool) = setup_database().await;
    let repo = PostgresJobInstanceRepository::new(pool.clone());

    let instance = JobInstance::new("R1", "W1", "transcode", "1.0");
    let id = instance.instance_id.clone();
    repo.register(&instance).await.unwrap();

    assert_eq!(
        repo.advance_status(&id, JobInstanceStatus::Running)
            .await
            .unwrap(),
        StatusTransition::Advanced {
            from: JobInstanceStatus::Unknown
        }
    );
    assert_eq!(
        repo.advance_status(&id, JobInstanceStatus::Running)
            .await
            .unwrap(),
        StatusTransition::Unchanged
    );
    assert_eq!(
        repo.advance_status(&id, JobInstanceStatus::Pending)
            .await
            .unwrap(),
        StatusTransition::Rejected {
            current: JobInstanceStatus::Running
        }
    );
    assert_eq!(
        repo.advance_status(&InstanceId::from("ghost-1"), JobInstanceStatus::Running)
            .await
            .unwrap(),
        StatusTransition::Missing
    );

    repo.advance_status(&id, JobInstanceStatus::Succeeded)
        .await
        .unwrap();
    repo.mark_failed(&id, "late rollback").await.unwrap();
    let stored = repo.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobInstanceStatus::Succeeded);
    assert_eq!(stored.details.as_deref(), Some("late rollback"));

    pool.close().await;
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_job_instances_listed_by_request_in_creation_order() {
    let (_container, pool) = setup_database().await;
    let repo = PostgresJobInstanceRepository::new(pool.clone());

    for (request, job) in [("R1", "a"), ("R2", "b"), ("R1", "c")] {
        repo.register(&JobInstance::new(request, "W1", job, "1"))
            .await
            .unwrap();
    }

    let jobs: Vec<String> = repo
        .find_by_request_id("R1", Page::default())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.job_name)
        .collect();
    assert_eq!(jobs, vec!["a", "c"]);

    let page = repo.find_all(Page::new(1, 1).unwrap()).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].job_name, "b");

    pool.close().await;
}
