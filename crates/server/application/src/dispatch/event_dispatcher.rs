//! Event Dispatcher
//!
//! Turns one event into cluster deployments: resolve the workflow, select the
//! active routes, check every referenced job version up front, then deploy
//! route by route. A failing route is rolled back on its own; routes deployed
//! before it for the same event stay in place.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use orch_server_domain::{
    ClusterDeployer, ClusterError, DomainError, EventMessage, EventRoute, InstanceId, Job,
    JobCatalog, JobInstance, JobInstanceRepository, JobRef, Result, WorkflowRepository,
};

/// Progress of one event through the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Received,
    RoutesResolved,
    JobsValidated,
    Deploying,
    Done,
    Aborted,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::RoutesResolved => "routes_resolved",
            Self::JobsValidated => "jobs_validated",
            Self::Deploying => "deploying",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Event emitted by this service, not processed
    Ignored,
    /// Instances deployed, in route order
    Dispatched { instances: Vec<InstanceId> },
}

pub struct EventDispatcher {
    service_name: String,
    workflows: Arc<dyn WorkflowRepository>,
    instances: Arc<dyn JobInstanceRepository>,
    catalog: Arc<dyn JobCatalog>,
    deployer: Arc<dyn ClusterDeployer>,
}

impl EventDispatcher {
    pub fn new(
        service_name: impl Into<String>,
        workflows: Arc<dyn WorkflowRepository>,
        instances: Arc<dyn JobInstanceRepository>,
        catalog: Arc<dyn JobCatalog>,
        deployer: Arc<dyn ClusterDeployer>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            workflows,
            instances,
            catalog,
            deployer,
        }
    }

    pub async fn dispatch(&self, event: &EventMessage) -> Result<DispatchOutcome> {
        if event.source_id == self.service_name {
            debug!(event = %event.event, request_id = %event.request_id, "Ignoring own event");
            return Ok(DispatchOutcome::Ignored);
        }
        trace_stage(event, DispatchStage::Received);

        let result = self.run_stages(event).await;
        match &result {
            Ok(DispatchOutcome::Dispatched { instances }) => {
                info!(
                    workflow_id = %event.workflow_id,
                    request_id = %event.request_id,
                    deployed = instances.len(),
                    stage = %DispatchStage::Done,
                    "Event dispatched"
                );
            }
            Ok(DispatchOutcome::Ignored) => {}
            Err(e) => {
                warn!(
                    workflow_id = %event.workflow_id,
                    request_id = %event.request_id,
                    stage = %DispatchStage::Aborted,
                    "Event dispatch aborted: {}", e
                );
            }
        }
        result
    }

    async fn run_stages(&self, event: &EventMessage) -> Result<DispatchOutcome> {
        let workflow = self
            .workflows
            .find_by_id(&event.workflow_id)
            .await?
            .ok_or_else(|| DomainError::WorkflowNotFound {
                workflow_id: event.workflow_id.clone(),
            })?;

        let routes = workflow.active_routes(event);
        trace_stage(event, DispatchStage::RoutesResolved);
        if routes.is_empty() {
            debug!(event = %event.event, workflow_id = %event.workflow_id, "No active routes");
            return Ok(DispatchOutcome::Dispatched { instances: vec![] });
        }

        let jobs = self.validate_routes(&routes).await?;
        trace_stage(event, DispatchStage::JobsValidated);

        let mut deployed = Vec::with_capacity(routes.len());
        for (route, job) in routes.into_iter().zip(jobs) {
            let instance = JobInstance::new(
                &event.request_id,
                &event.workflow_id,
                &route.job_name,
                &route.job_version,
            );
            self.instances.register(&instance).await?;
            debug!(
                instance_id = %instance.instance_id,
                stage = %DispatchStage::Deploying,
                "Deploying {}", route.job_ref()
            );

            if let Err(e) = self.deploy(event, &instance, &job).await {
                error!(instance_id = %instance.instance_id, "Deployment failed: {}", e);
                self.roll_back(&instance, &e).await;
                return Err(e.into());
            }
            deployed.push(instance.instance_id);
        }

        Ok(DispatchOutcome::Dispatched {
            instances: deployed,
        })
    }

    /// All-or-nothing check of every active route before anything is created
    async fn validate_routes(&self, routes: &[&EventRoute]) -> Result<Vec<Job>> {
        let mut jobs = Vec::with_capacity(routes.len());
        let mut missing: Vec<JobRef> = Vec::new();

        for route in routes {
            match self.catalog.get_by_name(&route.job_name).await {
                Some(job) if job.has_version(&route.job_version) => jobs.push(job),
                _ => {
                    let job_ref = route.job_ref();
                    if !missing.contains(&job_ref) {
                        missing.push(job_ref);
                    }
                }
            }
        }

        if missing.is_empty() {
            Ok(jobs)
        } else {
            Err(DomainError::UnregisteredJobs { missing })
        }
    }

    async fn deploy(
        &self,
        event: &EventMessage,
        instance: &JobInstance,
        job: &Job,
    ) -> std::result::Result<(), ClusterError> {
        self.deployer.deploy_config(event, instance, job).await?;
        self.deployer.deploy_workload(event, instance, job).await
    }

    /// Mark the instance failed and remove whatever part of it exists.
    /// Nothing here aborts the sequence.
    async fn roll_back(&self, instance: &JobInstance, cause: &ClusterError) {
        let id = &instance.instance_id;

        if let Err(e) = self.instances.mark_failed(id, &cause.to_string()).await {
            error!(instance_id = %id, "Failed to record deployment failure: {}", e);
        }

        match self.deployer.is_workload_deployed(id).await {
            Ok(false) => {}
            Ok(true) => log_delete(id, "workload", self.deployer.delete_workload(id).await),
            Err(e) => {
                warn!(instance_id = %id, "Workload probe failed, deleting anyway: {}", e);
                log_delete(id, "workload", self.deployer.delete_workload(id).await);
            }
        }

        match self.deployer.is_config_deployed(id).await {
            Ok(false) => {}
            Ok(true) => log_delete(id, "config", self.deployer.delete_config(id).await),
            Err(e) => {
                warn!(instance_id = %id, "Config probe failed, deleting anyway: {}", e);
                log_delete(id, "config", self.deployer.delete_config(id).await);
            }
        }
    }
}

fn log_delete(id: &InstanceId, what: &str, result: std::result::Result<(), ClusterError>) {
    match result {
        Ok(()) => debug!(instance_id = %id, "Rolled back {}", what),
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!(instance_id = %id, "Rollback of {} failed: {}", what, e),
    }
}

fn trace_stage(event: &EventMessage, stage: DispatchStage) {
    debug!(
        event = %event.event,
        workflow_id = %event.workflow_id,
        request_id = %event.request_id,
        stage = %stage,
        "Dispatch stage"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{JobRegistry, JobRegistryConfig};
    use crate::testing::{ClusterCall, FakeClusterDeployer, StaticManifestReader, StaticRegistryClient};
    use chrono::Utc;
    use orch_server_domain::{JobInstanceStatus, Page, ServiceIdentity, Workflow};
    use orch_server_infrastructure::persistence::{
        InMemoryJobInstanceRepository, InMemoryWorkflowRepository,
    };

    struct Fixture {
        dispatcher: EventDispatcher,
        deployer: FakeClusterDeployer,
        instances: Arc<InMemoryJobInstanceRepository>,
    }

    fn route(event: &str, source: Option<&str>, job: &str, version: &str) -> EventRoute {
        EventRoute {
            event_name: event.to_string(),
            event_source: source.map(str::to_string),
            job_name: job.to_string(),
            job_version: version.to_string(),
        }
    }

    async fn fixture(routes: Vec<EventRoute>) -> Fixture {
        let registry = StaticRegistryClient::new("registry.local");
        registry.put("jobs/transcode", &["1.0"]).await;
        registry.put("jobs/index", &["2"]).await;
        registry.put("jobs/thumbnail", &["1"]).await;
        let manifest = StaticManifestReader::new();
        manifest.add_project("jobs/transcode", "transcode", None).await;
        manifest.add_project("jobs/index", "index", None).await;
        manifest.add_project("jobs/thumbnail", "thumbnail", None).await;
        let catalog = Arc::new(JobRegistry::new(
            Arc::new(registry),
            Arc::new(manifest),
            JobRegistryConfig::default(),
        ));
        catalog.refresh().await.unwrap();

        let workflows = Arc::new(InMemoryWorkflowRepository::new());
        workflows
            .register(&Workflow {
                workflow_id: "W1".to_string(),
                event_routes: routes,
                created_by: ServiceIdentity::default(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let instances = Arc::new(InMemoryJobInstanceRepository::new());
        let deployer = FakeClusterDeployer::new();
        let dispatcher = EventDispatcher::new(
            "workflow-manager",
            workflows,
            instances.clone(),
            catalog,
            Arc::new(deployer.clone()),
        );
        Fixture {
            dispatcher,
            deployer,
            instances,
        }
    }

    fn ingested() -> EventMessage {
        EventMessage::new("INGESTED", "other", "R1", "W1")
    }

    #[tokio::test]
    async fn test_single_route_creates_one_unknown_instance() {
        let f = fixture(vec![route("INGESTED", None, "transcode", "1.0")]).await;

        let outcome = f.dispatcher.dispatch(&ingested()).await.unwrap();
        let DispatchOutcome::Dispatched { instances } = outcome else {
            panic!("event should be dispatched");
        };
        assert_eq!(instances.len(), 1);

        let stored = f.instances.find_all(Page::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].job_name, "transcode");
        assert_eq!(stored[0].status, JobInstanceStatus::Unknown);
        assert!(f.deployer.has_config(&instances[0]).await);
        assert!(f.deployer.has_workload(&instances[0]).await);
    }

    #[tokio::test]
    async fn test_own_events_are_ignored() {
        let f = fixture(vec![route("INGESTED", None, "transcode", "1.0")]).await;
        let event = EventMessage::new("INGESTED", "workflow-manager", "R1", "W1");

        assert_eq!(
            f.dispatcher.dispatch(&event).await.unwrap(),
            DispatchOutcome::Ignored
        );
        assert!(f.deployer.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_not_found() {
        let f = fixture(vec![]).await;
        let event = EventMessage::new("INGESTED", "other", "R1", "W404");

        let err = f.dispatcher.dispatch(&event).await.unwrap_err();
        assert!(matches!(err, DomainError::WorkflowNotFound { .. }));
    }

    #[tokio::test]
    async fn test_source_filter_selects_routes() {
        let f = fixture(vec![
            route("INGESTED", Some("ingestor"), "index", "2"),
            route("INGESTED", None, "transcode", "1.0"),
            route("DELETED", None, "thumbnail", "1"),
        ])
        .await;

        f.dispatcher.dispatch(&ingested()).await.unwrap();
        let stored = f.instances.find_all(Page::default()).await.unwrap();
        let jobs: Vec<&str> = stored.iter().map(|i| i.job_name.as_str()).collect();
        assert_eq!(jobs, vec!["transcode"]);
    }

    #[tokio::test]
    async fn test_missing_job_aborts_whole_event_before_any_instance() {
        let f = fixture(vec![
            route("INGESTED", None, "transcode", "1.0"),
            route("INGESTED", None, "transcode", "9.9"),
        ])
        .await;

        let err = f.dispatcher.dispatch(&ingested()).await.unwrap_err();
        match err {
            DomainError::UnregisteredJobs { missing } => {
                assert_eq!(missing, vec![JobRef::new("transcode", "9.9")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.instances.find_all(Page::default()).await.unwrap().is_empty());
        assert!(f.deployer.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_config_timeout_rolls_back_failing_route_only() {
        let f = fixture(vec![
            route("INGESTED", None, "transcode", "1.0"),
            route("INGESTED", None, "index", "2"),
            route("INGESTED", None, "thumbnail", "1"),
        ])
        .await;
        f.deployer.time_out_config_for("index").await;

        let err = f.dispatcher.dispatch(&ingested()).await.unwrap_err();
        assert!(matches!(err, DomainError::DeploymentTimeout { attempts: 30, .. }));

        let stored = f.instances.find_all(Page::default()).await.unwrap();
        assert_eq!(stored.len(), 2, "third route must not be attempted");

        let transcode = &stored[0];
        assert_eq!(transcode.status, JobInstanceStatus::Unknown);
        assert!(f.deployer.has_workload(&transcode.instance_id).await);
        assert!(f.deployer.has_config(&transcode.instance_id).await);

        let index = &stored[1];
        assert_eq!(index.status, JobInstanceStatus::Failed);
        assert!(!index.details.as_deref().unwrap_or_default().is_empty());
        assert!(!f.deployer.has_config(&index.instance_id).await);
        assert!(!f.deployer.has_workload(&index.instance_id).await);
    }

    #[tokio::test]
    async fn test_workload_failure_deletes_config_of_that_instance() {
        let f = fixture(vec![route("INGESTED", None, "transcode", "1.0")]).await;
        f.deployer.fail_workload_for("transcode").await;

        let err = f.dispatcher.dispatch(&ingested()).await.unwrap_err();
        assert!(matches!(err, DomainError::Cluster { .. }));

        let stored = f.instances.find_all(Page::default()).await.unwrap();
        let id = stored[0].instance_id.clone();
        assert_eq!(stored[0].status, JobInstanceStatus::Failed);
        assert!(stored[0].details.as_deref().unwrap().contains("admission webhook"));

        let calls = f.deployer.calls().await;
        assert_eq!(
            calls,
            vec![
                ClusterCall::DeployConfig(id.clone()),
                ClusterCall::DeployWorkload(id.clone()),
                ClusterCall::DeleteConfig(id),
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_deletes_workload_before_config() {
        let f = fixture(vec![route("INGESTED", None, "transcode", "1.0")]).await;
        f.deployer.lose_workload_reply_for("transcode").await;

        let err = f.dispatcher.dispatch(&ingested()).await.unwrap_err();
        assert!(matches!(err, DomainError::Cluster { .. }));

        let stored = f.instances.find_all(Page::default()).await.unwrap();
        let id = stored[0].instance_id.clone();
        assert_eq!(stored[0].status, JobInstanceStatus::Failed);
        assert!(!f.deployer.has_workload(&id).await);
        assert!(!f.deployer.has_config(&id).await);

        assert_eq!(
            f.deployer.calls().await,
            vec![
                ClusterCall::DeployConfig(id.clone()),
                ClusterCall::DeployWorkload(id.clone()),
                ClusterCall::DeleteWorkload(id.clone()),
                ClusterCall::DeleteConfig(id),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_workload_delete_does_not_stop_rollback() {
        let f = fixture(vec![route("INGESTED", None, "transcode", "1.0")]).await;
        f.deployer.lose_workload_reply_for("transcode").await;
        f.deployer.fail_workload_deletes(true).await;

        let err = f.dispatcher.dispatch(&ingested()).await.unwrap_err();
        match &err {
            DomainError::Cluster { message } => assert!(message.contains("request timed out")),
            other => panic!("unexpected error: {other}"),
        }

        let stored = f.instances.find_all(Page::default()).await.unwrap();
        let id = stored[0].instance_id.clone();
        assert_eq!(stored[0].status, JobInstanceStatus::Failed);
        assert!(stored[0].details.as_deref().unwrap().contains("request timed out"));
        assert!(f.deployer.has_workload(&id).await);
        assert!(!f.deployer.has_config(&id).await);

        let calls = f.deployer.calls().await;
        assert_eq!(
            &calls[2..],
            &[ClusterCall::DeleteWorkload(id.clone()), ClusterCall::DeleteConfig(id)]
        );
    }

    #[tokio::test]
    async fn test_failed_probes_still_delete_both_resources() {
        let f = fixture(vec![route("INGESTED", None, "transcode", "1.0")]).await;
        f.deployer.fail_workload_for("transcode").await;
        f.deployer.fail_probes(true).await;

        let err = f.dispatcher.dispatch(&ingested()).await.unwrap_err();
        assert!(matches!(err, DomainError::Cluster { .. }));

        let stored = f.instances.find_all(Page::default()).await.unwrap();
        let id = stored[0].instance_id.clone();
        assert_eq!(stored[0].status, JobInstanceStatus::Failed);
        assert!(!f.deployer.has_config(&id).await);

        let calls = f.deployer.calls().await;
        assert_eq!(
            &calls[2..],
            &[ClusterCall::DeleteWorkload(id.clone()), ClusterCall::DeleteConfig(id)]
        );
    }
}
