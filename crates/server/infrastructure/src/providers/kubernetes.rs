//! Kubernetes Cluster Deployer
//!
//! Each job instance becomes a ConfigMap holding its `settings.yml` plus a
//! single-run Pod mounting it, both named after the instance id and labelled
//! with the instance label contract. Uses kube-rs for native API access.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, Pod, PodSpec, TopologySpreadConstraint,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{
    Client, Config,
    api::{
        Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
        PostParams,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use orch_server_domain::cluster::labels;
use orch_server_domain::{
    ClusterDeployer, ClusterError, DomainError, EventMessage, InstanceFilter, InstanceId, Job,
    JobInstance, JobInstanceStatus, ObservedInstance, Result,
};

pub const SETTINGS_KEY: &str = "settings.yml";
pub const SETTINGS_MOUNT_PATH: &str = "/job/settings";
pub const REQUEST_ID_ENV: &str = "ORCH_LABEL_REQUEST_ID";
pub const IDENTITY_BINDING_LABEL: &str = "aadpodidbinding";

const TERMINATION_GRACE_SECS: i64 = 300;
const SPREAD_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

// ============================================================================
// Configuration
// ============================================================================

/// Event bus coordinates handed to every job through its settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusSettings {
    pub urls: Vec<String>,
    pub subject: String,
}

/// Configuration for the Kubernetes deployer
#[derive(Debug, Clone)]
pub struct KubernetesDeployerConfig {
    /// Namespace for job ConfigMaps and Pods
    pub namespace: String,
    /// Path to kubeconfig file (None = inferred config)
    pub kubeconfig_path: Option<String>,
    /// Kubeconfig context to use (None = current-context)
    pub context: Option<String>,
    /// Namespace holding the AzureIdentity resources
    pub identity_namespace: String,
    /// Read-back attempts after creating a ConfigMap
    pub visibility_attempts: u32,
    /// Spacing between read-back attempts
    pub visibility_interval: Duration,
    /// Values rendered into each job's settings
    pub service_name: String,
    pub environment: String,
    pub event_bus: EventBusSettings,
    pub storages: BTreeMap<String, String>,
}

impl Default for KubernetesDeployerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            kubeconfig_path: None,
            context: None,
            identity_namespace: "aad-pod-identity".to_string(),
            visibility_attempts: 30,
            visibility_interval: Duration::from_secs(2),
            service_name: "workflow-manager".to_string(),
            environment: "dev".to_string(),
            event_bus: EventBusSettings::default(),
            storages: BTreeMap::new(),
        }
    }
}

/// Builder for KubernetesDeployerConfig
#[derive(Default)]
pub struct KubernetesDeployerConfigBuilder {
    config: KubernetesDeployerConfig,
}

impl KubernetesDeployerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn kubeconfig_path(mut self, path: impl Into<String>) -> Self {
        self.config.kubeconfig_path = Some(path.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.config.context = Some(context.into());
        self
    }

    pub fn identity_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.identity_namespace = namespace.into();
        self
    }

    pub fn visibility_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.config.visibility_attempts = attempts;
        self.config.visibility_interval = interval;
        self
    }

    pub fn service(mut self, name: impl Into<String>, environment: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self.config.environment = environment.into();
        self
    }

    pub fn event_bus(mut self, urls: Vec<String>, subject: impl Into<String>) -> Self {
        self.config.event_bus = EventBusSettings {
            urls,
            subject: subject.into(),
        };
        self
    }

    pub fn add_storage(mut self, name: impl Into<String>, location: impl Into<String>) -> Self {
        self.config.storages.insert(name.into(), location.into());
        self
    }

    /// Build the configuration, validating required fields
    pub fn build(self) -> Result<KubernetesDeployerConfig> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<()> {
        if self.config.namespace.is_empty() {
            return Err(DomainError::InvalidArgument {
                field: "namespace".to_string(),
                reason: "Kubernetes namespace cannot be empty".to_string(),
            });
        }
        if self.config.visibility_attempts == 0 {
            return Err(DomainError::InvalidArgument {
                field: "visibility_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl KubernetesDeployerConfig {
    pub fn builder() -> KubernetesDeployerConfigBuilder {
        KubernetesDeployerConfigBuilder::new()
    }
}

// ============================================================================
// Job settings document
// ============================================================================

/// Credentials resolved from the job's identity binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySettings {
    pub client_id: String,
    pub tenant_id: String,
}

/// Content of `settings.yml` inside the instance ConfigMap
#[derive(Debug, Serialize)]
struct JobSettings<'a> {
    name: &'a str,
    environment: &'a str,
    service_name: &'a str,
    trigger_event: &'a EventMessage,
    event_bus: &'a EventBusSettings,
    storages: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<IdentitySettings>,
}

fn render_settings(
    config: &KubernetesDeployerConfig,
    event: &EventMessage,
    instance: &JobInstance,
    identity: Option<IdentitySettings>,
) -> std::result::Result<String, ClusterError> {
    let settings = JobSettings {
        name: &instance.job_name,
        environment: &config.environment,
        service_name: &config.service_name,
        trigger_event: event,
        event_bus: &config.event_bus,
        storages: &config.storages,
        identity,
    };
    serde_yaml::to_string(&settings).map_err(|e| ClusterError::Render {
        instance_id: instance.instance_id.to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Manifests
// ============================================================================

fn config_map_manifest(instance: &JobInstance, settings_yaml: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(instance.instance_id.to_string()),
            labels: Some(labels::instance_labels(instance)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(SETTINGS_KEY.to_string(), settings_yaml)])),
        ..Default::default()
    }
}

fn pod_manifest(event: &EventMessage, instance: &JobInstance, job: &Job) -> Pod {
    let name = instance.instance_id.to_string();

    let mut pod_labels = labels::instance_labels(instance);
    if let Some(identity) = &job.identity_name {
        pod_labels.insert(IDENTITY_BINDING_LABEL.to_string(), identity.clone());
    }

    let container = Container {
        name: name.clone(),
        image: Some(job.image_reference(&instance.job_version)),
        image_pull_policy: Some("Always".to_string()),
        env: Some(vec![EnvVar {
            name: REQUEST_ID_ENV.to_string(),
            value: Some(event.request_id.clone()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: name.clone(),
            mount_path: SETTINGS_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    // Best-effort spread of job pods across nodes
    let spread = TopologySpreadConstraint {
        label_selector: Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                labels::PART_OF.to_string(),
                labels::PART_OF_VALUE.to_string(),
            )])),
            ..Default::default()
        }),
        max_skew: 1,
        topology_key: SPREAD_TOPOLOGY_KEY.to_string(),
        when_unsatisfiable: "ScheduleAnyway".to_string(),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(pod_labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            termination_grace_period_seconds: Some(TERMINATION_GRACE_SECS),
            topology_spread_constraints: Some(vec![spread]),
            volumes: Some(vec![Volume {
                name: name.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name,
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Map Kubernetes Pod phase to JobInstanceStatus
fn map_pod_phase(phase: Option<&str>) -> JobInstanceStatus {
    match phase {
        Some("Pending") => JobInstanceStatus::Pending,
        Some("Running") => JobInstanceStatus::Running,
        Some("Succeeded") => JobInstanceStatus::Succeeded,
        Some("Failed") => JobInstanceStatus::Failed,
        _ => JobInstanceStatus::Unknown,
    }
}

/// Project a labelled Pod; `None` when a contract label is missing
fn observed_from_pod(pod: &Pod) -> Option<ObservedInstance> {
    let name = pod.metadata.name.as_ref()?;
    let pod_labels = pod.metadata.labels.as_ref()?;
    let label = |key: &str| pod_labels.get(key).cloned();

    Some(ObservedInstance {
        instance_id: InstanceId::from(name.as_str()),
        request_id: label(labels::REQUEST_ID)?,
        workflow_id: label(labels::WORKFLOW_ID)?,
        job_name: label(labels::JOB_NAME)?,
        job_version: label(labels::JOB_VERSION)?,
        status: map_pod_phase(pod.status.as_ref().and_then(|s| s.phase.as_deref())),
    })
}

fn map_kube_error(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        other => ClusterError::Api(format!("{} {}: {}", kind, name, other)),
    }
}

/// Probe until `probe` reports the resource, sleeping `interval` between
/// misses. Errors from the probe end the wait immediately.
async fn wait_until_visible<F, Fut>(
    instance_id: &InstanceId,
    attempts: u32,
    interval: Duration,
    mut probe: F,
) -> std::result::Result<(), ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, ClusterError>>,
{
    for attempt in 1..=attempts {
        if probe().await? {
            debug!(instance_id = %instance_id, attempt, "ConfigMap visible");
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
    Err(ClusterError::DeploymentTimeout {
        instance_id: instance_id.to_string(),
        attempts,
        waited: interval * attempts,
    })
}

// ============================================================================
// Kubernetes Deployer
// ============================================================================

#[derive(Clone)]
pub struct KubernetesDeployer {
    client: Client,
    config: KubernetesDeployerConfig,
}

impl KubernetesDeployer {
    pub async fn new(config: KubernetesDeployerConfig) -> Result<Self> {
        let client = Self::create_client(&config).await?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: KubernetesDeployerConfig) -> Self {
        Self { client, config }
    }

    async fn create_client(config: &KubernetesDeployerConfig) -> Result<Client> {
        let kube_config = match &config.kubeconfig_path {
            Some(path) => {
                let options = kube::config::KubeConfigOptions {
                    context: config.context.clone(),
                    cluster: None,
                    user: None,
                };
                let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| {
                    DomainError::InfrastructureError {
                        message: format!("Failed to read kubeconfig from {}: {}", path, e),
                    }
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| DomainError::InfrastructureError {
                        message: format!("Failed to create Kubernetes config: {}", e),
                    })?
            }
            None => Config::infer()
                .await
                .map_err(|e| DomainError::InfrastructureError {
                    message: format!("Failed to infer Kubernetes config: {}", e),
                })?,
        };

        Client::try_from(kube_config).map_err(|e| DomainError::InfrastructureError {
            message: format!("Failed to create Kubernetes client: {}", e),
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    /// Look up an AzureIdentity and take its client/tenant ids from labels
    async fn resolve_identity(
        &self,
        name: &str,
    ) -> std::result::Result<IdentitySettings, ClusterError> {
        let gvk = GroupVersionKind::gvk("aadpodidentity.k8s.io", "v1", "AzureIdentity");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "azureidentities");
        let identities: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.config.identity_namespace, &resource);

        let identity = identities
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error("AzureIdentity", name, e))?
            .ok_or_else(|| ClusterError::IdentityNotFound {
                name: name.to_string(),
            })?;

        let identity_labels = identity.metadata.labels.unwrap_or_default();
        match (identity_labels.get("client_id"), identity_labels.get("tenant_id")) {
            (Some(client_id), Some(tenant_id)) => Ok(IdentitySettings {
                client_id: client_id.clone(),
                tenant_id: tenant_id.clone(),
            }),
            _ => Err(ClusterError::Api(format!(
                "AzureIdentity {} lacks client_id/tenant_id labels",
                name
            ))),
        }
    }
}

#[async_trait]
impl ClusterDeployer for KubernetesDeployer {
    async fn deploy_config(
        &self,
        event: &EventMessage,
        instance: &JobInstance,
        job: &Job,
    ) -> std::result::Result<(), ClusterError> {
        let name = instance.instance_id.to_string();

        let identity = match &job.identity_name {
            Some(identity_name) => Some(self.resolve_identity(identity_name).await?),
            None => None,
        };
        let settings = render_settings(&self.config, event, instance, identity)?;

        self.config_maps()
            .create(&PostParams::default(), &config_map_manifest(instance, settings))
            .await
            .map_err(|e| map_kube_error("ConfigMap", &name, e))?;
        info!(instance_id = %name, "ConfigMap created, waiting for read-back");

        wait_until_visible(
            &instance.instance_id,
            self.config.visibility_attempts,
            self.config.visibility_interval,
            || self.is_config_deployed(&instance.instance_id),
        )
        .await
    }

    async fn deploy_workload(
        &self,
        event: &EventMessage,
        instance: &JobInstance,
        job: &Job,
    ) -> std::result::Result<(), ClusterError> {
        let name = instance.instance_id.to_string();
        self.pods()
            .create(&PostParams::default(), &pod_manifest(event, instance, job))
            .await
            .map_err(|e| map_kube_error("Pod", &name, e))?;
        info!(instance_id = %name, image = %job.image_reference(&instance.job_version), "Job Pod created");
        Ok(())
    }

    async fn is_config_deployed(
        &self,
        instance_id: &InstanceId,
    ) -> std::result::Result<bool, ClusterError> {
        self.config_maps()
            .get_opt(instance_id.as_str())
            .await
            .map(|cm| cm.is_some())
            .map_err(|e| map_kube_error("ConfigMap", instance_id.as_str(), e))
    }

    async fn is_workload_deployed(
        &self,
        instance_id: &InstanceId,
    ) -> std::result::Result<bool, ClusterError> {
        self.pods()
            .get_opt(instance_id.as_str())
            .await
            .map(|pod| pod.is_some())
            .map_err(|e| map_kube_error("Pod", instance_id.as_str(), e))
    }

    async fn delete_config(&self, instance_id: &InstanceId) -> std::result::Result<(), ClusterError> {
        self.config_maps()
            .delete(instance_id.as_str(), &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("ConfigMap", instance_id.as_str(), e))?;
        debug!(instance_id = %instance_id, "ConfigMap deleted");
        Ok(())
    }

    async fn delete_workload(
        &self,
        instance_id: &InstanceId,
    ) -> std::result::Result<(), ClusterError> {
        self.pods()
            .delete(instance_id.as_str(), &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("Pod", instance_id.as_str(), e))?;
        debug!(instance_id = %instance_id, "Pod deleted");
        Ok(())
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> std::result::Result<Vec<ObservedInstance>, ClusterError> {
        let selector = labels::selector(filter.request_id.as_deref(), filter.workflow_id.as_deref());
        let pods = self
            .pods()
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ClusterError::Api(format!("Failed to list Pods ({}): {}", selector, e)))?;

        Ok(pods
            .items
            .iter()
            .filter_map(|pod| {
                let observed = observed_from_pod(pod);
                if observed.is_none() {
                    warn!(pod = ?pod.metadata.name, "Pod matches selector but lacks instance labels");
                }
                observed
            })
            .collect())
    }

    async fn stream_log_to_file(
        &self,
        instance_id: &InstanceId,
        path: &Path,
    ) -> std::result::Result<u64, ClusterError> {
        use futures::AsyncReadExt;

        let capture = |message: String| ClusterError::LogCapture {
            instance_id: instance_id.to_string(),
            message,
        };

        let params = LogParams {
            follow: true,
            ..Default::default()
        };
        let stream = self
            .pods()
            .log_stream(instance_id.as_str(), &params)
            .await
            .map_err(|e| map_kube_error("Pod", instance_id.as_str(), e))?;
        let mut stream = std::pin::pin!(stream);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| capture(format!("open {}: {}", path.display(), e)))?;

        let mut buf = vec![0u8; 8 * 1024];
        let mut written: u64 = 0;
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| capture(e.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| capture(e.to_string()))?;
            written += n as u64;
        }
        file.flush().await.map_err(|e| capture(e.to_string()))?;
        Ok(written)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instance() -> JobInstance {
        JobInstance::new("R1", "W1", "transcode", "1.0")
    }

    fn job(identity: Option<&str>) -> Job {
        Job {
            job_name: "transcode".to_string(),
            image: "registry.local/jobs/transcode".to_string(),
            versions: vec!["1.0".to_string()],
            identity_name: identity.map(str::to_string),
        }
    }

    fn event() -> EventMessage {
        EventMessage::new("INGESTED", "other", "R1", "W1")
    }

    #[test]
    fn test_config_default() {
        let config = KubernetesDeployerConfig::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.visibility_attempts, 30);
        assert_eq!(config.visibility_interval, Duration::from_secs(2));
        assert_eq!(config.identity_namespace, "aad-pod-identity");
    }

    #[test]
    fn test_config_builder() {
        let config = KubernetesDeployerConfig::builder()
            .namespace("jobs")
            .kubeconfig_path("/path/to/kubeconfig")
            .context("aks-dev")
            .service("workflow-manager", "prod")
            .event_bus(vec!["nats://bus:4222".to_string()], "orch.events")
            .add_storage("raw", "abfs://raw@lake")
            .build()
            .expect("should build config");

        assert_eq!(config.namespace, "jobs");
        assert_eq!(config.context.as_deref(), Some("aks-dev"));
        assert_eq!(config.environment, "prod");
        assert_eq!(config.event_bus.subject, "orch.events");
        assert_eq!(config.storages["raw"], "abfs://raw@lake");
    }

    #[test]
    fn test_config_builder_validation() {
        assert!(KubernetesDeployerConfig::builder().namespace("").build().is_err());
        assert!(KubernetesDeployerConfig::builder()
            .visibility_poll(0, Duration::from_secs(1))
            .build()
            .is_err());
    }

    #[rstest]
    #[case(Some("Pending"), JobInstanceStatus::Pending)]
    #[case(Some("Running"), JobInstanceStatus::Running)]
    #[case(Some("Succeeded"), JobInstanceStatus::Succeeded)]
    #[case(Some("Failed"), JobInstanceStatus::Failed)]
    #[case(Some("Unknown"), JobInstanceStatus::Unknown)]
    #[case(None, JobInstanceStatus::Unknown)]
    fn test_map_pod_phase(#[case] phase: Option<&str>, #[case] expected: JobInstanceStatus) {
        assert_eq!(map_pod_phase(phase), expected);
    }

    #[test]
    fn test_config_map_carries_settings_and_labels() {
        let instance = instance();
        let config = KubernetesDeployerConfig::builder()
            .service("workflow-manager", "prod")
            .event_bus(vec!["nats://bus:4222".to_string()], "orch.events")
            .build()
            .unwrap();
        let identity = IdentitySettings {
            client_id: "c-1".to_string(),
            tenant_id: "t-1".to_string(),
        };
        let yaml = render_settings(&config, &event(), &instance, Some(identity)).unwrap();
        let cm = config_map_manifest(&instance, yaml);

        assert_eq!(cm.metadata.name.as_deref(), Some(instance.instance_id.as_str()));
        assert_eq!(cm.metadata.labels.as_ref().unwrap()[labels::COMPONENT], "JOB");

        let rendered: serde_yaml::Value =
            serde_yaml::from_str(&cm.data.unwrap()[SETTINGS_KEY]).unwrap();
        assert_eq!(rendered["name"], "transcode");
        assert_eq!(rendered["environment"], "prod");
        assert_eq!(rendered["trigger_event"]["request_id"], "R1");
        assert_eq!(rendered["event_bus"]["subject"], "orch.events");
        assert_eq!(rendered["identity"]["client_id"], "c-1");
    }

    #[test]
    fn test_settings_omit_identity_when_absent() {
        let yaml = render_settings(
            &KubernetesDeployerConfig::default(),
            &event(),
            &instance(),
            None,
        )
        .unwrap();
        let rendered: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(rendered.get("identity").is_none());
    }

    #[test]
    fn test_pod_manifest() {
        let instance = instance();
        let pod = pod_manifest(&event(), &instance, &job(Some("transcoder-id")));
        let name = instance.instance_id.to_string();

        let pod_labels = pod.metadata.labels.unwrap();
        assert_eq!(pod_labels[IDENTITY_BINDING_LABEL], "transcoder-id");
        assert_eq!(pod_labels[labels::REQUEST_ID], "R1");

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.termination_grace_period_seconds, Some(300));

        let container = &spec.containers[0];
        assert_eq!(container.name, name);
        assert_eq!(
            container.image.as_deref(),
            Some("registry.local/jobs/transcode:1.0")
        );
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, REQUEST_ID_ENV);
        assert_eq!(env[0].value.as_deref(), Some("R1"));
        assert_eq!(
            container.volume_mounts.as_ref().unwrap()[0].mount_path,
            SETTINGS_MOUNT_PATH
        );

        let volume = &spec.volumes.unwrap()[0];
        assert_eq!(volume.config_map.as_ref().unwrap().name, name);

        let spread = &spec.topology_spread_constraints.unwrap()[0];
        assert_eq!(spread.max_skew, 1);
        assert_eq!(spread.topology_key, "kubernetes.io/hostname");
        assert_eq!(spread.when_unsatisfiable, "ScheduleAnyway");
    }

    #[test]
    fn test_pod_without_identity_has_no_binding_label() {
        let pod = pod_manifest(&event(), &instance(), &job(None));
        assert!(!pod.metadata.labels.unwrap().contains_key(IDENTITY_BINDING_LABEL));
    }

    #[test]
    fn test_observed_from_pod() {
        let instance = instance();
        let mut pod = pod_manifest(&event(), &instance, &job(None));
        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        });

        let observed = observed_from_pod(&pod).unwrap();
        assert_eq!(observed.instance_id, instance.instance_id);
        assert_eq!(observed.workflow_id, "W1");
        assert_eq!(observed.status, JobInstanceStatus::Running);

        pod.metadata
            .labels
            .as_mut()
            .unwrap()
            .remove(labels::JOB_VERSION);
        assert!(observed_from_pod(&pod).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_poll_times_out_distinguishably() {
        let probes = Arc::new(AtomicU32::new(0));
        let counter = probes.clone();
        let started = tokio::time::Instant::now();

        let err = wait_until_visible(
            &InstanceId::from("transcode-1"),
            30,
            Duration::from_secs(2),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ClusterError::DeploymentTimeout { attempts: 30, .. }
        ));
        assert_eq!(probes.load(Ordering::SeqCst), 30);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_poll_returns_once_visible() {
        let probes = Arc::new(AtomicU32::new(0));
        let counter = probes.clone();

        wait_until_visible(
            &InstanceId::from("transcode-1"),
            30,
            Duration::from_secs(2),
            move || {
                let seen = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(seen >= 3) }
            },
        )
        .await
        .unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_probe_error_stops_polling() {
        let err = wait_until_visible(
            &InstanceId::from("transcode-1"),
            30,
            Duration::from_secs(2),
            || async { Err(ClusterError::Api("forbidden".to_string())) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClusterError::Api(_)));
    }

    /// Needs a reachable cluster; run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_list_instances_against_live_cluster() {
        let deployer = KubernetesDeployer::new(KubernetesDeployerConfig::default())
            .await
            .expect("cluster reachable");
        let listed = deployer.list_instances(&InstanceFilter::all()).await;
        assert!(listed.is_ok());
    }
}
