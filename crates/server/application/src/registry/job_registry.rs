//! Job Registry
//!
//! In-memory catalog of deployable jobs, rebuilt periodically from the
//! container registry and the project manifest.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use orch_server_domain::{Job, JobCatalog, ManifestReader, Page, RegistryClient, Result};

/// Configuration for the Job Registry refresh loop
#[derive(Debug, Clone)]
pub struct JobRegistryConfig {
    /// Interval between refreshes (default: 60 seconds)
    pub refresh_interval: Duration,
    /// Only repositories whose name contains this value are considered
    pub repository_filter: String,
}

impl Default for JobRegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            repository_filter: "jobs/".to_string(),
        }
    }
}

/// Result of one successful refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub jobs: usize,
    /// First population of the catalog
    pub bootstrap: bool,
}

pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, Job>>,
    populated: AtomicBool,
    registry: Arc<dyn RegistryClient>,
    manifest: Arc<dyn ManifestReader>,
    config: JobRegistryConfig,
}

impl JobRegistry {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        manifest: Arc<dyn ManifestReader>,
        config: JobRegistryConfig,
    ) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            populated: AtomicBool::new(false),
            registry,
            manifest,
            config,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    /// Rebuild the catalog.
    ///
    /// Until the first success the write lock is held across the remote
    /// fetch, so readers wait for a populated catalog instead of seeing an
    /// empty one. Afterwards the fetch runs unlocked and only the swap is
    /// exclusive. On error the current catalog is kept.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        if !self.is_populated() {
            let mut jobs = self.jobs.write().await;
            // Another refresh may have won the race for the lock
            if !self.is_populated() {
                *jobs = self.fetch_catalog().await?;
                self.populated.store(true, Ordering::Release);
                info!(target: "orch::registry", jobs = jobs.len(), "Job catalog populated");
                return Ok(RefreshSummary {
                    jobs: jobs.len(),
                    bootstrap: true,
                });
            }
        }

        let fresh = self.fetch_catalog().await?;
        let count = fresh.len();
        *self.jobs.write().await = fresh;
        debug!(target: "orch::registry", jobs = count, "Job catalog refreshed");
        Ok(RefreshSummary {
            jobs: count,
            bootstrap: false,
        })
    }

    async fn fetch_catalog(&self) -> Result<BTreeMap<String, Job>> {
        let repositories = self.registry.list_repositories().await?;
        let manifest = self.manifest.read().await?;
        let prefix = self.registry.image_prefix();

        let mut jobs = BTreeMap::new();
        for repository in repositories
            .iter()
            .filter(|r| r.contains(&self.config.repository_filter))
        {
            let Some(project) = manifest.find_by_path(repository) else {
                debug!(target: "orch::registry", repository = %repository, "Repository not in manifest, skipping");
                continue;
            };
            let versions = self.registry.list_tags(repository).await?;
            if jobs.contains_key(&project.name) {
                warn!(target: "orch::registry", job_name = %project.name, repository = %repository, "Duplicate job name in manifest, keeping last");
            }
            jobs.insert(
                project.name.clone(),
                Job {
                    job_name: project.name.clone(),
                    image: format!("{}/{}", prefix, repository),
                    versions,
                    identity_name: project.identity_name.clone(),
                },
            );
        }
        Ok(jobs)
    }

    /// Refresh loop. The first tick fires immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            target: "orch::registry",
            "Job registry refresh loop started with interval={:?}, filter={}",
            self.config.refresh_interval, self.config.repository_filter
        );

        let mut ticker = interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(target: "orch::registry", "Job registry refresh loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match AssertUnwindSafe(self.refresh()).catch_unwind().await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!(target: "orch::registry", "Job registry refresh failed, keeping previous catalog: {}", e),
                        Err(_) => error!(target: "orch::registry", "Job registry refresh panicked, keeping previous catalog"),
                    }
                }
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(cancel))
    }
}

#[async_trait]
impl JobCatalog for JobRegistry {
    async fn get_all(&self, page: Page) -> Vec<Job> {
        page.apply(self.jobs.read().await.values().cloned())
    }

    async fn get_by_name(&self, job_name: &str) -> Option<Job> {
        self.jobs.read().await.get(job_name).cloned()
    }

    async fn is_existing(&self, job_name: &str, version: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(job_name)
            .is_some_and(|job| job.has_version(version))
    }
}
