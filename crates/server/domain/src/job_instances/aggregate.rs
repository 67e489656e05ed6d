//! JobInstance aggregate and its status lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared_kernel::DomainError;

/// Instance identifier, `{job_name}-{uuid}`.
///
/// Also the name of the instance's workload and configuration in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn generate(job_name: &str) -> Self {
        Self(format!("{}-{}", job_name, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of a job instance.
///
/// Ordering is Unknown < {Pending < Running} < {Succeeded, Failed}; a status
/// never moves backwards and terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobInstanceStatus {
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobInstanceStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Pending => 1,
            Self::Running => 2,
            Self::Succeeded | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn can_transition_to(self, next: JobInstanceStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    /// Statuses from which `next` is reachable
    pub fn predecessors_of(next: JobInstanceStatus) -> Vec<JobInstanceStatus> {
        [
            Self::Unknown,
            Self::Pending,
            Self::Running,
            Self::Succeeded,
            Self::Failed,
        ]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect()
    }
}

impl fmt::Display for JobInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobInstanceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Self::Unknown),
            "Pending" => Ok(Self::Pending),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            other => Err(DomainError::InvalidArgument {
                field: "status".to_string(),
                reason: format!("unknown job instance status '{}'", other),
            }),
        }
    }
}

/// Outcome of a status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// Status moved forward
    Advanced { from: JobInstanceStatus },
    /// Same status observed again
    Unchanged,
    /// Would have moved backwards or out of a terminal state
    Rejected { current: JobInstanceStatus },
    /// No record for the instance
    Missing,
}

impl StatusTransition {
    /// True when this write moved the instance into a terminal state
    pub fn entered_terminal(&self, status: JobInstanceStatus) -> bool {
        matches!(self, StatusTransition::Advanced { .. }) && status.is_terminal()
    }
}

/// One invocation of a job for a specific event occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub instance_id: InstanceId,
    pub request_id: String,
    pub workflow_id: String,
    pub job_name: String,
    pub job_version: String,
    pub status: JobInstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl JobInstance {
    /// New instance for a dispatched route, starting at `Unknown`
    pub fn new(
        request_id: impl Into<String>,
        workflow_id: impl Into<String>,
        job_name: impl Into<String>,
        job_version: impl Into<String>,
    ) -> Self {
        let job_name = job_name.into();
        Self {
            instance_id: InstanceId::generate(&job_name),
            request_id: request_id.into(),
            workflow_id: workflow_id.into(),
            job_name,
            job_version: job_version.into(),
            status: JobInstanceStatus::Unknown,
            details: None,
        }
    }

    /// Apply an observed status, honouring monotonicity
    pub fn advance_status(&mut self, next: JobInstanceStatus) -> StatusTransition {
        if self.status == next {
            return StatusTransition::Unchanged;
        }
        if !self.status.can_transition_to(next) {
            return StatusTransition::Rejected {
                current: self.status,
            };
        }
        let from = self.status;
        self.status = next;
        StatusTransition::Advanced { from }
    }

    /// Record a deployment failure.
    ///
    /// The status becomes Failed unless the instance already finished; the
    /// details are always recorded.
    pub fn mark_failed(&mut self, details: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = JobInstanceStatus::Failed;
        }
        self.details = Some(details.into());
    }
}
