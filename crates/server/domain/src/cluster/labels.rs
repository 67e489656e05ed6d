//! Label contract shared by every cluster backend.
//!
//! The reconciliation listing selects on exactly these keys.

use std::collections::BTreeMap;

use crate::job_instances::JobInstance;

pub const PART_OF: &str = "app.kubernetes.io/part-of";
pub const COMPONENT: &str = "app.kubernetes.io/component";
pub const REQUEST_ID: &str = "orch.io/request_id";
pub const WORKFLOW_ID: &str = "orch.io/workflow_id";
pub const JOB_NAME: &str = "orch.io/job_name";
pub const JOB_VERSION: &str = "orch.io/job_version";

pub const PART_OF_VALUE: &str = "ORCH";
pub const COMPONENT_JOB: &str = "JOB";

/// Labels carried by both the configuration and the workload of an instance
pub fn instance_labels(instance: &JobInstance) -> BTreeMap<String, String> {
    BTreeMap::from([
        (PART_OF.to_string(), PART_OF_VALUE.to_string()),
        (COMPONENT.to_string(), COMPONENT_JOB.to_string()),
        (REQUEST_ID.to_string(), instance.request_id.clone()),
        (WORKFLOW_ID.to_string(), instance.workflow_id.clone()),
        (JOB_NAME.to_string(), instance.job_name.clone()),
        (JOB_VERSION.to_string(), instance.job_version.clone()),
    ])
}

/// Base selector plus optional request/workflow filters, in `k=v,k=v` form
pub fn selector(request_id: Option<&str>, workflow_id: Option<&str>) -> String {
    let mut parts = vec![
        format!("{}={}", PART_OF, PART_OF_VALUE),
        format!("{}={}", COMPONENT, COMPONENT_JOB),
    ];
    if let Some(request_id) = request_id {
        parts.push(format!("{}={}", REQUEST_ID, request_id));
    }
    if let Some(workflow_id) = workflow_id {
        parts.push(format!("{}={}", WORKFLOW_ID, workflow_id));
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_selector() {
        assert_eq!(
            selector(None, None),
            "app.kubernetes.io/part-of=ORCH,app.kubernetes.io/component=JOB"
        );
    }

    #[test]
    fn test_selector_with_filters() {
        let s = selector(Some("R1"), Some("W1"));
        assert!(s.ends_with("orch.io/request_id=R1,orch.io/workflow_id=W1"));
    }

    #[test]
    fn test_instance_labels_cover_contract() {
        let instance = JobInstance::new("R1", "W1", "transcode", "1.0");
        let labels = instance_labels(&instance);
        assert_eq!(labels.len(), 6);
        assert_eq!(labels[COMPONENT], "JOB");
        assert_eq!(labels[JOB_VERSION], "1.0");
    }
}
