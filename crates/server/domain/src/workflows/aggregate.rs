//! Workflow aggregate and event routes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventMessage;
use crate::shared_kernel::JobRef;

/// Rule mapping an event (plus optional source filter) to a job invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRoute {
    pub event_name: String,
    /// `None` matches any source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    pub job_name: String,
    pub job_version: String,
}

impl EventRoute {
    pub fn matches(&self, event: &EventMessage) -> bool {
        self.event_name == event.event
            && self
                .event_source
                .as_deref()
                .is_none_or(|source| source == event.source_id)
    }

    pub fn job_ref(&self) -> JobRef {
        JobRef::new(&self.job_name, &self.job_version)
    }
}

/// Identity of whoever registered a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
}

/// Named collection of event routes triggered under one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub event_routes: Vec<EventRoute>,
    #[serde(default)]
    pub created_by: ServiceIdentity,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// Routes triggered by `event`, in declaration order
    pub fn active_routes<'a>(&'a self, event: &EventMessage) -> Vec<&'a EventRoute> {
        self.event_routes
            .iter()
            .filter(|route| route.matches(event))
            .collect()
    }

    /// Distinct job references of all routes, in declaration order
    pub fn job_refs(&self) -> Vec<JobRef> {
        let mut refs: Vec<JobRef> = Vec::with_capacity(self.event_routes.len());
        for route in &self.event_routes {
            let job_ref = route.job_ref();
            if !refs.contains(&job_ref) {
                refs.push(job_ref);
            }
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn route(event_source: Option<&str>) -> EventRoute {
        EventRoute {
            event_name: "INGESTED".to_string(),
            event_source: event_source.map(str::to_string),
            job_name: "transcode".to_string(),
            job_version: "1.0".to_string(),
        }
    }

    #[rstest]
    #[case(None, "INGESTED", "other", true)]
    #[case(Some("ingestor"), "INGESTED", "ingestor", true)]
    #[case(Some("ingestor"), "INGESTED", "other", false)]
    #[case(None, "DELETED", "other", false)]
    fn test_route_matching(
        #[case] source_filter: Option<&str>,
        #[case] event_name: &str,
        #[case] source_id: &str,
        #[case] expected: bool,
    ) {
        let event = EventMessage::new(event_name, source_id, "R1", "W1");
        assert_eq!(route(source_filter).matches(&event), expected);
    }

    #[test]
    fn test_active_routes_keep_declaration_order() {
        let mut second = route(None);
        second.job_name = "index".to_string();
        let workflow = Workflow {
            workflow_id: "W1".to_string(),
            event_routes: vec![route(Some("elsewhere")), route(None), second],
            created_by: ServiceIdentity::default(),
            created_at: Utc::now(),
        };

        let event = EventMessage::new("INGESTED", "other", "R1", "W1");
        let active: Vec<&str> = workflow
            .active_routes(&event)
            .into_iter()
            .map(|r| r.job_name.as_str())
            .collect();
        assert_eq!(active, vec!["transcode", "index"]);
    }

    #[test]
    fn test_created_at_defaults_on_registration_payload() {
        let raw = r#"{"workflow_id":"W1","event_routes":[
            {"event_name":"INGESTED","job_name":"transcode","job_version":"1.0"}
        ]}"#;
        let workflow: Workflow = serde_json::from_str(raw).unwrap();
        assert!(workflow.event_routes[0].event_source.is_none());
        assert_eq!(workflow.job_refs(), vec![JobRef::new("transcode", "1.0")]);
    }
}
