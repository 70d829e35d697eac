use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// The closed set of edge kinds in the property graph (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    HostService,
    HostVhost,
    ServiceEndpoint,
    ServiceInput,
    ServiceCredential,
    ServiceVulnerability,
    ServiceObservation,
    EndpointInput,
    EndpointVulnerability,
    EndpointCredential,
    InputObservation,
    VulnerabilityCve,
    VhostEndpoint,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 13] = [
        EdgeKind::HostService,
        EdgeKind::HostVhost,
        EdgeKind::ServiceEndpoint,
        EdgeKind::ServiceInput,
        EdgeKind::ServiceCredential,
        EdgeKind::ServiceVulnerability,
        EdgeKind::ServiceObservation,
        EdgeKind::EndpointInput,
        EdgeKind::EndpointVulnerability,
        EdgeKind::EndpointCredential,
        EdgeKind::InputObservation,
        EdgeKind::VulnerabilityCve,
        EdgeKind::VhostEndpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::HostService => "HOST_SERVICE",
            EdgeKind::HostVhost => "HOST_VHOST",
            EdgeKind::ServiceEndpoint => "SERVICE_ENDPOINT",
            EdgeKind::ServiceInput => "SERVICE_INPUT",
            EdgeKind::ServiceCredential => "SERVICE_CREDENTIAL",
            EdgeKind::ServiceVulnerability => "SERVICE_VULNERABILITY",
            EdgeKind::ServiceObservation => "SERVICE_OBSERVATION",
            EdgeKind::EndpointInput => "ENDPOINT_INPUT",
            EdgeKind::EndpointVulnerability => "ENDPOINT_VULNERABILITY",
            EdgeKind::EndpointCredential => "ENDPOINT_CREDENTIAL",
            EdgeKind::InputObservation => "INPUT_OBSERVATION",
            EdgeKind::VulnerabilityCve => "VULNERABILITY_CVE",
            EdgeKind::VhostEndpoint => "VHOST_ENDPOINT",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidEnum {
                field: "kind".to_string(),
                allowed: EdgeKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
                got: s.to_string(),
            })
    }
}

/// A directed edge row. Edges are never mutated after creation (spec §3.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub kind: EdgeKind,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub props_json: serde_json::Value,
    pub evidence_artifact_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
