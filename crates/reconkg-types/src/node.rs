use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// The closed set of node kinds in the property graph (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Host,
    Vhost,
    Service,
    Endpoint,
    Input,
    Observation,
    Credential,
    Vulnerability,
    Cve,
    SvcObservation,
}

impl NodeKind {
    pub const ALL: [NodeKind; 10] = [
        NodeKind::Host,
        NodeKind::Vhost,
        NodeKind::Service,
        NodeKind::Endpoint,
        NodeKind::Input,
        NodeKind::Observation,
        NodeKind::Credential,
        NodeKind::Vulnerability,
        NodeKind::Cve,
        NodeKind::SvcObservation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Host => "host",
            NodeKind::Vhost => "vhost",
            NodeKind::Service => "service",
            NodeKind::Endpoint => "endpoint",
            NodeKind::Input => "input",
            NodeKind::Observation => "observation",
            NodeKind::Credential => "credential",
            NodeKind::Vulnerability => "vulnerability",
            NodeKind::Cve => "cve",
            NodeKind::SvcObservation => "svc_observation",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NodeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(NodeKind::Host),
            "vhost" => Ok(NodeKind::Vhost),
            "service" => Ok(NodeKind::Service),
            "endpoint" => Ok(NodeKind::Endpoint),
            "input" => Ok(NodeKind::Input),
            "observation" => Ok(NodeKind::Observation),
            "credential" => Ok(NodeKind::Credential),
            "vulnerability" => Ok(NodeKind::Vulnerability),
            "cve" => Ok(NodeKind::Cve),
            "svc_observation" => Ok(NodeKind::SvcObservation),
            other => Err(ValidationError::InvalidEnum {
                field: "kind".to_string(),
                allowed: NodeKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
                got: other.to_string(),
            }),
        }
    }
}

/// A node row as seen by callers: typed kind, opaque id, validated props.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub kind: NodeKind,
    pub natural_key: String,
    pub props_json: serde_json::Value,
    pub evidence_artifact_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
