//! The collaborator's output (spec §4.4): `ParseResult` arrays of partial
//! records keyed by external identifiers (host authority, port, method,
//! path, location, name, title) rather than internal node ids. The
//! normalizer's whole job is resolving those external keys into node ids.

use serde::{Deserialize, Serialize};

fn default_transport() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseResult {
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
    #[serde(default)]
    pub service_observations: Vec<ServiceObservationRecord>,
    #[serde(default)]
    pub http_endpoints: Vec<HttpEndpointRecord>,
    #[serde(default)]
    pub inputs: Vec<InputRecord>,
    #[serde(default)]
    pub endpoint_inputs: Vec<EndpointInputRecord>,
    #[serde(default)]
    pub observations: Vec<ObservationRecord>,
    #[serde(default)]
    pub vulnerabilities: Vec<VulnerabilityRecord>,
    #[serde(default)]
    pub cves: Vec<CveRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub authority_kind: String,
    pub authority: String,
    #[serde(default)]
    pub resolved_ips_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub host_authority: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub port: u16,
    pub app_proto: String,
    pub proto_confidence: String,
    pub state: String,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceObservationRecord {
    pub host_authority: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub port: u16,
    pub key: String,
    pub value: String,
    pub confidence: f64,
}

/// Endpoints are HTTP; the service they attach to is always `tcp` in this
/// flow (spec §4.4 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEndpointRecord {
    pub host_authority: String,
    pub port: u16,
    pub base_uri: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub content_length: Option<i64>,
    #[serde(default)]
    pub words: Option<i64>,
    #[serde(default)]
    pub lines: Option<i64>,
}

/// Inputs belong to the same tcp/HTTP service as the endpoints they're
/// discovered on (spec §4.4 step 4's "services are tcp in this flow"
/// applies equally to steps 5-7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRecord {
    pub host_authority: String,
    pub port: u16,
    pub location: String,
    pub name: String,
    #[serde(default)]
    pub type_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointInputRecord {
    pub host_authority: String,
    pub port: u16,
    pub method: String,
    pub path: String,
    pub location: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub host_authority: String,
    pub port: u16,
    pub location: String,
    pub name: String,
    pub raw_value: String,
    pub norm_value: String,
    pub source: String,
    pub confidence: f64,
    pub observed_at: String,
    #[serde(default)]
    pub body_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub host_authority: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub port: u16,
    /// When present, also links ENDPOINT_VULNERABILITY to this endpoint.
    #[serde(default)]
    pub endpoint_method: Option<String>,
    #[serde(default)]
    pub endpoint_path: Option<String>,
    pub vuln_type: String,
    pub title: String,
    pub severity: String,
    pub confidence: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CveRecord {
    pub vulnerability_title: String,
    pub cve_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cvss_score: Option<f64>,
    #[serde(default)]
    pub cvss_vector: Option<String>,
    #[serde(default)]
    pub reference_url: Option<String>,
}

/// Counts of newly-created rows per kind (spec §4.4 contract). Records
/// skipped for an unresolvable external key are not counted anywhere — the
/// skip is silent, per spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeResult {
    pub hosts_created: u64,
    pub services_created: u64,
    pub service_observations_created: u64,
    pub http_endpoints_created: u64,
    pub inputs_created: u64,
    pub endpoint_inputs_linked: u64,
    pub observations_created: u64,
    pub vulnerabilities_created: u64,
    pub cves_created: u64,
}
