//! Per-kind property schemas (spec §4.2).
//!
//! Props are validated at the boundary (here) and then carried around as
//! an opaque `serde_json::Value` by the storage layer — once `NodeKind`
//! is known the shape of `props` is known too, so each variant gets one
//! `from_json`/`to_json` pair instead of a general-purpose schema checker.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::node::NodeKind;

fn obj(json: &Value) -> Result<&Map<String, Value>, ValidationError> {
    json.as_object().ok_or_else(|| ValidationError::WrongType {
        field: "props".to_string(),
        detail: "expected a JSON object".to_string(),
    })
}

fn req_str(map: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    match map.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(ValidationError::EmptyField(field.to_string())),
        Some(_) => Err(ValidationError::WrongType {
            field: field.to_string(),
            detail: "expected a string".to_string(),
        }),
        None => Err(ValidationError::MissingField(field.to_string())),
    }
}

fn opt_str(map: &Map<String, Value>, field: &str) -> Option<String> {
    map.get(field).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn req_enum(map: &Map<String, Value>, field: &str, allowed: &[&str]) -> Result<String, ValidationError> {
    let got = req_str(map, field)?;
    if allowed.contains(&got.as_str()) {
        Ok(got)
    } else {
        Err(ValidationError::InvalidEnum {
            field: field.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            got,
        })
    }
}

fn opt_enum(
    map: &Map<String, Value>,
    field: &str,
    allowed: &[&str],
    default: &str,
) -> Result<String, ValidationError> {
    match map.get(field) {
        None => Ok(default.to_string()),
        Some(Value::String(s)) if allowed.contains(&s.as_str()) => Ok(s.clone()),
        Some(Value::String(s)) => Err(ValidationError::InvalidEnum {
            field: field.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            got: s.clone(),
        }),
        Some(_) => Err(ValidationError::WrongType {
            field: field.to_string(),
            detail: "expected a string".to_string(),
        }),
    }
}

fn req_u16_range(map: &Map<String, Value>, field: &str, lo: i64, hi: i64) -> Result<u16, ValidationError> {
    let n = map
        .get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ValidationError::MissingField(field.to_string()))?;
    if n < lo || n > hi {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            detail: format!("{n} not in [{lo},{hi}]"),
        });
    }
    Ok(n as u16)
}

fn req_f64(map: &Map<String, Value>, field: &str) -> Result<f64, ValidationError> {
    map.get(field)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ValidationError::MissingField(field.to_string()))
}

fn opt_i64(map: &Map<String, Value>, field: &str) -> Option<i64> {
    map.get(field).and_then(|v| v.as_i64())
}

fn opt_f64(map: &Map<String, Value>, field: &str) -> Option<f64> {
    map.get(field).and_then(|v| v.as_f64())
}

macro_rules! insert_opt {
    ($m:expr, $key:expr, $val:expr) => {
        if let Some(v) = $val {
            $m.insert($key.to_string(), json!(v));
        }
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostProps {
    pub authority_kind: String, // IP | DOMAIN
    pub authority: String,
    pub resolved_ips_json: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VhostProps {
    pub hostname: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceProps {
    pub transport: String, // tcp | udp
    pub port: u16,
    pub app_proto: String,
    pub proto_confidence: String, // high | medium | low
    pub state: String,            // open | closed | filtered
    pub banner: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointProps {
    pub base_uri: String,
    pub method: String,
    pub path: String,
    pub status_code: Option<i64>,
    pub content_length: Option<i64>,
    pub words: Option<i64>,
    pub lines: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputProps {
    pub location: String, // query | path | body | header | cookie
    pub name: String,
    pub type_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationProps {
    pub raw_value: String,
    pub norm_value: String,
    pub source: String,
    pub confidence: f64,
    pub observed_at: String,
    pub body_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialProps {
    pub username: String,
    pub secret: String,
    pub secret_type: String, // password | token | api_key | ssh_key
    pub source: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VulnerabilityProps {
    pub vuln_type: String,
    pub title: String,
    pub severity: String, // critical | high | medium | low | info
    pub confidence: f64,
    pub description: Option<String>,
    pub status: String, // unverified | confirmed | false_positive | not_exploitable
}

#[derive(Debug, Clone, PartialEq)]
pub struct CveProps {
    pub cve_id: String,
    pub description: Option<String>,
    pub cvss_score: Option<f64>,
    pub cvss_vector: Option<String>,
    pub reference_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvcObservationProps {
    pub key: String,
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeProps {
    Host(HostProps),
    Vhost(VhostProps),
    Service(ServiceProps),
    Endpoint(EndpointProps),
    Input(InputProps),
    Observation(ObservationProps),
    Credential(CredentialProps),
    Vulnerability(VulnerabilityProps),
    Cve(CveProps),
    SvcObservation(SvcObservationProps),
}

impl NodeProps {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeProps::Host(_) => NodeKind::Host,
            NodeProps::Vhost(_) => NodeKind::Vhost,
            NodeProps::Service(_) => NodeKind::Service,
            NodeProps::Endpoint(_) => NodeKind::Endpoint,
            NodeProps::Input(_) => NodeKind::Input,
            NodeProps::Observation(_) => NodeKind::Observation,
            NodeProps::Credential(_) => NodeKind::Credential,
            NodeProps::Vulnerability(_) => NodeKind::Vulnerability,
            NodeProps::Cve(_) => NodeKind::Cve,
            NodeProps::SvcObservation(_) => NodeKind::SvcObservation,
        }
    }

    /// Validate `json` against the schema for `kind` and produce the typed form.
    pub fn from_json(kind: NodeKind, json: &Value) -> Result<NodeProps, ValidationError> {
        let m = obj(json)?;
        Ok(match kind {
            NodeKind::Host => NodeProps::Host(HostProps {
                authority_kind: req_enum(m, "authorityKind", &["IP", "DOMAIN"])?,
                authority: req_str(m, "authority")?,
                resolved_ips_json: opt_str(m, "resolvedIpsJson").unwrap_or_else(|| "[]".to_string()),
            }),
            NodeKind::Vhost => NodeProps::Vhost(VhostProps {
                hostname: req_str(m, "hostname")?,
                source: opt_str(m, "source"),
            }),
            NodeKind::Service => NodeProps::Service(ServiceProps {
                transport: req_enum(m, "transport", &["tcp", "udp"])?,
                port: req_u16_range(m, "port", 0, 65535)?,
                app_proto: req_str(m, "appProto")?,
                proto_confidence: req_enum(m, "protoConfidence", &["high", "medium", "low"])?,
                state: req_enum(m, "state", &["open", "closed", "filtered"])?,
                banner: opt_str(m, "banner"),
                product: opt_str(m, "product"),
                version: opt_str(m, "version"),
            }),
            NodeKind::Endpoint => NodeProps::Endpoint(EndpointProps {
                base_uri: req_str(m, "baseUri")?,
                method: req_str(m, "method")?,
                path: req_str(m, "path")?,
                status_code: opt_i64(m, "statusCode"),
                content_length: opt_i64(m, "contentLength"),
                words: opt_i64(m, "words"),
                lines: opt_i64(m, "lines"),
            }),
            NodeKind::Input => NodeProps::Input(InputProps {
                location: req_enum(m, "location", &["query", "path", "body", "header", "cookie"])?,
                name: req_str(m, "name")?,
                type_hint: opt_str(m, "typeHint"),
            }),
            NodeKind::Observation => NodeProps::Observation(ObservationProps {
                raw_value: req_str(m, "rawValue")?,
                norm_value: req_str(m, "normValue")?,
                source: req_str(m, "source")?,
                confidence: req_f64(m, "confidence")?,
                observed_at: req_str(m, "observedAt")?,
                body_path: opt_str(m, "bodyPath"),
            }),
            NodeKind::Credential => NodeProps::Credential(CredentialProps {
                username: req_str(m, "username")?,
                secret: req_str(m, "secret")?,
                secret_type: req_enum(m, "secretType", &["password", "token", "api_key", "ssh_key"])?,
                source: req_str(m, "source")?,
                confidence: req_f64(m, "confidence")?,
            }),
            NodeKind::Vulnerability => NodeProps::Vulnerability(VulnerabilityProps {
                vuln_type: req_str(m, "vulnType")?,
                title: req_str(m, "title")?,
                severity: req_enum(m, "severity", &["critical", "high", "medium", "low", "info"])?,
                confidence: req_f64(m, "confidence")?,
                description: opt_str(m, "description"),
                status: opt_enum(
                    m,
                    "status",
                    &["unverified", "confirmed", "false_positive", "not_exploitable"],
                    "unverified",
                )?,
            }),
            NodeKind::Cve => NodeProps::Cve(CveProps {
                cve_id: req_str(m, "cveId")?,
                description: opt_str(m, "description"),
                cvss_score: opt_f64(m, "cvssScore"),
                cvss_vector: opt_str(m, "cvssVector"),
                reference_url: opt_str(m, "referenceUrl"),
            }),
            NodeKind::SvcObservation => NodeProps::SvcObservation(SvcObservationProps {
                key: req_str(m, "key")?,
                value: req_str(m, "value")?,
                confidence: req_f64(m, "confidence")?,
            }),
        })
    }

    pub fn to_json(&self) -> Value {
        match self {
            NodeProps::Host(p) => json!({
                "authorityKind": p.authority_kind,
                "authority": p.authority,
                "resolvedIpsJson": p.resolved_ips_json,
            }),
            NodeProps::Vhost(p) => {
                let mut m = Map::new();
                m.insert("hostname".to_string(), json!(p.hostname));
                insert_opt!(m, "source", p.source.clone());
                Value::Object(m)
            }
            NodeProps::Service(p) => {
                let mut m = Map::new();
                m.insert("transport".to_string(), json!(p.transport));
                m.insert("port".to_string(), json!(p.port));
                m.insert("appProto".to_string(), json!(p.app_proto));
                m.insert("protoConfidence".to_string(), json!(p.proto_confidence));
                m.insert("state".to_string(), json!(p.state));
                insert_opt!(m, "banner", p.banner.clone());
                insert_opt!(m, "product", p.product.clone());
                insert_opt!(m, "version", p.version.clone());
                Value::Object(m)
            }
            NodeProps::Endpoint(p) => {
                let mut m = Map::new();
                m.insert("baseUri".to_string(), json!(p.base_uri));
                m.insert("method".to_string(), json!(p.method));
                m.insert("path".to_string(), json!(p.path));
                insert_opt!(m, "statusCode", p.status_code);
                insert_opt!(m, "contentLength", p.content_length);
                insert_opt!(m, "words", p.words);
                insert_opt!(m, "lines", p.lines);
                Value::Object(m)
            }
            NodeProps::Input(p) => {
                let mut m = Map::new();
                m.insert("location".to_string(), json!(p.location));
                m.insert("name".to_string(), json!(p.name));
                insert_opt!(m, "typeHint", p.type_hint.clone());
                Value::Object(m)
            }
            NodeProps::Observation(p) => {
                let mut m = Map::new();
                m.insert("rawValue".to_string(), json!(p.raw_value));
                m.insert("normValue".to_string(), json!(p.norm_value));
                m.insert("source".to_string(), json!(p.source));
                m.insert("confidence".to_string(), json!(p.confidence));
                m.insert("observedAt".to_string(), json!(p.observed_at));
                insert_opt!(m, "bodyPath", p.body_path.clone());
                Value::Object(m)
            }
            NodeProps::Credential(p) => json!({
                "username": p.username,
                "secret": p.secret,
                "secretType": p.secret_type,
                "source": p.source,
                "confidence": p.confidence,
            }),
            NodeProps::Vulnerability(p) => {
                let mut m = Map::new();
                m.insert("vulnType".to_string(), json!(p.vuln_type));
                m.insert("title".to_string(), json!(p.title));
                m.insert("severity".to_string(), json!(p.severity));
                m.insert("confidence".to_string(), json!(p.confidence));
                insert_opt!(m, "description", p.description.clone());
                m.insert("status".to_string(), json!(p.status));
                Value::Object(m)
            }
            NodeProps::Cve(p) => {
                let mut m = Map::new();
                m.insert("cveId".to_string(), json!(p.cve_id));
                insert_opt!(m, "description", p.description.clone());
                insert_opt!(m, "cvssScore", p.cvss_score);
                insert_opt!(m, "cvssVector", p.cvss_vector.clone());
                insert_opt!(m, "referenceUrl", p.reference_url.clone());
                Value::Object(m)
            }
            NodeProps::SvcObservation(p) => json!({
                "key": p.key,
                "value": p.value,
                "confidence": p.confidence,
            }),
        }
    }

    /// Right-biased union merge: `patch` wins on key collision, the result
    /// is revalidated (spec §4.2 `upsert`/`updateProps`, property "Upsert merge").
    pub fn merge(kind: NodeKind, base: &Value, patch: &Value) -> Result<NodeProps, ValidationError> {
        let mut merged = obj(base)?.clone();
        for (k, v) in obj(patch)? {
            merged.insert(k.clone(), v.clone());
        }
        NodeProps::from_json(kind, &Value::Object(merged))
    }

    /// Derive the deterministic natural key for this kind (spec §4.2 table,
    /// invariant 5). `parent_id` is required whenever the template
    /// references `{parentId}`; kinds whose template embeds a fresh UUID
    /// always produce a new key (never collide on upsert).
    pub fn natural_key(&self, parent_id: Option<Uuid>) -> Result<String, ValidationError> {
        let need_parent = || parent_id.ok_or(ValidationError::MissingParentId);
        Ok(match self {
            NodeProps::Host(p) => format!("host:{}", p.authority),
            NodeProps::Vhost(p) => format!("vhost:{}:{}", need_parent()?, p.hostname),
            NodeProps::Service(p) => format!("svc:{}:{}:{}", need_parent()?, p.transport, p.port),
            NodeProps::Endpoint(p) => format!("ep:{}:{}:{}", need_parent()?, p.method, p.path),
            NodeProps::Input(p) => format!("in:{}:{}:{}", need_parent()?, p.location, p.name),
            NodeProps::Observation(_) => format!("obs:{}", Uuid::new_v4()),
            NodeProps::Credential(_) => format!("cred:{}", Uuid::new_v4()),
            NodeProps::Vulnerability(_) => format!("vuln:{}", Uuid::new_v4()),
            NodeProps::Cve(p) => format!("cve:{}:{}", need_parent()?, p.cve_id),
            NodeProps::SvcObservation(_) => format!("svcobs:{}", Uuid::new_v4()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_round_trips_through_json() {
        let json = json!({"authorityKind": "IP", "authority": "10.0.0.1"});
        let props = NodeProps::from_json(NodeKind::Host, &json).unwrap();
        assert_eq!(props.natural_key(None).unwrap(), "host:10.0.0.1");
        assert_eq!(props.to_json()["resolvedIpsJson"], json!("[]"));
    }

    #[test]
    fn service_rejects_bad_port() {
        let json = json!({
            "transport": "tcp", "port": 70000, "appProto": "http",
            "protoConfidence": "high", "state": "open"
        });
        assert!(matches!(
            NodeProps::from_json(NodeKind::Service, &json),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn vulnerability_defaults_status_to_unverified() {
        let json = json!({
            "vulnType": "sqli", "title": "SQL injection", "severity": "high", "confidence": 0.9
        });
        let props = NodeProps::from_json(NodeKind::Vulnerability, &json).unwrap();
        if let NodeProps::Vulnerability(v) = &props {
            assert_eq!(v.status, "unverified");
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn merge_is_right_biased() {
        let base = json!({"hostname": "a.example.com"});
        let patch = json!({"hostname": "b.example.com", "source": "vhost-scan"});
        let merged = NodeProps::merge(NodeKind::Vhost, &base, &patch).unwrap();
        if let NodeProps::Vhost(v) = merged {
            assert_eq!(v.hostname, "b.example.com");
            assert_eq!(v.source.as_deref(), Some("vhost-scan"));
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn uuid_keyed_kinds_never_collide() {
        let json = json!({
            "username": "root", "secret": "hunter2", "secretType": "password",
            "source": "ssh-brute", "confidence": 0.5
        });
        let a = NodeProps::from_json(NodeKind::Credential, &json).unwrap();
        let b = NodeProps::from_json(NodeKind::Credential, &json).unwrap();
        assert_ne!(a.natural_key(None).unwrap(), b.natural_key(None).unwrap());
    }

    #[test]
    fn missing_required_field_is_validation_error() {
        let json = json!({"authority": "10.0.0.1"});
        assert!(matches!(
            NodeProps::from_json(NodeKind::Host, &json),
            Err(ValidationError::MissingField(f)) if f == "authorityKind"
        ));
    }
}

#[cfg(test)]
mod props_proptests {
    use super::*;
    use proptest::prelude::*;

    fn authority_strategy() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}(\\.[a-z]{2,6}){1,3}".prop_map(|s| s)
    }

    proptest! {
        /// Natural-key determinism (spec §8, invariant 5): hashing the same
        /// host authority twice always yields the same natural key, and two
        /// different authorities never collide.
        #[test]
        fn host_natural_key_is_deterministic(authority in authority_strategy()) {
            let json = json!({"authorityKind": "DOMAIN", "authority": authority});
            let a = NodeProps::from_json(NodeKind::Host, &json).unwrap();
            let b = NodeProps::from_json(NodeKind::Host, &json).unwrap();
            prop_assert_eq!(a.natural_key(None).unwrap(), b.natural_key(None).unwrap());
        }

        /// Upsert merge (spec §8): merging a patch that only touches `source`
        /// never changes the base's `hostname`, and is idempotent when
        /// applied twice with the same patch.
        #[test]
        fn vhost_merge_is_idempotent(hostname in authority_strategy(), source in "[a-z-]{1,12}") {
            let base = json!({"hostname": hostname.clone()});
            let patch = json!({"source": source.clone()});
            let once = NodeProps::merge(NodeKind::Vhost, &base, &patch).unwrap();
            let twice = NodeProps::merge(NodeKind::Vhost, &once.to_json(), &patch).unwrap();
            prop_assert_eq!(once.to_json(), twice.to_json());
            if let NodeProps::Vhost(v) = twice {
                prop_assert_eq!(v.hostname, hostname);
                prop_assert_eq!(v.source, Some(source));
            } else {
                prop_assert!(false, "wrong variant");
            }
        }
    }
}
