//! Normalizer (C5, spec §4.4): transactional batch upsert from a
//! `ParseResult` into the graph. Resolves the nine external-key arrays into
//! internal node ids, one local lookup map per entity type, carried only
//! for the lifetime of the transaction (spec §9 "no shared cache between
//! calls").

mod error;
mod records;

pub use error::{NormalizeError, Result};
pub use records::{
    CveRecord, EndpointInputRecord, HostRecord, HttpEndpointRecord, InputRecord, NormalizeResult,
    ObservationRecord, ParseResult, ServiceObservationRecord, ServiceRecord, VulnerabilityRecord,
};

use std::collections::HashMap;

use reconkg_graph::{txops, Db};
use reconkg_types::{EdgeKind, NodeKind};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

/// Run the nine-step resolution described in spec §4.4 inside a single
/// transaction. All-or-nothing: any validation failure aborts the whole
/// batch, but an individual record whose external key cannot be resolved
/// against an earlier step's map is simply skipped.
pub async fn normalize(db: &Db, artifact_id: Option<Uuid>, parsed: &ParseResult) -> Result<NormalizeResult> {
    let mut tx = db.pool().begin().await.map_err(reconkg_graph::GraphError::from)?;
    let mut result = NormalizeResult::default();

    let mut host_by_authority: HashMap<String, Uuid> = HashMap::new();
    let mut service_by_key: HashMap<(Uuid, String, u16), Uuid> = HashMap::new();
    let mut endpoint_by_key: HashMap<(Uuid, String, String), Uuid> = HashMap::new();
    let mut input_by_key: HashMap<(Uuid, String, String), Uuid> = HashMap::new();
    let mut vuln_by_title: HashMap<String, Uuid> = HashMap::new();

    // 1. hosts
    for rec in &parsed.hosts {
        let mut props = json!({ "authorityKind": rec.authority_kind, "authority": rec.authority });
        if let Some(ips) = &rec.resolved_ips_json {
            props["resolvedIpsJson"] = json!(ips);
        }
        let (node, created) = txops::upsert_node(&mut tx, NodeKind::Host, &props, artifact_id, None).await?;
        if created {
            result.hosts_created += 1;
        }
        host_by_authority.insert(rec.authority.clone(), node.id);
    }

    // 2. services
    for rec in &parsed.services {
        let Some(&host_id) = host_by_authority.get(&rec.host_authority) else {
            debug!(authority = %rec.host_authority, "normalize: skipping service, host unresolved");
            continue;
        };
        let mut props = json!({
            "transport": rec.transport,
            "port": rec.port,
            "appProto": rec.app_proto,
            "protoConfidence": rec.proto_confidence,
            "state": rec.state,
        });
        for (key, val) in [("banner", &rec.banner), ("product", &rec.product), ("version", &rec.version)] {
            if let Some(v) = val {
                props[key] = json!(v);
            }
        }
        let (node, created) =
            txops::upsert_node(&mut tx, NodeKind::Service, &props, artifact_id, Some(host_id)).await?;
        if created {
            result.services_created += 1;
        }
        txops::upsert_edge(&mut tx, EdgeKind::HostService, host_id, node.id, artifact_id).await?;
        service_by_key.insert((host_id, rec.transport.clone(), rec.port), node.id);
    }

    // 3. service_observations
    for rec in &parsed.service_observations {
        let Some(&host_id) = host_by_authority.get(&rec.host_authority) else {
            continue;
        };
        let Some(&service_id) = service_by_key.get(&(host_id, rec.transport.clone(), rec.port)) else {
            debug!(authority = %rec.host_authority, port = rec.port, "normalize: skipping service_observation, service unresolved");
            continue;
        };
        let props = json!({ "key": rec.key, "value": rec.value, "confidence": rec.confidence });
        let (node, created) =
            txops::upsert_node(&mut tx, NodeKind::SvcObservation, &props, artifact_id, None).await?;
        if created {
            result.service_observations_created += 1;
        }
        txops::upsert_edge(&mut tx, EdgeKind::ServiceObservation, service_id, node.id, artifact_id).await?;
    }

    // 4. http_endpoints (service is always tcp in this flow)
    for rec in &parsed.http_endpoints {
        let Some(&host_id) = host_by_authority.get(&rec.host_authority) else {
            continue;
        };
        let Some(&service_id) = service_by_key.get(&(host_id, "tcp".to_string(), rec.port)) else {
            debug!(authority = %rec.host_authority, port = rec.port, "normalize: skipping endpoint, service unresolved");
            continue;
        };
        let mut props = json!({ "baseUri": rec.base_uri, "method": rec.method, "path": rec.path });
        for (key, val) in [
            ("statusCode", rec.status_code),
            ("contentLength", rec.content_length),
            ("words", rec.words),
            ("lines", rec.lines),
        ] {
            if let Some(v) = val {
                props[key] = json!(v);
            }
        }
        let (node, created) =
            txops::upsert_node(&mut tx, NodeKind::Endpoint, &props, artifact_id, Some(service_id)).await?;
        if created {
            result.http_endpoints_created += 1;
        }
        txops::upsert_edge(&mut tx, EdgeKind::ServiceEndpoint, service_id, node.id, artifact_id).await?;
        endpoint_by_key.insert((service_id, rec.method.clone(), rec.path.clone()), node.id);
    }

    // 5. inputs
    for rec in &parsed.inputs {
        let Some(&host_id) = host_by_authority.get(&rec.host_authority) else {
            continue;
        };
        let Some(&service_id) = service_by_key.get(&(host_id, "tcp".to_string(), rec.port)) else {
            debug!(authority = %rec.host_authority, port = rec.port, "normalize: skipping input, service unresolved");
            continue;
        };
        let mut props = json!({ "location": rec.location, "name": rec.name });
        if let Some(th) = &rec.type_hint {
            props["typeHint"] = json!(th);
        }
        let (node, created) =
            txops::upsert_node(&mut tx, NodeKind::Input, &props, artifact_id, Some(service_id)).await?;
        if created {
            result.inputs_created += 1;
        }
        txops::upsert_edge(&mut tx, EdgeKind::ServiceInput, service_id, node.id, artifact_id).await?;
        input_by_key.insert((service_id, rec.location.clone(), rec.name.clone()), node.id);
    }

    // 6. endpoint_inputs (edges only; both endpoints and inputs were keyed
    // above by the service they share)
    for rec in &parsed.endpoint_inputs {
        let Some(&host_id) = host_by_authority.get(&rec.host_authority) else {
            continue;
        };
        let Some(&service_id) = service_by_key.get(&(host_id, "tcp".to_string(), rec.port)) else {
            continue;
        };
        let endpoint_id = endpoint_by_key.get(&(service_id, rec.method.clone(), rec.path.clone()));
        let input_id = input_by_key.get(&(service_id, rec.location.clone(), rec.name.clone()));
        let (Some(&endpoint_id), Some(&input_id)) = (endpoint_id, input_id) else {
            debug!("normalize: skipping endpoint_input, endpoint or input unresolved");
            continue;
        };
        txops::upsert_edge(&mut tx, EdgeKind::EndpointInput, endpoint_id, input_id, artifact_id).await?;
        result.endpoint_inputs_linked += 1;
    }

    // 7. observations (always fresh; INPUT_OBSERVATION edge)
    for rec in &parsed.observations {
        let Some(&host_id) = host_by_authority.get(&rec.host_authority) else {
            continue;
        };
        let Some(&service_id) = service_by_key.get(&(host_id, "tcp".to_string(), rec.port)) else {
            continue;
        };
        let Some(&input_id) = input_by_key.get(&(service_id, rec.location.clone(), rec.name.clone())) else {
            debug!(authority = %rec.host_authority, port = rec.port, "normalize: skipping observation, input unresolved");
            continue;
        };
        let mut props = json!({
            "rawValue": rec.raw_value,
            "normValue": rec.norm_value,
            "source": rec.source,
            "confidence": rec.confidence,
            "observedAt": rec.observed_at,
        });
        if let Some(bp) = &rec.body_path {
            props["bodyPath"] = json!(bp);
        }
        let (node, _created) = txops::upsert_node(&mut tx, NodeKind::Observation, &props, artifact_id, None).await?;
        result.observations_created += 1;
        txops::upsert_edge(&mut tx, EdgeKind::InputObservation, input_id, node.id, artifact_id).await?;
    }

    // 8. vulnerabilities (attach to service, optionally to endpoint)
    for rec in &parsed.vulnerabilities {
        let Some(&host_id) = host_by_authority.get(&rec.host_authority) else {
            continue;
        };
        let Some(&service_id) = service_by_key.get(&(host_id, rec.transport.clone(), rec.port)) else {
            debug!(authority = %rec.host_authority, port = rec.port, "normalize: skipping vulnerability, service unresolved");
            continue;
        };
        let mut props = json!({
            "vulnType": rec.vuln_type,
            "title": rec.title,
            "severity": rec.severity,
            "confidence": rec.confidence,
        });
        if let Some(d) = &rec.description {
            props["description"] = json!(d);
        }
        if let Some(s) = &rec.status {
            props["status"] = json!(s);
        }
        let (node, _created) =
            txops::upsert_node(&mut tx, NodeKind::Vulnerability, &props, artifact_id, None).await?;
        result.vulnerabilities_created += 1;
        txops::upsert_edge(&mut tx, EdgeKind::ServiceVulnerability, service_id, node.id, artifact_id).await?;

        if let (Some(method), Some(path)) = (&rec.endpoint_method, &rec.endpoint_path) {
            if let Some(&endpoint_id) = endpoint_by_key.get(&(service_id, method.clone(), path.clone())) {
                txops::upsert_edge(&mut tx, EdgeKind::EndpointVulnerability, endpoint_id, node.id, artifact_id)
                    .await?;
            }
        }
        vuln_by_title.insert(rec.title.clone(), node.id);
    }

    // 9. cves (resolve parent vulnerability by title through step 8's map)
    for rec in &parsed.cves {
        let Some(&vuln_id) = vuln_by_title.get(&rec.vulnerability_title) else {
            debug!(title = %rec.vulnerability_title, "normalize: skipping cve, vulnerability unresolved");
            continue;
        };
        let mut props = json!({ "cveId": rec.cve_id });
        if let Some(d) = &rec.description {
            props["description"] = json!(d);
        }
        if let Some(s) = rec.cvss_score {
            props["cvssScore"] = json!(s);
        }
        if let Some(v) = &rec.cvss_vector {
            props["cvssVector"] = json!(v);
        }
        if let Some(u) = &rec.reference_url {
            props["referenceUrl"] = json!(u);
        }
        let (node, created) =
            txops::upsert_node(&mut tx, NodeKind::Cve, &props, artifact_id, Some(vuln_id)).await?;
        if created {
            result.cves_created += 1;
        }
        txops::upsert_edge(&mut tx, EdgeKind::VulnerabilityCve, vuln_id, node.id, artifact_id).await?;
    }

    tx.commit().await.map_err(reconkg_graph::GraphError::from)?;
    info!(
        hosts = result.hosts_created,
        services = result.services_created,
        endpoints = result.http_endpoints_created,
        vulnerabilities = result.vulnerabilities_created,
        "normalize: batch committed"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconkg_graph::migrate;
    use reconkg_graph::{EdgeRepository, NodeRepository};
    use reconkg_types::NodeKind as NK;

    async fn fresh_db() -> Db {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        db
    }

    fn sample_parse_result() -> ParseResult {
        ParseResult {
            hosts: vec![HostRecord {
                authority_kind: "IP".into(),
                authority: "10.0.0.1".into(),
                resolved_ips_json: None,
            }],
            services: vec![ServiceRecord {
                host_authority: "10.0.0.1".into(),
                transport: "tcp".into(),
                port: 443,
                app_proto: "https".into(),
                proto_confidence: "high".into(),
                state: "open".into(),
                banner: None,
                product: None,
                version: None,
            }],
            service_observations: vec![],
            http_endpoints: vec![HttpEndpointRecord {
                host_authority: "10.0.0.1".into(),
                port: 443,
                base_uri: "https://10.0.0.1".into(),
                method: "GET".into(),
                path: "/login".into(),
                status_code: Some(200),
                content_length: None,
                words: None,
                lines: None,
            }],
            inputs: vec![InputRecord {
                host_authority: "10.0.0.1".into(),
                port: 443,
                location: "body".into(),
                name: "username".into(),
                type_hint: None,
            }],
            endpoint_inputs: vec![EndpointInputRecord {
                host_authority: "10.0.0.1".into(),
                port: 443,
                method: "GET".into(),
                path: "/login".into(),
                location: "body".into(),
                name: "username".into(),
            }],
            observations: vec![ObservationRecord {
                host_authority: "10.0.0.1".into(),
                port: 443,
                location: "body".into(),
                name: "username".into(),
                raw_value: "admin".into(),
                norm_value: "admin".into(),
                source: "ffuf".into(),
                confidence: 0.7,
                observed_at: chrono::Utc::now().to_rfc3339(),
                body_path: None,
            }],
            vulnerabilities: vec![VulnerabilityRecord {
                host_authority: "10.0.0.1".into(),
                transport: "tcp".into(),
                port: 443,
                endpoint_method: Some("GET".into()),
                endpoint_path: Some("/login".into()),
                vuln_type: "sqli".into(),
                title: "SQLi in login".into(),
                severity: "critical".into(),
                confidence: 0.9,
                description: None,
                status: None,
            }],
            cves: vec![CveRecord {
                vulnerability_title: "SQLi in login".into(),
                cve_id: "CVE-2021-1234".into(),
                description: None,
                cvss_score: Some(9.8),
                cvss_vector: None,
                reference_url: None,
            }],
        }
    }

    #[tokio::test]
    async fn full_nine_step_chain_resolves_all_external_keys() {
        let db = fresh_db().await;
        let parsed = sample_parse_result();
        let result = normalize(&db, None, &parsed).await.unwrap();

        assert_eq!(result.hosts_created, 1);
        assert_eq!(result.services_created, 1);
        assert_eq!(result.http_endpoints_created, 1);
        assert_eq!(result.inputs_created, 1);
        assert_eq!(result.endpoint_inputs_linked, 1);
        assert_eq!(result.observations_created, 1);
        assert_eq!(result.vulnerabilities_created, 1);
        assert_eq!(result.cves_created, 1);

        let nodes = NodeRepository::new(&db);
        let edges = EdgeRepository::new(&db);
        let host = nodes.find_by_kind(NK::Host, None).await.unwrap();
        assert_eq!(host.len(), 1);
        let cve = nodes.find_by_kind(NK::Cve, None).await.unwrap();
        assert_eq!(cve.len(), 1);
        assert_eq!(cve[0].natural_key.split(':').next().unwrap(), "cve");

        let host_edges = edges.find_by_source(host[0].id, Some(EdgeKind::HostService)).await.unwrap();
        assert_eq!(host_edges.len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_observation_is_silently_skipped() {
        let db = fresh_db().await;
        let mut parsed = sample_parse_result();
        parsed.observations[0].name = "nonexistent-input".into();
        let result = normalize(&db, None, &parsed).await.unwrap();
        assert_eq!(result.observations_created, 0);
    }

    #[tokio::test]
    async fn second_normalize_of_same_artifact_upserts_not_duplicates() {
        let db = fresh_db().await;
        let parsed = sample_parse_result();
        normalize(&db, None, &parsed).await.unwrap();
        let second = normalize(&db, None, &parsed).await.unwrap();

        assert_eq!(second.hosts_created, 0);
        assert_eq!(second.services_created, 0);

        let nodes = NodeRepository::new(&db);
        assert_eq!(nodes.find_by_kind(NK::Host, None).await.unwrap().len(), 1);
        assert_eq!(nodes.find_by_kind(NK::Service, None).await.unwrap().len(), 1);
    }
}
