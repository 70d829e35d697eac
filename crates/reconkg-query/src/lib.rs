//! Graph query engine (C4): bounded traversal, reachability, shortest path,
//! the closed set of analytical presets, and the supplemented `graph.stats`.

mod error;
mod presets;
mod stats;
mod traversal;

pub use error::{QueryError, Result};
pub use stats::{stats, GraphStats};
pub use traversal::{reachable_from, shortest_path, traverse, ShortestPath, TraverseHit, DEFAULT_MAX_DEPTH};

use reconkg_graph::Db;
use serde_json::Value;
use uuid::Uuid;

/// The closed set of analytical presets (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    AttackSurface,
    CriticalVulns,
    CredentialExposure,
    UnscannedServices,
    VulnByHost,
    ReachableServices,
}

impl Preset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "attack_surface" => Some(Preset::AttackSurface),
            "critical_vulns" => Some(Preset::CriticalVulns),
            "credential_exposure" => Some(Preset::CredentialExposure),
            "unscanned_services" => Some(Preset::UnscannedServices),
            "vuln_by_host" => Some(Preset::VulnByHost),
            "reachable_services" => Some(Preset::ReachableServices),
            _ => None,
        }
    }
}

/// `host_id` is only consulted (and required) by `reachable_services`.
pub async fn run_preset(db: &Db, preset: Preset, host_id: Option<Uuid>) -> Result<Vec<Value>> {
    match preset {
        Preset::AttackSurface => presets::attack_surface(db).await,
        Preset::CriticalVulns => presets::critical_vulns(db).await,
        Preset::CredentialExposure => presets::credential_exposure(db).await,
        Preset::UnscannedServices => presets::unscanned_services(db).await,
        Preset::VulnByHost => presets::vuln_by_host(db).await,
        Preset::ReachableServices => presets::reachable_services(db, host_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconkg_graph::{migrate, EdgeRepository, NodeRepository};
    use reconkg_types::{EdgeKind, NodeKind};
    use serde_json::json;

    async fn fresh_db() -> Db {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        db
    }

    async fn seed_attack_chain(db: &Db) -> (Uuid, Uuid, Uuid, Uuid) {
        let nodes = NodeRepository::new(db);
        let edges = EdgeRepository::new(db);

        let host = nodes
            .create(NodeKind::Host, &json!({"authorityKind": "IP", "authority": "10.0.0.5"}), None, None)
            .await
            .unwrap();
        let service = nodes
            .create(
                NodeKind::Service,
                &json!({"transport": "tcp", "port": 443, "appProto": "https", "protoConfidence": "high", "state": "open"}),
                None,
                Some(host.id),
            )
            .await
            .unwrap();
        let endpoint = nodes
            .create(
                NodeKind::Endpoint,
                &json!({"baseUri": "https://10.0.0.5", "method": "GET", "path": "/login"}),
                None,
                Some(service.id),
            )
            .await
            .unwrap();
        let vuln = nodes
            .create(
                NodeKind::Vulnerability,
                &json!({"vulnType": "sqli", "title": "SQLi in login", "severity": "critical", "confidence": 0.9}),
                None,
                None,
            )
            .await
            .unwrap();

        edges.create(EdgeKind::HostService, host.id, service.id, None).await.unwrap();
        edges.create(EdgeKind::ServiceEndpoint, service.id, endpoint.id, None).await.unwrap();
        edges.create(EdgeKind::ServiceVulnerability, service.id, vuln.id, None).await.unwrap();

        (host.id, service.id, endpoint.id, vuln.id)
    }

    #[tokio::test]
    async fn traverse_finds_endpoint_at_depth_two() {
        let db = fresh_db().await;
        let (host_id, service_id, endpoint_id, _) = seed_attack_chain(&db).await;

        let hits = traverse(&db, host_id, DEFAULT_MAX_DEPTH, None).await.unwrap();
        let endpoint_hit = hits.iter().find(|h| h.node.id == endpoint_id).unwrap();
        assert_eq!(endpoint_hit.depth, 2);
        assert_eq!(endpoint_hit.path, vec![host_id, service_id, endpoint_id]);
    }

    #[tokio::test]
    async fn shortest_path_host_to_vulnerability() {
        let db = fresh_db().await;
        let (host_id, service_id, _, vuln_id) = seed_attack_chain(&db).await;

        let path = shortest_path(&db, host_id, vuln_id).await.unwrap().unwrap();
        assert_eq!(path.length, 2);
        assert_eq!(path.nodes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![host_id, service_id, vuln_id]);
    }

    #[tokio::test]
    async fn shortest_path_same_node_is_zero_length() {
        let db = fresh_db().await;
        let (host_id, ..) = seed_attack_chain(&db).await;
        let path = shortest_path(&db, host_id, host_id).await.unwrap().unwrap();
        assert_eq!(path.length, 0);
        assert!(path.edges.is_empty());
    }

    #[tokio::test]
    async fn shortest_path_disconnected_is_none() {
        let db = fresh_db().await;
        let (host_id, ..) = seed_attack_chain(&db).await;
        let nodes = NodeRepository::new(&db);
        let other_host = nodes
            .create(NodeKind::Host, &json!({"authorityKind": "IP", "authority": "10.0.0.9"}), None, None)
            .await
            .unwrap();

        let path = shortest_path(&db, host_id, other_host.id).await.unwrap();
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn preset_critical_vulns_orders_host_id() {
        let db = fresh_db().await;
        seed_attack_chain(&db).await;

        let rows = run_preset(&db, Preset::CriticalVulns, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["severity"], json!("critical"));
    }

    #[tokio::test]
    async fn preset_unscanned_services_excludes_serviced_with_endpoint() {
        let db = fresh_db().await;
        let nodes = NodeRepository::new(&db);
        let edges = EdgeRepository::new(&db);
        let (host_id, ..) = seed_attack_chain(&db).await;

        let bare_service = nodes
            .create(
                NodeKind::Service,
                &json!({"transport": "tcp", "port": 22, "appProto": "ssh", "protoConfidence": "high", "state": "open"}),
                None,
                Some(host_id),
            )
            .await
            .unwrap();
        edges.create(EdgeKind::HostService, host_id, bare_service.id, None).await.unwrap();

        let rows = run_preset(&db, Preset::UnscannedServices, None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["serviceId"], json!(bare_service.id.to_string()));
    }

    #[tokio::test]
    async fn preset_reachable_services_requires_host_id() {
        let db = fresh_db().await;
        let result = run_preset(&db, Preset::ReachableServices, None).await;
        assert!(matches!(result, Err(QueryError::BadRequest(_))));
    }

    #[tokio::test]
    async fn stats_counts_nodes_and_edges_by_kind() {
        let db = fresh_db().await;
        seed_attack_chain(&db).await;

        let summary = stats(&db).await.unwrap();
        assert_eq!(summary.node_count, 4);
        assert_eq!(summary.edge_count, 3);
        assert_eq!(summary.nodes_by_kind.get("host"), Some(&1));
    }
}
