//! Tool facade (C10): the single entry point collaborators call. Every
//! method is a pure request/response over one shared `Db` handle (spec
//! §6.2); errors collapse to `anyhow::Error` here and are translated back
//! to a textual `isError` report by [`error::describe`].

pub mod error;

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value as Json;
use uuid::Uuid;

use reconkg_datalog::{EvalConfig, EvalResult, Fact, GeneratedBy, Program, RuleRecord, RuleStore};
use reconkg_graph::{migrate, Db, EdgeRepository, NodeRepository};
use reconkg_normalize::{NormalizeResult, ParseResult};
use reconkg_query::{
    reachable_from, run_preset, shortest_path, stats, traverse, GraphStats, Preset, ShortestPath, TraverseHit,
};
use reconkg_types::{Edge, EdgeKind, Node, NodeKind};

pub use error::ErrorReport;

fn parse_node_kind(kind: &str) -> Result<NodeKind, reconkg_graph::GraphError> {
    kind.parse().map_err(reconkg_graph::GraphError::Validation)
}

fn parse_edge_kind(kind: &str) -> Result<EdgeKind, reconkg_graph::GraphError> {
    kind.parse().map_err(reconkg_graph::GraphError::Validation)
}

pub struct Facade {
    db: Db,
}

impl Facade {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn migrate(&self) -> Result<()> {
        migrate(&self.db).await.context("migration failed")?;
        Ok(())
    }

    // ---- node.* -----------------------------------------------------

    pub async fn node_create(&self, kind: &str, props: &Json, evidence_artifact_id: Option<Uuid>, parent_id: Option<Uuid>) -> Result<Node> {
        let kind = parse_node_kind(kind)?;
        Ok(NodeRepository::new(&self.db).create(kind, props, evidence_artifact_id, parent_id).await?)
    }

    pub async fn node_upsert(&self, kind: &str, props: &Json, evidence_artifact_id: Option<Uuid>, parent_id: Option<Uuid>) -> Result<(Node, bool)> {
        let kind = parse_node_kind(kind)?;
        Ok(NodeRepository::new(&self.db).upsert(kind, props, evidence_artifact_id, parent_id).await?)
    }

    pub async fn node_update_props(&self, id: Uuid, partial: &Json) -> Result<Option<Node>> {
        Ok(NodeRepository::new(&self.db).update_props(id, partial).await?)
    }

    pub async fn node_delete(&self, id: Uuid) -> Result<bool> {
        Ok(NodeRepository::new(&self.db).delete(id).await?)
    }

    pub async fn node_find_by_id(&self, id: Uuid) -> Result<Option<Node>> {
        Ok(NodeRepository::new(&self.db).find_by_id(id).await?)
    }

    pub async fn node_find_by_kind(&self, kind: &str, filters: Option<&HashMap<String, Json>>) -> Result<Vec<Node>> {
        let kind = parse_node_kind(kind)?;
        Ok(NodeRepository::new(&self.db).find_by_kind(kind, filters).await?)
    }

    pub async fn node_find_by_natural_key(&self, natural_key: &str) -> Result<Option<Node>> {
        Ok(NodeRepository::new(&self.db).find_by_natural_key(natural_key).await?)
    }

    // ---- edge.* -----------------------------------------------------

    pub async fn edge_create(&self, kind: &str, source_id: Uuid, target_id: Uuid, evidence_artifact_id: Option<Uuid>) -> Result<Edge> {
        let kind = parse_edge_kind(kind)?;
        Ok(EdgeRepository::new(&self.db).create(kind, source_id, target_id, evidence_artifact_id).await?)
    }

    pub async fn edge_upsert(&self, kind: &str, source_id: Uuid, target_id: Uuid, evidence_artifact_id: Option<Uuid>) -> Result<(Edge, bool)> {
        let kind = parse_edge_kind(kind)?;
        Ok(EdgeRepository::new(&self.db).upsert(kind, source_id, target_id, evidence_artifact_id).await?)
    }

    pub async fn edge_delete(&self, id: Uuid) -> Result<bool> {
        Ok(EdgeRepository::new(&self.db).delete(id).await?)
    }

    pub async fn edge_find_by_source(&self, source_id: Uuid, kind: Option<&str>) -> Result<Vec<Edge>> {
        let kind = kind.map(parse_edge_kind).transpose()?;
        Ok(EdgeRepository::new(&self.db).find_by_source(source_id, kind).await?)
    }

    pub async fn edge_find_by_target(&self, target_id: Uuid, kind: Option<&str>) -> Result<Vec<Edge>> {
        let kind = kind.map(parse_edge_kind).transpose()?;
        Ok(EdgeRepository::new(&self.db).find_by_target(target_id, kind).await?)
    }

    pub async fn edge_find_by_kind(&self, kind: &str) -> Result<Vec<Edge>> {
        let kind = parse_edge_kind(kind)?;
        Ok(EdgeRepository::new(&self.db).find_by_kind(kind).await?)
    }

    // ---- graph.* ------------------------------------------------------

    pub async fn graph_traverse(&self, start_id: Uuid, max_depth: u32, edge_kinds: Option<&[EdgeKind]>) -> Result<Vec<TraverseHit>> {
        Ok(traverse(&self.db, start_id, max_depth, edge_kinds).await?)
    }

    pub async fn graph_reachable_from(&self, start_id: Uuid, target_kind: Option<NodeKind>) -> Result<Vec<Node>> {
        Ok(reachable_from(&self.db, start_id, target_kind).await?)
    }

    pub async fn graph_shortest_path(&self, from_id: Uuid, to_id: Uuid) -> Result<Option<ShortestPath>> {
        Ok(shortest_path(&self.db, from_id, to_id).await?)
    }

    pub async fn graph_run_preset(&self, preset_name: &str, host_id: Option<Uuid>) -> Result<Vec<Json>> {
        let preset = Preset::from_name(preset_name)
            .ok_or_else(|| reconkg_query::QueryError::BadRequest(format!("unknown preset: {preset_name}")))?;
        Ok(run_preset(&self.db, preset, host_id).await?)
    }

    pub async fn graph_stats(&self) -> Result<GraphStats> {
        Ok(stats(&self.db).await?)
    }

    // ---- normalize ------------------------------------------------------

    pub async fn normalize(&self, artifact_id: Option<Uuid>, parsed: &ParseResult) -> Result<NormalizeResult> {
        Ok(reconkg_normalize::normalize(&self.db, artifact_id, parsed).await?)
    }

    // ---- datalog.* ------------------------------------------------------

    pub async fn datalog_extract_facts(&self) -> Result<Vec<Fact>> {
        Ok(reconkg_datalog::extract_facts(&self.db).await?)
    }

    pub async fn datalog_extract_facts_by_predicate(&self, predicate: &str, limit: Option<usize>) -> Result<Vec<Fact>> {
        Ok(reconkg_datalog::extract_facts_by_predicate(&self.db, predicate, limit).await?)
    }

    /// Parses `program_text`, evaluates it against the graph's own facts
    /// (optionally extended by `extra_base_facts`), and — when `save_name`
    /// is supplied — persists it to the rule store as a human-authored
    /// rule (spec §4.8 "user rules may be saved by `runDatalog` when a
    /// `saveName` is supplied").
    pub async fn datalog_run(
        &self,
        program_text: &str,
        extra_base_facts: &[Fact],
        config: Option<EvalConfig>,
        save_name: Option<&str>,
    ) -> Result<EvalResult> {
        let program = reconkg_datalog::parse_program(program_text)?;
        let result = self.evaluate_program(&program, extra_base_facts, config).await?;
        if let Some(name) = save_name {
            RuleStore::new(&self.db).save(name, "", program_text, GeneratedBy::Human).await?;
        }
        Ok(result)
    }

    pub async fn datalog_evaluate(&self, program: &Program, extra_base_facts: &[Fact], config: Option<EvalConfig>) -> Result<EvalResult> {
        self.evaluate_program(program, extra_base_facts, config).await
    }

    async fn evaluate_program(&self, program: &Program, extra_base_facts: &[Fact], config: Option<EvalConfig>) -> Result<EvalResult> {
        let mut base_facts = reconkg_datalog::extract_facts(&self.db).await?;
        base_facts.extend_from_slice(extra_base_facts);
        let config = config.unwrap_or(reconkg_datalog::DEFAULT_EVAL_CONFIG);
        Ok(reconkg_datalog::evaluate(program, &base_facts, &config)?)
    }

    /// Resolves `pattern_name` against the rule store, parses the stored
    /// program, and evaluates it — the "attack path query by preset name"
    /// entry point (spec §4.8 "Unknown pattern names ... raise `NotFound`").
    pub async fn query_attack_paths(&self, pattern_name: &str, config: Option<EvalConfig>) -> Result<EvalResult> {
        let store = RuleStore::new(&self.db);
        reconkg_datalog::seed_presets(&self.db).await?;
        let record = store.find_by_name(pattern_name).await?;
        let program = reconkg_datalog::parse_program(&record.rule_text)?;
        self.evaluate_program(&program, &[], config).await
    }

    // ---- rules.* ------------------------------------------------------

    pub async fn rules_save(&self, name: &str, description: &str, rule_text: &str, generated_by: GeneratedBy) -> Result<RuleRecord> {
        Ok(RuleStore::new(&self.db).save(name, description, rule_text, generated_by).await?)
    }

    pub async fn rules_list(&self) -> Result<Vec<RuleRecord>> {
        reconkg_datalog::seed_presets(&self.db).await?;
        Ok(RuleStore::new(&self.db).list().await?)
    }

    pub async fn rules_find_by_name(&self, name: &str) -> Result<RuleRecord> {
        Ok(RuleStore::new(&self.db).find_by_name(name).await?)
    }

    pub async fn rules_delete(&self, name: &str) -> Result<()> {
        Ok(RuleStore::new(&self.db).delete(name).await?)
    }

    pub async fn rules_search(&self, query: &str) -> Result<Vec<RuleRecord>> {
        Ok(RuleStore::new(&self.db).search(query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn fresh_facade() -> Facade {
        let db = Db::connect_in_memory().await.unwrap();
        let facade = Facade::new(db);
        facade.migrate().await.unwrap();
        facade
    }

    #[tokio::test]
    async fn node_upsert_is_idempotent_through_the_facade() {
        let facade = fresh_facade().await;
        let props = json!({"authorityKind": "IP", "authority": "10.0.0.1"});
        let (n1, created1) = facade.node_upsert("host", &props, None, None).await.unwrap();
        let (n2, created2) = facade.node_upsert("host", &props, None, None).await.unwrap();
        assert_eq!(n1.id, n2.id);
        assert!(created1);
        assert!(!created2);
    }

    #[tokio::test]
    async fn unknown_node_kind_reports_validation_error() {
        let facade = fresh_facade().await;
        let err = facade.node_create("not-a-kind", &json!({}), None, None).await.unwrap_err();
        let report = error::describe(&err);
        assert_eq!(report.kind, "ValidationError");
        assert!(report.is_error);
    }

    #[tokio::test]
    async fn datalog_run_evaluates_against_live_graph_facts() {
        let facade = fresh_facade().await;
        let (host, _) = facade.node_upsert("host", &json!({"authorityKind": "IP", "authority": "10.0.0.7"}), None, None).await.unwrap();
        let (service, _) = facade
            .node_upsert(
                "service",
                &json!({"transport": "tcp", "port": 22, "appProto": "ssh", "protoConfidence": "high", "state": "open"}),
                None,
                Some(host.id),
            )
            .await
            .unwrap();
        facade.edge_create("HOST_SERVICE", host.id, service.id, None).await.unwrap();

        let result = facade
            .datalog_run(
                r#"open_ssh(H) :- service(H,_,_,22,_,"open"). ?- open_ssh(H)."#,
                &[],
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.answers[0].tuples, vec![vec![reconkg_datalog::Value::Str(host.id.to_string())]]);
    }

    #[tokio::test]
    async fn query_attack_paths_seeds_and_runs_presets() {
        let facade = fresh_facade().await;
        let result = facade.query_attack_paths("open_high_value_services", None).await.unwrap();
        assert_eq!(result.answers.len(), 1);

        let err = facade.query_attack_paths("nonexistent_pattern", None).await.unwrap_err();
        assert_eq!(error::describe(&err).kind, "NotFound");
    }

    #[tokio::test]
    async fn rules_list_is_non_empty_on_a_fresh_database() {
        let facade = fresh_facade().await;
        let rules = facade.rules_list().await.unwrap();
        assert_eq!(rules.len(), 2);
    }
}
