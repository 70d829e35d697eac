//! Node/edge repository (C3, spec §4.2): typed CRUD, natural-key upsert,
//! per-kind property validation, indexed lookups.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use reconkg_types::{Edge, EdgeKind, Node, NodeKind, NodeProps};

use crate::db::Db;
use crate::error::{GraphError, Result};

fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Result<Node> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let props_raw: String = row.try_get("props_json")?;
    let evidence: Option<String> = row.try_get("evidence_artifact_id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Node {
        id: Uuid::parse_str(&id).map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        kind: kind.parse().map_err(GraphError::Validation)?,
        natural_key: row.try_get("natural_key")?,
        props_json: serde_json::from_str(&props_raw)
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        evidence_artifact_id: evidence
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> Result<Edge> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let source_id: String = row.try_get("source_id")?;
    let target_id: String = row.try_get("target_id")?;
    let props_raw: String = row.try_get("props_json")?;
    let evidence: Option<String> = row.try_get("evidence_artifact_id")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Edge {
        id: Uuid::parse_str(&id).map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        kind: kind.parse().map_err(GraphError::Validation)?,
        source_id: Uuid::parse_str(&source_id)
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        target_id: Uuid::parse_str(&target_id)
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        props_json: serde_json::from_str(&props_raw)
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        evidence_artifact_id: evidence
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?,
        created_at: parse_rfc3339(&created_at)?,
    })
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?
        .with_timezone(&Utc))
}

pub struct NodeRepository<'a> {
    db: &'a Db,
}

impl<'a> NodeRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        kind: NodeKind,
        props: &Value,
        evidence_artifact_id: Option<Uuid>,
        parent_id: Option<Uuid>,
    ) -> Result<Node> {
        let validated = NodeProps::from_json(kind, props)?;
        let natural_key = validated.natural_key(parent_id)?;
        self.insert(kind, &natural_key, &validated.to_json(), evidence_artifact_id)
            .await
    }

    async fn insert(
        &self,
        kind: NodeKind,
        natural_key: &str,
        props_json: &Value,
        evidence_artifact_id: Option<Uuid>,
    ) -> Result<Node> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO nodes (id, kind, natural_key, props_json, evidence_artifact_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(natural_key)
        .bind(props_json.to_string())
        .bind(evidence_artifact_id.map(|u| u.to_string()))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(Node {
                id,
                kind,
                natural_key: natural_key.to_string(),
                props_json: props_json.clone(),
                evidence_artifact_id,
                created_at: now,
                updated_at: now,
            }),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(GraphError::DuplicateNaturalKey(natural_key.to_string()))
            }
            Err(e) => Err(GraphError::Storage(e)),
        }
    }

    /// Look up by derived natural key; merge and revalidate if present,
    /// else create. Returns whether a new node was created (spec §4.2,
    /// property "Natural-key determinism").
    pub async fn upsert(
        &self,
        kind: NodeKind,
        props: &Value,
        evidence_artifact_id: Option<Uuid>,
        parent_id: Option<Uuid>,
    ) -> Result<(Node, bool)> {
        let validated = NodeProps::from_json(kind, props)?;
        let natural_key = validated.natural_key(parent_id)?;

        if let Some(existing) = self.find_by_natural_key(&natural_key).await? {
            let merged = NodeProps::merge(kind, &existing.props_json, props)?;
            let node = self.write_props(existing.id, &merged.to_json()).await?;
            debug!(natural_key, "upsert: merged into existing node");
            Ok((node, false))
        } else {
            let node = self.insert(kind, &natural_key, &validated.to_json(), evidence_artifact_id).await?;
            debug!(natural_key, "upsert: created new node");
            Ok((node, true))
        }
    }

    /// Merge `partial` into the existing props, revalidate, bump `updated_at`.
    pub async fn update_props(&self, id: Uuid, partial: &Value) -> Result<Option<Node>> {
        let Some(existing) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        let merged = NodeProps::merge(existing.kind, &existing.props_json, partial)?;
        Ok(Some(self.write_props(id, &merged.to_json()).await?))
    }

    async fn write_props(&self, id: Uuid, props_json: &Value) -> Result<Node> {
        let now = Utc::now();
        sqlx::query("UPDATE nodes SET props_json = ?, updated_at = ? WHERE id = ?")
            .bind(props_json.to_string())
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        self.find_by_id(id)
            .await?
            .ok_or_else(|| GraphError::NotFound(id.to_string()))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Node>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    pub async fn find_by_natural_key(&self, natural_key: &str) -> Result<Option<Node>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE natural_key = ?")
            .bind(natural_key)
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_to_node).transpose()
    }

    /// `filters` is evaluated by JSON-path equality on the `props_json` column.
    pub async fn find_by_kind(
        &self,
        kind: NodeKind,
        filters: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<Node>> {
        let mut sql = "SELECT * FROM nodes WHERE kind = ?".to_string();
        let mut binds: Vec<String> = vec![kind.as_str().to_string()];
        if let Some(filters) = filters {
            for (key, value) in filters {
                sql.push_str(&format!(" AND CAST(json_extract(props_json, '$.{key}') AS TEXT) = ?"));
                binds.push(json_scalar_to_bind(value));
            }
        }
        let mut query = sqlx::query(&sql);
        for b in &binds {
            query = query.bind(b);
        }
        let rows = query.fetch_all(self.db.pool()).await?;
        rows.iter().map(row_to_node).collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn json_scalar_to_bind(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct EdgeRepository<'a> {
    db: &'a Db,
}

impl<'a> EdgeRepository<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        kind: EdgeKind,
        source_id: Uuid,
        target_id: Uuid,
        evidence_artifact_id: Option<Uuid>,
    ) -> Result<Edge> {
        self.ensure_endpoints_exist(source_id, target_id).await?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO edges (id, kind, source_id, target_id, props_json, evidence_artifact_id, created_at)
             VALUES (?, ?, ?, ?, '{}', ?, ?)",
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(source_id.to_string())
        .bind(target_id.to_string())
        .bind(evidence_artifact_id.map(|u| u.to_string()))
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(Edge {
                id,
                kind,
                source_id,
                target_id,
                props_json: serde_json::json!({}),
                evidence_artifact_id,
                created_at: now,
            }),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(GraphError::BadRequest(format!(
                "edge {kind} {source_id}->{target_id} already exists"
            ))),
            Err(e) => Err(GraphError::Storage(e)),
        }
    }

    async fn ensure_endpoints_exist(&self, source_id: Uuid, target_id: Uuid) -> Result<()> {
        for id in [source_id, target_id] {
            let exists: i64 = sqlx::query("SELECT count(*) FROM nodes WHERE id = ?")
                .bind(id.to_string())
                .fetch_one(self.db.pool())
                .await?
                .try_get(0)?;
            if exists == 0 {
                return Err(GraphError::NotFound(id.to_string()));
            }
        }
        Ok(())
    }

    /// Idempotent on `(kind, source, target)` (spec §4.2).
    pub async fn upsert(
        &self,
        kind: EdgeKind,
        source_id: Uuid,
        target_id: Uuid,
        evidence_artifact_id: Option<Uuid>,
    ) -> Result<(Edge, bool)> {
        let existing = sqlx::query("SELECT * FROM edges WHERE kind = ? AND source_id = ? AND target_id = ?")
            .bind(kind.as_str())
            .bind(source_id.to_string())
            .bind(target_id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        if let Some(row) = existing {
            Ok((row_to_edge(&row)?, false))
        } else {
            Ok((self.create(kind, source_id, target_id, evidence_artifact_id).await?, true))
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM edges WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Edge>> {
        let row = sqlx::query("SELECT * FROM edges WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(row_to_edge).transpose()
    }

    pub async fn find_by_source(&self, source_id: Uuid, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query("SELECT * FROM edges WHERE source_id = ? AND kind = ?")
                    .bind(source_id.to_string())
                    .bind(kind.as_str())
                    .fetch_all(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM edges WHERE source_id = ?")
                    .bind(source_id.to_string())
                    .fetch_all(self.db.pool())
                    .await?
            }
        };
        rows.iter().map(row_to_edge).collect()
    }

    pub async fn find_by_target(&self, target_id: Uuid, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query("SELECT * FROM edges WHERE target_id = ? AND kind = ?")
                    .bind(target_id.to_string())
                    .bind(kind.as_str())
                    .fetch_all(self.db.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM edges WHERE target_id = ?")
                    .bind(target_id.to_string())
                    .fetch_all(self.db.pool())
                    .await?
            }
        };
        rows.iter().map(row_to_edge).collect()
    }

    pub async fn find_by_kind(&self, kind: EdgeKind) -> Result<Vec<Edge>> {
        let rows = sqlx::query("SELECT * FROM edges WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(row_to_edge).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::migrate;
    use serde_json::json;

    async fn fresh_db() -> Db {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        db
    }

    #[tokio::test]
    async fn upsert_host_twice_is_idempotent() {
        let db = fresh_db().await;
        let repo = NodeRepository::new(&db);
        let props = json!({"authorityKind": "IP", "authority": "10.0.0.1"});

        let (n1, created1) = repo.upsert(NodeKind::Host, &props, None, None).await.unwrap();
        let (n2, created2) = repo.upsert(NodeKind::Host, &props, None, None).await.unwrap();

        assert_eq!(n1.id, n2.id);
        assert!(created1);
        assert!(!created2);
        assert_eq!(n1.natural_key, "host:10.0.0.1");

        let all = repo.find_by_kind(NodeKind::Host, None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn upsert_merge_is_right_biased_and_revalidates() {
        let db = fresh_db().await;
        let repo = NodeRepository::new(&db);
        let host = repo
            .create(NodeKind::Host, &json!({"authorityKind": "DOMAIN", "authority": "a.example"}), None, None)
            .await
            .unwrap();

        let (v1, _) = repo
            .upsert(
                NodeKind::Vhost,
                &json!({"hostname": "one.example"}),
                None,
                Some(host.id),
            )
            .await
            .unwrap();
        let (v2, created) = repo
            .upsert(
                NodeKind::Vhost,
                &json!({"hostname": "one.example", "source": "vhost-scan"}),
                None,
                Some(host.id),
            )
            .await
            .unwrap();

        assert_eq!(v1.id, v2.id);
        assert!(!created);
        assert_eq!(v2.props_json["source"], json!("vhost-scan"));
    }

    #[tokio::test]
    async fn delete_node_cascades_to_edges() {
        let db = fresh_db().await;
        let nodes = NodeRepository::new(&db);
        let edges = EdgeRepository::new(&db);

        let host = nodes
            .create(NodeKind::Host, &json!({"authorityKind": "IP", "authority": "10.0.0.2"}), None, None)
            .await
            .unwrap();
        let service = nodes
            .create(
                NodeKind::Service,
                &json!({"transport": "tcp", "port": 80, "appProto": "http", "protoConfidence": "high", "state": "open"}),
                None,
                Some(host.id),
            )
            .await
            .unwrap();
        let edge = edges
            .create(EdgeKind::HostService, host.id, service.id, None)
            .await
            .unwrap();

        assert!(nodes.delete(host.id).await.unwrap());
        assert!(edges.find_by_source(host.id, None).await.unwrap().is_empty());
        assert!(nodes.find_by_id(service.id).await.unwrap().is_some());
        let _ = edge;
    }

    #[tokio::test]
    async fn create_edge_requires_existing_endpoints() {
        let db = fresh_db().await;
        let edges = EdgeRepository::new(&db);
        let result = edges
            .create(EdgeKind::HostService, Uuid::new_v4(), Uuid::new_v4(), None)
            .await;
        assert!(matches!(result, Err(GraphError::NotFound(_))));
    }

    #[tokio::test]
    async fn validation_error_rejects_bad_props() {
        let db = fresh_db().await;
        let repo = NodeRepository::new(&db);
        let result = repo
            .create(NodeKind::Host, &json!({"authority": "10.0.0.1"}), None, None)
            .await;
        assert!(matches!(result, Err(GraphError::Validation(_))));
    }
}
