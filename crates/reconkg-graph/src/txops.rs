//! Transactional node/edge operations shared by callers that must commit a
//! whole batch atomically — currently the normalizer (spec §4.4, "runs in
//! a single transaction"). Mirrors [`crate::repository`] but takes a
//! caller-owned `Transaction` instead of opening its own autocommit
//! statements.

use chrono::Utc;
use reconkg_types::{Node, NodeKind, NodeProps};
use serde_json::Value;
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

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
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| GraphError::Storage(sqlx::Error::Decode(e.into())))?
            .with_timezone(&Utc),
    })
}

pub async fn find_node_by_id(tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> Result<Option<Node>> {
    let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(row_to_node).transpose()
}

pub async fn find_node_by_natural_key(
    tx: &mut Transaction<'_, Sqlite>,
    natural_key: &str,
) -> Result<Option<Node>> {
    let row = sqlx::query("SELECT * FROM nodes WHERE natural_key = ?")
        .bind(natural_key)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(row_to_node).transpose()
}

async fn write_props(tx: &mut Transaction<'_, Sqlite>, id: Uuid, props_json: &Value) -> Result<Node> {
    let now = Utc::now();
    sqlx::query("UPDATE nodes SET props_json = ?, updated_at = ? WHERE id = ?")
        .bind(props_json.to_string())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut **tx)
        .await?;
    find_node_by_id(tx, id)
        .await?
        .ok_or_else(|| GraphError::NotFound(id.to_string()))
}

async fn insert_node(
    tx: &mut Transaction<'_, Sqlite>,
    kind: NodeKind,
    natural_key: &str,
    props_json: &Value,
    evidence_artifact_id: Option<Uuid>,
) -> Result<Node> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
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
    .execute(&mut **tx)
    .await?;
    Ok(Node {
        id,
        kind,
        natural_key: natural_key.to_string(),
        props_json: props_json.clone(),
        evidence_artifact_id,
        created_at: now,
        updated_at: now,
    })
}

/// Same semantics as [`crate::repository::NodeRepository::upsert`], but
/// participating in the caller's transaction.
pub async fn upsert_node(
    tx: &mut Transaction<'_, Sqlite>,
    kind: NodeKind,
    props: &Value,
    evidence_artifact_id: Option<Uuid>,
    parent_id: Option<Uuid>,
) -> Result<(Node, bool)> {
    let validated = NodeProps::from_json(kind, props)?;
    let natural_key = validated.natural_key(parent_id)?;

    if let Some(existing) = find_node_by_natural_key(tx, &natural_key).await? {
        let merged = NodeProps::merge(kind, &existing.props_json, props)?;
        let node = write_props(tx, existing.id, &merged.to_json()).await?;
        Ok((node, false))
    } else {
        let node = insert_node(tx, kind, &natural_key, &validated.to_json(), evidence_artifact_id).await?;
        Ok((node, true))
    }
}

/// Idempotent on `(kind, source, target)`; silently returns the existing
/// edge rather than erroring, since the normalizer treats repeated
/// derivations as ordinary re-observation.
pub async fn upsert_edge(
    tx: &mut Transaction<'_, Sqlite>,
    kind: reconkg_types::EdgeKind,
    source_id: Uuid,
    target_id: Uuid,
    evidence_artifact_id: Option<Uuid>,
) -> Result<()> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM edges WHERE kind = ? AND source_id = ? AND target_id = ?",
    )
    .bind(kind.as_str())
    .bind(source_id.to_string())
    .bind(target_id.to_string())
    .fetch_optional(&mut **tx)
    .await?;
    if existing.is_some() {
        return Ok(());
    }

    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO edges (id, kind, source_id, target_id, props_json, evidence_artifact_id, created_at)
         VALUES (?, ?, ?, ?, '{}', ?, ?)",
    )
    .bind(id.to_string())
    .bind(kind.as_str())
    .bind(source_id.to_string())
    .bind(target_id.to_string())
    .bind(evidence_artifact_id.map(|u| u.to_string()))
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
