//! `graph.stats()` — supplemented feature (SPEC_FULL §10): a cheap summary
//! used by the facade's health/overview surface, grounded the same way the
//! presets are (plain aggregate SQL, no in-memory traversal).

use reconkg_graph::Db;
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub node_count: i64,
    pub edge_count: i64,
    pub nodes_by_kind: HashMap<String, i64>,
    pub edges_by_kind: HashMap<String, i64>,
}

pub async fn stats(db: &Db) -> Result<GraphStats> {
    let node_count: i64 = sqlx::query("SELECT COUNT(*) FROM nodes")
        .fetch_one(db.pool())
        .await?
        .try_get(0)?;
    let edge_count: i64 = sqlx::query("SELECT COUNT(*) FROM edges")
        .fetch_one(db.pool())
        .await?
        .try_get(0)?;

    let mut nodes_by_kind = HashMap::new();
    let rows = sqlx::query("SELECT kind, COUNT(*) FROM nodes GROUP BY kind")
        .fetch_all(db.pool())
        .await?;
    for row in rows {
        let kind: String = row.try_get(0)?;
        let count: i64 = row.try_get(1)?;
        nodes_by_kind.insert(kind, count);
    }

    let mut edges_by_kind = HashMap::new();
    let rows = sqlx::query("SELECT kind, COUNT(*) FROM edges GROUP BY kind")
        .fetch_all(db.pool())
        .await?;
    for row in rows {
        let kind: String = row.try_get(0)?;
        let count: i64 = row.try_get(1)?;
        edges_by_kind.insert(kind, count);
    }

    Ok(GraphStats { node_count, edge_count, nodes_by_kind, edges_by_kind })
}
