//! Schema & migration runner (C2, spec §4.1).
//!
//! The version counter lives in SQLite's own `PRAGMA user_version` — no
//! extra bookkeeping table needed for it. `migrate` brings an empty or
//! earlier-version database up to [`LATEST_VERSION`]; re-running it once
//! current is a no-op.

use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info, warn};

use crate::db::Db;
use crate::error::{GraphError, Result};

/// The compiled-in target schema version. Version 1 is the pivotal
/// migration that rewrites the legacy row-per-entity schema into the
/// `(nodes, edges)` property graph.
pub const LATEST_VERSION: i64 = 1;

/// Bring `db` up to [`LATEST_VERSION`]. Idempotent once current.
pub async fn migrate(db: &Db) -> Result<()> {
    let current = current_version(db).await?;
    if current >= LATEST_VERSION {
        debug!(current, "schema already at latest version");
        return Ok(());
    }

    let start_from = if current == 0 && !legacy_tables_present(db).await? {
        info!("new database: applying base DDL before migrating to latest");
        apply_base_ddl(db).await?;
        0
    } else {
        info!(current, "existing database: resuming migration from current version");
        current
    };

    for version in (start_from + 1)..=LATEST_VERSION {
        match version {
            1 => apply_v1_nodes_edges(db).await?,
            other => {
                return Err(GraphError::Migration(format!(
                    "no migration registered for version {other}"
                )))
            }
        }
        set_version(db, version).await?;
        info!(version, "migration applied");
    }
    Ok(())
}

async fn current_version(db: &Db) -> Result<i64> {
    let row = sqlx::query("PRAGMA user_version")
        .fetch_one(db.pool())
        .await?;
    Ok(row.try_get::<i64, _>(0)?)
}

async fn set_version(db: &Db, version: i64) -> Result<()> {
    sqlx::query(&format!("PRAGMA user_version = {version}"))
        .execute(db.pool())
        .await?;
    Ok(())
}

async fn legacy_tables_present(db: &Db) -> Result<bool> {
    let row = sqlx::query(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'hosts'",
    )
    .fetch_one(db.pool())
    .await?;
    Ok(row.try_get::<i64, _>(0)? > 0)
}

/// The tables that exist alongside the core's `nodes`/`edges` but are
/// owned by out-of-core collaborators (spec §6.1): scan bookkeeping,
/// evidence artifacts, and the technique-doc full-text index.
const SHARED_TABLES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS scans (
    id          TEXT PRIMARY KEY,
    tool        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    status      TEXT NOT NULL DEFAULT 'running'
);

CREATE TABLE IF NOT EXISTS artifacts (
    id          TEXT PRIMARY KEY,
    scan_id     TEXT REFERENCES scans(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    path        TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS technique_docs (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    body        TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS technique_docs_fts USING fts5(
    title, body, content='technique_docs', content_rowid='rowid'
);

CREATE TABLE IF NOT EXISTS datalog_rules (
    name          TEXT PRIMARY KEY,
    description   TEXT NOT NULL DEFAULT '',
    rule_text     TEXT NOT NULL,
    generated_by  TEXT NOT NULL DEFAULT 'human',
    is_preset     INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);
"#;

/// The legacy, pre-graph entity schema: one table per entity kind plus a
/// join table for the many-to-many endpoint/input relationship. This is
/// what a pre-v1 deployment looks like; v1 rewrites it away.
const LEGACY_ENTITY_TABLES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS hosts (
    id                  TEXT PRIMARY KEY,
    authority_kind      TEXT NOT NULL,
    authority           TEXT NOT NULL UNIQUE,
    resolved_ips_json   TEXT NOT NULL DEFAULT '[]',
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vhosts (
    id                  TEXT PRIMARY KEY,
    host_id             TEXT NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    hostname            TEXT NOT NULL,
    source              TEXT,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS services (
    id                  TEXT PRIMARY KEY,
    host_id             TEXT NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    transport           TEXT NOT NULL,
    port                INTEGER NOT NULL,
    app_proto           TEXT NOT NULL,
    proto_confidence    TEXT NOT NULL,
    state               TEXT NOT NULL,
    banner              TEXT,
    product             TEXT,
    version             TEXT,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS endpoints (
    id                  TEXT PRIMARY KEY,
    service_id          TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    vhost_id            TEXT REFERENCES vhosts(id) ON DELETE SET NULL,
    base_uri            TEXT NOT NULL,
    method              TEXT NOT NULL,
    path                TEXT NOT NULL,
    status_code         INTEGER,
    content_length      INTEGER,
    words               INTEGER,
    lines               INTEGER,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inputs (
    id                  TEXT PRIMARY KEY,
    service_id          TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    location            TEXT NOT NULL,
    name                TEXT NOT NULL,
    type_hint           TEXT,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS endpoint_inputs (
    endpoint_id TEXT NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
    input_id    TEXT NOT NULL REFERENCES inputs(id) ON DELETE CASCADE,
    PRIMARY KEY (endpoint_id, input_id)
);

CREATE TABLE IF NOT EXISTS observations (
    id                  TEXT PRIMARY KEY,
    input_id            TEXT NOT NULL REFERENCES inputs(id) ON DELETE CASCADE,
    raw_value           TEXT NOT NULL,
    norm_value          TEXT NOT NULL,
    source              TEXT NOT NULL,
    confidence          REAL NOT NULL,
    observed_at         TEXT NOT NULL,
    body_path           TEXT,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credentials (
    id                  TEXT PRIMARY KEY,
    service_id          TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    endpoint_id         TEXT REFERENCES endpoints(id) ON DELETE SET NULL,
    username            TEXT NOT NULL,
    secret              TEXT NOT NULL,
    secret_type         TEXT NOT NULL,
    source              TEXT NOT NULL,
    confidence          REAL NOT NULL,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vulnerabilities (
    id                  TEXT PRIMARY KEY,
    service_id          TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    endpoint_id         TEXT REFERENCES endpoints(id) ON DELETE SET NULL,
    vuln_type           TEXT NOT NULL,
    title               TEXT NOT NULL,
    severity            TEXT NOT NULL,
    confidence          REAL NOT NULL,
    description         TEXT,
    status              TEXT NOT NULL DEFAULT 'unverified',
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cves (
    id                  TEXT PRIMARY KEY,
    vulnerability_id    TEXT NOT NULL REFERENCES vulnerabilities(id) ON DELETE CASCADE,
    cve_id              TEXT NOT NULL,
    description         TEXT,
    cvss_score          REAL,
    cvss_vector         TEXT,
    reference_url       TEXT,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS svc_observations (
    id                  TEXT PRIMARY KEY,
    service_id          TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    key                 TEXT NOT NULL,
    value               TEXT NOT NULL,
    confidence          REAL NOT NULL,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
"#;

const NODES_EDGES_DDL: &str = r#"
CREATE TABLE nodes (
    id                  TEXT PRIMARY KEY,
    kind                TEXT NOT NULL,
    natural_key         TEXT NOT NULL UNIQUE,
    props_json          TEXT NOT NULL,
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE edges (
    id                  TEXT PRIMARY KEY,
    kind                TEXT NOT NULL,
    source_id           TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target_id           TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    props_json          TEXT NOT NULL DEFAULT '{}',
    evidence_artifact_id TEXT REFERENCES artifacts(id),
    created_at          TEXT NOT NULL,
    UNIQUE (kind, source_id, target_id)
);

CREATE INDEX idx_nodes_kind ON nodes(kind);
CREATE INDEX idx_nodes_evidence ON nodes(evidence_artifact_id);
CREATE INDEX idx_edges_source ON edges(source_id);
CREATE INDEX idx_edges_target ON edges(target_id);
CREATE INDEX idx_edges_kind ON edges(kind);
"#;

async fn apply_base_ddl(db: &Db) -> Result<()> {
    let mut tx = db.pool().begin().await?;
    sqlx::query(SHARED_TABLES_DDL).execute(&mut *tx).await?;
    sqlx::query(LEGACY_ENTITY_TABLES_DDL)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// The pivotal migration (spec §4.1): creates `(nodes, edges)`, copies
/// every legacy row into a node (synthesising `natural_key`, folding
/// non-key attributes into `props_json`), materialises the implied
/// foreign keys as edges, then drops the legacy tables. All inside one
/// transaction, with FK enforcement suspended only for the drop phase.
async fn apply_v1_nodes_edges(db: &Db) -> Result<()> {
    let mut tx = db.pool().begin().await?;

    sqlx::query(NODES_EDGES_DDL).execute(&mut *tx).await?;

    copy_hosts(&mut tx).await?;
    copy_vhosts(&mut tx).await?;
    copy_services(&mut tx).await?;
    copy_endpoints(&mut tx).await?;
    copy_inputs(&mut tx).await?;
    copy_endpoint_inputs_edges(&mut tx).await?;
    copy_observations(&mut tx).await?;
    copy_credentials(&mut tx).await?;
    copy_vulnerabilities(&mut tx).await?;
    copy_cves(&mut tx).await?;
    copy_svc_observations(&mut tx).await?;

    // Suspend FK enforcement only for the drop phase — nothing references
    // these tables from `nodes`/`edges`, but sqlite still needs this off
    // before dropping tables that reference each other.
    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *tx)
        .await?;
    for table in [
        "cves",
        "svc_observations",
        "vulnerabilities",
        "credentials",
        "observations",
        "endpoint_inputs",
        "inputs",
        "endpoints",
        "services",
        "vhosts",
        "hosts",
    ] {
        sqlx::query(&format!("DROP TABLE {table}"))
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    warn!("legacy entity tables dropped; schema is now (nodes, edges) only");
    Ok(())
}

async fn insert_node(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    kind: &str,
    natural_key: &str,
    props_json: &serde_json::Value,
    evidence_artifact_id: Option<&str>,
    created_at: &str,
    updated_at: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO nodes (id, kind, natural_key, props_json, evidence_artifact_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(kind)
    .bind(natural_key)
    .bind(props_json.to_string())
    .bind(evidence_artifact_id)
    .bind(created_at)
    .bind(updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_edge(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    kind: &str,
    source_id: &str,
    target_id: &str,
    evidence_artifact_id: Option<&str>,
    created_at: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO edges (id, kind, source_id, target_id, props_json, evidence_artifact_id, created_at)
         VALUES (?, ?, ?, ?, '{}', ?, ?)",
    )
    .bind(id)
    .bind(kind)
    .bind(source_id)
    .bind(target_id)
    .bind(evidence_artifact_id)
    .bind(created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn copy_hosts(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, authority_kind, authority, resolved_ips_json, evidence_artifact_id, created_at, updated_at FROM hosts",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let authority: String = row.try_get("authority")?;
        let props = serde_json::json!({
            "authorityKind": row.try_get::<String, _>("authority_kind")?,
            "authority": authority,
            "resolvedIpsJson": row.try_get::<String, _>("resolved_ips_json")?,
        });
        insert_node(
            tx,
            &id,
            "host",
            &format!("host:{}", props["authority"].as_str().unwrap()),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
    }
    Ok(())
}

async fn copy_vhosts(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, host_id, hostname, source, evidence_artifact_id, created_at, updated_at FROM vhosts",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let host_id: String = row.try_get("host_id")?;
        let hostname: String = row.try_get("hostname")?;
        let source: Option<String> = row.try_get("source")?;
        let mut props = serde_json::json!({ "hostname": hostname });
        if let Some(s) = &source {
            props["source"] = serde_json::json!(s);
        }
        insert_node(
            tx,
            &id,
            "vhost",
            &format!("vhost:{host_id}:{hostname}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "HOST_VHOST",
            &host_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
    }
    Ok(())
}

async fn copy_services(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, host_id, transport, port, app_proto, proto_confidence, state, banner, product, version,
                evidence_artifact_id, created_at, updated_at FROM services",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let host_id: String = row.try_get("host_id")?;
        let transport: String = row.try_get("transport")?;
        let port: i64 = row.try_get("port")?;
        let mut props = serde_json::json!({
            "transport": transport,
            "port": port,
            "appProto": row.try_get::<String, _>("app_proto")?,
            "protoConfidence": row.try_get::<String, _>("proto_confidence")?,
            "state": row.try_get::<String, _>("state")?,
        });
        for (col, key) in [("banner", "banner"), ("product", "product"), ("version", "version")] {
            if let Some(v) = row.try_get::<Option<String>, _>(col)? {
                props[key] = serde_json::json!(v);
            }
        }
        insert_node(
            tx,
            &id,
            "service",
            &format!("svc:{host_id}:{transport}:{port}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "HOST_SERVICE",
            &host_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
    }
    Ok(())
}

async fn copy_endpoints(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, service_id, vhost_id, base_uri, method, path, status_code, content_length, words, lines,
                evidence_artifact_id, created_at, updated_at FROM endpoints",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let service_id: String = row.try_get("service_id")?;
        let vhost_id: Option<String> = row.try_get("vhost_id")?;
        let method: String = row.try_get("method")?;
        let path: String = row.try_get("path")?;
        let mut props = serde_json::json!({
            "baseUri": row.try_get::<String, _>("base_uri")?,
            "method": method,
            "path": path,
        });
        for (col, key) in [
            ("status_code", "statusCode"),
            ("content_length", "contentLength"),
            ("words", "words"),
            ("lines", "lines"),
        ] {
            if let Some(v) = row.try_get::<Option<i64>, _>(col)? {
                props[key] = serde_json::json!(v);
            }
        }
        insert_node(
            tx,
            &id,
            "endpoint",
            &format!("ep:{service_id}:{method}:{path}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "SERVICE_ENDPOINT",
            &service_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
        if let Some(vhost_id) = vhost_id {
            insert_edge(
                tx,
                &uuid::Uuid::new_v4().to_string(),
                "VHOST_ENDPOINT",
                &vhost_id,
                &id,
                None,
                &row.try_get::<String, _>("created_at")?,
            )
            .await?;
        }
    }
    Ok(())
}

async fn copy_inputs(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, service_id, location, name, type_hint, evidence_artifact_id, created_at, updated_at FROM inputs",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let service_id: String = row.try_get("service_id")?;
        let location: String = row.try_get("location")?;
        let name: String = row.try_get("name")?;
        let mut props = serde_json::json!({ "location": location, "name": name });
        if let Some(th) = row.try_get::<Option<String>, _>("type_hint")? {
            props["typeHint"] = serde_json::json!(th);
        }
        insert_node(
            tx,
            &id,
            "input",
            &format!("in:{service_id}:{location}:{name}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "SERVICE_INPUT",
            &service_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
    }
    Ok(())
}

async fn copy_endpoint_inputs_edges(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query("SELECT endpoint_id, input_id FROM endpoint_inputs")
        .fetch_all(&mut **tx)
        .await?;
    for row in rows {
        let endpoint_id: String = row.try_get("endpoint_id")?;
        let input_id: String = row.try_get("input_id")?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "ENDPOINT_INPUT",
            &endpoint_id,
            &input_id,
            None,
            &chrono::Utc::now().to_rfc3339(),
        )
        .await?;
    }
    Ok(())
}

async fn copy_observations(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, input_id, raw_value, norm_value, source, confidence, observed_at, body_path,
                evidence_artifact_id, created_at, updated_at FROM observations",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let input_id: String = row.try_get("input_id")?;
        let mut props = serde_json::json!({
            "rawValue": row.try_get::<String, _>("raw_value")?,
            "normValue": row.try_get::<String, _>("norm_value")?,
            "source": row.try_get::<String, _>("source")?,
            "confidence": row.try_get::<f64, _>("confidence")?,
            "observedAt": row.try_get::<String, _>("observed_at")?,
        });
        if let Some(bp) = row.try_get::<Option<String>, _>("body_path")? {
            props["bodyPath"] = serde_json::json!(bp);
        }
        insert_node(
            tx,
            &id,
            "observation",
            &format!("obs:{id}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "INPUT_OBSERVATION",
            &input_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
    }
    Ok(())
}

async fn copy_credentials(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, service_id, endpoint_id, username, secret, secret_type, source, confidence,
                evidence_artifact_id, created_at, updated_at FROM credentials",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let service_id: String = row.try_get("service_id")?;
        let endpoint_id: Option<String> = row.try_get("endpoint_id")?;
        let props = serde_json::json!({
            "username": row.try_get::<String, _>("username")?,
            "secret": row.try_get::<String, _>("secret")?,
            "secretType": row.try_get::<String, _>("secret_type")?,
            "source": row.try_get::<String, _>("source")?,
            "confidence": row.try_get::<f64, _>("confidence")?,
        });
        insert_node(
            tx,
            &id,
            "credential",
            &format!("cred:{id}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "SERVICE_CREDENTIAL",
            &service_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
        if let Some(endpoint_id) = endpoint_id {
            insert_edge(
                tx,
                &uuid::Uuid::new_v4().to_string(),
                "ENDPOINT_CREDENTIAL",
                &endpoint_id,
                &id,
                None,
                &row.try_get::<String, _>("created_at")?,
            )
            .await?;
        }
    }
    Ok(())
}

async fn copy_vulnerabilities(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, service_id, endpoint_id, vuln_type, title, severity, confidence, description, status,
                evidence_artifact_id, created_at, updated_at FROM vulnerabilities",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let service_id: String = row.try_get("service_id")?;
        let endpoint_id: Option<String> = row.try_get("endpoint_id")?;
        let mut props = serde_json::json!({
            "vulnType": row.try_get::<String, _>("vuln_type")?,
            "title": row.try_get::<String, _>("title")?,
            "severity": row.try_get::<String, _>("severity")?,
            "confidence": row.try_get::<f64, _>("confidence")?,
            "status": row.try_get::<String, _>("status")?,
        });
        if let Some(d) = row.try_get::<Option<String>, _>("description")? {
            props["description"] = serde_json::json!(d);
        }
        insert_node(
            tx,
            &id,
            "vulnerability",
            &format!("vuln:{id}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "SERVICE_VULNERABILITY",
            &service_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
        if let Some(endpoint_id) = endpoint_id {
            insert_edge(
                tx,
                &uuid::Uuid::new_v4().to_string(),
                "ENDPOINT_VULNERABILITY",
                &endpoint_id,
                &id,
                None,
                &row.try_get::<String, _>("created_at")?,
            )
            .await?;
        }
    }
    Ok(())
}

async fn copy_cves(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, vulnerability_id, cve_id, description, cvss_score, cvss_vector, reference_url,
                evidence_artifact_id, created_at, updated_at FROM cves",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let vulnerability_id: String = row.try_get("vulnerability_id")?;
        let cve_id: String = row.try_get("cve_id")?;
        let mut props = serde_json::json!({ "cveId": cve_id });
        if let Some(d) = row.try_get::<Option<String>, _>("description")? {
            props["description"] = serde_json::json!(d);
        }
        if let Some(s) = row.try_get::<Option<f64>, _>("cvss_score")? {
            props["cvssScore"] = serde_json::json!(s);
        }
        if let Some(v) = row.try_get::<Option<String>, _>("cvss_vector")? {
            props["cvssVector"] = serde_json::json!(v);
        }
        if let Some(u) = row.try_get::<Option<String>, _>("reference_url")? {
            props["referenceUrl"] = serde_json::json!(u);
        }
        insert_node(
            tx,
            &id,
            "cve",
            &format!("cve:{vulnerability_id}:{}", props["cveId"].as_str().unwrap()),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "VULNERABILITY_CVE",
            &vulnerability_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
    }
    Ok(())
}

async fn copy_svc_observations(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, service_id, key, value, confidence, evidence_artifact_id, created_at, updated_at FROM svc_observations",
    )
    .fetch_all(&mut **tx)
    .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let service_id: String = row.try_get("service_id")?;
        let props = serde_json::json!({
            "key": row.try_get::<String, _>("key")?,
            "value": row.try_get::<String, _>("value")?,
            "confidence": row.try_get::<f64, _>("confidence")?,
        });
        insert_node(
            tx,
            &id,
            "svc_observation",
            &format!("svcobs:{id}"),
            &props,
            row.try_get::<Option<String>, _>("evidence_artifact_id")?.as_deref(),
            &row.try_get::<String, _>("created_at")?,
            &row.try_get::<String, _>("updated_at")?,
        )
        .await?;
        insert_edge(
            tx,
            &uuid::Uuid::new_v4().to_string(),
            "SERVICE_OBSERVATION",
            &service_id,
            &id,
            None,
            &row.try_get::<String, _>("created_at")?,
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_legacy_v0(db: &Db) {
        apply_base_ddl(db).await.unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO hosts (id, authority_kind, authority, resolved_ips_json, created_at, updated_at)
             VALUES ('h1', 'IP', '10.0.0.1', '[]', ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO services (id, host_id, transport, port, app_proto, proto_confidence, state, created_at, updated_at)
             VALUES ('s1', 'h1', 'tcp', 443, 'https', 'high', 'open', ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO vulnerabilities (id, service_id, vuln_type, title, severity, confidence, status, created_at, updated_at)
             VALUES ('v1', 's1', 'tls', 'Weak cipher', 'medium', 0.8, 'unverified', ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO cves (id, vulnerability_id, cve_id, created_at, updated_at)
             VALUES ('c1', 'v1', 'CVE-2020-0001', ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn fresh_database_ends_on_nodes_edges_schema() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        let version = current_version(&db).await.unwrap();
        assert_eq!(version, LATEST_VERSION);
        assert!(!legacy_tables_present(&db).await.unwrap());
        let node_count: i64 = sqlx::query("SELECT count(*) FROM nodes")
            .fetch_one(db.pool())
            .await
            .unwrap()
            .try_get(0)
            .unwrap();
        assert_eq!(node_count, 0);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        migrate(&db).await.unwrap();
        let version = current_version(&db).await.unwrap();
        assert_eq!(version, LATEST_VERSION);
    }

    #[tokio::test]
    async fn legacy_v0_migrates_preserving_ids_and_evidence() {
        let db = Db::connect_in_memory().await.unwrap();
        seed_legacy_v0(&db).await;
        migrate(&db).await.unwrap();

        assert!(!legacy_tables_present(&db).await.unwrap());

        let kinds: Vec<(String, String)> = sqlx::query("SELECT id, kind FROM nodes ORDER BY id")
            .fetch_all(db.pool())
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.try_get("id").unwrap(), r.try_get("kind").unwrap()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("c1".to_string(), "cve".to_string()),
                ("h1".to_string(), "host".to_string()),
                ("s1".to_string(), "service".to_string()),
                ("v1".to_string(), "vulnerability".to_string()),
            ]
        );

        let edge_kinds: Vec<String> = sqlx::query("SELECT kind FROM edges ORDER BY kind")
            .fetch_all(db.pool())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.try_get("kind").unwrap())
            .collect();
        assert_eq!(
            edge_kinds,
            vec![
                "HOST_SERVICE".to_string(),
                "SERVICE_VULNERABILITY".to_string(),
                "VULNERABILITY_CVE".to_string(),
            ]
        );
    }
}
