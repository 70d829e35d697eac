//! The closed set of analytical presets (spec §4.3): pure read-only joins
//! over `nodes`/`edges`, each returned as a plain record array.

use reconkg_graph::Db;
use serde_json::{Map, Value};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{QueryError, Result};

fn opt_str(row: &sqlx::sqlite::SqliteRow, col: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(col).ok().flatten()
}

fn str_col(row: &sqlx::sqlite::SqliteRow, col: &str) -> Option<Value> {
    opt_str(row, col).map(Value::String)
}

fn i64_col(row: &sqlx::sqlite::SqliteRow, col: &str) -> Option<Value> {
    row.try_get::<Option<i64>, _>(col).ok().flatten().map(Value::from)
}

pub async fn attack_surface(db: &Db) -> Result<Vec<Value>> {
    let rows = sqlx::query(
        r#"
        SELECT
            h.id AS host_id,
            json_extract(h.props_json, '$.authority') AS host_authority,
            s.id AS service_id,
            json_extract(s.props_json, '$.port') AS service_port,
            json_extract(s.props_json, '$.transport') AS service_transport,
            e.id AS endpoint_id,
            json_extract(e.props_json, '$.method') AS endpoint_method,
            json_extract(e.props_json, '$.path') AS endpoint_path,
            i.id AS input_id,
            json_extract(i.props_json, '$.location') AS input_location,
            json_extract(i.props_json, '$.name') AS input_name
        FROM nodes h
        JOIN edges he ON he.kind = 'HOST_SERVICE' AND he.source_id = h.id
        JOIN nodes s ON s.id = he.target_id
        LEFT JOIN edges se ON se.kind = 'SERVICE_ENDPOINT' AND se.source_id = s.id
        LEFT JOIN nodes e ON e.id = se.target_id
        LEFT JOIN edges ei ON ei.kind = 'ENDPOINT_INPUT' AND ei.source_id = e.id
        LEFT JOIN nodes i ON i.id = ei.target_id
        WHERE h.kind = 'host'
        ORDER BY h.id, s.id, e.id, i.id
        "#,
    )
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let mut m = Map::new();
            m.insert("hostId".into(), str_col(row, "host_id").unwrap_or(Value::Null));
            m.insert("hostAuthority".into(), str_col(row, "host_authority").unwrap_or(Value::Null));
            m.insert("serviceId".into(), str_col(row, "service_id").unwrap_or(Value::Null));
            m.insert("servicePort".into(), i64_col(row, "service_port").unwrap_or(Value::Null));
            m.insert("serviceTransport".into(), str_col(row, "service_transport").unwrap_or(Value::Null));
            m.insert("endpointId".into(), str_col(row, "endpoint_id").unwrap_or(Value::Null));
            m.insert("endpointMethod".into(), str_col(row, "endpoint_method").unwrap_or(Value::Null));
            m.insert("endpointPath".into(), str_col(row, "endpoint_path").unwrap_or(Value::Null));
            m.insert("inputId".into(), str_col(row, "input_id").unwrap_or(Value::Null));
            m.insert("inputLocation".into(), str_col(row, "input_location").unwrap_or(Value::Null));
            m.insert("inputName".into(), str_col(row, "input_name").unwrap_or(Value::Null));
            Value::Object(m)
        })
        .collect())
}

pub async fn critical_vulns(db: &Db) -> Result<Vec<Value>> {
    let rows = sqlx::query(
        r#"
        SELECT
            v.id AS vuln_id,
            json_extract(v.props_json, '$.severity') AS severity,
            json_extract(v.props_json, '$.title') AS title,
            s.id AS service_id,
            h.id AS host_id,
            json_extract(h.props_json, '$.authority') AS host_authority
        FROM nodes v
        JOIN edges sv ON sv.kind = 'SERVICE_VULNERABILITY' AND sv.target_id = v.id
        JOIN nodes s ON s.id = sv.source_id
        JOIN edges hs ON hs.kind = 'HOST_SERVICE' AND hs.target_id = s.id
        JOIN nodes h ON h.id = hs.source_id
        WHERE v.kind = 'vulnerability'
          AND json_extract(v.props_json, '$.severity') IN ('critical', 'high')
        ORDER BY
            CASE json_extract(v.props_json, '$.severity') WHEN 'critical' THEN 0 ELSE 1 END,
            h.id
        "#,
    )
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let mut m = Map::new();
            m.insert("vulnId".into(), str_col(row, "vuln_id").unwrap_or(Value::Null));
            m.insert("severity".into(), str_col(row, "severity").unwrap_or(Value::Null));
            m.insert("title".into(), str_col(row, "title").unwrap_or(Value::Null));
            m.insert("serviceId".into(), str_col(row, "service_id").unwrap_or(Value::Null));
            m.insert("hostId".into(), str_col(row, "host_id").unwrap_or(Value::Null));
            m.insert("hostAuthority".into(), str_col(row, "host_authority").unwrap_or(Value::Null));
            Value::Object(m)
        })
        .collect())
}

pub async fn credential_exposure(db: &Db) -> Result<Vec<Value>> {
    let rows = sqlx::query(
        r#"
        SELECT
            s.id AS service_id,
            c.id AS credential_id,
            json_extract(c.props_json, '$.username') AS username,
            json_extract(c.props_json, '$.secretType') AS secret_type
        FROM edges sc
        JOIN nodes s ON s.id = sc.source_id
        JOIN nodes c ON c.id = sc.target_id
        WHERE sc.kind = 'SERVICE_CREDENTIAL'
        ORDER BY s.id, c.id
        "#,
    )
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let mut m = Map::new();
            m.insert("serviceId".into(), str_col(row, "service_id").unwrap_or(Value::Null));
            m.insert("credentialId".into(), str_col(row, "credential_id").unwrap_or(Value::Null));
            m.insert("username".into(), str_col(row, "username").unwrap_or(Value::Null));
            m.insert("secretType".into(), str_col(row, "secret_type").unwrap_or(Value::Null));
            Value::Object(m)
        })
        .collect())
}

pub async fn unscanned_services(db: &Db) -> Result<Vec<Value>> {
    let rows = sqlx::query(
        r#"
        SELECT
            s.id AS service_id,
            json_extract(s.props_json, '$.port') AS port,
            h.id AS host_id,
            json_extract(h.props_json, '$.authority') AS host_authority
        FROM nodes s
        JOIN edges hs ON hs.kind = 'HOST_SERVICE' AND hs.target_id = s.id
        JOIN nodes h ON h.id = hs.source_id
        WHERE s.kind = 'service'
          AND NOT EXISTS (
              SELECT 1 FROM edges se WHERE se.kind = 'SERVICE_ENDPOINT' AND se.source_id = s.id
          )
        ORDER BY h.id, s.id
        "#,
    )
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let mut m = Map::new();
            m.insert("serviceId".into(), str_col(row, "service_id").unwrap_or(Value::Null));
            m.insert("port".into(), i64_col(row, "port").unwrap_or(Value::Null));
            m.insert("hostId".into(), str_col(row, "host_id").unwrap_or(Value::Null));
            m.insert("hostAuthority".into(), str_col(row, "host_authority").unwrap_or(Value::Null));
            Value::Object(m)
        })
        .collect())
}

pub async fn vuln_by_host(db: &Db) -> Result<Vec<Value>> {
    let rows = sqlx::query(
        r#"
        SELECT
            h.id AS host_id,
            json_extract(h.props_json, '$.authority') AS host_authority,
            COUNT(v.id) AS vuln_count
        FROM nodes h
        JOIN edges hs ON hs.kind = 'HOST_SERVICE' AND hs.source_id = h.id
        JOIN nodes s ON s.id = hs.target_id
        JOIN edges sv ON sv.kind = 'SERVICE_VULNERABILITY' AND sv.source_id = s.id
        JOIN nodes v ON v.id = sv.target_id
        WHERE h.kind = 'host'
        GROUP BY h.id
        ORDER BY vuln_count DESC, h.id
        "#,
    )
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let mut m = Map::new();
            m.insert("hostId".into(), str_col(row, "host_id").unwrap_or(Value::Null));
            m.insert("hostAuthority".into(), str_col(row, "host_authority").unwrap_or(Value::Null));
            m.insert("vulnCount".into(), i64_col(row, "vuln_count").unwrap_or(Value::from(0)));
            Value::Object(m)
        })
        .collect())
}

pub async fn reachable_services(db: &Db, host_id: Option<Uuid>) -> Result<Vec<Value>> {
    let host_id = host_id.ok_or_else(|| QueryError::BadRequest("hostId is required".to_string()))?;

    let rows = sqlx::query(
        r#"
        SELECT
            s.id AS service_id,
            json_extract(s.props_json, '$.port') AS port,
            json_extract(s.props_json, '$.transport') AS transport,
            json_extract(s.props_json, '$.appProto') AS app_proto
        FROM edges hs
        JOIN nodes s ON s.id = hs.target_id
        WHERE hs.kind = 'HOST_SERVICE' AND hs.source_id = ?
        ORDER BY s.id
        "#,
    )
    .bind(host_id.to_string())
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let mut m = Map::new();
            m.insert("serviceId".into(), str_col(row, "service_id").unwrap_or(Value::Null));
            m.insert("port".into(), i64_col(row, "port").unwrap_or(Value::Null));
            m.insert("transport".into(), str_col(row, "transport").unwrap_or(Value::Null));
            m.insert("appProto".into(), str_col(row, "app_proto").unwrap_or(Value::Null));
            Value::Object(m)
        })
        .collect())
}
