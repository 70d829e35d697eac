//! Fact extractor (C6, spec §4.7): projects the graph into positional
//! tuples keyed by predicate name. Floating-point property values
//! (`confidence`, `cvssScore`) are carried as their string representation
//! since the Datalog fact model only admits `string | 64-bit integer`
//! values (spec §3.4); see DESIGN.md for this choice.

use reconkg_graph::Db;
use sqlx::Row;

use crate::ast::Value;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub predicate: String,
    pub values: Vec<Value>,
}

impl Fact {
    pub fn new(predicate: impl Into<String>, values: Vec<Value>) -> Self {
        Self { predicate: predicate.into(), values }
    }
}

fn str_col(row: &sqlx::sqlite::SqliteRow, col: &str) -> Value {
    Value::Str(row.try_get::<Option<String>, _>(col).ok().flatten().unwrap_or_default())
}

fn int_col(row: &sqlx::sqlite::SqliteRow, col: &str, default: i64) -> Value {
    Value::Int(row.try_get::<Option<i64>, _>(col).ok().flatten().unwrap_or(default))
}

/// `json_extract` of a JSON number comes back with REAL/INTEGER affinity,
/// not TEXT, so a float-valued property must be read as `f64` and
/// re-rendered as a string rather than fetched directly as `Option<String>`.
fn float_as_str_col(row: &sqlx::sqlite::SqliteRow, col: &str, default: &str) -> Value {
    let raw = row.try_get::<Option<f64>, _>(col).ok().flatten();
    Value::Str(raw.map(|n| n.to_string()).unwrap_or_else(|| default.to_string()))
}

macro_rules! extractor {
    ($name:ident, $predicate:literal, $sql:literal, |$row:ident| $body:expr) => {
        async fn $name(db: &Db) -> Result<Vec<Fact>> {
            let rows = sqlx::query($sql).fetch_all(db.pool()).await.map_err(reconkg_graph::GraphError::from)?;
            Ok(rows
                .iter()
                .map(|$row| Fact::new($predicate, $body))
                .collect())
        }
    };
}

extractor!(
    host_facts,
    "host",
    "SELECT id, json_extract(props_json,'$.authority') AS authority, \
            json_extract(props_json,'$.authorityKind') AS authority_kind \
     FROM nodes WHERE kind = 'host'",
    |row| vec![str_col(row, "id"), str_col(row, "authority"), str_col(row, "authority_kind")]
);

extractor!(
    service_facts,
    "service",
    "SELECT hs.source_id AS host_id, s.id AS id, \
            json_extract(s.props_json,'$.transport') AS transport, \
            json_extract(s.props_json,'$.port') AS port, \
            json_extract(s.props_json,'$.appProto') AS app_proto, \
            json_extract(s.props_json,'$.state') AS state \
     FROM nodes s \
     JOIN edges hs ON hs.kind = 'HOST_SERVICE' AND hs.target_id = s.id \
     WHERE s.kind = 'service'",
    |row| vec![
        str_col(row, "host_id"),
        str_col(row, "id"),
        str_col(row, "transport"),
        int_col(row, "port", 0),
        str_col(row, "app_proto"),
        str_col(row, "state"),
    ]
);

extractor!(
    http_endpoint_facts,
    "http_endpoint",
    "SELECT se.source_id AS service_id, e.id AS id, \
            json_extract(e.props_json,'$.method') AS method, \
            json_extract(e.props_json,'$.path') AS path, \
            json_extract(e.props_json,'$.statusCode') AS status_code \
     FROM nodes e \
     JOIN edges se ON se.kind = 'SERVICE_ENDPOINT' AND se.target_id = e.id \
     WHERE e.kind = 'endpoint'",
    |row| vec![
        str_col(row, "service_id"),
        str_col(row, "id"),
        str_col(row, "method"),
        str_col(row, "path"),
        int_col(row, "status_code", 0),
    ]
);

extractor!(
    input_facts,
    "input",
    "SELECT si.source_id AS service_id, i.id AS id, \
            json_extract(i.props_json,'$.location') AS location, \
            json_extract(i.props_json,'$.name') AS name \
     FROM nodes i \
     JOIN edges si ON si.kind = 'SERVICE_INPUT' AND si.target_id = i.id \
     WHERE i.kind = 'input'",
    |row| vec![str_col(row, "service_id"), str_col(row, "id"), str_col(row, "location"), str_col(row, "name")]
);

extractor!(
    endpoint_input_facts,
    "endpoint_input",
    "SELECT source_id AS endpoint_id, target_id AS input_id FROM edges WHERE kind = 'ENDPOINT_INPUT'",
    |row| vec![str_col(row, "endpoint_id"), str_col(row, "input_id")]
);

extractor!(
    observation_facts,
    "observation",
    "SELECT io.source_id AS input_id, \
            json_extract(o.props_json,'$.rawValue') AS raw_value, \
            json_extract(o.props_json,'$.normValue') AS norm_value \
     FROM nodes o \
     JOIN edges io ON io.kind = 'INPUT_OBSERVATION' AND io.target_id = o.id \
     WHERE o.kind = 'observation'",
    |row| vec![str_col(row, "input_id"), str_col(row, "raw_value"), str_col(row, "norm_value")]
);

extractor!(
    credential_facts,
    "credential",
    "SELECT sc.source_id AS service_id, c.id AS id, \
            json_extract(c.props_json,'$.username') AS username, \
            json_extract(c.props_json,'$.secretType') AS secret_type \
     FROM nodes c \
     JOIN edges sc ON sc.kind = 'SERVICE_CREDENTIAL' AND sc.target_id = c.id \
     WHERE c.kind = 'credential'",
    |row| vec![str_col(row, "service_id"), str_col(row, "id"), str_col(row, "username"), str_col(row, "secret_type")]
);

extractor!(
    vulnerability_facts,
    "vulnerability",
    "SELECT sv.source_id AS service_id, v.id AS id, \
            json_extract(v.props_json,'$.vulnType') AS vuln_type, \
            json_extract(v.props_json,'$.severity') AS severity, \
            json_extract(v.props_json,'$.confidence') AS confidence \
     FROM nodes v \
     JOIN edges sv ON sv.kind = 'SERVICE_VULNERABILITY' AND sv.target_id = v.id \
     WHERE v.kind = 'vulnerability'",
    |row| vec![
        str_col(row, "service_id"),
        str_col(row, "id"),
        str_col(row, "vuln_type"),
        str_col(row, "severity"),
        float_as_str_col(row, "confidence", "0"),
    ]
);

extractor!(
    vulnerability_endpoint_facts,
    "vulnerability_endpoint",
    "SELECT target_id AS vuln_id, source_id AS endpoint_id FROM edges WHERE kind = 'ENDPOINT_VULNERABILITY'",
    |row| vec![str_col(row, "vuln_id"), str_col(row, "endpoint_id")]
);

extractor!(
    cve_facts,
    "cve",
    "SELECT vc.source_id AS vuln_id, c.id AS id, \
            json_extract(c.props_json,'$.cveId') AS cve_id, \
            json_extract(c.props_json,'$.cvssScore') AS cvss_score \
     FROM nodes c \
     JOIN edges vc ON vc.kind = 'VULNERABILITY_CVE' AND vc.target_id = c.id \
     WHERE c.kind = 'cve'",
    |row| vec![str_col(row, "vuln_id"), str_col(row, "cve_id"), float_as_str_col(row, "cvss_score", "0")]
);

extractor!(
    vhost_facts,
    "vhost",
    "SELECT hv.source_id AS host_id, v.id AS id, \
            json_extract(v.props_json,'$.hostname') AS hostname, \
            json_extract(v.props_json,'$.source') AS source \
     FROM nodes v \
     JOIN edges hv ON hv.kind = 'HOST_VHOST' AND hv.target_id = v.id \
     WHERE v.kind = 'vhost'",
    |row| vec![str_col(row, "host_id"), str_col(row, "id"), str_col(row, "hostname"), str_col(row, "source")]
);

/// The closed set of predicates projected from the graph (spec §4.7 table).
pub const PREDICATES: [&str; 11] = [
    "host",
    "service",
    "http_endpoint",
    "input",
    "endpoint_input",
    "observation",
    "credential",
    "vulnerability",
    "vulnerability_endpoint",
    "cve",
    "vhost",
];

/// All facts, across every predicate (used to seed the evaluator).
pub async fn extract_facts(db: &Db) -> Result<Vec<Fact>> {
    let mut facts = Vec::new();
    facts.extend(host_facts(db).await?);
    facts.extend(service_facts(db).await?);
    facts.extend(http_endpoint_facts(db).await?);
    facts.extend(input_facts(db).await?);
    facts.extend(endpoint_input_facts(db).await?);
    facts.extend(observation_facts(db).await?);
    facts.extend(credential_facts(db).await?);
    facts.extend(vulnerability_facts(db).await?);
    facts.extend(vulnerability_endpoint_facts(db).await?);
    facts.extend(cve_facts(db).await?);
    facts.extend(vhost_facts(db).await?);
    Ok(facts)
}

/// Only the facts under `predicate`, optionally capped at `limit` — used by
/// the facade to let a caller inspect one relation at a time.
pub async fn extract_facts_by_predicate(db: &Db, predicate: &str, limit: Option<usize>) -> Result<Vec<Fact>> {
    let mut facts = match predicate {
        "host" => host_facts(db).await?,
        "service" => service_facts(db).await?,
        "http_endpoint" => http_endpoint_facts(db).await?,
        "input" => input_facts(db).await?,
        "endpoint_input" => endpoint_input_facts(db).await?,
        "observation" => observation_facts(db).await?,
        "credential" => credential_facts(db).await?,
        "vulnerability" => vulnerability_facts(db).await?,
        "vulnerability_endpoint" => vulnerability_endpoint_facts(db).await?,
        "cve" => cve_facts(db).await?,
        "vhost" => vhost_facts(db).await?,
        _ => Vec::new(),
    };
    if let Some(limit) = limit {
        facts.truncate(limit);
    }
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconkg_graph::{migrate, EdgeRepository, NodeRepository};
    use reconkg_types::{EdgeKind, NodeKind};
    use serde_json::json;

    #[tokio::test]
    async fn round_trip_projects_host_and_service() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        let nodes = NodeRepository::new(&db);
        let edges = EdgeRepository::new(&db);

        let host = nodes
            .create(NodeKind::Host, &json!({"authorityKind": "IP", "authority": "10.1.1.1"}), None, None)
            .await
            .unwrap();
        let service = nodes
            .create(
                NodeKind::Service,
                &json!({"transport": "tcp", "port": 8080, "appProto": "http", "protoConfidence": "high", "state": "open"}),
                None,
                Some(host.id),
            )
            .await
            .unwrap();
        edges.create(EdgeKind::HostService, host.id, service.id, None).await.unwrap();

        let facts = extract_facts(&db).await.unwrap();
        let host_fact = facts.iter().find(|f| f.predicate == "host").unwrap();
        assert_eq!(host_fact.values[0], Value::Str(host.id.to_string()));
        assert_eq!(host_fact.values[1], Value::Str("10.1.1.1".to_string()));

        let service_fact = facts.iter().find(|f| f.predicate == "service").unwrap();
        assert_eq!(service_fact.values[0], Value::Str(host.id.to_string()));
        assert_eq!(service_fact.values[3], Value::Int(8080));
    }

    #[tokio::test]
    async fn extract_by_predicate_respects_limit() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        let nodes = NodeRepository::new(&db);
        for i in 0..3 {
            nodes
                .create(NodeKind::Host, &json!({"authorityKind": "IP", "authority": format!("10.0.0.{i}")}), None, None)
                .await
                .unwrap();
        }
        let facts = extract_facts_by_predicate(&db, "host", Some(2)).await.unwrap();
        assert_eq!(facts.len(), 2);
    }
}
