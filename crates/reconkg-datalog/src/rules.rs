//! Rule store (C9, spec §4.8): persists named Datalog programs to the
//! `datalog_rules` table and seeds the built-in presets on first use.

use chrono::{DateTime, Utc};
use reconkg_graph::Db;
use sqlx::Row;

use crate::error::{DatalogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedBy {
    Human,
    Ai,
    Preset,
}

impl GeneratedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratedBy::Human => "human",
            GeneratedBy::Ai => "ai",
            GeneratedBy::Preset => "preset",
        }
    }
}

impl std::str::FromStr for GeneratedBy {
    type Err = DatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "human" => Ok(GeneratedBy::Human),
            "ai" => Ok(GeneratedBy::Ai),
            "preset" => Ok(GeneratedBy::Preset),
            other => Err(DatalogError::Resource(format!("unknown generatedBy: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleRecord {
    pub name: String,
    pub description: String,
    pub rule_text: String,
    pub generated_by: GeneratedBy,
    pub is_preset: bool,
    pub created_at: DateTime<Utc>,
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<RuleRecord> {
    let generated_by_raw: String = row.try_get("generated_by")?;
    let created_at_raw: String = row.try_get("created_at")?;
    Ok(RuleRecord {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        rule_text: row.try_get("rule_text")?,
        generated_by: generated_by_raw.parse()?,
        is_preset: row.try_get::<i64, _>("is_preset")? != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at_raw)
            .map_err(|e| DatalogError::Storage(sqlx::Error::Decode(e.into())))?
            .with_timezone(&Utc),
    })
}

pub struct RuleStore<'a> {
    db: &'a Db,
}

impl<'a> RuleStore<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub async fn save(&self, name: &str, description: &str, rule_text: &str, generated_by: GeneratedBy) -> Result<RuleRecord> {
        if self.find_by_name(name).await.is_ok() {
            return Err(DatalogError::DuplicateName(name.to_string()));
        }
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO datalog_rules (name, description, rule_text, generated_by, is_preset, created_at) \
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(rule_text)
        .bind(generated_by.as_str())
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(DatalogError::Storage)?;

        Ok(RuleRecord {
            name: name.to_string(),
            description: description.to_string(),
            rule_text: rule_text.to_string(),
            generated_by,
            is_preset: false,
            created_at: now,
        })
    }

    pub async fn list(&self) -> Result<Vec<RuleRecord>> {
        let rows = sqlx::query("SELECT * FROM datalog_rules ORDER BY name").fetch_all(self.db.pool()).await.map_err(DatalogError::Storage)?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn find_by_name(&self, name: &str) -> Result<RuleRecord> {
        let row = sqlx::query("SELECT * FROM datalog_rules WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DatalogError::Storage)?
            .ok_or_else(|| DatalogError::NotFound(name.to_string()))?;
        row_to_record(&row)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM datalog_rules WHERE name = ?")
            .bind(name)
            .execute(self.db.pool())
            .await
            .map_err(DatalogError::Storage)?;
        if result.rows_affected() == 0 {
            return Err(DatalogError::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Substring search over `name`/`description` (SPEC_FULL §10 addition
    /// to the distilled C9 operation table).
    pub async fn search(&self, query: &str) -> Result<Vec<RuleRecord>> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query("SELECT * FROM datalog_rules WHERE name LIKE ? OR description LIKE ? ORDER BY name")
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(self.db.pool())
            .await
            .map_err(DatalogError::Storage)?;
        rows.iter().map(row_to_record).collect()
    }
}

/// `(name, description, rule_text)` for the two built-in presets (SPEC_FULL
/// §10), expressed over the §4.7 fact schema.
fn preset_defs() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        (
            "open_high_value_services",
            "Open services on ports commonly associated with high-value targets (remote admin, databases, caches)",
            "open_high_value_service(H,S) :- service(H,S,_,22,_,\"open\").\n\
             open_high_value_service(H,S) :- service(H,S,_,445,_,\"open\").\n\
             open_high_value_service(H,S) :- service(H,S,_,1433,_,\"open\").\n\
             open_high_value_service(H,S) :- service(H,S,_,3306,_,\"open\").\n\
             open_high_value_service(H,S) :- service(H,S,_,3389,_,\"open\").\n\
             open_high_value_service(H,S) :- service(H,S,_,5432,_,\"open\").\n\
             open_high_value_service(H,S) :- service(H,S,_,6379,_,\"open\").\n\
             open_high_value_service(H,S) :- service(H,S,_,9200,_,\"open\").\n\
             ?- open_high_value_service(H,S).",
        ),
        (
            "unverified_critical_vulns",
            "Critical-severity vulnerabilities with no corresponding CVE record",
            "unverified_critical_vuln(S,V) :- vulnerability(S,V,_,\"critical\",_), not cve(V,_,_).\n\
             ?- unverified_critical_vuln(S,V).",
        ),
    ]
}

/// Seeds the built-in presets if the table has none yet. Idempotent:
/// `INSERT OR IGNORE` means a second call is a no-op (spec §4.8 "seeded on
/// first use").
pub async fn seed_presets(db: &Db) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    for (name, description, rule_text) in preset_defs() {
        sqlx::query(
            "INSERT OR IGNORE INTO datalog_rules (name, description, rule_text, generated_by, is_preset, created_at) \
             VALUES (?, ?, ?, 'preset', 1, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(rule_text)
        .bind(&now)
        .execute(db.pool())
        .await
        .map_err(DatalogError::Storage)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconkg_graph::migrate;

    #[tokio::test]
    async fn seed_presets_is_idempotent_and_non_empty() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        seed_presets(&db).await.unwrap();
        seed_presets(&db).await.unwrap();

        let store = RuleStore::new(&db);
        let rules = store.list().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.is_preset));
    }

    #[tokio::test]
    async fn save_rejects_duplicate_name() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        let store = RuleStore::new(&db);
        store.save("my_rule", "desc", "foo(X) :- bar(X). ?- foo(X).", GeneratedBy::Human).await.unwrap();
        let err = store.save("my_rule", "desc2", "baz(X) :- bar(X). ?- baz(X).", GeneratedBy::Human).await.unwrap_err();
        assert!(matches!(err, DatalogError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn find_by_name_missing_raises_not_found() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        let store = RuleStore::new(&db);
        let err = store.find_by_name("nope").await.unwrap_err();
        assert!(matches!(err, DatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn search_matches_description_substring() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        seed_presets(&db).await.unwrap();
        let store = RuleStore::new(&db);
        let hits = store.search("CVE").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "unverified_critical_vulns");
    }

    #[tokio::test]
    async fn delete_removes_rule_and_repeat_delete_not_found() {
        let db = Db::connect_in_memory().await.unwrap();
        migrate(&db).await.unwrap();
        let store = RuleStore::new(&db);
        store.save("temp", "", "foo(a). ?- foo(X).", GeneratedBy::Human).await.unwrap();
        store.delete("temp").await.unwrap();
        assert!(matches!(store.delete("temp").await.unwrap_err(), DatalogError::NotFound(_)));
    }
}
