//! Runtime configuration (SPEC_FULL §0.3): database path, default
//! traversal depth bound, default Datalog resource limits. Loaded from
//! environment variables via `dotenvy` + manual parsing, the donor's
//! `DATABASE_URL`-style convention (`batch_test_harness.rs`).

use std::env;

use reconkg_datalog::EvalConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub default_traverse_depth: u32,
    pub datalog_limits: EvalConfig,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Loads `.env` (if present) then reads the environment. Every field
    /// has a usable default, so a bare `reconkg` binary with no
    /// environment set up still starts against a local `reconkg.sqlite3`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: env::var("RECONKG_DATABASE_URL").unwrap_or_else(|_| "reconkg.sqlite3".to_string()),
            default_traverse_depth: env_parsed("RECONKG_DEFAULT_TRAVERSE_DEPTH", reconkg_query::DEFAULT_MAX_DEPTH),
            datalog_limits: EvalConfig {
                max_rules: env_parsed("RECONKG_DATALOG_MAX_RULES", reconkg_datalog::DEFAULT_EVAL_CONFIG.max_rules),
                max_iterations: env_parsed(
                    "RECONKG_DATALOG_MAX_ITERATIONS",
                    reconkg_datalog::DEFAULT_EVAL_CONFIG.max_iterations,
                ),
                max_tuples: env_parsed("RECONKG_DATALOG_MAX_TUPLES", reconkg_datalog::DEFAULT_EVAL_CONFIG.max_tuples),
                timeout_ms: env_parsed("RECONKG_DATALOG_TIMEOUT_MS", reconkg_datalog::DEFAULT_EVAL_CONFIG.timeout_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_environment_is_unset() {
        for key in [
            "RECONKG_DATABASE_URL",
            "RECONKG_DEFAULT_TRAVERSE_DEPTH",
            "RECONKG_DATALOG_MAX_RULES",
            "RECONKG_DATALOG_MAX_ITERATIONS",
            "RECONKG_DATALOG_MAX_TUPLES",
            "RECONKG_DATALOG_TIMEOUT_MS",
        ] {
            std::env::remove_var(key);
        }
        let config = Config::from_env();
        assert_eq!(config.database_url, "reconkg.sqlite3");
        assert_eq!(config.default_traverse_depth, reconkg_query::DEFAULT_MAX_DEPTH);
        assert_eq!(config.datalog_limits.max_rules, reconkg_datalog::DEFAULT_EVAL_CONFIG.max_rules);
    }
}
