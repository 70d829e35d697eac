//! Attack-data knowledge graph engine: wires storage, graph queries, the
//! normalizer, and the Datalog evaluator behind a single facade (spec §1).

pub mod config;

pub use config::Config;
pub use reconkg_facade::{error, Facade};
