//! Datalog grammar, naive bottom-up evaluator, graph fact extractor, and
//! rule store (C6-C9, spec §4.5-§4.8).

pub mod ast;
pub mod error;
pub mod eval;
pub mod facts;
pub mod parser;
pub mod rules;

pub use ast::{Atom, CompareOp, Literal, Program, Query, Rule, Term, Value};
pub use error::DatalogError;
pub use eval::{evaluate, Answer, EvalConfig, EvalResult, EvalStats, DEFAULT_EVAL_CONFIG};
pub use facts::{extract_facts, extract_facts_by_predicate, Fact, PREDICATES};
pub use parser::parse_program;
pub use rules::{seed_presets, GeneratedBy, RuleRecord, RuleStore};
