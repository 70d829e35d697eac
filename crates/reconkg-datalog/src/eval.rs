//! Naive bottom-up evaluator (C8, spec §4.6): seeds a fact database with
//! `baseFacts` plus the program's own inline facts, then iterates real
//! rules to a fixed point, checking resource limits at every iteration
//! boundary.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::ast::{Atom, CompareOp, Literal, Program, Term, Value};
use crate::error::DatalogError;
use crate::facts::Fact;

pub type Result<T> = std::result::Result<T, DatalogError>;

#[derive(Debug, Clone, Copy)]
pub struct EvalConfig {
    pub max_rules: usize,
    pub max_iterations: usize,
    pub max_tuples: usize,
    pub timeout_ms: u64,
}

/// Defaults are generous enough for exploratory queries over a single
/// engagement's graph but bound a runaway recursive rule.
pub const DEFAULT_EVAL_CONFIG: EvalConfig =
    EvalConfig { max_rules: 200, max_iterations: 100, max_tuples: 100_000, timeout_ms: 5_000 };

#[derive(Debug, Clone)]
pub struct Answer {
    pub query: String,
    pub columns: Vec<String>,
    pub tuples: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Copy)]
pub struct EvalStats {
    pub iterations: usize,
    pub total_derived: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct EvalResult {
    pub answers: Vec<Answer>,
    pub stats: EvalStats,
}

type Binding = HashMap<String, Value>;
type Tuple = Vec<Value>;

/// A deduplicating, predicate-bucketed in-memory fact database. Dedup key
/// is the tuple's own values, since `Value` is a closed string/int union
/// with a canonical `Hash`/`Eq` already (spec §4.6.1: "canonical
/// serialisation of (type-tag, value) per position").
#[derive(Default)]
struct FactDb {
    by_predicate: HashMap<String, HashSet<Tuple>>,
}

impl FactDb {
    fn len(&self) -> usize {
        self.by_predicate.values().map(|s| s.len()).sum()
    }

    /// Returns true if the tuple was new.
    fn insert(&mut self, predicate: &str, tuple: Tuple) -> bool {
        self.by_predicate.entry(predicate.to_string()).or_default().insert(tuple)
    }

    fn get(&self, predicate: &str) -> impl Iterator<Item = &Tuple> {
        self.by_predicate.get(predicate).into_iter().flatten()
    }
}

pub fn evaluate(program: &Program, base_facts: &[Fact], config: &EvalConfig) -> Result<EvalResult> {
    let start = Instant::now();

    let (inline_facts, real_rules): (Vec<_>, Vec<_>) =
        program.rules.iter().partition(|r| r.is_fact());

    if real_rules.len() > config.max_rules {
        return Err(DatalogError::Resource(format!(
            "program has {} rules, exceeding maxRules={}",
            real_rules.len(),
            config.max_rules
        )));
    }

    let mut db = FactDb::default();
    for fact in base_facts {
        db.insert(&fact.predicate, fact.values.clone());
    }
    for rule in &inline_facts {
        db.insert(&rule.head.predicate, head_tuple_for_fact(&rule.head));
    }
    check_tuple_limit(&db, config)?;

    let mut iterations = 0usize;
    loop {
        check_timeout(&start, config)?;
        if iterations >= config.max_iterations {
            return Err(DatalogError::Resource(format!(
                "evaluation exceeded maxIterations={}",
                config.max_iterations
            )));
        }
        iterations += 1;

        let mut derived_any = false;
        for rule in &real_rules {
            let bindings = solve_body(&rule.body, &db);
            let mut seen_this_firing: HashSet<Tuple> = HashSet::new();
            for binding in bindings {
                let tuple = instantiate(&rule.head, &binding)?;
                if !seen_this_firing.insert(tuple.clone()) {
                    continue;
                }
                if db.insert(&rule.head.predicate, tuple) {
                    derived_any = true;
                    check_tuple_limit(&db, config)?;
                }
            }
        }
        if !derived_any {
            break;
        }
    }

    let answers = program
        .queries
        .iter()
        .map(|q| build_answer(&q.atom, &db))
        .collect::<Vec<_>>();

    Ok(EvalResult {
        answers,
        stats: EvalStats { iterations, total_derived: db.len(), elapsed_ms: start.elapsed().as_millis() as u64 },
    })
}

fn check_timeout(start: &Instant, config: &EvalConfig) -> Result<()> {
    if start.elapsed().as_millis() as u64 > config.timeout_ms {
        return Err(DatalogError::Resource(format!("evaluation exceeded timeoutMs={}", config.timeout_ms)));
    }
    Ok(())
}

fn check_tuple_limit(db: &FactDb, config: &EvalConfig) -> Result<()> {
    if db.len() > config.max_tuples {
        return Err(DatalogError::Resource(format!("fact database exceeded maxTuples={}", config.max_tuples)));
    }
    Ok(())
}

/// Inline facts keep their head's literal terms: a bare identifier in a
/// fact position is carried as its own name, whether or not it would be
/// classified as a variable in rule-body position (spec §4.6 step 1).
fn head_tuple_for_fact(head: &Atom) -> Tuple {
    head.args
        .iter()
        .map(|t| match t {
            Term::Variable(name) => Value::Str(name.clone()),
            Term::Constant(v) => v.clone(),
        })
        .collect()
}

fn instantiate(head: &Atom, binding: &Binding) -> Result<Tuple> {
    head.args
        .iter()
        .map(|t| match t {
            Term::Constant(v) => Ok(v.clone()),
            Term::Variable(name) => binding
                .get(name)
                .cloned()
                .ok_or_else(|| DatalogError::Resource(format!("unbound variable `{name}` in rule head"))),
        })
        .collect()
}

fn solve_body(body: &[Literal], db: &FactDb) -> Vec<Binding> {
    solve_from(body, 0, Binding::new(), db)
}

fn solve_from(body: &[Literal], index: usize, binding: Binding, db: &FactDb) -> Vec<Binding> {
    let Some(literal) = body.get(index) else {
        return vec![binding];
    };

    match literal {
        Literal::Positive(atom) => db
            .get(&atom.predicate)
            .filter_map(|tuple| unify(atom, tuple, &binding))
            .flat_map(|extended| solve_from(body, index + 1, extended, db))
            .collect(),
        Literal::Negated(atom) => {
            let fails_for_all = db.get(&atom.predicate).all(|tuple| unify(atom, tuple, &binding).is_none());
            if fails_for_all {
                solve_from(body, index + 1, binding, db)
            } else {
                Vec::new()
            }
        }
        Literal::Comparison { left, op, right } => match eval_comparison(left, op, right, &binding) {
            Some(true) => solve_from(body, index + 1, binding, db),
            _ => Vec::new(),
        },
    }
}

fn unify(atom: &Atom, tuple: &[Value], binding: &Binding) -> Option<Binding> {
    if atom.args.len() != tuple.len() {
        return None;
    }
    let mut extended = binding.clone();
    for (term, value) in atom.args.iter().zip(tuple.iter()) {
        match term {
            Term::Constant(c) => {
                if c != value {
                    return None;
                }
            }
            Term::Variable(name) => match extended.get(name) {
                Some(bound) if bound != value => return None,
                Some(_) => {}
                None => {
                    extended.insert(name.clone(), value.clone());
                }
            },
        }
    }
    Some(extended)
}

fn resolve(term: &Term, binding: &Binding) -> Option<Value> {
    match term {
        Term::Constant(v) => Some(v.clone()),
        Term::Variable(name) => binding.get(name).cloned(),
    }
}

/// Mixed-type comparisons are unequal and unordered (spec §4.6.1): `=`/`!=`
/// behave as expected across types, `<,>,<=,>=` return `false`.
fn eval_comparison(left: &Term, op: &CompareOp, right: &Term, binding: &Binding) -> Option<bool> {
    let lv = resolve(left, binding)?;
    let rv = resolve(right, binding)?;

    let same_type_order = match (&lv, &rv) {
        (Value::Int(a), Value::Int(b)) => Some(a.partial_cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.partial_cmp(b)),
        _ => None,
    };

    Some(match op {
        CompareOp::Eq => lv == rv,
        CompareOp::Ne => lv != rv,
        CompareOp::Lt => same_type_order.flatten().map(|o| o.is_lt()).unwrap_or(false),
        CompareOp::Gt => same_type_order.flatten().map(|o| o.is_gt()).unwrap_or(false),
        CompareOp::Le => same_type_order.flatten().map(|o| o.is_le()).unwrap_or(false),
        CompareOp::Ge => same_type_order.flatten().map(|o| o.is_ge()).unwrap_or(false),
    })
}

fn build_answer(query_atom: &Atom, db: &FactDb) -> Answer {
    let columns: Vec<String> = query_atom
        .args
        .iter()
        .filter_map(|t| match t {
            Term::Variable(name) => Some(name.clone()),
            Term::Constant(_) => None,
        })
        .collect();

    let tuples: Vec<Tuple> =
        db.get(&query_atom.predicate).filter(|tuple| unify(query_atom, tuple, &Binding::new()).is_some()).cloned().collect();

    Answer { query: query_atom.predicate.clone(), columns, tuples }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn facts(values: &[(&str, &[Value])]) -> Vec<Fact> {
        values.iter().map(|(p, vs)| Fact::new(*p, vs.to_vec())).collect()
    }

    #[test]
    fn derives_transitive_closure() {
        let program = parse_program(
            r#"
            parent(alice,bob).
            parent(bob,carol).
            parent(carol,dave).
            ancestor(X,Y) :- parent(X,Y).
            ancestor(X,Z) :- parent(X,Y), ancestor(Y,Z).
            ?- ancestor(X,Y).
            "#,
        )
        .unwrap();

        let result = evaluate(&program, &[], &DEFAULT_EVAL_CONFIG).unwrap();
        let answer = &result.answers[0];
        assert_eq!(answer.columns, vec!["X", "Y"]);
        assert_eq!(answer.tuples.len(), 6); // 3 direct + 2 one-hop + 1 two-hop
    }

    #[test]
    fn negation_excludes_matching_facts() {
        let program = parse_program(
            r#"
            node(a).
            node(b).
            danger(b).
            safe(X) :- node(X), not danger(X).
            ?- safe(X).
            "#,
        )
        .unwrap();

        let result = evaluate(&program, &[], &DEFAULT_EVAL_CONFIG).unwrap();
        let answer = &result.answers[0];
        assert_eq!(answer.tuples, vec![vec![Value::Str("a".to_string())]]);
    }

    #[test]
    fn comparison_filters_by_severity() {
        let base = facts(&[
            ("vulnerability", &[Value::Str("svc1".into()), Value::Str("v1".into()), Value::Str("sqli".into()), Value::Str("critical".into()), Value::Str("0.9".into())]),
            ("vulnerability", &[Value::Str("svc2".into()), Value::Str("v2".into()), Value::Str("xss".into()), Value::Str("low".into()), Value::Str("0.3".into())]),
        ]);
        let program = parse_program(
            r#"critical(S) :- vulnerability(S,_,_,Sev,_), Sev = "critical". ?- critical(S)."#,
        )
        .unwrap();

        let result = evaluate(&program, &base, &DEFAULT_EVAL_CONFIG).unwrap();
        assert_eq!(result.answers[0].tuples, vec![vec![Value::Str("svc1".to_string())]]);
    }

    #[test]
    fn exceeding_max_iterations_raises_resource_error() {
        let mut src = String::new();
        for i in 0..100 {
            src.push_str(&format!("next({i},{}).\n", i + 1));
        }
        src.push_str("reach(X,Z) :- next(X,Y), reach(Y,Z).\n");
        src.push_str("reach(X,Y) :- next(X,Y).\n");
        src.push_str("?- reach(X,Y).\n");
        let program = parse_program(&src).unwrap();

        let config = EvalConfig { max_iterations: 1, ..DEFAULT_EVAL_CONFIG };
        let err = evaluate(&program, &[], &config).unwrap_err();
        assert!(matches!(err, DatalogError::Resource(msg) if msg.contains("maxIterations")));
    }

    #[test]
    fn exceeding_max_rules_raises_resource_error() {
        let program = parse_program("a(X) :- b(X). c(X) :- b(X). ?- a(X).").unwrap();
        let config = EvalConfig { max_rules: 1, ..DEFAULT_EVAL_CONFIG };
        let err = evaluate(&program, &[], &config).unwrap_err();
        assert!(matches!(err, DatalogError::Resource(msg) if msg.contains("maxRules")));
    }
}

#[cfg(test)]
mod eval_proptests {
    use super::*;
    use crate::parser::parse_program;
    use proptest::prelude::*;

    /// Evaluator determinism and monotonicity (spec §8): re-running the same
    /// program against the same base facts always derives the same answer
    /// set, and a longer `next` chain never derives fewer `reach` pairs than
    /// a shorter prefix of it.
    proptest! {
        #[test]
        fn transitive_closure_is_deterministic_and_monotone(chain_len in 1usize..12) {
            let mut src = String::new();
            for i in 0..chain_len {
                src.push_str(&format!("next({i},{}).\n", i + 1));
            }
            src.push_str("reach(X,Y) :- next(X,Y).\n");
            src.push_str("reach(X,Z) :- next(X,Y), reach(Y,Z).\n");
            src.push_str("?- reach(X,Y).\n");
            let program = parse_program(&src).unwrap();

            let first = evaluate(&program, &[], &DEFAULT_EVAL_CONFIG).unwrap();
            let second = evaluate(&program, &[], &DEFAULT_EVAL_CONFIG).unwrap();
            prop_assert_eq!(first.answers[0].tuples.len(), second.answers[0].tuples.len());

            let expected = chain_len * (chain_len + 1) / 2;
            prop_assert_eq!(first.answers[0].tuples.len(), expected);
        }
    }
}
