//! Datalog parser (C7, spec §4.5): a small hand-written grammar over `nom`,
//! mirroring the recursive-descent style `dsl-core` uses for its own DSL.
//! Safety of negated literals is not enforced here — the evaluator treats
//! unbound terms defensively (spec §4.5).

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, multispace1, none_of};
use nom::combinator::{all_consuming, cut, map, map_res, opt, recognize, value};
use nom::multi::{many0, many0_count, separated_list0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::{IResult, Offset};
use std::cell::Cell;

use crate::ast::{Atom, CompareOp, Literal, Program, Query, Rule, Term, Value};
use crate::error::DatalogError;

/// Per-parse counter used to give each anonymous `_` its own fresh
/// variable name, so two wildcards in the same atom don't get forced
/// equal by unification.
thread_local! {
    static WILDCARD_COUNTER: Cell<u64> = Cell::new(0);
}

fn fresh_wildcard_name() -> String {
    WILDCARD_COUNTER.with(|c| {
        let n = c.get();
        c.set(n + 1);
        format!("_w{n}")
    })
}

type NomErr<'a> = nom::error::Error<&'a str>;

pub fn parse_program(input: &str) -> Result<Program, DatalogError> {
    WILDCARD_COUNTER.with(|c| c.set(0));
    match all_consuming(program)(input) {
        Ok((_, prog)) => Ok(prog),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let offset = input.offset(e.input);
            Err(DatalogError::Parse { message: describe(&e), offset })
        }
        Err(nom::Err::Incomplete(_)) => Err(DatalogError::Parse {
            message: "incomplete input".to_string(),
            offset: input.len(),
        }),
    }
}

fn describe(e: &NomErr) -> String {
    format!("unexpected input near `{}`", e.input.chars().take(24).collect::<String>())
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn raw_ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            many0(alt((
                value('"', tag("\\\"")),
                none_of("\""),
            ))),
            |chars: Vec<char>| chars.into_iter().collect(),
        ),
        char('"'),
    )(input)
}

fn integer_literal(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| s.parse::<i64>())(input)
}

/// A term classifies its own identifier: uppercase-leading is a variable,
/// a bare `_` is a fresh anonymous variable, everything else is a
/// constant atom carried as a string value (spec §4.5).
fn term(input: &str) -> IResult<&str, Term> {
    alt((
        map(string_literal, |s| Term::Constant(Value::Str(s))),
        map(integer_literal, |n| Term::Constant(Value::Int(n))),
        map(raw_ident, |s| {
            if s == "_" {
                Term::Variable(fresh_wildcard_name())
            } else if s.starts_with(|c: char| c.is_ascii_uppercase()) {
                Term::Variable(s.to_string())
            } else {
                Term::Constant(Value::Str(s.to_string()))
            }
        }),
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Atom> {
    let (input, predicate) = raw_ident(input)?;
    let (input, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), term),
        cut(ws(char(')'))),
    )(input)?;
    Ok((input, Atom { predicate: predicate.to_string(), args }))
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Eq, tag("=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Literal> {
    map(
        tuple((term, ws(compare_op), term)),
        |(left, op, right)| Literal::Comparison { left, op, right },
    )(input)
}

fn negated_atom(input: &str) -> IResult<&str, Literal> {
    map(preceded(pair(tag("not"), multispace1), atom), Literal::Negated)(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((negated_atom, map(atom, Literal::Positive), comparison))(input)
}

fn body(input: &str) -> IResult<&str, Vec<Literal>> {
    separated_list1(ws(char(',')), literal)(input)
}

fn rule(input: &str) -> IResult<&str, Rule> {
    map(
        terminated(
            pair(atom, opt(preceded(ws(tag(":-")), cut(body)))),
            cut(ws(char('.'))),
        ),
        |(head, body)| Rule { head, body: body.unwrap_or_default() },
    )(input)
}

fn query(input: &str) -> IResult<&str, Query> {
    map(
        delimited(ws(tag("?-")), cut(atom), cut(ws(char('.')))),
        |atom| Query { atom },
    )(input)
}

#[derive(Debug, Clone)]
enum ProgramItem {
    Rule(Rule),
    Query(Query),
}

fn program_item(input: &str) -> IResult<&str, ProgramItem> {
    ws(alt((map(query, ProgramItem::Query), map(rule, ProgramItem::Rule))))(input)
}

fn program(input: &str) -> IResult<&str, Program> {
    map(many0(program_item), |items| {
        let mut prog = Program::default();
        for item in items {
            match item {
                ProgramItem::Rule(r) => prog.rules.push(r),
                ProgramItem::Query(q) => prog.queries.push(q),
            }
        }
        prog
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fact_and_query() {
        let prog = parse_program(r#"parent("alice","bob"). ?- parent(X,Y)."#).unwrap();
        assert_eq!(prog.rules.len(), 1);
        assert_eq!(prog.queries.len(), 1);
    }

    #[test]
    fn parses_transitive_closure_program() {
        let src = r#"
            parent(alice,bob).
            parent(bob,carol).
            parent(carol,dave).
            ancestor(X,Y) :- parent(X,Y).
            ancestor(X,Z) :- parent(X,Y), ancestor(Y,Z).
            ?- ancestor(X,Y).
        "#;
        let prog = parse_program(src).unwrap();
        assert_eq!(prog.rules.len(), 5);
        assert_eq!(prog.queries.len(), 1);
        assert!(prog.rules[0].is_fact());
        assert_eq!(prog.rules[3].head.predicate, "ancestor");
        assert_eq!(prog.rules[3].body.len(), 1);
        assert_eq!(prog.rules[4].body.len(), 2);
    }

    #[test]
    fn parses_negation_and_comparison() {
        let src = r#"
            node(a).
            node(b).
            danger(b).
            safe(X) :- node(X), not danger(X).
            vulnerable(S) :- vulnerability(S,_,_,Sev,_), Sev = "critical".
            ?- safe(X).
        "#;
        let prog = parse_program(src).unwrap();
        let safe_rule = prog.rules.iter().find(|r| r.head.predicate == "safe").unwrap();
        assert!(matches!(safe_rule.body[1], Literal::Negated(_)));

        let vuln_rule = prog.rules.iter().find(|r| r.head.predicate == "vulnerable").unwrap();
        assert!(matches!(vuln_rule.body[1], Literal::Comparison { .. }));
        // the two wildcards in vulnerability(...) must not share a name
        if let Literal::Positive(atom) = &vuln_rule.body[0] {
            let wildcard_names: Vec<&str> = atom
                .args
                .iter()
                .filter_map(|t| match t {
                    Term::Variable(n) if n.starts_with("_w") => Some(n.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(wildcard_names.len(), 2);
            assert_ne!(wildcard_names[0], wildcard_names[1]);
        } else {
            panic!("expected positive literal");
        }
    }

    #[test]
    fn rejects_malformed_program() {
        let err = parse_program("reachable(H,P,A) :- service(H,,P,A).").unwrap_err();
        assert!(matches!(err, DatalogError::Parse { .. }));
    }

    #[test]
    fn parses_string_escape() {
        let prog = parse_program(r#"msg("she said \"hi\"")."#).unwrap();
        if let Term::Constant(Value::Str(s)) = &prog.rules[0].head.args[0] {
            assert_eq!(s, "she said \"hi\"");
        } else {
            panic!("expected string constant");
        }
    }
}
