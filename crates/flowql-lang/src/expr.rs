//! Expression AST and evaluator (spec §4.4).
//!
//! Expressions are a closed enum walked by [`eval`] — "compiled" in the
//! sense that no source text survives past parsing, not in the sense of
//! Rust closures (see SPEC_FULL.md §4.3 for why a flat enum match was
//! chosen over `Box<dyn Fn>` trees).

use flowql_core::record::{self, Record};
use serde_json::{Map, Value};

/// One segment of a safe-lookup path. Built once at parse time; never a
/// dotted string re-split at eval time (spec §9 Design Notes).
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOp {
    Neg,
    Plus,
}

/// A property in an object/`select` constructor (spec §4.2, §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectProp {
    /// `key: expr` (includes shorthand `name`, desugared by the parser to
    /// `name: safe_lookup(item, "name")`).
    KeyValue(String, Expr),
    /// `...*` — copy all fields of the current item.
    SpreadAll,
    /// `...expr` — copy all fields of `expr`.
    SpreadExpr(Expr),
    /// `-name` — delete field `name` after all includes.
    Exclude(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Bare identifier in item position: `safe_lookup(item, "name")`.
    Identifier(String),
    /// Member access / index chain rooted at a base expression.
    Member(Box<Expr>, Vec<PathSegment>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    /// `emit(expr)` — legal only inside scan step bodies; enforced at
    /// lowering time, not here.
    Emit(Box<Expr>),
    Object(Vec<ObjectProp>),
    Array(Vec<Expr>),
}

/// Evaluation environment: the current item plus optional scan state.
pub struct Env<'a> {
    pub item: &'a Record,
    pub state: Option<&'a Record>,
}

impl<'a> Env<'a> {
    pub fn new(item: &'a Record) -> Self {
        Self { item, state: None }
    }

    pub fn with_state(item: &'a Record, state: &'a Record) -> Self {
        Self { item, state: Some(state) }
    }
}

/// Evaluates `expr` against `env`. Never panics (spec §8 invariant 4):
/// failures inside an expression produce the absent value (`None`),
/// exactly as safe-lookup does.
///
/// `emit(...)` expressions evaluate their inner expression and return it;
/// whether that contributes an actual emission is decided by the scan
/// operator, which intercepts `Expr::Emit` at the statement level rather
/// than calling `eval` on it directly (see `flowql_runtime::scan`).
pub fn eval(expr: &Expr, env: &Env) -> Option<Record> {
    match expr {
        Expr::Null => Some(Value::Null),
        Expr::Bool(b) => Some(Value::Bool(*b)),
        Expr::Number(n) => Some(json_number(*n)),
        Expr::String(s) => Some(Value::String(s.clone())),
        Expr::Identifier(name) => {
            if name == "item" {
                return Some(env.item.clone());
            }
            if name == "state" {
                return env.state.cloned();
            }
            record::get_field(env.item, name).cloned()
        }
        Expr::Member(base, segs) => {
            let mut cur = eval(base, env)?;
            for seg in segs {
                cur = match seg {
                    PathSegment::Key(k) => record::get_field(&cur, k)?.clone(),
                    PathSegment::Index(idx_expr) => {
                        let idx = eval(idx_expr, env)?;
                        let i = idx.as_i64().or_else(|| idx.as_f64().map(|f| f as i64))?;
                        record::get_index(&cur, i)?.clone()
                    }
                };
            }
            Some(cur)
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, env)?;
            let n = to_number(&v)?;
            match op {
                UnaryOp::Neg => Some(json_number(-n)),
                UnaryOp::Plus => Some(json_number(n)),
            }
        }
        Expr::Binary(BinaryOp::And, l, r) => {
            let lv = eval(l, env).unwrap_or(Value::Null);
            if !record::truthy(&lv) {
                Some(lv)
            } else {
                Some(eval(r, env).unwrap_or(Value::Null))
            }
        }
        Expr::Binary(BinaryOp::Or, l, r) => {
            let lv = eval(l, env).unwrap_or(Value::Null);
            if record::truthy(&lv) {
                Some(lv)
            } else {
                Some(eval(r, env).unwrap_or(Value::Null))
            }
        }
        Expr::Binary(op, l, r) => {
            let lv = eval(l, env).unwrap_or(Value::Null);
            let rv = eval(r, env).unwrap_or(Value::Null);
            eval_binary(op, &lv, &rv)
        }
        Expr::Ternary(c, a, b) => {
            let cv = eval(c, env).unwrap_or(Value::Null);
            if record::truthy(&cv) {
                eval(a, env)
            } else {
                eval(b, env)
            }
        }
        Expr::Call(name, args) => {
            let vals: Vec<Record> = args.iter().map(|a| eval(a, env).unwrap_or(Value::Null)).collect();
            call_function(name, &vals)
        }
        Expr::Emit(inner) => eval(inner, env),
        Expr::Object(props) => Some(eval_object(props, env)),
        Expr::Array(items) => {
            let vals: Vec<Record> = items.iter().map(|e| eval(e, env).unwrap_or(Value::Null)).collect();
            Some(Value::Array(vals))
        }
    }
}

fn eval_object(props: &[ObjectProp], env: &Env) -> Record {
    let mut map = Map::new();
    for prop in props {
        match prop {
            ObjectProp::SpreadAll => {
                if let Some(obj) = env.item.as_object() {
                    for (k, v) in obj {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
            ObjectProp::SpreadExpr(expr) => {
                if let Some(v) = eval(expr, env) {
                    if let Some(obj) = v.as_object() {
                        for (k, v) in obj {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            ObjectProp::KeyValue(key, expr) => {
                let v = eval(expr, env).unwrap_or_else(record::absent_marker);
                map.insert(key.clone(), v);
            }
            ObjectProp::Exclude(_) => {
                // exclusions are applied in a second pass below, to honor
                // "later writes overwrite earlier" textual-order semantics
                // while still letting an exclusion precede a later include.
            }
        }
    }
    for prop in props {
        if let ObjectProp::Exclude(name) = prop {
            map.remove(name);
        }
    }
    Value::Object(map)
}

fn eval_binary(op: &BinaryOp, l: &Record, r: &Record) -> Option<Record> {
    match op {
        BinaryOp::Add => Some(add(l, r)),
        BinaryOp::Sub => Some(json_number(to_number(l)? - to_number(r)?)),
        BinaryOp::Mul => Some(json_number(to_number(l)? * to_number(r)?)),
        BinaryOp::Div => Some(json_number(to_number(l)? / to_number(r)?)),
        BinaryOp::Eq => Some(Value::Bool(record::deep_eq(l, r))),
        BinaryOp::NotEq => Some(Value::Bool(!record::deep_eq(l, r))),
        BinaryOp::Lt => compare(l, r).map(|o| Value::Bool(o == std::cmp::Ordering::Less)),
        BinaryOp::Gt => compare(l, r).map(|o| Value::Bool(o == std::cmp::Ordering::Greater)),
        BinaryOp::LtEq => compare(l, r).map(|o| Value::Bool(o != std::cmp::Ordering::Greater)),
        BinaryOp::GtEq => compare(l, r).map(|o| Value::Bool(o != std::cmp::Ordering::Less)),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit ops handled in eval()"),
    }
}

/// `+` on numbers is arithmetic; on strings it concatenates; mixing
/// coerces to string concatenation rather than throwing (spec §4.4: "must
/// not throw — the contract is NaN or coerced numeric").
fn add(l: &Record, r: &Record) -> Record {
    match (l, r) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Value::String(format!("{}{}", display(l), display(r)))
        }
        _ => match (to_number(l), to_number(r)) {
            (Some(a), Some(b)) => json_number(a + b),
            _ => json_number(f64::NAN),
        },
    }
}

fn display(v: &Record) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn to_number(v: &Record) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
}

fn compare(l: &Record, r: &Record) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
            let a = to_number(l)?;
            let b = to_number(r)?;
            a.partial_cmp(&b)
        }
    }
}

fn json_number(n: f64) -> Record {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Minimum scalar function registry (spec §4.4): `exp`, plus a handful of
/// small pure total functions the spec explicitly permits adding.
fn call_function(name: &str, args: &[Record]) -> Option<Record> {
    match name {
        "exp" => fn_exp(args),
        "abs" => fn_abs(args),
        "floor" => fn_floor(args),
        "ceil" => fn_ceil(args),
        "round" => fn_round(args),
        "len" => fn_len(args),
        _ => None,
    }
}

/// Returns whether `name` resolves in the function registry; used by plan
/// lowering to fail unknown functions at lowering time (spec §4.4: "Unknown
/// functions fail plan lowering").
pub fn is_known_function(name: &str) -> bool {
    matches!(name, "exp" | "abs" | "floor" | "ceil" | "round" | "len")
}

fn fn_exp(args: &[Record]) -> Option<Record> {
    Some(json_number(to_number(args.first()?)?.exp()))
}
fn fn_abs(args: &[Record]) -> Option<Record> {
    Some(json_number(to_number(args.first()?)?.abs()))
}
fn fn_floor(args: &[Record]) -> Option<Record> {
    Some(json_number(to_number(args.first()?)?.floor()))
}
fn fn_ceil(args: &[Record]) -> Option<Record> {
    Some(json_number(to_number(args.first()?)?.ceil()))
}
fn fn_round(args: &[Record]) -> Option<Record> {
    Some(json_number(to_number(args.first()?)?.round()))
}
fn fn_len(args: &[Record]) -> Option<Record> {
    match args.first()? {
        Value::String(s) => Some(json_number(s.chars().count() as f64)),
        Value::Array(a) => Some(json_number(a.len() as f64)),
        Value::Object(m) => Some(json_number(m.len() as f64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_safe_lookup_missing_is_absent() {
        let item = json!({"a": 1});
        let env = Env::new(&item);
        assert_eq!(eval(&Expr::Identifier("a".into()), &env), Some(json!(1)));
        assert_eq!(eval(&Expr::Identifier("missing".into()), &env), None);
    }

    #[test]
    fn member_access_on_null_is_absent_not_panic() {
        let item = json!({"a": null});
        let env = Env::new(&item);
        let expr = Expr::Member(
            Box::new(Expr::Identifier("a".into())),
            vec![PathSegment::Key("b".into())],
        );
        assert_eq!(eval(&expr, &env), None);
    }

    #[test]
    fn logical_or_returns_selecting_operand() {
        let item = json!({"age": null});
        let env = Env::new(&item);
        let expr = Expr::Binary(
            BinaryOp::Or,
            Box::new(Expr::Identifier("age".into())),
            Box::new(Expr::Number(0.0)),
        );
        assert_eq!(eval(&expr, &env), Some(json!(0.0)));

        let item2 = json!({"age": 25});
        let env2 = Env::new(&item2);
        assert_eq!(eval(&expr, &env2), Some(json!(25.0)));
    }

    #[test]
    fn string_concatenation() {
        let item = json!({"name": "A", "surname": "B"});
        let env = Env::new(&item);
        let expr = Expr::Binary(
            BinaryOp::Add,
            Box::new(Expr::Member(
                Box::new(Expr::Identifier("name".into())),
                vec![],
            )),
            Box::new(Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::String(" ".into())),
                Box::new(Expr::Identifier("surname".into())),
            )),
        );
        assert_eq!(eval(&expr, &env), Some(json!("A B")));
    }

    #[test]
    fn ternary_short_circuits() {
        let item = json!({});
        let env = Env::new(&item);
        let expr = Expr::Ternary(
            Box::new(Expr::Bool(true)),
            Box::new(Expr::Number(1.0)),
            Box::new(Expr::Number(2.0)),
        );
        assert_eq!(eval(&expr, &env), Some(json!(1.0)));
    }

    #[test]
    fn object_spread_then_override_then_exclude() {
        let item = json!({"name": "A", "surname": "B", "password": "p", "age": 1});
        let env = Env::new(&item);
        let expr = Expr::Object(vec![
            ObjectProp::SpreadAll,
            ObjectProp::KeyValue(
                "full_name".into(),
                Expr::Binary(
                    BinaryOp::Add,
                    Box::new(Expr::Identifier("name".into())),
                    Box::new(Expr::Binary(
                        BinaryOp::Add,
                        Box::new(Expr::String(" ".into())),
                        Box::new(Expr::Identifier("surname".into())),
                    )),
                ),
            ),
            ObjectProp::Exclude("password".into()),
        ]);
        let result = eval(&expr, &env).unwrap();
        assert_eq!(
            result,
            json!({"name": "A", "surname": "B", "age": 1, "full_name": "A B"})
        );
    }

    #[test]
    fn deep_equality_and_ordering() {
        assert_eq!(
            eval(
                &Expr::Binary(BinaryOp::Eq, Box::new(Expr::Number(1.0)), Box::new(Expr::Number(1.0))),
                &Env::new(&Value::Null)
            ),
            Some(json!(true))
        );
        assert_eq!(
            eval(
                &Expr::Binary(
                    BinaryOp::Lt,
                    Box::new(Expr::String("a".into())),
                    Box::new(Expr::String("b".into()))
                ),
                &Env::new(&Value::Null)
            ),
            Some(json!(true))
        );
    }

    #[test]
    fn unknown_function_name_rejected_at_lowering_boundary() {
        assert!(!is_known_function("frobnicate"));
        assert!(is_known_function("exp"));
    }
}
