//! `scan(...)` (spec §4.5, testable property 7).
//!
//! Each step's condition and body run in textual order against a shared
//! per-row scratch item plus a persistent-across-rows `state` object. An
//! assignment to `state.stepName.var` mutates the persistent bag; a
//! row-local assignment (`var = expr`) mutates the scratch item so that a
//! later step's `state.stepName.var = expr` or `emit(...)` in the *same*
//! row sees it, without leaking it to the next row (spec §9 Open Question:
//! "an assignment written before an `emit` call in the same step is
//! visible to it, one written after is not").

use async_trait::async_trait;
use flowql_core::record::Record;
use flowql_lang::cst::{LValue, ScanStep, ScanStmt};
use flowql_lang::expr::{eval, Env};
use serde_json::{Map, Value};

use crate::stage::Stage;

pub struct Scan {
    steps: Vec<ScanStep>,
    state: Value,
}

impl Scan {
    pub fn new(steps: Vec<ScanStep>) -> Self {
        Self { steps, state: Value::Object(Map::new()) }
    }
}

#[async_trait]
impl Stage for Scan {
    async fn process(&mut self, record: Record) -> Vec<Record> {
        let mut item = record;
        let mut emitted = Vec::new();
        for step in &self.steps {
            let condition_true = {
                let env = Env::with_state(&item, &self.state);
                eval(&step.condition, &env).map(|v| flowql_core::record::truthy(&v)).unwrap_or(false)
            };
            if !condition_true {
                continue;
            }
            for stmt in &step.body {
                match stmt {
                    ScanStmt::Assign { lvalue, value } => {
                        let computed = {
                            let env = Env::with_state(&item, &self.state);
                            eval(value, &env).unwrap_or(Value::Null)
                        };
                        match lvalue {
                            LValue::StateField { step: step_name, var } => {
                                set_nested(&mut self.state, step_name, var, computed);
                            }
                            LValue::Local(name) => {
                                set_field(&mut item, name, computed);
                            }
                        }
                    }
                    ScanStmt::Emit(expr) => {
                        let env = Env::with_state(&item, &self.state);
                        if let Some(value) = eval(expr, &env) {
                            emitted.push(value);
                        }
                    }
                }
            }
        }
        emitted
    }
}

fn set_field(target: &mut Value, key: &str, value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        map.insert(key.to_string(), value);
    }
}

fn set_nested(state: &mut Value, step: &str, var: &str, value: Value) {
    if !state.is_object() {
        *state = Value::Object(Map::new());
    }
    let Value::Object(top) = state else { unreachable!() };
    let step_entry = top.entry(step.to_string()).or_insert_with(|| Value::Object(Map::new()));
    if !step_entry.is_object() {
        *step_entry = Value::Object(Map::new());
    }
    if let Value::Object(step_map) = step_entry {
        step_map.insert(var.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowql_lang::expr::{BinaryOp, Expr};
    use serde_json::json;

    fn cumulative_sum_step() -> ScanStep {
        // cumSum.cumulative_x = iff(cumSum.cumulative_x, cumSum.cumulative_x + x, x);
        // emit({input: x, cumulative: cumSum.cumulative_x});
        let cumulative_field = Expr::Member(
            Box::new(Expr::Identifier("state".into())),
            vec![
                flowql_lang::expr::PathSegment::Key("cumSum".into()),
                flowql_lang::expr::PathSegment::Key("cumulative_x".into()),
            ],
        );
        let assign_value = Expr::Ternary(
            Box::new(cumulative_field.clone()),
            Box::new(Expr::Binary(BinaryOp::Add, Box::new(cumulative_field.clone()), Box::new(Expr::Identifier("x".into())))),
            Box::new(Expr::Identifier("x".into())),
        );
        let emit_expr = Expr::Object(vec![
            flowql_lang::expr::ObjectProp::KeyValue("input".into(), Expr::Identifier("x".into())),
            flowql_lang::expr::ObjectProp::KeyValue("cumulative".into(), cumulative_field),
        ]);
        ScanStep {
            name: "cumSum".into(),
            condition: Expr::Bool(true),
            body: vec![
                ScanStmt::Assign {
                    lvalue: LValue::StateField { step: "cumSum".into(), var: "cumulative_x".into() },
                    value: assign_value,
                },
                ScanStmt::Emit(emit_expr),
            ],
        }
    }

    #[tokio::test]
    async fn cumulative_sum_matches_scenario_s5() {
        let mut scan = Scan::new(vec![cumulative_sum_step()]);
        let mut out = Vec::new();
        for x in [json!({"x": 1}), json!({"x": 2}), json!({"x": 3})] {
            out.extend(scan.process(x).await);
        }
        assert_eq!(
            out,
            vec![
                json!({"input": 1, "cumulative": 1}),
                json!({"input": 2, "cumulative": 3}),
                json!({"input": 3, "cumulative": 6}),
            ]
        );
    }

    #[tokio::test]
    async fn row_that_triggers_no_step_emits_nothing() {
        let mut scan = Scan::new(vec![ScanStep {
            name: "s".into(),
            condition: Expr::Bool(false),
            body: vec![ScanStmt::Emit(Expr::Bool(true))],
        }]);
        assert!(scan.process(json!({})).await.is_empty());
    }

    #[tokio::test]
    async fn multiple_steps_emit_in_step_order() {
        let steps = vec![
            ScanStep { name: "a".into(), condition: Expr::Bool(true), body: vec![ScanStmt::Emit(Expr::Number(1.0))] },
            ScanStep { name: "b".into(), condition: Expr::Bool(true), body: vec![ScanStmt::Emit(Expr::Number(2.0))] },
        ];
        let mut scan = Scan::new(steps);
        let out = scan.process(json!({})).await;
        assert_eq!(out, vec![json!(1.0), json!(2.0)]);
    }
}
