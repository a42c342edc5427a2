//! Turns a lowered [`PipelinePlan`] into a runnable [`Pipeline`] (spec
//! §4.9 step 4: "compile the plan into a pipeline of operators").
//!
//! This is the one place that knows the full `OperatorPlan` -> `Stage`
//! mapping; everything upstream of it (lexer, parser, lowering) and
//! downstream of it (the registry driving `push`/`flush`) stays ignorant
//! of which concrete stage types exist.

use std::sync::Arc;

use flowql_lang::plan::{OperatorPlan, PipelinePlan};

use crate::filter::Filter;
use crate::scan::Scan;
use crate::select::Select;
use crate::sink::{Collect, InsertInto, Publisher};
use crate::stage::{Pipeline, Stage};
use crate::summarize::Summarize;

/// Builds the operator chain for a pipeline plan's `operators` list. The
/// `publisher` is shared by every `InsertInto` stage in the chain; the
/// `collect_sink`, if the plan ends in `collect()`, is handed to the one
/// `Collect` stage it produces.
pub fn build_pipeline(
    plan: &PipelinePlan,
    publisher: Arc<dyn Publisher>,
    mut collect_sink: Option<Box<dyn Fn(&flowql_core::record::Record) + Send + Sync>>,
) -> Pipeline {
    let mut stages: Vec<Box<dyn Stage>> = Vec::with_capacity(plan.operators.len());
    for op in &plan.operators {
        let stage: Box<dyn Stage> = match op {
            OperatorPlan::Filter(predicate) => Box::new(Filter::new(predicate.clone())),
            OperatorPlan::Select(props) => Box::new(Select::new(props.clone())),
            OperatorPlan::Scan(steps) => Box::new(Scan::new(steps.clone())),
            OperatorPlan::Summarize(spec) => Box::new(Summarize::new(spec.clone())),
            OperatorPlan::InsertInto(target) => Box::new(InsertInto::new(target.clone(), publisher.clone())),
            OperatorPlan::Collect => {
                let callback = collect_sink.take().unwrap_or_else(|| Box::new(|_: &flowql_core::record::Record| {}));
                Box::new(Collect::new(callback))
            }
        };
        stages.push(stage);
    }
    Pipeline::new(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowql_core::record::Record;
    use flowql_lang::expr::{BinaryOp, Expr};
    use serde_json::json;
    use std::sync::Mutex;

    struct NullPublisher;

    #[async_trait]
    impl Publisher for NullPublisher {
        async fn publish(&self, _stream: &str, _record: Record) -> flowql_core::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn builds_filter_then_select_chain() {
        let plan = PipelinePlan {
            source: "events".into(),
            operators: vec![
                OperatorPlan::Filter(Expr::Binary(BinaryOp::Gt, Box::new(Expr::Identifier("age".into())), Box::new(Expr::Number(18.0)))),
                OperatorPlan::Select(vec![flowql_lang::expr::ObjectProp::KeyValue("age".into(), Expr::Identifier("age".into()))]),
            ],
            sinks: vec![],
        };
        let mut pipeline = build_pipeline(&plan, Arc::new(NullPublisher), None);
        let out = pipeline.push(json!({"age": 25, "name": "A"})).await;
        assert_eq!(out, vec![json!({"age": 25})]);
        let out = pipeline.push(json!({"age": 10, "name": "B"})).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn collect_stage_drives_attached_callback() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let plan = PipelinePlan { source: "events".into(), operators: vec![OperatorPlan::Collect], sinks: vec![] };
        let mut pipeline = build_pipeline(
            &plan,
            Arc::new(NullPublisher),
            Some(Box::new(move |record: &Record| seen_clone.lock().unwrap().push(record.clone()))),
        );
        pipeline.push(json!({"n": 1})).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"n": 1})]);
    }

    struct AllStreams;
    impl flowql_lang::plan::StreamNameLookup for AllStreams {
        fn has_stream(&self, _name: &str) -> bool {
            true
        }
    }

    /// Scenario S5 (spec §8), parsed from DSL text rather than hand-built
    /// AST: this is the regression test for step-name references
    /// (`cumSum.cumulative_x`) appearing in a condition/assignment-RHS/emit
    /// position, not just as an assignment's left-hand side.
    #[tokio::test]
    async fn scan_cumulative_sum_from_source_text() {
        let src = "input | scan( step cumSum: true => cumSum.cumulative_x = iff(cumSum.cumulative_x, cumSum.cumulative_x + x, x), emit({input: x, cumulative: cumSum.cumulative_x}); )";
        let program = flowql_lang::parse_program(src).unwrap();
        let items = flowql_lang::lower_program(&program, &AllStreams).unwrap();
        let plan = match &items[0] {
            flowql_lang::plan::PlanItem::Pipeline(p) => p.clone(),
            _ => panic!("expected pipeline"),
        };
        let mut pipeline = build_pipeline(&plan, Arc::new(NullPublisher), None);
        let mut out = Vec::new();
        for x in [json!({"x": 1}), json!({"x": 2}), json!({"x": 3})] {
            out.extend(pipeline.push(x).await);
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
}
