//! CST → plan lowering (spec §4.3).
//!
//! A visitor that walks the parser's CST and produces the tagged [`plan`]
//! types: `select`/`project` unify into one `Select` node, window-function
//! and aggregator-function calls are resolved against their fixed argument
//! shapes, and every stream name referenced by a pipeline (source plus
//! every `insert_into` target) is checked against a [`StreamNameLookup`] so
//! that "undeclared stream" is a lowering-time error, not a runtime
//! surprise three operators downstream.

use flowql_core::error::EngineError;
use serde_json::Value;

use crate::cst::{self, Command, CreatePolicy, EmitClause, Operation, Pipeline, Program, Statement, WindowCall};
use crate::expr::{self, Env, Expr, ObjectProp};
use crate::plan::{AggregatorSpec, CommandPlan, EmitPolicySpec, PipelinePlan, PlanItem, StreamNameLookup, SummarizeSpec, WindowSpec};

/// Lowers every statement in `program`. Like parsing, lowering aggregates
/// as many errors as it can rather than stopping at the first one (spec
/// §4.2's "multiple errors may be reported" contract extended to lowering).
pub fn lower_program(program: &Program, lookup: &dyn StreamNameLookup) -> Result<Vec<PlanItem>, Vec<EngineError>> {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    for stmt in &program.statements {
        match lower_statement(stmt, lookup) {
            Ok(item) => items.push(item),
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(items)
    } else {
        Err(errors)
    }
}

pub fn lower_statement(stmt: &Statement, lookup: &dyn StreamNameLookup) -> Result<PlanItem, EngineError> {
    match stmt {
        Statement::Command(cmd) => lower_command(cmd, lookup).map(PlanItem::Command),
        Statement::Pipeline(p) => lower_pipeline(p, lookup).map(PlanItem::Pipeline),
    }
}

fn lower_command(cmd: &Command, lookup: &dyn StreamNameLookup) -> Result<CommandPlan, EngineError> {
    match cmd {
        Command::CreateStream { name, policy } => Ok(CommandPlan::CreateStream {
            name: name.clone(),
            policy: *policy,
        }),
        Command::CreateFlow { name, policy, ttl, pipeline } => Ok(CommandPlan::CreateFlow {
            name: name.clone(),
            policy: *policy,
            ttl: *ttl,
            pipeline: lower_pipeline(pipeline, lookup)?,
        }),
        Command::DeleteStream { name } => Ok(CommandPlan::DeleteStream { name: name.clone() }),
        Command::DeleteFlow { name } => Ok(CommandPlan::DeleteFlow { name: name.clone() }),
        Command::Insert { stream, value } => {
            validate_expr(value)?;
            let record = expr::eval(value, &Env::new(&Value::Null)).ok_or_else(|| {
                EngineError::Plan(format!("insert value for '{stream}' did not evaluate to a literal"))
            })?;
            Ok(CommandPlan::Insert { stream: stream.clone(), value: record })
        }
        Command::Flush { stream } => Ok(CommandPlan::Flush { stream: stream.clone() }),
        Command::ListStreams => Ok(CommandPlan::ListStreams),
        Command::ListFlows => Ok(CommandPlan::ListFlows),
        Command::Info { name } => Ok(CommandPlan::Info { name: name.clone() }),
    }
}

fn lower_pipeline(pipeline: &Pipeline, lookup: &dyn StreamNameLookup) -> Result<PipelinePlan, EngineError> {
    if !lookup.has_stream(&pipeline.source) {
        return Err(EngineError::StreamNotFound(pipeline.source.clone()));
    }
    let mut operators = Vec::with_capacity(pipeline.operations.len());
    let mut sinks = Vec::new();
    for op in &pipeline.operations {
        let lowered = lower_operation(op)?;
        if let crate::plan::OperatorPlan::InsertInto(target) = &lowered {
            if !lookup.has_stream(target) {
                return Err(EngineError::StreamNotFound(target.clone()));
            }
            sinks.push(target.clone());
        }
        operators.push(lowered);
    }
    Ok(PipelinePlan {
        source: pipeline.source.clone(),
        operators,
        sinks,
    })
}

fn lower_operation(op: &Operation) -> Result<crate::plan::OperatorPlan, EngineError> {
    use crate::plan::OperatorPlan;
    match op {
        Operation::Where(expr) => {
            validate_expr(expr)?;
            Ok(OperatorPlan::Filter(expr.clone()))
        }
        Operation::Select(props) => {
            for p in props {
                validate_object_prop(p)?;
            }
            Ok(OperatorPlan::Select(props.clone()))
        }
        Operation::Scan(steps) => {
            for step in steps {
                validate_expr(&step.condition)?;
                for stmt in &step.body {
                    match stmt {
                        cst::ScanStmt::Assign { value, .. } => validate_expr(value)?,
                        cst::ScanStmt::Emit(e) => validate_expr(e)?,
                    }
                }
            }
            Ok(OperatorPlan::Scan(rewrite_scan_steps(steps)))
        }
        Operation::Summarize { aggregates, by, window, emit } => {
            Ok(OperatorPlan::Summarize(lower_summarize(aggregates, by, window, emit)?))
        }
        Operation::InsertInto(name) => Ok(OperatorPlan::InsertInto(name.clone())),
        Operation::Collect => Ok(OperatorPlan::Collect),
    }
}

fn lower_summarize(
    aggregates: &[ObjectProp],
    by: &Option<Vec<Expr>>,
    window: &Option<WindowCall>,
    emit: &Option<EmitClause>,
) -> Result<SummarizeSpec, EngineError> {
    let mut fields = Vec::with_capacity(aggregates.len());
    for prop in aggregates {
        let ObjectProp::KeyValue(key, value) = prop else {
            return Err(EngineError::Plan(
                "summarize fields must be 'name: aggregator(...)' pairs".to_string(),
            ));
        };
        fields.push((key.clone(), lower_aggregator(value)?));
    }
    if let Some(by_exprs) = by {
        for e in by_exprs {
            validate_expr(e)?;
        }
    }
    let window_spec = window.as_ref().map(lower_window).transpose()?;
    let emit_spec = emit.as_ref().map(lower_emit).transpose()?;
    Ok(SummarizeSpec {
        fields,
        group_key: by.clone(),
        window: window_spec,
        emit: emit_spec,
    })
}

fn lower_aggregator(expr: &Expr) -> Result<AggregatorSpec, EngineError> {
    let Expr::Call(name, args) = expr else {
        return Err(EngineError::Plan("aggregate value must be an aggregator call, e.g. sum(amount)".to_string()));
    };
    match name.as_str() {
        "count" => {
            if !args.is_empty() {
                return Err(EngineError::Plan("count() takes no arguments".to_string()));
            }
            Ok(AggregatorSpec::Count)
        }
        "sum" => one_arg(args, "sum").map(AggregatorSpec::Sum),
        "min" => one_arg(args, "min").map(AggregatorSpec::Min),
        "max" => one_arg(args, "max").map(AggregatorSpec::Max),
        "avg" => one_arg(args, "avg").map(AggregatorSpec::Avg),
        other => Err(EngineError::Plan(format!("unknown aggregator '{other}'"))),
    }
}

fn one_arg(args: &[Expr], fn_name: &str) -> Result<Expr, EngineError> {
    if args.len() != 1 {
        return Err(EngineError::Plan(format!("{fn_name}() takes exactly one argument")));
    }
    validate_expr(&args[0])?;
    Ok(args[0].clone())
}

fn lower_window(call: &WindowCall) -> Result<(String, WindowSpec), EngineError> {
    let spec = match call.function.as_str() {
        "tumbling_window" => WindowSpec::Tumbling { size: literal_u64(expect_args(&call.args, 1, "tumbling_window")?[0])? },
        "tumbling_window_by" => {
            let a = expect_args(&call.args, 2, "tumbling_window_by")?;
            WindowSpec::TumblingBy { size: literal_f64(a[0])?, value_fn: validated(a[1])?.clone() }
        }
        "hopping_window" => {
            let a = expect_args(&call.args, 2, "hopping_window")?;
            WindowSpec::Hopping { size: literal_u64(a[0])?, hop: literal_u64(a[1])? }
        }
        "hopping_window_by" => {
            let a = expect_args(&call.args, 3, "hopping_window_by")?;
            WindowSpec::HoppingBy { size: literal_f64(a[0])?, hop: literal_f64(a[1])?, value_fn: validated(a[2])?.clone() }
        }
        "sliding_window" => WindowSpec::Sliding { size: literal_u64(expect_args(&call.args, 1, "sliding_window")?[0])? },
        "sliding_window_by" => {
            let a = expect_args(&call.args, 2, "sliding_window_by")?;
            WindowSpec::SlidingBy { size: literal_f64(a[0])?, value_fn: validated(a[1])?.clone() }
        }
        "count_window" => WindowSpec::CountWindow { n: literal_u64(expect_args(&call.args, 1, "count_window")?[0])? },
        "session_window" => {
            let a = expect_args(&call.args, 2, "session_window")?;
            WindowSpec::SessionWindow { timeout: literal_f64(a[0])?, value_fn: validated(a[1])?.clone() }
        }
        other => return Err(EngineError::Plan(format!("unknown window function '{other}'"))),
    };
    Ok((call.var_name.clone(), spec))
}

fn lower_emit(clause: &EmitClause) -> Result<EmitPolicySpec, EngineError> {
    match clause {
        EmitClause::Every { amount, using } => {
            let amount = literal_f64(amount)?;
            let using = using.as_ref().map(validated).transpose()?.cloned();
            Ok(EmitPolicySpec::Every { amount, using })
        }
        EmitClause::When(cond) => {
            validate_expr(cond)?;
            Ok(EmitPolicySpec::When(cond.clone()))
        }
        EmitClause::OnChange(e) => {
            validate_expr(e)?;
            Ok(EmitPolicySpec::OnChange(e.clone()))
        }
        EmitClause::OnGroupChange => Ok(EmitPolicySpec::OnGroupChange),
        EmitClause::OnUpdate => Ok(EmitPolicySpec::OnUpdate),
    }
}

fn expect_args<'a>(args: &'a [Expr], n: usize, fn_name: &str) -> Result<Vec<&'a Expr>, EngineError> {
    if args.len() != n {
        return Err(EngineError::Plan(format!(
            "{fn_name}() takes {n} argument(s), got {}",
            args.len()
        )));
    }
    Ok(args.iter().collect())
}

fn validated(expr: &Expr) -> Result<&Expr, EngineError> {
    validate_expr(expr)?;
    Ok(expr)
}

/// A literal (possibly negated) number, used for window/emit size and hop
/// parameters, which must be known at lowering time rather than
/// per-record (spec §4.6 window params are constants; `value_fn` is the
/// only per-record piece).
fn literal_f64(expr: &Expr) -> Result<f64, EngineError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Unary(crate::expr::UnaryOp::Neg, inner) => literal_f64(inner).map(|n| -n),
        _ => Err(EngineError::Plan("expected a numeric literal".to_string())),
    }
}

fn literal_u64(expr: &Expr) -> Result<u64, EngineError> {
    let n = literal_f64(expr)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(EngineError::Plan(format!("expected a non-negative integer literal, got {n}")));
    }
    Ok(n as u64)
}

/// Rejects unknown scalar functions and `emit(...)` used outside a scan
/// step body (spec §4.4: "Unknown functions fail plan lowering"; "`emit`
/// is only legal inside a scan step body").
fn validate_expr(expr: &Expr) -> Result<(), EngineError> {
    match expr {
        Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) | Expr::Identifier(_) => Ok(()),
        Expr::Member(base, segs) => {
            validate_expr(base)?;
            for seg in segs {
                if let crate::expr::PathSegment::Index(idx) = seg {
                    validate_expr(idx)?;
                }
            }
            Ok(())
        }
        Expr::Unary(_, inner) => validate_expr(inner),
        Expr::Binary(_, l, r) => {
            validate_expr(l)?;
            validate_expr(r)
        }
        Expr::Ternary(c, a, b) => {
            validate_expr(c)?;
            validate_expr(a)?;
            validate_expr(b)
        }
        Expr::Call(name, args) => {
            if !expr::is_known_function(name) {
                return Err(EngineError::Plan(format!("unknown function '{name}'")));
            }
            for a in args {
                validate_expr(a)?;
            }
            Ok(())
        }
        Expr::Emit(_) => Err(EngineError::Plan("'emit(...)' is only legal inside a scan step body".to_string())),
        Expr::Object(props) => {
            for p in props {
                validate_object_prop(p)?;
            }
            Ok(())
        }
        Expr::Array(items) => {
            for i in items {
                validate_expr(i)?;
            }
            Ok(())
        }
    }
}

/// Rewrites a scan's step conditions/bodies so a bare reference to a step
/// name (`cumSum.cumulative_x`, or even bare `cumSum`) resolves through the
/// scan's persistent `state` bag rather than through item-field safe-lookup
/// (spec §4.3's `cumSum.cumulative_x` sugar for `state.cumSum.cumulative_x`,
/// extended to every step name so one step's body can also read another
/// step's state). The parser only applies this sugar to assignment
/// left-hand sides (`lvalue`, see `Parser::lvalue`); every other occurrence
/// of a step name inside a condition, assignment RHS, or `emit(...)` needs
/// the same treatment, which is easier to do once here than to thread
/// "current step name" through every expression-parsing entry point.
fn rewrite_scan_steps(steps: &[cst::ScanStep]) -> Vec<cst::ScanStep> {
    let step_names: std::collections::HashSet<String> = steps.iter().map(|s| s.name.clone()).collect();
    steps
        .iter()
        .map(|step| cst::ScanStep {
            name: step.name.clone(),
            condition: rewrite_scan_expr(&step.condition, &step_names),
            body: step
                .body
                .iter()
                .map(|stmt| match stmt {
                    cst::ScanStmt::Assign { lvalue, value } => {
                        cst::ScanStmt::Assign { lvalue: lvalue.clone(), value: rewrite_scan_expr(value, &step_names) }
                    }
                    cst::ScanStmt::Emit(e) => cst::ScanStmt::Emit(rewrite_scan_expr(e, &step_names)),
                })
                .collect(),
        })
        .collect()
}

fn rewrite_scan_expr(expr: &Expr, step_names: &std::collections::HashSet<String>) -> Expr {
    match expr {
        Expr::Identifier(name) if step_names.contains(name) => {
            Expr::Member(Box::new(Expr::Identifier("state".to_string())), vec![crate::expr::PathSegment::Key(name.clone())])
        }
        Expr::Member(base, segs) => {
            let rewritten_segs: Vec<crate::expr::PathSegment> = segs.iter().map(|s| rewrite_path_segment(s, step_names)).collect();
            if let Expr::Identifier(name) = base.as_ref() {
                if step_names.contains(name) {
                    let mut new_segs = vec![crate::expr::PathSegment::Key(name.clone())];
                    new_segs.extend(rewritten_segs);
                    return Expr::Member(Box::new(Expr::Identifier("state".to_string())), new_segs);
                }
            }
            Expr::Member(Box::new(rewrite_scan_expr(base, step_names)), rewritten_segs)
        }
        Expr::Unary(op, inner) => Expr::Unary(op.clone(), Box::new(rewrite_scan_expr(inner, step_names))),
        Expr::Binary(op, l, r) => {
            Expr::Binary(op.clone(), Box::new(rewrite_scan_expr(l, step_names)), Box::new(rewrite_scan_expr(r, step_names)))
        }
        Expr::Ternary(c, a, b) => Expr::Ternary(
            Box::new(rewrite_scan_expr(c, step_names)),
            Box::new(rewrite_scan_expr(a, step_names)),
            Box::new(rewrite_scan_expr(b, step_names)),
        ),
        Expr::Call(name, args) => Expr::Call(name.clone(), args.iter().map(|a| rewrite_scan_expr(a, step_names)).collect()),
        Expr::Emit(inner) => Expr::Emit(Box::new(rewrite_scan_expr(inner, step_names))),
        Expr::Object(props) => Expr::Object(props.iter().map(|p| rewrite_object_prop(p, step_names)).collect()),
        Expr::Array(items) => Expr::Array(items.iter().map(|e| rewrite_scan_expr(e, step_names)).collect()),
        Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) | Expr::Identifier(_) => expr.clone(),
    }
}

fn rewrite_path_segment(seg: &crate::expr::PathSegment, step_names: &std::collections::HashSet<String>) -> crate::expr::PathSegment {
    match seg {
        crate::expr::PathSegment::Key(k) => crate::expr::PathSegment::Key(k.clone()),
        crate::expr::PathSegment::Index(e) => crate::expr::PathSegment::Index(Box::new(rewrite_scan_expr(e, step_names))),
    }
}

fn rewrite_object_prop(prop: &ObjectProp, step_names: &std::collections::HashSet<String>) -> ObjectProp {
    match prop {
        ObjectProp::KeyValue(k, e) => ObjectProp::KeyValue(k.clone(), rewrite_scan_expr(e, step_names)),
        ObjectProp::SpreadAll => ObjectProp::SpreadAll,
        ObjectProp::SpreadExpr(e) => ObjectProp::SpreadExpr(rewrite_scan_expr(e, step_names)),
        ObjectProp::Exclude(name) => ObjectProp::Exclude(name.clone()),
    }
}

fn validate_object_prop(prop: &ObjectProp) -> Result<(), EngineError> {
    match prop {
        ObjectProp::KeyValue(_, e) => validate_expr(e),
        ObjectProp::SpreadAll => Ok(()),
        ObjectProp::SpreadExpr(e) => validate_expr(e),
        ObjectProp::Exclude(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    struct AllStreams;
    impl StreamNameLookup for AllStreams {
        fn has_stream(&self, _name: &str) -> bool {
            true
        }
    }

    struct NoStreams;
    impl StreamNameLookup for NoStreams {
        fn has_stream(&self, _name: &str) -> bool {
            false
        }
    }

    #[test]
    fn undeclared_source_stream_is_plan_error() {
        let prog = parse_program("input | where true").unwrap();
        let err = lower_program(&prog, &NoStreams).unwrap_err();
        assert!(matches!(err[0], EngineError::StreamNotFound(_)));
    }

    #[test]
    fn unknown_function_rejected() {
        let prog = parse_program("input | where frobnicate(age)").unwrap();
        let err = lower_program(&prog, &AllStreams).unwrap_err();
        assert!(matches!(err[0], EngineError::Plan(_)));
    }

    #[test]
    fn select_project_alias_lowers_identically() {
        let a = parse_program("input | select { name }").unwrap();
        let b = parse_program("input | project { name }").unwrap();
        let pa = lower_program(&a, &AllStreams).unwrap();
        let pb = lower_program(&b, &AllStreams).unwrap();
        assert_eq!(pa, pb);
    }

    #[test]
    fn summarize_lowers_window_and_aggregates() {
        let prog = parse_program(
            "input | summarize { total: sum(amount), count: count() } by product over w = tumbling_window(2)",
        )
        .unwrap();
        let items = lower_program(&prog, &AllStreams).unwrap();
        match &items[0] {
            PlanItem::Pipeline(p) => match &p.operators[0] {
                crate::plan::OperatorPlan::Summarize(s) => {
                    assert_eq!(s.fields.len(), 2);
                    assert!(matches!(s.window, Some((ref name, WindowSpec::Tumbling { size: 2 })) if name == "w"));
                }
                _ => panic!("expected summarize"),
            },
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn insert_into_missing_target_is_plan_error() {
        struct OnlyInput;
        impl StreamNameLookup for OnlyInput {
            fn has_stream(&self, name: &str) -> bool {
                name == "input"
            }
        }
        let prog = parse_program("input | insert_into(output)").unwrap();
        let err = lower_program(&prog, &OnlyInput).unwrap_err();
        assert!(matches!(err[0], EngineError::StreamNotFound(_)));
    }

    #[test]
    fn insert_command_evaluates_literal_value() {
        let prog = parse_program(r#"insert into input {"name": "A", "age": 25}"#).unwrap();
        let items = lower_program(&prog, &AllStreams).unwrap();
        match &items[0] {
            PlanItem::Command(CommandPlan::Insert { stream, value }) => {
                assert_eq!(stream, "input");
                assert_eq!(value["name"], "A");
            }
            _ => panic!("expected insert command"),
        }
    }
}
