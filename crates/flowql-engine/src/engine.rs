//! Bundles a [`Registry`] and a [`FlowManager`] behind one entry point
//! (spec §9 Design Notes) and turns a lowered [`PlanItem`] into the tagged
//! `{success, code, message, payload}` result every user-visible command
//! returns (spec §7).

use std::sync::Arc;

use flowql_core::EngineError;
use flowql_lang::plan::{CommandPlan, PlanItem};
use serde_json::{json, Value};

use crate::flow::FlowManager;
use crate::registry::Registry;

/// The result of running one top-level statement. Never carries an `Err` —
/// failures are folded into `success`/`code`/`message` so the CLI (and any
/// other embedder) has one shape to print or forward, matching the `_log`
/// record shape produced for the same failures (spec §7).
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub payload: Option<Value>,
}

impl CommandResult {
    fn ok(code: &str, message: impl Into<String>, payload: Option<Value>) -> Self {
        Self { success: true, code: code.to_string(), message: message.into(), payload }
    }

    fn err(err: &EngineError) -> Self {
        Self { success: false, code: err.code().to_string(), message: err.to_string(), payload: None }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "success": self.success,
            "code": self.code,
            "message": self.message,
            "payload": self.payload,
        })
    }
}

/// One engine instance owns one registry and one flow manager. A host
/// program typically creates exactly one and keeps it alive for the
/// process's lifetime.
pub struct Engine {
    pub registry: Arc<Registry>,
    pub flows: Arc<FlowManager>,
}

impl Engine {
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let flows = FlowManager::new(registry.clone());
        Arc::new(Self { registry, flows })
    }

    /// Runs one lowered statement to completion and reports its outcome.
    /// A bare pipeline statement (no enclosing `create flow`) is wired up
    /// as a flow under a generated name, since a pipeline only does
    /// anything once it is attached to a source stream as a subscriber.
    pub async fn execute(&self, item: PlanItem, query_text: &str) -> CommandResult {
        match item {
            PlanItem::Command(cmd) => self.execute_command(cmd).await,
            PlanItem::Pipeline(plan) => {
                let name = format!("_pipeline_{}", self.registry.ids().next());
                match self
                    .flows
                    .create_flow(&name, flowql_lang::cst::CreatePolicy::Strict, None, plan, query_text.to_string())
                    .await
                {
                    Ok(id) => CommandResult::ok("flow_created", format!("started anonymous flow '{name}'"), Some(json!({"flow_id": id.0, "flow_name": name}))),
                    Err(err) => CommandResult::err(&err),
                }
            }
        }
    }

    async fn execute_command(&self, cmd: CommandPlan) -> CommandResult {
        match cmd {
            CommandPlan::CreateStream { name, policy } => match self.registry.create(&name, policy).await {
                Ok(()) => CommandResult::ok("stream_created", format!("stream '{name}' created"), None),
                Err(err) => CommandResult::err(&err),
            },
            CommandPlan::CreateFlow { name, policy, ttl, pipeline } => {
                match self.flows.create_flow(&name, policy, ttl, pipeline, String::new()).await {
                    Ok(id) => CommandResult::ok("flow_created", format!("flow '{name}' created"), Some(json!({"flow_id": id.0}))),
                    Err(err) => CommandResult::err(&err),
                }
            }
            CommandPlan::DeleteStream { name } => match self.registry.delete(&name).await {
                Ok(()) => CommandResult::ok("stream_deleted", format!("stream '{name}' deleted"), None),
                Err(err) => CommandResult::err(&err),
            },
            CommandPlan::DeleteFlow { name } => match self.flows.stop_flow_by_name(&name).await {
                Ok(()) => CommandResult::ok("flow_deleted", format!("flow '{name}' deleted"), None),
                Err(err) => CommandResult::err(&err),
            },
            CommandPlan::Insert { stream, value } => self.execute_insert(&stream, value).await,
            CommandPlan::Flush { stream } => match self.registry.flush(&stream).await {
                Ok(()) => CommandResult::ok("flushed", format!("flushed '{stream}'"), None),
                Err(err) => CommandResult::err(&err),
            },
            CommandPlan::ListStreams => CommandResult::ok("streams", "ok", Some(json!(self.registry.list()))),
            CommandPlan::ListFlows => {
                let flows: Vec<Value> = self.flows.list_flows().iter().map(flow_info_json).collect();
                CommandResult::ok("flows", "ok", Some(json!(flows)))
            }
            CommandPlan::Info { name } => self.info(name),
        }
    }

    /// `insert into STREAM value` where `value` is a JSON literal (spec
    /// §6.1 grammar: "object or array of objects"). An array is not itself
    /// one record — it's shorthand for inserting each element in order
    /// (spec §4.8 `insert(name, record_or_list)`, §5 "for a single insert
    /// call carrying a list, items are processed in list order"); a bare
    /// object is the single-record case. The whole command fails as soon
    /// as one element fails (e.g. the stream was deleted mid-list).
    async fn execute_insert(&self, stream: &str, value: Value) -> CommandResult {
        let records: Vec<Value> = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        let count = records.len();
        for record in records {
            if let Err(err) = self.registry.insert(stream, record).await {
                return CommandResult::err(&err);
            }
        }
        CommandResult::ok("inserted", format!("inserted {count} record(s) into '{stream}'"), None)
    }

    /// `info` with no name summarizes both namespaces; `info NAME` checks
    /// the stream namespace first and falls back to the flow namespace,
    /// since the two names can't collide (flows aren't streams) but the
    /// grammar doesn't distinguish which one the caller means.
    fn info(&self, name: Option<String>) -> CommandResult {
        match name {
            None => CommandResult::ok(
                "info",
                "ok",
                Some(json!({"streams": self.registry.list(), "flows": self.flows.list_flows().iter().map(flow_info_json).collect::<Vec<_>>()})),
            ),
            Some(name) => {
                if let Ok(stream_info) = self.registry.info(&name) {
                    return CommandResult::ok(
                        "stream_info",
                        "ok",
                        Some(json!({
                            "kind": "stream",
                            "flow_subscriber_count": stream_info.flow_subscriber_count,
                            "user_subscriber_count": stream_info.user_subscriber_count,
                            "total": stream_info.total,
                        })),
                    );
                }
                match self.flows.info(&name) {
                    Ok(flow_info) => CommandResult::ok("flow_info", "ok", Some(flow_info_json(&flow_info))),
                    Err(err) => CommandResult::err(&err),
                }
            }
        }
    }
}

fn flow_info_json(info: &crate::flow::FlowInfo) -> Value {
    json!({
        "kind": "flow",
        "flow_id": info.id.0,
        "flow_name": info.flow_name,
        "source_stream_name": info.source_stream_name,
        "sink_descriptors": info.sink_descriptors,
        "ttl_seconds": info.ttl_seconds,
        "created_at": info.created_at.to_rfc3339(),
        "status": match info.status {
            crate::flow::FlowStatus::Active => "active",
            crate::flow::FlowStatus::Stopping => "stopping",
            crate::flow::FlowStatus::Stopped => "stopped",
        },
        "query_text": info.query_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowql_lang::{lower_program, parse_program};

    async fn run(engine: &Engine, src: &str) -> Vec<CommandResult> {
        let program = parse_program(src).unwrap();
        let items = lower_program(&program, engine.registry.as_ref()).unwrap();
        let mut out = Vec::new();
        for item in items {
            out.push(engine.execute(item, src).await);
        }
        out
    }

    #[tokio::test]
    async fn create_stream_then_insert_then_list() {
        let engine = Engine::new();
        let results = run(&engine, "create stream events; insert into events {a: 1}; list streams;").await;
        assert!(results.iter().all(|r| r.success), "{results:?}");
        let streams = results[2].payload.clone().unwrap();
        assert!(streams.as_array().unwrap().iter().any(|v| v == "events"));
    }

    #[tokio::test]
    async fn create_flow_then_info_then_delete() {
        let engine = Engine::new();
        run(&engine, "create stream events;").await;
        let results = run(&engine, "create flow f as events | where true;").await;
        assert!(results[0].success);

        let results = run(&engine, "info f;").await;
        assert_eq!(results[0].payload.as_ref().unwrap()["kind"], "flow");

        let results = run(&engine, "delete flow f;").await;
        assert!(results[0].success);

        let results = run(&engine, "info f;").await;
        assert!(!results[0].success);
        assert_eq!(results[0].code, "flow_not_found");
    }

    #[tokio::test]
    async fn bare_pipeline_statement_runs_as_an_anonymous_flow() {
        let engine = Engine::new();
        run(&engine, "create stream events;").await;
        let results = run(&engine, "events | where true;").await;
        assert!(results[0].success);
        assert_eq!(results[0].code, "flow_created");
    }

    /// Spec §8 scenario S1, run end to end through `parse -> lower ->
    /// engine -> registry`: a single `insert into input [...]` command
    /// carrying three records must fan out each element in order, not the
    /// array as one record (spec §4.8 `insert(name, record_or_list)`, §5
    /// "items are processed in list order").
    #[tokio::test]
    async fn s1_filter_pass_through_splits_a_list_insert_into_records() {
        use std::sync::Mutex;

        let engine = Engine::new();
        run(&engine, "create stream input; create stream output;").await;
        let results = run(&engine, "create flow f1 as input | where age > 18 | insert_into(output);").await;
        assert!(results[0].success, "{results:?}");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        engine
            .registry
            .subscribe_user(
                "output",
                Arc::new(move |record: &Value| {
                    seen_clone.lock().unwrap().push(record.clone());
                    Ok(())
                }),
            )
            .unwrap();

        let results = run(&engine, r#"insert into input [{"name":"A","age":25},{"name":"B","age":16},{"name":"C","age":22}];"#).await;
        assert!(results[0].success, "{results:?}");

        // Numeric literals lower to `Expr::Number(f64)` regardless of source
        // spelling, so the republished records carry float-typed ages.
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"name": "A", "age": 25.0}), json!({"name": "C", "age": 22.0})]);
    }
}
