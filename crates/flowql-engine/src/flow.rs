//! Flow lifecycle manager (spec §4.9).
//!
//! A "flow" is a named, running instance of a pipeline: `create flow` wires
//! a [`PipelinePlan`] into a live [`flowql_runtime::Pipeline`] and attaches
//! it as a flow-subscriber on its source stream. The manager's job is
//! everything a stream registry can't do on its own — validating a flow's
//! policy against a same-named flow that's already running, checking every
//! stream the plan touches actually exists, and owning the one timer per
//! TTL'd flow that tears it down on its own schedule.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowql_core::ids::{FlowId, IdGen, SubscriptionId};
use flowql_core::{EngineError, Result};
use flowql_lang::cst::CreatePolicy;
use flowql_lang::plan::PipelinePlan;
use flowql_runtime::build_pipeline;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Active,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowLifecycleEvent {
    FlowCreated,
    FlowDeleted,
}

#[derive(Debug, Clone)]
pub struct FlowLifecycleNotice {
    pub event: FlowLifecycleEvent,
    pub flow_name: String,
}

pub type FlowLifecycleListener = Arc<dyn Fn(FlowLifecycleNotice) + Send + Sync>;

/// A flow's public attributes (spec §3 data model).
#[derive(Debug, Clone)]
pub struct FlowInfo {
    pub id: FlowId,
    pub flow_name: String,
    pub source_stream_name: String,
    pub sink_descriptors: Vec<String>,
    pub ttl_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub status: FlowStatus,
    pub query_text: String,
}

struct FlowEntry {
    info: FlowInfo,
    subscription_id: SubscriptionId,
    ttl_cancel: Option<CancellationToken>,
}

/// Owns the `flow_name -> flow-id` and `flow-id -> FlowInfo` maps (spec
/// §4.9) and the one [`Registry`] every flow's pipeline publishes into and
/// subscribes from.
pub struct FlowManager {
    registry: Arc<Registry>,
    ids: Arc<IdGen>,
    by_name: StdMutex<HashMap<String, FlowId>>,
    entries: StdMutex<HashMap<FlowId, FlowEntry>>,
    lifecycle: StdMutex<Vec<FlowLifecycleListener>>,
}

impl FlowManager {
    pub fn new(registry: Arc<Registry>) -> Arc<Self> {
        let ids = registry.ids();
        Arc::new(Self {
            registry,
            ids,
            by_name: StdMutex::new(HashMap::new()),
            entries: StdMutex::new(HashMap::new()),
            lifecycle: StdMutex::new(Vec::new()),
        })
    }

    pub fn on_lifecycle(&self, listener: FlowLifecycleListener) {
        self.lifecycle.lock().unwrap().push(listener);
    }

    fn emit_lifecycle(&self, event: FlowLifecycleEvent, flow_name: &str) {
        let listeners = self.lifecycle.lock().unwrap();
        for listener in listeners.iter() {
            listener(FlowLifecycleNotice { event, flow_name: flow_name.to_string() });
        }
    }

    /// Instantiates `plan` as a running flow named `name` (spec §4.9
    /// `create_flow`):
    ///
    /// 1. resolve `policy` against any flow already registered under `name`;
    /// 2. check the plan's source stream exists;
    /// 3. check every `insert_into` sink the plan references exists;
    /// 4. compile the plan into a pipeline and subscribe it to the source;
    /// 5. record the [`FlowInfo`], schedule the TTL timer if one was given,
    ///    and emit a `flow-created` lifecycle event.
    pub async fn create_flow(
        self: &Arc<Self>,
        name: &str,
        policy: CreatePolicy,
        ttl: Option<Duration>,
        plan: PipelinePlan,
        query_text: String,
    ) -> Result<FlowId> {
        if let Some(existing_id) = self.by_name.lock().unwrap().get(name).copied() {
            match policy {
                CreatePolicy::Strict => return Err(EngineError::FlowAlreadyExists(name.to_string())),
                CreatePolicy::IfNotExists => return Ok(existing_id),
                CreatePolicy::OrReplace => self.stop_flow(existing_id).await?,
            }
        }

        if !self.registry.has(&plan.source) {
            return Err(EngineError::StreamNotFound(plan.source.clone()));
        }
        for sink in &plan.sinks {
            if !self.registry.has(sink) {
                return Err(EngineError::StreamNotFound(sink.clone()));
            }
        }

        let sink_descriptors = plan.sinks.clone();
        let source_stream_name = plan.source.clone();
        let publisher = self.registry.clone();
        let pipeline = build_pipeline(&plan, publisher, None);
        let subscription_id = self.registry.subscribe_flow(&source_stream_name, pipeline)?;

        let id = FlowId(self.ids.next());
        let info = FlowInfo {
            id,
            flow_name: name.to_string(),
            source_stream_name: source_stream_name.clone(),
            sink_descriptors,
            ttl_seconds: ttl.map(|d| d.as_secs()),
            created_at: Utc::now(),
            status: FlowStatus::Active,
            query_text,
        };

        let ttl_cancel = ttl.map(|duration| self.schedule_ttl(id, name.to_string(), duration));

        self.by_name.lock().unwrap().insert(name.to_string(), id);
        self.entries.lock().unwrap().insert(id, FlowEntry { info, subscription_id, ttl_cancel });
        self.emit_lifecycle(FlowLifecycleEvent::FlowCreated, name);
        info!(flow = name, stream = %source_stream_name, "flow created");
        Ok(id)
    }

    /// Spawns the one timer that tears this flow down after `duration`,
    /// unless `stop_flow` gets there first and cancels it.
    fn schedule_ttl(self: &Arc<Self>, id: FlowId, name: String, duration: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    if let Err(err) = manager.stop_flow(id).await {
                        warn!(flow = %name, error = %err, "ttl teardown failed");
                    }
                }
                _ = child.cancelled() => {}
            }
        });
        cancel
    }

    /// Removes the flow, cancels its TTL timer if it has one, and
    /// unsubscribes its pipeline (which runs the pipeline's `finish()`
    /// hook), emitting a `flow-deleted` lifecycle event.
    pub async fn stop_flow(self: &Arc<Self>, id: FlowId) -> Result<()> {
        let entry = self.entries.lock().unwrap().remove(&id).ok_or_else(|| EngineError::FlowNotFound(id.to_string()))?;
        self.by_name.lock().unwrap().remove(&entry.info.flow_name);
        if let Some(cancel) = &entry.ttl_cancel {
            cancel.cancel();
        }
        self.registry.unsubscribe_flow(&entry.info.source_stream_name, entry.subscription_id).await?;
        self.emit_lifecycle(FlowLifecycleEvent::FlowDeleted, &entry.info.flow_name);
        info!(flow = %entry.info.flow_name, "flow stopped");
        Ok(())
    }

    pub async fn stop_flow_by_name(self: &Arc<Self>, name: &str) -> Result<()> {
        let id = self.by_name.lock().unwrap().get(name).copied().ok_or_else(|| EngineError::FlowNotFound(name.to_string()))?;
        self.stop_flow(id).await
    }

    pub fn has_flow(&self, name: &str) -> bool {
        self.by_name.lock().unwrap().contains_key(name)
    }

    pub fn list_flows(&self) -> Vec<FlowInfo> {
        let entries = self.entries.lock().unwrap();
        let mut infos: Vec<FlowInfo> = entries.values().map(|e| e.info.clone()).collect();
        infos.sort_by(|a, b| a.flow_name.cmp(&b.flow_name));
        infos
    }

    pub fn info(&self, name: &str) -> Result<FlowInfo> {
        let id = self.by_name.lock().unwrap().get(name).copied().ok_or_else(|| EngineError::FlowNotFound(name.to_string()))?;
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| e.info.clone())
            .ok_or_else(|| EngineError::FlowNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowql_lang::plan::OperatorPlan;

    fn trivial_plan(source: &str) -> PipelinePlan {
        PipelinePlan { source: source.to_string(), operators: vec![OperatorPlan::Filter(flowql_lang::expr::Expr::Bool(true))], sinks: vec![] }
    }

    #[tokio::test]
    async fn create_flow_rejects_missing_source_stream() {
        let registry = Arc::new(Registry::new());
        let flows = FlowManager::new(registry);
        let err = flows.create_flow("f", CreatePolicy::Strict, None, trivial_plan("missing"), "where true".into()).await.unwrap_err();
        assert_eq!(err.code(), "stream_not_found");
    }

    #[tokio::test]
    async fn create_flow_rejects_missing_sink_stream() {
        let registry = Arc::new(Registry::new());
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let flows = FlowManager::new(registry);
        let mut plan = trivial_plan("events");
        plan.operators.push(OperatorPlan::InsertInto("alerts".into()));
        plan.sinks.push("alerts".into());
        let err = flows.create_flow("f", CreatePolicy::Strict, None, plan, "...".into()).await.unwrap_err();
        assert_eq!(err.code(), "stream_not_found");
    }

    #[tokio::test]
    async fn create_then_stop_flow_roundtrip() {
        let registry = Arc::new(Registry::new());
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let flows = FlowManager::new(registry.clone());
        let id = flows.create_flow("f", CreatePolicy::Strict, None, trivial_plan("events"), "where true".into()).await.unwrap();
        assert!(flows.has_flow("f"));
        assert_eq!(registry.info("events").unwrap().flow_subscriber_count, 1);
        flows.stop_flow(id).await.unwrap();
        assert!(!flows.has_flow("f"));
        assert_eq!(registry.info("events").unwrap().flow_subscriber_count, 0);
    }

    #[tokio::test]
    async fn strict_create_twice_fails() {
        let registry = Arc::new(Registry::new());
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let flows = FlowManager::new(registry);
        flows.create_flow("f", CreatePolicy::Strict, None, trivial_plan("events"), "q".into()).await.unwrap();
        let err = flows.create_flow("f", CreatePolicy::Strict, None, trivial_plan("events"), "q".into()).await.unwrap_err();
        assert_eq!(err.code(), "flow_already_exists");
    }

    #[tokio::test]
    async fn or_replace_stops_the_previous_flow_first() {
        let registry = Arc::new(Registry::new());
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let flows = FlowManager::new(registry.clone());
        let first = flows.create_flow("f", CreatePolicy::Strict, None, trivial_plan("events"), "q".into()).await.unwrap();
        let second = flows.create_flow("f", CreatePolicy::OrReplace, None, trivial_plan("events"), "q2".into()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.info("events").unwrap().flow_subscriber_count, 1);
        assert_eq!(flows.info("f").unwrap().query_text, "q2");
    }

    #[tokio::test]
    async fn stop_flow_by_name_on_unknown_name_is_flow_not_found() {
        let registry = Arc::new(Registry::new());
        let flows = FlowManager::new(registry);
        let err = flows.stop_flow_by_name("ghost").await.unwrap_err();
        assert_eq!(err.code(), "flow_not_found");
    }

    #[tokio::test]
    async fn ttl_expiry_tears_down_the_flow_on_its_own() {
        let registry = Arc::new(Registry::new());
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let flows = FlowManager::new(registry.clone());
        flows
            .create_flow("f", CreatePolicy::Strict, Some(Duration::from_millis(20)), trivial_plan("events"), "q".into())
            .await
            .unwrap();
        assert!(flows.has_flow("f"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!flows.has_flow("f"));
        assert_eq!(registry.info("events").unwrap().flow_subscriber_count, 0);
    }
}
