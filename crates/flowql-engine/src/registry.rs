//! Stream registry and pub/sub fabric (spec §4.8).
//!
//! A [`Stream`] is a pure conduit — it stores no records, only subscriber
//! lists and a per-stream fan-out lock. Fan-out takes a snapshot of each
//! subscriber list before doing any awaiting, so a subscriber that
//! subscribes or unsubscribes mid-fan-out never observes (or causes) a
//! partially-iterated set (spec §5 "no re-entrant subscribe/unsubscribe
//! during a fan-out iteration").

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowql_core::ids::{IdGen, SubscriptionId};
use flowql_core::log::{LogLevel, LogRecord};
use flowql_core::record::{sanitize, Record, SanitizePolicy};
use flowql_core::{EngineError, Result};
use flowql_lang::cst::CreatePolicy;
use flowql_lang::plan::StreamNameLookup;
use flowql_runtime::{Pipeline, Publisher};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

/// Reserved system stream (spec §3/§6.2), created at [`Registry::new`] and
/// excluded from lifecycle events.
pub const LOG_STREAM: &str = "_log";

/// A user or global subscriber's callback. Returning `Err` marks the
/// subscriber as failed; the registry removes it and logs a
/// `SubscriberFailure` record rather than aborting the insert.
pub type Callback = Arc<dyn Fn(&Record) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    StreamCreated,
    StreamDeleted,
}

#[derive(Debug, Clone)]
pub struct LifecycleNotice {
    pub event: LifecycleEvent,
    pub stream: String,
}

pub type LifecycleListener = Arc<dyn Fn(LifecycleNotice) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    pub flow_subscriber_count: usize,
    pub user_subscriber_count: usize,
    pub total: usize,
}

struct FlowSub {
    id: SubscriptionId,
    pipeline: Arc<AsyncMutex<Pipeline>>,
}

struct UserSub {
    id: SubscriptionId,
    callback: Callback,
}

struct Stream {
    name: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    flow_subs: StdMutex<Vec<FlowSub>>,
    user_subs: StdMutex<Vec<UserSub>>,
    /// Serializes concurrent `insert` calls against this one stream; a
    /// different stream's fan-out never waits on this lock (spec §5
    /// "Realization on tokio").
    fanout: AsyncMutex<()>,
}

impl Stream {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            flow_subs: StdMutex::new(Vec::new()),
            user_subs: StdMutex::new(Vec::new()),
            fanout: AsyncMutex::new(()),
        }
    }

    fn is_reserved(&self) -> bool {
        self.name.starts_with('_')
    }
}

pub struct Registry {
    streams: StdMutex<HashMap<String, Arc<Stream>>>,
    global_subs: StdMutex<Vec<UserSub>>,
    lifecycle: StdMutex<Vec<LifecycleListener>>,
    ids: Arc<IdGen>,
}

impl Registry {
    pub fn new() -> Self {
        let mut streams = HashMap::new();
        streams.insert(LOG_STREAM.to_string(), Arc::new(Stream::new(LOG_STREAM)));
        Self { streams: StdMutex::new(streams), global_subs: StdMutex::new(Vec::new()), lifecycle: StdMutex::new(Vec::new()), ids: Arc::new(IdGen::new()) }
    }

    /// The id generator, shared with the flow manager so flow ids and
    /// subscription ids are drawn from one counter (spec §4.8's closing
    /// line, §3 "Ids").
    pub fn ids(&self) -> Arc<IdGen> {
        self.ids.clone()
    }

    fn get_stream(&self, name: &str) -> Result<Arc<Stream>> {
        self.streams.lock().unwrap().get(name).cloned().ok_or_else(|| EngineError::StreamNotFound(name.to_string()))
    }

    /// Names starting with `_` are reserved for internal streams like
    /// [`LOG_STREAM`] (spec §3) and may not be created by user commands.
    ///
    /// `or_replace` "tears down existing subscribers first" (spec §4.8):
    /// the old stream's flow pipelines are finished exactly like `delete`
    /// does, before the fresh, subscriber-less `Stream` takes its place —
    /// otherwise the old pipelines would be silently orphaned un-finished
    /// and their owning flows would keep pointing at a stream they're no
    /// longer subscribed to.
    pub async fn create(&self, name: &str, policy: CreatePolicy) -> Result<()> {
        if name.starts_with('_') {
            return Err(EngineError::ReservedName(name.to_string()));
        }
        let old = {
            let mut streams = self.streams.lock().unwrap();
            if streams.contains_key(name) {
                match policy {
                    CreatePolicy::Strict => return Err(EngineError::StreamAlreadyExists(name.to_string())),
                    CreatePolicy::IfNotExists => return Ok(()),
                    CreatePolicy::OrReplace => streams.insert(name.to_string(), Arc::new(Stream::new(name))),
                }
            } else {
                streams.insert(name.to_string(), Arc::new(Stream::new(name)));
                None
            }
        };
        if let Some(old_stream) = old {
            let pipelines: Vec<_> = old_stream.flow_subs.lock().unwrap().iter().map(|s| s.pipeline.clone()).collect();
            for pipeline in pipelines {
                pipeline.lock().await.finish().await;
            }
        }
        self.emit_lifecycle(LifecycleEvent::StreamCreated, name);
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let stream = {
            let mut streams = self.streams.lock().unwrap();
            streams.remove(name).ok_or_else(|| EngineError::StreamNotFound(name.to_string()))?
        };
        let pipelines: Vec<_> = stream.flow_subs.lock().unwrap().iter().map(|s| s.pipeline.clone()).collect();
        for pipeline in pipelines {
            pipeline.lock().await.finish().await;
        }
        if !stream.is_reserved() {
            self.emit_lifecycle(LifecycleEvent::StreamDeleted, name);
        }
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.streams.lock().unwrap().contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn info(&self, name: &str) -> Result<StreamInfo> {
        let stream = self.get_stream(name)?;
        let flow_subscriber_count = stream.flow_subs.lock().unwrap().len();
        let user_subscriber_count = stream.user_subs.lock().unwrap().len();
        Ok(StreamInfo { flow_subscriber_count, user_subscriber_count, total: flow_subscriber_count + user_subscriber_count })
    }

    pub fn subscribe_flow(&self, name: &str, pipeline: Pipeline) -> Result<SubscriptionId> {
        let stream = self.get_stream(name)?;
        let id = SubscriptionId(self.ids.next());
        stream.flow_subs.lock().unwrap().push(FlowSub { id, pipeline: Arc::new(AsyncMutex::new(pipeline)) });
        Ok(id)
    }

    /// Removes the flow subscriber and runs its pipeline's `finish()` hook
    /// (spec §4.9 `stop_flow`: "unsubscribe the pipeline, which triggers
    /// `finish()`").
    pub async fn unsubscribe_flow(&self, name: &str, id: SubscriptionId) -> Result<()> {
        let stream = self.get_stream(name)?;
        let removed = {
            let mut subs = stream.flow_subs.lock().unwrap();
            subs.iter().position(|s| s.id == id).map(|i| subs.remove(i))
        };
        if let Some(sub) = removed {
            sub.pipeline.lock().await.finish().await;
        }
        Ok(())
    }

    pub fn subscribe_user(&self, name: &str, callback: Callback) -> Result<SubscriptionId> {
        let stream = self.get_stream(name)?;
        let id = SubscriptionId(self.ids.next());
        stream.user_subs.lock().unwrap().push(UserSub { id, callback });
        Ok(id)
    }

    pub fn unsubscribe_user(&self, id: SubscriptionId) {
        let streams = self.streams.lock().unwrap();
        for stream in streams.values() {
            stream.user_subs.lock().unwrap().retain(|s| s.id != id);
        }
    }

    pub fn subscribe_global(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.ids.next());
        self.global_subs.lock().unwrap().push(UserSub { id, callback });
        id
    }

    pub fn unsubscribe_global(&self, id: SubscriptionId) {
        self.global_subs.lock().unwrap().retain(|s| s.id != id);
    }

    pub fn on_lifecycle(&self, listener: LifecycleListener) {
        self.lifecycle.lock().unwrap().push(listener);
    }

    fn emit_lifecycle(&self, event: LifecycleEvent, stream: &str) {
        let listeners = self.lifecycle.lock().unwrap();
        for listener in listeners.iter() {
            listener(LifecycleNotice { event, stream: stream.to_string() });
        }
    }

    /// Publishes one record to `name`'s flow, user, and global subscribers
    /// in that order (spec §4.8 `insert`). A subscriber whose pipeline
    /// panics, or whose callback returns `Err`, is removed from the live
    /// set and logged to `_log`; the insert itself never fails because of
    /// it.
    pub async fn insert(&self, name: &str, record: Record) -> Result<()> {
        let stream = self.get_stream(name)?;
        let _fanout_guard = stream.fanout.lock().await;
        let sanitized = sanitize(record, SanitizePolicy::Remove);

        let flow_snapshot: Vec<(SubscriptionId, Arc<AsyncMutex<Pipeline>>)> =
            stream.flow_subs.lock().unwrap().iter().map(|s| (s.id, s.pipeline.clone())).collect();
        let mut failed_flows = Vec::new();
        for (id, pipeline) in flow_snapshot {
            let record_for_task = sanitized.clone();
            let joined = tokio::spawn(async move {
                let mut guard = pipeline.lock().await;
                guard.push(record_for_task).await
            })
            .await;
            if joined.is_err() {
                failed_flows.push(id);
                self.log(LogLevel::Error, "subscriber_failure", format!("flow subscriber {id} on stream {name} panicked")).await;
            }
        }
        if !failed_flows.is_empty() {
            stream.flow_subs.lock().unwrap().retain(|s| !failed_flows.contains(&s.id));
        }

        let user_snapshot: Vec<(SubscriptionId, Callback)> = stream.user_subs.lock().unwrap().iter().map(|s| (s.id, s.callback.clone())).collect();
        let mut failed_users = Vec::new();
        for (id, callback) in user_snapshot {
            if let Err(message) = callback(&sanitized) {
                failed_users.push(id);
                self.log(LogLevel::Error, "subscriber_failure", format!("user subscriber {id} on stream {name} failed: {message}")).await;
            }
        }
        if !failed_users.is_empty() {
            stream.user_subs.lock().unwrap().retain(|s| !failed_users.contains(&s.id));
        }

        let global_snapshot: Vec<(SubscriptionId, Callback)> = self.global_subs.lock().unwrap().iter().map(|s| (s.id, s.callback.clone())).collect();
        let mut failed_global = Vec::new();
        for (id, callback) in global_snapshot {
            if let Err(message) = callback(&sanitized) {
                failed_global.push(id);
                self.log(LogLevel::Error, "subscriber_failure", format!("global subscriber {id} on stream {name} failed: {message}")).await;
            }
        }
        if !failed_global.is_empty() {
            self.global_subs.lock().unwrap().retain(|s| !failed_global.contains(&s.id));
        }

        Ok(())
    }

    pub async fn flush(&self, name: &str) -> Result<()> {
        let stream = self.get_stream(name)?;
        let pipelines: Vec<_> = stream.flow_subs.lock().unwrap().iter().map(|s| s.pipeline.clone()).collect();
        for pipeline in pipelines {
            pipeline.lock().await.flush().await;
        }
        Ok(())
    }

    async fn log(&self, level: LogLevel, code: &str, message: impl Into<String>) {
        if self.get_stream(LOG_STREAM).is_err() {
            warn!("_log stream missing, dropping log record");
            return;
        }
        let record = LogRecord::new(level, code, message).into_record();
        if let Err(err) = Box::pin(self.insert(LOG_STREAM, record)).await {
            error!("failed to publish to _log: {err}");
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamNameLookup for Registry {
    fn has_stream(&self, name: &str) -> bool {
        self.has(name)
    }
}

#[async_trait]
impl Publisher for Registry {
    async fn publish(&self, stream: &str, record: Record) -> Result<()> {
        self.insert(stream, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowql_runtime::Stage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn create_then_has_then_delete() {
        let registry = Registry::new();
        assert!(!registry.has("events"));
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        assert!(registry.has("events"));
        registry.delete("events").await.unwrap();
        assert!(!registry.has("events"));
    }

    #[tokio::test]
    async fn strict_create_twice_fails() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let err = registry.create("events", CreatePolicy::Strict).await.unwrap_err();
        assert_eq!(err.code(), "stream_already_exists");
    }

    #[tokio::test]
    async fn if_not_exists_is_a_no_op_when_present() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        registry.create("events", CreatePolicy::IfNotExists).await.unwrap();
        assert!(registry.has("events"));
    }

    #[tokio::test]
    async fn creating_a_reserved_name_fails() {
        let registry = Registry::new();
        let err = registry.create("_custom", CreatePolicy::Strict).await.unwrap_err();
        assert_eq!(err.code(), "reserved_name");
    }

    #[tokio::test]
    async fn insert_with_no_subscribers_drops_silently() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        registry.insert("events", json!({"a": 1})).await.unwrap();
    }

    #[tokio::test]
    async fn insert_into_absent_stream_is_stream_not_found() {
        let registry = Registry::new();
        let err = registry.insert("missing", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "stream_not_found");
    }

    #[tokio::test]
    async fn user_subscriber_receives_records_in_order() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        registry
            .subscribe_user(
                "events",
                Arc::new(move |record: &Record| {
                    seen_clone.lock().unwrap().push(record.clone());
                    Ok(())
                }),
            )
            .unwrap();
        registry.insert("events", json!(1)).await.unwrap();
        registry.insert("events", json!(2)).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn deleted_stream_subscriber_receives_nothing_further() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        registry
            .subscribe_user(
                "events",
                Arc::new(move |_record: &Record| {
                    count_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        registry.delete("events").await.unwrap();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        registry.insert("events", json!(1)).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    struct NoopStage;

    #[async_trait::async_trait]
    impl Stage for NoopStage {
        async fn process(&mut self, record: Record) -> Vec<Record> {
            vec![record]
        }
    }

    #[tokio::test]
    async fn flow_subscriber_pipeline_drives_on_insert() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let pipeline = Pipeline::new(vec![Box::new(NoopStage)]);
        let id = registry.subscribe_flow("events", pipeline).unwrap();
        registry.insert("events", json!({"n": 1})).await.unwrap();
        registry.unsubscribe_flow("events", id).await.unwrap();
        assert_eq!(registry.info("events").unwrap().flow_subscriber_count, 0);
    }

    struct FinishTrackingStage(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Stage for FinishTrackingStage {
        async fn process(&mut self, record: Record) -> Vec<Record> {
            vec![record]
        }

        async fn finish(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn or_replace_finishes_the_old_stream_s_pipelines() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![Box::new(FinishTrackingStage(finished.clone()))]);
        registry.subscribe_flow("events", pipeline).unwrap();
        assert_eq!(registry.info("events").unwrap().flow_subscriber_count, 1);

        registry.create("events", CreatePolicy::OrReplace).await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1, "old pipeline must be finished, not orphaned");
        assert_eq!(registry.info("events").unwrap().flow_subscriber_count, 0);
    }

    #[tokio::test]
    async fn failing_user_subscriber_is_removed_and_logged() {
        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        registry.subscribe_user("events", Arc::new(|_record: &Record| Err("boom".to_string()))).unwrap();

        let log_seen = Arc::new(StdMutex::new(Vec::new()));
        let log_seen_clone = log_seen.clone();
        registry
            .subscribe_user(
                LOG_STREAM,
                Arc::new(move |record: &Record| {
                    log_seen_clone.lock().unwrap().push(record.clone());
                    Ok(())
                }),
            )
            .unwrap();

        registry.insert("events", json!(1)).await.unwrap();
        assert_eq!(registry.info("events").unwrap().user_subscriber_count, 0);
        assert_eq!(log_seen.lock().unwrap().len(), 1);
        assert_eq!(log_seen.lock().unwrap()[0]["code"], json!("subscriber_failure"));
    }

    #[tokio::test]
    async fn insert_strips_absent_fields_built_by_an_object_expression() {
        use flowql_lang::expr::{Expr, ObjectProp};

        let registry = Registry::new();
        registry.create("events", CreatePolicy::Strict).await.unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        registry
            .subscribe_user(
                "events",
                Arc::new(move |record: &Record| {
                    seen_clone.lock().unwrap().push(record.clone());
                    Ok(())
                }),
            )
            .unwrap();

        // Mirrors what `Select` hands `Registry::insert`: a record built from
        // an object expression where one key's value was never present.
        let projector = Expr::Object(vec![
            ObjectProp::KeyValue("present".to_string(), Expr::Number(1.0)),
            ObjectProp::KeyValue("missing".to_string(), Expr::Identifier("nope".to_string())),
        ]);
        let env = flowql_lang::expr::Env::new(&json!({}));
        let built = flowql_lang::expr::eval(&projector, &env).unwrap();

        registry.insert("events", built).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"present": 1.0})]);
    }
}
