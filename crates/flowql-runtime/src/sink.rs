//! `insert_into(stream)` and `collect()` (spec §4.7, testable
//! property 9 — the `[ADDED]` sink note in the expanded design).
//!
//! Both are tees, not terminators in the pipeline-chain sense: each
//! forwards its input record downstream unchanged after doing its side
//! effect, so `insert_into` / `collect` can appear mid-pipeline as well as
//! at the end. `InsertInto` depends only on the [`Publisher`] trait, never
//! on the stream registry itself, so `flowql-runtime` has no dependency on
//! `flowql-engine` — the registry implements `Publisher` on the other side.

use async_trait::async_trait;
use flowql_core::record::Record;
use tracing::warn;

use crate::stage::Stage;

/// Whatever can accept a published record for a named stream. Implemented
/// by the stream registry; mocked directly in these unit tests.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, stream: &str, record: Record) -> flowql_core::Result<()>;
}

pub struct InsertInto {
    target: String,
    publisher: std::sync::Arc<dyn Publisher>,
}

impl InsertInto {
    pub fn new(target: String, publisher: std::sync::Arc<dyn Publisher>) -> Self {
        Self { target, publisher }
    }
}

#[async_trait]
impl Stage for InsertInto {
    async fn process(&mut self, record: Record) -> Vec<Record> {
        if let Err(err) = self.publisher.publish(&self.target, record.clone()).await {
            warn!(target = %self.target, error = %err, "insert_into publish failed");
        }
        vec![record]
    }
}

/// Invokes a side-effecting callback per record; never transforms or drops
/// the record it forwards.
pub struct Collect {
    callback: Box<dyn Fn(&Record) + Send + Sync>,
}

impl Collect {
    pub fn new(callback: Box<dyn Fn(&Record) + Send + Sync>) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl Stage for Collect {
    async fn process(&mut self, record: Record) -> Vec<Record> {
        (self.callback)(&record);
        vec![record]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct RecordingPublisher {
        published: Mutex<Vec<(String, Record)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, stream: &str, record: Record) -> flowql_core::Result<()> {
            self.published.lock().unwrap().push((stream.to_string(), record));
            Ok(())
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _stream: &str, _record: Record) -> flowql_core::Result<()> {
            Err(flowql_core::error::EngineError::SinkPublishFailure { target: "x".into(), message: "boom".into() })
        }
    }

    #[tokio::test]
    async fn insert_into_publishes_and_forwards_unchanged() {
        let publisher = Arc::new(RecordingPublisher { published: Mutex::new(Vec::new()) });
        let mut stage = InsertInto::new("alerts".into(), publisher.clone());
        let record = json!({"level": "high"});
        let out = stage.process(record.clone()).await;
        assert_eq!(out, vec![record.clone()]);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0], ("alerts".to_string(), record));
    }

    #[tokio::test]
    async fn insert_into_publish_failure_still_forwards_record() {
        let mut stage = InsertInto::new("alerts".into(), Arc::new(FailingPublisher));
        let record = json!({"ok": true});
        let out = stage.process(record.clone()).await;
        assert_eq!(out, vec![record]);
    }

    #[tokio::test]
    async fn collect_invokes_callback_and_forwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut stage = Collect::new(Box::new(move |record: &Record| seen_clone.lock().unwrap().push(record.clone())));
        let record = json!({"n": 1});
        let out = stage.process(record.clone()).await;
        assert_eq!(out, vec![record.clone()]);
        assert_eq!(seen.lock().unwrap().as_slice(), &[record]);
    }
}
