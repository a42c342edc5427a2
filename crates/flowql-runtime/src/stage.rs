//! The operator chain abstraction (spec §3 Pipeline, §4.9 step 4, §9 Design
//! Notes "cyclic/recursive source structures").
//!
//! A [`Pipeline`] is a flat `Vec<Box<dyn Stage>>` with no back-pointers.
//! `flush` walks the chain head-to-tail and, per stage, drives that stage's
//! flush output through every later stage's ordinary `process` before
//! moving on to the next stage's own flush — see `Pipeline::flush` for why
//! that order matters for `Summarize` stages downstream of other
//! `Summarize` stages.

use async_trait::async_trait;
use flowql_core::record::Record;

/// One node in a pipeline. `process` is the hot path; `flush`/`finish` are
/// the two coordination hooks the owning `Pipeline` calls into (spec §4.6
/// "flush", §4.9 step on `stop_flow`).
#[async_trait]
pub trait Stage: Send + Sync {
    /// Consumes one record, returning zero or more records to forward.
    async fn process(&mut self, record: Record) -> Vec<Record>;

    /// Finalizes any buffered state (open windows, partial sessions) and
    /// returns whatever that finalization produces. Stateless stages
    /// (`Filter`, `Select`, `InsertInto`, `Collect`) accept the default.
    async fn flush(&mut self) -> Vec<Record> {
        Vec::new()
    }

    /// Releases resources on pipeline teardown (`stop_flow`). Most stages
    /// have nothing to do here; `Scan` and `Summarize` don't either, since
    /// their state dies with the stage itself — this hook exists for
    /// parity with the spec's operator capability set, and as the place a
    /// future stage with an external resource (a timer, a held lock) would
    /// release it.
    async fn finish(&mut self) {}
}

/// A linear chain of operators, owned exclusively by a `Flow` (spec §3).
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Drives one record through every stage in order. A stage that
    /// returns zero records short-circuits the rest of the chain for that
    /// record (spec §4.5/§4.6: `Scan` and `Summarize` may produce 0..n
    /// outputs per input).
    pub async fn push(&mut self, record: Record) -> Vec<Record> {
        let mut batch = vec![record];
        for stage in self.stages.iter_mut() {
            if batch.is_empty() {
                break;
            }
            let mut next = Vec::with_capacity(batch.len());
            for r in batch {
                next.extend(stage.process(r).await);
            }
            batch = next;
        }
        batch
    }

    /// Finalizes open state tail-ward: stage `i` flushes, and whatever it
    /// produces is driven through stages `i+1..n` via `process` before
    /// stage `i+1`'s own `flush` runs. This lets a `Summarize` stage
    /// downstream of another `Summarize` stage still see and fold in the
    /// upstream stage's final window before finalizing its own.
    pub async fn flush(&mut self) -> Vec<Record> {
        let n = self.stages.len();
        let mut tail_output = Vec::new();
        for i in 0..n {
            let mut batch = self.stages[i].flush().await;
            for stage in self.stages[i + 1..].iter_mut() {
                if batch.is_empty() {
                    break;
                }
                let mut next = Vec::with_capacity(batch.len());
                for r in batch {
                    next.extend(stage.process(r).await);
                }
                batch = next;
            }
            tail_output.extend(batch);
        }
        tail_output
    }

    pub async fn finish(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.finish().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Double;

    #[async_trait]
    impl Stage for Double {
        async fn process(&mut self, record: Record) -> Vec<Record> {
            vec![record.clone(), record]
        }
    }

    struct DropOdd;

    #[async_trait]
    impl Stage for DropOdd {
        async fn process(&mut self, record: Record) -> Vec<Record> {
            if record.as_i64().map(|n| n % 2 == 0).unwrap_or(false) {
                vec![record]
            } else {
                vec![]
            }
        }
    }

    #[tokio::test]
    async fn chain_applies_stages_in_order() {
        let mut pipeline = Pipeline::new(vec![Box::new(Double), Box::new(DropOdd)]);
        let out = pipeline.push(json!(2)).await;
        assert_eq!(out, vec![json!(2), json!(2)]);
    }

    #[tokio::test]
    async fn empty_intermediate_output_short_circuits() {
        struct Counter(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        #[async_trait]
        impl Stage for Counter {
            async fn process(&mut self, record: Record) -> Vec<Record> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                vec![record]
            }
        }
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut pipeline = Pipeline::new(vec![Box::new(DropOdd), Box::new(Counter(count.clone()))]);
        let out = pipeline.push(json!(3)).await;
        assert!(out.is_empty());
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flush_drives_output_through_downstream_stages() {
        struct EmitOnFlush;
        #[async_trait]
        impl Stage for EmitOnFlush {
            async fn process(&mut self, _record: Record) -> Vec<Record> {
                vec![]
            }
            async fn flush(&mut self) -> Vec<Record> {
                vec![json!(4)]
            }
        }
        let mut pipeline = Pipeline::new(vec![Box::new(EmitOnFlush), Box::new(DropOdd)]);
        let out = pipeline.flush().await;
        assert_eq!(out, vec![json!(4)]);
    }
}
