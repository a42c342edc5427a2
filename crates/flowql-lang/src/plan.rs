//! Execution plan produced by [`crate::lower`] (spec §4.3).
//!
//! A `Plan` is what survives lowering: no source text, no CST nodes that
//! still need interpreting — just tagged data the runtime can build
//! operators from directly. `flowql-lang` has no knowledge of how a
//! `PipelinePlan` becomes a running pipeline; that's `flowql-runtime`'s job
//! (see `flowql_runtime::build::build_pipeline`).

use crate::expr::{Expr, ObjectProp};
use flowql_core::record::Record;
use std::time::Duration;

pub use crate::cst::CreatePolicy;

/// Satisfied by the stream registry so lowering can validate stream
/// references without `flowql-lang` depending on `flowql-engine` (spec §9
/// Design Notes: "global mutable state" — lowering only needs stream
/// *names*, passed as a trait object).
pub trait StreamNameLookup {
    fn has_stream(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorSpec {
    Count,
    Sum(Expr),
    Min(Expr),
    Max(Expr),
    Avg(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowSpec {
    Tumbling { size: u64 },
    TumblingBy { size: f64, value_fn: Expr },
    Hopping { size: u64, hop: u64 },
    HoppingBy { size: f64, hop: f64, value_fn: Expr },
    Sliding { size: u64 },
    SlidingBy { size: f64, value_fn: Expr },
    CountWindow { n: u64 },
    SessionWindow { timeout: f64, value_fn: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmitPolicySpec {
    Every { amount: f64, using: Option<Expr> },
    When(Expr),
    OnChange(Expr),
    OnGroupChange,
    OnUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeSpec {
    /// Output field name -> aggregator constructor, in textual order.
    pub fields: Vec<(String, AggregatorSpec)>,
    pub group_key: Option<Vec<Expr>>,
    /// `(window_var_name, descriptor)`; mutually exclusive with `emit`.
    pub window: Option<(String, WindowSpec)>,
    pub emit: Option<EmitPolicySpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorPlan {
    Filter(Expr),
    Select(Vec<ObjectProp>),
    Scan(Vec<crate::cst::ScanStep>),
    Summarize(SummarizeSpec),
    InsertInto(String),
    Collect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelinePlan {
    pub source: String,
    pub operators: Vec<OperatorPlan>,
    /// Every `insert_into` target, in textual order, extracted for the flow
    /// manager's sink-existence check (spec §4.9 step 3).
    pub sinks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandPlan {
    CreateStream {
        name: String,
        policy: CreatePolicy,
    },
    CreateFlow {
        name: String,
        policy: CreatePolicy,
        ttl: Option<Duration>,
        pipeline: PipelinePlan,
    },
    DeleteStream {
        name: String,
    },
    DeleteFlow {
        name: String,
    },
    Insert {
        stream: String,
        value: Record,
    },
    Flush {
        stream: String,
    },
    ListStreams,
    ListFlows,
    Info {
        name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanItem {
    Command(CommandPlan),
    Pipeline(PipelinePlan),
}
