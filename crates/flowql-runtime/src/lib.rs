//! Execution engine for a lowered pipeline plan (spec §4).
//!
//! A [`plan::PipelinePlan`](flowql_lang::plan::PipelinePlan) compiles to a
//! [`stage::Pipeline`] of [`stage::Stage`] trait objects via
//! [`build::build_pipeline`]. Everything in this crate is synchronous
//! within a pipeline push — there's no per-operator `tokio::spawn`/channel
//! fan-out, deliberately diverging from a naively "every stage is its own
//! task" design: a flow's stages run one record at a time, in order, on
//! whichever task calls `Pipeline::push` (spec §5 Concurrency Model). The
//! registry that owns many flows is where concurrency actually happens —
//! each flow runs independently, serialized only by its own pipeline.

pub mod build;
pub mod filter;
pub mod scan;
pub mod select;
pub mod sink;
pub mod stage;
pub mod summarize;

pub use build::build_pipeline;
pub use sink::Publisher;
pub use stage::{Pipeline, Stage};
