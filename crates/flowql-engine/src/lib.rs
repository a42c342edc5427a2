//! Stream registry, pub/sub fabric, and flow lifecycle manager (spec §4.8,
//! §4.9).
//!
//! This is the runtime half of FlowQL: `flowql-lang` turns source text into
//! a [`flowql_lang::plan::PlanItem`], and this crate is what actually runs
//! one. [`registry::Registry`] owns the named streams and their
//! subscribers; [`flow::FlowManager`] owns the `create flow` / `delete flow`
//! lifecycle on top of it. [`Engine`] bundles the two together behind the
//! one entry point a host program (the CLI, an embedder) needs.

pub mod engine;
pub mod flow;
pub mod registry;

pub use engine::{CommandResult, Engine};
pub use flow::{FlowInfo, FlowLifecycleEvent, FlowLifecycleNotice, FlowManager, FlowStatus};
pub use registry::{LifecycleEvent, LifecycleNotice, Registry, StreamInfo};
