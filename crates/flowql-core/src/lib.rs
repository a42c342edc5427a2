//! # FlowQL Core
//!
//! Foundational types shared by every other FlowQL crate: the [`record`]
//! model (FlowQL's JSON-like wire format), the [`error`] taxonomy, id
//! allocation ([`ids`]), duration literal parsing ([`duration`]), and the
//! `_log` stream's record shape ([`log`]).
//!
//! This crate has no async runtime dependency and no knowledge of streams,
//! flows, or pipelines — those live in `flowql-engine` and
//! `flowql-runtime`. Keeping this crate inert makes it safe for
//! `flowql-lang` (the DSL front end) to depend on it without pulling in an
//! executor.

pub mod duration;
pub mod error;
pub mod ids;
pub mod log;
pub mod record;

pub use error::{EngineError, ParseErrors, Position, Result};
pub use ids::{FlowId, IdGen, SubscriptionId};
pub use record::Record;
