//! # docflow-orchestration
//!
//! The asynchronous task orchestration core of the docflow document
//! conversion service: the engine contract, the in-process and distributed
//! backends, state reconciliation against the durable job store, the
//! subscriber bus, and the HTTP surface that exposes it all.

pub mod api;
pub mod engines;
pub mod factory;
pub mod orchestrator;
pub mod pipeline;
pub mod reaper;
pub mod tracker;

pub use factory::{build_orchestrator, build_rq_orchestrator_with_store};
pub use orchestrator::{Orchestrator, ProgressStream, TaskRequest};
