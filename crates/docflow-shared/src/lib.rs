//! # docflow-shared
//!
//! Shared foundation for the docflow document-conversion service: the task
//! model, error taxonomy, configuration, the durable job-store client used
//! by the distributed engine, and the retry/logging plumbing.

pub mod config;
pub mod error;
pub mod jobstore;
pub mod logging;
pub mod resilience;
pub mod types;

pub use config::{DocflowConfig, EngineKind};
pub use error::{DocflowError, DocflowResult};
