//! Engine backends implementing the [`crate::orchestrator::Orchestrator`]
//! contract: the in-process local pool and the distributed job-store client.

pub mod local;
pub mod rq;
