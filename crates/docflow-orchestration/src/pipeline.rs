//! # Pipeline Seam
//!
//! The conversion pipeline is an external collaborator: the orchestrator
//! only ever sees it as a pure function from sources and options to a
//! result. This module defines that seam plus the request envelope workers
//! hand across it.
//!
//! Cancellation is cooperative: the request carries a token the worker
//! cancels when the task's deadline passes or the task is deleted, and the
//! pipeline is expected to observe it at its next checkpoint.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use docflow_shared::types::{
    ChunkResult, ConversionResult, ProgressUpdate, TaskId, TaskSource,
};

/// Error returned by a pipeline invocation. The message becomes the task's
/// `error_message` verbatim.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PipelineError(pub String);

impl PipelineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Hook for coarse progress reports while a task runs.
pub type ProgressHook = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// A hook that drops every report.
pub fn noop_progress() -> ProgressHook {
    Arc::new(|_| {})
}

/// Everything a pipeline invocation needs for one task.
pub struct PipelineRequest {
    pub task_id: TaskId,
    pub sources: Vec<TaskSource>,
    /// Opaque pipeline configuration, preserved bit-for-bit from the
    /// submission.
    pub options: serde_json::Value,
    /// Task-private directory for intermediate artifacts, when the delivery
    /// target needs one.
    pub scratch_dir: Option<PathBuf>,
    pub progress: ProgressHook,
    pub cancel: CancellationToken,
}

/// The document conversion pipeline, as the orchestrator consumes it.
#[async_trait]
pub trait DocumentPipeline: Send + Sync {
    /// Convert every source into exported documents.
    async fn convert(&self, request: PipelineRequest) -> Result<ConversionResult, PipelineError>;

    /// Chunk every source into retrieval-sized text chunks.
    async fn chunk(&self, request: PipelineRequest) -> Result<ChunkResult, PipelineError>;

    /// Drop any warmed converter caches. Orchestrator state is unaffected.
    async fn clear_caches(&self);
}

pub mod echo {
    //! A trivial pipeline backend that echoes source names back as stub
    //! documents. Default backend of the `docflow-server` binary so the
    //! orchestration layer can be run and exercised without a conversion
    //! stack; real deployments supply their own [`DocumentPipeline`].

    use super::*;
    use docflow_shared::types::{DocumentChunk, ExportedDocument, ProgressUpdate};

    #[derive(Debug, Default)]
    pub struct EchoPipeline;

    #[async_trait]
    impl DocumentPipeline for EchoPipeline {
        async fn convert(
            &self,
            request: PipelineRequest,
        ) -> Result<ConversionResult, PipelineError> {
            let total = request.sources.len() as u32;
            (request.progress)(ProgressUpdate::SetNumDocs { num_docs: total });

            let mut documents = Vec::with_capacity(request.sources.len());
            for (index, source) in request.sources.iter().enumerate() {
                let filename = source.display_name();
                documents.push(ExportedDocument {
                    markdown: Some(format!("# {filename}\n\n(echo backend, no converter configured)")),
                    filename,
                    ..Default::default()
                });
                (request.progress)(ProgressUpdate::UpdateProcessed {
                    num_processed: index as u32 + 1,
                    num_succeeded: index as u32 + 1,
                    num_failed: 0,
                });
            }

            Ok(ConversionResult {
                documents,
                processing_time: 0.0,
            })
        }

        async fn chunk(&self, request: PipelineRequest) -> Result<ChunkResult, PipelineError> {
            let chunks = request
                .sources
                .iter()
                .map(|source| DocumentChunk {
                    text: format!("(echo backend) {}", source.display_name()),
                    filename: Some(source.display_name()),
                    page: None,
                })
                .collect();
            Ok(ChunkResult {
                chunks,
                processing_time: 0.0,
            })
        }

        async fn clear_caches(&self) {}
    }
}
