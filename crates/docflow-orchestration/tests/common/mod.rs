//! Shared test harness: a scriptable pipeline standing in for the
//! conversion stack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use docflow_orchestration::pipeline::{DocumentPipeline, PipelineError, PipelineRequest};
use docflow_shared::types::{
    ChunkResult, ConversionResult, DocumentChunk, ExportedDocument, ProgressUpdate, TaskId,
};

/// Pipeline double with configurable latency, failure, and gating, plus a
/// record of the order tasks were picked up in.
pub struct MockPipeline {
    delay: Duration,
    fail_with: Option<String>,
    gate: Option<Arc<Semaphore>>,
    pub processed: Mutex<Vec<TaskId>>,
    pub cache_clears: AtomicUsize,
}

impl Default for MockPipeline {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_with: None,
            gate: None,
            processed: Mutex::new(Vec::new()),
            cache_clears: AtomicUsize::new(0),
        }
    }
}

impl MockPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    /// Hold every invocation until the test releases a permit.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn processed_order(&self) -> Vec<TaskId> {
        self.processed.lock().unwrap().clone()
    }

    async fn run_preamble(&self, request: &PipelineRequest) -> Result<(), PipelineError> {
        self.processed.lock().unwrap().push(request.task_id);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| PipelineError::new("gate closed"))?;
            permit.forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.fail_with {
            return Err(PipelineError::new(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentPipeline for MockPipeline {
    async fn convert(&self, request: PipelineRequest) -> Result<ConversionResult, PipelineError> {
        self.run_preamble(&request).await?;

        let total = request.sources.len() as u32;
        (request.progress)(ProgressUpdate::SetNumDocs { num_docs: total });

        let mut documents = Vec::new();
        for (index, source) in request.sources.iter().enumerate() {
            let filename = source.display_name();
            if let Some(dir) = &request.scratch_dir {
                std::fs::write(dir.join(format!("{filename}.md")), b"artifact")
                    .map_err(|e| PipelineError::new(format!("scratch write failed: {e}")))?;
            }
            documents.push(ExportedDocument {
                markdown: Some(format!("# Converted {filename}\n\nbody text")),
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
            processing_time: self.delay.as_secs_f64(),
        })
    }

    async fn chunk(&self, request: PipelineRequest) -> Result<ChunkResult, PipelineError> {
        self.run_preamble(&request).await?;
        let chunks = request
            .sources
            .iter()
            .map(|source| DocumentChunk {
                text: format!("chunk of {}", source.display_name()),
                filename: Some(source.display_name()),
                page: Some(1),
            })
            .collect();
        Ok(ChunkResult {
            chunks,
            processing_time: self.delay.as_secs_f64(),
        })
    }

    async fn clear_caches(&self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Convenience: a single http source submission.
pub fn http_source(url: &str) -> docflow_shared::types::TaskSource {
    docflow_shared::types::TaskSource::Http {
        url: url.to_string(),
        headers: Default::default(),
    }
}
