//! # Domain Types
//!
//! The task model and its satellite types: sources, targets, results, and
//! progress updates. Everything here is engine-agnostic.

pub mod result;
pub mod source;
pub mod target;
pub mod task;

pub use result::{
    ChunkResult, ConversionResult, DocumentChunk, ExportedDocument, TaskResult, ZipArchive,
};
pub use source::{S3Coordinates, TaskSource};
pub use target::TaskTarget;
pub use task::{ProcessingMeta, ProgressUpdate, Task, TaskId, TaskProjection, TaskStatus, TaskType};
