//! Delivered results. The orchestrator treats these as opaque payloads: it
//! stores, hands out, and evicts them, but never inspects their content
//! beyond serialization.

use serde::{Deserialize, Serialize};

/// One exported document produced by a convert task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportedDocument {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

/// Result payload of a convert task delivered in-body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionResult {
    pub documents: Vec<ExportedDocument>,
    #[serde(default)]
    pub processing_time: f64,
}

/// One text chunk produced by a chunk task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Result payload of a chunk task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunks: Vec<DocumentChunk>,
    #[serde(default)]
    pub processing_time: f64,
}

/// Archive payload for zip-target tasks: the packed bytes, base64-encoded
/// for the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZipArchive {
    pub filename: String,
    pub base64: String,
}

/// The delivered result of a terminal-success task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    Convert(ConversionResult),
    Chunk(ChunkResult),
    ZipArchive(ZipArchive),
}

impl TaskResult {
    /// Number of documents represented in this result, used to finalize
    /// progress counters when a pipeline reported none.
    pub fn document_count(&self) -> u32 {
        match self {
            Self::Convert(result) => result.documents.len() as u32,
            Self::Chunk(_) => 1,
            Self::ZipArchive(_) => 1,
        }
    }
}
