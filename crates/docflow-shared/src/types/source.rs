//! Input descriptors for a submission. Opaque to the orchestrator: they are
//! carried through to the conversion pipeline untouched.

use std::collections::HashMap;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{DocflowError, DocflowResult};

/// Object-store coordinates, shared by the s3 source and target kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Coordinates {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
}

fn default_verify_ssl() -> bool {
    true
}

/// One input document for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSource {
    /// An inline file payload, base64-encoded.
    File { filename: String, base64: String },
    /// A document fetched over HTTP by the pipeline.
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// A document (or prefix of documents) in an object store.
    S3(S3Coordinates),
}

impl TaskSource {
    /// Best-effort display name for the source, used in result filenames
    /// and log lines.
    pub fn display_name(&self) -> String {
        match self {
            Self::File { filename, .. } => filename.clone(),
            Self::Http { url, .. } => url
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or(url.as_str())
                .to_string(),
            Self::S3(coords) => format!(
                "s3://{}/{}",
                coords.bucket,
                coords.key_prefix.as_deref().unwrap_or("")
            ),
        }
    }

    /// Decode an inline file payload. Only meaningful for `File` sources.
    pub fn decode_file(&self) -> DocflowResult<Vec<u8>> {
        match self {
            Self::File { base64, .. } => base64::engine::general_purpose::STANDARD
                .decode(base64)
                .map_err(|e| DocflowError::invalid_request(format!("invalid base64 payload: {e}"))),
            other => Err(DocflowError::invalid_request(format!(
                "not a file source: {}",
                other.display_name()
            ))),
        }
    }
}
