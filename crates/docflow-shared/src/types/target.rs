//! Delivery targets: where a task's results go once the pipeline finishes.

use serde::{Deserialize, Serialize};

use crate::types::source::S3Coordinates;

/// Where results are delivered. A submission names exactly one target; a
/// request carrying two target objects fails decoding and never reaches the
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskTarget {
    /// Results returned inline in the response body.
    InBody,
    /// Results packed into a zip archive and streamed back.
    Zip,
    /// Results uploaded to a caller-provided presigned PUT url.
    Put { url: String },
    /// Results written to an object store.
    S3(S3Coordinates),
}

impl TaskTarget {
    /// Whether this target produces file artifacts that need a scratch
    /// directory while the task runs.
    pub fn needs_scratch_dir(&self) -> bool {
        matches!(self, Self::Zip)
    }
}

impl Default for TaskTarget {
    fn default() -> Self {
        Self::InBody
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_decoding() {
        let target: TaskTarget =
            serde_json::from_value(serde_json::json!({"kind": "in_body"})).unwrap();
        assert_eq!(target, TaskTarget::InBody);

        let target: TaskTarget = serde_json::from_value(
            serde_json::json!({"kind": "put", "url": "https://bucket/upload?sig=x"}),
        )
        .unwrap();
        assert!(matches!(target, TaskTarget::Put { .. }));
    }

    #[test]
    fn test_scratch_dir_only_for_zip() {
        assert!(TaskTarget::Zip.needs_scratch_dir());
        assert!(!TaskTarget::InBody.needs_scratch_dir());
        assert!(!TaskTarget::Put {
            url: "https://x".into()
        }
        .needs_scratch_dir());
    }
}
