use doc_model::ExportPolicy;
use serde::{Deserialize, Serialize};

/// A file known to the upload side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub parent: Option<String>,
    pub policy: ExportPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file {0} not found")]
    NotFound(String),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// Where exported documents go.
pub trait UploadSink {
    fn upload(&self, request: UploadRequest) -> Result<FileRef, UploadError>;
    fn delete(&self, file: &FileRef) -> Result<(), UploadError>;
}
