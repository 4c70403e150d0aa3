//! Annotation lifecycle: optimistic local records, a persistence seam and the
//! outbox that keeps the two in step.

mod outbox;
mod store;

pub use outbox::{PendingChange, SyncOperation};
pub use store::{AnnotationStore, FailedSync, StoredAnnotation, SyncReport};

use doc_model::{Annotation, AnnotationId, SaveReceipt};

/// Whose annotations, on which file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub user_id: String,
    pub file_id: String,
}

impl DocumentKey {
    pub fn new(user_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), file_id: file_id.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
    #[error("annotation {0} not found")]
    NotFound(AnnotationId),
    #[error("temporary annotation {0} cannot be deleted remotely")]
    Temporary(AnnotationId),
    #[error("persistence backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("annotation {0} not found")]
    UnknownAnnotation(AnnotationId),
    #[error("annotation {0} has no failed change to retry")]
    NotFailed(AnnotationId),
    #[error("opacity {0} is outside 0..=1")]
    InvalidOpacity(f32),
    #[error("capture scale {0} must be a positive number")]
    InvalidCaptureScale(f32),
}

/// Persistence side of the annotation store.
pub trait AnnotationRemote {
    fn load_annotations(
        &self,
        user_id: &str,
        file_id: &str,
    ) -> Result<Vec<Annotation>, RemoteError>;

    /// Stores a record and assigns its permanent id.
    fn save_annotation(
        &self,
        user_id: &str,
        file_id: &str,
        annotation: &Annotation,
    ) -> Result<SaveReceipt, RemoteError>;

    fn delete_annotation(
        &self,
        user_id: &str,
        file_id: &str,
        id: &AnnotationId,
    ) -> Result<(), RemoteError>;
}
