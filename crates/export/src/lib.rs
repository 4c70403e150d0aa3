//! Export: stored annotations burned into the original document bytes, then
//! handed to the upload side under an explicit copy-or-replace policy.

mod compile;
mod session;
mod sink;

pub use compile::{compile, rectangle_for, to_pixel_space, to_point_space, NOTE_MARKER_SIZE_PT};
pub use session::{output_filename, ExportOutcome, ExportRequest, ExportStage, Exporter};
pub use sink::{FileRef, UploadError, UploadRequest, UploadSink};

use doc_model::AnnotationId;
use pdf_engine::PdfEngineError;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to load the original document")]
    Load(#[source] PdfEngineError),
    #[error("failed to draw annotation {id} on page {page}")]
    Draw {
        id: AnnotationId,
        page: u32,
        #[source]
        source: PdfEngineError,
    },
    #[error("failed to write the annotated document")]
    Save(#[source] PdfEngineError),
    #[error("an export of this document is already running")]
    AlreadyRunning,
    #[error("replacing the original requires explicit confirmation")]
    ReplaceNotConfirmed,
    #[error("upload failed")]
    Upload(#[source] UploadError),
}
