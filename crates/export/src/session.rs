use crate::compile::compile;
use crate::sink::{FileRef, UploadRequest, UploadSink};
use crate::ExportError;
use doc_model::{Annotation, ExportPolicy};
use pdf_engine::DocumentEditor;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExportStage {
    Idle = 0,
    Compiling = 1,
    Uploading = 2,
    RemovingOriginal = 3,
}

impl ExportStage {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Compiling,
            2 => Self::Uploading,
            3 => Self::RemovingOriginal,
            _ => Self::Idle,
        }
    }

    pub fn is_running(self) -> bool {
        self != Self::Idle
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub original: &'a FileRef,
    pub original_bytes: &'a [u8],
    pub annotations: &'a [Annotation],
    pub session_scale: f32,
    pub policy: ExportPolicy,
    /// Must be set for [`ExportPolicy::Replace`].
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Copied { file: FileRef },
    Replaced { file: FileRef },
    /// The new file was uploaded but the original could not be removed, so
    /// both exist.
    OriginalRetained { file: FileRef, original: FileRef, error: String },
}

impl ExportOutcome {
    pub fn file(&self) -> &FileRef {
        match self {
            Self::Copied { file }
            | Self::Replaced { file }
            | Self::OriginalRetained { file, .. } => file,
        }
    }
}

/// `<stem>-annotated.pdf` alongside the original, or the original name when
/// replacing it.
pub fn output_filename(original: &str, policy: ExportPolicy) -> String {
    match policy {
        ExportPolicy::Replace => original.to_owned(),
        ExportPolicy::Copy => {
            let stem = Path::new(original)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
                .unwrap_or("document");
            format!("{stem}-annotated.pdf")
        }
    }
}

/// Runs exports for one document, at most one at a time. There is no
/// cancellation: a started export completes or fails.
#[derive(Debug, Default)]
pub struct Exporter {
    stage: AtomicU8,
}

struct StageGuard<'a>(&'a AtomicU8);

impl StageGuard<'_> {
    fn advance(&self, stage: ExportStage) {
        self.0.store(stage as u8, Ordering::Release);
    }
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.0.store(ExportStage::Idle as u8, Ordering::Release);
    }
}

impl Exporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress, for a blocking progress indicator.
    pub fn stage(&self) -> ExportStage {
        ExportStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.stage().is_running()
    }

    #[instrument(skip_all, fields(original = %request.original.name, policy = ?request.policy))]
    pub fn run<E: DocumentEditor>(
        &self,
        request: ExportRequest<'_>,
        sink: &dyn UploadSink,
    ) -> Result<ExportOutcome, ExportError> {
        if request.policy == ExportPolicy::Replace && !request.confirmed {
            return Err(ExportError::ReplaceNotConfirmed);
        }

        self.stage
            .compare_exchange(
                ExportStage::Idle as u8,
                ExportStage::Compiling as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| ExportError::AlreadyRunning)?;
        let guard = StageGuard(&self.stage);

        let bytes =
            compile::<E>(request.original_bytes, request.annotations, request.session_scale)?;

        guard.advance(ExportStage::Uploading);
        let file = sink
            .upload(UploadRequest {
                bytes,
                filename: output_filename(&request.original.name, request.policy),
                parent: request.original.parent.clone(),
                policy: request.policy,
            })
            .map_err(ExportError::Upload)?;
        info!(file = %file.name, "export uploaded");

        if request.policy == ExportPolicy::Copy {
            return Ok(ExportOutcome::Copied { file });
        }

        guard.advance(ExportStage::RemovingOriginal);
        match sink.delete(request.original) {
            Ok(()) => Ok(ExportOutcome::Replaced { file }),
            Err(err) => {
                warn!(
                    original = %request.original.name,
                    error = %err,
                    "uploaded export but original was not removed"
                );
                Ok(ExportOutcome::OriginalRetained {
                    file,
                    original: request.original.clone(),
                    error: err.to_string(),
                })
            }
        }
    }
}
