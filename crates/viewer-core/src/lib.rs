//! Viewing pipeline: page rasters with their selectable text overlays,
//! selection tracking, annotation display and the reading-mode color filter.

mod annotation_layer;
mod cancel;
mod color_filter;
mod overlay;
mod page_renderer;
mod queue;
mod selection;
mod view;

pub use annotation_layer::{composite, marks_for_page, AnnotationMark, NOTE_MARKER_SIZE};
pub use cancel::CancellationToken;
pub use color_filter::{ColorFilterCompiler, ColorFilterMatrix};
pub use overlay::{OverlaySpan, TextOverlay};
pub use page_renderer::{PageRenderer, RenderOutcome};
pub use queue::{prefetch_pages, RenderJob, RenderPriority, RenderQueue};
pub use selection::{
    ElementRole, EventTarget, ReleaseEvent, ReleaseKind, ScrollContainer, SelectionPort,
    SelectionSnapshot, SelectionState, SelectionTracker,
};
pub use view::{DocumentView, RenderReport};

use pdf_engine::PdfEngineError;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to load document")]
    Load {
        #[source]
        source: PdfEngineError,
    },
    #[error("failed to render page {page}")]
    Engine {
        page: u32,
        #[source]
        source: PdfEngineError,
    },
    #[error("page {page}: raster is {actual:?}, viewport expects {expected:?}")]
    SurfaceMismatch { page: u32, expected: (u32, u32), actual: (u32, u32) },
    #[error("render of page {page} cancelled")]
    Cancelled { page: u32 },
}
