//! Baking annotations into the original document.
//!
//! Stored boxes are page pixels at their capture scale with a top-left
//! origin; the document wants points with a bottom-left origin.

use crate::ExportError;
use doc_model::{Annotation, AnnotationKind, Bbox};
use pdf_engine::{DocumentEditor, RectangleSpec};
use tracing::{debug, instrument};

/// Edge length of the exported note marker, in points.
pub const NOTE_MARKER_SIZE_PT: f32 = 20.0;

/// `(x/s, H − y/s − h/s, w/s, h/s)`
pub fn to_point_space(bbox: &Bbox, scale: f32, page_height: f32) -> Bbox {
    let scaled = bbox.scaled(1.0 / scale);
    Bbox::new(scaled.x, page_height - scaled.y - scaled.height, scaled.width, scaled.height)
}

/// Inverse of [`to_point_space`].
pub fn to_pixel_space(rect: &Bbox, scale: f32, page_height: f32) -> Bbox {
    Bbox::new(rect.x, page_height - rect.y - rect.height, rect.width, rect.height).scaled(scale)
}

/// Point-space rectangle drawn for one annotation. Notes become a fixed
/// marker whose top-left corner sits on the anchor.
pub fn rectangle_for(
    annotation: &Annotation,
    page_height: f32,
    session_scale: f32,
) -> RectangleSpec {
    let scale = annotation.capture_scale_or(session_scale);
    let rect = match annotation.kind {
        AnnotationKind::Highlight => to_point_space(&annotation.bbox, scale, page_height),
        AnnotationKind::Note => {
            let at = Bbox::at_point(annotation.bbox.x, annotation.bbox.y);
            let anchor = to_point_space(&at, scale, page_height);
            let size = NOTE_MARKER_SIZE_PT;
            Bbox::new(anchor.x, anchor.y - size, size, size)
        }
    };

    RectangleSpec {
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
        color: annotation.color.channels(),
        opacity: annotation.opacity,
    }
}

/// Loads `original` fresh, draws every annotation and returns the new
/// document. Any failure discards the whole result.
#[instrument(
    skip(original, annotations),
    fields(bytes = original.len(), annotations = annotations.len())
)]
pub fn compile<E: DocumentEditor>(
    original: &[u8],
    annotations: &[Annotation],
    session_scale: f32,
) -> Result<Vec<u8>, ExportError> {
    let mut editor = E::load(original).map_err(ExportError::Load)?;

    for annotation in annotations {
        let draw_error =
            |source| ExportError::Draw { id: annotation.id.clone(), page: annotation.page, source };

        let size = editor.page_size(annotation.page).map_err(draw_error)?;
        let rect = rectangle_for(annotation, size.height_pt, session_scale);
        editor.draw_rectangle(annotation.page, &rect).map_err(draw_error)?;
    }

    let bytes = editor.save().map_err(ExportError::Save)?;
    debug!(output = bytes.len(), "document compiled");
    Ok(bytes)
}
