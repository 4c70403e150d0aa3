//! Invisible selectable text layer placed over a page raster.

use pdf_engine::{TextRun, Viewport};

/// One transparent text element of the overlay, in page-pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySpan {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub font_size: f32,
    /// Rotation in radians, `None` for upright runs.
    pub angle: Option<f32>,
}

impl OverlaySpan {
    /// Builds the span for a run whose transform is
    /// `[scale_x, skew_x, skew_y, scale_y, tx, ty]`.
    pub fn from_run(run: &TextRun, viewport: &Viewport) -> Self {
        let font_size = run.scale_y().hypot(run.skew_y()) * viewport.scale;
        let (tx, ty) = run.origin();
        let (vx, vy) = viewport.convert_to_viewport_point(tx, ty);
        let angle = run.skew_x().atan2(run.scale_x());

        Self {
            text: run.text.clone(),
            left: vx,
            top: vy - font_size,
            font_size,
            angle: (angle != 0.0).then_some(angle),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextOverlay {
    spans: Vec<OverlaySpan>,
}

impl TextOverlay {
    pub fn build(runs: &[TextRun], viewport: &Viewport) -> Self {
        Self { spans: runs.iter().map(|run| OverlaySpan::from_run(run, viewport)).collect() }
    }

    pub fn spans(&self) -> &[OverlaySpan] {
        &self.spans
    }

    pub fn has_text(&self) -> bool {
        !self.spans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Text of every span in stream order, one per line.
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|span| span.text.as_str()).collect::<Vec<_>>().join("\n")
    }
}
