use crate::cancel::CancellationToken;
use crate::overlay::TextOverlay;
use crate::RenderError;
use doc_model::PageRenderState;
use pdf_engine::{DocumentHandle, PageHandle, PdfEngine, RgbaImage, Viewport};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// Surface already matches the target dimensions.
    Skipped,
}

/// Raster and selectable overlay of one page, always built from the same
/// viewport.
#[derive(Debug)]
pub struct PageRenderer {
    page: PageHandle,
    state: PageRenderState,
    surface: Option<RgbaImage>,
    overlay: TextOverlay,
    viewport: Option<Viewport>,
    token: CancellationToken,
}

impl PageRenderer {
    pub fn new(page: PageHandle) -> Self {
        Self {
            page,
            state: PageRenderState::default(),
            surface: None,
            overlay: TextOverlay::default(),
            viewport: None,
            token: CancellationToken::new(),
        }
    }

    pub fn page(&self) -> &PageHandle {
        &self.page
    }

    pub fn page_number(&self) -> u32 {
        self.page.number
    }

    pub fn state(&self) -> PageRenderState {
        self.state
    }

    pub fn surface(&self) -> Option<&RgbaImage> {
        self.surface.as_ref()
    }

    pub fn overlay(&self) -> &TextOverlay {
        &self.overlay
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    /// Handle for whoever owns the page view; cancelling it discards any
    /// in-flight or future render of this page.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.token.is_cancelled()
    }

    #[instrument(skip(self, engine), fields(page = self.page.number))]
    pub fn render(
        &mut self,
        engine: &dyn PdfEngine,
        document: DocumentHandle,
        scale: f32,
    ) -> Result<RenderOutcome, RenderError> {
        let viewport = self.page.viewport(scale);
        let page = self.page.number;

        let up_to_date = self.state.rendered
            && self
                .surface
                .as_ref()
                .is_some_and(|surface| viewport.same_dimensions(surface.width(), surface.height()));
        if up_to_date {
            debug!("surface already matches viewport, skipping");
            return Ok(RenderOutcome::Skipped);
        }

        self.ensure_active()?;
        self.invalidate();

        let raster = engine
            .render(document, &self.page, &viewport)
            .map_err(|source| RenderError::Engine { page, source })?;
        if !viewport.same_dimensions(raster.width(), raster.height()) {
            return Err(RenderError::SurfaceMismatch {
                page,
                expected: (viewport.width_px, viewport.height_px),
                actual: (raster.width(), raster.height()),
            });
        }
        self.ensure_active()?;

        let runs = engine
            .text_content(document, &self.page)
            .map_err(|source| RenderError::Engine { page, source })?;
        self.ensure_active()?;

        self.overlay = TextOverlay::build(&runs, &viewport);
        self.surface = Some(raster);
        self.viewport = Some(viewport);
        self.state = PageRenderState { rendered: true, has_text: self.overlay.has_text() };

        if !self.state.has_text {
            info!("page has no extractable text, likely scanned");
        }
        debug!(
            width = viewport.width_px,
            height = viewport.height_px,
            spans = self.overlay.len(),
            "page rendered"
        );

        Ok(RenderOutcome::Rendered)
    }

    /// Cancels outstanding work and drops the page's surfaces.
    pub fn teardown(&mut self) {
        self.token.cancel();
        self.invalidate();
    }

    fn ensure_active(&self) -> Result<(), RenderError> {
        if self.token.is_cancelled() {
            return Err(RenderError::Cancelled { page: self.page.number });
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.state = PageRenderState::default();
        self.surface = None;
        self.overlay = TextOverlay::default();
        self.viewport = None;
    }
}
