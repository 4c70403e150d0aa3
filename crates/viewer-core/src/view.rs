use crate::page_renderer::{PageRenderer, RenderOutcome};
use crate::queue::{prefetch_pages, RenderPriority, RenderQueue};
use crate::RenderError;
use pdf_engine::{DocumentHandle, PdfEngine};
use tracing::{debug, instrument, warn};

/// What one drain of the render queue did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    pub rendered: Vec<u32>,
    pub skipped: Vec<u32>,
    /// Page number and error message; the pages stay unrendered.
    pub failed: Vec<(u32, String)>,
}

/// Every page of one open document at one rendering scale. Pages render
/// independently; a failing page never stops the others.
#[derive(Debug)]
pub struct DocumentView {
    document: DocumentHandle,
    scale: f32,
    pages: Vec<PageRenderer>,
    queue: RenderQueue,
}

impl DocumentView {
    pub fn open(
        engine: &dyn PdfEngine,
        document: DocumentHandle,
        scale: f32,
    ) -> Result<Self, RenderError> {
        let load = |source| RenderError::Load { source };
        let page_count = engine.page_count(document).map_err(load)?;

        let mut pages = Vec::with_capacity(page_count as usize);
        for number in 1..=page_count {
            pages.push(PageRenderer::new(engine.page(document, number).map_err(load)?));
        }

        let mut queue = RenderQueue::new();
        queue.begin_generation();

        Ok(Self { document, scale: sanitize(scale), pages, queue })
    }

    pub fn document(&self) -> DocumentHandle {
        self.document
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn pages(&self) -> &[PageRenderer] {
        &self.pages
    }

    pub fn page(&self, number: u32) -> Option<&PageRenderer> {
        number.checked_sub(1).and_then(|index| self.pages.get(index as usize))
    }

    /// Returns whether the scale changed. Queued requests for the old scale
    /// are dropped; pages re-render when requested again.
    pub fn set_scale(&mut self, scale: f32) -> bool {
        let scale = sanitize(scale);
        if scale == self.scale {
            return false;
        }
        self.scale = scale;
        self.queue.begin_generation();
        true
    }

    pub fn request_all(&mut self) {
        for number in 1..=self.page_count() {
            self.queue.enqueue(number, RenderPriority::Visible);
        }
    }

    pub fn request_around(&mut self, current: u32, radius: u32) {
        if self.page(current).is_some() {
            self.queue.enqueue(current, RenderPriority::Visible);
        }
        for number in prefetch_pages(current, self.page_count(), radius) {
            self.queue.enqueue(number, RenderPriority::Prefetch);
        }
    }

    #[instrument(skip(self, engine), fields(scale = self.scale))]
    pub fn render_pending(&mut self, engine: &dyn PdfEngine) -> RenderReport {
        let mut report = RenderReport::default();
        let generation = self.queue.generation();

        while let Some(job) = self.queue.pop_next() {
            if job.generation != generation {
                continue;
            }
            let index = job.page.checked_sub(1).map(|index| index as usize);
            let Some(renderer) = index.and_then(|index| self.pages.get_mut(index)) else {
                continue;
            };

            match renderer.render(engine, self.document, self.scale) {
                Ok(RenderOutcome::Rendered) => report.rendered.push(job.page),
                Ok(RenderOutcome::Skipped) => report.skipped.push(job.page),
                Err(RenderError::Cancelled { page }) => {
                    debug!(page, "discarding render for torn down page");
                }
                Err(err) => {
                    let message = match std::error::Error::source(&err) {
                        Some(cause) => format!("{err}: {cause}"),
                        None => err.to_string(),
                    };
                    warn!(page = job.page, error = %message, "page render failed");
                    report.failed.push((job.page, message));
                }
            }
        }

        report
    }

    /// Pages rendered so far that carry no extractable text.
    pub fn image_only_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|page| page.state().rendered && !page.state().has_text)
            .map(PageRenderer::page_number)
            .collect()
    }

    pub fn teardown(&mut self) {
        for page in &mut self.pages {
            page.teardown();
        }
        self.queue.begin_generation();
    }
}

fn sanitize(scale: f32) -> f32 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}
