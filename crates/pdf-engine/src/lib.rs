use image::{ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

mod editor;
mod geometry;
mod text;

pub use editor::{DocumentEditor, EditPage, LopdfEditor, RectangleSpec};
pub use geometry::{multiply, Matrix, PageHandle, PageSize, TextRun, Viewport, IDENTITY};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

const LETTER_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("invalid rectangle on page {page}: {reason}")]
    InvalidRectangle { page: u32, reason: String },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Page-rendering side of the pipeline. Page numbers are 1-based.
pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page(&self, handle: DocumentHandle, page_number: u32) -> Result<PageHandle, PdfEngineError>;
    fn render(
        &self,
        handle: DocumentHandle,
        page: &PageHandle,
        viewport: &Viewport,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn text_content(
        &self,
        handle: DocumentHandle,
        page: &PageHandle,
    ) -> Result<Vec<TextRun>, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

#[derive(Debug)]
struct DocumentRecord {
    bytes: Vec<u8>,
    document: Document,
    pages: Vec<(ObjectId, PageHandle)>,
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(bytes: &[u8]) -> Result<(Document, Vec<(ObjectId, PageHandle)>), PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let mut pages = Vec::new();

        for (number, object_id) in doc.get_pages() {
            let view_box = page_box(&doc, object_id);
            pages.push((object_id, PageHandle { number, view_box }));
        }

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok((doc, pages))
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn page_entry(
        &self,
        handle: DocumentHandle,
        page_number: u32,
    ) -> Result<&(ObjectId, PageHandle), PdfEngineError> {
        let record = self.record(handle)?;
        page_number
            .checked_sub(1)
            .and_then(|index| record.pages.get(index as usize))
            .ok_or(PdfEngineError::PageOutOfRange {
                page: page_number,
                page_count: record.pages.len() as u32,
            })
    }

    /// Original bytes the document was opened from.
    pub fn bytes(&self, handle: DocumentHandle) -> Result<&[u8], PdfEngineError> {
        Ok(&self.record(handle)?.bytes)
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let (document, pages) = Self::parse(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, DocumentRecord { bytes, document, pages });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.pages.len() as u32)
    }

    fn page(&self, handle: DocumentHandle, page_number: u32) -> Result<PageHandle, PdfEngineError> {
        Ok(self.page_entry(handle, page_number)?.1)
    }

    /// No rasterizer ships with the lopdf backend: the surface is a blank page
    /// with a hairline frame, sized exactly like the viewport.
    fn render(
        &self,
        handle: DocumentHandle,
        page: &PageHandle,
        viewport: &Viewport,
    ) -> Result<RgbaImage, PdfEngineError> {
        self.page_entry(handle, page.number)?;

        let width = viewport.width_px.max(1);
        let height = viewport.height_px.max(1);
        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        Ok(image)
    }

    fn text_content(
        &self,
        handle: DocumentHandle,
        page: &PageHandle,
    ) -> Result<Vec<TextRun>, PdfEngineError> {
        let (object_id, _) = self.page_entry(handle, page.number)?;
        let record = self.record(handle)?;
        text::extract_runs(&record.document, *object_id)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

/// Visible area of a page: the CropBox clipped to the MediaBox, both
/// inherited through `/Parent`. Without a usable CropBox this is the MediaBox.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let media = inherited_box(doc, page_id, b"MediaBox").unwrap_or(LETTER_MEDIA_BOX);
    inherited_box(doc, page_id, b"CropBox")
        .and_then(|crop| intersect(media, crop))
        .unwrap_or(media)
}

fn intersect(a: [f32; 4], b: [f32; 4]) -> Option<[f32; 4]> {
    let clipped = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    (clipped[2] > clipped[0] && clipped[3] > clipped[1]).then_some(clipped)
}

fn inherited_box(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<[f32; 4]> {
    let mut dict = doc.get_dictionary(page_id).ok()?;

    loop {
        if let Ok(object) = dict.get(key) {
            let array = match object {
                Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
                other => other.as_array().ok()?,
            };
            if array.len() != 4 {
                return None;
            }
            let x0 = array[0].as_float().ok()?;
            let y0 = array[1].as_float().ok()?;
            let x1 = array[2].as_float().ok()?;
            let y1 = array[3].as_float().ok()?;
            return Some([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]);
        }

        let parent = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// lopdf for structure and text, pdfium for pixels.
    pub struct PdfiumEngine {
        inner: LopdfEngine,
        pdfium: Pdfium,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let local = Pdfium::pdfium_platform_library_name_at_path("./");
            let bindings = Pdfium::bind_to_library(local)
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|err| {
                    PdfEngineError::Backend(format!("failed to bind pdfium library: {err}"))
                })?;

            Ok(Self { inner: LopdfEngine::default(), pdfium: Pdfium::new(bindings) })
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            self.inner.open(source)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page(
            &self,
            handle: DocumentHandle,
            page_number: u32,
        ) -> Result<PageHandle, PdfEngineError> {
            self.inner.page(handle, page_number)
        }

        fn render(
            &self,
            handle: DocumentHandle,
            page: &PageHandle,
            viewport: &Viewport,
        ) -> Result<RgbaImage, PdfEngineError> {
            let backend = |err: PdfiumError| PdfEngineError::Backend(err.to_string());

            let bytes = self.inner.bytes(handle)?;
            let document = self.pdfium.load_pdf_from_byte_slice(bytes, None).map_err(backend)?;
            let pdf_page = document.pages().get((page.number - 1) as u16).map_err(backend)?;

            let config = PdfRenderConfig::new()
                .set_target_width(viewport.width_px as i32)
                .set_target_height(viewport.height_px as i32);
            let bitmap = pdf_page.render_with_config(&config).map_err(backend)?;

            let pixels = bitmap.as_rgba_bytes().to_vec();
            RgbaImage::from_raw(viewport.width_px, viewport.height_px, pixels)
                .ok_or_else(|| PdfEngineError::Backend("pdfium bitmap size mismatch".to_owned()))
        }

        fn text_content(
            &self,
            handle: DocumentHandle,
            page: &PageHandle,
        ) -> Result<Vec<TextRun>, PdfEngineError> {
            self.inner.text_content(handle, page)
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.inner.close(handle)
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

/// Small in-memory PDFs for tests across the workspace.
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// One page per entry; each entry lists `(x, y, text)` runs drawn with
    /// Helvetica 12pt at absolute positions. An empty entry is an image-only
    /// page.
    pub fn pdf_with_pages(pages: &[&[(f32, f32, &str)]]) -> Vec<u8> {
        build(pages, None)
    }

    /// Like [`pdf_with_pages`], with a CropBox on the page tree root that
    /// every page inherits.
    pub fn pdf_with_crop_box(crop_box: [f32; 4], pages: &[&[(f32, f32, &str)]]) -> Vec<u8> {
        build(pages, Some(crop_box))
    }

    fn build(pages: &[&[(f32, f32, &str)]], crop_box: Option<[f32; 4]>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for runs in pages {
            let mut operations = Vec::new();
            for (x, y, text) in runs.iter() {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
                operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
                operations.push(Operation::new("ET", vec![]));
            }
            let content = Content { operations };
            let bytes = content.encode().unwrap_or_default();
            let content_id = doc.add_object(Stream::new(dictionary! {}, bytes));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        let mut tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        if let Some(crop_box) = crop_box {
            let corners: Vec<Object> = crop_box.iter().map(|value| Object::Real(*value)).collect();
            tree.set("CropBox", corners);
        }
        doc.objects.insert(pages_id, Object::Dictionary(tree));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap_or_default();
        buffer
    }

    pub fn single_page_pdf() -> Vec<u8> {
        pdf_with_pages(&[&[(72.0, 700.0, "Hello"), (72.0, 680.0, "World")]])
    }
}
