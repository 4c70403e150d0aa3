//! Point-space document mutation.
//!
//! Rectangles are buffered per page and written out on `save` as one extra
//! content stream per page, wrapped so the existing page content cannot leak
//! graphics state into the overlay.

use crate::geometry::PageSize;
use crate::{page_box, PdfEngineError};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use tracing::debug;

const GRAPHICS_STATE_PREFIX: &str = "MgA";

/// One page of a document opened for editing. `number` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditPage {
    pub number: u32,
    pub size: PageSize,
}

/// Filled rectangle in point space, bottom-left origin, relative to the
/// lower-left corner of the page's visible area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectangleSpec {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub color: [u8; 3],
    pub opacity: f32,
}

/// Document-mutation side of the pipeline.
pub trait DocumentEditor: Sized {
    fn load(bytes: &[u8]) -> Result<Self, PdfEngineError>;
    fn pages(&self) -> Vec<EditPage>;
    fn page_size(&self, page_number: u32) -> Result<PageSize, PdfEngineError>;
    fn draw_rectangle(
        &mut self,
        page_number: u32,
        rect: &RectangleSpec,
    ) -> Result<(), PdfEngineError>;
    fn save(self) -> Result<Vec<u8>, PdfEngineError>;
}

#[derive(Debug, Default)]
struct PageOverlay {
    operations: Vec<Operation>,
    /// Graphics state name and the opacity it sets.
    states: Vec<(String, f32)>,
}

#[derive(Debug)]
pub struct LopdfEditor {
    document: Document,
    pages: Vec<(ObjectId, [f32; 4])>,
    overlays: BTreeMap<u32, PageOverlay>,
}

impl LopdfEditor {
    fn page_entry(&self, page_number: u32) -> Result<(ObjectId, [f32; 4]), PdfEngineError> {
        page_number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .copied()
            .ok_or(PdfEngineError::PageOutOfRange {
                page: page_number,
                page_count: self.pages.len() as u32,
            })
    }

    fn graphics_state_for(&mut self, page_number: u32, page_id: ObjectId, opacity: f32) -> String {
        let existing = ext_g_states(&self.document, page_id).unwrap_or_default();
        let overlay = self.overlays.entry(page_number).or_default();

        if let Some((name, _)) = overlay.states.iter().find(|(_, value)| *value == opacity) {
            return name.clone();
        }

        let mut index = overlay.states.len();
        let name = loop {
            let candidate = format!("{GRAPHICS_STATE_PREFIX}{index}");
            if !existing.has(candidate.as_bytes())
                && overlay.states.iter().all(|(name, _)| *name != candidate)
            {
                break candidate;
            }
            index += 1;
        };
        overlay.states.push((name.clone(), opacity));
        name
    }

    fn flush_page(
        &mut self,
        page_id: ObjectId,
        overlay: PageOverlay,
    ) -> Result<(), PdfEngineError> {
        let mut resources = resolved_resources(&self.document, page_id)?;
        let mut states = ext_g_states(&self.document, page_id)?;
        for (name, opacity) in &overlay.states {
            states.set(
                name.as_bytes(),
                dictionary! {
                    "Type" => "ExtGState",
                    "ca" => *opacity,
                    "CA" => *opacity,
                },
            );
        }
        resources.set("ExtGState", Object::Dictionary(states));

        let existing = match self.document.get_dictionary(page_id)?.get(b"Contents") {
            Ok(Object::Reference(id)) => vec![Object::Reference(*id)],
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut body = Content { operations: overlay.operations }.encode()?;
        let mut contents = Vec::with_capacity(existing.len() + 2);
        if existing.is_empty() {
            contents.push(self.document.add_object(Stream::new(dictionary! {}, body)).into());
        } else {
            let mut closing = b"\nQ\n".to_vec();
            closing.append(&mut body);
            let opening = Stream::new(dictionary! {}, b"q\n".to_vec());
            contents.push(self.document.add_object(opening).into());
            contents.extend(existing);
            contents.push(self.document.add_object(Stream::new(dictionary! {}, closing)).into());
        }

        let page = self.document.get_object_mut(page_id)?.as_dict_mut()?;
        page.set("Resources", Object::Dictionary(resources));
        page.set("Contents", Object::Array(contents));

        Ok(())
    }
}

impl DocumentEditor for LopdfEditor {
    fn load(bytes: &[u8]) -> Result<Self, PdfEngineError> {
        let document = Document::load_mem(bytes)?;
        let pages: Vec<_> = document
            .get_pages()
            .into_values()
            .map(|page_id| (page_id, page_box(&document, page_id)))
            .collect();

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(Self { document, pages, overlays: BTreeMap::new() })
    }

    fn pages(&self) -> Vec<EditPage> {
        self.pages
            .iter()
            .enumerate()
            .map(|(index, (_, view_box))| EditPage {
                number: index as u32 + 1,
                size: size_of(view_box),
            })
            .collect()
    }

    fn page_size(&self, page_number: u32) -> Result<PageSize, PdfEngineError> {
        let (_, view_box) = self.page_entry(page_number)?;
        Ok(size_of(&view_box))
    }

    fn draw_rectangle(
        &mut self,
        page_number: u32,
        rect: &RectangleSpec,
    ) -> Result<(), PdfEngineError> {
        let (page_id, view_box) = self.page_entry(page_number)?;

        let finite = [rect.x, rect.y, rect.width, rect.height, rect.opacity]
            .iter()
            .all(|value| value.is_finite());
        if !finite {
            return Err(PdfEngineError::InvalidRectangle {
                page: page_number,
                reason: "non-finite geometry".to_owned(),
            });
        }
        if rect.width < 0.0 || rect.height < 0.0 {
            return Err(PdfEngineError::InvalidRectangle {
                page: page_number,
                reason: format!("negative size {}x{}", rect.width, rect.height),
            });
        }

        let opacity = rect.opacity.clamp(0.0, 1.0);
        let state = self.graphics_state_for(page_number, page_id, opacity);
        let [r, g, b] = rect.color.map(|channel| f32::from(channel) / 255.0);

        let overlay = self.overlays.entry(page_number).or_default();
        overlay.operations.extend([
            Operation::new("q", vec![]),
            Operation::new("gs", vec![Object::Name(state.into_bytes())]),
            Operation::new("rg", vec![r.into(), g.into(), b.into()]),
            Operation::new(
                "re",
                vec![
                    (rect.x + view_box[0]).into(),
                    (rect.y + view_box[1]).into(),
                    rect.width.into(),
                    rect.height.into(),
                ],
            ),
            Operation::new("f", vec![]),
            Operation::new("Q", vec![]),
        ]);

        Ok(())
    }

    fn save(mut self) -> Result<Vec<u8>, PdfEngineError> {
        let overlays = std::mem::take(&mut self.overlays);
        for (page_number, overlay) in overlays {
            let (page_id, _) = self.page_entry(page_number)?;
            debug!(page = page_number, states = overlay.states.len(), "writing page overlay");
            self.flush_page(page_id, overlay)?;
        }

        let mut buffer = Vec::new();
        self.document.save_to(&mut buffer)?;
        Ok(buffer)
    }
}

fn size_of(view_box: &[f32; 4]) -> PageSize {
    PageSize { width_pt: view_box[2] - view_box[0], height_pt: view_box[3] - view_box[1] }
}

/// Resources of a page, inline or by reference, inherited through `/Parent`.
fn resolved_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, PdfEngineError> {
    let mut node = doc.get_dictionary(page_id)?;

    loop {
        match node.get(b"Resources") {
            Ok(Object::Dictionary(inline)) => return Ok(inline.clone()),
            Ok(Object::Reference(id)) => return Ok(doc.get_dictionary(*id)?.clone()),
            _ => {}
        }

        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => node = doc.get_dictionary(parent)?,
            Err(_) => return Ok(Dictionary::new()),
        }
    }
}

fn ext_g_states(doc: &Document, page_id: ObjectId) -> Result<Dictionary, PdfEngineError> {
    let resources = resolved_resources(doc, page_id)?;
    Ok(match resources.get(b"ExtGState") {
        Ok(Object::Dictionary(states)) => states.clone(),
        Ok(Object::Reference(id)) => doc.get_dictionary(*id)?.clone(),
        _ => Dictionary::new(),
    })
}
