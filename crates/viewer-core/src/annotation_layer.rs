use doc_model::{Annotation, AnnotationId, AnnotationKind, Bbox, Rgb};
use image::Rgba;
use pdf_engine::RgbaImage;

/// Edge length of the note call-out marker in pixels at scale 1.
pub const NOTE_MARKER_SIZE: f32 = 20.0;

/// An annotation placed for display at the current rendering scale.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationMark {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub rect: Bbox,
    pub color: Rgb,
    pub opacity: f32,
}

/// Marks for one page in store order. Each bbox is rescaled from the scale it
/// was captured at; records without a capture scale are taken at
/// `fallback_capture_scale`.
pub fn marks_for_page<'a>(
    annotations: impl IntoIterator<Item = &'a Annotation>,
    page: u32,
    scale: f32,
    fallback_capture_scale: f32,
) -> Vec<AnnotationMark> {
    annotations
        .into_iter()
        .filter(|annotation| annotation.page == page)
        .map(|annotation| {
            let factor = scale / annotation.capture_scale_or(fallback_capture_scale);
            let rect = match annotation.kind {
                AnnotationKind::Highlight => annotation.bbox.scaled(factor),
                AnnotationKind::Note => {
                    let anchor = annotation.bbox.scaled(factor);
                    let size = NOTE_MARKER_SIZE * scale;
                    Bbox::new(anchor.x, anchor.y, size, size)
                }
            };

            AnnotationMark {
                id: annotation.id.clone(),
                kind: annotation.kind,
                rect,
                color: annotation.color,
                opacity: annotation.opacity,
            }
        })
        .collect()
}

/// Alpha-blends marks onto a rendered page, later marks on top.
pub fn composite(image: &mut RgbaImage, marks: &[AnnotationMark]) {
    let (width, height) = image.dimensions();

    for mark in marks {
        let alpha = mark.opacity.clamp(0.0, 1.0);
        let x0 = mark.rect.x.max(0.0).floor() as u32;
        let y0 = mark.rect.y.max(0.0).floor() as u32;
        let x1 = (mark.rect.right().ceil().max(0.0) as u32).min(width);
        let y1 = (mark.rect.bottom().ceil().max(0.0) as u32).min(height);
        let color = mark.color.channels();

        for y in y0..y1 {
            for x in x0..x1 {
                let pixel = image.get_pixel_mut(x, y);
                let Rgba([r, g, b, a]) = *pixel;
                let blend = |under: u8, over: u8| {
                    (f32::from(under) * (1.0 - alpha) + f32::from(over) * alpha).round() as u8
                };
                *pixel = Rgba([blend(r, color[0]), blend(g, color[1]), blend(b, color[2]), a]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(
        id: &str,
        page: u32,
        kind: AnnotationKind,
        bbox: Bbox,
        capture: Option<f32>,
    ) -> Annotation {
        Annotation {
            id: AnnotationId::new(id),
            page,
            bbox,
            kind,
            text: "t".to_owned(),
            color: Rgb::new(255, 0, 0),
            opacity: 0.5,
            capture_scale: capture,
            author: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn highlight(bbox: Bbox, capture: Option<f32>) -> Annotation {
        annotation("h", 1, AnnotationKind::Highlight, bbox, capture)
    }

    #[test]
    fn marks_keep_store_order_and_filter_by_page() {
        let store = vec![
            annotation("b", 1, AnnotationKind::Highlight, Bbox::new(0.0, 0.0, 1.0, 1.0), Some(1.0)),
            annotation("x", 2, AnnotationKind::Highlight, Bbox::new(0.0, 0.0, 1.0, 1.0), Some(1.0)),
            annotation("a", 1, AnnotationKind::Highlight, Bbox::new(0.0, 0.0, 1.0, 1.0), Some(1.0)),
        ];

        let ids: Vec<String> = marks_for_page(&store, 1, 1.0, 1.0)
            .into_iter()
            .map(|mark| mark.id.to_string())
            .collect();

        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn highlight_rescales_from_capture_scale() {
        let store = [highlight(Bbox::new(130.0, 65.0, 260.0, 26.0), Some(2.0))];

        let marks = marks_for_page(&store, 1, 1.0, 1.3);

        assert_eq!(marks[0].rect, Bbox::new(65.0, 32.5, 130.0, 13.0));
    }

    #[test]
    fn legacy_record_uses_fallback_scale() {
        let store = [highlight(Bbox::new(10.0, 10.0, 10.0, 10.0), None)];

        let marks = marks_for_page(&store, 1, 2.0, 1.0);

        assert_eq!(marks[0].rect, Bbox::new(20.0, 20.0, 20.0, 20.0));
    }

    #[test]
    fn note_becomes_fixed_size_marker_at_anchor() {
        let store =
            [annotation("n", 1, AnnotationKind::Note, Bbox::at_point(50.0, 40.0), Some(1.0))];

        let marks = marks_for_page(&store, 1, 1.5, 1.0);

        assert_eq!(marks[0].rect, Bbox::new(75.0, 60.0, 30.0, 30.0));
    }

    #[test]
    fn composite_blends_inside_rect_only() {
        let mut image = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        let marks =
            marks_for_page(&[highlight(Bbox::new(1.0, 1.0, 2.0, 2.0), Some(1.0))], 1, 1.0, 1.0);

        composite(&mut image, &marks);

        assert_eq!(*image.get_pixel(1, 1), Rgba([255, 128, 128, 255]));
        assert_eq!(*image.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*image.get_pixel(3, 3), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn composite_clips_to_image_bounds() {
        let mut image = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let marks =
            marks_for_page(&[highlight(Bbox::new(-5.0, -5.0, 50.0, 50.0), Some(1.0))], 1, 1.0, 1.0);

        composite(&mut image, &marks);

        assert_eq!(*image.get_pixel(1, 1), Rgba([128, 0, 0, 255]));
    }
}
