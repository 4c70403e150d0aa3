//! Display-time recoloring of an already rendered page.
//!
//! Black ink maps to the configured text color and white paper to the page
//! color; greys interpolate linearly between them. Alpha passes through.

use doc_model::{ReadingColors, Rgb};
use image::Rgba;
use pdf_engine::RgbaImage;

/// Row-major 4×5 affine color matrix over normalized `[0, 1]` channels, in
/// the layout of an SVG `feColorMatrix`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorFilterMatrix {
    rows: [[f32; 5]; 4],
}

impl ColorFilterMatrix {
    pub const IDENTITY: Self = Self {
        rows: [
            [1.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// `scale_c = (page_c - text_c) / 255`, `offset_c = text_c / 255`.
    pub fn compile(page: Rgb, text: Rgb) -> Self {
        let mut rows = Self::IDENTITY.rows;
        let pairs = page.channels().into_iter().zip(text.channels());
        for (channel, (page_c, text_c)) in pairs.enumerate() {
            rows[channel][channel] = (f32::from(page_c) - f32::from(text_c)) / 255.0;
            rows[channel][4] = f32::from(text_c) / 255.0;
        }
        Self { rows }
    }

    pub fn from_reading_colors(colors: &ReadingColors) -> Self {
        Self::compile(colors.page, colors.text)
    }

    pub fn scale(&self, channel: usize) -> f32 {
        self.rows[channel][channel]
    }

    pub fn offset(&self, channel: usize) -> f32 {
        self.rows[channel][4]
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn apply_pixel(&self, pixel: Rgba<u8>) -> Rgba<u8> {
        let input = pixel.0.map(|channel| f32::from(channel) / 255.0);
        let mut output = [0u8; 4];

        for (slot, row) in output.iter_mut().zip(&self.rows) {
            let value = row[0] * input[0]
                + row[1] * input[1]
                + row[2] * input[2]
                + row[3] * input[3]
                + row[4];
            *slot = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }

        Rgba(output)
    }

    pub fn apply(&self, image: &mut RgbaImage) {
        if self.is_identity() {
            return;
        }
        for pixel in image.pixels_mut() {
            *pixel = self.apply_pixel(*pixel);
        }
    }
}

impl Default for ColorFilterMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Caches the compiled matrix and recompiles only when an endpoint changes.
#[derive(Debug, Clone, Default)]
pub struct ColorFilterCompiler {
    colors: Option<ReadingColors>,
    matrix: ColorFilterMatrix,
}

impl ColorFilterCompiler {
    pub fn new(colors: Option<ReadingColors>) -> Self {
        let mut compiler = Self::default();
        compiler.set_colors(colors);
        compiler
    }

    /// Returns whether the matrix was recompiled.
    pub fn set_colors(&mut self, colors: Option<ReadingColors>) -> bool {
        if self.colors == colors {
            return false;
        }

        self.matrix = colors
            .as_ref()
            .map_or(ColorFilterMatrix::IDENTITY, ColorFilterMatrix::from_reading_colors);
        self.colors = colors;
        true
    }

    pub fn matrix(&self) -> &ColorFilterMatrix {
        &self.matrix
    }
}
