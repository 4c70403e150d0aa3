//! Text runs from a page content stream.
//!
//! Tracks the graphics and text state operators needed to place each
//! text-showing operation. Glyph widths are not read from font programs, so
//! the pen advance after a run is approximated from the character count.

use crate::geometry::{multiply, Matrix, TextRun, IDENTITY};
use crate::PdfEngineError;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use tracing::debug;

/// Average advance of one glyph in text space units.
const APPROX_GLYPH_ADVANCE: f32 = 0.5;

#[derive(Debug, Clone)]
struct TextState {
    matrix: Matrix,
    line_matrix: Matrix,
    font_size: f32,
    leading: f32,
    rise: f32,
    horizontal_scale: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            matrix: IDENTITY,
            line_matrix: IDENTITY,
            font_size: 0.0,
            leading: 0.0,
            rise: 0.0,
            horizontal_scale: 1.0,
        }
    }
}

impl TextState {
    fn begin(&mut self) {
        self.matrix = IDENTITY;
        self.line_matrix = IDENTITY;
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = multiply(&[1.0, 0.0, 0.0, 1.0, tx, ty], &self.line_matrix);
        self.matrix = self.line_matrix;
    }

    fn set_matrix(&mut self, matrix: Matrix) {
        self.matrix = matrix;
        self.line_matrix = matrix;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn rendering_matrix(&self, ctm: &Matrix) -> Matrix {
        let local = [
            self.font_size * self.horizontal_scale,
            0.0,
            0.0,
            self.font_size,
            0.0,
            self.rise,
        ];
        multiply(&multiply(&local, &self.matrix), ctm)
    }

    fn advance(&mut self, glyphs: usize, adjustment: f32) {
        let tx = (glyphs as f32 * APPROX_GLYPH_ADVANCE * self.font_size - adjustment / 1000.0
            * self.font_size)
            * self.horizontal_scale;
        self.matrix = multiply(&[1.0, 0.0, 0.0, 1.0, tx, 0.0], &self.matrix);
    }
}

pub(crate) fn extract_runs(
    doc: &Document,
    page_id: ObjectId,
) -> Result<Vec<TextRun>, PdfEngineError> {
    let bytes = doc.get_page_content(page_id)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let content = Content::decode(&bytes)?;
    let runs = runs_from_operations(&content.operations);
    debug!(?page_id, runs = runs.len(), "extracted text runs");

    Ok(runs)
}

pub(crate) fn runs_from_operations(operations: &[Operation]) -> Vec<TextRun> {
    let mut runs = Vec::new();
    let mut ctm = IDENTITY;
    let mut ctm_stack = Vec::new();
    let mut state = TextState::default();

    for operation in operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "q" => ctm_stack.push(ctm),
            "Q" => ctm = ctm_stack.pop().unwrap_or(IDENTITY),
            "cm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    ctm = multiply(&matrix, &ctm);
                }
            }
            "BT" => state.begin(),
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    state.leading = leading;
                }
            }
            "Ts" => {
                if let Some(rise) = operands.first().and_then(number) {
                    state.rise = rise;
                }
            }
            "Tz" => {
                if let Some(scale) = operands.first().and_then(number) {
                    state.horizontal_scale = scale / 100.0;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) =
                    (operands.first().and_then(number), operands.get(1).and_then(number))
                {
                    if operation.operator == "TD" {
                        state.leading = -ty;
                    }
                    state.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    state.set_matrix(matrix);
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(decode_string) {
                    emit(&mut runs, &mut state, &ctm, text, 0.0);
                }
            }
            "'" => {
                state.next_line();
                if let Some(text) = operands.first().and_then(decode_string) {
                    emit(&mut runs, &mut state, &ctm, text, 0.0);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(text) = operands.get(2).and_then(decode_string) {
                    emit(&mut runs, &mut state, &ctm, text, 0.0);
                }
            }
            "TJ" => {
                let Some(Object::Array(items)) = operands.first() else {
                    continue;
                };
                let mut text = String::new();
                let mut adjustment = 0.0;
                for item in items {
                    match item {
                        Object::String(..) => {
                            if let Some(part) = decode_string(item) {
                                text.push_str(&part);
                            }
                        }
                        other => adjustment += number(other).unwrap_or(0.0),
                    }
                }
                emit(&mut runs, &mut state, &ctm, text, adjustment);
            }
            _ => {}
        }
    }

    runs
}

fn emit(
    runs: &mut Vec<TextRun>,
    state: &mut TextState,
    ctm: &Matrix,
    text: String,
    adjustment: f32,
) {
    let glyphs = text.chars().count();
    if glyphs > 0 {
        runs.push(TextRun { text, transform: state.rendering_matrix(ctm) });
    }
    state.advance(glyphs, adjustment);
}

fn number(object: &Object) -> Option<f32> {
    object.as_float().ok()
}

fn matrix_operand(operands: &[Object]) -> Option<Matrix> {
    if operands.len() != 6 {
        return None;
    }

    let mut matrix = IDENTITY;
    for (slot, operand) in matrix.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(matrix)
}

/// UTF-16BE when the string carries a byte-order mark, one byte per char
/// otherwise.
fn decode_string(object: &Object) -> Option<String> {
    let Object::String(bytes, _) = object else {
        return None;
    };

    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> =
            utf16.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
        return Some(String::from_utf16_lossy(&units));
    }

    Some(bytes.iter().map(|&byte| byte as char).collect())
}
