/// Affine transform `[a, b, c, d, e, f]` in PDF row-vector convention.
pub type Matrix = [f32; 6];

pub const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `lhs` applied first, then `rhs`.
pub fn multiply(lhs: &Matrix, rhs: &Matrix) -> Matrix {
    [
        lhs[0] * rhs[0] + lhs[1] * rhs[2],
        lhs[0] * rhs[1] + lhs[1] * rhs[3],
        lhs[2] * rhs[0] + lhs[3] * rhs[2],
        lhs[2] * rhs[1] + lhs[3] * rhs[3],
        lhs[4] * rhs[0] + lhs[5] * rhs[2] + rhs[4],
        lhs[4] * rhs[1] + lhs[5] * rhs[3] + rhs[5],
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// A page of an open document. `view_box` is the visible area
/// `[x0, y0, x1, y1]` in points: the CropBox clipped to the MediaBox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageHandle {
    pub number: u32,
    pub view_box: [f32; 4],
}

impl PageHandle {
    pub fn size(&self) -> PageSize {
        PageSize {
            width_pt: self.view_box[2] - self.view_box[0],
            height_pt: self.view_box[3] - self.view_box[1],
        }
    }

    pub fn viewport(&self, scale: f32) -> Viewport {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let size = self.size();

        Viewport {
            scale,
            width_px: (size.width_pt * scale).round().max(1.0) as u32,
            height_px: (size.height_pt * scale).round().max(1.0) as u32,
            origin_x: self.view_box[0],
            top_y: self.view_box[3],
        }
    }
}

/// Point-space to pixel-space mapping for one page at one scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub width_px: u32,
    pub height_px: u32,
    origin_x: f32,
    top_y: f32,
}

impl Viewport {
    /// Flips the vertical axis: point space grows upward from the bottom-left,
    /// pixel space grows downward from the top-left.
    pub fn convert_to_viewport_point(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.origin_x) * self.scale, (self.top_y - y) * self.scale)
    }

    pub fn convert_to_pdf_point(&self, vx: f32, vy: f32) -> (f32, f32) {
        (vx / self.scale + self.origin_x, self.top_y - vy / self.scale)
    }

    pub fn same_dimensions(&self, width_px: u32, height_px: u32) -> bool {
        self.width_px == width_px && self.height_px == height_px
    }
}

/// One text-showing operation with its full text-rendering transform.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub transform: Matrix,
}

impl TextRun {
    pub fn scale_x(&self) -> f32 {
        self.transform[0]
    }

    pub fn skew_x(&self) -> f32 {
        self.transform[1]
    }

    pub fn skew_y(&self) -> f32 {
        self.transform[2]
    }

    pub fn scale_y(&self) -> f32 {
        self.transform[3]
    }

    /// Baseline origin in point space.
    pub fn origin(&self) -> (f32, f32) {
        (self.transform[4], self.transform[5])
    }
}
