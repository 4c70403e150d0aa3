use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix reserved for identifiers of records the persistence side has not
/// acknowledged yet. Remote identifiers never start with it.
pub const TEMP_ID_PREFIX: &str = "tmp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    pub const WHITE: Rgb = Rgb { r: 255, g: 255, b: 255 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid color {0:?}, expected #RRGGBB")]
pub struct ParseColorError(pub String);

impl FromStr for Rgb {
    type Err = ParseColorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ParseColorError(value.to_owned()));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| ParseColorError(value.to_owned()))
        };

        Ok(Self { r: channel(0..2)?, g: channel(2..4)?, b: channel(4..6)? })
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = ParseColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle. The coordinate space is whatever the owner says it
/// is: page-pixel space for stored annotations, point space at export time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bbox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bbox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Zero-sized box anchored at a point, as stored for notes.
    pub const fn at_point(x: f32, y: f32) -> Self {
        Self { x, y, width: 0.0, height: 0.0 }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self { x: self.x + dx, y: self.y + dy, ..*self }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(String);

impl AnnotationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn temporary(sequence: u64) -> Self {
        Self(format!("{TEMP_ID_PREFIX}{sequence}"))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn temporary_sequence(&self) -> Option<u64> {
        self.0.strip_prefix(TEMP_ID_PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnnotationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A persisted unit of user input.
///
/// `bbox` is in page-pixel space at `capture_scale`. Records written before the
/// capture scale was tracked carry `None` and are interpreted at the session's
/// rendering scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub page: u32,
    pub bbox: Bbox,
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub text: String,
    pub color: Rgb,
    pub opacity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Annotation {
    pub fn capture_scale_or(&self, fallback: f32) -> f32 {
        match self.capture_scale {
            Some(scale) if scale > 0.0 => scale,
            _ => fallback,
        }
    }
}

/// Provenance assigned by the persistence side when it accepts a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub id: AnnotationId,
    pub author: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Failed {
        attempts: u32,
        error: String,
    },
}

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Selection waiting for explicit confirmation. Line rectangles are
/// page-relative pixels; `anchor` is relative to the scroll container.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSelection {
    pub page: u32,
    pub text: String,
    pub line_rects: Vec<Bbox>,
    pub anchor: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PageRenderState {
    pub rendered: bool,
    pub has_text: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionMode {
    #[default]
    Cursor,
    NotePlacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPolicy {
    /// Upload alongside the original.
    #[default]
    Copy,
    /// Upload, then delete the original. Destructive.
    Replace,
}

impl FromStr for ExportPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "copy" => Ok(Self::Copy),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown export policy {other:?}, expected copy or replace")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StyleDefaults {
    pub color: Rgb,
    pub opacity: f32,
}

/// Endpoint pair for the display-time recoloring filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingColors {
    pub page: Rgb,
    pub text: Rgb,
}

impl Default for ReadingColors {
    fn default() -> Self {
        Self { page: Rgb::WHITE, text: Rgb::BLACK }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub highlight: StyleDefaults,
    pub note: StyleDefaults,
    pub reading_colors: Option<ReadingColors>,
    pub render_scale: f32,
    pub selection_settle_ms: u64,
    pub sync_max_attempts: u32,
    pub export_policy: ExportPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            highlight: StyleDefaults { color: Rgb::new(0xFF, 0xEB, 0x3B), opacity: 0.4 },
            note: StyleDefaults { color: Rgb::new(0xFF, 0xC1, 0x07), opacity: 0.9 },
            reading_colors: None,
            render_scale: 1.3,
            selection_settle_ms: 50,
            sync_max_attempts: 3,
            export_policy: ExportPolicy::Copy,
        }
    }
}

/// Fill opacity must lie in `[0, 1]`.
pub fn valid_opacity(opacity: f32) -> bool {
    (0.0..=1.0).contains(&opacity)
}

/// Render and capture scales must be finite and positive.
pub fn valid_scale(scale: f32) -> bool {
    scale.is_finite() && scale > 0.0
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidSettings {
    #[error("{field} opacity {value} is outside 0..=1")]
    Opacity { field: &'static str, value: f32 },
    #[error("render scale {0} must be a positive number")]
    RenderScale(f32),
}

impl Settings {
    /// Rejects values that would poison rendering or persisted annotations.
    pub fn validate(&self) -> Result<(), InvalidSettings> {
        for (field, style) in [("highlight", &self.highlight), ("note", &self.note)] {
            if !valid_opacity(style.opacity) {
                return Err(InvalidSettings::Opacity { field, value: style.opacity });
            }
        }
        if !valid_scale(self.render_scale) {
            return Err(InvalidSettings::RenderScale(self.render_scale));
        }
        Ok(())
    }

    pub fn defaults_for(&self, kind: AnnotationKind) -> StyleDefaults {
        match kind {
            AnnotationKind::Highlight => self.highlight,
            AnnotationKind::Note => self.note,
        }
    }
}
