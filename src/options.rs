//! Normalized render options.
//!
//! [`RenderOptions`] is the fully defaulted form of what a caller asked
//! for. Together with the score it determines the layout and every
//! artifact byte, which is why it is also what the cache fingerprint is
//! computed over.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tab::{Tuning, DEFAULT_MAX_FRET};

// ── Defaults ────────────────────────────────────────────────────────
pub const DEFAULT_PAGE_WIDTH: u32 = 1200;
pub const DEFAULT_PAGE_HEIGHT: u32 = 1600;
pub const DEFAULT_MARGIN: u32 = 50;
pub const DEFAULT_DPI: u32 = 96;
/// Vertical distance from a notation stave to its tab stave.
pub const DEFAULT_TAB_OFFSET: u32 = 100;

// ── Accepted ranges ─────────────────────────────────────────────────
pub const WIDTH_RANGE: (i64, i64) = (100, 2000);
pub const DPI_RANGE: (i64, i64) = (72, 300);
pub const MARGIN_RANGE: (i64, i64) = (0, 500);
pub const MEASURES_PER_LINE_RANGE: (i64, i64) = (1, 16);
pub const STAVE_SPACING_RANGE: (i64, i64) = (50, 1000);
pub const TAB_OFFSET_RANGE: (i64, i64) = (0, 500);
pub const MAX_FRET_RANGE: (i64, i64) = (1, 36);

/// Artifact kinds a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Scalable vector markup (SVG)
    Vector,
    /// Raster image (PNG)
    Raster,
    /// Paginated document (PDF)
    Document,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Vector, OutputFormat::Raster, OutputFormat::Document];

    /// Parse a format name; file-type aliases are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "vector" | "svg" => Some(OutputFormat::Vector),
            "raster" | "png" => Some(OutputFormat::Raster),
            "document" | "pdf" => Some(OutputFormat::Document),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Vector => "vector",
            OutputFormat::Raster => "raster",
            OutputFormat::Document => "document",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Vector => "image/svg+xml",
            OutputFormat::Raster => "image/png",
            OutputFormat::Document => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Vector => "svg",
            OutputFormat::Raster => "png",
            OutputFormat::Document => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fully normalized options for one render.
///
/// `stave_width`, `measures_per_line` and `stave_spacing` stay optional:
/// `None` means "let the layout optimizer decide", which is itself a
/// distinct request from pinning the value the optimizer would pick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderOptions {
    pub stave_width: Option<u32>,
    pub measures_per_line: Option<u32>,
    pub stave_spacing: Option<u32>,
    pub page_width: u32,
    pub page_height: u32,
    pub margin: u32,
    pub tab_offset: u32,
    pub notation_enabled: bool,
    pub tab_enabled: bool,
    pub output_formats: BTreeSet<OutputFormat>,
    pub dpi: u32,
    pub tuning: Tuning,
    pub max_fret: u8,
    /// Optional heading drawn above the first line
    pub title: Option<String>,
}

impl RenderOptions {
    /// Whether the caller pinned both layout dimensions, which skips the
    /// optimizer entirely.
    pub fn layout_pinned(&self) -> bool {
        self.measures_per_line.is_some() && self.stave_width.is_some()
    }

    /// Usable width between the side margins.
    pub fn content_width(&self) -> u32 {
        self.page_width.saturating_sub(2 * self.margin)
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            stave_width: None,
            measures_per_line: None,
            stave_spacing: None,
            page_width: DEFAULT_PAGE_WIDTH,
            page_height: DEFAULT_PAGE_HEIGHT,
            margin: DEFAULT_MARGIN,
            tab_offset: DEFAULT_TAB_OFFSET,
            notation_enabled: true,
            tab_enabled: true,
            output_formats: BTreeSet::from([OutputFormat::Vector]),
            dpi: DEFAULT_DPI,
            tuning: Tuning::standard(),
            max_fret: DEFAULT_MAX_FRET,
            title: None,
        }
    }
}
