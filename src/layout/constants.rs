//! Shared constants for layout and drawing (all in page pixels).

// ── Optimizer heuristic ─────────────────────────────────────────────
/// Notes a line should hold; divided by the average note density to get
/// measures per line.
pub const TARGET_NOTES_PER_LINE: f64 = 16.0;
/// Density assumed when the score has no notes to average.
pub const DEFAULT_NOTES_PER_MEASURE: f64 = 4.0;
pub const MIN_MEASURES_PER_LINE: u32 = 2;
pub const MAX_MEASURES_PER_LINE: u32 = 6;
pub const STAVE_SPACING_WITH_TAB: u32 = 200;
pub const STAVE_SPACING_NOTATION_ONLY: u32 = 150;

// ── Stave geometry ──────────────────────────────────────────────────
pub const STAFF_LINE_SPACING: f64 = 10.0; // distance between staff lines
pub const STAFF_HEIGHT: f64 = 40.0; // 5 lines, 4 spaces
pub const TAB_LINE_SPACING: f64 = 12.0; // distance between tab string lines

// ── Measure insets ──────────────────────────────────────────────────
pub const HEADER_SPACE: f64 = 56.0; // clef + time signature on the first measure
pub const NOTE_LEFT_INSET: f64 = 14.0;
pub const NOTE_RIGHT_INSET: f64 = 10.0;

// ── Pitch placement ─────────────────────────────────────────────────
/// Fretted instruments are written an octave above sounding pitch.
pub const NOTATION_TRANSPOSE: i32 = 12;
/// Written pitch on the bottom line of a treble staff (E4).
pub const TREBLE_BOTTOM_LINE_PITCH: i32 = 64;

// ── Page furniture ──────────────────────────────────────────────────
pub const TITLE_FONT_SIZE: f64 = 22.0;
pub const PAGE_NUMBER_FONT_SIZE: f64 = 10.0;
pub const FRET_FONT_SIZE: f64 = 10.0;
