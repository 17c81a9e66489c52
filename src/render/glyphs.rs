//! Glyph composition shared by every output format.
//!
//! Formats only need to provide a [`Pen`] with a handful of primitives
//! (line, ellipse, text). [`GlyphSurface`] builds staves,
//! clefs, note heads, stems, flags and ledger lines out of them, so all
//! formats draw the same picture.

use super::{NoteGlyph, StaveKind, Surface};
use crate::error::DrawError;
use crate::layout::constants::*;

// ── Glyph dimensions ────────────────────────────────────────────────
pub(super) const NOTEHEAD_RX: f64 = 5.5; // notehead ellipse x-radius
pub(super) const NOTEHEAD_RY: f64 = 4.0; // notehead ellipse y-radius
const STEM_LENGTH: f64 = 30.0;
const STEM_WIDTH: f64 = 1.2;
const FLAG_LENGTH: f64 = 10.0;
const FLAG_GAP: f64 = 6.0;
const BARLINE_WIDTH: f64 = 1.0;
const STAFF_LINE_WIDTH: f64 = 0.8;
const LEDGER_LINE_WIDTH: f64 = 0.8;
const LEDGER_LINE_EXTEND: f64 = 5.0;
const TIME_SIG_SIZE: f64 = 20.0;

/// Horizontal anchor for text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAnchor {
    Start,
    Middle,
}

/// Low-level drawing primitives for one output format.
pub trait Pen {
    fn begin_page(&mut self, number: u32) -> Result<(), DrawError>;
    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, width: f64);
    fn ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, filled: bool);
    /// `y` is the text baseline.
    fn text(&mut self, x: f64, y: f64, content: &str, size: f64, anchor: TextAnchor);
    fn end_page(&mut self) -> Result<(), DrawError>;
    fn finish(self) -> Result<Vec<u8>, DrawError>;
}

/// A [`Surface`] that composes glyphs from [`Pen`] primitives.
pub struct GlyphSurface<P> {
    pen: P,
}

impl<P: Pen> GlyphSurface<P> {
    pub fn new(pen: P) -> Self {
        Self { pen }
    }

    fn treble_clef(&mut self, x: f64, staff_y: f64) {
        // Stylized G clef: spine, curl around the G line, and a tail.
        let g_line = staff_y + 3.0 * STAFF_LINE_SPACING;
        self.pen.line(x + 8.0, staff_y - 8.0, x + 8.0, staff_y + STAFF_HEIGHT + 8.0, 1.6);
        self.pen.ellipse(x + 8.0, g_line, 7.0, 8.0, false);
        self.pen.line(x + 8.0, staff_y - 8.0, x + 13.0, staff_y + 4.0, 1.6);
        self.pen.ellipse(x + 5.0, staff_y + STAFF_HEIGHT + 8.0, 2.5, 2.5, true);
    }

    fn time_signature(&mut self, x: f64, top: f64, bottom: f64) {
        let mid = (top + bottom) / 2.0;
        self.pen.text(x, mid - 2.0, "4", TIME_SIG_SIZE, TextAnchor::Middle);
        self.pen.text(x, bottom - 2.0, "4", TIME_SIG_SIZE, TextAnchor::Middle);
    }

    fn ledger_lines(&mut self, glyph: &NoteGlyph) {
        // Staff lines sit at even steps -4..=4; ledgers continue the pattern.
        let steps = glyph.steps_from_middle;
        let half = STAFF_LINE_SPACING / 2.0;
        let (x1, x2) = (
            glyph.x - NOTEHEAD_RX - LEDGER_LINE_EXTEND,
            glyph.x + NOTEHEAD_RX + LEDGER_LINE_EXTEND,
        );
        if steps >= 6 {
            for step in (6..=steps).step_by(2) {
                let y = glyph.staff_middle - step as f64 * half;
                self.pen.line(x1, y, x2, y, LEDGER_LINE_WIDTH);
            }
        } else if steps <= -6 {
            for step in (6..=-steps).step_by(2) {
                let y = glyph.staff_middle + step as f64 * half;
                self.pen.line(x1, y, x2, y, LEDGER_LINE_WIDTH);
            }
        }
    }
}

impl<P: Pen> Surface for GlyphSurface<P> {
    fn begin_page(&mut self, number: u32) -> Result<(), DrawError> {
        self.pen.begin_page(number)
    }

    fn stave(&mut self, x: f64, y: f64, width: f64) {
        for i in 0..5 {
            let ly = y + i as f64 * STAFF_LINE_SPACING;
            self.pen.line(x, ly, x + width, ly, STAFF_LINE_WIDTH);
        }
        self.pen.line(x + width, y, x + width, y + STAFF_HEIGHT, BARLINE_WIDTH);
    }

    fn tab_stave(&mut self, x: f64, y: f64, width: f64, strings: u8) {
        let height = (strings.max(1) as f64 - 1.0) * TAB_LINE_SPACING;
        for i in 0..strings {
            let ly = y + i as f64 * TAB_LINE_SPACING;
            self.pen.line(x, ly, x + width, ly, STAFF_LINE_WIDTH);
        }
        self.pen.line(x + width, y, x + width, y + height, BARLINE_WIDTH);
    }

    fn header(&mut self, x: f64, y: f64, kind: StaveKind, strings: u8) {
        match kind {
            StaveKind::Notation => {
                self.pen.line(x, y, x, y + STAFF_HEIGHT, BARLINE_WIDTH);
                self.treble_clef(x + 6.0, y);
                self.time_signature(x + 42.0, y, y + STAFF_HEIGHT);
            }
            StaveKind::Tablature => {
                let height = (strings.max(1) as f64 - 1.0) * TAB_LINE_SPACING;
                self.pen.line(x, y, x, y + height, BARLINE_WIDTH);
                let step = height / 3.0;
                let size = step.clamp(8.0, 16.0);
                for (i, letter) in ["T", "A", "B"].iter().enumerate() {
                    let ly = y + step * (i as f64 + 1.0) - 1.0;
                    self.pen.text(x + 14.0, ly, letter, size, TextAnchor::Middle);
                }
                self.time_signature(x + 42.0, y, y + height);
            }
        }
    }

    fn note(&mut self, glyph: NoteGlyph) {
        self.ledger_lines(&glyph);
        self.pen.ellipse(glyph.x, glyph.y, NOTEHEAD_RX, NOTEHEAD_RY, glyph.duration.is_filled());

        if !glyph.duration.has_stem() {
            return;
        }
        // Notes on or above the middle line take a down stem on the left.
        let stem_up = glyph.steps_from_middle < 0;
        let (sx, dir) = if stem_up {
            (glyph.x + NOTEHEAD_RX - 0.6, -1.0)
        } else {
            (glyph.x - NOTEHEAD_RX + 0.6, 1.0)
        };
        let tip = glyph.y + dir * STEM_LENGTH;
        self.pen.line(sx, glyph.y, sx, tip, STEM_WIDTH);

        for i in 0..glyph.duration.flag_count() {
            let fy = tip - dir * i as f64 * FLAG_GAP;
            self.pen.line(sx, fy, sx + 7.0, fy - dir * FLAG_LENGTH, STEM_WIDTH * 1.5);
        }
    }

    fn fret_number(&mut self, x: f64, y: f64, fret: u8) {
        self.pen.text(x, y + FRET_FONT_SIZE * 0.35, &fret.to_string(), FRET_FONT_SIZE, TextAnchor::Middle);
    }

    fn text(&mut self, x: f64, y: f64, content: &str, size: f64) {
        self.pen.text(x, y, content, size, TextAnchor::Middle);
    }

    fn end_page(&mut self) -> Result<(), DrawError> {
        self.pen.end_page()
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, DrawError> {
        self.pen.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DurationClass;

    /// Records primitive calls instead of drawing them.
    #[derive(Default)]
    struct RecordingPen {
        lines: usize,
        ellipses: Vec<bool>,
        texts: Vec<String>,
    }

    impl Pen for RecordingPen {
        fn begin_page(&mut self, _number: u32) -> Result<(), DrawError> {
            Ok(())
        }
        fn line(&mut self, _x1: f64, _y1: f64, _x2: f64, _y2: f64, _width: f64) {
            self.lines += 1;
        }
        fn ellipse(&mut self, _cx: f64, _cy: f64, _rx: f64, _ry: f64, filled: bool) {
            self.ellipses.push(filled);
        }
        fn text(&mut self, _x: f64, _y: f64, content: &str, _size: f64, _anchor: TextAnchor) {
            self.texts.push(content.to_string());
        }
        fn end_page(&mut self) -> Result<(), DrawError> {
            Ok(())
        }
        fn finish(self) -> Result<Vec<u8>, DrawError> {
            Ok(Vec::new())
        }
    }

    fn glyph(duration: DurationClass, steps: i32) -> NoteGlyph {
        NoteGlyph { x: 100.0, y: 70.0 - steps as f64 * 5.0, duration, steps_from_middle: steps, staff_middle: 70.0 }
    }

    #[test]
    fn stave_draws_five_lines_and_a_barline() {
        let mut surface = GlyphSurface::new(RecordingPen::default());
        surface.stave(0.0, 50.0, 200.0);
        assert_eq!(surface.pen.lines, 6);
    }

    #[test]
    fn whole_note_is_hollow_without_stem() {
        let mut surface = GlyphSurface::new(RecordingPen::default());
        surface.note(glyph(DurationClass::Whole, 0));
        assert_eq!(surface.pen.ellipses, vec![false]);
        assert_eq!(surface.pen.lines, 0);
    }

    #[test]
    fn sixteenth_gets_stem_and_two_flags() {
        let mut surface = GlyphSurface::new(RecordingPen::default());
        surface.note(glyph(DurationClass::Sixteenth, 1));
        assert_eq!(surface.pen.ellipses, vec![true]);
        assert_eq!(surface.pen.lines, 3);
    }

    #[test]
    fn low_notes_get_ledger_lines() {
        let mut surface = GlyphSurface::new(RecordingPen::default());
        // Eleven steps below the middle: ledgers at -6, -8, -10.
        surface.note(glyph(DurationClass::Whole, -11));
        assert_eq!(surface.pen.lines, 3);
    }

    #[test]
    fn tab_header_spells_tab() {
        let mut surface = GlyphSurface::new(RecordingPen::default());
        surface.header(0.0, 0.0, StaveKind::Tablature, 6);
        assert_eq!(surface.pen.texts, vec!["T", "A", "B", "4", "4"]);
    }
}
