//! Render orchestration — draws a layout plan once per requested format.
//!
//! The orchestrator owns every coordinate decision: it walks the shared
//! [`LayoutPlan`], positions note heads and fret numbers, and hands
//! absolute page coordinates to a drawing [`Surface`]. Each format gets a
//! fresh surface, so nothing drawn for one format can leak into another,
//! and a format that fails is reported without discarding the others.

mod document;
mod glyphs;
mod raster;
mod svg_builder;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::envelope::UnmappedNote;
use crate::error::{DrawError, RenderError};
use crate::layout::constants::*;
use crate::layout::{LayoutPlan, Page};
use crate::model::{DurationClass, Measure, Score};
use crate::options::{OutputFormat, RenderOptions};
use crate::tab::TabMapper;

pub use document::DocumentPen;
pub use glyphs::{GlyphSurface, Pen, TextAnchor};
pub use raster::{encode_png, GrayImage, RasterPen, MAX_RASTER_PIXELS};
pub use svg_builder::SvgBuilder;

// ═══════════════════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════════════════

/// Shared flag for best-effort cancellation. Checked between pages and
/// formats, and before a finished result is cached.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Drawing collaborator
// ═══════════════════════════════════════════════════════════════════════

/// Page-level facts a surface needs up front.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pub page_width: f64,
    pub page_height: f64,
    pub page_count: u32,
    pub dpi: u32,
}

/// Which stave a header is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaveKind {
    Notation,
    Tablature,
}

/// A positioned note for the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteGlyph {
    pub x: f64,
    pub y: f64,
    pub duration: DurationClass,
    /// Diatonic steps above (positive) or below the middle staff line.
    /// Stem direction and ledger lines are the surface's decision.
    pub steps_from_middle: i32,
    /// Y of the middle staff line
    pub staff_middle: f64,
}

/// One format's drawing context. Every coordinate is absolute within the
/// current page; the surface makes no layout decisions.
pub trait Surface {
    fn begin_page(&mut self, number: u32) -> Result<(), DrawError>;
    fn stave(&mut self, x: f64, y: f64, width: f64);
    fn tab_stave(&mut self, x: f64, y: f64, width: f64, strings: u8);
    fn header(&mut self, x: f64, y: f64, kind: StaveKind, strings: u8);
    fn note(&mut self, glyph: NoteGlyph);
    fn fret_number(&mut self, x: f64, y: f64, fret: u8);
    fn text(&mut self, x: f64, y: f64, content: &str, size: f64);
    fn end_page(&mut self) -> Result<(), DrawError>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>, DrawError>;
}

/// Factory for per-format surfaces.
pub trait DrawingBackend: Send + Sync {
    fn surface(&self, format: OutputFormat, canvas: &Canvas) -> Result<Box<dyn Surface>, DrawError>;
}

/// The bundled backend: SVG, grayscale PNG and PDF.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinBackend;

impl DrawingBackend for BuiltinBackend {
    fn surface(&self, format: OutputFormat, canvas: &Canvas) -> Result<Box<dyn Surface>, DrawError> {
        let surface: Box<dyn Surface> = match format {
            OutputFormat::Vector => Box::new(GlyphSurface::new(SvgBuilder::for_canvas(canvas))),
            OutputFormat::Raster => Box::new(GlyphSurface::new(RasterPen::for_canvas(canvas)?)),
            OutputFormat::Document => Box::new(GlyphSurface::new(DocumentPen::for_canvas(canvas))),
        };
        Ok(surface)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════

/// What a render produced: artifacts for the formats that succeeded and
/// a reason for each one that did not.
#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    pub artifacts: BTreeMap<OutputFormat, Vec<u8>>,
    pub failed: BTreeMap<OutputFormat, String>,
    pub unmapped: Vec<UnmappedNote>,
}

pub struct RenderOrchestrator {
    backend: Arc<dyn DrawingBackend>,
}

impl RenderOrchestrator {
    pub fn new(backend: Arc<dyn DrawingBackend>) -> Self {
        Self { backend }
    }

    /// Draw `plan` in every requested format.
    ///
    /// Fails only when every format failed, the plan is empty, or the
    /// token was cancelled.
    pub fn render(
        &self,
        plan: &LayoutPlan,
        score: &Score,
        options: &RenderOptions,
        cancel: &CancelToken,
    ) -> Result<RenderOutcome, RenderError> {
        if plan.is_empty() {
            return Err(RenderError::EmptyLayout);
        }

        let mapper = TabMapper::new(options.tuning.clone(), options.max_fret);
        let canvas = Canvas {
            page_width: plan.page_width as f64,
            page_height: plan.page_height as f64,
            page_count: plan.page_count() as u32,
            dpi: options.dpi,
        };

        let mut outcome = RenderOutcome {
            unmapped: if options.tab_enabled { collect_unmapped(score, &mapper) } else { Vec::new() },
            ..RenderOutcome::default()
        };

        for &format in &options.output_formats {
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            match self.render_format(format, &canvas, plan, score, options, &mapper, cancel) {
                Ok(bytes) => {
                    debug!(%format, bytes = bytes.len(), "rendered format");
                    outcome.artifacts.insert(format, bytes);
                }
                Err(FormatFailure::Cancelled) => return Err(RenderError::Cancelled),
                Err(FormatFailure::Draw(e)) => {
                    warn!(%format, error = %e, "format failed to render");
                    outcome.failed.insert(format, e.0);
                }
            }
        }

        if outcome.artifacts.is_empty() {
            return Err(RenderError::AllFormatsFailed(outcome.failed));
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_format(
        &self,
        format: OutputFormat,
        canvas: &Canvas,
        plan: &LayoutPlan,
        score: &Score,
        options: &RenderOptions,
        mapper: &TabMapper,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, FormatFailure> {
        let mut surface = self.backend.surface(format, canvas)?;
        for page in &plan.pages {
            if cancel.is_cancelled() {
                return Err(FormatFailure::Cancelled);
            }
            surface.begin_page(page.number)?;
            draw_page(surface.as_mut(), page, plan, score, options, mapper);
            surface.end_page()?;
        }
        Ok(surface.finish()?)
    }
}

enum FormatFailure {
    Draw(DrawError),
    Cancelled,
}

impl From<DrawError> for FormatFailure {
    fn from(e: DrawError) -> Self {
        FormatFailure::Draw(e)
    }
}

/// Every note the tab mapper could not place, in score order.
pub fn collect_unmapped(score: &Score, mapper: &TabMapper) -> Vec<UnmappedNote> {
    let mut unmapped = Vec::new();
    for measure in &score.measures {
        for (note_index, note) in measure.notes.iter().enumerate() {
            if !mapper.map_note(note).mapped {
                unmapped.push(UnmappedNote {
                    measure_index: measure.index,
                    note_index: note_index as u32,
                    pitch: note.pitch,
                });
            }
        }
    }
    unmapped
}

// ═══════════════════════════════════════════════════════════════════════
// Page drawing
// ═══════════════════════════════════════════════════════════════════════

fn draw_page(
    surface: &mut dyn Surface,
    page: &Page,
    plan: &LayoutPlan,
    score: &Score,
    options: &RenderOptions,
    mapper: &TabMapper,
) {
    let page_width = plan.page_width as f64;
    let margin = options.margin as f64;

    if page.number == 1 {
        if let Some(ref title) = options.title {
            surface.text(page_width / 2.0, (margin * 0.7).max(TITLE_FONT_SIZE), title, TITLE_FONT_SIZE);
        }
    }

    for stave in &page.staves {
        let (x, y, w) = (stave.x as f64, stave.y as f64, stave.width as f64);
        surface.stave(x, y, w);
        if stave.header {
            surface.header(x, y, StaveKind::Notation, 5);
        }
        let Some(measure) = score.measure(stave.measure_index) else {
            continue;
        };
        let middle = y + STAFF_HEIGHT / 2.0;
        for (note, nx) in measure.notes.iter().zip(note_x_positions(measure, x, w, stave.header)) {
            let steps = staff_steps(note.pitch);
            surface.note(NoteGlyph {
                x: nx,
                y: middle - steps as f64 * (STAFF_LINE_SPACING / 2.0),
                duration: note.duration,
                steps_from_middle: steps,
                staff_middle: middle,
            });
        }
    }

    let strings = mapper.tuning().string_count();
    for tab in &page.tabs {
        let (x, y, w) = (tab.x as f64, tab.y as f64, tab.width as f64);
        surface.tab_stave(x, y, w, strings);
        if tab.header {
            surface.header(x, y, StaveKind::Tablature, strings);
        }
        let Some(measure) = score.measure(tab.measure_index) else {
            continue;
        };
        for (note, nx) in measure.notes.iter().zip(note_x_positions(measure, x, w, tab.header)) {
            let position = mapper.map_note(note).position;
            let sy = y + (position.string as f64 - 1.0) * TAB_LINE_SPACING;
            surface.fret_number(nx, sy, position.fret);
        }
    }

    if plan.page_count() > 1 {
        let label = page.number.to_string();
        let y = plan.page_height as f64 - (margin / 2.0).max(PAGE_NUMBER_FONT_SIZE);
        surface.text(page_width / 2.0, y, &label, PAGE_NUMBER_FONT_SIZE);
    }
}

/// Horizontal position of each note, proportional to its onset within
/// the measure. Measures shorter than a 4/4 bar keep 4/4 spacing.
pub fn note_x_positions(measure: &Measure, x: f64, width: f64, header: bool) -> Vec<f64> {
    let left = NOTE_LEFT_INSET + if header { HEADER_SPACE } else { 0.0 };
    let usable = (width - left - NOTE_RIGHT_INSET).max(1.0);
    let total = measure.beats().max(4.0);

    let mut onset = 0.0;
    measure
        .notes
        .iter()
        .map(|note| {
            let nx = x + left + onset / total * usable;
            onset += note.duration.beats();
            nx
        })
        .collect()
}

/// Diatonic steps of a sounding pitch above the middle line of a treble
/// staff, using the written octave for fretted instruments.
pub fn staff_steps(pitch: u8) -> i32 {
    const STEP_OF_PITCH_CLASS: [i32; 12] = [0, 0, 1, 1, 2, 3, 3, 4, 4, 5, 5, 6];
    fn diatonic(pitch: i32) -> i32 {
        pitch.div_euclid(12) * 7 + STEP_OF_PITCH_CLASS[pitch.rem_euclid(12) as usize]
    }
    // Middle line of a treble staff is two lines (four steps) above the bottom line.
    let middle = diatonic(TREBLE_BOTTOM_LINE_PITCH) + 4;
    diatonic(pitch as i32 + NOTATION_TRANSPOSE) - middle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Note;

    #[test]
    fn staff_steps_follow_written_octave() {
        // Sounding B3 is written B4: the middle line.
        assert_eq!(staff_steps(59), 0);
        // Sounding E3 is written E4: the bottom line.
        assert_eq!(staff_steps(52), -4);
        // Low E (E2) sits an octave plus below.
        assert_eq!(staff_steps(40), -11);
        // Sharps share the step of the natural below.
        assert_eq!(staff_steps(61), staff_steps(60));
    }

    #[test]
    fn notes_spread_by_onset() {
        let note = |d| Note { pitch: 60, duration: d, velocity: 80 };
        let measure = Measure {
            index: 0,
            notes: vec![note(DurationClass::Half), note(DurationClass::Quarter), note(DurationClass::Quarter)],
        };
        let xs = note_x_positions(&measure, 100.0, 224.0, false);
        let usable = 224.0 - NOTE_LEFT_INSET - NOTE_RIGHT_INSET;
        assert_eq!(xs[0], 100.0 + NOTE_LEFT_INSET);
        assert_eq!(xs[1], 100.0 + NOTE_LEFT_INSET + usable / 2.0);
        assert_eq!(xs[2], 100.0 + NOTE_LEFT_INSET + usable * 0.75);
    }

    #[test]
    fn header_measure_shifts_notes_right() {
        let measure = Measure {
            index: 0,
            notes: vec![Note { pitch: 60, duration: DurationClass::Whole, velocity: 80 }],
        };
        let plain = note_x_positions(&measure, 0.0, 300.0, false)[0];
        let header = note_x_positions(&measure, 0.0, 300.0, true)[0];
        assert_eq!(header - plain, HEADER_SPACE);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
