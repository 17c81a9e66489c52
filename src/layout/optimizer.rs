//! Layout optimizer — suggests line density from how busy the music is.
//!
//! Dense measures get fewer per line, sparse ones more. This is a fixed
//! heuristic with documented constants, not a search for an optimum.

use serde::{Deserialize, Serialize};

use super::constants::*;
use crate::model::Score;
use crate::options::RenderOptions;

/// Line geometry the layout engine works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSuggestion {
    pub measures_per_line: u32,
    pub stave_width: u32,
    pub stave_spacing: u32,
}

/// Average notes per measure; 4 when there is nothing to average.
pub fn average_notes_per_measure(score: &Score) -> f64 {
    let measures = score.measure_count();
    let notes = score.note_count();
    if measures == 0 || notes == 0 {
        return DEFAULT_NOTES_PER_MEASURE;
    }
    notes as f64 / measures as f64
}

/// Measures per line for a given note density, clamped to `[2, 6]`.
pub fn measures_per_line_for(avg_notes_per_measure: f64) -> u32 {
    let avg = if avg_notes_per_measure > 0.0 {
        avg_notes_per_measure
    } else {
        DEFAULT_NOTES_PER_MEASURE
    };
    let raw = (TARGET_NOTES_PER_LINE / avg).floor();
    // Clamp in floating point first: very sparse scores overflow u32.
    raw.clamp(MIN_MEASURES_PER_LINE as f64, MAX_MEASURES_PER_LINE as f64) as u32
}

/// Vertical distance between consecutive lines.
pub fn stave_spacing_for(tab_enabled: bool) -> u32 {
    if tab_enabled {
        STAVE_SPACING_WITH_TAB
    } else {
        STAVE_SPACING_NOTATION_ONLY
    }
}

/// Suggest line geometry for a score, ignoring anything the caller pinned.
pub fn suggest(score: &Score, options: &RenderOptions) -> LayoutSuggestion {
    let measures_per_line = measures_per_line_for(average_notes_per_measure(score));
    LayoutSuggestion {
        measures_per_line,
        stave_width: options.content_width() / measures_per_line,
        stave_spacing: stave_spacing_for(options.tab_enabled),
    }
}

/// Final line geometry: pinned values win, the rest come from the
/// optimizer. When both dimensions are pinned the optimizer is skipped.
pub fn resolve(score: &Score, options: &RenderOptions) -> LayoutSuggestion {
    let spacing = options
        .stave_spacing
        .unwrap_or_else(|| stave_spacing_for(options.tab_enabled));

    if let (Some(measures_per_line), Some(stave_width)) = (options.measures_per_line, options.stave_width) {
        return LayoutSuggestion { measures_per_line, stave_width, stave_spacing: spacing };
    }

    let suggested = suggest(score, options);
    let measures_per_line = options.measures_per_line.unwrap_or(suggested.measures_per_line);
    let stave_width = options
        .stave_width
        .unwrap_or_else(|| options.content_width() / measures_per_line.max(1));

    LayoutSuggestion { measures_per_line, stave_width, stave_spacing: spacing }
}
