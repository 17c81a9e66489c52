//! Data model for transcribed note data.
//!
//! A score arrives from the transcription side as an ordered list of
//! measures, each holding the notes played in that bar. These structures
//! are built once per request and only ever read afterwards.

use serde::{Deserialize, Serialize};

/// Rhythmic value of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationClass {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl DurationClass {
    /// Length in quarter-note beats.
    pub fn beats(self) -> f64 {
        match self {
            DurationClass::Whole => 4.0,
            DurationClass::Half => 2.0,
            DurationClass::Quarter => 1.0,
            DurationClass::Eighth => 0.5,
            DurationClass::Sixteenth => 0.25,
        }
    }

    /// Whether the notehead is drawn filled (quarter and shorter).
    pub fn is_filled(self) -> bool {
        !matches!(self, DurationClass::Whole | DurationClass::Half)
    }

    /// Whether the note carries a stem.
    pub fn has_stem(self) -> bool {
        !matches!(self, DurationClass::Whole)
    }

    /// Number of flags on an unbeamed stem.
    pub fn flag_count(self) -> u8 {
        match self {
            DurationClass::Eighth => 1,
            DurationClass::Sixteenth => 2,
            _ => 0,
        }
    }

    /// Parse a duration name. Accepts full names ("quarter") as well as
    /// the short codes used by notation-drawing toolkits ("q", "8", "16").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "whole" | "w" | "1" => Some(DurationClass::Whole),
            "half" | "h" | "2" => Some(DurationClass::Half),
            "quarter" | "q" | "4" => Some(DurationClass::Quarter),
            "eighth" | "8" => Some(DurationClass::Eighth),
            "sixteenth" | "16" => Some(DurationClass::Sixteenth),
            _ => None,
        }
    }
}

/// A single note event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch (0–127, 60 = middle C)
    pub pitch: u8,
    /// Rhythmic value
    pub duration: DurationClass,
    /// MIDI velocity (0–127)
    pub velocity: u8,
}

/// One bar of music.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measure {
    /// Zero-based position in the score. Sequential and gapless.
    pub index: u32,
    /// Notes in performance order
    pub notes: Vec<Note>,
}

impl Measure {
    /// Total length of the notes in quarter-note beats.
    pub fn beats(&self) -> f64 {
        self.notes.iter().map(|n| n.duration.beats()).sum()
    }
}

/// A complete score: measures in index order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Score {
    pub measures: Vec<Measure>,
}

impl Score {
    pub fn new(measures: Vec<Measure>) -> Self {
        Self { measures }
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    pub fn note_count(&self) -> usize {
        self.measures.iter().map(|m| m.notes.len()).sum()
    }

    /// Look up a measure by its index.
    pub fn measure(&self, index: u32) -> Option<&Measure> {
        // Indices are gapless, so position and index coincide.
        self.measures
            .get(index as usize)
            .filter(|m| m.index == index)
            .or_else(|| self.measures.iter().find(|m| m.index == index))
    }
}
