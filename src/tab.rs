//! Tablature mapping — picks a string and fret for each pitch.
//!
//! The choice is a deterministic heuristic, not a fingering optimizer:
//! strings are scanned in a fixed order and the first one that can reach
//! the pitch within the fret range wins.

use serde::{Deserialize, Serialize};

use crate::model::Note;

/// Highest fret a mapping may use unless the caller says otherwise.
pub const DEFAULT_MAX_FRET: u8 = 24;

/// Most strings a tuning may declare.
pub const MAX_STRINGS: usize = 12;

/// Open-string pitches of a fretted instrument, stored lowest pitch first.
///
/// String numbers follow the tablature convention: string 1 is the
/// highest-pitched string, which is the *last* stored pitch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tuning {
    open: Vec<u8>,
}

impl Tuning {
    /// Build a tuning from open-string pitches given in either order.
    /// Pitches are stored ascending, so string 1 is always the highest.
    /// Returns `None` for an empty tuning or one with too many strings.
    pub fn from_pitches(mut open: Vec<u8>) -> Option<Self> {
        if open.is_empty() || open.len() > MAX_STRINGS {
            return None;
        }
        open.sort_unstable();
        Some(Self { open })
    }

    /// Standard six-string guitar: E A D G B E.
    pub fn standard() -> Self {
        Self { open: vec![40, 45, 50, 55, 59, 64] }
    }

    /// Look up a named preset ("standard", "drop-d", "dadgad", ...).
    pub fn preset(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        let open: &[u8] = match normalized.as_str() {
            "standard" | "e-standard" => &[40, 45, 50, 55, 59, 64],
            "drop-d" => &[38, 45, 50, 55, 59, 64],
            "half-step-down" | "eb-standard" => &[39, 44, 49, 54, 58, 63],
            "drop-c" => &[36, 43, 48, 53, 57, 62],
            "open-g" => &[38, 43, 50, 55, 59, 62],
            "dadgad" => &[38, 45, 50, 55, 57, 62],
            "open-d" => &[38, 45, 50, 54, 57, 62],
            "baritone" => &[28, 33, 38, 43, 47, 52],
            "bass" | "bass-standard" => &[28, 33, 38, 43],
            _ => return None,
        };
        Some(Self { open: open.to_vec() })
    }

    pub fn string_count(&self) -> u8 {
        self.open.len() as u8
    }

    /// Open pitches, lowest first.
    pub fn pitches(&self) -> &[u8] {
        &self.open
    }

    /// Open pitch of a string (1 = highest-pitched).
    pub fn open_pitch(&self, string: u8) -> Option<u8> {
        let n = self.open.len();
        let s = string as usize;
        if s == 0 || s > n {
            return None;
        }
        Some(self.open[n - s])
    }

    /// Lowest open-string pitch.
    pub fn lowest(&self) -> u8 {
        self.open.iter().copied().min().unwrap_or(0)
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::standard()
    }
}

/// A string/fret pair. String 1 is the highest-pitched string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabPosition {
    pub string: u8,
    pub fret: u8,
}

impl TabPosition {
    /// Where a note lands when no string can reach it.
    pub const FALLBACK: TabPosition = TabPosition { string: 1, fret: 0 };
}

/// Result of mapping one pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabMapping {
    pub position: TabPosition,
    /// False when the pitch was out of reach and the fallback was used.
    pub mapped: bool,
}

/// Order in which candidate strings are tried.
///
/// Ties are broken by this order, so it is part of the mapping contract:
/// with the highest-pitched string tried first, a pitch equal to an open
/// string always lands on fret 0 of that string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    /// Start at the last stored open pitch (string 1) and walk toward the
    /// first stored pitch (string N).
    #[default]
    LastStoredFirst,
}

impl ScanOrder {
    /// String numbers in scan order for an instrument with `strings` strings.
    pub fn strings(self, strings: u8) -> impl Iterator<Item = u8> {
        match self {
            ScanOrder::LastStoredFirst => 1..=strings,
        }
    }
}

/// Map a pitch to a string and fret.
///
/// Never fails: out-of-range pitches map to [`TabPosition::FALLBACK`] with
/// `mapped` cleared.
pub fn map(pitch: u8, tuning: &Tuning, max_fret: u8) -> TabMapping {
    for string in ScanOrder::default().strings(tuning.string_count()) {
        let Some(open) = tuning.open_pitch(string) else {
            continue;
        };
        let fret = pitch as i32 - open as i32;
        if (0..=max_fret as i32).contains(&fret) {
            return TabMapping {
                position: TabPosition { string, fret: fret as u8 },
                mapped: true,
            };
        }
    }
    TabMapping { position: TabPosition::FALLBACK, mapped: false }
}

/// A tuning and fret range bundled for repeated lookups.
#[derive(Debug, Clone)]
pub struct TabMapper {
    tuning: Tuning,
    max_fret: u8,
}

impl TabMapper {
    pub fn new(tuning: Tuning, max_fret: u8) -> Self {
        Self { tuning, max_fret }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn map(&self, pitch: u8) -> TabMapping {
        map(pitch, &self.tuning, self.max_fret)
    }

    pub fn map_note(&self, note: &Note) -> TabMapping {
        self.map(note.pitch)
    }
}

impl Default for TabMapper {
    fn default() -> Self {
        Self::new(Tuning::standard(), DEFAULT_MAX_FRET)
    }
}
