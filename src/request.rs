//! Raw render requests and their validation.
//!
//! Requests arrive as JSON (`{ "noteData": ..., "options": ... }`). Every
//! numeric field is read as a wide integer so that out-of-range values
//! surface as a [`ValidationError`] naming the field instead of an opaque
//! decode error. Checks run in a fixed order and stop at the first
//! offending field.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{DurationClass, Measure, Note, Score};
use crate::options::*;
use crate::tab::Tuning;

/// Velocity assumed when the transcription omits it.
pub const DEFAULT_VELOCITY: i64 = 80;

/// A render request as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequest {
    pub note_data: Option<RawNoteData>,
    #[serde(default)]
    pub options: RawOptions,
    /// Caller-chosen id for asynchronous submissions
    pub job_id: Option<String>,
    /// Queue priority for asynchronous submissions (higher runs first)
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNoteData {
    #[serde(default)]
    pub measures: Vec<RawMeasure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMeasure {
    pub index: i64,
    #[serde(default)]
    pub notes: Vec<RawNote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNote {
    pub pitch: i64,
    #[serde(alias = "durationClass")]
    pub duration: String,
    pub velocity: Option<i64>,
}

/// Either a preset name or explicit low-to-high open-string pitches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTuning {
    Preset(String),
    Pitches(Vec<i64>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOptions {
    pub stave_width: Option<i64>,
    pub measures_per_line: Option<i64>,
    pub page_width: Option<i64>,
    pub page_height: Option<i64>,
    pub margin: Option<i64>,
    pub stave_spacing: Option<i64>,
    pub tab_offset: Option<i64>,
    pub notation_enabled: Option<bool>,
    pub tab_enabled: Option<bool>,
    #[serde(alias = "formats")]
    pub output_formats: Option<Vec<String>>,
    pub dpi: Option<i64>,
    pub tuning: Option<RawTuning>,
    pub max_fret: Option<i64>,
    pub title: Option<String>,
}

impl RawRequest {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Validate a raw request and produce the score plus normalized options.
pub fn validate(raw: &RawRequest) -> Result<(Score, RenderOptions), ValidationError> {
    let options = normalize_options(&raw.options)?;
    let score = validate_note_data(raw.note_data.as_ref())?;
    Ok((score, options))
}

fn check_range(field: &str, value: i64, (min, max): (i64, i64)) -> Result<u32, ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::new(
            field,
            format!("must be between {min} and {max}, got {value}"),
        ));
    }
    Ok(value as u32)
}

fn optional_range(
    field: &str,
    value: Option<i64>,
    range: (i64, i64),
) -> Result<Option<u32>, ValidationError> {
    value.map(|v| check_range(field, v, range)).transpose()
}

/// Apply range checks and defaults to raw options.
pub fn normalize_options(raw: &RawOptions) -> Result<RenderOptions, ValidationError> {
    let defaults = RenderOptions::default();

    let stave_width = optional_range("options.staveWidth", raw.stave_width, WIDTH_RANGE)?;
    let measures_per_line =
        optional_range("options.measuresPerLine", raw.measures_per_line, MEASURES_PER_LINE_RANGE)?;
    let page_width = optional_range("options.pageWidth", raw.page_width, WIDTH_RANGE)?
        .unwrap_or(defaults.page_width);
    let page_height = optional_range("options.pageHeight", raw.page_height, WIDTH_RANGE)?
        .unwrap_or(defaults.page_height);
    let margin = optional_range("options.margin", raw.margin, MARGIN_RANGE)?.unwrap_or(defaults.margin);
    if 2 * margin >= page_width {
        return Err(ValidationError::new(
            "options.margin",
            format!("margins ({margin} each side) leave no room on a {page_width} wide page"),
        ));
    }
    let stave_spacing = optional_range("options.staveSpacing", raw.stave_spacing, STAVE_SPACING_RANGE)?;
    let tab_offset = optional_range("options.tabOffset", raw.tab_offset, TAB_OFFSET_RANGE)?
        .unwrap_or(defaults.tab_offset);

    let notation_enabled = raw.notation_enabled.unwrap_or(defaults.notation_enabled);
    let tab_enabled = raw.tab_enabled.unwrap_or(defaults.tab_enabled);
    if !notation_enabled && !tab_enabled {
        return Err(ValidationError::new(
            "options.notationEnabled",
            "at least one of notation or tablature must be enabled",
        ));
    }

    let output_formats = match &raw.output_formats {
        None => defaults.output_formats,
        Some(names) => {
            let mut formats = BTreeSet::new();
            for (i, name) in names.iter().enumerate() {
                let format = OutputFormat::from_name(name).ok_or_else(|| {
                    ValidationError::new(
                        format!("options.outputFormats[{i}]"),
                        format!("unknown format '{name}' (expected vector, raster or document)"),
                    )
                })?;
                formats.insert(format);
            }
            if formats.is_empty() {
                return Err(ValidationError::new("options.outputFormats", "at least one format is required"));
            }
            formats
        }
    };

    let dpi = optional_range("options.dpi", raw.dpi, DPI_RANGE)?.unwrap_or(defaults.dpi);

    let tuning = match &raw.tuning {
        None => defaults.tuning,
        Some(RawTuning::Preset(name)) => Tuning::preset(name).ok_or_else(|| {
            ValidationError::new("options.tuning", format!("unknown tuning preset '{name}'"))
        })?,
        Some(RawTuning::Pitches(pitches)) => {
            let mut open = Vec::with_capacity(pitches.len());
            for (i, &p) in pitches.iter().enumerate() {
                open.push(check_range(&format!("options.tuning[{i}]"), p, (0, 127))? as u8);
            }
            Tuning::from_pitches(open).ok_or_else(|| {
                ValidationError::new("options.tuning", "a tuning needs between 1 and 12 strings")
            })?
        }
    };

    let max_fret = optional_range("options.maxFret", raw.max_fret, MAX_FRET_RANGE)?
        .map(|f| f as u8)
        .unwrap_or(defaults.max_fret);

    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(RenderOptions {
        stave_width,
        measures_per_line,
        stave_spacing,
        page_width,
        page_height,
        margin,
        tab_offset,
        notation_enabled,
        tab_enabled,
        output_formats,
        dpi,
        tuning,
        max_fret,
        title,
    })
}

/// Check note data and convert it into a [`Score`].
pub fn validate_note_data(raw: Option<&RawNoteData>) -> Result<Score, ValidationError> {
    let Some(data) = raw else {
        return Err(ValidationError::new("noteData", "note data is required"));
    };
    if data.measures.is_empty() {
        return Err(ValidationError::new("noteData.measures", "at least one measure is required"));
    }

    let mut measures = Vec::with_capacity(data.measures.len());
    for (mi, raw_measure) in data.measures.iter().enumerate() {
        if raw_measure.index != mi as i64 {
            return Err(ValidationError::new(
                format!("noteData.measures[{mi}].index"),
                format!("expected {mi}, got {} (indices must be sequential from 0)", raw_measure.index),
            ));
        }

        let mut notes = Vec::with_capacity(raw_measure.notes.len());
        for (ni, raw_note) in raw_measure.notes.iter().enumerate() {
            let path = format!("noteData.measures[{mi}].notes[{ni}]");
            let pitch = check_range(&format!("{path}.pitch"), raw_note.pitch, (0, 127))? as u8;
            let duration = DurationClass::from_name(&raw_note.duration).ok_or_else(|| {
                ValidationError::new(
                    format!("{path}.duration"),
                    format!("unknown duration '{}'", raw_note.duration),
                )
            })?;
            let velocity = check_range(
                &format!("{path}.velocity"),
                raw_note.velocity.unwrap_or(DEFAULT_VELOCITY),
                (0, 127),
            )? as u8;
            notes.push(Note { pitch, duration, velocity });
        }

        measures.push(Measure { index: mi as u32, notes });
    }

    Ok(Score::new(measures))
}
