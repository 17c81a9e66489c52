//! Shared request builders and drawing doubles for integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tabscore::error::DrawError;
use tabscore::render::{BuiltinBackend, Canvas, DrawingBackend, Surface};
use tabscore::{OutputFormat, RawRequest};

/// A C-major run, `notes_per_measure` quarter notes per measure.
pub fn note_data(measures: usize, notes_per_measure: usize) -> Value {
    const RUN: [u8; 8] = [48, 50, 52, 53, 55, 57, 59, 60];
    let measures: Vec<Value> = (0..measures)
        .map(|m| {
            let notes: Vec<Value> = (0..notes_per_measure)
                .map(|n| json!({ "pitch": RUN[(m + n) % RUN.len()], "duration": "quarter", "velocity": 90 }))
                .collect();
            json!({ "index": m, "notes": notes })
        })
        .collect();
    json!({ "measures": measures })
}

pub fn request_json(measures: usize, notes_per_measure: usize, options: Value) -> String {
    json!({ "noteData": note_data(measures, notes_per_measure), "options": options }).to_string()
}

pub fn request(measures: usize, notes_per_measure: usize, options: Value) -> RawRequest {
    RawRequest::from_json(&request_json(measures, notes_per_measure, options)).unwrap()
}

/// Built-in drawing that counts how many surfaces were requested,
/// optionally failing some formats, sleeping before each surface, or
/// panicking outright.
#[derive(Default)]
pub struct CountingBackend {
    pub calls: AtomicUsize,
    pub failing: BTreeSet<OutputFormat>,
    pub delay: Option<Duration>,
    pub panics: bool,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(formats: &[OutputFormat]) -> Arc<Self> {
        Arc::new(Self { failing: formats.iter().copied().collect(), ..Self::default() })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay: Some(delay), ..Self::default() })
    }

    pub fn panicking() -> Arc<Self> {
        Arc::new(Self { panics: true, ..Self::default() })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DrawingBackend for CountingBackend {
    fn surface(&self, format: OutputFormat, canvas: &Canvas) -> Result<Box<dyn Surface>, DrawError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.panics {
            panic!("{format} backend crashed");
        }
        if self.failing.contains(&format) {
            return Err(DrawError(format!("{format} backend offline")));
        }
        BuiltinBackend.surface(format, canvas)
    }
}
