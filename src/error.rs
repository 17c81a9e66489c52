//! Error types for the render pipeline.
//!
//! Each layer has its own error enum; [`HandlerError`] is what callers of
//! the request handler see. Mapping fallbacks and partial render failures
//! are not errors: they are recorded in the response metadata.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::options::OutputFormat;

/// Result type alias for request-level operations.
pub type Result<T> = std::result::Result<T, HandlerError>;

/// A request was malformed or out of range. Reported before any layout
/// or render work starts, and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid `{field}`: {message}")]
pub struct ValidationError {
    /// JSON path of the first offending field (e.g. `options.staveWidth`)
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// A drawing surface could not produce a page or its final bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DrawError(pub String);

/// Render-stage failures that abort a whole request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("all requested formats failed: {}", describe_failures(.0))]
    AllFormatsFailed(BTreeMap<OutputFormat, String>),

    #[error("layout produced no pages")]
    EmptyLayout,

    #[error("render cancelled")]
    Cancelled,

    #[error("render worker exited without a result")]
    WorkerLost,
}

fn describe_failures(failures: &BTreeMap<OutputFormat, String>) -> String {
    failures
        .iter()
        .map(|(format, reason)| format!("{format}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// The cache backing store could not be reached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Artifact storage failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
}

/// Job board failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("job {0} already exists")]
    DuplicateJob(String),

    #[error("job {job_id} is {status}, not completed")]
    NotCompleted { job_id: String, status: String },

    #[error("job board is shut down")]
    ShutDown,
}

/// Everything the request handler can report to its caller.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("malformed request body: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("render timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl HandlerError {
    /// HTTP status code the route layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::Validation(_) | HandlerError::Parse(_) => 400,
            HandlerError::Render(_) => 500,
            HandlerError::Storage(_) => 502,
            HandlerError::Timeout(_) => 504,
            HandlerError::Job(JobError::UnknownJob(_)) => 404,
            HandlerError::Job(JobError::NotCompleted { .. }) => 409,
            HandlerError::Job(JobError::DuplicateJob(_)) => 409,
            HandlerError::Job(JobError::ShutDown) => 503,
        }
    }

    /// Offending field, for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            HandlerError::Validation(e) => Some(&e.field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_field() {
        let err = ValidationError::new("options.staveWidth", "must be between 100 and 2000, got 5000");
        assert_eq!(
            err.to_string(),
            "invalid `options.staveWidth`: must be between 100 and 2000, got 5000"
        );
    }

    #[test]
    fn all_formats_failed_lists_each_format() {
        let mut failures = BTreeMap::new();
        failures.insert(OutputFormat::Vector, "boom".to_string());
        failures.insert(OutputFormat::Document, "bust".to_string());
        let err = RenderError::AllFormatsFailed(failures);
        assert_eq!(err.to_string(), "all requested formats failed: vector: boom; document: bust");
    }

    #[test]
    fn status_codes() {
        let v: HandlerError = ValidationError::new("x", "y").into();
        assert_eq!(v.status_code(), 400);
        assert_eq!(v.field(), Some("x"));
        let r: HandlerError = RenderError::EmptyLayout.into();
        assert_eq!(r.status_code(), 500);
        assert_eq!(HandlerError::Timeout(Duration::from_secs(1)).status_code(), 504);
    }
}
