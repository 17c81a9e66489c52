//! Render responses: artifacts plus the metadata callers need to judge them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::options::OutputFormat;

/// A note the tab mapper had to place at the fallback position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedNote {
    pub measure_index: u32,
    pub note_index: u32,
    pub pitch: u8,
}

/// One rendered output, either carried in the response or handed to an
/// artifact store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Inline { mime: String, bytes: Vec<u8> },
    Stored { mime: String, url: String, size: usize },
}

impl Artifact {
    pub fn mime(&self) -> &str {
        match self {
            Artifact::Inline { mime, .. } | Artifact::Stored { mime, .. } => mime,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Artifact::Inline { bytes, .. } => bytes.len(),
            Artifact::Stored { size, .. } => *size,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Artifact::Inline { bytes, .. } => Some(bytes),
            Artifact::Stored { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Artifact::Stored { url, .. } => Some(url),
            Artifact::Inline { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetadata {
    pub measure_count: usize,
    pub page_count: usize,
    pub measures_per_line: u32,
    pub stave_width: u32,
    pub stave_spacing: u32,
    pub unmapped_notes: Vec<UnmappedNote>,
    /// Formats that failed, with the reason. Non-empty alongside
    /// artifacts means the render was partial.
    pub failed_formats: BTreeMap<OutputFormat, String>,
}

/// Everything a finished render hands back. Immutable once built; shared
/// through the cache as `Arc<RenderResponseEnvelope>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResponseEnvelope {
    pub fingerprint: String,
    pub artifacts: BTreeMap<OutputFormat, Artifact>,
    pub metadata: RenderMetadata,
}

impl RenderResponseEnvelope {
    /// Some requested formats failed while others succeeded.
    pub fn is_partial(&self) -> bool {
        !self.metadata.failed_formats.is_empty() && !self.artifacts.is_empty()
    }

    pub fn artifact(&self, format: OutputFormat) -> Option<&Artifact> {
        self.artifacts.get(&format)
    }

    /// The vector artifact as text, when it was returned inline.
    pub fn svg(&self) -> Option<&str> {
        self.artifact(OutputFormat::Vector)
            .and_then(Artifact::bytes)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    /// JSON view for callers across a text boundary (routes, FFI, JNI).
    ///
    /// Binary artifacts are described, never embedded: inline ones by
    /// size, stored ones by url. The SVG text is included for inline
    /// vector output.
    pub fn summary(&self) -> Value {
        let mut artifacts = Map::new();
        for (format, artifact) in &self.artifacts {
            let mut entry = json!({
                "mime": artifact.mime(),
                "size": artifact.size(),
            });
            if let Some(url) = artifact.url() {
                entry["url"] = json!(url);
            } else if *format == OutputFormat::Vector {
                if let Some(svg) = self.svg() {
                    entry["svg"] = json!(svg);
                }
            }
            artifacts.insert(format.name().to_string(), entry);
        }

        let mut body = json!({
            "fingerprint": self.fingerprint,
            "artifacts": artifacts,
            "metadata": self.metadata,
        });
        if self.is_partial() {
            let warnings: Vec<String> = self
                .metadata
                .failed_formats
                .iter()
                .map(|(format, reason)| format!("{format} failed: {reason}"))
                .collect();
            body["warnings"] = json!(warnings);
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> RenderResponseEnvelope {
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            OutputFormat::Vector,
            Artifact::Inline { mime: "image/svg+xml".into(), bytes: b"<svg/>".to_vec() },
        );
        artifacts.insert(
            OutputFormat::Raster,
            Artifact::Stored { mime: "image/png".into(), url: "memory://x.png".into(), size: 42 },
        );
        RenderResponseEnvelope {
            fingerprint: "abc".into(),
            artifacts,
            metadata: RenderMetadata { measure_count: 1, page_count: 1, ..Default::default() },
        }
    }

    #[test]
    fn summary_describes_artifacts() {
        let body = envelope().summary();
        assert_eq!(body["artifacts"]["vector"]["svg"], "<svg/>");
        assert_eq!(body["artifacts"]["raster"]["url"], "memory://x.png");
        assert_eq!(body["artifacts"]["raster"]["size"], 42);
        assert_eq!(body["metadata"]["pageCount"], 1);
        assert!(body.get("warnings").is_none());
    }

    #[test]
    fn partial_envelopes_carry_warnings() {
        let mut env = envelope();
        env.metadata.failed_formats.insert(OutputFormat::Document, "no fonts".into());
        assert!(env.is_partial());
        let body = env.summary();
        assert_eq!(body["warnings"][0], "document failed: no fonts");
        assert_eq!(body["metadata"]["failedFormats"]["document"], "no fonts");
    }
}
