//! Artifact stores: where rendered bytes go when they are not returned
//! inline.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::StorageError;

/// Accepts rendered bytes and returns a URL they can be fetched from.
pub trait ArtifactStore: Send + Sync {
    fn store(&self, bytes: &[u8], filename: &str, mime: &str) -> Result<String, StorageError>;
}

/// Keeps artifacts in process memory under `memory://{filename}`.
#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes and mime type previously stored under `url`.
    pub fn fetch(&self, url: &str) -> Option<(String, Vec<u8>)> {
        let name = url.strip_prefix("memory://")?;
        self.blobs.read().ok()?.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn store(&self, bytes: &[u8], filename: &str, mime: &str) -> Result<String, StorageError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".into()))?;
        blobs.insert(filename.to_string(), (mime.to_string(), bytes.to_vec()));
        Ok(format!("memory://{filename}"))
    }
}

/// Writes artifacts into a directory and returns `file://` URLs.
pub struct DirArtifactStore {
    root: PathBuf,
}

impl DirArtifactStore {
    /// Create the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for DirArtifactStore {
    fn store(&self, bytes: &[u8], filename: &str, _mime: &str) -> Result<String, StorageError> {
        if filename.is_empty() || filename.contains(['/', '\\']) || filename.starts_with('.') {
            return Err(StorageError::Unavailable(format!("refusing to write `{filename}`")));
        }
        let path = self.root.join(filename);
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored artifact");
        Ok(format!("file://{}", path.display()))
    }
}
