//! Audio store trait and filesystem implementation
//!
//! Resolves track identifiers to raw encoded audio bytes.

use crate::error::LoadError;
use crate::service_config::LibraryConfig;
use std::path::{Path, PathBuf};

/// Source of encoded audio
pub trait AudioStore: Send + Sync {
    /// Raw bytes of the track named by `identifier`
    fn load_audio(&self, identifier: &str) -> Result<Vec<u8>, LoadError>;

    /// Identifiers of every track in the store
    fn list(&self) -> Result<Vec<String>, LoadError>;
}

/// Directory of audio files
pub struct FilesystemStore {
    base_dir: PathBuf,
    extensions: Vec<String>,
}

impl FilesystemStore {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            base_dir: PathBuf::from(&config.base_directory),
            extensions: config.extensions.clone(),
        }
    }

    /// Create from directory path and extension list
    pub fn from_path(base_dir: impl AsRef<Path>, extensions: &[&str]) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Find the audio file for an identifier
    ///
    /// Tries `<base>/<identifier>.<ext>` for each configured extension, then
    /// `<base>/<identifier>`, then the identifier as a path of its own.
    pub fn find_file(&self, identifier: &str) -> Result<PathBuf, LoadError> {
        for ext in &self.extensions {
            let path = self.base_dir.join(format!("{}.{}", identifier, ext));
            if path.is_file() {
                return Ok(path);
            }
        }

        let in_base = self.base_dir.join(identifier);
        if in_base.is_file() {
            return Ok(in_base);
        }

        let direct = PathBuf::from(identifier);
        if direct.is_file() {
            return Ok(direct);
        }

        Err(LoadError::NotFound(identifier.to_string()))
    }

    fn has_known_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

impl AudioStore for FilesystemStore {
    fn load_audio(&self, identifier: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.find_file(identifier)?;
        log::debug!("Loading {} from {}", identifier, path.display());
        Ok(std::fs::read(&path)?)
    }

    fn list(&self) -> Result<Vec<String>, LoadError> {
        let entries = std::fs::read_dir(&self.base_dir)?;
        let mut identifiers: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.has_known_extension(path))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        identifiers.sort();
        identifiers.dedup();
        Ok(identifiers)
    }
}
