//! Service configuration for covermatch
//!
//! TOML file selecting the audio library location, the worker pool size and
//! the analysis parameters used by the command-line tools.

use crate::config::CompareConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub analysis: CompareConfig,
}

/// Where track identifiers are resolved to audio files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    #[serde(default = "default_base_directory")]
    pub base_directory: String,
    /// Tried in order when an identifier has no extension
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
            extensions: default_extensions(),
        }
    }
}

fn default_base_directory() -> String {
    "./audio".to_string()
}

fn default_extensions() -> Vec<String> {
    ["wav", "flac", "mp3", "ogg", "m4a", "mka", "webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Comparison worker pool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Worker threads, 0 = one per core
    #[serde(default)]
    pub threads: usize,
    /// Jobs queued or running before submissions are rejected
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            max_pending: default_max_pending(),
        }
    }
}

fn default_max_pending() -> usize {
    4
}

impl ServiceConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        config
            .analysis
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [analysis] section: {}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MelodyMethod;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.library.base_directory, "./audio");
        assert_eq!(config.library.extensions[0], "wav");
        assert_eq!(config.worker.threads, 0);
        assert_eq!(config.worker.max_pending, 4);
        assert_eq!(config.analysis.sample_rate, 22050);
    }

    #[test]
    fn test_parse_empty_toml() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker.max_pending, 4);
        assert_eq!(config.analysis.segment_window, 50);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [library]
            base_directory = "/srv/tracks"
            extensions = ["flac", "wav"]

            [worker]
            threads = 2
            max_pending = 8

            [analysis]
            hop_length = 256
            melody_method = "peak_picking"
            report_threshold = 0.6
        "#;

        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.library.base_directory, "/srv/tracks");
        assert_eq!(config.library.extensions, vec!["flac", "wav"]);
        assert_eq!(config.worker.threads, 2);
        assert_eq!(config.worker.max_pending, 8);
        assert_eq!(config.analysis.hop_length, 256);
        assert_eq!(config.analysis.melody_method, MelodyMethod::PeakPicking);
        assert_eq!(config.analysis.report_threshold, 0.6);
        // Untouched keys keep their defaults
        assert_eq!(config.analysis.detector_threshold, 0.7);
    }

    #[test]
    fn test_load_rejects_invalid_analysis() {
        let dir = std::env::temp_dir().join(format!("covermatch-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[analysis]\nhop_length = 0\n").unwrap();
        assert!(ServiceConfig::load(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        assert!(ServiceConfig::load(Path::new("/nonexistent/covermatch.toml")).is_err());
    }
}
