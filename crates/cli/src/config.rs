//! Configuration persistence for the `seqgen` CLI.
//!
//! Configuration is resolved with the following priority:
//! 1. CLI arguments (highest priority)
//! 2. Config file (`--config`, or ~/.config/seqgen/config.toml)
//! 3. Default values (lowest priority)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use seqgen_core::{BeamSearchConfig, SearchError, VocabularyInfo};

/// Special token ids. The vocabulary size defaults to the oracle's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VocabSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bos: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eos: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unk: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pad: Option<u32>,
}

impl VocabSection {
    /// Fill unset ids with UNK = 0, BOS = 1, EOS = 2, PAD = 3.
    pub fn resolve(&self, oracle_size: usize) -> Result<VocabularyInfo, SearchError> {
        VocabularyInfo::new(
            self.size.unwrap_or(oracle_size),
            self.bos.unwrap_or(1),
            self.eos.unwrap_or(2),
            self.unk.unwrap_or(0),
            self.pad.unwrap_or(3),
        )
    }

    fn merge(&mut self, other: &VocabSection) {
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.bos.is_some() {
            self.bos = other.bos;
        }
        if other.eos.is_some() {
            self.eos = other.eos;
        }
        if other.unk.is_some() {
            self.unk = other.unk;
        }
        if other.pad.is_some() {
            self.pad = other.pad;
        }
    }
}

/// Beam search settings; unset fields keep [`BeamSearchConfig`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beam_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unk_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalize_scores: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_len_ratio: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_len_floor: Option<usize>,
    /// Hypotheses reported per batch element; all beams when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
}

impl SearchSection {
    pub fn resolve(&self) -> BeamSearchConfig {
        let d = BeamSearchConfig::default();
        BeamSearchConfig {
            beam_size: self.beam_size.unwrap_or(d.beam_size),
            min_len: self.min_len.unwrap_or(d.min_len),
            max_len: self.max_len.unwrap_or(d.max_len),
            len_penalty: self.len_penalty.unwrap_or(d.len_penalty),
            unk_penalty: self.unk_penalty.unwrap_or(d.unk_penalty),
            temperature: self.temperature.unwrap_or(d.temperature),
            normalize_scores: self.normalize_scores.unwrap_or(d.normalize_scores),
            max_len_ratio: self.max_len_ratio.unwrap_or(d.max_len_ratio),
            max_len_floor: self.max_len_floor.unwrap_or(d.max_len_floor),
        }
    }

    fn merge(&mut self, other: &SearchSection) {
        if other.beam_size.is_some() {
            self.beam_size = other.beam_size;
        }
        if other.min_len.is_some() {
            self.min_len = other.min_len;
        }
        if other.max_len.is_some() {
            self.max_len = other.max_len;
        }
        if other.len_penalty.is_some() {
            self.len_penalty = other.len_penalty;
        }
        if other.unk_penalty.is_some() {
            self.unk_penalty = other.unk_penalty;
        }
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.normalize_scores.is_some() {
            self.normalize_scores = other.normalize_scores;
        }
        if other.max_len_ratio.is_some() {
            self.max_len_ratio = other.max_len_ratio;
        }
        if other.max_len_floor.is_some() {
            self.max_len_floor = other.max_len_floor;
        }
        if other.top.is_some() {
            self.top = other.top;
        }
    }
}

/// The bigram table and the shape of the dummy source batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleSection {
    /// Path of the JSON bigram table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    /// Source length; only bounds the generated length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_len: Option<usize>,
    /// Forced prefix shared by every hypothesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Vec<u32>>,
}

impl OracleSection {
    fn merge(&mut self, other: &OracleSection) {
        if other.path.is_some() {
            self.path = other.path.clone();
        }
        if other.batch.is_some() {
            self.batch = other.batch;
        }
        if other.src_len.is_some() {
            self.src_len = other.src_len;
        }
        if other.prefix.is_some() {
            self.prefix = other.prefix.clone();
        }
    }
}

/// Persistent configuration stored in TOML format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub vocab: VocabSection,
    pub search: SearchSection,
    pub oracle: OracleSection,
}

impl DecodeConfig {
    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("seqgen").join("config.toml"))
    }

    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Self {
        Self::default_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }

        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// Merge with another config, preferring values from `other`.
    pub fn merge(&mut self, other: &DecodeConfig) {
        self.vocab.merge(&other.vocab);
        self.search.merge(&other.search);
        self.oracle.merge(&other.oracle);
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading/writing config file.
    Io(std::io::Error),
    /// Error parsing TOML.
    Parse(toml::de::Error),
    /// Error serializing to TOML.
    Serialize(toml::ser::Error),
    /// No config directory available.
    NoConfigDir,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
            ConfigError::NoConfigDir => write!(f, "No config directory available"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = DecodeConfig {
            search: SearchSection {
                beam_size: Some(4),
                temperature: Some(0.0),
                ..Default::default()
            },
            oracle: OracleSection {
                path: Some(PathBuf::from("bigram.json")),
                prefix: Some(vec![1, 5]),
                ..Default::default()
            },
            ..Default::default()
        };

        config.save_to(&path).unwrap();
        let loaded = DecodeConfig::load_from(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.search.beam_size, Some(4));
        assert_eq!(loaded.vocab, VocabSection::default());
    }

    #[test]
    fn test_unset_fields_are_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = DecodeConfig {
            search: SearchSection {
                min_len: Some(3),
                ..Default::default()
            },
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("min_len = 3"));
        assert!(!content.contains("beam_size"));
    }

    #[test]
    fn test_merge() {
        let mut base = DecodeConfig {
            search: SearchSection {
                beam_size: Some(2),
                max_len: Some(64),
                ..Default::default()
            },
            vocab: VocabSection {
                eos: Some(5),
                ..Default::default()
            },
            ..Default::default()
        };

        let cli = DecodeConfig {
            search: SearchSection {
                beam_size: Some(8),
                top: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };

        base.merge(&cli);

        assert_eq!(base.search.beam_size, Some(8)); // Overridden
        assert_eq!(base.search.max_len, Some(64)); // Unchanged
        assert_eq!(base.search.top, Some(1)); // Added
        assert_eq!(base.vocab.eos, Some(5));
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let search = SearchSection {
            beam_size: Some(5),
            ..Default::default()
        }
        .resolve();
        assert_eq!(search.beam_size, 5);
        assert_eq!(search.min_len, BeamSearchConfig::default().min_len);

        let vocab = VocabSection::default().resolve(12).unwrap();
        assert_eq!(vocab.size, 12);
        assert_eq!((vocab.unk, vocab.bos, vocab.eos, vocab.pad), (0, 1, 2, 3));

        let clash = VocabSection {
            eos: Some(1),
            ..Default::default()
        };
        assert!(clash.resolve(12).is_err());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[search]\nbeam_size = \"wide\"\n").unwrap();

        let err = DecodeConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("Parse error"));
    }
}
