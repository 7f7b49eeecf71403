//! TOML configuration.
//!
//! ```toml
//! [corpus]
//! root = "./data/corpus"
//!
//! [chunking]
//! max_tokens = 1500
//! overlap_tokens = 200
//!
//! [retention]
//! keep = 5
//!
//! [reload]
//! command = ["systemctl", "reload", "statute-search"]
//!
//! [[sources]]
//! name = "ITA"
//! path = "./data/raw/I-3.3.xml"
//! title = "Income Tax Act"
//! abbreviation = "ITA"
//! document_type = "act"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use statute_corpus_core::chunk::ChunkingConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusSettings,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub reload: ReloadSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusSettings {
    /// Version store root.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingSettings {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_max_tokens() -> usize {
    1500
}
fn default_overlap() -> usize {
    200
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

impl ChunkingSettings {
    pub fn to_chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionSettings {
    #[serde(default = "default_keep")]
    pub keep: usize,
}

fn default_keep() -> usize {
    5
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            keep: default_keep(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReloadSettings {
    /// Program and arguments run after each activation.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Logical source name, e.g. `"ITA"`. Used in chunk ids.
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
}

impl SourceConfig {
    /// Abbreviation used in citations, falling back to the source name.
    pub fn citation_prefix(&self) -> &str {
        self.abbreviation.as_deref().unwrap_or(&self.name)
    }
}

impl Config {
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!(
            "chunking.overlap_tokens ({}) must be smaller than chunking.max_tokens ({})",
            config.chunking.overlap_tokens,
            config.chunking.max_tokens
        );
    }

    if config.retention.keep < 1 {
        anyhow::bail!("retention.keep must be >= 1");
    }

    if let Some(command) = &config.reload.command {
        if command.is_empty() {
            anyhow::bail!("reload.command must not be empty");
        }
    }

    if config.sources.is_empty() {
        anyhow::bail!("at least one [[sources]] entry is required");
    }
    let mut names = HashSet::new();
    let mut files = HashSet::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            anyhow::bail!("sources.name must not be empty");
        }
        if !names.insert(source.name.as_str()) {
            anyhow::bail!("duplicate source name: '{}'", source.name);
        }
        let file = source
            .path
            .file_name()
            .with_context(|| format!("source '{}' path has no file name", source.name))?;
        if !files.insert(file.to_os_string()) {
            anyhow::bail!(
                "source '{}' shares its file name with another source: {}",
                source.name,
                source.path.display()
            );
        }
    }

    Ok(())
}
