//! Configuration file support for varbank.
//!
//! This module provides loading of `.varbank.toml` configuration files
//! which can pin import defaults and the paths the tool works against.
//!
//! # Example Configuration
//!
//! ```toml
//! [import]
//! threads = 4
//! timeout = 600
//!
//! [paths]
//! db = "genomes.db"
//! cache = "/var/cache/varbank"
//! ref-fasta = "reference.fasta"
//! ref-gff = "reference.gff3"
//! ```
//!
//! # Config File Locations
//!
//! Configuration is searched in this order (first found wins):
//! 1. `.varbank.toml` in current directory
//! 2. `~/.config/varbank/config.toml`
//!
//! CLI flags take precedence over config file settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::VarbankError;
use crate::Result;

/// Parsed configuration from a .varbank.toml file.
#[derive(Debug, Clone, Default)]
pub struct VarbankConfig {
    /// Import defaults.
    pub import: ImportSection,
    /// Paths the tool works against.
    pub paths: PathsSection,
}

/// `[import]` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct ImportSection {
    /// Worker threads.
    pub threads: Option<usize>,
    /// Aligner deadline per genome, in seconds.
    pub timeout: Option<u64>,
}

/// `[paths]` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct PathsSection {
    /// Genome store database.
    pub db: Option<PathBuf>,
    /// Cache directory.
    pub cache: Option<PathBuf>,
    /// Reference genome FASTA.
    pub ref_fasta: Option<PathBuf>,
    /// Reference annotation GFF3.
    pub ref_gff: Option<PathBuf>,
}

enum Section {
    None,
    Import,
    Paths,
}

impl VarbankConfig {
    /// Load configuration from the default locations.
    ///
    /// Searches for config in:
    /// 1. `.varbank.toml` in current directory
    /// 2. `~/.config/varbank/config.toml`
    pub fn load() -> Option<Self> {
        let mut candidates = vec![PathBuf::from(".varbank.toml")];
        if let Some(home) = dirs_home() {
            candidates.push(home.join(".config").join("varbank").join("config.toml"));
        }
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(&path) {
                Ok(config) => return Some(config),
                Err(e) => log::warn!("ignoring {}: {}", path.display(), e),
            }
        }
        None
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| VarbankError::Config {
            msg: format!("could not read {}: {}", path.display(), e),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML content. Unknown sections and keys are
    /// ignored; malformed numbers are not.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = VarbankConfig::default();
        let mut section = Section::None;

        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = match &line[1..line.len() - 1] {
                    "import" => Section::Import,
                    "paths" => Section::Paths,
                    _ => Section::None,
                };
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => continue,
            };

            match section {
                Section::Import => match key {
                    "threads" => config.import.threads = Some(parse_number(key, value)?),
                    "timeout" => config.import.timeout = Some(parse_number(key, value)?),
                    _ => {}
                },
                Section::Paths => match key {
                    "db" => config.paths.db = Some(PathBuf::from(unquote(value))),
                    "cache" => config.paths.cache = Some(PathBuf::from(unquote(value))),
                    "ref-fasta" => config.paths.ref_fasta = Some(PathBuf::from(unquote(value))),
                    "ref-gff" => config.paths.ref_gff = Some(PathBuf::from(unquote(value))),
                    _ => {}
                },
                Section::None => {}
            }
        }

        Ok(config)
    }

    /// Worker count with the CLI flag winning; 0 lets rayon decide.
    pub fn threads(&self, cli: Option<usize>) -> usize {
        cli.or(self.import.threads).unwrap_or(0)
    }

    /// Aligner deadline with the CLI flag winning.
    pub fn timeout(&self, cli: Option<u64>) -> Option<u64> {
        cli.or(self.import.timeout)
    }

    /// Store path with the CLI flag winning.
    pub fn db_path(&self, cli: Option<PathBuf>) -> Option<PathBuf> {
        cli.or_else(|| self.paths.db.clone())
    }

    /// Cache directory with the CLI flag winning.
    pub fn cache_dir(&self, cli: Option<PathBuf>) -> Option<PathBuf> {
        cli.or_else(|| self.paths.cache.clone())
    }

    /// Reference FASTA with the CLI flag winning.
    pub fn ref_fasta(&self, cli: Option<PathBuf>) -> Option<PathBuf> {
        cli.or_else(|| self.paths.ref_fasta.clone())
    }

    /// Reference GFF3 with the CLI flag winning.
    pub fn ref_gff(&self, cli: Option<PathBuf>) -> Option<PathBuf> {
        cli.or_else(|| self.paths.ref_gff.clone())
    }
}

/// Strip surrounding quotes from a TOML value.
fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"').trim_matches('\'')
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    unquote(value).parse().map_err(|_| VarbankError::Config {
        msg: format!("invalid value for '{}': {}", key, value),
    })
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
