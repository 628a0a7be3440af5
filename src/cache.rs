//! On-disk staging cache for genome imports.
//!
//! Every distinct sequence is cached once under its content hash, in a
//! two-level directory layout (`<first two hex chars>/<hash>.seq`).
//! Alignment output and the extracted variant data live next to it as
//! `.algn` and `.info.json` files, so an interrupted import can resume
//! without re-aligning anything that already finished. A JSON index at
//! `index.json` maps each cached hash to the accessions claiming it;
//! [`VariantCache::close`] rewrites the index, keeping the previous
//! generation as `index.json.old`.
//!
//! Identical sequences shared by many accessions are processed once. Two
//! different sequences arriving under the same hash mean the cache is
//! corrupt; that aborts the import.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::error::VarbankError;
use crate::extractor::Variant;
use crate::sequence::SequenceHash;
use crate::Result;

/// Version written into `.info.json` blobs and the cache index. Bumped
/// whenever their layout changes incompatibly.
pub const CACHE_FORMAT_VERSION: u32 = 1;

const INDEX_FILE: &str = "index.json";
const INDEX_BACKUP_FILE: &str = "index.json.old";

/// One accession claiming a cached sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CachedSample {
    pub accession: String,
    pub description: String,
}

/// Fully processed per-sequence results, cached as a `.info.json` blob
/// keyed by sequence hash.
///
/// `accession` and `description` are those of the genome that produced the
/// blob; further accessions sharing the sequence are tracked in the index
/// only. `sequence` carries the harmonized sequence when the import was
/// asked to keep it, so later verification does not need the source fasta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeRecord {
    pub format_version: u32,
    pub accession: String,
    pub description: String,
    pub sequence_hash: SequenceHash,
    pub dna_variants: Vec<Variant>,
    pub protein_variants: Vec<Variant>,
    pub dna_profile: String,
    pub protein_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
}

impl GenomeRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accession: impl Into<String>,
        description: impl Into<String>,
        sequence_hash: SequenceHash,
        dna_variants: Vec<Variant>,
        protein_variants: Vec<Variant>,
        dna_profile: String,
        protein_profile: String,
        sequence: Option<String>,
    ) -> Self {
        GenomeRecord {
            format_version: CACHE_FORMAT_VERSION,
            accession: accession.into(),
            description: description.into(),
            sequence_hash,
            dna_variants,
            protein_variants,
            dna_profile,
            protein_profile,
            sequence,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    samples: BTreeMap<SequenceHash, BTreeSet<CachedSample>>,
}

/// The staging cache directory plus its in-memory index.
pub struct VariantCache {
    dir: PathBuf,
    temp: Option<TempDir>,
    index: BTreeMap<SequenceHash, BTreeSet<CachedSample>>,
    closed: bool,
}

impl VariantCache {
    /// Open (or create) a persistent cache directory, restoring its index
    /// when one is present.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut cache = VariantCache {
            dir,
            temp: None,
            index: BTreeMap::new(),
            closed: false,
        };
        cache.load_index()?;
        Ok(cache)
    }

    /// Create a self-deleting cache in a fresh temporary directory.
    pub fn temporary() -> Result<Self> {
        let temp = TempDir::new()?;
        Ok(VariantCache {
            dir: temp.path().to_path_buf(),
            temp: Some(temp),
            index: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    fn shard_dir(&self, hash: &SequenceHash) -> PathBuf {
        self.dir.join(hash.shard())
    }

    /// Path of the cached sequence for `hash`, a single-record fasta whose
    /// header is the hash itself.
    pub fn sequence_path(&self, hash: &SequenceHash) -> PathBuf {
        self.shard_dir(hash).join(format!("{}.seq", hash.to_hex()))
    }

    /// Path of the aligner output for `hash`.
    pub fn alignment_path(&self, hash: &SequenceHash) -> PathBuf {
        self.shard_dir(hash).join(format!("{}.algn", hash.to_hex()))
    }

    /// Path of the processed-results blob for `hash`.
    pub fn info_path(&self, hash: &SequenceHash) -> PathBuf {
        self.shard_dir(hash)
            .join(format!("{}.info.json", hash.to_hex()))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Cache a harmonized sequence under its hash, creating the shard
    /// directory on demand. Re-caching the identical sequence is a no-op;
    /// a different sequence under the same hash is a collision and leaves
    /// the cached file untouched.
    pub fn add_sequence(&self, hash: &SequenceHash, sequence: &str) -> Result<PathBuf> {
        let path = self.sequence_path(hash);
        let rendered = format!(">{}\n{}\n", hash.to_hex(), sequence);
        if path.exists() {
            let existing = fs::read_to_string(&path)?;
            if existing != rendered {
                return Err(VarbankError::CacheCollision {
                    hash: hash.to_hex(),
                });
            }
            return Ok(path);
        }
        fs::create_dir_all(self.shard_dir(hash))?;
        fs::write(&path, rendered)?;
        Ok(path)
    }

    /// Record that `accession` carries the sequence behind `hash`.
    pub fn register(
        &mut self,
        hash: SequenceHash,
        accession: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.index.entry(hash).or_default().insert(CachedSample {
            accession: accession.into(),
            description: description.into(),
        });
    }

    /// All indexed sequences with the accessions claiming them, in hash
    /// order.
    pub fn entries(&self) -> impl Iterator<Item = (&SequenceHash, &BTreeSet<CachedSample>)> {
        self.index.iter()
    }

    /// Number of distinct cached sequences in the index.
    pub fn sequence_count(&self) -> usize {
        self.index.len()
    }

    /// Number of registered accessions across all sequences.
    pub fn sample_count(&self) -> usize {
        self.index.values().map(|set| set.len()).sum()
    }

    /// Load the cached results blob for `hash`, if one exists.
    pub fn load_info(&self, hash: &SequenceHash) -> Result<Option<GenomeRecord>> {
        let path = self.info_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&data)?;
        check_format_version(&value, &path)?;
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Write the results blob for a processed sequence.
    pub fn write_info(&self, record: &GenomeRecord) -> Result<()> {
        let path = self.info_path(&record.sequence_hash);
        fs::create_dir_all(self.shard_dir(&record.sequence_hash))?;
        fs::write(&path, serde_json::to_string(record)?)?;
        Ok(())
    }

    fn load_index(&mut self) -> Result<()> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&data)?;
        check_format_version(&value, &path)?;
        let file: IndexFile = serde_json::from_value(value)?;
        self.index = file.samples;
        Ok(())
    }

    /// Write the index file. With `backup` the previous generation is kept
    /// as `index.json.old` first.
    pub fn write_index(&self, backup: bool) -> Result<()> {
        let path = self.index_path();
        if backup && path.exists() {
            fs::copy(&path, self.dir.join(INDEX_BACKUP_FILE))?;
        }
        let file = IndexFile {
            format_version: CACHE_FORMAT_VERSION,
            samples: self.index.clone(),
        };
        fs::write(&path, serde_json::to_string(&file)?)?;
        Ok(())
    }

    /// Write the index (backing up the previous generation) and consume
    /// the cache.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.write_index(true)
    }
}

impl Drop for VariantCache {
    fn drop(&mut self) {
        // last-resort index write for persistent caches dropped without
        // close(); a temporary cache vanishes with its directory anyway
        if self.closed || self.temp.is_some() {
            return;
        }
        if let Err(e) = self.write_index(true) {
            log::warn!(
                "failed to write cache index {}: {}",
                self.index_path().display(),
                e
            );
        }
    }
}

fn check_format_version(value: &serde_json::Value, path: &Path) -> Result<()> {
    let found = value
        .get("format_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    if found != CACHE_FORMAT_VERSION {
        return Err(VarbankError::CacheVersion {
            path: path.display().to_string(),
            found,
            expected: CACHE_FORMAT_VERSION,
        });
    }
    Ok(())
}
