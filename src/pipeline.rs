//! Batch import of genome sequences.
//!
//! An import runs in two stages. Workers on a rayon pool handle the
//! compute-heavy, filesystem-only part of each genome: harmonize the
//! sequence, align it against the reference, extract variants, and drop the
//! resulting [`GenomeRecord`] blob into the cache. The calling thread is the
//! coordinator: it claims the cache index entry for the accession, stores
//! the genome in one transaction, and re-derives the sequence from what was
//! just stored before counting the import as done.
//!
//! Aligner timeouts never abort a batch; the genome is counted as skipped
//! and the run moves on. Cache collisions and verification mismatches are
//! corruption and are surfaced immediately.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::align::{left_align_gaps, Aligner};
use crate::annotation::AnnotationModel;
use crate::cache::{GenomeRecord, VariantCache};
use crate::error::{GenomeOutcome, VarbankError};
use crate::extractor::{amino_acid_diffs, nucleotide_diffs};
use crate::fasta::{read_fasta, FastaRecord};
use crate::profile::compile_profile;
use crate::sequence::{harmonize, SequenceHash};
use crate::store::VariantStore;
use crate::Result;

/// Knobs for a batch import.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Worker threads for the alignment stage. 0 lets rayon decide.
    pub workers: usize,
    /// Wall clock limit per genome for the external aligner, in seconds.
    pub timeout: Option<u64>,
    /// Keep the harmonized sequence inside the cache blob.
    pub keep_sequence: bool,
    /// Suppress the progress bar.
    pub quiet: bool,
}

impl ImportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, seconds: Option<u64>) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_keep_sequence(mut self, keep: bool) -> Self {
        self.keep_sequence = keep;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            workers: 0,
            timeout: None,
            keep_sequence: false,
            quiet: false,
        }
    }
}

/// Tally of a finished batch.
#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    /// Genomes stored and verified.
    pub imported: usize,
    /// Genomes skipped on an aligner deadline.
    pub skipped: usize,
    /// Genomes that could not be processed or failed verification.
    pub failed: usize,
    pub elapsed: Duration,
}

impl ImportStats {
    pub fn record(&mut self, outcome: &GenomeOutcome) {
        match outcome {
            GenomeOutcome::Imported => self.imported += 1,
            GenomeOutcome::Skipped(_) => self.skipped += 1,
            GenomeOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// All genomes seen, whatever became of them.
    pub fn total(&self) -> usize {
        self.imported + self.skipped + self.failed
    }
}

/// Everything a worker may touch. Holds no store handle: SQLite stays on
/// the coordinator thread.
struct WorkerContext<'a> {
    cache: &'a VariantCache,
    annotation: &'a AnnotationModel,
    aligner: &'a dyn Aligner,
    reference_path: &'a Path,
    timeout: Option<Duration>,
    keep_sequence: bool,
}

/// Worker output for one genome: the cache blob plus the harmonized
/// sequence the verification gate compares against.
struct ProcessedGenome {
    accession: String,
    description: String,
    record: GenomeRecord,
    sequence: String,
}

/// Import every genome from `fasta_paths` into the store, aligning against
/// the reference at `reference_path` (whose harmonized sequence is
/// `reference`). Files are processed one after another; genomes within a
/// file are processed in parallel.
#[allow(clippy::too_many_arguments)]
pub fn import_genomes(
    store: &mut VariantStore,
    cache: &mut VariantCache,
    annotation: &AnnotationModel,
    aligner: &dyn Aligner,
    reference_path: &Path,
    reference: &str,
    fasta_paths: &[PathBuf],
    config: &ImportConfig,
) -> Result<ImportStats> {
    let started = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| VarbankError::Config {
            msg: format!("could not build worker pool: {}", e),
        })?;
    let timeout = config.timeout.map(Duration::from_secs);
    let mut stats = ImportStats::default();

    for path in fasta_paths {
        let records = read_fasta(path)?;
        let progress = progress_bar(records.len(), path, config.quiet);
        let results: Vec<Result<ProcessedGenome>> = {
            let context = WorkerContext {
                cache: &*cache,
                annotation,
                aligner,
                reference_path,
                timeout,
                keep_sequence: config.keep_sequence,
            };
            pool.install(|| {
                records
                    .par_iter()
                    .map(|record| {
                        let result = process_genome(&context, record);
                        progress.inc(1);
                        result
                    })
                    .collect()
            })
        };
        progress.finish_and_clear();

        for (record, result) in records.iter().zip(results) {
            let outcome = finish_genome(store, cache, reference, result)?;
            match &outcome {
                GenomeOutcome::Imported => log::debug!("'{}' {}", record.accession, outcome),
                GenomeOutcome::Skipped(_) => log::warn!("'{}' {}", record.accession, outcome),
                GenomeOutcome::Failed(_) => log::error!("'{}' {}", record.accession, outcome),
            }
            stats.record(&outcome);
        }
    }

    stats.elapsed = started.elapsed();
    log::info!(
        "imported {} of {} genomes ({} skipped, {} failed) in {:.1?}",
        stats.imported,
        stats.total(),
        stats.skipped,
        stats.failed,
        stats.elapsed
    );
    Ok(stats)
}

/// The pure per-genome stage. Touches only the cache directory and the
/// aligner; never the store.
fn process_genome(context: &WorkerContext<'_>, record: &FastaRecord) -> Result<ProcessedGenome> {
    let sequence = harmonize(&record.sequence);
    let hash = SequenceHash::compute(&sequence);

    // A blob from an earlier run (or an identical genome earlier in this
    // one) spares us the alignment.
    if let Some(cached) = context.cache.load_info(&hash)? {
        log::debug!("cache hit for '{}'", record.accession);
        return Ok(ProcessedGenome {
            accession: record.accession.clone(),
            description: record.description.clone(),
            record: cached,
            sequence,
        });
    }

    let query_file = context.cache.add_sequence(&hash, &sequence)?;
    let out_file = context.cache.alignment_path(&hash);
    let alignment = context.aligner.align(
        &record.accession,
        &query_file,
        context.reference_path,
        &out_file,
        context.timeout,
    )?;
    let (query, target) = left_align_gaps(&alignment.query, &alignment.target);

    let dna_variants = nucleotide_diffs(&target, &query)?;
    let protein_variants = amino_acid_diffs(&target, &query, context.annotation)?;
    let dna_profile = compile_profile(&dna_variants);
    let protein_profile = compile_profile(&protein_variants);

    let info = GenomeRecord::new(
        record.accession.as_str(),
        record.description.as_str(),
        hash,
        dna_variants,
        protein_variants,
        dna_profile,
        protein_profile,
        context.keep_sequence.then(|| sequence.clone()),
    );
    context.cache.write_info(&info)?;

    Ok(ProcessedGenome {
        accession: record.accession.clone(),
        description: record.description.clone(),
        record: info,
        sequence,
    })
}

/// Coordinator step for one genome: classify the worker result, then
/// register, store, and verify. Only errors that poison the whole batch
/// come back as `Err`.
fn finish_genome(
    store: &mut VariantStore,
    cache: &mut VariantCache,
    reference: &str,
    result: Result<ProcessedGenome>,
) -> Result<GenomeOutcome> {
    let processed = match result {
        Ok(processed) => processed,
        Err(err) if err.is_recoverable() => return Ok(GenomeOutcome::Skipped(err)),
        Err(err @ (VarbankError::AlignerFailed { .. } | VarbankError::Alignment { .. })) => {
            return Ok(GenomeOutcome::Failed(err))
        }
        Err(err) => return Err(err),
    };

    cache.register(
        processed.record.sequence_hash,
        processed.accession.as_str(),
        processed.description.as_str(),
    );
    store.add_genome(&processed.accession, &processed.description, &processed.record)?;

    // The paranoia gate: under auto_delete a corrupt genome is already gone
    // from the store when the error comes back.
    match store.verify_genome(&processed.accession, &processed.sequence, reference, true) {
        Ok(()) => Ok(GenomeOutcome::Imported),
        Err(err) if err.is_corruption() => Ok(GenomeOutcome::Failed(err)),
        Err(err) => Err(err),
    }
}

fn progress_bar(total: usize, source: &Path, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("{msg} [{wide_bar}] {pos}/{len} ({eta})") {
        bar.set_style(style);
    }
    bar.set_message(source.display().to_string());
    bar
}
