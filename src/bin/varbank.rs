// Copyright (c) 2024-2025 varbank developers
// SPDX-License-Identifier: MIT

//! varbank CLI
//!
//! Command-line interface for importing viral genomes and matching the
//! stored variant profiles.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use varbank::config::VarbankConfig;
use varbank::fasta::read_fasta;
use varbank::pipeline::{import_genomes, ImportConfig};
use varbank::store::{match_genomes, GenomeMetadata, QueryFilters, VariantStore};
use varbank::{harmonize, AnnotationModel, StretcherAligner, VariantCache};

#[derive(Parser)]
#[command(name = "varbank")]
#[command(author, version, about = "Variant tracking for viral genome surveillance")]
#[command(
    long_about = "Import viral genomes against a fixed reference and match the stored
nucleotide and amino acid variant profiles.

Examples:
  varbank import --db genomes.db --fasta batch.fasta.gz --ref-fasta ref.fasta --ref-gff ref.gff3
  varbank match --db genomes.db --profile S:N501Y del:11288:9 --ref-fasta ref.fasta --ref-gff ref.gff3
  varbank match --db genomes.db --lineage B.1.1.7 --count --ref-fasta ref.fasta --ref-gff ref.gff3
  varbank restore --db genomes.db --acc mygenome1 --ref-fasta ref.fasta"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import genomes from FASTA files
    Import {
        /// FASTA files (plain or gzipped)
        #[arg(long, num_args = 1.., required = true)]
        fasta: Vec<PathBuf>,

        /// Genome store database
        #[arg(long)]
        db: Option<PathBuf>,

        /// Cache directory kept between runs (default: temporary)
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Reference genome FASTA
        #[arg(long)]
        ref_fasta: Option<PathBuf>,

        /// Reference annotation GFF3
        #[arg(long)]
        ref_gff: Option<PathBuf>,

        /// Number of worker threads (default: all cores)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Seconds before a genome's alignment is abandoned
        #[arg(long)]
        timeout: Option<u64>,

        /// Keep the harmonized sequence inside the cache blob
        #[arg(long)]
        keep_sequence: bool,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Match genomes against profiles and metadata filters
    Match {
        /// Profile tokens forming one AND group; repeat the flag to OR groups
        #[arg(long = "profile", num_args = 1..)]
        profile: Vec<Vec<String>>,

        /// Profile tokens a genome must not carry; repeatable like --profile
        #[arg(long = "exclude-profile", num_args = 1..)]
        exclude_profile: Vec<Vec<String>>,

        /// Accessions to include (prefix with ^ to exclude)
        #[arg(long = "acc", num_args = 1..)]
        acc: Vec<String>,

        /// Lineages to include (prefix with ^ to exclude)
        #[arg(long, num_args = 1..)]
        lineage: Vec<String>,

        /// Zip code prefixes to include (prefix with ^ to exclude)
        #[arg(long, num_args = 1..)]
        zip: Vec<String>,

        /// Sampling dates, single or START:END range (prefix with ^ to exclude)
        #[arg(long, num_args = 1..)]
        date: Vec<String>,

        /// Keep profiles showing ambiguous residues in the result
        #[arg(long)]
        ambig: bool,

        /// Print only the number of matching genomes
        #[arg(long)]
        count: bool,

        /// Output format
        #[arg(short = 'f', long, default_value = "tsv", value_parser = ["tsv", "json"])]
        format: String,

        /// Genome store database
        #[arg(long)]
        db: Option<PathBuf>,

        /// Reference genome FASTA
        #[arg(long)]
        ref_fasta: Option<PathBuf>,

        /// Reference annotation GFF3
        #[arg(long)]
        ref_gff: Option<PathBuf>,
    },

    /// Restore genome sequences from the stored variants
    Restore {
        /// Accessions to restore
        #[arg(long = "acc", num_args = 1.., required = true)]
        acc: Vec<String>,

        /// Genome store database
        #[arg(long)]
        db: Option<PathBuf>,

        /// Reference genome FASTA
        #[arg(long)]
        ref_fasta: Option<PathBuf>,
    },

    /// Update the metadata of one genome
    Update {
        /// Accession to update
        #[arg(long)]
        acc: String,

        /// Pango lineage
        #[arg(long)]
        lineage: Option<String>,

        /// Zip code of the sampling location
        #[arg(long)]
        zip: Option<String>,

        /// Sampling date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// GISAID identifier
        #[arg(long)]
        gisaid: Option<String>,

        /// ENA identifier
        #[arg(long)]
        ena: Option<String>,

        /// Collection the genome belongs to
        #[arg(long)]
        collection: Option<String>,

        /// Sample source
        #[arg(long)]
        source: Option<String>,

        /// Sequencing laboratory
        #[arg(long)]
        lab: Option<String>,

        /// Genome store database
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Delete genomes from the store
    Delete {
        /// Accessions to delete
        #[arg(long = "acc", num_args = 1.., required = true)]
        acc: Vec<String>,

        /// Genome store database
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show a database summary
    Info {
        /// Genome store database
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List genomes whose profiles shift a reading frame
    Frameshift {
        /// Genome store database
        #[arg(long)]
        db: Option<PathBuf>,

        /// Reference genome FASTA
        #[arg(long)]
        ref_fasta: Option<PathBuf>,

        /// Reference annotation GFF3
        #[arg(long)]
        ref_gff: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = VarbankConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Import {
            fasta,
            db,
            cache,
            ref_fasta,
            ref_gff,
            threads,
            timeout,
            keep_sequence,
            no_progress,
        } => run_import(
            &config,
            &fasta,
            db,
            cache,
            ref_fasta,
            ref_gff,
            threads,
            timeout,
            keep_sequence,
            no_progress,
        ),
        Commands::Match {
            profile,
            exclude_profile,
            acc,
            lineage,
            zip,
            date,
            ambig,
            count,
            format,
            db,
            ref_fasta,
            ref_gff,
        } => {
            let filters = QueryFilters {
                include_profiles: profile,
                exclude_profiles: exclude_profile,
                accessions: acc,
                lineages: lineage,
                zips: zip,
                dates: date,
                keep_ambiguous: ambig,
            };
            run_match(&config, filters, count, &format, db, ref_fasta, ref_gff)
        }
        Commands::Restore { acc, db, ref_fasta } => run_restore(&config, &acc, db, ref_fasta),
        Commands::Update {
            acc,
            lineage,
            zip,
            date,
            gisaid,
            ena,
            collection,
            source,
            lab,
            db,
        } => {
            let update = GenomeMetadata {
                lineage,
                zip,
                date,
                gisaid,
                ena,
                collection,
                source,
                lab,
            };
            run_update(&config, &acc, &update, db)
        }
        Commands::Delete { acc, db } => run_delete(&config, &acc, db),
        Commands::Info { db } => run_info(&config, db),
        Commands::Frameshift {
            db,
            ref_fasta,
            ref_gff,
        } => run_frameshift(&config, db, ref_fasta, ref_gff),
    }
}

/// Resolve a path that may come from the CLI or the config file.
fn require(path: Option<PathBuf>, what: &str, flag: &str) -> Result<PathBuf, Box<dyn Error>> {
    path.ok_or_else(|| format!("no {} given (use {} or .varbank.toml)", what, flag).into())
}

/// Load the reference genome: its accession and harmonized sequence.
fn load_reference(path: &Path) -> Result<(String, String), Box<dyn Error>> {
    let record = read_fasta(path)?
        .into_iter()
        .next()
        .ok_or_else(|| format!("no sequence in {}", path.display()))?;
    Ok((record.accession, harmonize(&record.sequence)))
}

#[allow(clippy::too_many_arguments)]
fn run_import(
    config: &VarbankConfig,
    fasta: &[PathBuf],
    db: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    ref_fasta: Option<PathBuf>,
    ref_gff: Option<PathBuf>,
    threads: Option<usize>,
    timeout: Option<u64>,
    keep_sequence: bool,
    no_progress: bool,
) -> Result<(), Box<dyn Error>> {
    let db = require(config.db_path(db), "database path", "--db")?;
    let ref_fasta = require(config.ref_fasta(ref_fasta), "reference FASTA", "--ref-fasta")?;
    let ref_gff = require(config.ref_gff(ref_gff), "reference GFF3", "--ref-gff")?;

    let (reference_accession, reference) = load_reference(&ref_fasta)?;
    let annotation = AnnotationModel::load_gff3(&ref_gff, &reference, 1)?;
    let mut store = VariantStore::open_or_create(&db, &reference_accession)?;
    let mut cache = match config.cache_dir(cache_dir) {
        Some(dir) => VariantCache::open(dir)?,
        None => VariantCache::temporary()?,
    };
    let aligner = StretcherAligner::default();
    let import_config = ImportConfig::new()
        .with_workers(config.threads(threads))
        .with_timeout(config.timeout(timeout))
        .with_keep_sequence(keep_sequence)
        .with_quiet(no_progress);

    let stats = import_genomes(
        &mut store,
        &mut cache,
        &annotation,
        &aligner,
        &ref_fasta,
        &reference,
        fasta,
        &import_config,
    )?;
    cache.close()?;

    println!(
        "{} imported, {} skipped, {} failed in {:.1?}",
        stats.imported, stats.skipped, stats.failed, stats.elapsed
    );
    if stats.failed > 0 {
        return Err(format!("{} genome(s) failed to import", stats.failed).into());
    }
    Ok(())
}

fn run_match(
    config: &VarbankConfig,
    filters: QueryFilters,
    count: bool,
    format: &str,
    db: Option<PathBuf>,
    ref_fasta: Option<PathBuf>,
    ref_gff: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let db = require(config.db_path(db), "database path", "--db")?;
    let ref_fasta = require(config.ref_fasta(ref_fasta), "reference FASTA", "--ref-fasta")?;
    let ref_gff = require(config.ref_gff(ref_gff), "reference GFF3", "--ref-gff")?;

    let (_, reference) = load_reference(&ref_fasta)?;
    let annotation = AnnotationModel::load_gff3(&ref_gff, &reference, 1)?;
    let store = VariantStore::open_readonly(&db)?;
    let rows = match_genomes(&store, &annotation, &filters)?;

    if count {
        println!("{}", rows.len());
        return Ok(());
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    match format {
        "json" => writeln!(handle, "{}", serde_json::to_string_pretty(&rows)?)?,
        _ => {
            writeln!(
                handle,
                "accession\tdescription\tlineage\tzip\tdate\tgisaid\tena\tcollection\tsource\tlab\tdna_profile\taa_profile"
            )?;
            for row in &rows {
                writeln!(
                    handle,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    row.accession,
                    row.description,
                    field(&row.lineage),
                    field(&row.zip),
                    field(&row.date),
                    field(&row.gisaid),
                    field(&row.ena),
                    field(&row.collection),
                    field(&row.source),
                    field(&row.lab),
                    row.dna_profile,
                    row.aa_profile,
                )?;
            }
        }
    }
    Ok(())
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn run_restore(
    config: &VarbankConfig,
    accessions: &[String],
    db: Option<PathBuf>,
    ref_fasta: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let db = require(config.db_path(db), "database path", "--db")?;
    let ref_fasta = require(config.ref_fasta(ref_fasta), "reference FASTA", "--ref-fasta")?;

    let (_, reference) = load_reference(&ref_fasta)?;
    let store = VariantStore::open_readonly(&db)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for accession in accessions {
        let restored = store.restore_sequence_from_variants(accession, &reference)?;
        writeln!(handle, ">{}", accession)?;
        writeln!(handle, "{}", restored)?;
    }
    Ok(())
}

fn run_update(
    config: &VarbankConfig,
    accession: &str,
    update: &GenomeMetadata,
    db: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let db = require(config.db_path(db), "database path", "--db")?;
    if update.is_empty() {
        return Err("nothing to update (pass at least one metadata flag)".into());
    }
    let mut store = VariantStore::open_existing(&db)?;
    store.update_genome(accession, update)?;
    println!("updated '{}'", accession);
    Ok(())
}

fn run_delete(
    config: &VarbankConfig,
    accessions: &[String],
    db: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let db = require(config.db_path(db), "database path", "--db")?;
    let mut store = VariantStore::open_existing(&db)?;
    for accession in accessions {
        store.delete_genome(accession)?;
    }
    println!("{} genome(s) deleted", accessions.len());
    Ok(())
}

fn run_info(config: &VarbankConfig, db: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let db = require(config.db_path(db), "database path", "--db")?;
    let store = VariantStore::open_readonly(&db)?;
    let stats = store.stats()?;

    println!("database:          {}", db.display());
    println!("reference:         {}", store.reference_accession()?);
    println!("genomes:           {}", stats.genomes);
    println!("unique sequences:  {}", stats.sequences);
    println!("dna variants:      {}", stats.dna_variants);
    println!("protein variants:  {}", stats.protein_variants);
    println!(
        "earliest date:     {}",
        stats.earliest_date.as_deref().unwrap_or("-")
    );
    println!(
        "latest date:       {}",
        stats.latest_date.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn run_frameshift(
    config: &VarbankConfig,
    db: Option<PathBuf>,
    ref_fasta: Option<PathBuf>,
    ref_gff: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let db = require(config.db_path(db), "database path", "--db")?;
    let ref_fasta = require(config.ref_fasta(ref_fasta), "reference FASTA", "--ref-fasta")?;
    let ref_gff = require(config.ref_gff(ref_gff), "reference GFF3", "--ref-gff")?;

    let (_, reference) = load_reference(&ref_fasta)?;
    let annotation = AnnotationModel::load_gff3(&ref_gff, &reference, 1)?;
    let store = VariantStore::open_readonly(&db)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "accession\tframeshift_variants")?;
    for record in store.frameshift_report(&annotation)? {
        writeln!(handle, "{}\t{}", record.accession, record.tokens.join(" "))?;
    }
    Ok(())
}
