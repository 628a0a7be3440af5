//! Surveillance matching workflows.
//!
//! Import a small batch end to end, attach lineage and sampling metadata,
//! and run the match requests an analyst would: profile tokens, lineages,
//! sampling windows, and their negations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use varbank::fasta::read_fasta;
use varbank::pipeline::{import_genomes, ImportConfig};
use varbank::store::{match_genomes, GenomeMetadata, GenomeRow, QueryFilters, VariantStore};
use varbank::{harmonize, Aligner, Alignment, AnnotationModel, VariantCache, VarbankError};

// CDS "ORF1" covers 1-based 4..18 = ATGAAATTTGGGCCC -> MKFGP
const REF: &str = "AAAATGAAATTTGGGCCCTTTAAACCCGGG";

/// Substitution-only samples keep the alignment gap-free.
struct IdentityAligner;

impl Aligner for IdentityAligner {
    fn align(
        &self,
        _accession: &str,
        query_file: &Path,
        target_file: &Path,
        _out_file: &Path,
        _timeout: Option<Duration>,
    ) -> varbank::Result<Alignment> {
        Ok(Alignment {
            query: read_fasta(query_file)?[0].sequence.clone(),
            target: harmonize(&read_fasta(target_file)?[0].sequence),
        })
    }
}

struct World {
    _dir: TempDir,
    store: VariantStore,
    annotation: AnnotationModel,
}

fn with_subs(subs: &[(usize, char)]) -> String {
    let mut seq: Vec<char> = REF.chars().collect();
    for &(index, base) in subs {
        seq[index] = base;
    }
    seq.into_iter().collect()
}

/// Four genomes: g1 and g4 carry T10A (ORF1:F3I), g2 carries T10G
/// (ORF1:F3V), g3 and g4 carry T21C outside the CDS.
fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let reference_fasta = dir.path().join("reference.fasta");
    fs::write(
        &reference_fasta,
        format!(">REF_1 reference genome\n{}\n", REF),
    )
    .unwrap();
    let gff = dir.path().join("reference.gff3");
    fs::write(
        &gff,
        "##gff-version 3\n\
         REF_1\tvarbank\tCDS\t4\t18\t.\t+\t0\tID=cds1;gene=ORF1;locus_tag=loc1\n",
    )
    .unwrap();
    let annotation = AnnotationModel::load_gff3(&gff, REF, 1).unwrap();

    let batch = dir.path().join("batch.fasta");
    let samples = [
        ("g1 alpha wave", with_subs(&[(9, 'A')])),
        ("g2 alpha wave", with_subs(&[(9, 'G')])),
        ("g3 gamma intro", with_subs(&[(20, 'C')])),
        ("g4 beta intro", with_subs(&[(9, 'A'), (20, 'C')])),
    ];
    let mut content = String::new();
    for (header, sequence) in &samples {
        content.push_str(&format!(">{}\n{}\n", header, sequence));
    }
    fs::write(&batch, content).unwrap();

    let mut store = VariantStore::open_or_create(dir.path().join("genomes.db"), "REF_1").unwrap();
    let mut cache = VariantCache::temporary().unwrap();
    let config = ImportConfig::new().with_workers(1).with_quiet(true);
    let stats = import_genomes(
        &mut store,
        &mut cache,
        &annotation,
        &IdentityAligner,
        &reference_fasta,
        REF,
        &[batch],
        &config,
    )
    .unwrap();
    assert_eq!(stats.imported, 4);

    for (accession, lineage, zip, date) in [
        ("g1", "B.1.1.7", "13353", "2021-03-01"),
        ("g2", "B.1.1.7", "13355", "2021-01-15"),
        ("g3", "P.1", "20144", "2020-12-24"),
        ("g4", "B.1.351", "13399", "2021-02-01"),
    ] {
        let update = GenomeMetadata {
            lineage: Some(lineage.to_string()),
            zip: Some(zip.to_string()),
            date: Some(date.to_string()),
            ..GenomeMetadata::default()
        };
        store.update_genome(accession, &update).unwrap();
    }

    World {
        _dir: dir,
        store,
        annotation,
    }
}

fn group(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn matched(world: &World, filters: &QueryFilters) -> Vec<GenomeRow> {
    match_genomes(&world.store, &world.annotation, filters).unwrap()
}

fn accessions(rows: &[GenomeRow]) -> Vec<&str> {
    rows.iter().map(|row| row.accession.as_str()).collect()
}

#[test]
fn test_protein_token_selects_carriers() {
    let world = world();
    let filters = QueryFilters {
        include_profiles: vec![group(&["ORF1:F3I"])],
        ..QueryFilters::default()
    };
    assert_eq!(accessions(&matched(&world, &filters)), vec!["g1", "g4"]);
}

#[test]
fn test_tokens_and_within_a_group_groups_or() {
    let world = world();

    let filters = QueryFilters {
        include_profiles: vec![group(&["T10A", "T21C"])],
        ..QueryFilters::default()
    };
    assert_eq!(accessions(&matched(&world, &filters)), vec!["g4"]);

    let filters = QueryFilters {
        include_profiles: vec![group(&["T10A", "T21C"]), group(&["T10G"])],
        ..QueryFilters::default()
    };
    assert_eq!(accessions(&matched(&world, &filters)), vec!["g2", "g4"]);
}

#[test]
fn test_exclude_profile_drops_carriers() {
    let world = world();
    let filters = QueryFilters {
        include_profiles: vec![group(&["T10A"])],
        exclude_profiles: vec![group(&["T21C"])],
        ..QueryFilters::default()
    };
    assert_eq!(accessions(&matched(&world, &filters)), vec!["g1"]);
}

#[test]
fn test_metadata_narrows_profile_matches() {
    let world = world();

    let filters = QueryFilters {
        lineages: vec!["B.1.1.7".to_string()],
        dates: vec!["2021-01-01:2021-01-31".to_string()],
        ..QueryFilters::default()
    };
    assert_eq!(accessions(&matched(&world, &filters)), vec!["g2"]);

    let filters = QueryFilters {
        include_profiles: vec![group(&["T10A"])],
        zips: vec!["133".to_string()],
        ..QueryFilters::default()
    };
    assert_eq!(accessions(&matched(&world, &filters)), vec!["g1", "g4"]);
}

#[test]
fn test_date_negation() {
    let world = world();
    let filters = QueryFilters {
        dates: vec!["^2021-01-01:2021-12-31".to_string()],
        ..QueryFilters::default()
    };
    assert_eq!(accessions(&matched(&world, &filters)), vec!["g3"]);
}

#[test]
fn test_unknown_gene_symbol_is_rejected() {
    let world = world();
    let filters = QueryFilters {
        include_profiles: vec![group(&["SPIKE:N501Y"])],
        ..QueryFilters::default()
    };
    let err = match_genomes(&world.store, &world.annotation, &filters).unwrap_err();
    match err {
        VarbankError::InvalidProfile { tokens } => assert_eq!(tokens, vec!["SPIKE:N501Y"]),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_rows_carry_metadata_and_profiles() {
    let world = world();
    let rows = matched(&world, &QueryFilters::default());
    assert_eq!(accessions(&rows), vec!["g1", "g2", "g3", "g4"]);

    let g4 = rows.iter().find(|row| row.accession == "g4").unwrap();
    assert_eq!(g4.description, "g4 beta intro");
    assert_eq!(g4.lineage.as_deref(), Some("B.1.351"));
    assert_eq!(g4.zip.as_deref(), Some("13399"));
    assert_eq!(g4.date.as_deref(), Some("2021-02-01"));
    assert_eq!(g4.dna_profile, "T10A T21C");
    assert_eq!(g4.aa_profile, "ORF1:F3I");
}
