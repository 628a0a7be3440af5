//! Performance benchmarks for varbank
//!
//! Run with: cargo bench
//! Run specific benchmark: cargo bench -- calling

use std::collections::HashSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use varbank::align::left_align_gaps;
use varbank::annotation::{AnnotationModel, CdsFeatureRow, Strand};
use varbank::extractor::{amino_acid_diffs, nucleotide_diffs, Variant};
use varbank::harmonize;
use varbank::profile::{compile_profile, parse_token, pinpoint_mutation, TokenKind};
use varbank::sequence::SequenceHash;

// =============================================================================
// Synthetic data at coronavirus scale
// =============================================================================

const GENOME_LEN: usize = 29903;

/// Deterministic pseudo-random genome.
fn synthetic_genome(len: usize) -> String {
    const BASES: [char; 4] = ['A', 'C', 'G', 'T'];
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            BASES[(state >> 33) as usize % 4]
        })
        .collect()
}

/// A gapped alignment with substitutions every ~1000 bases, nine-base
/// deletion runs every ~5000 and three-base insertions every ~7000.
fn aligned_pair(reference: &str) -> (String, String) {
    let mut target = String::with_capacity(reference.len() + 64);
    let mut query = String::with_capacity(reference.len() + 64);
    for (i, c) in reference.chars().enumerate() {
        if i > 0 && i % 7001 == 0 {
            target.push_str("---");
            query.push_str("ACT");
        }
        target.push(c);
        if i % 5003 > 4993 {
            query.push('-');
        } else if i % 997 == 0 {
            query.push(if c == 'A' { 'G' } else { 'A' });
        } else {
            query.push(c);
        }
    }
    (target, query)
}

/// Ten plus-strand CDS of 900 codons each, spread over the genome.
fn annotation(reference: &str) -> AnnotationModel {
    let rows = (0..10)
        .map(|k| CdsFeatureRow {
            feature_id: format!("cds{}", k),
            symbol: format!("ORF{}", k),
            locus: format!("locus{}", k),
            start: k * 2800 + 101,
            end: k * 2800 + 2800,
            strand: Strand::Plus,
        })
        .collect::<Vec<_>>();
    AnnotationModel::from_rows(rows, reference, 1).unwrap()
}

fn variant_set(n: usize) -> Vec<Variant> {
    (0..n as i64)
        .map(|k| {
            let pos = k * 29;
            if k % 7 == 3 {
                Variant::nucleotide("A", "", pos, Some(pos + 1))
            } else {
                Variant::nucleotide("C", "T", pos, None)
            }
        })
        .collect()
}

// =============================================================================
// Variant calling
// =============================================================================

fn bench_variant_calling(c: &mut Criterion) {
    let reference = synthetic_genome(GENOME_LEN);
    let (target, query) = aligned_pair(&reference);
    let model = annotation(&reference);

    let mut group = c.benchmark_group("calling");
    group.throughput(Throughput::Bytes(target.len() as u64));

    group.bench_function("nucleotide_identical", |b| {
        b.iter(|| nucleotide_diffs(black_box(&reference), black_box(&reference)))
    });
    group.bench_function("nucleotide_mutated", |b| {
        b.iter(|| nucleotide_diffs(black_box(&target), black_box(&query)))
    });
    group.bench_function("amino_acid_mutated", |b| {
        b.iter(|| amino_acid_diffs(black_box(&target), black_box(&query), &model))
    });

    group.finish();
}

fn bench_gap_alignment(c: &mut Criterion) {
    let reference = synthetic_genome(GENOME_LEN);
    let (target, query) = aligned_pair(&reference);

    let mut group = c.benchmark_group("left_align");
    group.throughput(Throughput::Bytes(target.len() as u64));
    group.bench_function("genome", |b| {
        b.iter(|| left_align_gaps(black_box(&query), black_box(&target)))
    });
    group.finish();
}

// =============================================================================
// Sequence preparation
// =============================================================================

fn bench_sequence_prep(c: &mut Criterion) {
    let raw = synthetic_genome(GENOME_LEN).to_lowercase();
    let harmonized = harmonize(&raw);

    let mut group = c.benchmark_group("sequence");
    group.throughput(Throughput::Bytes(raw.len() as u64));

    group.bench_function("harmonize", |b| b.iter(|| harmonize(black_box(&raw))));
    group.bench_function("hash", |b| {
        b.iter(|| SequenceHash::compute(black_box(&harmonized)))
    });

    group.finish();
}

// =============================================================================
// Profiles
// =============================================================================

fn bench_profile_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for n in [10usize, 100, 1000] {
        let vars = variant_set(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("variants", n), &vars, |b, vars| {
            b.iter(|| compile_profile(black_box(vars)))
        });
    }

    group.finish();
}

fn bench_token_grammar(c: &mut Criterion) {
    let symbols: HashSet<String> = ["S", "N", "ORF1ab"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let tokens = vec![
        ("nt_sub", "C3267T"),
        ("nt_del", "del:11288:9"),
        ("nt_ins", "T11288TACTG"),
        ("aa_sub", "S:N501Y"),
        ("aa_del", "S:del:68:3"),
        ("aa_long", "ORF1ab:T1001I"),
    ];

    let mut group = c.benchmark_group("grammar");

    for (name, token) in &tokens {
        group.bench_with_input(BenchmarkId::new("parse", name), token, |b, t| {
            b.iter(|| parse_token(black_box(t), &symbols))
        });
    }

    group.bench_function("pinpoint_plain", |b| {
        b.iter(|| pinpoint_mutation(black_box("C3267T"), TokenKind::Nucleotide))
    });
    group.bench_function("pinpoint_n", |b| {
        b.iter(|| pinpoint_mutation(black_box("A5001N"), TokenKind::Nucleotide))
    });
    group.bench_function("pinpoint_aa_x", |b| {
        b.iter(|| pinpoint_mutation(black_box("S:A67X"), TokenKind::AminoAcid))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_variant_calling,
    bench_gap_alignment,
    bench_sequence_prep,
    bench_profile_compilation,
    bench_token_grammar,
);

criterion_main!(benches);
