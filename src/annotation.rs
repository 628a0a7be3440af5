//! Gene/CDS annotation model for the reference genome.
//!
//! Coordinates follow one convention throughout the crate:
//!
//! | Context              | System                  |
//! |----------------------|-------------------------|
//! | Annotation source    | 1-based, inclusive ends |
//! | In-memory model      | 0-based, half-open      |
//! | Formatted profiles   | 1-based                 |
//!
//! A CDS is assembled from all annotation rows sharing one feature id; its
//! exon ranges are kept in genomic order and must agree on symbol and strand.
//! Derived fields (coding sequence, translated protein) are computed eagerly
//! at load time; the model is immutable afterwards.

use std::collections::HashSet;
use std::fmt;
use std::io::BufRead;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::VarbankError;
use crate::fasta::open_text;
use crate::sequence::{reverse_complement, TranslationTable};
use crate::Result;

/// Genomic strand of a CDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    Plus,
    Minus,
}

impl Strand {
    pub fn from_symbol(s: &str) -> Result<Self> {
        match s {
            "+" => Ok(Strand::Plus),
            "-" => Ok(Strand::Minus),
            other => Err(VarbankError::annotation(format!(
                "invalid strand '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Plus => write!(f, "+"),
            Strand::Minus => write!(f, "-"),
        }
    }
}

/// One CDS row from the annotation source, before grouping.
/// Start/end are 1-based inclusive as written in GFF3.
#[derive(Debug, Clone)]
pub struct CdsFeatureRow {
    pub feature_id: String,
    pub symbol: String,
    pub locus: String,
    pub start: i64,
    pub end: i64,
    pub strand: Strand,
}

/// A coding sequence: exon ranges, strand, and precomputed coding/protein
/// sequences.
#[derive(Debug, Clone)]
pub struct Cds {
    symbol: String,
    locus: String,
    strand: Strand,
    /// 0-based half-open exon ranges in genomic order.
    ranges: Vec<(i64, i64)>,
    coding_sequence: String,
    protein: String,
    translation_table: TranslationTable,
}

impl Cds {
    fn assemble(
        locus: String,
        symbol: String,
        strand: Strand,
        ranges: Vec<(i64, i64)>,
        reference: &str,
        table: TranslationTable,
    ) -> Result<Self> {
        let ref_len = reference.len() as i64;
        for &(s, e) in &ranges {
            if s < 0 || e > ref_len || s >= e {
                return Err(VarbankError::annotation(format!(
                    "CDS range {}..{} for locus {} outside reference bounds (length {})",
                    s + 1,
                    e,
                    locus,
                    ref_len
                )));
            }
        }
        let spliced: String = ranges
            .iter()
            .map(|&(s, e)| &reference[s as usize..e as usize])
            .collect();
        let coding_sequence = match strand {
            Strand::Plus => spliced,
            Strand::Minus => reverse_complement(&spliced),
        };
        let protein = table.translate_to_stop(&coding_sequence);
        Ok(Cds {
            symbol,
            locus,
            strand,
            ranges,
            coding_sequence,
            protein,
            translation_table: table,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn locus(&self) -> &str {
        &self.locus
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    /// Genomic start (0-based, inclusive): start of the first exon.
    pub fn start(&self) -> i64 {
        self.ranges[0].0
    }

    /// Genomic end (0-based, exclusive): end of the last exon.
    pub fn end(&self) -> i64 {
        self.ranges[self.ranges.len() - 1].1
    }

    /// Exon ranges, 0-based half-open, genomic order.
    pub fn ranges(&self) -> &[(i64, i64)] {
        &self.ranges
    }

    /// Concatenated coding sequence (reverse-complemented for minus strand).
    pub fn coding_sequence(&self) -> &str {
        &self.coding_sequence
    }

    /// Protein sequence up to the first in-frame stop.
    pub fn protein(&self) -> &str {
        &self.protein
    }

    pub fn translation_table(&self) -> TranslationTable {
        self.translation_table
    }

    /// Does the position/range overlap any exon of this CDS?
    pub fn is_exon(&self, start: i64, end: Option<i64>) -> bool {
        let (qs, qe) = normalize_query(start, end);
        self.ranges.iter().any(|&(s, e)| qs < e && s < qe)
    }

    /// Does the position/range overlap the CDS span (introns included)?
    pub fn is_cds(&self, start: i64, end: Option<i64>) -> bool {
        let (qs, qe) = normalize_query(start, end);
        qs < self.end() && self.start() < qe
    }
}

fn normalize_query(start: i64, end: Option<i64>) -> (i64, i64) {
    match end {
        Some(e) => (start, e),
        None => (start, start + 1),
    }
}

/// The annotation model: every CDS of the reference genome, sorted by
/// genomic start. Symbols need not be unique across loci (overlapping ORFs).
#[derive(Debug, Clone)]
pub struct AnnotationModel {
    cds: Vec<Cds>,
}

impl AnnotationModel {
    /// Build the model from grouped CDS rows and the reference sequence.
    ///
    /// Fails with an annotation error when rows sharing a feature id disagree
    /// on symbol or strand, a range leaves the reference, or the translation
    /// table id is unknown.
    pub fn from_rows(
        rows: impl IntoIterator<Item = CdsFeatureRow>,
        reference: &str,
        translation_table: u32,
    ) -> Result<Self> {
        let table = TranslationTable::from_id(translation_table)?;

        // group by feature id, preserving first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut grouped: std::collections::HashMap<String, Vec<CdsFeatureRow>> =
            std::collections::HashMap::new();
        for row in rows {
            if !grouped.contains_key(&row.feature_id) {
                order.push(row.feature_id.clone());
            }
            grouped.entry(row.feature_id.clone()).or_default().push(row);
        }

        let mut cds = Vec::with_capacity(order.len());
        for id in order {
            let rows = &grouped[&id];
            let first = &rows[0];
            for row in &rows[1..] {
                if row.symbol != first.symbol {
                    return Err(VarbankError::annotation(format!(
                        "multiple symbols for locus {}",
                        first.locus
                    )));
                }
                if row.strand != first.strand {
                    return Err(VarbankError::annotation(format!(
                        "different strands for locus {}",
                        first.locus
                    )));
                }
            }
            let ranges: Vec<(i64, i64)> = rows.iter().map(|r| (r.start - 1, r.end)).collect();
            cds.push(Cds::assemble(
                first.locus.clone(),
                first.symbol.clone(),
                first.strand,
                ranges,
                reference,
                table,
            )?);
        }
        cds.sort_by_key(|c| c.start());
        Ok(AnnotationModel { cds })
    }

    /// Load from a GFF3 file (plain or gzipped). Only `CDS` feature lines are
    /// consumed; each needs `ID`, `gene` and `locus_tag` attributes.
    pub fn load_gff3(path: &Path, reference: &str, translation_table: u32) -> Result<Self> {
        let reader = open_text(path)?;
        let mut rows = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 9 || fields[2] != "CDS" {
                continue;
            }
            let attrs = fields[8];
            let feature_id = require_attribute(attrs, "ID", path, lineno)?;
            let symbol = require_attribute(attrs, "gene", path, lineno)?;
            let locus = require_attribute(attrs, "locus_tag", path, lineno)?;
            let start: i64 = fields[3].parse().map_err(|_| {
                VarbankError::annotation(format!(
                    "non-numeric start '{}' in {} line {}",
                    fields[3],
                    path.display(),
                    lineno + 1
                ))
            })?;
            let end: i64 = fields[4].parse().map_err(|_| {
                VarbankError::annotation(format!(
                    "non-numeric end '{}' in {} line {}",
                    fields[4],
                    path.display(),
                    lineno + 1
                ))
            })?;
            rows.push(CdsFeatureRow {
                feature_id,
                symbol,
                locus,
                start,
                end,
                strand: Strand::from_symbol(fields[6])?,
            });
        }
        AnnotationModel::from_rows(rows, reference, translation_table)
    }

    /// All CDS, sorted by genomic start.
    pub fn cds(&self) -> &[Cds] {
        &self.cds
    }

    /// Protein symbols in CDS order (duplicates possible).
    pub fn symbols(&self) -> Vec<&str> {
        self.cds.iter().map(|c| c.symbol()).collect()
    }

    /// Distinct protein symbols, for profile-grammar validation.
    pub fn symbol_set(&self) -> HashSet<String> {
        self.cds.iter().map(|c| c.symbol().to_string()).collect()
    }

    /// All CDS carrying the given symbol, in genomic order. Overlapping ORFs
    /// may share a symbol, so more than one match is possible.
    pub fn cds_by_symbol(&self, symbol: &str) -> Vec<&Cds> {
        self.cds.iter().filter(|c| c.symbol() == symbol).collect()
    }

    /// Does the position/range overlap the coding part of any CDS?
    pub fn is_exon(&self, start: i64, end: Option<i64>) -> bool {
        self.cds.iter().any(|c| c.is_exon(start, end))
    }

    /// Does the position/range overlap any CDS span?
    pub fn is_within_cds(&self, start: i64, end: Option<i64>) -> bool {
        self.cds.iter().any(|c| c.is_cds(start, end))
    }

    /// Whole-CDS spans `(start, end)`, 0-based half-open, ordered by start.
    pub fn coding_ranges(&self) -> Vec<(i64, i64)> {
        self.cds.iter().map(|c| (c.start(), c.end())).collect()
    }
}

fn require_attribute(attrs: &str, key: &str, path: &Path, lineno: usize) -> Result<String> {
    for pair in attrs.split(';') {
        if let Some((k, v)) = pair.split_once('=') {
            if k.trim() == key {
                return Ok(v.trim().to_string());
            }
        }
    }
    Err(VarbankError::annotation(format!(
        "required attribute '{}' missing in CDS feature ({} line {})",
        key,
        path.display(),
        lineno + 1
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, symbol: &str, locus: &str, start: i64, end: i64, strand: Strand) -> CdsFeatureRow {
        CdsFeatureRow {
            feature_id: id.to_string(),
            symbol: symbol.to_string(),
            locus: locus.to_string(),
            start,
            end,
            strand,
        }
    }

    // 30 nt reference; CDS "ORF1" covers [3,18) 0-based = ATGAAATTTGGGCCC
    const REF: &str = "AAAATGAAATTTGGGCCCTTTAAACCCGGG";

    fn model() -> AnnotationModel {
        AnnotationModel::from_rows(
            vec![row("cds1", "ORF1", "loc1", 4, 18, Strand::Plus)],
            REF,
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_cds_precomputes_sequences() {
        let m = model();
        let cds = &m.cds()[0];
        assert_eq!(cds.coding_sequence(), "ATGAAATTTGGGCCC");
        assert_eq!(cds.protein(), "MKFGP");
        assert_eq!(cds.start(), 3);
        assert_eq!(cds.end(), 18);
    }

    #[test]
    fn test_multi_exon_cds_joins_in_genomic_order() {
        let m = AnnotationModel::from_rows(
            vec![
                row("j", "ORFJ", "locj", 4, 9, Strand::Plus),
                row("j", "ORFJ", "locj", 13, 18, Strand::Plus),
            ],
            REF,
            1,
        )
        .unwrap();
        let cds = &m.cds()[0];
        assert_eq!(cds.ranges(), &[(3, 9), (12, 18)]);
        assert_eq!(cds.coding_sequence(), "ATGAAAGGGCCC");
        assert_eq!(cds.protein(), "MKGP");
    }

    #[test]
    fn test_minus_strand_reverse_complements() {
        // slice [3,18) revcomp'd: GGGCCCAAATTTCAT
        let m = AnnotationModel::from_rows(
            vec![row("m", "ORFM", "locm", 4, 18, Strand::Minus)],
            REF,
            1,
        )
        .unwrap();
        assert_eq!(m.cds()[0].coding_sequence(), "GGGCCCAAATTTCAT");
    }

    #[test]
    fn test_conflicting_symbol_rejected() {
        let err = AnnotationModel::from_rows(
            vec![
                row("x", "ORF1", "loc1", 4, 9, Strand::Plus),
                row("x", "ORF2", "loc1", 13, 18, Strand::Plus),
            ],
            REF,
            1,
        )
        .unwrap_err();
        assert!(err.to_string().contains("multiple symbols for locus loc1"));
    }

    #[test]
    fn test_conflicting_strand_rejected() {
        let err = AnnotationModel::from_rows(
            vec![
                row("x", "ORF1", "loc1", 4, 9, Strand::Plus),
                row("x", "ORF1", "loc1", 13, 18, Strand::Minus),
            ],
            REF,
            1,
        )
        .unwrap_err();
        assert!(err.to_string().contains("different strands for locus loc1"));
    }

    #[test]
    fn test_out_of_bounds_range_rejected() {
        let err = AnnotationModel::from_rows(
            vec![row("x", "ORF1", "loc1", 4, 99, Strand::Plus)],
            REF,
            1,
        )
        .unwrap_err();
        assert!(err.to_string().contains("outside reference bounds"));
    }

    #[test]
    fn test_unknown_translation_table_rejected_at_load() {
        let err = AnnotationModel::from_rows(
            vec![row("x", "ORF1", "loc1", 4, 18, Strand::Plus)],
            REF,
            7,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported translation table"));
    }

    #[test]
    fn test_exon_and_cds_predicates() {
        let m = AnnotationModel::from_rows(
            vec![
                row("j", "ORFJ", "locj", 4, 9, Strand::Plus),
                row("j", "ORFJ", "locj", 13, 18, Strand::Plus),
            ],
            REF,
            1,
        )
        .unwrap();
        assert!(m.is_exon(3, None));
        assert!(!m.is_exon(10, None)); // intron
        assert!(m.is_within_cds(10, None)); // intron is still inside the CDS
        assert!(!m.is_within_cds(20, None));
        // range overlap: [8, 13) touches the first exon's last base
        assert!(m.is_exon(8, Some(13)));
        // [9, 12) falls entirely in the intron
        assert!(!m.is_exon(9, Some(12)));
    }

    #[test]
    fn test_cds_sorted_by_start_and_symbols() {
        let m = AnnotationModel::from_rows(
            vec![
                row("b", "ORFB", "locb", 13, 18, Strand::Plus),
                row("a", "ORFA", "loca", 4, 9, Strand::Plus),
            ],
            REF,
            1,
        )
        .unwrap();
        assert_eq!(m.symbols(), vec!["ORFA", "ORFB"]);
        assert_eq!(m.coding_ranges(), vec![(3, 9), (12, 18)]);
    }

    #[test]
    fn test_cds_by_symbol_returns_every_locus() {
        let m = AnnotationModel::from_rows(
            vec![
                row("a", "ORFA", "loca", 4, 9, Strand::Plus),
                row("b", "ORFA", "locb", 13, 18, Strand::Plus),
                row("c", "ORFC", "locc", 19, 24, Strand::Plus),
            ],
            REF,
            1,
        )
        .unwrap();
        let hits = m.cds_by_symbol("ORFA");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].locus(), "loca");
        assert_eq!(hits[1].locus(), "locb");
        assert!(m.cds_by_symbol("ORFX").is_empty());
    }
}
