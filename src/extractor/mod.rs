//! Variant extraction from pairwise genome alignments.
//!
//! This module walks a gapped alignment of a sample genome against the
//! reference and produces [`Variant`] records on two levels: nucleotide
//! variants over the whole genome and amino acid variants per annotated CDS.
//!
//! # Example
//!
//! ```
//! use varbank::extractor::nucleotide_diffs;
//!
//! // column 1: C in the reference, G in the sample
//! let vars = nucleotide_diffs("ACGT", "AGGT").unwrap();
//!
//! assert_eq!(vars.len(), 1);
//! assert_eq!(vars[0].start, 1);
//! assert_eq!(vars[0].reference, "C");
//! assert_eq!(vars[0].alternate, "G");
//! ```

mod dna;
mod protein;

pub use dna::nucleotide_diffs;
pub use protein::amino_acid_diffs;

use serde::{Deserialize, Serialize};

/// One sequence difference against the reference.
///
/// Coordinates are 0-based. `start` is the first affected residue, except for
/// insertions before the first reference base, which use `start == -1`.
/// `end` (exclusive) is set for deletions only; substitutions and insertions
/// leave it unset and carry the observed residues in `alternate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Protein symbol for amino acid variants, `None` on the nucleotide level.
    pub symbol: Option<String>,
    /// Locus tag of the CDS for amino acid variants.
    pub locus: Option<String>,
    pub start: i64,
    pub end: Option<i64>,
    /// Reference residues; empty for a pure insertion.
    pub reference: String,
    /// Observed residues; empty for a deletion.
    pub alternate: String,
}

impl Variant {
    pub fn nucleotide(
        reference: impl Into<String>,
        alternate: impl Into<String>,
        start: i64,
        end: Option<i64>,
    ) -> Self {
        Variant {
            symbol: None,
            locus: None,
            start,
            end,
            reference: reference.into(),
            alternate: alternate.into(),
        }
    }

    pub fn protein(
        symbol: impl Into<String>,
        locus: impl Into<String>,
        reference: impl Into<String>,
        alternate: impl Into<String>,
        start: i64,
        end: Option<i64>,
    ) -> Self {
        Variant {
            symbol: Some(symbol.into()),
            locus: Some(locus.into()),
            start,
            end,
            reference: reference.into(),
            alternate: alternate.into(),
        }
    }

    /// True when the observed sequence lacks the reference residues.
    pub fn is_deletion(&self) -> bool {
        self.alternate.is_empty()
    }

    /// True for an insertion before the first reference base.
    pub fn is_prefix_insertion(&self) -> bool {
        self.start < 0
    }
}
