//! Sequence primitives: normalization, hashing and in-silico translation.
//!
//! All sequences handled by the crate are harmonized first (upper-cased,
//! RNA `U` rewritten to `T`); the content hash that keys the cache and the
//! store is computed over the harmonized bytes only.

use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::VarbankError;
use crate::Result;

/// Upper-case a nucleotide sequence and rewrite `U` to `T`.
pub fn harmonize(seq: &str) -> String {
    seq.trim()
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'U' => 'T',
            other => other,
        })
        .collect()
}

/// Reverse-complement a nucleotide sequence, honoring IUPAC ambiguity codes.
/// Gap characters are preserved.
pub fn reverse_complement(seq: &str) -> String {
    seq.chars().rev().map(complement).collect()
}

fn complement(c: char) -> char {
    match c {
        'A' => 'T',
        'T' => 'A',
        'G' => 'C',
        'C' => 'G',
        'R' => 'Y',
        'Y' => 'R',
        'S' => 'S',
        'W' => 'W',
        'K' => 'M',
        'M' => 'K',
        'B' => 'V',
        'V' => 'B',
        'D' => 'H',
        'H' => 'D',
        'a' => 't',
        't' => 'a',
        'g' => 'c',
        'c' => 'g',
        other => other,
    }
}

/// SHA-256 content hash of a harmonized sequence.
///
/// Rendered as lowercase hex, which is filesystem-safe as-is; the first two
/// hex characters shard the cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceHash([u8; 32]);

impl SequenceHash {
    /// Hash a harmonized sequence.
    pub fn compute(seq: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seq.as_bytes());
        SequenceHash(hasher.finalize().into())
    }

    /// Render as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| VarbankError::Io {
            msg: format!("invalid sequence hash '{}': {}", s, e),
        })?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| VarbankError::Io {
            msg: format!("invalid sequence hash '{}': wrong length", s),
        })?;
        Ok(SequenceHash(arr))
    }

    /// The two-character directory shard for this hash.
    pub fn shard(&self) -> String {
        self.to_hex()[..2].to_string()
    }
}

impl fmt::Display for SequenceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for SequenceHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SequenceHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SequenceHash::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Genetic code table used for translation.
///
/// Tables 1 (standard) and 11 (bacterial/archaeal/plant plastid) share one
/// codon→residue map and differ only in permitted start codons, which the
/// codon scan never consults. Other ids are rejected at annotation load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationTable {
    id: u32,
}

impl TranslationTable {
    /// Validate a table id. Unknown ids are fatal at load time, not per call.
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            1 | 11 => Ok(TranslationTable { id }),
            other => Err(VarbankError::annotation(format!(
                "unsupported translation table {}",
                other
            ))),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Translate a nucleotide sequence. A trailing partial codon is dropped;
    /// stop codons render as `*` and translation runs through them.
    pub fn translate(&self, seq: &str) -> String {
        let bytes = seq.as_bytes();
        let n = bytes.len() - bytes.len() % 3;
        (0..n)
            .step_by(3)
            .map(|i| translate_codon(bytes[i], bytes[i + 1], bytes[i + 2]))
            .collect()
    }

    /// Translate up to (excluding) the first in-frame stop codon.
    pub fn translate_to_stop(&self, seq: &str) -> String {
        let full = self.translate(seq);
        match full.find('*') {
            Some(i) => full[..i].to_string(),
            None => full,
        }
    }
}

impl Default for TranslationTable {
    fn default() -> Self {
        TranslationTable { id: 1 }
    }
}

/// Translate one codon. Codons containing ambiguity codes resolve to a
/// residue only when every expansion agrees; otherwise `X` (`*` only when
/// every expansion is a stop).
fn translate_codon(b1: u8, b2: u8, b3: u8) -> char {
    let (e1, e2, e3) = (expand(b1), expand(b2), expand(b3));
    if e1.is_empty() || e2.is_empty() || e3.is_empty() {
        return 'X';
    }
    if e1.len() == 1 && e2.len() == 1 && e3.len() == 1 {
        return codon_residue(e1[0], e2[0], e3[0]);
    }
    let mut residue = None;
    for &c1 in e1 {
        for &c2 in e2 {
            for &c3 in e3 {
                let aa = codon_residue(c1, c2, c3);
                match residue {
                    None => residue = Some(aa),
                    Some(prev) if prev == aa => {}
                    Some(_) => return 'X',
                }
            }
        }
    }
    residue.unwrap_or('X')
}

/// Explicit bases a (possibly ambiguous) nucleotide can stand for.
fn expand(b: u8) -> &'static [u8] {
    match b.to_ascii_uppercase() {
        b'A' => b"A",
        b'C' => b"C",
        b'G' => b"G",
        b'T' | b'U' => b"T",
        b'R' => b"AG",
        b'Y' => b"CT",
        b'S' => b"GC",
        b'W' => b"AT",
        b'K' => b"GT",
        b'M' => b"AC",
        b'B' => b"CGT",
        b'D' => b"AGT",
        b'H' => b"ACT",
        b'V' => b"ACG",
        b'N' => b"ACGT",
        _ => b"",
    }
}

/// The standard genetic code (NCBI tables 1 and 11).
fn codon_residue(b1: u8, b2: u8, b3: u8) -> char {
    match (b1, b2, b3) {
        (b'T', b'T', b'T') | (b'T', b'T', b'C') => 'F',
        (b'T', b'T', b'A') | (b'T', b'T', b'G') => 'L',
        (b'C', b'T', _) => 'L',
        (b'A', b'T', b'T') | (b'A', b'T', b'C') | (b'A', b'T', b'A') => 'I',
        (b'A', b'T', b'G') => 'M',
        (b'G', b'T', _) => 'V',
        (b'T', b'C', _) => 'S',
        (b'C', b'C', _) => 'P',
        (b'A', b'C', _) => 'T',
        (b'G', b'C', _) => 'A',
        (b'T', b'A', b'T') | (b'T', b'A', b'C') => 'Y',
        (b'T', b'A', b'A') | (b'T', b'A', b'G') => '*',
        (b'C', b'A', b'T') | (b'C', b'A', b'C') => 'H',
        (b'C', b'A', b'A') | (b'C', b'A', b'G') => 'Q',
        (b'A', b'A', b'T') | (b'A', b'A', b'C') => 'N',
        (b'A', b'A', b'A') | (b'A', b'A', b'G') => 'K',
        (b'G', b'A', b'T') | (b'G', b'A', b'C') => 'D',
        (b'G', b'A', b'A') | (b'G', b'A', b'G') => 'E',
        (b'T', b'G', b'T') | (b'T', b'G', b'C') => 'C',
        (b'T', b'G', b'A') => '*',
        (b'T', b'G', b'G') => 'W',
        (b'C', b'G', _) => 'R',
        (b'A', b'G', b'T') | (b'A', b'G', b'C') => 'S',
        (b'A', b'G', b'A') | (b'A', b'G', b'G') => 'R',
        (b'G', b'G', _) => 'G',
        _ => 'X',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmonize_uppercases_and_rewrites_u() {
        assert_eq!(harmonize("acgu"), "ACGT");
        assert_eq!(harmonize(" ACGUacgu\n"), "ACGTACGT");
        assert_eq!(harmonize("ACGT"), "ACGT");
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("ATGC"), "GCAT");
        assert_eq!(reverse_complement("AAAA"), "TTTT");
        assert_eq!(reverse_complement(""), "");
        // ambiguity codes complement pairwise
        assert_eq!(reverse_complement("RYKM"), "KMRY");
        // gaps survive untouched
        assert_eq!(reverse_complement("A-G"), "C-T");
    }

    #[test]
    fn test_hash_is_stable_and_hex() {
        let h = SequenceHash::compute("ACGT");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(h, SequenceHash::compute("ACGT"));
        assert_ne!(h, SequenceHash::compute("ACGA"));
        assert_eq!(h.shard(), h.to_hex()[..2].to_string());
    }

    #[test]
    fn test_hash_hex_round_trip() {
        let h = SequenceHash::compute("ACGT");
        let parsed = SequenceHash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
        assert!(SequenceHash::from_hex("zz").is_err());
        assert!(SequenceHash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_translate_basic() {
        let t = TranslationTable::default();
        assert_eq!(t.translate("ATGTGA"), "M*");
        assert_eq!(t.translate("ATGTTATGAATGGCC"), "ML*MA");
        // trailing partial codons are dropped
        assert_eq!(t.translate("ATGTGAAA"), "M*");
        assert_eq!(t.translate("AT"), "");
    }

    #[test]
    fn test_translate_to_stop() {
        let t = TranslationTable::default();
        assert_eq!(t.translate_to_stop("ATGTTATGAATGGCC"), "ML");
        assert_eq!(t.translate_to_stop("ATGGCC"), "MA");
    }

    #[test]
    fn test_translate_ambiguous_codons() {
        let t = TranslationTable::default();
        // GCN is alanine regardless of the wobble base
        assert_eq!(t.translate("GCN"), "A");
        // NNN cannot resolve
        assert_eq!(t.translate("NNN"), "X");
        // TAR (TAA/TAG) is always a stop
        assert_eq!(t.translate("TAR"), "*");
    }

    #[test]
    fn test_table_ids() {
        assert!(TranslationTable::from_id(1).is_ok());
        assert!(TranslationTable::from_id(11).is_ok());
        assert!(TranslationTable::from_id(2).is_err());
        assert!(TranslationTable::from_id(99).is_err());
    }
}
