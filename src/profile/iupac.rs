//! IUPAC ambiguity codes and their profile-level handling.
//!
//! Each code letter maps to the set of explicit letters it covers, with the
//! code itself included so that an expanded query still matches profiles that
//! store the ambiguous call verbatim.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use once_cell::sync::Lazy;

use super::parser::is_deletion_shape;
use super::token::TokenKind;

pub type CodeTable = BTreeMap<char, BTreeSet<char>>;

static NUC_CODE: Lazy<CodeTable> = Lazy::new(|| {
    let mut table = CodeTable::new();
    for (code, members) in [
        ('A', "A"),
        ('C', "C"),
        ('G', "G"),
        ('T', "T"),
        ('R', "AGR"),
        ('Y', "CTY"),
        ('S', "GCS"),
        ('W', "ATW"),
        ('K', "GTK"),
        ('M', "ACM"),
        ('B', "CGTB"),
        ('D', "AGTD"),
        ('H', "ACTH"),
        ('V', "ACGV"),
    ] {
        table.insert(code, members.chars().collect());
    }
    let every: BTreeSet<char> = table.keys().copied().chain(['N']).collect();
    table.insert('N', every);
    table
});

static AA_CODE: Lazy<CodeTable> = Lazy::new(|| {
    let mut table = CodeTable::new();
    for residue in "ARNDCQEGHILKMFPSTWYVUO".chars() {
        table.insert(residue, BTreeSet::from([residue]));
    }
    for (code, members) in [
        ('B', "DNB"),
        ('Z', "EQZ"),
        ('J', "ILJ"),
        ('\u{3a6}', "VILFWYM\u{3a6}"),
        ('\u{3a9}', "FWYH\u{3a9}"),
        ('\u{3a8}', "VILM\u{3a8}"),
        ('\u{3c0}', "PGAS\u{3c0}"),
        ('\u{3b6}', "STHNQEDKR\u{3b6}"),
        ('+', "KRH+"),
        ('-', "DE-"),
    ] {
        table.insert(code, members.chars().collect());
    }
    let every: BTreeSet<char> = table.keys().copied().chain(['X']).collect();
    table.insert('X', every);
    table
});

static NUC_EXPLICIT: Lazy<BTreeSet<char>> = Lazy::new(|| partition(&NUC_CODE, true));
static NUC_AMBIGUOUS: Lazy<BTreeSet<char>> = Lazy::new(|| partition(&NUC_CODE, false));
static AA_EXPLICIT: Lazy<BTreeSet<char>> = Lazy::new(|| partition(&AA_CODE, true));
static AA_AMBIGUOUS: Lazy<BTreeSet<char>> = Lazy::new(|| partition(&AA_CODE, false));

/// Split a code table by mapped-set size: 1 = explicit, >1 = ambiguous.
fn partition(code: &CodeTable, explicit: bool) -> BTreeSet<char> {
    code.iter()
        .filter(|(_, members)| (members.len() == 1) == explicit)
        .map(|(c, _)| *c)
        .collect()
}

pub fn code_table(kind: TokenKind) -> &'static CodeTable {
    match kind {
        TokenKind::Nucleotide => &NUC_CODE,
        TokenKind::AminoAcid => &AA_CODE,
    }
}

pub fn explicit_letters(kind: TokenKind) -> &'static BTreeSet<char> {
    match kind {
        TokenKind::Nucleotide => &NUC_EXPLICIT,
        TokenKind::AminoAcid => &AA_EXPLICIT,
    }
}

pub fn ambiguous_letters(kind: TokenKind) -> &'static BTreeSet<char> {
    match kind {
        TokenKind::Nucleotide => &NUC_AMBIGUOUS,
        TokenKind::AminoAcid => &AA_AMBIGUOUS,
    }
}

/// Byte offset where the trailing run of code letters starts. `token.len()`
/// when the token ends in something else, deletions included.
fn trailing_run_start(token: &str, code: &CodeTable) -> usize {
    let mut start = token.len();
    for (index, c) in token.char_indices().rev() {
        if code.contains_key(&c) {
            start = index;
        } else {
            break;
        }
    }
    start
}

/// Expand the trailing letters of a variant expression into every explicit
/// combination the ambiguity codes cover. The original expression is always
/// part of the result, so deletions and unexpandable tokens come back as
/// singletons.
///
/// ```
/// use varbank::profile::{pinpoint_mutation, TokenKind};
///
/// let expanded = pinpoint_mutation("A5001N", TokenKind::Nucleotide);
/// assert_eq!(expanded.len(), 15);
/// assert!(expanded.contains("A5001T"));
/// assert!(expanded.contains("A5001N"));
/// ```
pub fn pinpoint_mutation(token: &str, kind: TokenKind) -> BTreeSet<String> {
    let code = code_table(kind);
    let mut expanded = BTreeSet::new();
    expanded.insert(token.to_string());
    let run_start = trailing_run_start(token, code);
    if run_start == token.len() {
        return expanded;
    }
    let prefix = &token[..run_start];
    let mut combinations = vec![String::new()];
    for c in token[run_start..].chars() {
        let members = &code[&c];
        let mut next = Vec::with_capacity(combinations.len() * members.len());
        for base in &combinations {
            for member in members {
                let mut grown = base.clone();
                grown.push(*member);
                next.push(grown);
            }
        }
        combinations = next;
    }
    for combination in combinations {
        expanded.insert(format!("{}{}", prefix, combination));
    }
    expanded
}

/// Strip single-letter ambiguity calls out of a profile. Deletions and any
/// token in `keep` survive; so do multi-letter alternates, which carry more
/// signal than a lone ambiguous call.
pub fn filter_ambiguous(profile: &str, kind: TokenKind, keep: &HashSet<String>) -> String {
    let code = code_table(kind);
    let explicit = explicit_letters(kind);
    profile
        .split(' ')
        .filter(|token| !token.is_empty())
        .filter(|token| {
            if keep.contains(*token) || is_deletion_shape(token) {
                return true;
            }
            let mut run = token[trailing_run_start(token, code)..].chars();
            match (run.next(), run.next()) {
                (Some(only), None) => explicit.contains(&only),
                _ => true,
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
