//! Token-profile and metadata matching against the essence view.
//!
//! A match request is a set of filters: profile groups (tokens AND-ed
//! inside a group, groups OR-ed), accession and lineage lists with `^`
//! marking exclusion, zip-code prefixes, and dates or `start:end` date
//! ranges. Every profile token is grammar-checked and expanded through the
//! ambiguity tables before compilation, and the compiled SQL carries all
//! user values as `LIKE`/`IN` parameters; token text is never interpolated
//! into the statement.

use std::collections::HashSet;

use crate::annotation::AnnotationModel;
use crate::error::VarbankError;
use crate::profile::{filter_ambiguous, parse_token, pinpoint_mutation, TokenKind};
use crate::store::{GenomeRow, VariantStore};
use crate::Result;

/// Filter set for one match request. Empty fields do not constrain the
/// result. Accession, lineage, and date values are excluded instead of
/// included when prefixed with `^`.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub include_profiles: Vec<Vec<String>>,
    pub exclude_profiles: Vec<Vec<String>>,
    pub accessions: Vec<String>,
    pub lineages: Vec<String>,
    pub zips: Vec<String>,
    pub dates: Vec<String>,
    pub keep_ambiguous: bool,
}

/// One validated profile token with its ambiguity expansion.
struct ExpandedToken {
    kind: TokenKind,
    patterns: Vec<String>,
}

/// WHERE-clause fragments and their parameter values, kept in lockstep.
struct SqlFilter {
    clauses: Vec<String>,
    values: Vec<String>,
}

impl SqlFilter {
    fn new() -> Self {
        SqlFilter {
            clauses: Vec::new(),
            values: Vec::new(),
        }
    }
}

/// Run a match request and return the genome rows it selects, ordered by
/// accession. Unless the caller keeps ambiguities, single-letter ambiguous
/// calls are stripped from the returned profiles, except those the request
/// itself asked for.
pub fn match_genomes(
    store: &VariantStore,
    annotation: &AnnotationModel,
    filters: &QueryFilters,
) -> Result<Vec<GenomeRow>> {
    let symbols = annotation.symbol_set();
    let mut bad_tokens = Vec::new();
    let include = expand_groups(&filters.include_profiles, &symbols, &mut bad_tokens);
    let exclude = expand_groups(&filters.exclude_profiles, &symbols, &mut bad_tokens);
    if !bad_tokens.is_empty() {
        return Err(VarbankError::InvalidProfile { tokens: bad_tokens });
    }

    let mut filter = SqlFilter::new();
    include_profile_clause(&include, &mut filter);
    exclude_profile_clause(&exclude, &mut filter);
    let (accessions, negated) = split_negations(&filters.accessions);
    in_clause("accession", &accessions, false, &mut filter);
    in_clause("accession", &negated, true, &mut filter);
    let (lineages, negated) = split_negations(&filters.lineages);
    in_clause("lineage", &lineages, false, &mut filter);
    in_clause("lineage", &negated, true, &mut filter);
    zip_clause(&filters.zips, &mut filter);
    date_clause(&filters.dates, &mut filter)?;

    let mut sql = GenomeRow::SELECT.to_string();
    if !filter.clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&filter.clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY accession");

    let mut statement = store.connection().prepare(&sql)?;
    let mut rows = statement.query(rusqlite::params_from_iter(filter.values.iter()))?;
    let mut genomes = Vec::new();
    while let Some(row) = rows.next()? {
        genomes.push(GenomeRow::from_row(row)?);
    }

    if !filters.keep_ambiguous {
        let (dna_keep, aa_keep) = keep_sets(&include);
        for genome in &mut genomes {
            genome.dna_profile = filter_ambiguous(&genome.dna_profile, TokenKind::Nucleotide, &dna_keep);
            genome.aa_profile = filter_ambiguous(&genome.aa_profile, TokenKind::AminoAcid, &aa_keep);
        }
    }
    Ok(genomes)
}

/// Grammar-check every token and expand it through the ambiguity table for
/// its molecule kind. Offenders land in `bad_tokens` instead of aborting,
/// so one error can carry them all.
fn expand_groups(
    groups: &[Vec<String>],
    symbols: &HashSet<String>,
    bad_tokens: &mut Vec<String>,
) -> Vec<Vec<ExpandedToken>> {
    groups
        .iter()
        .map(|group| {
            group
                .iter()
                .filter_map(|token| match parse_token(token, symbols) {
                    Ok(parsed) => {
                        let kind = parsed.kind();
                        let patterns = pinpoint_mutation(token, kind).into_iter().collect();
                        Some(ExpandedToken { kind, patterns })
                    }
                    Err(_) => {
                        bad_tokens.push(token.clone());
                        None
                    }
                })
                .collect()
        })
        .collect()
}

fn column_for(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Nucleotide => "dna_profile",
        TokenKind::AminoAcid => "aa_profile",
    }
}

/// A stored profile contains a token iff it contains `" token "`.
fn contains_pattern(token: &str) -> String {
    format!("% {} %", token)
}

fn include_profile_clause(groups: &[Vec<ExpandedToken>], filter: &mut SqlFilter) {
    let mut group_clauses = Vec::new();
    for group in groups.iter().filter(|group| !group.is_empty()) {
        let mut token_clauses = Vec::new();
        for token in group {
            let column = column_for(token.kind);
            let alternatives = token
                .patterns
                .iter()
                .map(|_| format!("{} LIKE ?", column))
                .collect::<Vec<_>>()
                .join(" OR ");
            token_clauses.push(format!("({})", alternatives));
            filter
                .values
                .extend(token.patterns.iter().map(|p| contains_pattern(p)));
        }
        group_clauses.push(format!("({})", token_clauses.join(" AND ")));
    }
    if !group_clauses.is_empty() {
        filter.clauses.push(format!("({})", group_clauses.join(" OR ")));
    }
}

fn exclude_profile_clause(groups: &[Vec<ExpandedToken>], filter: &mut SqlFilter) {
    let mut group_clauses = Vec::new();
    for group in groups.iter().filter(|group| !group.is_empty()) {
        let mut token_clauses = Vec::new();
        for token in group {
            let column = column_for(token.kind);
            let alternatives = token
                .patterns
                .iter()
                .map(|_| format!("{} NOT LIKE ?", column))
                .collect::<Vec<_>>()
                .join(" AND ");
            token_clauses.push(format!("({})", alternatives));
            filter
                .values
                .extend(token.patterns.iter().map(|p| contains_pattern(p)));
        }
        group_clauses.push(format!("({})", token_clauses.join(" AND ")));
    }
    if !group_clauses.is_empty() {
        filter.clauses.push(format!("({})", group_clauses.join(" OR ")));
    }
}

/// Split raw filter values into (included, excluded) by the `^` prefix.
fn split_negations(values: &[String]) -> (Vec<String>, Vec<String>) {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for value in values {
        match value.strip_prefix('^') {
            Some(negated) => exclude.push(negated.to_string()),
            None => include.push(value.clone()),
        }
    }
    (include, exclude)
}

fn in_clause(column: &str, values: &[String], negate: bool, filter: &mut SqlFilter) {
    if values.is_empty() {
        return;
    }
    let marks = vec!["?"; values.len()].join(", ");
    let operator = if negate { "NOT IN" } else { "IN" };
    filter
        .clauses
        .push(format!("{} {} ({})", column, operator, marks));
    filter.values.extend(values.iter().cloned());
}

fn zip_clause(zips: &[String], filter: &mut SqlFilter) {
    let (include, exclude) = split_negations(zips);
    if !include.is_empty() {
        let alternatives = include
            .iter()
            .map(|_| "zip LIKE ?".to_string())
            .collect::<Vec<_>>()
            .join(" OR ");
        filter.clauses.push(format!("({})", alternatives));
        filter.values.extend(include.iter().map(|zip| format!("{}%", zip)));
    }
    if !exclude.is_empty() {
        let conjunction = exclude
            .iter()
            .map(|_| "zip NOT LIKE ?".to_string())
            .collect::<Vec<_>>()
            .join(" AND ");
        filter.clauses.push(format!("({})", conjunction));
        filter.values.extend(exclude.iter().map(|zip| format!("{}%", zip)));
    }
}

fn date_clause(dates: &[String], filter: &mut SqlFilter) -> Result<()> {
    let (include, exclude) = split_negations(dates);
    if !include.is_empty() {
        let mut alternatives = Vec::new();
        for date in &include {
            match parse_date_filter(date)? {
                (start, Some(end)) => {
                    alternatives.push("date BETWEEN ? AND ?".to_string());
                    filter.values.push(start);
                    filter.values.push(end);
                }
                (exact, None) => {
                    alternatives.push("date = ?".to_string());
                    filter.values.push(exact);
                }
            }
        }
        filter.clauses.push(format!("({})", alternatives.join(" OR ")));
    }
    if !exclude.is_empty() {
        let mut conjunction = Vec::new();
        for date in &exclude {
            match parse_date_filter(date)? {
                (start, Some(end)) => {
                    conjunction.push("date NOT BETWEEN ? AND ?".to_string());
                    filter.values.push(start);
                    filter.values.push(end);
                }
                (exact, None) => {
                    conjunction.push("date != ?".to_string());
                    filter.values.push(exact);
                }
            }
        }
        filter.clauses.push(format!("({})", conjunction.join(" AND ")));
    }
    Ok(())
}

/// Validate a date filter value: either `YYYY-MM-DD` or an inclusive
/// `YYYY-MM-DD:YYYY-MM-DD` range.
fn parse_date_filter(value: &str) -> Result<(String, Option<String>)> {
    let invalid = || VarbankError::InvalidDate {
        value: value.to_string(),
    };
    match value.split_once(':') {
        Some((start, end)) => {
            check_date(start).map_err(|_| invalid())?;
            check_date(end).map_err(|_| invalid())?;
            Ok((start.to_string(), Some(end.to_string())))
        }
        None => {
            check_date(value).map_err(|_| invalid())?;
            Ok((value.to_string(), None))
        }
    }
}

fn check_date(value: &str) -> std::result::Result<(), chrono::ParseError> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
    Ok(())
}

/// Tokens the request matched on survive ambiguity filtering in the output,
/// including every member of their expansions.
fn keep_sets(include: &[Vec<ExpandedToken>]) -> (HashSet<String>, HashSet<String>) {
    let mut dna_keep = HashSet::new();
    let mut aa_keep = HashSet::new();
    for group in include {
        for token in group {
            let keep = match token.kind {
                TokenKind::Nucleotide => &mut dna_keep,
                TokenKind::AminoAcid => &mut aa_keep,
            };
            keep.extend(token.patterns.iter().cloned());
        }
    }
    (dna_keep, aa_keep)
}
