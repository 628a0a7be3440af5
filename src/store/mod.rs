//! SQLite-backed variant store.
//!
//! One database holds every imported genome: metadata rows, deduplicated
//! sequences keyed by content hash, deduplicated variant rows with link
//! tables, and the space-padded profile strings that token queries run
//! against. Writers open a normal connection in WAL mode with one deferred
//! transaction per genome; matching opens a separate read-only connection
//! (see [`query`]).
//!
//! The store never trusts itself: [`VariantStore::verify_genome`] rebuilds
//! an imported sequence from the stored variant rows and, independently,
//! from the profile string, and any byte difference is a
//! [`VarbankError::DataConsistency`].

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction};
use serde::Serialize;

use crate::align::Alignment;
use crate::annotation::AnnotationModel;
use crate::cache::GenomeRecord;
use crate::error::VarbankError;
use crate::extractor::Variant;
use crate::profile::{self, ReplayOp};
use crate::Result;

pub mod query;

pub use query::{match_genomes, QueryFilters};

/// Schema version stamped into the tags table.
const VERSION: &str = "1";
const KEY_VERSION: &str = "version";
const KEY_REFERENCE: &str = "reference";

/// Optional per-genome metadata columns. Fields left `None` are not touched
/// by an update.
#[derive(Debug, Clone, Default)]
pub struct GenomeMetadata {
    pub lineage: Option<String>,
    pub zip: Option<String>,
    pub date: Option<String>,
    pub gisaid: Option<String>,
    pub ena: Option<String>,
    pub collection: Option<String>,
    pub source: Option<String>,
    pub lab: Option<String>,
}

impl GenomeMetadata {
    fn assignments(&self) -> (Vec<&'static str>, Vec<String>) {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in [
            ("lineage", &self.lineage),
            ("zip", &self.zip),
            ("date", &self.date),
            ("gisaid", &self.gisaid),
            ("ena", &self.ena),
            ("collection", &self.collection),
            ("source", &self.source),
            ("lab", &self.lab),
        ] {
            if let Some(value) = value {
                columns.push(column);
                values.push(value.clone());
            }
        }
        (columns, values)
    }

    pub fn is_empty(&self) -> bool {
        self.assignments().0.is_empty()
    }
}

/// One row of the essence view: genome metadata joined with its sequence's
/// profiles. Profile strings are stripped of their storage padding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenomeRow {
    pub accession: String,
    pub description: String,
    pub seqhash: String,
    pub lineage: Option<String>,
    pub zip: Option<String>,
    pub date: Option<String>,
    pub gisaid: Option<String>,
    pub ena: Option<String>,
    pub collection: Option<String>,
    pub source: Option<String>,
    pub lab: Option<String>,
    pub dna_profile: String,
    pub aa_profile: String,
}

impl GenomeRow {
    pub(crate) const SELECT: &'static str = "SELECT accession, description, seqhash, lineage, \
        zip, date, gisaid, ena, collection, source, lab, dna_profile, aa_profile FROM essence";

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GenomeRow> {
        Ok(GenomeRow {
            accession: row.get(0)?,
            description: row.get(1)?,
            seqhash: row.get(2)?,
            lineage: row.get(3)?,
            zip: row.get(4)?,
            date: row.get(5)?,
            gisaid: row.get(6)?,
            ena: row.get(7)?,
            collection: row.get(8)?,
            source: row.get(9)?,
            lab: row.get(10)?,
            dna_profile: trimmed(row.get(11)?),
            aa_profile: trimmed(row.get(12)?),
        })
    }
}

/// One DNA variant row linked to an accession, read back from `dna_view`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnaRow {
    pub start: i64,
    pub end: i64,
    pub reference: String,
    pub alternate: String,
}

/// Aggregate counts for the info command.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub genomes: usize,
    pub sequences: usize,
    pub dna_variants: usize,
    pub protein_variants: usize,
    pub earliest_date: Option<String>,
    pub latest_date: Option<String>,
}

/// A genome whose DNA profile shifts the reading frame of at least one CDS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameshiftRecord {
    pub accession: String,
    pub tokens: Vec<String>,
}

/// Connection to a variant database.
#[derive(Debug)]
pub struct VariantStore {
    connection: Connection,
}

impl VariantStore {
    /// Open a database for writing, creating the schema on first use. The
    /// reference accession is pinned in the tags table; reopening with a
    /// different reference is an error, as all stored coordinates would be
    /// meaningless against it.
    pub fn open_or_create<P: AsRef<Path>>(path: P, reference_accession: &str) -> Result<Self> {
        let connection = Connection::open(path.as_ref())?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&connection)?;
        let mut store = VariantStore { connection };
        store.init_tags(reference_accession)?;
        Ok(store)
    }

    /// Open an existing database for writing, keeping whatever reference it
    /// was built against.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connection = Connection::open(path.as_ref())?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        let store = VariantStore { connection };
        store.check_version()?;
        Ok(store)
    }

    /// Open an existing database read-only, for matching.
    pub fn open_readonly<P: AsRef<Path>>(path: P) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(path.as_ref(), flags)?;
        let store = VariantStore { connection };
        store.check_version()?;
        Ok(store)
    }

    fn check_version(&self) -> Result<()> {
        match self.tag(KEY_VERSION)? {
            Some(found) if found == VERSION => Ok(()),
            Some(found) => Err(version_mismatch(&found)),
            None => Err(VarbankError::store(
                "not a variant database (missing version tag)",
            )),
        }
    }

    fn init_tags(&mut self, reference_accession: &str) -> Result<()> {
        match self.tag(KEY_VERSION)? {
            None => {
                let transaction = self.connection.transaction()?;
                {
                    let mut insert =
                        transaction.prepare("INSERT INTO tags (key, value) VALUES (?1, ?2)")?;
                    insert.execute((KEY_VERSION, VERSION))?;
                    insert.execute((KEY_REFERENCE, reference_accession))?;
                }
                transaction.commit()?;
            }
            Some(found) if found != VERSION => return Err(version_mismatch(&found)),
            Some(_) => {
                let stored = self.tag(KEY_REFERENCE)?.unwrap_or_default();
                if stored != reference_accession {
                    return Err(VarbankError::store(format!(
                        "database was built for reference '{}', not '{}'",
                        stored, reference_accession
                    )));
                }
            }
        }
        Ok(())
    }

    fn tag(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .connection
            .query_row("SELECT value FROM tags WHERE key = ?1", (key,), |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Accession of the reference the database was built against.
    pub fn reference_accession(&self) -> Result<String> {
        self.tag(KEY_REFERENCE)?
            .ok_or_else(|| VarbankError::store("missing reference tag"))
    }

    /// Insert one processed genome inside a single deferred transaction:
    /// sequence and profile rows (ignored when the hash is already known),
    /// deduplicated variant rows with link entries, then the genome row
    /// itself. Re-adding an accession replaces its genome row.
    pub fn add_genome(
        &mut self,
        accession: &str,
        description: &str,
        record: &GenomeRecord,
    ) -> Result<()> {
        let seqhash = record.sequence_hash.to_hex();
        let transaction = self.connection.transaction()?;
        {
            transaction.execute(
                "INSERT OR IGNORE INTO sequence (seqhash) VALUES (?1)",
                (&seqhash,),
            )?;
            transaction.execute(
                "INSERT OR IGNORE INTO profile (seqhash, dna_profile, aa_profile) \
                 VALUES (?1, ?2, ?3)",
                (&seqhash, pad(&record.dna_profile), pad(&record.protein_profile)),
            )?;
            for variant in &record.dna_variants {
                let varid = dna_variant_id(&transaction, variant)?;
                transaction.execute(
                    "INSERT OR IGNORE INTO sequence2dna (seqhash, varid) VALUES (?1, ?2)",
                    (&seqhash, varid),
                )?;
            }
            for variant in &record.protein_variants {
                let varid = protein_variant_id(&transaction, variant)?;
                transaction.execute(
                    "INSERT OR IGNORE INTO sequence2prot (seqhash, varid) VALUES (?1, ?2)",
                    (&seqhash, varid),
                )?;
            }
            transaction.execute(
                "INSERT OR REPLACE INTO genome (accession, description, seqhash) \
                 VALUES (?1, ?2, ?3)",
                (accession, description, &seqhash),
            )?;
        }
        transaction.commit()?;
        Ok(())
    }

    /// Update metadata columns for an accession. Only fields present in
    /// `update` are written; an all-`None` update is a no-op.
    pub fn update_genome(&mut self, accession: &str, update: &GenomeMetadata) -> Result<()> {
        let (columns, mut values) = update.assignments();
        if columns.is_empty() {
            return Ok(());
        }
        let assignments = columns
            .iter()
            .map(|column| format!("{} = ?", column))
            .collect::<Vec<_>>()
            .join(", ");
        values.push(accession.to_string());
        // column names are compile-time literals, values ride as parameters
        let sql = format!("UPDATE genome SET {} WHERE accession = ?", assignments);
        let updated = self
            .connection
            .execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        if updated == 0 {
            return Err(VarbankError::UnknownAccession {
                accession: accession.to_string(),
            });
        }
        Ok(())
    }

    /// Delete a genome. Its profile, variant links, and sequence row go with
    /// it only when no other accession shares the sequence hash; variant
    /// rows themselves are never removed, as they may be linked elsewhere.
    pub fn delete_genome(&mut self, accession: &str) -> Result<()> {
        let transaction = self.connection.transaction()?;
        let seqhash: Option<String> = transaction
            .query_row(
                "SELECT seqhash FROM genome WHERE accession = ?1",
                (accession,),
                |row| row.get(0),
            )
            .optional()?;
        let seqhash = match seqhash {
            Some(seqhash) => seqhash,
            None => {
                return Err(VarbankError::UnknownAccession {
                    accession: accession.to_string(),
                })
            }
        };
        transaction.execute("DELETE FROM genome WHERE accession = ?1", (accession,))?;
        let others: usize = transaction.query_row(
            "SELECT COUNT(*) FROM genome WHERE seqhash = ?1",
            (&seqhash,),
            |row| row.get(0),
        )?;
        if others == 0 {
            transaction.execute("DELETE FROM sequence2dna WHERE seqhash = ?1", (&seqhash,))?;
            transaction.execute("DELETE FROM sequence2prot WHERE seqhash = ?1", (&seqhash,))?;
            transaction.execute("DELETE FROM profile WHERE seqhash = ?1", (&seqhash,))?;
            transaction.execute("DELETE FROM sequence WHERE seqhash = ?1", (&seqhash,))?;
        }
        transaction.commit()?;
        Ok(())
    }

    /// Look up one genome in the essence view.
    pub fn genome(&self, accession: &str) -> Result<Option<GenomeRow>> {
        let sql = format!("{} WHERE accession = ?1", GenomeRow::SELECT);
        let row = self
            .connection
            .query_row(&sql, (accession,), GenomeRow::from_row)
            .optional()?;
        Ok(row)
    }

    /// All stored accessions in lexicographic order.
    pub fn accessions(&self) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT accession FROM genome ORDER BY accession")?;
        let mut rows = statement.query(())?;
        let mut accessions = Vec::new();
        while let Some(row) = rows.next()? {
            accessions.push(row.get(0)?);
        }
        Ok(accessions)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let genomes = self.count("SELECT COUNT(*) FROM genome")?;
        let sequences = self.count("SELECT COUNT(*) FROM sequence")?;
        let dna_variants = self.count("SELECT COUNT(*) FROM dna")?;
        let protein_variants = self.count("SELECT COUNT(*) FROM prot")?;
        let (earliest_date, latest_date) = self.connection.query_row(
            "SELECT MIN(date), MAX(date) FROM genome",
            (),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoreStats {
            genomes,
            sequences,
            dna_variants,
            protein_variants,
            earliest_date,
            latest_date,
        })
    }

    fn count(&self, sql: &str) -> Result<usize> {
        Ok(self.connection.query_row(sql, (), |row| row.get(0))?)
    }

    /// DNA variant rows linked to an accession, in genomic order. A genome
    /// with no variants yields an empty list; an unknown accession is an
    /// error (the view emits one all-NULL variant row for variant-free
    /// genomes, so absence of rows means absence of the genome).
    pub fn dna_rows(&self, accession: &str) -> Result<Vec<DnaRow>> {
        let mut statement = self.connection.prepare(
            "SELECT start, \"end\", ref, alt FROM dna_view WHERE accession = ?1 ORDER BY start",
        )?;
        let mut rows = statement.query((accession,))?;
        let mut variants = Vec::new();
        let mut seen = false;
        while let Some(row) = rows.next()? {
            seen = true;
            let start: Option<i64> = row.get(0)?;
            let start = match start {
                Some(start) => start,
                None => continue,
            };
            variants.push(DnaRow {
                start,
                end: row.get(1)?,
                reference: row.get(2)?,
                alternate: row.get(3)?,
            });
        }
        if !seen {
            return Err(VarbankError::UnknownAccession {
                accession: accession.to_string(),
            });
        }
        Ok(variants)
    }

    /// Rebuild the imported sequence from the stored DNA variant rows,
    /// checking every stored reference residue against the live reference.
    pub fn restore_sequence_from_variants(
        &self,
        accession: &str,
        reference: &str,
    ) -> Result<String> {
        let rows = self.dna_rows(accession)?;
        let mut prefix = String::new();
        let mut parts: Vec<String> = reference.chars().map(String::from).collect();
        for row in rows {
            if row.start < 0 {
                prefix = row.alternate;
                continue;
            }
            check_reference_site(accession, reference, row.start, &row.reference)?;
            parts[row.start as usize] = row.alternate.clone();
            for position in row.start + 1..row.end {
                clear_site(accession, &mut parts, position)?;
            }
        }
        Ok(format!("{}{}", prefix, parts.concat()))
    }

    /// Rebuild the imported sequence from the stored profile string alone,
    /// as an independent cross-check of the variant-row path.
    pub fn restore_sequence_from_profile(
        &self,
        accession: &str,
        reference: &str,
    ) -> Result<String> {
        let row = self
            .genome(accession)?
            .ok_or_else(|| VarbankError::UnknownAccession {
                accession: accession.to_string(),
            })?;
        let mut prefix = String::new();
        let mut parts: Vec<String> = reference.chars().map(String::from).collect();
        for token in row.dna_profile.split(' ').filter(|t| !t.is_empty()) {
            match profile::parse_replay_token(token)? {
                ReplayOp::Clear { start, end } => {
                    for position in start..end {
                        clear_site(accession, &mut parts, position)?;
                    }
                }
                ReplayOp::Set {
                    position,
                    reference: stored,
                    alternate,
                } => {
                    if position < 0 {
                        prefix = alternate;
                        continue;
                    }
                    check_reference_site(accession, reference, position, &stored)?;
                    parts[position as usize] = alternate;
                }
            }
        }
        Ok(format!("{}{}", prefix, parts.concat()))
    }

    /// Rebuild the pairwise alignment of an imported genome against the
    /// reference: deleted sites become gaps in the query, insertions pad
    /// the target with gaps after the anchor base, and an anchorless prefix
    /// insertion opens the target with a gap run.
    pub fn restore_alignment(&self, accession: &str, reference: &str) -> Result<Alignment> {
        let rows = self.dna_rows(accession)?;
        let mut query_prefix = String::new();
        let mut target_prefix = String::new();
        let mut query: Vec<String> = reference.chars().map(String::from).collect();
        let mut target = query.clone();
        for row in rows {
            if row.start < 0 {
                target_prefix = "-".repeat(row.alternate.len());
                query_prefix = row.alternate;
                continue;
            }
            check_reference_site(accession, reference, row.start, &row.reference)?;
            let index = row.start as usize;
            if row.alternate.is_empty() {
                for position in row.start..row.end {
                    if position as usize >= query.len() {
                        return Err(beyond_reference(accession, position));
                    }
                    query[position as usize] = "-".to_string();
                }
            } else {
                query[index] = row.alternate.clone();
                if row.alternate.len() > 1 {
                    target[index] =
                        format!("{}{}", row.reference, "-".repeat(row.alternate.len() - 1));
                }
            }
        }
        Ok(Alignment {
            query: format!("{}{}", query_prefix, query.concat()),
            target: format!("{}{}", target_prefix, target.concat()),
        })
    }

    /// The post-import gate: restore the genome through both independent
    /// paths and require byte equality with the imported sequence. With
    /// `auto_delete` a corrupt genome is removed before the error returns.
    pub fn verify_genome(
        &mut self,
        accession: &str,
        imported: &str,
        reference: &str,
        auto_delete: bool,
    ) -> Result<()> {
        match self.compare_restores(accession, imported, reference) {
            Err(err) if auto_delete && err.is_corruption() => {
                log::warn!("removing '{}' after failed verification: {}", accession, err);
                self.delete_genome(accession)?;
                Err(err)
            }
            other => other,
        }
    }

    fn compare_restores(&self, accession: &str, imported: &str, reference: &str) -> Result<()> {
        for (source, restored) in [
            (
                "variant rows",
                self.restore_sequence_from_variants(accession, reference)?,
            ),
            (
                "profile",
                self.restore_sequence_from_profile(accession, reference)?,
            ),
        ] {
            if restored != imported {
                let position = first_difference(&restored, imported);
                return Err(VarbankError::inconsistency(
                    accession,
                    format!(
                        "sequence restored from {} differs from the imported sequence at position {}",
                        source,
                        position + 1
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Scan every stored DNA profile for frameshift variants against the
    /// annotation, reporting only genomes that have at least one.
    pub fn frameshift_report(&self, annotation: &AnnotationModel) -> Result<Vec<FrameshiftRecord>> {
        let mut statement = self
            .connection
            .prepare("SELECT accession, dna_profile FROM essence ORDER BY accession")?;
        let mut rows = statement.query(())?;
        let mut report = Vec::new();
        while let Some(row) = rows.next()? {
            let accession: String = row.get(0)?;
            let dna_profile = trimmed(row.get(1)?);
            let tokens = profile::frameshift_tokens(&dna_profile, annotation)?;
            if !tokens.is_empty() {
                report.push(FrameshiftRecord { accession, tokens });
            }
        }
        Ok(report)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }
}

fn create_schema(connection: &Connection) -> Result<()> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS tags (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS sequence (
            seqhash TEXT PRIMARY KEY
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS genome (
            accession TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            seqhash TEXT NOT NULL REFERENCES sequence (seqhash),
            lineage TEXT,
            zip TEXT,
            date TEXT,
            gisaid TEXT,
            ena TEXT,
            collection TEXT,
            source TEXT,
            lab TEXT
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS profile (
            seqhash TEXT PRIMARY KEY REFERENCES sequence (seqhash),
            dna_profile TEXT NOT NULL,
            aa_profile TEXT NOT NULL
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS dna (
            varid INTEGER PRIMARY KEY,
            start INTEGER NOT NULL,
            \"end\" INTEGER NOT NULL,
            ref TEXT NOT NULL,
            alt TEXT NOT NULL,
            UNIQUE (start, \"end\", ref, alt)
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS prot (
            varid INTEGER PRIMARY KEY,
            protein TEXT NOT NULL,
            locus TEXT NOT NULL,
            start INTEGER NOT NULL,
            \"end\" INTEGER NOT NULL,
            ref TEXT NOT NULL,
            alt TEXT NOT NULL,
            UNIQUE (protein, locus, start, \"end\", ref, alt)
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS sequence2dna (
            seqhash TEXT NOT NULL REFERENCES sequence (seqhash),
            varid INTEGER NOT NULL REFERENCES dna (varid),
            PRIMARY KEY (seqhash, varid)
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE TABLE IF NOT EXISTS sequence2prot (
            seqhash TEXT NOT NULL REFERENCES sequence (seqhash),
            varid INTEGER NOT NULL REFERENCES prot (varid),
            PRIMARY KEY (seqhash, varid)
        ) STRICT",
        (),
    )?;
    connection.execute(
        "CREATE VIEW IF NOT EXISTS dna_view AS
         SELECT genome.accession, genome.seqhash, dna.start, dna.\"end\", dna.ref, dna.alt
         FROM genome
         LEFT JOIN sequence2dna ON genome.seqhash = sequence2dna.seqhash
         LEFT JOIN dna ON sequence2dna.varid = dna.varid",
        (),
    )?;
    connection.execute(
        "CREATE VIEW IF NOT EXISTS essence AS
         SELECT genome.accession, genome.description, genome.seqhash, genome.lineage,
                genome.zip, genome.date, genome.gisaid, genome.ena, genome.collection,
                genome.source, genome.lab, profile.dna_profile, profile.aa_profile
         FROM genome
         LEFT JOIN profile ON genome.seqhash = profile.seqhash",
        (),
    )?;
    Ok(())
}

fn version_mismatch(found: &str) -> VarbankError {
    VarbankError::store(format!(
        "unsupported database version: {} (expected {})",
        found, VERSION
    ))
}

/// Profiles are stored with one leading and one trailing space so that a
/// `LIKE '% token %'` match is always token-boundary exact.
fn pad(profile: &str) -> String {
    format!(" {} ", profile)
}

fn trimmed(profile: Option<String>) -> String {
    profile.map(|p| p.trim().to_string()).unwrap_or_default()
}

fn dna_variant_id(transaction: &Transaction<'_>, variant: &Variant) -> Result<i64> {
    let end = variant.end.unwrap_or(variant.start + 1);
    transaction.execute(
        "INSERT OR IGNORE INTO dna (start, \"end\", ref, alt) VALUES (?1, ?2, ?3, ?4)",
        (variant.start, end, &variant.reference, &variant.alternate),
    )?;
    let varid = transaction.query_row(
        "SELECT varid FROM dna WHERE start = ?1 AND \"end\" = ?2 AND ref = ?3 AND alt = ?4",
        (variant.start, end, &variant.reference, &variant.alternate),
        |row| row.get(0),
    )?;
    Ok(varid)
}

fn protein_variant_id(transaction: &Transaction<'_>, variant: &Variant) -> Result<i64> {
    let protein = variant
        .symbol
        .as_deref()
        .ok_or_else(|| VarbankError::store("protein variant without a symbol"))?;
    let locus = variant
        .locus
        .as_deref()
        .ok_or_else(|| VarbankError::store("protein variant without a locus"))?;
    let end = variant.end.unwrap_or(variant.start + 1);
    transaction.execute(
        "INSERT OR IGNORE INTO prot (protein, locus, start, \"end\", ref, alt) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (protein, locus, variant.start, end, &variant.reference, &variant.alternate),
    )?;
    let varid = transaction.query_row(
        "SELECT varid FROM prot WHERE protein = ?1 AND locus = ?2 AND start = ?3 \
         AND \"end\" = ?4 AND ref = ?5 AND alt = ?6",
        (protein, locus, variant.start, end, &variant.reference, &variant.alternate),
        |row| row.get(0),
    )?;
    Ok(varid)
}

/// Check the stored reference residues at `start..` against the live
/// reference sequence.
fn check_reference_site(
    accession: &str,
    reference: &str,
    start: i64,
    stored: &str,
) -> Result<()> {
    let bytes = reference.as_bytes();
    for (offset, expected) in stored.chars().enumerate() {
        let position = start + offset as i64;
        match bytes.get(position as usize).map(|b| *b as char) {
            Some(found) if found == expected => {}
            Some(found) => {
                return Err(VarbankError::inconsistent_site(
                    accession,
                    &expected.to_string(),
                    position,
                    &found.to_string(),
                ))
            }
            None => return Err(beyond_reference(accession, position)),
        }
    }
    Ok(())
}

fn clear_site(accession: &str, parts: &mut [String], position: i64) -> Result<()> {
    if position < 0 || position as usize >= parts.len() {
        return Err(beyond_reference(accession, position));
    }
    parts[position as usize] = String::new();
    Ok(())
}

fn beyond_reference(accession: &str, position: i64) -> VarbankError {
    VarbankError::inconsistency(
        accession,
        format!(
            "variant position {} lies beyond the reference end",
            position + 1
        ),
    )
}

fn first_difference(a: &str, b: &str) -> usize {
    a.bytes()
        .zip(b.bytes())
        .position(|(x, y)| x != y)
        .unwrap_or_else(|| a.len().min(b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GenomeRecord;
    use crate::profile::compile_profile;
    use crate::sequence::SequenceHash;

    const REF: &str = "AAAATGAAATTTGGGCCCTTTAAACCCGGG";

    fn test_store(dir: &tempfile::TempDir) -> VariantStore {
        VariantStore::open_or_create(dir.path().join("test.db"), "REF_1").unwrap()
    }

    fn sample_variants() -> Vec<Variant> {
        vec![
            Variant::nucleotide("T", "A", 9, None),
            Variant::nucleotide("T", "", 19, Some(20)),
            Variant::nucleotide("T", "", 20, Some(21)),
            Variant::nucleotide("C", "CGG", 24, None),
        ]
    }

    fn sample_sequence() -> String {
        // REF with T10A applied, positions 19-20 deleted, GG inserted after 24
        "AAAATGAAAATTGGGCCCTAAACGGCCGGG".to_string()
    }

    fn sample_record(sequence: &str) -> GenomeRecord {
        let dna_variants = sample_variants();
        let protein_variants = vec![Variant::protein("ORF1", "locus1", "F", "I", 2, None)];
        let dna_profile = compile_profile(&dna_variants);
        let protein_profile = compile_profile(&protein_variants);
        GenomeRecord::new(
            "acc1",
            "first sample",
            SequenceHash::compute(sequence),
            dna_variants,
            protein_variants,
            dna_profile,
            protein_profile,
            None,
        )
    }

    #[test]
    fn test_open_pins_reference_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = VariantStore::open_or_create(&path, "REF_1").unwrap();
            assert_eq!(store.reference_accession().unwrap(), "REF_1");
        }
        // reopening with the same reference is fine
        VariantStore::open_or_create(&path, "REF_1").unwrap();
        let err = VariantStore::open_or_create(&path, "OTHER_REF").unwrap_err();
        assert!(err.to_string().contains("built for reference 'REF_1'"));
    }

    #[test]
    fn test_open_readonly_rejects_non_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        // a bare sqlite file without our schema
        rusqlite::Connection::open(&path).unwrap();
        assert!(VariantStore::open_readonly(&path).is_err());
    }

    #[test]
    fn test_open_existing_keeps_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        VariantStore::open_or_create(&path, "REF_1").unwrap();

        let store = VariantStore::open_existing(&path).unwrap();
        assert_eq!(store.reference_accession().unwrap(), "REF_1");

        let bare = dir.path().join("bare.db");
        rusqlite::Connection::open(&bare).unwrap();
        assert!(VariantStore::open_existing(&bare).is_err());
    }

    #[test]
    fn test_add_and_lookup_genome() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        let record = sample_record(&sequence);
        store.add_genome("acc1", "first sample", &record).unwrap();

        let row = store.genome("acc1").unwrap().unwrap();
        assert_eq!(row.accession, "acc1");
        assert_eq!(row.description, "first sample");
        assert_eq!(row.dna_profile, "T10A del:20:2 C25CGG");
        assert_eq!(row.aa_profile, "ORF1:F3I");
        assert_eq!(row.seqhash, record.sequence_hash.to_hex());
        assert!(row.lineage.is_none());
        assert!(store.genome("missing").unwrap().is_none());

        let stats = store.stats().unwrap();
        assert_eq!(stats.genomes, 1);
        assert_eq!(stats.sequences, 1);
        assert_eq!(stats.dna_variants, 4);
        assert_eq!(stats.protein_variants, 1);
    }

    #[test]
    fn test_shared_sequence_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        let record = sample_record(&sequence);
        store.add_genome("acc1", "first sample", &record).unwrap();
        store.add_genome("acc2", "same sequence", &record).unwrap();
        // re-adding an accession is idempotent on the variant tables
        store.add_genome("acc1", "first sample", &record).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.genomes, 2);
        assert_eq!(stats.sequences, 1);
        assert_eq!(stats.dna_variants, 4);
        assert_eq!(store.accessions().unwrap(), vec!["acc1", "acc2"]);
    }

    #[test]
    fn test_delete_cascades_only_for_last_claimer() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        let record = sample_record(&sequence);
        store.add_genome("acc1", "", &record).unwrap();
        store.add_genome("acc2", "", &record).unwrap();

        store.delete_genome("acc1").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.genomes, 1);
        assert_eq!(stats.sequences, 1);
        assert_eq!(store.genome("acc2").unwrap().unwrap().dna_profile, "T10A del:20:2 C25CGG");

        store.delete_genome("acc2").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.genomes, 0);
        assert_eq!(stats.sequences, 0);
        let links: usize = store
            .connection()
            .query_row("SELECT COUNT(*) FROM sequence2dna", (), |row| row.get(0))
            .unwrap();
        assert_eq!(links, 0);

        let err = store.delete_genome("acc1").unwrap_err();
        assert!(matches!(err, VarbankError::UnknownAccession { .. }));
    }

    #[test]
    fn test_update_genome_writes_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        store.add_genome("acc1", "", &sample_record(&sequence)).unwrap();

        let update = GenomeMetadata {
            lineage: Some("B.1.1.7".to_string()),
            date: Some("2021-03-01".to_string()),
            ..GenomeMetadata::default()
        };
        store.update_genome("acc1", &update).unwrap();
        let row = store.genome("acc1").unwrap().unwrap();
        assert_eq!(row.lineage.as_deref(), Some("B.1.1.7"));
        assert_eq!(row.date.as_deref(), Some("2021-03-01"));
        assert!(row.zip.is_none());

        // a second partial update leaves the other fields alone
        let update = GenomeMetadata {
            zip: Some("13353".to_string()),
            ..GenomeMetadata::default()
        };
        store.update_genome("acc1", &update).unwrap();
        let row = store.genome("acc1").unwrap().unwrap();
        assert_eq!(row.lineage.as_deref(), Some("B.1.1.7"));
        assert_eq!(row.zip.as_deref(), Some("13353"));

        // all-None update is a no-op, unknown accession is an error
        store.update_genome("acc1", &GenomeMetadata::default()).unwrap();
        let err = store
            .update_genome("missing", &update)
            .unwrap_err();
        assert!(matches!(err, VarbankError::UnknownAccession { .. }));
    }

    #[test]
    fn test_restore_round_trip_both_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        store.add_genome("acc1", "", &sample_record(&sequence)).unwrap();

        let from_variants = store.restore_sequence_from_variants("acc1", REF).unwrap();
        let from_profile = store.restore_sequence_from_profile("acc1", REF).unwrap();
        assert_eq!(from_variants, sequence);
        assert_eq!(from_profile, sequence);
    }

    #[test]
    fn test_restore_alignment_is_gapped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        store.add_genome("acc1", "", &sample_record(&sequence)).unwrap();

        let alignment = store.restore_alignment("acc1", REF).unwrap();
        assert_eq!(alignment.query.len(), alignment.target.len());
        assert_eq!(alignment.query.replace('-', ""), sequence);
        assert_eq!(alignment.target.replace('-', ""), REF);
        // deleted sites gap the query, the insertion gaps the target
        assert!(alignment.query.contains("CCCT--AAA"));
        assert!(alignment.target.contains("C--CCGGG"));
    }

    #[test]
    fn test_restore_zero_variant_genome() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let record = GenomeRecord::new(
            "acc1",
            "",
            SequenceHash::compute(REF),
            Vec::new(),
            Vec::new(),
            String::new(),
            String::new(),
            None,
        );
        store.add_genome("acc1", "", &record).unwrap();
        assert_eq!(store.restore_sequence_from_variants("acc1", REF).unwrap(), REF);
        assert_eq!(store.restore_sequence_from_profile("acc1", REF).unwrap(), REF);
    }

    #[test]
    fn test_restore_prefix_insertion() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let dna_variants = vec![Variant::nucleotide("", "TT", -1, None)];
        let sequence = format!("TT{}", REF);
        let record = GenomeRecord::new(
            "acc1",
            "",
            SequenceHash::compute(&sequence),
            dna_variants.clone(),
            Vec::new(),
            compile_profile(&dna_variants),
            String::new(),
            None,
        );
        store.add_genome("acc1", "", &record).unwrap();

        assert_eq!(store.restore_sequence_from_variants("acc1", REF).unwrap(), sequence);
        assert_eq!(store.restore_sequence_from_profile("acc1", REF).unwrap(), sequence);
        let alignment = store.restore_alignment("acc1", REF).unwrap();
        assert!(alignment.target.starts_with("--"));
        assert!(alignment.query.starts_with("TT"));
    }

    #[test]
    fn test_restore_unknown_accession() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);
        let err = store.restore_sequence_from_variants("missing", REF).unwrap_err();
        assert!(matches!(err, VarbankError::UnknownAccession { .. }));
    }

    #[test]
    fn test_restore_detects_reference_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        store.add_genome("acc1", "", &sample_record(&sequence)).unwrap();

        // a reference whose position 10 no longer carries the stored T
        let mut tampered: Vec<char> = REF.chars().collect();
        tampered[9] = 'G';
        let tampered: String = tampered.into_iter().collect();
        let err = store
            .restore_sequence_from_variants("acc1", &tampered)
            .unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("T expected at position 10"));
    }

    #[test]
    fn test_verify_genome_passes_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let sequence = sample_sequence();
        store.add_genome("acc1", "", &sample_record(&sequence)).unwrap();
        store.verify_genome("acc1", &sequence, REF, false).unwrap();

        // a wrong imported sequence fails the gate and reports the site
        let mut wrong = sequence.clone();
        wrong.replace_range(0..1, "C");
        let err = store.verify_genome("acc1", &wrong, REF, false).unwrap_err();
        assert!(err.is_corruption());
        assert!(err.to_string().contains("position 1"));
        // without auto_delete the genome survives
        assert!(store.genome("acc1").unwrap().is_some());

        let err = store.verify_genome("acc1", &wrong, REF, true).unwrap_err();
        assert!(err.is_corruption());
        assert!(store.genome("acc1").unwrap().is_none());
    }

    #[test]
    fn test_frameshift_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let annotation = AnnotationModel::from_rows(
            vec![crate::annotation::CdsFeatureRow {
                feature_id: "cds1".to_string(),
                symbol: "ORF1".to_string(),
                locus: "locus1".to_string(),
                start: 4,
                end: 18,
                strand: crate::annotation::Strand::Plus,
            }],
            REF,
            1,
        )
        .unwrap();

        // del:20:2 lies downstream of the CDS, the insertion adds 2 in CDS
        let in_cds = vec![Variant::nucleotide("T", "TAA", 9, None)];
        let record = GenomeRecord::new(
            "acc1",
            "",
            SequenceHash::compute("X"),
            in_cds.clone(),
            Vec::new(),
            compile_profile(&in_cds),
            String::new(),
            None,
        );
        store.add_genome("acc1", "", &record).unwrap();
        store
            .add_genome("acc2", "", &sample_record(&sample_sequence()))
            .unwrap();

        let report = store.frameshift_report(&annotation).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].accession, "acc1");
        assert_eq!(report[0].tokens, vec!["T10TAA"]);
    }
}
