//! FASTA input with transparent gzip support.
//!
//! Compression is detected from the gzip magic bytes rather than the file
//! extension, so renamed or piped-through files still open correctly. Records
//! are streamed; sequences are returned exactly as stored (harmonization is
//! the importer's job).

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::VarbankError;
use crate::Result;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open a text file for buffered reading, decompressing on the fly when the
/// content is gzipped.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let mut probe = File::open(path)?;
    let mut magic = [0u8; 2];
    let n = probe.read(&mut magic)?;
    let file = File::open(path)?;
    if n == 2 && magic == GZIP_MAGIC {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// One FASTA record. `accession` is the first whitespace-delimited word of
/// the header, `description` the full header line without the leading `>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub accession: String,
    pub description: String,
    pub sequence: String,
}

/// Streaming FASTA reader over one input file.
pub struct FastaReader {
    reader: Box<dyn BufRead + Send>,
    pending_header: Option<String>,
    source: String,
    lineno: usize,
}

impl FastaReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(FastaReader {
            reader: open_text(path)?,
            pending_header: None,
            source: path.display().to_string(),
            lineno: 0,
        })
    }

    fn next_record(&mut self) -> Result<Option<FastaRecord>> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                let mut line = String::new();
                if self.reader.read_line(&mut line)? == 0 {
                    return Ok(None);
                }
                self.lineno += 1;
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if let Some(h) = line.strip_prefix('>') {
                    break h.to_string();
                }
                return Err(VarbankError::Io {
                    msg: format!(
                        "{} line {}: sequence data before first FASTA header",
                        self.source, self.lineno
                    ),
                });
            },
        };

        let mut sequence = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            self.lineno += 1;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if let Some(next) = line.strip_prefix('>') {
                self.pending_header = Some(next.to_string());
                break;
            }
            sequence.push_str(line);
        }

        let accession = header
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if accession.is_empty() {
            return Err(VarbankError::Io {
                msg: format!("{}: empty FASTA header", self.source),
            });
        }
        Ok(Some(FastaRecord {
            accession,
            description: header,
            sequence,
        }))
    }
}

impl Iterator for FastaReader {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Read a whole FASTA file into memory.
pub fn read_fasta(path: &Path) -> Result<Vec<FastaRecord>> {
    FastaReader::open(path)?.collect()
}
