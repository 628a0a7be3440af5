// Copyright (c) 2024-2025 varbank developers
// SPDX-License-Identifier: MIT

//! varbank: variant tracking for viral genome surveillance
//!
//! Genomes are imported against a fixed reference, reduced to nucleotide
//! and amino acid variant profiles, and stored in SQLite for exact and
//! ambiguity-aware matching.
//!
//! # Example
//!
//! ```
//! use varbank::profile::{parse_token, pinpoint_mutation, TokenKind};
//! use std::collections::HashSet;
//!
//! // Validate a profile token against the grammar.
//! let symbols: HashSet<String> = HashSet::new();
//! let token = parse_token("A3451T", &symbols).unwrap();
//! assert_eq!(token.to_string(), "A3451T");
//!
//! // Ambiguity-aware expansion: N stands in for any nucleotide code.
//! let patterns = pinpoint_mutation("A3451N", TokenKind::Nucleotide);
//! assert!(patterns.contains("A3451T"));
//! ```

pub mod align;
pub mod annotation;
pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fasta;
pub mod pipeline;
pub mod profile;
pub mod sequence;
pub mod store;

// Re-export commonly used types
pub use align::{Aligner, Alignment, StretcherAligner};
pub use annotation::AnnotationModel;
pub use cache::{GenomeRecord, VariantCache};
pub use error::VarbankError;
pub use extractor::Variant;
pub use pipeline::{import_genomes, ImportConfig, ImportStats};
pub use sequence::{harmonize, SequenceHash};
pub use store::{match_genomes, QueryFilters, VariantStore};

/// Result type alias for varbank operations
pub type Result<T> = std::result::Result<T, VarbankError>;
