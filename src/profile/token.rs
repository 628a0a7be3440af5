//! Typed profile tokens.

use std::fmt;

/// Profile level a token addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Nucleotide,
    AminoAcid,
}

/// One token of a variant profile, carrying the numbers of its surface form:
/// positions are 1-based and deletions give their 1-based start plus length.
///
/// A substitution's alternate allele holds one residue for a plain exchange
/// and several for an insertion (anchor base first). Deletions never carry an
/// alternate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileToken {
    NtSubstitution {
        reference: char,
        position: i64,
        alternate: String,
    },
    NtDeletion {
        position: i64,
        length: i64,
    },
    AaSubstitution {
        symbol: String,
        reference: char,
        position: i64,
        alternate: String,
    },
    AaDeletion {
        symbol: String,
        position: i64,
        length: i64,
    },
}

impl ProfileToken {
    pub fn kind(&self) -> TokenKind {
        match self {
            ProfileToken::NtSubstitution { .. } | ProfileToken::NtDeletion { .. } => {
                TokenKind::Nucleotide
            }
            ProfileToken::AaSubstitution { .. } | ProfileToken::AaDeletion { .. } => {
                TokenKind::AminoAcid
            }
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            ProfileToken::NtDeletion { .. } | ProfileToken::AaDeletion { .. }
        )
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            ProfileToken::AaSubstitution { symbol, .. } | ProfileToken::AaDeletion { symbol, .. } => {
                Some(symbol)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ProfileToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileToken::NtSubstitution {
                reference,
                position,
                alternate,
            } => write!(f, "{}{}{}", reference, position, alternate),
            ProfileToken::NtDeletion { position, length } => {
                write!(f, "del:{}:{}", position, length)
            }
            ProfileToken::AaSubstitution {
                symbol,
                reference,
                position,
                alternate,
            } => write!(f, "{}:{}{}{}", symbol, reference, position, alternate),
            ProfileToken::AaDeletion {
                symbol,
                position,
                length,
            } => write!(f, "{}:del:{}:{}", symbol, position, length),
        }
    }
}
