//! Alphabets for alignment columns.
//!
//! An [`Alphabet`] is an ordered set of uppercase symbol bytes. Two sentinel
//! characters sit outside every alphabet: [`GAP_CHAR`] and
//! [`MISSING_DATA_CHAR`]. Any byte that is not a symbol is treated as
//! missing data when a model looks it up.

use phylohmm_core::{PhyloHmmError, Result};

/// Gap character, also used to pad tuples before the first column.
pub const GAP_CHAR: u8 = b'-';

/// Missing-data character.
pub const MISSING_DATA_CHAR: u8 = b'*';

/// Alphabet used when none is given.
pub const DEFAULT_ALPHABET: &str = "ACGT";

/// An ordered alphabet of uppercase symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Alphabet {
    symbols: String,
}

impl Alphabet {
    /// Build an alphabet from its symbols. Whitespace is stripped and
    /// symbols are uppercased.
    ///
    /// # Errors
    ///
    /// Returns an error if the alphabet is empty, repeats a symbol, or
    /// contains a sentinel character.
    pub fn new(symbols: &str) -> Result<Self> {
        let symbols: String = symbols
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if symbols.is_empty() {
            return Err(PhyloHmmError::InvalidInput("empty alphabet".into()));
        }
        let bytes = symbols.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if !b.is_ascii_graphic() || b == GAP_CHAR || b == MISSING_DATA_CHAR {
                return Err(PhyloHmmError::InvalidInput(format!(
                    "alphabet symbol '{}' is not allowed",
                    b as char
                )));
            }
            if bytes[..i].contains(&b) {
                return Err(PhyloHmmError::InvalidInput(format!(
                    "alphabet repeats symbol '{}'",
                    b as char
                )));
            }
        }
        Ok(Self { symbols })
    }

    /// The nucleotide alphabet `ACGT`.
    pub fn dna() -> Self {
        Self {
            symbols: DEFAULT_ALPHABET.to_string(),
        }
    }

    /// Number of symbols, excluding sentinels.
    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[u8] {
        self.symbols.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.symbols
    }

    /// The symbol at position `i`.
    pub fn symbol(&self, i: usize) -> Option<u8> {
        self.symbols.as_bytes().get(i).copied()
    }

    /// Position of `c` in the alphabet (case-insensitive), or `None` for
    /// gaps, missing data, and foreign bytes.
    pub fn index_of(&self, c: u8) -> Option<usize> {
        let c = c.to_ascii_uppercase();
        self.symbols.as_bytes().iter().position(|&s| s == c)
    }

    /// Whether `c` is a symbol of this alphabet.
    pub fn contains(&self, c: u8) -> bool {
        self.index_of(c).is_some()
    }

    /// Whether this is the nucleotide alphabet in `ACGT` order.
    pub fn is_dna(&self) -> bool {
        self.symbols == DEFAULT_ALPHABET
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::dna()
    }
}

impl std::fmt::Display for Alphabet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.symbols)
    }
}

/// Whether `c` is a gap or missing-data sentinel.
pub fn is_sentinel(c: u8) -> bool {
    c == GAP_CHAR || c == MISSING_DATA_CHAR
}

/// DNA complement, preserving case. Non-nucleotide bytes map to themselves.
pub fn complement(c: u8) -> u8 {
    match c {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        other => other,
    }
}
