//! Reading aligned FASTA into an [`Alignment`].

use std::path::Path;

use needletail::parse_fastx_file;

use phylohmm_core::{PhyloHmmError, Result};

use crate::alignment::Alignment;
use crate::alphabet::Alphabet;

/// Read an aligned FASTA file. Record names are the first word of each
/// header line; all records must have the same length.
pub fn read_fasta_alignment(path: impl AsRef<Path>, alphabet: &Alphabet) -> Result<Alignment> {
    let path = path.as_ref();
    let mut reader = parse_fastx_file(path).map_err(|e| PhyloHmmError::Parse(e.to_string()))?;

    let mut names = Vec::new();
    let mut seqs = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| PhyloHmmError::Parse(e.to_string()))?;
        let id = String::from_utf8_lossy(record.id());
        let name = id.split_whitespace().next().unwrap_or_default().to_string();
        names.push(name);
        seqs.push(record.seq().to_vec());
    }
    Alignment::new(names, seqs, alphabet.clone())
}
