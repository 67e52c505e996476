//! Text format for fitted tree models.
//!
//! ```text
//! ALPHABET: A C G T
//! ORDER: 0
//! SUBST_MOD: HKY85
//! NRATECATS: 4
//! ALPHA: 0.8
//! TRAINING_LNL: -2631.17
//! BACKGROUND: 0.3 0.2 0.2 0.3
//! RATE_MAT:
//!   -0.93 0.15 0.6 0.18
//!   ...
//! TREE: ((A:0.1,B:0.2):0.1,(C:0.15,D:0.25):0.1);
//! ```
//!
//! Empirical rate mixtures write `RATE_CONSTS:` and `RATE_WEIGHTS:` in
//! place of `ALPHA:`. Numbers are written in their shortest exact form, so
//! reading a file and writing it back reproduces it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::DMatrix;

use phylohmm_core::{PhyloHmmError, Result};
use phylohmm_msa::Alphabet;

use crate::subst_model::SubstModel;
use crate::tree::Tree;
use crate::tree_model::{TreeModel, DEFAULT_ALPHA};

/// Write `tm` in the tree-model text format.
pub fn write_tree_model<W: Write>(tm: &TreeModel, out: &mut W) -> Result<()> {
    let symbols: Vec<String> = tm.alphabet.as_str().chars().map(String::from).collect();
    writeln!(out, "ALPHABET: {}", symbols.join(" "))?;
    writeln!(out, "ORDER: {}", tm.order())?;
    writeln!(out, "SUBST_MOD: {}", tm.subst_model())?;
    if tm.empirical_rates {
        writeln!(out, "NRATECATS: {}", tm.nratecats)?;
        writeln!(out, "RATE_CONSTS: {}", join(&tm.rk))?;
        writeln!(out, "RATE_WEIGHTS: {}", join(&tm.freqk))?;
    } else if tm.nratecats > 1 {
        writeln!(out, "NRATECATS: {}", tm.nratecats)?;
        writeln!(out, "ALPHA: {}", tm.alpha)?;
    }
    if let Some(lnl) = tm.lnl {
        writeln!(out, "TRAINING_LNL: {lnl}")?;
    }
    writeln!(out, "BACKGROUND: {}", join(&tm.backgd_freqs))?;
    writeln!(out, "RATE_MAT:")?;
    for row in tm.rate_matrix.matrix().row_iter() {
        let row: Vec<f64> = row.iter().copied().collect();
        writeln!(out, "  {}", join(&row))?;
    }
    writeln!(out, "TREE: {}", tm.tree.to_newick())?;
    Ok(())
}

/// Write a tree model to a file.
pub fn write_tree_model_file(tm: &TreeModel, path: impl AsRef<Path>) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_tree_model(tm, &mut out)?;
    out.flush()?;
    Ok(())
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_tag(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_uppercase() || b == b'_')
}

#[derive(Default)]
struct Fields {
    alphabet: Option<Alphabet>,
    order: Option<usize>,
    model: Option<SubstModel>,
    nratecats: Option<usize>,
    alpha: Option<f64>,
    rate_consts: Option<Vec<f64>>,
    rate_weights: Option<Vec<f64>>,
    lnl: Option<f64>,
    background: Option<Vec<f64>>,
    rate_mat: Option<Vec<f64>>,
    tree: Option<Tree>,
}

fn parse_values(value: &str, tag: &str) -> Result<Vec<f64>> {
    value
        .split_whitespace()
        .map(|tok| {
            tok.parse().map_err(|_| {
                PhyloHmmError::Parse(format!("bad number '{tok}' in {tag} section"))
            })
        })
        .collect()
}

fn parse_one<T: std::str::FromStr>(value: &str, tag: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PhyloHmmError::Parse(format!("bad value '{}' for {tag}", value.trim())))
}

/// Read a tree model. `RATE_MAT:` rows may span any number of lines.
///
/// # Errors
///
/// [`PhyloHmmError::Parse`] for an unknown tag, a missing `ALPHABET:`,
/// `SUBST_MOD:`, `BACKGROUND:`, `RATE_MAT:` or `TREE:` section, an `ORDER:`
/// that disagrees with the model, or malformed numbers;
/// [`PhyloHmmError::DimensionMismatch`] when vector or matrix sizes
/// disagree with the model.
pub fn read_tree_model<R: BufRead>(reader: R) -> Result<TreeModel> {
    let mut f = Fields::default();
    let mut in_rate_mat = false;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tagged = line.split_once(':').filter(|(tag, _)| is_tag(tag));
        let Some((tag, value)) = tagged else {
            if in_rate_mat {
                let values = parse_values(line, "RATE_MAT")?;
                f.rate_mat.get_or_insert_with(Vec::new).extend(values);
                continue;
            }
            return Err(PhyloHmmError::Parse(format!(
                "unrecognized line in tree model: '{line}'"
            )));
        };
        in_rate_mat = false;
        let value = value.trim();
        match tag {
            "ALPHABET" => {
                f.alphabet =
                    Some(Alphabet::new(value).map_err(|e| PhyloHmmError::Parse(e.to_string()))?)
            }
            "ORDER" => f.order = Some(parse_one(value, tag)?),
            "SUBST_MOD" => f.model = Some(value.parse()?),
            "NRATECATS" => f.nratecats = Some(parse_one(value, tag)?),
            "ALPHA" => f.alpha = Some(parse_one(value, tag)?),
            "RATE_CONSTS" => f.rate_consts = Some(parse_values(value, tag)?),
            "RATE_WEIGHTS" => f.rate_weights = Some(parse_values(value, tag)?),
            "TRAINING_LNL" => f.lnl = Some(parse_one(value, tag)?),
            "BACKGROUND" => f.background = Some(parse_values(value, tag)?),
            "RATE_MAT" => {
                in_rate_mat = true;
                f.rate_mat = Some(parse_values(value, tag)?);
            }
            "TREE" => f.tree = Some(Tree::from_newick(value)?),
            _ => {
                return Err(PhyloHmmError::Parse(format!(
                    "unrecognized tag '{tag}' in tree model"
                )))
            }
        }
    }

    let missing = |tag: &str| PhyloHmmError::Parse(format!("tree model has no {tag} section"));
    let alphabet = f.alphabet.ok_or_else(|| missing("ALPHABET:"))?;
    let model = f.model.ok_or_else(|| missing("SUBST_MOD:"))?;
    let background = f.background.ok_or_else(|| missing("BACKGROUND:"))?;
    let rate_mat = f.rate_mat.ok_or_else(|| missing("RATE_MAT:"))?;
    let tree = f.tree.ok_or_else(|| missing("TREE:"))?;
    if let Some(order) = f.order {
        if order != model.order() {
            return Err(PhyloHmmError::Parse(format!(
                "ORDER: {order} does not match {model} (order {})",
                model.order()
            )));
        }
    }

    let (nratecats, alpha) = match (&f.rate_consts, f.nratecats) {
        (Some(_), _) => (1, 0.0),
        (None, Some(n)) if n > 1 => (n, f.alpha.unwrap_or(DEFAULT_ALPHA)),
        _ => (1, f.alpha.unwrap_or(0.0)),
    };
    let mut tm = TreeModel::new(tree, alphabet, model, background.clone(), nratecats, alpha)?;
    if let Some(rk) = f.rate_consts {
        if f.nratecats.is_some_and(|n| n != rk.len()) {
            return Err(PhyloHmmError::DimensionMismatch(format!(
                "NRATECATS does not match {} rate constants",
                rk.len()
            )));
        }
        let freqk = f
            .rate_weights
            .unwrap_or_else(|| vec![1.0 / rk.len() as f64; rk.len()]);
        tm.set_empirical_rates(rk, freqk)?;
    }

    let n = tm.nstates();
    if rate_mat.len() != n * n {
        return Err(PhyloHmmError::DimensionMismatch(format!(
            "RATE_MAT has {} entries, {model} needs {}",
            rate_mat.len(),
            n * n
        )));
    }
    // keep the stored frequencies exactly as written
    tm.backgd_freqs = background;
    let q = DMatrix::from_row_slice(n, n, &rate_mat);
    tm.rate_matrix.set_matrix(q, &tm.backgd_freqs)?;
    tm.update_transition_matrices()?;
    tm.lnl = f.lnl;
    Ok(tm)
}

/// Read a tree model from a file.
pub fn read_tree_model_file(path: impl AsRef<Path>) -> Result<TreeModel> {
    read_tree_model(BufReader::new(File::open(path)?))
}
