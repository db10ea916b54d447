//! Python binding layer for species-tree scoring.
//!
//! Provides a Python function that scores a Newick species tree against a
//! list of Newick gene trees and returns the annotated tree.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::{AnnotationMode, InferenceOptions};
use crate::io::parse_newick_lines;
use crate::scorer::QuartetInference;
use crate::taxa::IndividualMapping;
use crate::tree::Tree;

/// Score a species tree against gene trees and annotate its branches.
///
/// Args:
///     gene_trees: List of Newick strings, one gene tree each
///     species_tree: Newick string of the species tree
///     annotation: Branch annotation code (default: 3, local posterior)
///     lambda_: Rate of the Yule prior on branch lengths (default: 0.5)
///     mapping: Optional text of an individual mapping (`species:ind1,ind2` lines)
///
/// Returns:
///     A tuple of (normalized_score, annotated_newick) where normalized_score
///     is None when the tree has polytomies the annotation mode skips
///
/// Raises:
///     ValueError: If a tree cannot be parsed or a taxon is unknown
#[pyfunction]
#[pyo3(signature = (gene_trees, species_tree, annotation=3, lambda_=0.5, mapping=None))]
fn score_species_tree(
    gene_trees: Vec<String>,
    species_tree: String,
    annotation: u32,
    lambda_: f64,
    mapping: Option<String>,
) -> PyResult<(Option<f64>, String)> {
    let to_py = |e: crate::error::QuartetError| PyValueError::new_err(e.to_string());

    let genes = parse_newick_lines(&gene_trees.join("\n"), "gene trees").map_err(to_py)?;
    if genes.is_empty() {
        return Err(PyValueError::new_err("No gene trees provided"));
    }
    let mut species = Tree::from_newick(&species_tree).map_err(to_py)?;
    let mapping = mapping
        .as_deref()
        .map(IndividualMapping::parse)
        .transpose()
        .map_err(to_py)?;

    let options = InferenceOptions::default()
        .with_annotation(AnnotationMode::from_code(annotation).map_err(to_py)?)
        .with_lambda(lambda_);
    let mut inference = QuartetInference::new(genes, mapping, options).map_err(to_py)?;
    let report = inference.score_tree(&mut species, true).map_err(to_py)?;

    Ok((report.score.normalized(), species.to_newick()))
}

/// Python module definition
#[pymodule]
fn quartet_support(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(score_species_tree, m)?)?;
    Ok(())
}
