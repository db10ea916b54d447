//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: compact bitset storage for taxon sets.
//! - `cluster`: taxon clusters and the tri/quadri/bipartitions built from them.
//! - `taxa`: taxon registry and species map shared by one run.
//! - `tree`: arena trees parsed from Newick.
//! - `encoding`: compact token stream of the gene trees.
//! - `weights`: quartet weights of species partitions against the gene trees.
//! - `max_score`: normalization constant of the quartet score.
//! - `posterior`: local posterior, branch length and polytomy test.
//! - `annotate`: per-branch support annotation.
//! - `scorer`: species-tree scoring entry point.
//! - `config`, `error`, `io`: options, error type, file reading and writing.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod annotate;
pub mod bitset;
pub mod cluster;
pub mod config;
pub mod encoding;
pub mod error;
pub mod io;
pub mod max_score;
pub mod posterior;
pub mod scorer;
pub mod taxa;
pub mod tree;
pub mod weights;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use annotate::{BranchAnnotator, BranchSupport};
pub use config::{AnnotationMode, InferenceOptions, TableStatistic};
pub use error::{QuartetError, Result};
pub use io::{read_gene_trees, read_individual_mapping, read_species_tree};
pub use scorer::{QuartetInference, Score, ScoreReport};
pub use taxa::{IndividualMapping, TaxonContext};
pub use tree::Tree;
pub use weights::{GeneTreeWeights, WeightCalculator};
