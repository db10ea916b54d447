use thiserror::Error;

/// Errors that can occur while setting up a run, scoring a species tree, or
/// writing its annotations.
///
/// Statistical edge cases (an invalid polytomy-test p-value, a branch with a
/// low effective number of genes) are not errors: they are reported through
/// the log and represented by sentinel labels.
#[derive(Error, Debug)]
pub enum QuartetError {
    /// A Newick string could not be parsed
    #[error("Failed to parse Newick tree: {0}")]
    Newick(String),
    /// A parsed tree has no nodes
    #[error("The tree is empty.")]
    EmptyTree,
    /// A leaf of the species tree is not part of the taxon universe
    #[error("Unknown taxon '{0}'; it appears in no gene tree and no individual mapping")]
    UnknownTaxon(String),
    /// A gene-tree taxon is missing from the individual mapping
    #[error("Taxon '{0}' is not assigned to any species in the individual mapping")]
    UnmappedTaxon(String),
    /// A taxon appears twice in the same tree or mapping
    #[error("Taxon '{0}' appears more than once")]
    DuplicateTaxon(String),
    /// The gene-tree token stream does not describe a sequence of trees
    #[error("Malformed gene-tree encoding: {0}")]
    MalformedEncoding(String),
    /// An annotation code or option that has no meaning
    #[error("Invalid annotation setting: {0}")]
    InvalidAnnotation(String),
    /// A quartet count that does not fit the result type
    #[error("Arithmetic error in quartet counting: {0}")]
    Arithmetic(String),
    /// The weight calculator was replaced after the run was set up
    #[error("Weight calculator already set; it cannot change after initialization")]
    CalculatorConflict,
    /// A malformed line in an input file
    #[error("Parse error in {what}, line {line}: {message}")]
    Input {
        what: &'static str,
        line: usize,
        message: String,
    },
    /// Reading inputs or writing diagnostic artifacts failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A logic fault inside the branch annotator
    #[error("Internal consistency check failed: {0}")]
    InternalConsistency(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, QuartetError>;
