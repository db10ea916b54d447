//! Run configuration: annotation mode and inference options.

use crate::error::{QuartetError, Result};
use std::path::PathBuf;

/// Statistic reported per topology in the frequency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatistic {
    /// Local posterior probability of the topology
    Posterior,
    /// Quartet frequency of the topology divided by the effective N
    RelativeFrequency,
}

/// What the annotator writes on each internal branch.
///
/// The numeric codes of [`AnnotationMode::from_code`] are the values accepted
/// on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnotationMode {
    /// Score only, no annotation pass
    None,
    /// Percentage of gene quartets supporting the branch
    QuartetSupport,
    /// Every statistic as a bracketed record
    Full,
    /// Local posterior probability of the branch
    #[default]
    LocalPosterior,
    /// Posteriors of all three resolutions
    AllPosteriors,
    /// Local posterior, logging each branch's quadripartitions
    Verbose,
    /// No label, logging each branch as `c1c2|sister remaining`
    ListQuadripartitions,
    /// Quartet frequencies of all three resolutions
    QuartetFrequencies,
    /// p-value of the polytomy test
    PolytomyTest,
    /// Local posterior, reporting the summed log posterior of the tree
    LogPosterior,
    /// All posteriors plus a per-branch frequency table
    FrequencyTable(TableStatistic),
}

impl AnnotationMode {
    /// Parse a numeric annotation code.
    ///
    /// # Errors
    /// `InvalidAnnotation` for a code without a mode.
    ///
    /// # Example
    /// ```
    /// # use quartet_support::config::{AnnotationMode, TableStatistic};
    /// assert_eq!(AnnotationMode::from_code(3).unwrap(), AnnotationMode::LocalPosterior);
    /// assert_eq!(
    ///     AnnotationMode::from_code(32).unwrap(),
    ///     AnnotationMode::FrequencyTable(TableStatistic::RelativeFrequency)
    /// );
    /// assert!(AnnotationMode::from_code(5).is_err());
    /// ```
    pub fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            0 => AnnotationMode::None,
            1 => AnnotationMode::QuartetSupport,
            2 => AnnotationMode::Full,
            3 => AnnotationMode::LocalPosterior,
            4 => AnnotationMode::AllPosteriors,
            6 => AnnotationMode::Verbose,
            7 => AnnotationMode::ListQuadripartitions,
            8 => AnnotationMode::QuartetFrequencies,
            10 => AnnotationMode::PolytomyTest,
            12 => AnnotationMode::LogPosterior,
            16 => AnnotationMode::FrequencyTable(TableStatistic::Posterior),
            32 => AnnotationMode::FrequencyTable(TableStatistic::RelativeFrequency),
            other => {
                return Err(QuartetError::InvalidAnnotation(format!(
                    "unknown annotation code {other}"
                )));
            }
        })
    }

    pub fn code(self) -> u32 {
        match self {
            AnnotationMode::None => 0,
            AnnotationMode::QuartetSupport => 1,
            AnnotationMode::Full => 2,
            AnnotationMode::LocalPosterior => 3,
            AnnotationMode::AllPosteriors => 4,
            AnnotationMode::Verbose => 6,
            AnnotationMode::ListQuadripartitions => 7,
            AnnotationMode::QuartetFrequencies => 8,
            AnnotationMode::PolytomyTest => 10,
            AnnotationMode::LogPosterior => 12,
            AnnotationMode::FrequencyTable(TableStatistic::Posterior) => 16,
            AnnotationMode::FrequencyTable(TableStatistic::RelativeFrequency) => 32,
        }
    }

    /// Whether the scorer skips nodes with more than three sides.
    pub fn skips_polytomies(self) -> bool {
        self.code() % 2 == 0
    }

    pub fn annotates(self) -> bool {
        self != AnnotationMode::None
    }

    /// Whether pass 2 keeps the quadripartitions and bipartitions of each branch.
    pub fn keeps_partitions(self) -> bool {
        matches!(
            self,
            AnnotationMode::Verbose
                | AnnotationMode::ListQuadripartitions
                | AnnotationMode::FrequencyTable(_)
        )
    }

    pub fn writes_table(self) -> Option<TableStatistic> {
        match self {
            AnnotationMode::FrequencyTable(stat) => Some(stat),
            _ => None,
        }
    }

    /// Whether `ln(pp1)` of each branch enters the tree's log posterior.
    pub fn sums_log_posterior(self) -> bool {
        !matches!(
            self,
            AnnotationMode::None | AnnotationMode::QuartetSupport | AnnotationMode::PolytomyTest
        )
    }
}

/// Options of one inference run.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    pub annotation: AnnotationMode,
    /// Rate of the Yule prior on branch lengths
    pub lambda: f64,
    /// Number of times each gene tree was repeated in the input
    pub gene_repeat: u32,
    /// Directory for the frequency table; the working directory when `None`
    pub freq_output: Option<PathBuf>,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        InferenceOptions {
            annotation: AnnotationMode::default(),
            lambda: 0.5,
            gene_repeat: 1,
            freq_output: None,
        }
    }
}

impl InferenceOptions {
    pub fn with_annotation(mut self, annotation: AnnotationMode) -> Self {
        self.annotation = annotation;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_gene_repeat(mut self, gene_repeat: u32) -> Self {
        self.gene_repeat = gene_repeat;
        self
    }

    pub fn with_freq_output<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.freq_output = Some(dir.into());
        self
    }

    /// Check option values that have no meaning.
    ///
    /// # Errors
    /// `InvalidAnnotation` for a zero gene repeat or a non-positive lambda.
    pub fn validate(&self) -> Result<()> {
        if self.gene_repeat == 0 {
            return Err(QuartetError::InvalidAnnotation(
                "gene repeat must be at least 1".to_string(),
            ));
        }
        if !(self.lambda > 0.0 && self.lambda.is_finite()) {
            return Err(QuartetError::InvalidAnnotation(format!(
                "lambda must be positive, got {}",
                self.lambda
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in [0, 1, 2, 3, 4, 6, 7, 8, 10, 12, 16, 32] {
            assert_eq!(AnnotationMode::from_code(code).unwrap().code(), code);
        }
        assert!(matches!(
            AnnotationMode::from_code(9),
            Err(QuartetError::InvalidAnnotation(_))
        ));
    }

    #[test]
    fn test_mode_flags() {
        assert!(!AnnotationMode::LocalPosterior.skips_polytomies());
        assert!(AnnotationMode::Full.skips_polytomies());
        assert!(!AnnotationMode::ListQuadripartitions.skips_polytomies());
        assert!(AnnotationMode::Verbose.keeps_partitions());
        assert!(!AnnotationMode::AllPosteriors.keeps_partitions());
        assert!(!AnnotationMode::PolytomyTest.sums_log_posterior());
        assert!(AnnotationMode::LogPosterior.sums_log_posterior());
        assert!(!AnnotationMode::None.annotates());
    }

    #[test]
    fn test_options_builder() {
        let opts = InferenceOptions::default()
            .with_annotation(AnnotationMode::PolytomyTest)
            .with_lambda(1.0)
            .with_gene_repeat(2)
            .with_freq_output("out");
        assert_eq!(opts.annotation, AnnotationMode::PolytomyTest);
        assert_eq!(opts.gene_repeat, 2);
        assert_eq!(opts.freq_output, Some(PathBuf::from("out")));
        assert!(opts.validate().is_ok());
        assert!(InferenceOptions::default().with_gene_repeat(0).validate().is_err());
    }
}
