//! Quartet score of a species tree against a fixed set of gene trees.
//!
//! # Overview
//! [`QuartetInference`] owns the gene trees of a run. The first scoring call
//! (or any call with `initialize = true`) builds the taxon context, the
//! gene-tree encoding, the weight calculator and the maximum possible score;
//! later calls reuse them.
//!
//! # Algorithm
//! For every internal node of the species tree, its sides are the clusters of
//! its children plus the rest of the taxa (when non-empty). Each unordered
//! triple of sides is a [`Tripartition`] whose weight is added to a running
//! sum. The raw score is `sum / 4`; the normalized score divides it by the
//! maximum possible score.

use crate::annotate::BranchAnnotator;
use crate::cluster::Tripartition;
use crate::config::{AnnotationMode, InferenceOptions};
use crate::encoding::GeneTrees;
use crate::error::{QuartetError, Result};
use crate::max_score::max_possible_score;
use crate::posterior::{LocalPosterior, PosteriorModel};
use crate::taxa::{IndividualMapping, TaxonContext};
use crate::tree::Tree;
use crate::weights::{GeneTreeWeights, WeightCalculator};
use itertools::Itertools;
use log::{info, warn};

/// Builds a weight calculator for the encoded gene trees of a run.
pub type WeightFactory =
    Box<dyn Fn(&GeneTrees) -> Result<Box<dyn WeightCalculator>> + Send + Sync>;

/// Quartet score of one species tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Computed {
        /// Number of gene quartets agreeing with the species tree
        raw: u64,
        /// `raw` divided by the maximum possible score
        normalized: f64,
    },
    /// A polytomy was skipped, so no number is reported
    NotComputed,
}

impl Score {
    pub fn normalized(&self) -> Option<f64> {
        match self {
            Score::Computed { normalized, .. } => Some(*normalized),
            Score::NotComputed => None,
        }
    }
}

/// Result of scoring one species tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub score: Score,
    pub max_possible: u64,
    /// Sum of `ln(pp1)` over annotated branches, when the annotation mode
    /// computes posteriors
    pub log_posterior: Option<f64>,
}

struct RunState {
    context: TaxonContext,
    weights: Box<dyn WeightCalculator>,
    max_possible: u64,
}

/// Scores species trees against a set of gene trees and annotates their
/// branches.
pub struct QuartetInference {
    gene_trees: Vec<Tree>,
    mapping: Option<IndividualMapping>,
    options: InferenceOptions,
    posterior: Box<dyn PosteriorModel>,
    weight_factory: WeightFactory,
    state: Option<RunState>,
}

impl QuartetInference {
    /// # Errors
    /// `InvalidAnnotation` when the options are inconsistent.
    pub fn new(
        gene_trees: Vec<Tree>,
        mapping: Option<IndividualMapping>,
        options: InferenceOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(QuartetInference {
            gene_trees,
            mapping,
            options,
            posterior: Box::new(LocalPosterior),
            weight_factory: Box::new(|genes: &GeneTrees| {
                Ok(Box::new(GeneTreeWeights::new(genes)?) as Box<dyn WeightCalculator>)
            }),
            state: None,
        })
    }

    /// Select the weight calculator of the run.
    ///
    /// # Errors
    /// `CalculatorConflict` once the run has been initialized.
    pub fn with_weight_calculator<F>(mut self, factory: F) -> Result<Self>
    where
        F: Fn(&GeneTrees) -> Result<Box<dyn WeightCalculator>> + Send + Sync + 'static,
    {
        if self.state.is_some() {
            return Err(QuartetError::CalculatorConflict);
        }
        self.weight_factory = Box::new(factory);
        Ok(self)
    }

    pub fn with_posterior_model<M: PosteriorModel + 'static>(mut self, model: M) -> Self {
        self.posterior = Box::new(model);
        self
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    /// Taxon context of the run, once initialized.
    pub fn context(&self) -> Option<&TaxonContext> {
        self.state.as_ref().map(|s| &s.context)
    }

    /// Build the taxon context, gene-tree index and maximum possible score.
    ///
    /// # Errors
    /// Setup errors from the taxon registry, the encoding and the max-score
    /// computation.
    pub fn initialize(&mut self) -> Result<()> {
        let context = TaxonContext::from_gene_trees(&self.gene_trees, self.mapping.as_ref())?;
        let genes = GeneTrees::new(&self.gene_trees, &context)?;
        let weights = (self.weight_factory)(&genes)?;
        let max_possible = max_possible_score(weights.as_ref(), &genes, &context)?;
        info!("Number of quartet trees in the gene trees: {max_possible}");
        self.state = Some(RunState {
            context,
            weights,
            max_possible,
        });
        Ok(())
    }

    fn state(&mut self) -> Result<&RunState> {
        if self.state.is_none() {
            self.initialize()?;
        }
        self.state.as_ref().ok_or_else(|| {
            QuartetError::InternalConsistency("inference state missing after setup".to_string())
        })
    }

    /// Maximum possible quartet score, computed once per run.
    pub fn max_possible(&mut self) -> Result<u64> {
        Ok(self.state()?.max_possible)
    }

    /// Score `tree` and, unless the annotation mode is `None`, annotate its
    /// branches in place.
    ///
    /// Leaves naming a species of the individual mapping are first expanded
    /// into its individuals.
    ///
    /// # Errors
    /// `UnknownTaxon` for a leaf outside the taxon universe, plus setup and
    /// annotation errors.
    pub fn score_tree(&mut self, tree: &mut Tree, initialize: bool) -> Result<ScoreReport> {
        if initialize || self.state.is_none() {
            self.initialize()?;
        }
        let mode = self.options.annotation;
        let state = self.state.as_ref().ok_or_else(|| {
            QuartetError::InternalConsistency("inference state missing after setup".to_string())
        })?;
        tree.expand_species_leaves(&state.context);

        let clusters = tree.clusters(&state.context)?;
        let mut sum: u64 = 0;
        let mut skipped_polytomy = false;
        for id in tree.postorder() {
            if tree.is_leaf(id) {
                continue;
            }
            let mut sides: Vec<_> = tree
                .node(id)
                .children
                .iter()
                .map(|&c| clusters[c].clone())
                .collect();
            let rest = clusters[id].complement();
            if !rest.is_empty() {
                sides.push(rest);
            }
            if sides.len() > 3 && mode.skips_polytomies() {
                skipped_polytomy = true;
                continue;
            }
            for (a, b, c) in sides.into_iter().tuple_combinations() {
                sum += state.weights.tripartition_weight(&Tripartition::new(a, b, c));
            }
        }

        let max_possible = state.max_possible;
        let score = if skipped_polytomy {
            warn!(
                "Final quartet score is not reported because the species tree has polytomies; \
                 score it with annotation code 1 to get it"
            );
            Score::NotComputed
        } else {
            let raw = sum / 4;
            let normalized = if max_possible == 0 {
                warn!("The gene trees hold no resolved quartet; normalized score set to 0");
                0.0
            } else {
                raw as f64 / max_possible as f64
            };
            info!("Final quartet score is: {raw}");
            info!("Final normalized quartet score is: {normalized}");
            Score::Computed { raw, normalized }
        };

        let log_posterior = if mode.annotates() {
            let annotator = BranchAnnotator::new(
                &state.context,
                state.weights.as_ref(),
                self.posterior.as_ref(),
                &self.options,
            );
            let log_sum = annotator.annotate_branches(tree)?;
            if mode == AnnotationMode::LogPosterior {
                info!("log local posterior: {log_sum}");
            }
            mode.sums_log_posterior().then_some(log_sum)
        } else {
            None
        };

        Ok(ScoreReport {
            score,
            max_possible,
            log_posterior,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(newicks: &[&str]) -> Vec<Tree> {
        newicks.iter().map(|n| Tree::from_newick(n).unwrap()).collect()
    }

    #[test]
    fn test_gene_tree_scores_itself_perfectly() {
        let genes = parse(&["((A,B),(C,(D,E)));"]);
        let mut inference =
            QuartetInference::new(genes, None, InferenceOptions::default()).unwrap();
        let mut species = Tree::from_newick("((A,B),(C,(D,E)));").unwrap();
        let report = inference.score_tree(&mut species, true).unwrap();
        assert_eq!(report.max_possible, 5);
        assert_eq!(report.score, Score::Computed { raw: 5, normalized: 1.0 });
    }

    #[test]
    fn test_polytomy_is_not_scored_when_skipped() {
        let genes = parse(&["((A,B),(C,D));", "((A,C),(B,D));"]);
        let options = InferenceOptions::default().with_annotation(AnnotationMode::AllPosteriors);
        let mut inference = QuartetInference::new(genes, None, options).unwrap();
        let mut species = Tree::from_newick("(A,B,C,D);").unwrap();
        let report = inference.score_tree(&mut species, false).unwrap();
        assert_eq!(report.score, Score::NotComputed);
        assert_eq!(report.score.normalized(), None);
    }

    #[test]
    fn test_polytomy_is_scored_in_quartet_support_mode() {
        let genes = parse(&["((A,B),(C,D));"]);
        let options = InferenceOptions::default().with_annotation(AnnotationMode::QuartetSupport);
        let mut inference = QuartetInference::new(genes, None, options).unwrap();
        let mut species = Tree::from_newick("(A,B,C,D);").unwrap();
        let report = inference.score_tree(&mut species, false).unwrap();
        assert_eq!(report.score, Score::Computed { raw: 0, normalized: 0.0 });
        assert_eq!(report.log_posterior, None);
    }

    #[test]
    fn test_unknown_species_leaf() {
        let genes = parse(&["((A,B),(C,D));"]);
        let mut inference =
            QuartetInference::new(genes, None, InferenceOptions::default()).unwrap();
        let mut species = Tree::from_newick("((A,B),(C,Z));").unwrap();
        assert!(matches!(
            inference.score_tree(&mut species, false),
            Err(QuartetError::UnknownTaxon(name)) if name == "Z"
        ));
    }

    #[test]
    fn test_calculator_is_fixed_after_setup() {
        let genes = parse(&["((A,B),(C,D));"]);
        let factory = |genes: &GeneTrees| -> Result<Box<dyn WeightCalculator>> {
            Ok(Box::new(GeneTreeWeights::new(genes)?))
        };
        let mut inference = QuartetInference::new(genes, None, InferenceOptions::default())
            .unwrap()
            .with_weight_calculator(factory)
            .unwrap();
        assert_eq!(inference.max_possible().unwrap(), 1);
        assert!(matches!(
            inference.with_weight_calculator(factory),
            Err(QuartetError::CalculatorConflict)
        ));
    }

    #[test]
    fn test_repeated_species_leaf() {
        let genes = parse(&["((A,B),(C,D));"]);
        let mut inference =
            QuartetInference::new(genes, None, InferenceOptions::default()).unwrap();
        let mut species = Tree::from_newick("((A,B),(A,(C,D)));").unwrap();
        assert!(matches!(
            inference.score_tree(&mut species, true),
            Err(QuartetError::DuplicateTaxon(name)) if name == "A"
        ));

        let mut cherry = Tree::from_newick("((A,A),(C,D));").unwrap();
        assert!(matches!(
            inference.score_tree(&mut cherry, false),
            Err(QuartetError::DuplicateTaxon(name)) if name == "A"
        ));
    }
}
