//! Per-branch support annotation of a scored species tree.
//!
//! # Overview
//! The annotator walks the species tree three times, always in postorder:
//!
//! 1. **Clusters**: the taxon cluster below every node (and, for the
//!    frequency table, the names `N0, N1, ...` of internal nodes)
//! 2. **Quartet frequencies**: for every internal branch, the frequencies of
//!    its three quadripartitions `(c1,c2|sister,remaining)`,
//!    `(c1,sister|c2,remaining)` and `(c1,remaining|c2,sister)`
//! 3. **Labels**: branch length and support label from the posterior model
//!
//! Pass 2 yields one `Option<NodeData>` per internal node (`None` for
//! branches that cannot be scored). Pass 3 consumes them in the same order.

use crate::cluster::{Bipartition, Cluster, Quadripartition};
use crate::config::{AnnotationMode, InferenceOptions, TableStatistic};
use crate::error::{QuartetError, Result};
use crate::io::FrequencyTableWriter;
use crate::posterior::PosteriorModel;
use crate::taxa::TaxonContext;
use crate::tree::{NodeId, Tree};
use crate::weights::WeightCalculator;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

/// Branches supported by fewer gene trees than this get a warning.
const LOW_EFFECTIVE_N: u64 = 20;

/// Tolerance between the frequency sum and the effective N.
const RECONCILE_TOLERANCE: f64 = 1e-3;

/// Quadripartitions of one branch and their companion bipartitions.
#[derive(Debug, Clone)]
pub struct BranchPartitions {
    pub quads: [Quadripartition; 3],
    pub bipartitions: [Bipartition; 3],
}

/// Quartet statistics of one branch, produced by pass 2.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// Main frequency followed by the two alternatives
    pub freqs: [f64; 3],
    pub effective_n: u64,
    /// Number of species-tree quartets around the branch
    pub quartet_count: u64,
    pub partitions: Option<BranchPartitions>,
}

/// Every statistic of a branch, printed at full precision.
#[derive(Debug, Clone, PartialEq)]
pub struct FullRecord {
    pub relative: [f64; 3],
    pub freqs: [f64; 3],
    pub posteriors: [f64; 3],
    pub quartet_count: u64,
    pub effective_n: f64,
}

/// Support label written on an internal branch.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchSupport {
    /// Percentage of gene quartets agreeing with the branch
    QuartetSupport(f64),
    /// Local posterior probability of the branch
    Posterior(f64),
    /// Posteriors of the three resolutions
    Posteriors([f64; 3]),
    /// Relative quartet frequencies of the three resolutions
    QuartetFrequencies([f64; 3]),
    /// Polytomy-test p-value, `None` when the test is undefined
    PolytomyTest(Option<f64>),
    Full(FullRecord),
}

impl fmt::Display for BranchSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchSupport::QuartetSupport(v) | BranchSupport::Posterior(v) => {
                write!(f, "{}", format_decimal(*v, 2))
            }
            BranchSupport::PolytomyTest(Some(p)) => write!(f, "{}", format_decimal(*p, 5)),
            BranchSupport::PolytomyTest(None) => write!(f, "NA"),
            BranchSupport::Posteriors(pp) => write!(
                f,
                "'[pp1={};pp2={};pp3={}]'",
                format_decimal(pp[0], 2),
                format_decimal(pp[1], 2),
                format_decimal(pp[2], 2)
            ),
            BranchSupport::QuartetFrequencies(q) => write!(
                f,
                "'[q1={};q2={};q3={}]'",
                format_decimal(q[0], 2),
                format_decimal(q[1], 2),
                format_decimal(q[2], 2)
            ),
            BranchSupport::Full(r) => write!(
                f,
                "'[q1={:?};q2={:?};q3={:?};f1={:?};f2={:?};f3={:?};pp1={:?};pp2={:?};pp3={:?};QC={};EN={:?}]'",
                r.relative[0],
                r.relative[1],
                r.relative[2],
                r.freqs[0],
                r.freqs[1],
                r.freqs[2],
                r.posteriors[0],
                r.posteriors[1],
                r.posteriors[2],
                r.quartet_count,
                r.effective_n
            ),
        }
    }
}

/// Round to at most `digits` fraction digits and drop trailing zeros.
///
/// # Example
/// ```
/// # use quartet_support::annotate::format_decimal;
/// assert_eq!(format_decimal(0.5, 2), "0.5");
/// assert_eq!(format_decimal(1.0, 2), "1");
/// assert_eq!(format_decimal(0.98765, 2), "0.99");
/// ```
pub fn format_decimal(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return format!("{value}");
    }
    let mut s = format!("{value:.digits$}");
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

/// Which species-tree branches can be scored, and how.
///
/// A node is skipped if it is the root or does not have exactly 2 children,
/// its parent has more than 3 children, its parent has 3 children and is not
/// the root, or its parent is a binary root whose other child does not have
/// exactly 2 children.
pub fn skip_node(tree: &Tree, node: NodeId) -> bool {
    let Some(parent) = tree.node(node).parent else {
        return true;
    };
    if tree.child_count(node) != 2 {
        return true;
    }
    let parent_children = tree.child_count(parent);
    if parent_children > 3 || (parent_children == 3 && !tree.is_root(parent)) {
        return true;
    }
    if parent_children == 2 && tree.is_root(parent) {
        let sibling = tree.siblings(node);
        return sibling.first().is_none_or(|&s| tree.child_count(s) != 2);
    }
    false
}

/// The two clusters completing the quartet around the branch above `node`.
///
/// - ternary root: the two other children of the root
/// - binary root: the two children of the sibling subtree
/// - otherwise: the first sibling and the complement of the parent's cluster
///
/// Returns `None` for the root.
pub fn sister_remaining(
    tree: &Tree,
    clusters: &[Cluster],
    node: NodeId,
) -> Option<(Cluster, Cluster)> {
    let parent = tree.node(node).parent?;
    let siblings = tree.siblings(node);
    let first = *siblings.first()?;

    if tree.is_root(parent) && tree.child_count(parent) == 3 {
        return Some((clusters[first].clone(), clusters[siblings[1]].clone()));
    }
    if tree.is_root(parent) && tree.child_count(parent) == 2 {
        let nieces = &tree.node(first).children;
        if let [a, b] = nieces.as_slice() {
            return Some((clusters[*a].clone(), clusters[*b].clone()));
        }
        warn!("Sibling of a root child is not binary; its branch gets an empty remaining cluster");
        return Some((clusters[first].clone(), clusters[parent].complement()));
    }
    Some((clusters[first].clone(), clusters[parent].complement()))
}

/// Three-pass branch annotation of a species tree.
pub struct BranchAnnotator<'a> {
    context: &'a TaxonContext,
    weights: &'a dyn WeightCalculator,
    posterior: &'a dyn PosteriorModel,
    options: &'a InferenceOptions,
}

impl<'a> BranchAnnotator<'a> {
    pub fn new(
        context: &'a TaxonContext,
        weights: &'a dyn WeightCalculator,
        posterior: &'a dyn PosteriorModel,
        options: &'a InferenceOptions,
    ) -> Self {
        BranchAnnotator {
            context,
            weights,
            posterior,
            options,
        }
    }

    /// Annotate every scoreable branch of `tree` in place.
    ///
    /// Returns the sum of `ln(pp1)` over the annotated branches (0 for modes
    /// that do not compute posteriors).
    ///
    /// # Errors
    /// `UnknownTaxon` for a species-tree leaf outside the taxon universe, `Io`
    /// when the frequency table cannot be written, and `InternalConsistency`
    /// when pass 3 does not consume exactly the pass-2 records.
    pub fn annotate_branches(&self, tree: &mut Tree) -> Result<f64> {
        let mode = self.options.annotation;
        let mut table = match mode.writes_table() {
            Some(_) => {
                let dir = self.options.freq_output.as_deref().unwrap_or(Path::new("."));
                Some(FrequencyTableWriter::create(dir)?)
            }
            None => None,
        };

        // pass 1
        let clusters = tree.clusters(self.context)?;
        if mode.writes_table().is_some() {
            let internal: Vec<NodeId> = tree
                .postorder()
                .into_iter()
                .filter(|&id| !tree.is_leaf(id))
                .collect();
            for (k, id) in internal.into_iter().enumerate() {
                tree.node_mut(id).name = Some(format!("N{k}"));
            }
        }

        // pass 2
        let internal: Vec<NodeId> = tree
            .postorder()
            .into_iter()
            .filter(|&id| !tree.is_leaf(id))
            .collect();
        let shared: &Tree = tree;
        let records: Vec<Option<NodeData>> = internal
            .par_iter()
            .map(|&id| self.branch_data(shared, &clusters, id))
            .collect();
        for (&id, record) in internal.iter().zip(&records) {
            let Some(data) = record else { continue };
            if mode == AnnotationMode::ListQuadripartitions {
                if let Some(parts) = &data.partitions {
                    let quad = &parts.quads[0];
                    if quad.parts().iter().all(|p| !p.is_empty()) {
                        info!("{}", quad.describe(self.context));
                    }
                }
            }
            if data.effective_n < LOW_EFFECTIVE_N {
                warn!(
                    "You may want to ignore posterior probabilities and other statistics of the branch above {}: only {} gene trees inform it",
                    self.context.species_names_in(&clusters[id]),
                    data.effective_n
                );
            }
        }

        // pass 3
        let mut queue: VecDeque<Option<NodeData>> = records.into();
        let mut log_sum = 0.0;
        for id in tree.postorder() {
            if tree.is_leaf(id) {
                continue;
            }
            let record = queue.pop_front().ok_or_else(|| {
                QuartetError::InternalConsistency(format!(
                    "no branch statistics left for internal node {id}"
                ))
            })?;
            tree.node_mut(id).support = None;
            let Some(data) = record else { continue };
            log_sum += self.label_branch(tree, id, &data, table.as_mut())?;
        }
        if !queue.is_empty() {
            return Err(QuartetError::InternalConsistency(format!(
                "{} branch statistics left after annotation",
                queue.len()
            )));
        }

        if let Some(table) = table {
            table.finish()?;
        }
        Ok(log_sum)
    }

    /// Pass 2 for one internal node.
    fn branch_data(&self, tree: &Tree, clusters: &[Cluster], id: NodeId) -> Option<NodeData> {
        let cluster = &clusters[id];
        let species = self.context.species();

        if !tree.is_root(id) && cluster.size() > 1 && species.is_single_species(cluster) {
            return self.terminal_branch_data(tree, clusters, id);
        }
        if skip_node(tree, id) {
            return None;
        }

        let (sister, remaining) = sister_remaining(tree, clusters, id)?;
        let children = &tree.node(id).children;
        let c1 = clusters[children[children.len() - 1]].clone();
        let c2 = clusters[children[children.len() - 2]].clone();

        let quads = [
            Quadripartition::new(c1.clone(), c2.clone(), sister.clone(), remaining.clone()),
            Quadripartition::new(c1.clone(), sister.clone(), c2.clone(), remaining.clone()),
            Quadripartition::new(c1.clone(), remaining.clone(), c2.clone(), sister.clone()),
        ];
        let result = self.weights.quadripartition_weights(&quads);
        let quartet_count =
            (c1.size() * c2.size() * sister.size() * remaining.size()) as u64;

        let partitions = self.options.annotation.keeps_partitions().then(|| BranchPartitions {
            bipartitions: [
                Bipartition::of(cluster),
                Bipartition::of(&c1.union(&sister)),
                Bipartition::of(&c1.union(&remaining)),
            ],
            quads,
        });

        Some(NodeData {
            freqs: result.freqs,
            effective_n: result.effective_n,
            quartet_count,
            partitions,
        })
    }

    /// Branch above a clade of individuals of one species: one quartet
    /// triple per individual, averaged.
    fn terminal_branch_data(
        &self,
        tree: &Tree,
        clusters: &[Cluster],
        id: NodeId,
    ) -> Option<NodeData> {
        let cluster = &clusters[id];
        let (sister, remaining) = sister_remaining(tree, clusters, id)?;
        let size = cluster.size();

        let mut freqs = [0.0; 3];
        let mut effective_n = 0u64;
        for j in cluster.iter() {
            let mut c1 = cluster.clone();
            c1.remove_leaf(j);
            let c2 = Cluster::singleton(cluster.universe(), j);
            let quads = [
                Quadripartition::new(c1.clone(), c2.clone(), sister.clone(), remaining.clone()),
                Quadripartition::new(c1.clone(), sister.clone(), c2.clone(), remaining.clone()),
                Quadripartition::new(c1, remaining.clone(), c2, sister.clone()),
            ];
            let result = self.weights.quadripartition_weights(&quads);
            for (total, f) in freqs.iter_mut().zip(result.freqs) {
                *total += f;
            }
            effective_n += result.effective_n;
        }
        for f in &mut freqs {
            *f /= size as f64;
        }

        Some(NodeData {
            freqs,
            effective_n: effective_n / size as u64,
            quartet_count: (size * (size - 1) / 2 * sister.size() * remaining.size()) as u64,
            partitions: None,
        })
    }

    /// Pass 3 for one branch. Returns its contribution to the log posterior.
    fn label_branch(
        &self,
        tree: &mut Tree,
        id: NodeId,
        data: &NodeData,
        table: Option<&mut FrequencyTableWriter>,
    ) -> Result<f64> {
        let mode = self.options.annotation;
        let [mut f1, mut f2, mut f3] = data.freqs;
        let mut effective_n = data.effective_n as f64;

        let sum = f1 + f2 + f3;
        if (sum - effective_n).abs() > RECONCILE_TOLERANCE {
            debug!("Adjusting effective N from {effective_n} to {sum}; gene trees have polytomies");
            effective_n = sum;
        }
        if self.options.gene_repeat != 1 {
            let repeat = self.options.gene_repeat as f64;
            f1 /= repeat;
            f2 /= repeat;
            f3 /= repeat;
            effective_n /= repeat;
        }

        let post = self
            .posterior
            .evaluate(f1, f2, f3, effective_n, self.options.lambda);
        tree.node_mut(id).length = Some(post.branch_length);
        let pp = post.posterior;

        let support = match mode {
            AnnotationMode::None => None,
            AnnotationMode::QuartetSupport => {
                Some(BranchSupport::QuartetSupport(f1 / effective_n * 100.0))
            }
            AnnotationMode::PolytomyTest => {
                if post.p_value < 0.0 {
                    warn!(
                        "Cannot perform the polytomy test with effective N {effective_n} on the branch above {}",
                        tree.node(id).name.as_deref().unwrap_or("an unnamed node")
                    );
                    Some(BranchSupport::PolytomyTest(None))
                } else {
                    Some(BranchSupport::PolytomyTest(Some(post.p_value)))
                }
            }
            AnnotationMode::LocalPosterior | AnnotationMode::LogPosterior => {
                Some(BranchSupport::Posterior(pp[0]))
            }
            AnnotationMode::ListQuadripartitions => None,
            AnnotationMode::Full => Some(BranchSupport::Full(FullRecord {
                relative: [f1 / effective_n, f2 / effective_n, f3 / effective_n],
                freqs: [f1, f2, f3],
                posteriors: pp,
                quartet_count: data.quartet_count,
                effective_n,
            })),
            AnnotationMode::AllPosteriors => Some(BranchSupport::Posteriors(pp)),
            AnnotationMode::QuartetFrequencies => Some(BranchSupport::QuartetFrequencies([
                f1 / effective_n,
                f2 / effective_n,
                f3 / effective_n,
            ])),
            AnnotationMode::Verbose => {
                if let Some(parts) = &data.partitions {
                    let rotations = [(f1, f2, f3), (f2, f1, f3), (f3, f1, f2)];
                    for k in 0..3 {
                        let (a, b, c) = rotations[k];
                        info!(
                            "{} [{}] : {} ** f1 = {a} f2 = {b} f3 = {c} EN = {effective_n} **",
                            parts.quads[k].describe(self.context),
                            parts.bipartitions[k].describe(self.context),
                            pp[k]
                        );
                    }
                }
                Some(BranchSupport::Posterior(pp[0]))
            }
            AnnotationMode::FrequencyTable(stat) => {
                if let (Some(parts), Some(table)) = (&data.partitions, table) {
                    let branch = tree.node(id).name.clone().unwrap_or_default();
                    let freqs = [f1, f2, f3];
                    for k in 0..3 {
                        let value = match stat {
                            TableStatistic::Posterior => pp[k],
                            TableStatistic::RelativeFrequency => freqs[k] / effective_n,
                        };
                        table.write_row(
                            &branch,
                            k + 1,
                            &parts.quads[k].describe_species(self.context),
                            value,
                            freqs[k],
                            effective_n,
                        )?;
                    }
                }
                Some(BranchSupport::Posteriors(pp))
            }
        };
        tree.node_mut(id).support = support;

        Ok(if mode.sums_log_posterior() { pp[0].ln() } else { 0.0 })
    }
}
