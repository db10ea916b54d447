//! Quartet weights of species-tree partitions against the gene trees.
//!
//! # Overview
//! The scorer and the branch annotator only ask two questions of the gene
//! trees, expressed by the [`WeightCalculator`] trait:
//!
//! - how many gene-tree quartets agree with a species tripartition
//! - how the quartets around a species branch split between its three
//!   possible resolutions
//!
//! [`GeneTreeWeights`] answers both exactly. At construction it replays the
//! gene-tree encoding once and keeps, for every gene node, the clusters of its
//! sides (one per child, plus the rest of the gene tree's leaf set when that
//! is non-empty). A query then only needs intersection sizes between gene
//! sides and species parts.
//!
//! # Counting
//! For gene sides `S1, S2, S3` and species parts `A, B, C`, the weight of one
//! assignment of parts to sides is `F(x, y, z) = x·y·z·(x + y + z − 3)` where
//! `x = |S1 ∩ A|`, `y = |S2 ∩ B|`, `z = |S3 ∩ C|`. The tripartition weight sums
//! `F` over gene trees, gene nodes, triples of sides and the 6 assignments.
//!
//! A gene quartet with one leaf in each part of `(a, b | c, d)` is resolved
//! that way exactly at the two gene nodes where `a,b` (or `c,d`) sit in
//! different sides while the other pair shares a third side. Counting both
//! nodes and halving gives the number of gene quartets supporting the
//! quadripartition.

use crate::cluster::{Cluster, Quadripartition, Tripartition};
use crate::encoding::GeneTrees;
use crate::error::{QuartetError, Result};
use itertools::Itertools;
use log::debug;
use rayon::prelude::*;

/// Frequencies of the three resolutions around one branch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuadResults {
    /// Normalized gene-quartet counts, one per quadripartition
    pub freqs: [f64; 3],
    /// Number of gene trees holding at least one leaf of every part
    pub effective_n: u64,
}

/// Source of quartet weights for the scorer and the branch annotator.
pub trait WeightCalculator: Send + Sync {
    /// Number of gene quartets (times 4) consistent with the tripartition.
    fn tripartition_weight(&self, tripartition: &Tripartition) -> u64;

    /// Frequencies of the three quadripartitions of one branch, queried
    /// together.
    fn quadripartition_weights(&self, quads: &[Quadripartition; 3]) -> QuadResults;

    /// Total resolvable quartet weight of the gene trees (times 4), if the
    /// calculator computed it while indexing.
    fn precomputed_max_score(&self) -> Option<u64> {
        None
    }
}

/// Sides of one gene node with at least three non-empty sides.
#[derive(Debug, Clone)]
struct GeneNode {
    sides: Vec<Cluster>,
}

#[derive(Debug, Clone)]
struct GeneIndex {
    leaves: Cluster,
    nodes: Vec<GeneNode>,
}

/// Exact weight calculator over an indexed set of gene trees.
#[derive(Debug, Clone)]
pub struct GeneTreeWeights {
    genes: Vec<GeneIndex>,
    max_total: u64,
}

impl GeneTreeWeights {
    /// Index the gene trees.
    ///
    /// # Errors
    /// Propagates `MalformedEncoding` from the replay and returns `Arithmetic`
    /// when the total resolvable weight overflows `u64`.
    pub fn new(genes: &GeneTrees) -> Result<Self> {
        let indexed = (0..genes.len())
            .into_par_iter()
            .map(|g| index_gene_tree(genes, g))
            .collect::<Result<Vec<_>>>()?;

        let mut total: u128 = 0;
        for gene in &indexed {
            for node in &gene.nodes {
                total += node_resolvable_weight(&node.sides);
            }
        }
        let max_total = u64::try_from(total).map_err(|_| {
            QuartetError::Arithmetic(format!("resolvable quartet weight {total} overflows u64"))
        })?;

        debug!(
            "Indexed {} gene trees with {} informative nodes",
            indexed.len(),
            indexed.iter().map(|g| g.nodes.len()).sum::<usize>()
        );

        Ok(GeneTreeWeights {
            genes: indexed,
            max_total,
        })
    }
}

fn index_gene_tree(genes: &GeneTrees, g: usize) -> Result<GeneIndex> {
    let leaves = genes.leaf_set(g).clone();
    let mut nodes = Vec::new();
    genes.replay_tree(
        g,
        |taxon| Ok(Cluster::singleton(leaves.universe(), taxon)),
        |children, leaf_set| {
            let mut below = Cluster::empty(leaf_set.universe());
            for child in &children {
                below.union_with(child);
            }
            let rest = leaf_set.difference(&below);
            let mut sides = children;
            if !rest.is_empty() {
                sides.push(rest);
            }
            sides.retain(|s| !s.is_empty());
            if sides.len() >= 3 {
                nodes.push(GeneNode { sides });
            }
            Ok(below)
        },
    )?;
    Ok(GeneIndex { leaves, nodes })
}

/// `(a + b + c − 3)·a·b·c` summed over every triple of side sizes.
pub(crate) fn node_resolvable_weight(sides: &[Cluster]) -> u128 {
    sides
        .iter()
        .map(|s| s.size() as u128)
        .tuple_combinations()
        .map(|(a, b, c)| (a + b + c - 3) * a * b * c)
        .sum()
}

#[inline]
fn f3(x: u64, y: u64, z: u64) -> u64 {
    if x == 0 || y == 0 || z == 0 {
        return 0;
    }
    x * y * z * (x + y + z - 3)
}

impl GeneIndex {
    fn tripartition_weight(&self, parts: &[Cluster; 3]) -> u64 {
        let mut weight = 0;
        for node in &self.nodes {
            let overlap: Vec<[u64; 3]> = node
                .sides
                .iter()
                .map(|s| {
                    [
                        s.intersection_size(&parts[0]) as u64,
                        s.intersection_size(&parts[1]) as u64,
                        s.intersection_size(&parts[2]) as u64,
                    ]
                })
                .collect();
            for (x, y, z) in overlap.iter().tuple_combinations() {
                weight += f3(x[0], y[1], z[2])
                    + f3(x[0], y[2], z[1])
                    + f3(x[1], y[0], z[2])
                    + f3(x[1], y[2], z[0])
                    + f3(x[2], y[0], z[1])
                    + f3(x[2], y[1], z[0]);
            }
        }
        weight
    }

    /// Gene quartets resolved as `(a,b | c,d)`, and the number of quartets
    /// with one leaf in each part.
    fn quadripartition_count(&self, quad: &Quadripartition) -> (u128, u128) {
        let parts = quad.parts();
        let possible: u128 = parts
            .iter()
            .map(|p| p.intersection_size(&self.leaves) as u128)
            .product();
        if possible == 0 {
            return (0, 0);
        }

        let mut twice = 0u128;
        for node in &self.nodes {
            // overlap[side] = sizes of the intersections with a, b, c, d
            let overlap: Vec<[u128; 4]> = node
                .sides
                .iter()
                .map(|s| {
                    let mut row = [0u128; 4];
                    for (k, p) in parts.iter().enumerate() {
                        row[k] = s.intersection_size(p) as u128;
                    }
                    row
                })
                .collect();
            for (w, pair) in overlap.iter().enumerate() {
                let ab_together = pair[0] * pair[1];
                let cd_together = pair[2] * pair[3];
                if ab_together == 0 && cd_together == 0 {
                    continue;
                }
                for (u, v) in (0..overlap.len()).filter(|&s| s != w).tuple_combinations() {
                    let (xu, xv) = (&overlap[u], &overlap[v]);
                    twice += (xu[0] * xv[1] + xv[0] * xu[1]) * cd_together;
                    twice += (xu[2] * xv[3] + xv[2] * xu[3]) * ab_together;
                }
            }
        }
        (twice / 2, possible)
    }
}

impl WeightCalculator for GeneTreeWeights {
    fn tripartition_weight(&self, tripartition: &Tripartition) -> u64 {
        let parts = tripartition.sides();
        let per_gene: Vec<u64> = self
            .genes
            .par_iter()
            .map(|gene| gene.tripartition_weight(parts))
            .collect();
        per_gene.into_iter().sum()
    }

    fn quadripartition_weights(&self, quads: &[Quadripartition; 3]) -> QuadResults {
        let per_gene: Vec<[(u128, u128); 3]> = self
            .genes
            .par_iter()
            .map(|gene| {
                [
                    gene.quadripartition_count(&quads[0]),
                    gene.quadripartition_count(&quads[1]),
                    gene.quadripartition_count(&quads[2]),
                ]
            })
            .collect();

        // summed in gene order so the result does not depend on scheduling
        let mut results = QuadResults::default();
        for counts in per_gene {
            let possible = counts[0].1;
            if possible == 0 {
                continue;
            }
            results.effective_n += 1;
            for (freq, (count, _)) in results.freqs.iter_mut().zip(counts) {
                *freq += count as f64 / possible as f64;
            }
        }
        results
    }

    fn precomputed_max_score(&self) -> Option<u64> {
        Some(self.max_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxa::TaxonContext;
    use crate::tree::Tree;

    fn setup(newicks: &[&str]) -> (TaxonContext, GeneTreeWeights) {
        let trees: Vec<Tree> = newicks.iter().map(|n| Tree::from_newick(n).unwrap()).collect();
        let ctx = TaxonContext::from_gene_trees(&trees, None).unwrap();
        let genes = GeneTrees::new(&trees, &ctx).unwrap();
        let weights = GeneTreeWeights::new(&genes).unwrap();
        (ctx, weights)
    }

    fn cluster(ctx: &TaxonContext, names: &[&str]) -> Cluster {
        let mut c = ctx.empty_cluster();
        for name in names {
            c.add_leaf(ctx.taxon_id(name).unwrap());
        }
        c
    }

    fn quads(ctx: &TaxonContext, a: &[&str], b: &[&str], c: &[&str], d: &[&str]) -> [Quadripartition; 3] {
        let (a, b, c, d) = (cluster(ctx, a), cluster(ctx, b), cluster(ctx, c), cluster(ctx, d));
        [
            Quadripartition::new(a.clone(), b.clone(), c.clone(), d.clone()),
            Quadripartition::new(a.clone(), c.clone(), b.clone(), d.clone()),
            Quadripartition::new(a, d, b, c),
        ]
    }

    #[test]
    fn test_four_taxon_tripartition_weights() {
        let (ctx, weights) = setup(&["((A,B),(C,D));"]);
        assert_eq!(weights.precomputed_max_score(), Some(4));

        let agree = Tripartition::new(
            cluster(&ctx, &["A"]),
            cluster(&ctx, &["B"]),
            cluster(&ctx, &["C", "D"]),
        );
        assert_eq!(weights.tripartition_weight(&agree), 2);

        let disagree = Tripartition::new(
            cluster(&ctx, &["A"]),
            cluster(&ctx, &["C"]),
            cluster(&ctx, &["B", "D"]),
        );
        assert_eq!(weights.tripartition_weight(&disagree), 0);
    }

    #[test]
    fn test_quadripartition_frequencies() {
        let (ctx, weights) = setup(&["((A,B),(C,D));", "((A,C),(B,D));", "((A,B),C,D);", "(A,B,C);"]);
        let result = weights.quadripartition_weights(&quads(&ctx, &["A"], &["B"], &["C"], &["D"]));
        // the last gene tree misses D
        assert_eq!(result.effective_n, 3);
        assert_eq!(result.freqs, [2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_frequencies_are_normalized_per_gene_tree() {
        let (ctx, weights) = setup(&["(((A1,A2),B),(C,D));"]);
        let result =
            weights.quadripartition_weights(&quads(&ctx, &["A1", "A2"], &["B"], &["C"], &["D"]));
        assert_eq!(result.effective_n, 1);
        assert!((result.freqs[0] - 1.0).abs() < 1e-12);
        assert_eq!(result.freqs[1], 0.0);
        assert_eq!(result.freqs[2], 0.0);
    }

    #[test]
    fn test_polytomy_supports_no_resolution() {
        let (ctx, weights) = setup(&["(A,B,C,D);"]);
        assert_eq!(weights.precomputed_max_score(), Some(0));
        let result = weights.quadripartition_weights(&quads(&ctx, &["A"], &["B"], &["C"], &["D"]));
        assert_eq!(result.effective_n, 1);
        assert_eq!(result.freqs, [0.0, 0.0, 0.0]);
    }
}
