//! Normalization constant of the quartet score.
//!
//! # Overview
//! The maximum possible score is the number of resolved quartets across all
//! gene trees, minus the quartets that no species tree can resolve because
//! three or four of their leaves are individuals of the same species.
//!
//! Two paths give the resolved total:
//!
//! - **Fast path**: the weight calculator already summed it while indexing
//! - **General path**: replay the gene-tree encoding with unit leaf weights
//!
//! Both divide the summed node weight by 4 and subtract
//! [`unresolvable_quartets`]. The correction uses exact `i128` arithmetic.

use crate::encoding::GeneTrees;
use crate::error::{QuartetError, Result};
use crate::taxa::TaxonContext;
use crate::weights::WeightCalculator;
use itertools::Itertools;
use log::debug;

/// Maximum possible quartet score of the gene trees.
///
/// # Errors
/// `Arithmetic` when the correction exceeds the resolved total or a count
/// overflows; `MalformedEncoding` from the general path's replay.
pub fn max_possible_score(
    calculator: &dyn WeightCalculator,
    genes: &GeneTrees,
    context: &TaxonContext,
) -> Result<u64> {
    let total = match calculator.precomputed_max_score() {
        Some(total) => total as i128,
        None => resolvable_weight(genes)? as i128,
    };
    let unresolvable = unresolvable_quartets(genes, context)?;
    let max = total / 4 - unresolvable;
    debug!("Resolved quartet weight {total}, unresolvable quartets {unresolvable}");
    u64::try_from(max).map_err(|_| {
        QuartetError::Arithmetic(format!(
            "maximum possible score {max} is out of range (weight {total}, correction {unresolvable})"
        ))
    })
}

/// Sum of `(a + b + c − 3)·a·b·c` over every gene node and every triple of
/// its side sizes, by replaying the encoding.
pub fn resolvable_weight(genes: &GeneTrees) -> Result<u128> {
    let mut total: u128 = 0;
    genes.replay(
        |_, _| Ok(1u128),
        |_, children, leaf_set| {
            let below: u128 = children.iter().sum();
            let rest = leaf_set.size() as u128 - below;
            let mut sides = children;
            if rest > 0 {
                sides.push(rest);
            }
            total += sides
                .iter()
                .copied()
                .tuple_combinations()
                .map(|(a, b, c)| (a + b + c).saturating_sub(3) * a * b * c)
                .sum::<u128>();
            Ok(below)
        },
    )?;
    Ok(total)
}

/// Quartets of the gene trees that hold three or four individuals of one
/// species and are nonetheless resolved by the gene tree.
///
/// Always 0 when every species has a single individual.
pub fn unresolvable_quartets(genes: &GeneTrees, context: &TaxonContext) -> Result<i128> {
    let species = context.species();
    if species.is_single_individual() {
        return Ok(0);
    }

    let mut naive: i128 = 0;
    let mut three: i128 = 0;
    let mut four: i128 = 0;

    for g in 0..genes.len() {
        let leaf_set = genes.leaf_set(g);
        let size = leaf_set.size() as i128;

        // species with at least three individuals in this gene tree
        let counts = species.counts(leaf_set);
        let tracked: Vec<(usize, i128)> = counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c >= 3)
            .map(|(sp, &c)| (sp, c as i128))
            .collect();
        if tracked.is_empty() {
            continue;
        }
        for &(_, count) in &tracked {
            naive += choose(count, 3) * (size - count) + choose(count, 4);
        }

        let slot_of = |taxon: usize| {
            let sp = species.species_of(taxon);
            tracked.iter().position(|&(s, _)| s == sp)
        };
        let mut finished = vec![false; tracked.len()];

        genes.replay_tree(
            g,
            |taxon| {
                let mut below = vec![0i128; tracked.len()];
                if let Some(slot) = slot_of(taxon) {
                    below[slot] = 1;
                }
                Ok(below)
            },
            |children, _| {
                let mut below = vec![0i128; tracked.len()];
                for (slot, &(_, count)) in tracked.iter().enumerate() {
                    let (mut s1, mut s2, mut s3, mut s4) = (0i128, 0i128, 0i128, 0i128);
                    for child in &children {
                        let c = child[slot];
                        s1 += c;
                        s2 += c * c;
                        s3 += c * c * c;
                        s4 += c * c * c * c;
                    }
                    below[slot] = s1;
                    if finished[slot] || s1 == 0 {
                        continue;
                    }
                    four += s1 * (s1 * s1 * s1 + 8 * s3 - 6 * s1 * s2) - 6 * s4 + 3 * s2 * s2;
                    three += (s1 * s1 * s1 + 2 * s3 - 3 * s1 * s2) * (size - count);
                    if s1 == count {
                        finished[slot] = true;
                    }
                }
                Ok(below)
            },
        )?;
    }

    let result = naive - three / 6 - four / 24;
    if result < 0 {
        return Err(QuartetError::Arithmetic(format!(
            "negative unresolvable quartet count {result} (naive {naive}, three {three}, four {four})"
        )));
    }
    Ok(result)
}

fn choose(n: i128, k: i128) -> i128 {
    if n < k {
        return 0;
    }
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxa::IndividualMapping;
    use crate::tree::Tree;
    use crate::weights::GeneTreeWeights;

    struct NoShortcut;

    impl WeightCalculator for NoShortcut {
        fn tripartition_weight(&self, _: &crate::cluster::Tripartition) -> u64 {
            0
        }
        fn quadripartition_weights(
            &self,
            _: &[crate::cluster::Quadripartition; 3],
        ) -> crate::weights::QuadResults {
            Default::default()
        }
    }

    fn setup(newicks: &[&str], mapping: Option<&str>) -> (TaxonContext, GeneTrees) {
        let trees: Vec<Tree> = newicks.iter().map(|n| Tree::from_newick(n).unwrap()).collect();
        let mapping = mapping.map(|m| IndividualMapping::parse(m).unwrap());
        let ctx = TaxonContext::from_gene_trees(&trees, mapping.as_ref()).unwrap();
        let genes = GeneTrees::new(&trees, &ctx).unwrap();
        (ctx, genes)
    }

    #[test]
    fn test_choose() {
        assert_eq!(choose(5, 4), 5);
        assert_eq!(choose(7, 3), 35);
        assert_eq!(choose(2, 3), 0);
    }

    #[test]
    fn test_single_individual_has_no_correction() {
        let (ctx, genes) = setup(&["((A,B),(C,D));"], None);
        assert_eq!(unresolvable_quartets(&genes, &ctx).unwrap(), 0);
    }

    #[test]
    fn test_three_individuals_with_outgroup() {
        let mapping = Some("X:x1,x2,x3\nY:y\n");
        let (ctx, genes) = setup(&["((x1,x2),(x3,y));"], mapping);
        assert_eq!(unresolvable_quartets(&genes, &ctx).unwrap(), 1);

        let (ctx, genes) = setup(&["(x1,x2,x3,y);"], mapping);
        assert_eq!(unresolvable_quartets(&genes, &ctx).unwrap(), 0);
    }

    #[test]
    fn test_four_individuals_of_one_species() {
        let mapping = Some("X:x1,x2,x3,x4\n");
        let (ctx, genes) = setup(&["(x1,x2,x3,x4);"], mapping);
        assert_eq!(unresolvable_quartets(&genes, &ctx).unwrap(), 0);

        let (ctx, genes) = setup(&["((x1,x2),(x3,x4));"], mapping);
        assert_eq!(unresolvable_quartets(&genes, &ctx).unwrap(), 1);
        let weights = GeneTreeWeights::new(&genes).unwrap();
        assert_eq!(max_possible_score(&weights, &genes, &ctx).unwrap(), 0);
    }

    #[test]
    fn test_fast_and_general_paths_agree() {
        let (ctx, genes) = setup(
            &[
                "((A,B),(C,(D,E)));",
                "(((((A,B),C),D),E),F);",
                "(((A,B),(C,D)),((E,F),G));",
                "((A,B,C),(D,E));",
            ],
            None,
        );
        let weights = GeneTreeWeights::new(&genes).unwrap();
        let fast = max_possible_score(&weights, &genes, &ctx).unwrap();
        let general = max_possible_score(&NoShortcut, &genes, &ctx).unwrap();
        assert_eq!(fast, general);
        assert_eq!(resolvable_weight(&genes).unwrap() as u64, weights.precomputed_max_score().unwrap());
    }
}
