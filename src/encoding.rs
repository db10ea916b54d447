//! Compact token stream for the input gene trees.
//!
//! # Overview
//! All gene trees are flattened once into a single postorder `i32` stream:
//!
//! - a non-negative token is a leaf and carries its taxon id
//! - a negative token `-k` closes an internal node with `k` children
//! - [`TREE_END`] closes a gene tree
//!
//! Consumers never walk the stream by hand. They call [`GeneTrees::replay_tree`]
//! (or [`GeneTrees::replay`] for all trees) with one closure that builds the
//! value of a leaf and one that merges child values into the value of an
//! internal node. The replay checks the stack discipline and reports any
//! violation as [`QuartetError::MalformedEncoding`].

use crate::cluster::Cluster;
use crate::error::{QuartetError, Result};
use crate::taxa::TaxonContext;
use crate::tree::Tree;
use std::ops::Range;

/// Marks the end of one gene tree in the token stream.
pub const TREE_END: i32 = i32::MIN;

/// The gene trees of a run, as a token stream plus one leaf set per tree.
#[derive(Debug, Clone)]
pub struct GeneTrees {
    tokens: Vec<i32>,
    leaf_sets: Vec<Cluster>,
    ranges: Vec<Range<usize>>,
}

impl GeneTrees {
    /// Encode parsed gene trees against the taxon registry.
    ///
    /// # Errors
    /// `UnknownTaxon` for a leaf missing from the registry and
    /// `DuplicateTaxon` for a taxon that occurs twice in one gene tree.
    pub fn new(trees: &[Tree], context: &TaxonContext) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut leaf_sets = Vec::with_capacity(trees.len());

        for tree in trees {
            let mut leaves = context.empty_cluster();
            for id in tree.postorder() {
                let node = tree.node(id);
                if node.children.is_empty() {
                    let name = node.name.as_deref().unwrap_or_default();
                    let taxon = context
                        .taxon_id(name)
                        .ok_or_else(|| QuartetError::UnknownTaxon(name.to_string()))?;
                    if leaves.contains(taxon) {
                        return Err(QuartetError::DuplicateTaxon(name.to_string()));
                    }
                    leaves.add_leaf(taxon);
                    tokens.push(encode_count(taxon)?);
                } else {
                    tokens.push(-encode_count(node.children.len())?);
                }
            }
            tokens.push(TREE_END);
            leaf_sets.push(leaves);
        }

        Self::from_parts(tokens, leaf_sets)
    }

    /// Wrap an existing token stream.
    ///
    /// # Errors
    /// `MalformedEncoding` when the stream does not end with [`TREE_END`] or
    /// holds a different number of trees than `leaf_sets`.
    pub fn from_parts(tokens: Vec<i32>, leaf_sets: Vec<Cluster>) -> Result<Self> {
        let mut ranges = Vec::with_capacity(leaf_sets.len());
        let mut start = 0;
        for (pos, &token) in tokens.iter().enumerate() {
            if token == TREE_END {
                ranges.push(start..pos);
                start = pos + 1;
            }
        }
        if start != tokens.len() {
            return Err(QuartetError::MalformedEncoding(
                "token stream does not end with a tree marker".to_string(),
            ));
        }
        if ranges.len() != leaf_sets.len() {
            return Err(QuartetError::MalformedEncoding(format!(
                "{} trees in the token stream but {} leaf sets",
                ranges.len(),
                leaf_sets.len()
            )));
        }
        Ok(GeneTrees {
            tokens,
            leaf_sets,
            ranges,
        })
    }

    /// Number of gene trees.
    pub fn len(&self) -> usize {
        self.leaf_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_sets.is_empty()
    }

    pub fn tokens(&self) -> &[i32] {
        &self.tokens
    }

    pub fn leaf_sets(&self) -> &[Cluster] {
        &self.leaf_sets
    }

    pub fn leaf_set(&self, tree: usize) -> &Cluster {
        &self.leaf_sets[tree]
    }

    /// Replay one gene tree and return the aggregate of its root.
    ///
    /// `leaf` receives the taxon id of each leaf. `internal` receives the
    /// child aggregates (in Newick order) and the tree's leaf set.
    ///
    /// # Errors
    /// `MalformedEncoding` on a pop from an empty stack or when the tree does
    /// not reduce to exactly one aggregate. Errors of the closures are
    /// propagated unchanged.
    pub fn replay_tree<T, L, I>(&self, tree: usize, mut leaf: L, mut internal: I) -> Result<T>
    where
        L: FnMut(usize) -> Result<T>,
        I: FnMut(Vec<T>, &Cluster) -> Result<T>,
    {
        let leaf_set = &self.leaf_sets[tree];
        let mut stack: Vec<T> = Vec::new();

        for &token in &self.tokens[self.ranges[tree].clone()] {
            if token >= 0 {
                stack.push(leaf(token as usize)?);
                continue;
            }
            let arity = token.unsigned_abs() as usize;
            if arity > stack.len() {
                return Err(QuartetError::MalformedEncoding(format!(
                    "gene tree {tree}: node with {arity} children but only {} values on the stack",
                    stack.len()
                )));
            }
            let children = stack.split_off(stack.len() - arity);
            stack.push(internal(children, leaf_set)?);
        }

        let root = stack.pop().ok_or_else(|| {
            QuartetError::MalformedEncoding(format!("gene tree {tree} is empty"))
        })?;
        if !stack.is_empty() {
            return Err(QuartetError::MalformedEncoding(format!(
                "gene tree {tree}: {} values left on the stack",
                stack.len()
            )));
        }
        Ok(root)
    }

    /// Replay every gene tree in order, returning the root aggregates.
    ///
    /// The closures receive the gene-tree index as their first argument.
    pub fn replay<T, L, I>(&self, mut leaf: L, mut internal: I) -> Result<Vec<T>>
    where
        L: FnMut(usize, usize) -> Result<T>,
        I: FnMut(usize, Vec<T>, &Cluster) -> Result<T>,
    {
        (0..self.len())
            .map(|g| {
                self.replay_tree(
                    g,
                    |taxon| leaf(g, taxon),
                    |children, leaves| internal(g, children, leaves),
                )
            })
            .collect()
    }
}

fn encode_count(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        QuartetError::MalformedEncoding(format!("{value} does not fit in a token"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(newicks: &[&str]) -> (TaxonContext, GeneTrees) {
        let trees: Vec<Tree> = newicks.iter().map(|n| Tree::from_newick(n).unwrap()).collect();
        let ctx = TaxonContext::from_gene_trees(&trees, None).unwrap();
        let genes = GeneTrees::new(&trees, &ctx).unwrap();
        (ctx, genes)
    }

    #[test]
    fn test_token_layout() {
        let (_, genes) = encode(&["((A,B),C);", "(A,(B,C,D));"]);
        assert_eq!(
            genes.tokens(),
            &[0, 1, -2, 2, -2, TREE_END, 0, 1, 2, 3, -3, -2, TREE_END]
        );
        assert_eq!(genes.len(), 2);
        assert_eq!(genes.leaf_set(0).size(), 3);
        assert_eq!(genes.leaf_set(1).size(), 4);
    }

    #[test]
    fn test_replay_counts_leaves() {
        let (_, genes) = encode(&["((A,B),C);", "(A,(B,C,D));", "E;"]);
        let sizes = genes
            .replay(|_, _| Ok(1usize), |_, children, _| Ok(children.iter().sum()))
            .unwrap();
        assert_eq!(sizes, vec![3, 4, 1]);
    }

    #[test]
    fn test_duplicate_leaf_is_rejected() {
        let trees = vec![Tree::from_newick("((A,B),A);").unwrap()];
        let ctx = TaxonContext::from_gene_trees(&trees, None).unwrap();
        assert!(matches!(
            GeneTrees::new(&trees, &ctx),
            Err(QuartetError::DuplicateTaxon(_))
        ));
    }

    #[test]
    fn test_malformed_streams() {
        let leaves = Cluster::full(3);

        // missing end marker
        assert!(matches!(
            GeneTrees::from_parts(vec![0, 1, -2], vec![leaves.clone()]),
            Err(QuartetError::MalformedEncoding(_))
        ));
        // more trees than leaf sets
        assert!(matches!(
            GeneTrees::from_parts(vec![0, TREE_END, 1, TREE_END], vec![leaves.clone()]),
            Err(QuartetError::MalformedEncoding(_))
        ));

        let count = |genes: &GeneTrees| {
            genes.replay_tree(0, |_| Ok(1usize), |children, _| Ok(children.len()))
        };
        // pop from an empty stack
        let underflow = GeneTrees::from_parts(vec![0, -2, TREE_END], vec![leaves.clone()]).unwrap();
        assert!(matches!(count(&underflow), Err(QuartetError::MalformedEncoding(_))));
        // leftover values
        let leftover = GeneTrees::from_parts(vec![0, 1, TREE_END], vec![leaves]).unwrap();
        assert!(matches!(count(&leftover), Err(QuartetError::MalformedEncoding(_))));
    }
}
