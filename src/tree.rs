//! Arena representation of rooted phylogenetic trees.
//!
//! # Overview
//! Gene trees and species trees are parsed with `phylotree` and copied into a
//! small arena where every node is addressed by its [`NodeId`] (its index in
//! the arena). The arena gives the scorer and the annotator what they need and
//! nothing more: postorder traversal, parent/child/sibling navigation, and
//! per-node branch length and support label that can be rewritten in place.
//!
//! Per-pass data (clusters, branch statistics) is never stored on the nodes;
//! it lives in vectors indexed by [`NodeId`].

use crate::annotate::BranchSupport;
use crate::cluster::Cluster;
use crate::error::{QuartetError, Result};
use crate::taxa::TaxonContext;
use phylotree::tree::Tree as PhyloTree;

/// Index of a node in a [`Tree`] arena.
pub type NodeId = usize;

/// A node of the arena.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Taxon name for leaves, optional label for internal nodes
    pub name: Option<String>,
    pub parent: Option<NodeId>,
    /// Children in the order they appear in the Newick string
    pub children: Vec<NodeId>,
    /// Length of the branch above this node
    pub length: Option<f64>,
    /// Support annotation of the branch above this node
    pub support: Option<BranchSupport>,
}

impl Node {
    fn named(name: Option<String>, parent: Option<NodeId>, length: Option<f64>) -> Self {
        Node {
            name,
            parent,
            length,
            ..Default::default()
        }
    }
}

/// A rooted tree stored as an arena of [`Node`]s.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Parse a Newick string.
    ///
    /// # Example
    /// ```
    /// # use quartet_support::tree::Tree;
    /// let tree = Tree::from_newick("((A,B),(C,D));").unwrap();
    /// assert_eq!(tree.len(), 7);
    /// assert_eq!(tree.leaf_names(), vec!["A", "B", "C", "D"]);
    /// ```
    pub fn from_newick(newick: &str) -> Result<Self> {
        let newick = newick.trim();
        if !newick.contains('(') {
            return Self::single_leaf(newick);
        }
        let phylo = PhyloTree::from_newick(newick)
            .map_err(|e| QuartetError::Newick(format!("{e} in '{newick}'")))?;
        Self::from_phylo(&phylo)
    }

    /// A tree made of one named leaf, e.g. `A;` or `A:0.5;`.
    fn single_leaf(newick: &str) -> Result<Self> {
        let body = newick.trim_end_matches(';');
        let name = body.split(':').next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(QuartetError::EmptyTree);
        }
        Ok(Tree {
            nodes: vec![Node::named(Some(name.to_string()), None, None)],
            root: 0,
        })
    }

    /// Copy a `phylotree` tree into the arena, keeping child order.
    ///
    /// # Errors
    /// Returns `EmptyTree` for a tree without root and `Newick` for an unnamed leaf.
    pub fn from_phylo(tree: &PhyloTree) -> Result<Self> {
        let phylo_root = tree.get_root().map_err(|_| QuartetError::EmptyTree)?;
        let mut nodes: Vec<Node> = Vec::new();

        // (phylotree node, parent in the arena)
        let mut stack = vec![(phylo_root, None::<NodeId>)];
        while let Some((phylo_id, parent)) = stack.pop() {
            let src = tree
                .get(&phylo_id)
                .map_err(|e| QuartetError::Newick(e.to_string()))?;
            let name = src
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
            if src.children.is_empty() && name.is_none() {
                return Err(QuartetError::Newick("all leaves must be named".to_string()));
            }

            let id = nodes.len();
            nodes.push(Node::named(name, parent, src.parent_edge));
            if let Some(p) = parent {
                nodes[p].children.push(id);
            }
            for &child in src.children.iter().rev() {
                stack.push((child, Some(id)));
            }
        }

        Ok(Tree { nodes, root: 0 })
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_empty()
    }

    #[inline]
    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    #[inline]
    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes[id].children.len()
    }

    /// Children of `id`'s parent other than `id`, in order. Empty for the root.
    pub fn siblings(&self, id: NodeId) -> Vec<NodeId> {
        match self.nodes[id].parent {
            Some(p) => self.nodes[p]
                .children
                .iter()
                .copied()
                .filter(|&c| c != id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Node ids in postorder (children left to right, then the parent).
    ///
    /// Uses an explicit stack so that deep caterpillar trees do not exhaust
    /// the call stack.
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for &child in self.nodes[id].children.iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    /// Leaf names in postorder.
    pub fn leaf_names(&self) -> Vec<&str> {
        self.postorder()
            .into_iter()
            .filter(|&id| self.is_leaf(id))
            .filter_map(|id| self.nodes[id].name.as_deref())
            .collect()
    }

    /// Compute the taxon cluster below every node.
    ///
    /// # Algorithm
    /// - **Leaf node**: singleton cluster of its taxon id
    /// - **Internal node**: pop one cluster per child and merge them with OR
    ///
    /// The result is indexed by [`NodeId`].
    ///
    /// # Errors
    /// Returns `UnknownTaxon` if a leaf name is not in the taxon registry and
    /// `DuplicateTaxon` if a taxon sits below two children of one node.
    pub fn clusters(&self, context: &TaxonContext) -> Result<Vec<Cluster>> {
        let mut by_node: Vec<Option<Cluster>> = vec![None; self.nodes.len()];
        let mut stack: Vec<Cluster> = Vec::new();
        for id in self.postorder() {
            let node = &self.nodes[id];
            let cluster = if node.children.is_empty() {
                let name = node.name.as_deref().unwrap_or_default();
                context.leaf_cluster(name)?
            } else {
                let mut merged = context.empty_cluster();
                for _ in 0..node.children.len() {
                    let child = stack.pop().ok_or_else(|| {
                        QuartetError::InternalConsistency("cluster stack underflow".to_string())
                    })?;
                    if let Some(shared) = child.iter().find(|&t| merged.contains(t)) {
                        return Err(QuartetError::DuplicateTaxon(
                            context.taxon_name(shared).to_string(),
                        ));
                    }
                    merged.union_with(&child);
                }
                merged
            };
            stack.push(cluster.clone());
            by_node[id] = Some(cluster);
        }
        by_node
            .into_iter()
            .map(|c| {
                c.ok_or_else(|| {
                    QuartetError::InternalConsistency("node unreachable from the root".to_string())
                })
            })
            .collect()
    }

    /// Replace leaves that name a species by its individuals.
    ///
    /// A species with a single individual is renamed to that individual; a
    /// species with several individuals becomes a clade with one leaf per
    /// individual. Leaves that already name a taxon are left untouched.
    pub fn expand_species_leaves(&mut self, context: &TaxonContext) {
        let leaves: Vec<NodeId> = (0..self.nodes.len()).filter(|&id| self.is_leaf(id)).collect();
        for id in leaves {
            let Some(name) = self.nodes[id].name.clone() else { continue };
            if context.taxon_id(&name).is_some() {
                continue;
            }
            let Some(individuals) = context.species().individuals_of_name(&name) else { continue };
            match individuals {
                [] => {}
                [single] => self.nodes[id].name = Some(context.taxon_name(*single).to_string()),
                many => {
                    for &ind in many {
                        let child = self.nodes.len();
                        self.nodes.push(Node::named(
                            Some(context.taxon_name(ind).to_string()),
                            Some(id),
                            None,
                        ));
                        self.nodes[id].children.push(child);
                    }
                }
            }
        }
    }

    /// Write the tree as Newick, with support labels on internal nodes and
    /// branch lengths where they are known.
    ///
    /// # Example
    /// ```
    /// # use quartet_support::tree::Tree;
    /// let tree = Tree::from_newick("((A:1,B:2):0.5,C);").unwrap();
    /// assert_eq!(tree.to_newick(), "((A:1,B:2):0.5,C);");
    /// ```
    pub fn to_newick(&self) -> String {
        let mut rendered: Vec<String> = vec![String::new(); self.nodes.len()];
        for id in self.postorder() {
            let node = &self.nodes[id];
            let mut s = String::new();
            if node.children.is_empty() {
                s.push_str(node.name.as_deref().unwrap_or_default());
            } else {
                s.push('(');
                for (k, &child) in node.children.iter().enumerate() {
                    if k > 0 {
                        s.push(',');
                    }
                    s.push_str(&std::mem::take(&mut rendered[child]));
                }
                s.push(')');
                match (&node.support, &node.name) {
                    (Some(support), _) => s.push_str(&support.to_string()),
                    (None, Some(name)) => s.push_str(name),
                    (None, None) => {}
                }
            }
            if let (Some(len), false) = (node.length, self.is_root(id)) {
                s.push_str(&format!(":{len}"));
            }
            rendered[id] = s;
        }
        format!("{};", rendered[self.root])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ```text
    ///           root
    ///          /    \
    ///      node1     node2
    ///      /   \     /   \
    ///     A     B   C    node3
    ///                    /   \
    ///                   D     E
    /// ```
    #[test]
    fn test_postorder_and_navigation() {
        let tree = Tree::from_newick("((A,B),(C,(D,E)));").unwrap();
        let names: Vec<String> = tree
            .postorder()
            .into_iter()
            .map(|id| tree.node(id).name.clone().unwrap_or_else(|| "*".to_string()))
            .collect();
        assert_eq!(names, vec!["A", "B", "*", "C", "D", "E", "*", "*", "*"]);

        let root = tree.root();
        assert!(tree.is_root(root));
        assert_eq!(tree.child_count(root), 2);
        let node1 = tree.node(root).children[0];
        let node2 = tree.node(root).children[1];
        assert_eq!(tree.siblings(node1), vec![node2]);
        assert!(tree.siblings(root).is_empty());
    }

    #[test]
    fn test_unnamed_leaf_is_rejected() {
        assert!(matches!(
            Tree::from_newick("((A,),C);"),
            Err(QuartetError::Newick(_))
        ));
    }

    #[test]
    fn test_newick_round_trip_keeps_lengths_and_labels() {
        let tree = Tree::from_newick("((A:0.1,B:0.2)x:0.3,C:0.4);").unwrap();
        assert_eq!(tree.to_newick(), "((A:0.1,B:0.2)x:0.3,C:0.4);");
    }

    #[test]
    fn test_deep_caterpillar_traversal() {
        let mut newick = String::from("T0");
        for i in 1..3000 {
            newick = format!("({newick},T{i})");
        }
        newick.push(';');
        let tree = Tree::from_newick(&newick).unwrap();
        assert_eq!(tree.postorder().len(), 2 * 3000 - 1);
        assert_eq!(tree.leaf_names().len(), 3000);
    }
}
