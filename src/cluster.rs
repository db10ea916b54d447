//! Taxon clusters and the partitions built from them.
//!
//! A [`Cluster`] is a [`Bitset`] that knows the size of the taxon universe it
//! was drawn from, so that complements stay inside that universe. Clusters are
//! combined into the three partition shapes used for scoring:
//!
//! - [`Tripartition`]: the three sides around a species-tree node
//! - [`Quadripartition`]: one resolution `(a,b | c,d)` of the quartet around a branch
//! - [`Bipartition`]: a cluster and its complement, for diagnostics

use crate::bitset::Bitset;
use crate::taxa::TaxonContext;

/// A set of taxon ids over a fixed-size universe.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Cluster {
    bits: Bitset,
    universe: usize,
}

impl Cluster {
    /// An empty cluster over `universe` taxa.
    pub fn empty(universe: usize) -> Self {
        Cluster {
            bits: Bitset::zeros(universe.div_ceil(64).max(1)),
            universe,
        }
    }

    /// A cluster holding the single taxon `id`.
    pub fn singleton(universe: usize, id: usize) -> Self {
        let mut c = Self::empty(universe);
        c.add_leaf(id);
        c
    }

    /// The cluster holding every taxon of the universe.
    pub fn full(universe: usize) -> Self {
        Self::empty(universe).complement()
    }

    #[inline]
    pub fn universe(&self) -> usize {
        self.universe
    }

    pub fn bits(&self) -> &Bitset {
        &self.bits
    }

    #[inline]
    pub fn add_leaf(&mut self, id: usize) {
        debug_assert!(id < self.universe);
        self.bits.set(id);
    }

    #[inline]
    pub fn remove_leaf(&mut self, id: usize) {
        self.bits.clear(id);
    }

    #[inline]
    pub fn contains(&self, id: usize) -> bool {
        id < self.universe && self.bits.get(id)
    }

    /// Number of taxa in the cluster.
    #[inline]
    pub fn size(&self) -> usize {
        self.bits.count_ones()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_zero()
    }

    /// In-place union.
    #[inline]
    pub fn union_with(&mut self, other: &Cluster) {
        self.bits.or_assign(&other.bits);
    }

    /// Union of two clusters as a new cluster.
    pub fn union(&self, other: &Cluster) -> Cluster {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    /// `self` minus `other`.
    pub fn difference(&self, other: &Cluster) -> Cluster {
        let mut out = self.clone();
        out.bits.and_not_assign(&other.bits);
        out
    }

    /// Every taxon of the universe that is not in `self`.
    pub fn complement(&self) -> Cluster {
        Cluster {
            bits: self.bits.complement(self.universe),
            universe: self.universe,
        }
    }

    /// Size of the intersection with `other`.
    #[inline]
    pub fn intersection_size(&self, other: &Cluster) -> usize {
        self.bits.and_count(&other.bits)
    }

    pub fn is_disjoint(&self, other: &Cluster) -> bool {
        self.intersection_size(other) == 0
    }

    /// Taxon ids in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// Render as `{A,B,C}` using taxon names.
    pub fn describe(&self, context: &TaxonContext) -> String {
        let mut s = String::from("{");
        for (k, id) in self.iter().enumerate() {
            if k > 0 {
                s.push(',');
            }
            s.push_str(context.taxon_name(id));
        }
        s.push('}');
        s
    }
}

/// Three disjoint clusters: the sides of one species-tree node.
///
/// Sides are stored in canonical (sorted) order, so two tripartitions built
/// from the same sides in a different order compare equal.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Tripartition {
    sides: [Cluster; 3],
}

impl Tripartition {
    pub fn new(a: Cluster, b: Cluster, c: Cluster) -> Self {
        let mut sides = [a, b, c];
        sides.sort_unstable();
        Tripartition { sides }
    }

    pub fn sides(&self) -> &[Cluster; 3] {
        &self.sides
    }
}

/// Four disjoint clusters `(a, b | c, d)`: one resolution of the quartet
/// around a branch.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Quadripartition {
    parts: [Cluster; 4],
}

impl Quadripartition {
    pub fn new(a: Cluster, b: Cluster, c: Cluster, d: Cluster) -> Self {
        Quadripartition { parts: [a, b, c, d] }
    }

    /// Parts in order `a, b, c, d`; `a,b` and `c,d` are the two cherries.
    pub fn parts(&self) -> &[Cluster; 4] {
        &self.parts
    }

    /// Render as `{A,B}{C}|{D}{E}`.
    pub fn describe(&self, context: &TaxonContext) -> String {
        let [a, b, c, d] = &self.parts;
        format!(
            "{}{}|{}{}",
            a.describe(context),
            b.describe(context),
            c.describe(context),
            d.describe(context)
        )
    }

    /// Render with species names, as `{S1}{S2}|{S3}{S4,S5}`.
    pub fn describe_species(&self, context: &TaxonContext) -> String {
        let [a, b, c, d] = &self.parts;
        format!(
            "{}{}|{}{}",
            context.species_names_in(a),
            context.species_names_in(b),
            context.species_names_in(c),
            context.species_names_in(d)
        )
    }
}

/// A cluster together with its complement.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Bipartition {
    pub left: Cluster,
    pub right: Cluster,
}

impl Bipartition {
    /// Split the universe into `cluster` and everything else.
    pub fn of(cluster: &Cluster) -> Self {
        Bipartition {
            left: cluster.clone(),
            right: cluster.complement(),
        }
    }

    pub fn describe(&self, context: &TaxonContext) -> String {
        format!("{}|{}", self.left.describe(context), self.right.describe(context))
    }
}
