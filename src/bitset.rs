//! Compact bitset representation for taxon sets.
//!
//! # Overview
//! A bitset is an efficient way to represent which taxa belong to a cluster.
//! Each bit position corresponds to a taxon id from the run's taxon registry.
//!
//! # Example
//! For taxa [A, B, C, D] mapped to ids [0, 1, 2, 3]:
//! - Cluster {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Cluster {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset for representing which taxa belong to a cluster.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily many taxa.
/// Each u64 word holds 64 taxon ids.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed. Calculate as `num_taxa.div_ceil(64)`
    ///
    /// # Example
    /// ```
    /// # use quartet_support::bitset::Bitset;
    /// // For 100 taxa we need 2 words (128 bits)
    /// let bs = Bitset::zeros(2);
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use quartet_support::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;     // Equivalent to idx / 64
        let bit = idx & 63;      // Equivalent to idx % 64
        self.0[word] |= 1u64 << bit;
    }

    /// Clears the bit at the given index.
    #[inline]
    pub fn clear(&mut self, idx: usize) {
        self.0[idx >> 6] &= !(1u64 << (idx & 63));
    }

    /// Returns true when the bit at `idx` is set.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        (self.0[idx >> 6] >> (idx & 63)) & 1 == 1
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// # Example
    /// ```
    /// # use quartet_support::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set(0);   // {0}
    ///
    /// let mut right = Bitset::zeros(1);
    /// right.set(1);  // {1}
    ///
    /// left.or_assign(&right);  // {0} ∪ {1} = {0, 1}
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Removes every bit of `other` from `self` (set difference).
    #[inline]
    pub fn and_not_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a &= !*b;
        }
    }

    /// Counts the number of set bits (population count).
    ///
    /// # Example
    /// ```
    /// # use quartet_support::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(2);
    /// bs.set(5);
    /// assert_eq!(bs.count_ones(), 3);
    /// ```
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Size of the intersection with `other`, without allocating it.
    #[inline]
    pub fn and_count(&self, other: &Bitset) -> usize {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a & b).count_ones() as usize)
            .sum()
    }

    /// Flips all bits below `len`, keeping the remaining bits at 0.
    ///
    /// # Example
    /// Input:  0b0011 (len 4) → Output: 0b1100
    pub fn complement(&self, len: usize) -> Bitset {
        let mut out = Bitset(self.0.iter().map(|w| !w).collect());
        let tail = len & 63;
        let full_words = len >> 6;
        for (i, w) in out.0.iter_mut().enumerate() {
            if i > full_words || (i == full_words && tail == 0) {
                *w = 0;
            } else if i == full_words {
                *w &= (1u64 << tail) - 1;
            }
        }
        out
    }

    /// True when no bit is set.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Iterates over the indices of set bits in increasing order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some((wi << 6) + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.0[0], 0b0101);
        assert!(bs.get(2));
        bs.clear(2);
        assert!(!bs.get(2));
        assert_eq!(bs.0[0], 0b0001);
    }

    #[test]
    fn test_bitset_or_and_difference() {
        let mut bs1 = Bitset::zeros(1);
        bs1.set(0);
        bs1.set(1);

        let mut bs2 = Bitset::zeros(1);
        bs2.set(1);
        bs2.set(3);

        assert_eq!(bs1.and_count(&bs2), 1);
        bs1.or_assign(&bs2);
        assert_eq!(bs1.0[0], 0b1011);
        bs1.and_not_assign(&bs2);
        assert_eq!(bs1.0[0], 0b0001);
    }

    /// ```text
    ///           root
    ///          /    \
    ///        node1   D
    ///        /   \
    ///       A    node2
    ///            /   \
    ///           B     C
    /// ```
    ///
    /// Taxon ids: A=0, B=1, C=2, D=3. The complement of node1 is {D}.
    #[test]
    fn test_mini_tree_complement() {
        let mut node1 = Bitset::zeros(1);
        node1.set(0);
        node1.set(1);
        node1.set(2);
        let rest = node1.complement(4);
        assert_eq!(rest.0[0], 0b1000);
        assert_eq!(rest.count_ones(), 1);
    }

    #[test]
    fn test_large_complement_and_iteration() {
        // More than 64 taxa (multiple words)
        let mut bs = Bitset::zeros(2);
        bs.set(0);
        bs.set(63);
        bs.set(64);
        assert_eq!(bs.iter_ones().collect::<Vec<_>>(), vec![0, 63, 64]);

        let rest = bs.complement(70);
        assert_eq!(rest.count_ones(), 67);
        assert!(!rest.get(64));
        assert!(rest.get(69));
        assert_eq!(rest.0[1] >> 6, 0);

        let exact = Bitset::zeros(1).complement(64);
        assert_eq!(exact.0[0], u64::MAX);
        assert!(Bitset::zeros(2).is_zero());
    }
}
