//!
//! Locus trees: the contig → group → position → value structure that the
//! counting and acceptance stages pass between processes.
//!
//! The tree is stored flat, keyed by the full `(contig, group, position)`
//! path, so a position entry can never exist without its group and contig.

use crate::{Merge, TxHashMap, DEFAULT_GROUP_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Full key path of one locus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocusKey {
    /// Contig name with any `chr` prefix already removed.
    pub contig: String,
    /// Position bucket, `position / group_size`.
    pub group: u64,
    /// Position on the contig.
    pub position: u64,
}

impl LocusKey {
    /// Build a key, deriving the group from the position.
    pub fn new(contig: impl Into<String>, position: u64, group_size: u64) -> Self {
        LocusKey {
            contig: contig.into(),
            group: position / group_size,
            position,
        }
    }

    /// Build a key using the default megabase grouping.
    pub fn with_default_group(contig: impl Into<String>, position: u64) -> Self {
        Self::new(contig, position, DEFAULT_GROUP_SIZE)
    }

    /// The `contig:position` string used to address the coordinate index.
    pub fn coordinate(&self) -> String {
        format!("{}:{}", self.contig, self.position)
    }
}

impl fmt::Display for LocusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (group {})", self.contig, self.position, self.group)
    }
}

/// A locus tree holding one value per key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize",
    deserialize = "V: Deserialize<'de>"
))]
pub struct LocusTree<V> {
    entries: TxHashMap<LocusKey, V>,
}

impl<V> Default for LocusTree<V> {
    fn default() -> Self {
        LocusTree {
            entries: TxHashMap::default(),
        }
    }
}

impl<V> LocusTree<V> {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positions in the tree.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no positions are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value stored at a key path.
    pub fn get(&self, key: &LocusKey) -> Option<&V> {
        self.entries.get(key)
    }

    /// Mutable value at a key path, creating it with `V::default()` if absent.
    pub fn entry_or_default(&mut self, key: LocusKey) -> &mut V
    where
        V: Default,
    {
        self.entries.entry(key).or_default()
    }

    /// Store a value at a key path, returning the previous one.
    pub fn insert(&mut self, key: LocusKey, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Iterate over all key paths and their values, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&LocusKey, &V)> {
        self.entries.iter()
    }

    /// Iterate over all key paths, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &LocusKey> {
        self.entries.keys()
    }

    /// The distinct groups present on one contig, ascending.
    pub fn groups(&self, contig: &str) -> BTreeSet<u64> {
        self.entries
            .keys()
            .filter(|k| k.contig == contig)
            .map(|k| k.group)
            .collect()
    }
}

impl<V> FromIterator<(LocusKey, V)> for LocusTree<V> {
    fn from_iter<I: IntoIterator<Item = (LocusKey, V)>>(iter: I) -> Self {
        LocusTree {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Number of samples in which each locus was observed.
pub type CountTree = LocusTree<u64>;

/// Loci that passed the cross-sample representation threshold. Every value
/// stored by [`CountTree::threshold`] is `true`.
pub type AcceptanceTree = LocusTree<bool>;

impl CountTree {
    /// Record one observation of a locus.
    pub fn observe(&mut self, key: LocusKey) {
        *self.entry_or_default(key) += 1;
    }

    /// Count a stream of observations.
    pub fn from_observations<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = LocusKey>,
    {
        let mut tree = CountTree::new();
        for key in keys {
            tree.observe(key);
        }
        tree
    }

    /// Keep exactly the loci observed at least `min_observations` times.
    pub fn threshold(&self, min_observations: f64) -> AcceptanceTree {
        self.entries
            .iter()
            .filter(|&(_, &count)| count as f64 >= min_observations)
            .map(|(key, _)| (key.clone(), true))
            .collect()
    }
}

impl Merge for CountTree {
    /// Add every count in `other` to the count at the same key path.
    fn merge(&mut self, other: Self) {
        for (key, count) in other.entries {
            *self.entries.entry(key).or_default() += count;
        }
    }
}

impl AcceptanceTree {
    /// Mark a locus as accepted.
    pub fn accept(&mut self, key: LocusKey) {
        self.entries.insert(key, true);
    }

    /// True if the locus is present and flagged as accepted.
    pub fn is_accepted(&self, key: &LocusKey) -> bool {
        self.entries.get(key).copied().unwrap_or(false)
    }
}

/// Minimum number of observations for a locus seen in `num_samples` samples
/// to meet a representation requirement given in percent.
pub fn representation_threshold(num_samples: usize, min_representation_pct: u8) -> f64 {
    num_samples as f64 * f64::from(min_representation_pct) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn key(contig: &str, position: u64) -> LocusKey {
        LocusKey::with_default_group(contig, position)
    }

    #[test]
    fn test_group_is_megabase_bucket() {
        let k = key("1", 2_500_123);
        assert_eq!(k.group, 2);
        assert_eq!(k.coordinate(), "1:2500123");
        assert_eq!(LocusKey::new("X", 999, 1000).group, 0);
    }

    #[test]
    fn test_merge_creates_missing_levels() {
        let mut acc = CountTree::from_observations([key("1", 10), key("1", 10)]);
        let other = CountTree::from_observations([key("1", 10), key("2", 5_000_000)]);
        acc.merge(other);
        assert_eq!(acc.get(&key("1", 10)), Some(&3));
        assert_eq!(acc.get(&key("2", 5_000_000)), Some(&1));
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.groups("2").into_iter().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_threshold_keeps_well_represented_loci() {
        let mut counts = CountTree::new();
        for _ in 0..7 {
            counts.observe(key("1", 100));
        }
        for _ in 0..3 {
            counts.observe(key("1", 200));
        }
        let min = representation_threshold(10, 50);
        assert_eq!(min, 5.0);
        let accepted = counts.threshold(min);
        assert_eq!(accepted.len(), 1);
        assert!(accepted.is_accepted(&key("1", 100)));
        assert!(!accepted.is_accepted(&key("1", 200)));
        assert!(!accepted.is_accepted(&key("7", 100)));
    }

    #[test]
    fn test_fractional_threshold_rounds_up_in_effect() {
        // 3 samples at 75% requires 2.25 observations, so 2 is not enough.
        let counts = CountTree::from_observations([key("1", 1), key("1", 1), key("1", 2)]);
        let accepted = counts.threshold(representation_threshold(3, 75));
        assert!(accepted.is_empty());
        assert!(counts.threshold(representation_threshold(3, 60)).is_accepted(&key("1", 1)));
    }

    #[test]
    fn test_acceptance_tree_false_is_not_accepted() {
        let mut tree = AcceptanceTree::new();
        tree.insert(key("1", 5), false);
        tree.accept(key("1", 6));
        assert!(!tree.is_accepted(&key("1", 5)));
        assert!(tree.is_accepted(&key("1", 6)));
    }

    fn arb_key() -> impl Strategy<Value = LocusKey> {
        (prop::sample::select(vec!["1", "2", "X", "M"]), 0u64..3_000_000)
            .prop_map(|(c, p)| key(c, p))
    }

    proptest! {
        #[test]
        fn prop_merge_is_order_independent(
            shards in prop::collection::vec(prop::collection::vec(arb_key(), 0..20), 1..6),
            rotate in 0usize..6,
        ) {
            let combined = CountTree::from_observations(shards.iter().flatten().cloned());

            let trees: Vec<CountTree> = shards
                .iter()
                .map(|s| CountTree::from_observations(s.iter().cloned()))
                .collect();
            let forward = CountTree::from_chunks(trees.clone());

            let mut permuted = trees;
            let n = permuted.len();
            permuted.rotate_left(rotate % n);
            permuted.reverse();
            let backward = CountTree::from_chunks(permuted);

            prop_assert_eq!(&forward, &combined);
            prop_assert_eq!(&backward, &combined);
        }
    }
}
