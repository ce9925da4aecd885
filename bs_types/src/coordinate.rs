//!
//! The coordinate index: a dense, canonical numbering of every accepted locus.
//! Every filter2 shard and the final assembler address matrix rows through it,
//! so all of them must see the same ordering.

use crate::contig::ContigRank;
use crate::io::{read_bin, write_bin};
use crate::locus::{AcceptanceTree, LocusKey};
use crate::TxHashMap;
use anyhow::{ensure, Result};
use std::path::Path;

/// Ordered `contig:position` strings and their inverse mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateIndex {
    coordinates: Vec<String>,
    offsets: TxHashMap<String, usize>,
}

impl CoordinateIndex {
    /// Order the accepted loci canonically: contigs by [`ContigRank`], then
    /// groups ascending, then positions ascending.
    pub fn from_accepted(accepted: &AcceptanceTree) -> Self {
        let mut keys: Vec<(ContigRank, &LocusKey)> = accepted
            .iter()
            .filter(|&(_, &ok)| ok)
            .map(|(key, _)| (ContigRank::of(&key.contig), key))
            .collect();
        keys.sort_by(|(ra, a), (rb, b)| {
            ra.cmp(rb)
                .then_with(|| a.contig.cmp(&b.contig))
                .then_with(|| a.group.cmp(&b.group))
                .then_with(|| a.position.cmp(&b.position))
        });
        let coordinates: Vec<String> = keys.into_iter().map(|(_, k)| k.coordinate()).collect();
        let offsets = coordinates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        CoordinateIndex {
            coordinates,
            offsets,
        }
    }

    /// Rebuild an index from an already ordered coordinate list.
    pub fn from_coordinates(coordinates: Vec<String>) -> Result<Self> {
        let mut offsets = TxHashMap::default();
        for (i, c) in coordinates.iter().enumerate() {
            let prev = offsets.insert(c.clone(), i);
            ensure!(prev.is_none(), "coordinate {c} appears more than once");
        }
        Ok(CoordinateIndex {
            coordinates,
            offsets,
        })
    }

    /// Number of coordinates.
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    /// True if nothing was accepted.
    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Coordinates in canonical order. These are the matrix row labels.
    pub fn coordinates(&self) -> &[String] {
        &self.coordinates
    }

    /// Offset of a `contig:position` string.
    pub fn offset(&self, coordinate: &str) -> Option<usize> {
        self.offsets.get(coordinate).copied()
    }

    /// Offset of a locus.
    pub fn offset_of(&self, key: &LocusKey) -> Option<usize> {
        self.offset(&key.coordinate())
    }

    /// Persist the ordered list and the inverse mapping as two artifacts so that
    /// shard processes can load them without recomputing the ordering.
    pub fn write(&self, list_path: &Path, index_path: &Path) -> Result<()> {
        write_bin(list_path, &self.coordinates)?;
        write_bin(index_path, &self.offsets)?;
        Ok(())
    }

    /// Load both artifacts and verify that they describe the same bijection.
    pub fn load(list_path: &Path, index_path: &Path) -> Result<Self> {
        let coordinates: Vec<String> = read_bin(list_path)?;
        let offsets: TxHashMap<String, usize> = read_bin(index_path)?;
        ensure!(
            offsets.len() == coordinates.len(),
            "coordinate index {} has {} entries but coordinate list {} has {}",
            index_path.display(),
            offsets.len(),
            list_path.display(),
            coordinates.len()
        );
        for (i, c) in coordinates.iter().enumerate() {
            ensure!(
                offsets.get(c) == Some(&i),
                "coordinate index {} does not map {c} to {i}",
                index_path.display()
            );
        }
        Ok(CoordinateIndex {
            coordinates,
            offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn accepted(keys: &[(&str, u64)]) -> AcceptanceTree {
        keys.iter()
            .map(|&(c, p)| (LocusKey::with_default_group(c, p), true))
            .collect()
    }

    #[test]
    fn test_canonical_order() {
        let tree = accepted(&[
            ("X", 5),
            ("10", 3),
            ("2", 2_000_001),
            ("M", 1),
            ("2", 7),
            ("2", 1_500_000),
        ]);
        let index = CoordinateIndex::from_accepted(&tree);
        assert_eq!(
            index.coordinates(),
            &["2:7", "2:1500000", "2:2000001", "10:3", "X:5", "M:1"]
        );
        assert_eq!(index.offset("10:3"), Some(3));
        assert_eq!(index.offset("10:4"), None);
    }

    #[test]
    fn test_rejected_flags_are_skipped() {
        let mut tree = accepted(&[("1", 1)]);
        tree.insert(LocusKey::with_default_group("1", 2), false);
        assert_eq!(CoordinateIndex::from_accepted(&tree).len(), 1);
    }

    #[test]
    fn test_duplicate_coordinates_rejected() {
        assert!(CoordinateIndex::from_coordinates(vec!["1:1".into(), "1:1".into()]).is_err());
    }

    #[test]
    fn test_write_and_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("list.bin");
        let map = dir.path().join("index.bin");
        let index = CoordinateIndex::from_accepted(&accepted(&[("1", 4), ("Y", 9)]));
        index.write(&list, &map)?;
        assert_eq!(CoordinateIndex::load(&list, &map)?, index);

        // An index that disagrees with its list is rejected.
        let other = CoordinateIndex::from_coordinates(vec!["Y:9".into(), "1:4".into()])?;
        write_bin(&map, &other.offsets)?;
        assert!(CoordinateIndex::load(&list, &map).is_err());
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_index_is_dense_bijection(
            loci in prop::collection::vec(
                (prop::sample::select(vec!["1", "2", "10", "X", "M", "1.5"]), 0u64..5_000_000),
                0..60,
            )
        ) {
            let tree: AcceptanceTree = loci
                .iter()
                .map(|&(c, p)| (LocusKey::with_default_group(c, p), true))
                .collect();
            let index = CoordinateIndex::from_accepted(&tree);
            prop_assert_eq!(index.len(), tree.len());
            for (i, c) in index.coordinates().iter().enumerate() {
                prop_assert_eq!(index.offset(c), Some(i));
            }
        }
    }
}
