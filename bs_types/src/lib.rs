//! bs_types
//!
//! Shared data model for the sample-by-locus pipeline: locus trees and their
//! merge rules, the canonical coordinate index, per-sample records and the
//! binary artifact format that shard processes exchange through the working
//! directory.

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
#![deny(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;

pub mod contig;
pub mod coordinate;
pub mod io;
pub mod locus;
pub mod records;

pub use crate::contig::{canonical_contig_order, ContigRank};
pub use crate::coordinate::CoordinateIndex;
pub use crate::locus::{AcceptanceTree, CountTree, LocusKey, LocusTree};
pub use crate::records::{Cell, EmptyCellMarker, LocusObservation, RatioRecord, SampleVectors};

/// Default width, in bases, of the buckets that loci are grouped into.
pub const DEFAULT_GROUP_SIZE: u64 = 1_000_000;

/// A deterministic and fast hasher.
#[derive(Clone, Copy, Default)]
pub struct TxHasher;

impl TxHasher {
    fn random_state() -> ahash::RandomState {
        ahash::RandomState::with_seeds(0, 0, 0, 0)
    }
}

impl BuildHasher for TxHasher {
    type Hasher = ahash::AHasher;

    fn build_hasher(&self) -> Self::Hasher {
        Self::random_state().build_hasher()
    }
}

/// A HashMap with a deterministic hasher, so that shard outputs built from the
/// same inputs are byte-identical.
pub type TxHashMap<K, V> = HashMap<K, V, TxHasher>;

/// A HashSet with a deterministic hasher.
pub type TxHashSet<K> = HashSet<K, TxHasher>;

/// Anything produced by several shards that has to be folded back into one
/// value. Implementations must be associative and commutative so that the
/// order in which shards finish does not change the result.
pub trait Merge {
    /// Combine `other` into `self`, consuming `other`.
    fn merge(&mut self, other: Self);

    /// Merge an iterator of partial results into one value.
    fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Self>,
        Self: Default + Sized,
    {
        chunks
            .into_iter()
            .fold(Default::default(), |mut merged, this| {
                merged.merge(this);
                merged
            })
    }
}
