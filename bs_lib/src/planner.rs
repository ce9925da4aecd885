//!
//! Partition planning: split an ordered list of work items into shards, one
//! shard per parallel task.
//!
//! All planners return an empty [`JobBatch`] for an empty input, which callers
//! treat as "no work" rather than dispatching zero-sized rounds.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Ordered shards of work items. Shard `i` is run by task `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBatch<T> {
    shards: Vec<Vec<T>>,
}

impl<T> Default for JobBatch<T> {
    fn default() -> Self {
        JobBatch { shards: Vec::new() }
    }
}

impl<T> JobBatch<T> {
    /// Number of parallel tasks.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// True when there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Total number of work items over all shards.
    pub fn item_count(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }

    pub fn shards(&self) -> &[Vec<T>] {
        &self.shards
    }

    pub fn into_shards(self) -> Vec<Vec<T>> {
        self.shards
    }
}

fn degree(n_items: usize, max_shards: usize) -> usize {
    n_items.min(max_shards.max(1))
}

/// Deal items out like cards: item `i` goes to shard `i % K` with
/// `K = min(max_shards, N)`.
pub fn round_robin<T>(items: Vec<T>, max_shards: usize) -> JobBatch<T> {
    let k = degree(items.len(), max_shards);
    let mut shards: Vec<Vec<T>> = (0..k).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        shards[i % k].push(item);
    }
    JobBatch { shards }
}

/// Sort by weight, heaviest first, then deal round robin. Equal weights keep
/// their input order.
pub fn size_descending<T>(items: Vec<(T, u64)>, max_shards: usize) -> JobBatch<T> {
    let mut items = items;
    items.sort_by_key(|&(_, weight)| Reverse(weight));
    round_robin(items.into_iter().map(|(item, _)| item).collect(), max_shards)
}

/// Split into `K = min(num_shards, N)` contiguous runs. The first `N mod K`
/// runs carry one extra item. Concatenating the shards gives back the input.
pub fn contiguous<T>(items: Vec<T>, num_shards: usize) -> JobBatch<T> {
    let n = items.len();
    let k = degree(n, num_shards);
    if k == 0 {
        return JobBatch::default();
    }
    let base = n / k;
    let remainder = n % k;
    let mut shards: Vec<Vec<T>> = Vec::with_capacity(k);
    let mut rest = items.into_iter();
    for i in 0..k {
        let size = base + usize::from(i < remainder);
        shards.push(rest.by_ref().take(size).collect());
    }
    JobBatch { shards }
}

/// Decide whether a gather step is worth scattering. Below `min_items` the
/// work runs in process and this returns `None`; otherwise it returns the
/// shard count, `n_items / per_shard` capped at `max_shards`.
pub fn scatter_degree(
    n_items: usize,
    min_items: usize,
    per_shard: usize,
    max_shards: usize,
) -> Option<usize> {
    if n_items == 0 || n_items < min_items {
        return None;
    }
    let k = (n_items / per_shard.max(1)).clamp(1, max_shards.max(1));
    Some(k)
}
