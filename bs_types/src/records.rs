//!
//! Per-sample records produced by the first filter and the dense per-sample
//! vectors produced by the second.

use crate::coordinate::CoordinateIndex;
use crate::locus::{AcceptanceTree, LocusKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// One accepted input row, reduced to what the matrix needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioRecord {
    /// Contig name, `chr` prefix removed.
    pub contig: String,
    /// Position on the contig.
    pub position: u64,
    /// Observed ratio.
    pub ratio: f64,
}

impl RatioRecord {
    /// Build a record.
    pub fn new(contig: impl Into<String>, position: u64, ratio: f64) -> Self {
        RatioRecord {
            contig: contig.into(),
            position,
            ratio,
        }
    }

    /// Locus of this record under the given grouping.
    pub fn key(&self, group_size: u64) -> LocusKey {
        LocusKey::new(self.contig.clone(), self.position, group_size)
    }
}

/// A locus seen in one sample. The group is computed by the shard that
/// observed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocusObservation {
    /// Contig name, `chr` prefix removed.
    pub contig: String,
    /// Position on the contig.
    pub position: u64,
    /// Position bucket.
    pub group: u64,
}

impl LocusObservation {
    /// The tree key of this observation.
    pub fn key(&self) -> LocusKey {
        LocusKey {
            contig: self.contig.clone(),
            group: self.group,
            position: self.position,
        }
    }
}

impl From<LocusKey> for LocusObservation {
    fn from(key: LocusKey) -> Self {
        LocusObservation {
            contig: key.contig,
            position: key.position,
            group: key.group,
        }
    }
}

/// One cell of the output matrix.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Cell {
    /// The sample has no accepted value at this locus.
    #[default]
    Empty,
    /// The sample's ratio at this locus.
    Ratio(f64),
}

impl Cell {
    /// Text for a delimited table, using `marker` for empty cells.
    pub fn render(&self, marker: &EmptyCellMarker) -> String {
        match self {
            Cell::Empty => marker.to_string(),
            Cell::Ratio(r) => r.to_string(),
        }
    }

    /// True if the cell carries a value.
    pub fn is_ratio(&self) -> bool {
        matches!(self, Cell::Ratio(_))
    }
}

/// What to write in cells that have no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmptyCellMarker {
    /// An integer marker, e.g. `-1`.
    Integer(i64),
    /// A floating point marker, e.g. `-0.5`.
    Float(f64),
    /// Any other text, including the empty string.
    Text(String),
}

impl Default for EmptyCellMarker {
    fn default() -> Self {
        EmptyCellMarker::Text(String::new())
    }
}

impl EmptyCellMarker {
    /// A numeric marker inside `[0, 1]` cannot be told apart from a ratio.
    pub fn may_collide_with_ratios(&self) -> bool {
        match *self {
            EmptyCellMarker::Integer(i) => i == 0 || i == 1,
            EmptyCellMarker::Float(x) => (0.0..=1.0).contains(&x),
            EmptyCellMarker::Text(_) => false,
        }
    }
}

impl FromStr for EmptyCellMarker {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(i) = s.parse::<i64>() {
            Ok(EmptyCellMarker::Integer(i))
        } else if let Ok(x) = s.parse::<f64>() {
            Ok(EmptyCellMarker::Float(x))
        } else {
            Ok(EmptyCellMarker::Text(s.to_string()))
        }
    }
}

impl fmt::Display for EmptyCellMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyCellMarker::Integer(i) => write!(f, "{i}"),
            EmptyCellMarker::Float(x) => write!(f, "{x}"),
            EmptyCellMarker::Text(s) => f.write_str(s),
        }
    }
}

/// Dense per-sample vectors keyed by sample name. Every vector has one cell
/// per coordinate of the run's [`CoordinateIndex`].
pub type SampleVectors = BTreeMap<String, Vec<Cell>>;

/// Place a sample's ratios into the fixed coordinate space.
///
/// The result has one cell per coordinate. A record lands at its coordinate's
/// offset only if its locus is accepted; everything else stays empty.
pub fn extract_sample_vector(
    records: &[RatioRecord],
    accepted: &AcceptanceTree,
    index: &CoordinateIndex,
    group_size: u64,
) -> Vec<Cell> {
    let mut cells = vec![Cell::Empty; index.len()];
    for record in records {
        let key = record.key(group_size);
        if !accepted.is_accepted(&key) {
            continue;
        }
        if let Some(offset) = index.offset_of(&key) {
            cells[offset] = Cell::Ratio(record.ratio);
        }
    }
    cells
}
