//!
//! Canonical contig ordering.
//!
//! Integer contigs come first in numeric order, then contigs that only parse
//! as (finite) floating point numbers, then named contigs alphabetically. The
//! mitochondrial contig, named `M` in any case, is always last.

use std::cmp::Ordering;

/// Sort class of a contig name. Variants are declared in output order.
#[derive(Debug, Clone, PartialEq)]
pub enum ContigRank {
    /// Parses as an integer.
    Integer(i64),
    /// Parses as a finite float but not as an integer.
    Float(f64),
    /// Any other name.
    Named(String),
    /// The mitochondrial contig.
    Mitochondrial,
}

impl ContigRank {
    /// Classify a contig name.
    pub fn of(contig: &str) -> Self {
        if let Ok(n) = contig.parse::<i64>() {
            return ContigRank::Integer(n);
        }
        match contig.parse::<f64>() {
            Ok(x) if x.is_finite() => ContigRank::Float(x),
            _ if contig.eq_ignore_ascii_case("M") => ContigRank::Mitochondrial,
            _ => ContigRank::Named(contig.to_string()),
        }
    }

    fn class(&self) -> u8 {
        match self {
            ContigRank::Integer(_) => 0,
            ContigRank::Float(_) => 1,
            ContigRank::Named(_) => 2,
            ContigRank::Mitochondrial => 3,
        }
    }
}

impl Eq for ContigRank {}

impl PartialOrd for ContigRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContigRank {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ContigRank::Integer(a), ContigRank::Integer(b)) => a.cmp(b),
            // Floats are finite by construction.
            (ContigRank::Float(a), ContigRank::Float(b)) => a.total_cmp(b),
            (ContigRank::Named(a), ContigRank::Named(b)) => a.cmp(b),
            _ => self.class().cmp(&other.class()),
        }
    }
}

/// Compare two contig names in canonical order. Names that compare equal by
/// rank (`"1"` and `"01"`) fall back to plain string order so that the sort
/// is total and deterministic.
pub fn compare_contigs(a: &str, b: &str) -> Ordering {
    ContigRank::of(a)
        .cmp(&ContigRank::of(b))
        .then_with(|| a.cmp(b))
}

/// Return the given contig names in canonical order.
pub fn canonical_contig_order<I, S>(contigs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ordered: Vec<(ContigRank, String)> = contigs
        .into_iter()
        .map(Into::into)
        .map(|c| (ContigRank::of(&c), c))
        .collect();
    ordered.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.cmp(b)));
    ordered.dedup_by(|(_, a), (_, b)| a == b);
    ordered.into_iter().map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_numeric_then_named_then_mito() {
        assert_eq!(
            canonical_contig_order(["10", "2", "X", "M"]),
            vec!["2", "10", "X", "M"]
        );
    }

    #[test]
    fn test_floats_follow_integers() {
        assert_eq!(
            canonical_contig_order(["Y", "3.5", "22", "1", "0.5"]),
            vec!["1", "22", "0.5", "3.5", "Y"]
        );
    }

    #[test]
    fn test_mito_last_regardless_of_case() {
        assert_eq!(
            canonical_contig_order(["m", "Z", "X", "1"]),
            vec!["1", "X", "Z", "m"]
        );
        // Other names starting with M sort alphabetically.
        assert_eq!(
            canonical_contig_order(["MT", "A", "M"]),
            vec!["A", "MT", "M"]
        );
    }

    #[test]
    fn test_non_finite_names_are_named() {
        assert_eq!(ContigRank::of("nan"), ContigRank::Named("nan".into()));
        assert_eq!(ContigRank::of("inf"), ContigRank::Named("inf".into()));
        assert_eq!(ContigRank::of("-4"), ContigRank::Integer(-4));
    }

    #[test]
    fn test_compare_is_total() {
        assert_eq!(compare_contigs("1", "01"), Ordering::Greater);
        assert_eq!(compare_contigs("2", "10"), Ordering::Less);
        assert_eq!(compare_contigs("M", "X"), Ordering::Greater);
    }
}
