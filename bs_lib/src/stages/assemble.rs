//!
//! Final assembly: fold per-shard sample vectors into one map, refusing to
//! let two inputs claim the same sample name.

use super::read_artifact;
use crate::errors::PipelineError;
use anyhow::Result;
use bs_types::io::write_bin;
use bs_types::{Cell, SampleVectors};
use log::info;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

/// Add one sample's vector. A name that is already present is an error.
pub fn insert_sample(
    vectors: &mut SampleVectors,
    name: String,
    cells: Vec<Cell>,
) -> Result<(), PipelineError> {
    match vectors.entry(name) {
        Entry::Occupied(e) => Err(PipelineError::SampleNameCollision {
            name: e.key().clone(),
        }),
        Entry::Vacant(e) => {
            e.insert(cells);
            Ok(())
        }
    }
}

/// Move every sample of `other` into `acc`.
pub fn merge_into(acc: &mut SampleVectors, other: SampleVectors) -> Result<(), PipelineError> {
    for (name, cells) in other {
        insert_sample(acc, name, cells)?;
    }
    Ok(())
}

/// Merge sample vector files in order.
pub fn merge_files(paths: &[PathBuf]) -> Result<SampleVectors> {
    let mut merged = SampleVectors::new();
    for path in paths {
        let part: SampleVectors = read_artifact(path)?;
        merge_into(&mut merged, part)?;
    }
    Ok(merged)
}

/// Merge one contiguous slice of filter2 outputs and persist the result.
pub fn run_shard(parts: &[PathBuf], output: &Path) -> Result<()> {
    let merged = merge_files(parts)?;
    write_bin(output, &merged)?;
    info!("merged {} files holding {} samples", parts.len(), merged.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors(names: &[&str]) -> SampleVectors {
        names
            .iter()
            .map(|n| (n.to_string(), vec![Cell::Ratio(0.5), Cell::Empty]))
            .collect()
    }

    #[test]
    fn test_collision_is_fatal() {
        let mut acc = vectors(&["a", "b"]);
        assert!(merge_into(&mut acc, vectors(&["c"])).is_ok());
        let err = merge_into(&mut acc, vectors(&["d", "b"])).unwrap_err();
        assert!(matches!(err, PipelineError::SampleNameCollision { name } if name == "b"));
    }

    #[test]
    fn test_scattered_merge() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.data.bin");
        let b = dir.path().join("b.data.bin");
        write_bin(&a, &vectors(&["s1", "s3"]))?;
        write_bin(&b, &vectors(&["s2"]))?;
        let out = dir.path().join("a.data.bin.andFriends.scatter.bin");
        run_shard(&[a, b.clone()], &out)?;
        let merged: SampleVectors = read_artifact(&out)?;
        assert_eq!(merged.keys().collect::<Vec<_>>(), ["s1", "s2", "s3"]);

        let err = merge_files(&[out, b]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SampleNameCollision { .. })
        ));
        Ok(())
    }
}
