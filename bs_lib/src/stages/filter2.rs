//!
//! Filter2: place every sample's accepted ratios into the shared coordinate
//! space. All shards load the same acceptance tree and coordinate index, so
//! their vectors line up without any join at assembly time.

use super::assemble::insert_sample;
use super::read_artifact;
use crate::errors::PipelineError;
use crate::layout::{sample_name, WorkDir};
use anyhow::Result;
use bs_types::io::write_bin;
use bs_types::records::extract_sample_vector;
use bs_types::{AcceptanceTree, CoordinateIndex, RatioRecord, SampleVectors};
use log::info;
use std::path::{Path, PathBuf};

/// Load the coordinate index pair written by the count stage.
pub fn load_index(workdir: &WorkDir) -> Result<CoordinateIndex> {
    let list = workdir.coordinate_list_path();
    let index = workdir.coordinate_index_path();
    for path in [&list, &index] {
        if !path.is_file() {
            return Err(PipelineError::MissingArtifact { path: path.clone() }.into());
        }
    }
    CoordinateIndex::load(&list, &index)
        .map_err(|e| e.context(PipelineError::MalformedArtifact { path: index }))
}

/// Extract the vectors of one shard's samples and persist them.
pub fn run_shard(
    workdir: &WorkDir,
    data_files: &[PathBuf],
    group_size: u64,
    output: &Path,
) -> Result<()> {
    let accepted: AcceptanceTree = read_artifact(&workdir.accepted_loci_path())?;
    let index = load_index(workdir)?;

    let mut vectors = SampleVectors::new();
    for file in data_files {
        let records: Vec<RatioRecord> = read_artifact(file)?;
        let cells = extract_sample_vector(&records, &accepted, &index, group_size);
        let placed = cells.iter().filter(|c| c.is_ratio()).count();
        let name = sample_name(file);
        info!(
            "{name}: {placed} of {} loci were adequately represented in other samples",
            records.len()
        );
        insert_sample(&mut vectors, name, cells)?;
    }
    write_bin(output, &vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::count::accept_and_index;
    use bs_types::{Cell, CountTree, LocusKey, DEFAULT_GROUP_SIZE};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vectors_share_coordinate_space() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workdir = WorkDir::create_at(&dir.path().join("w"))?;
        let counts = CountTree::from_observations(
            [("1", 100), ("1", 100), ("1", 200), ("1", 200), ("2", 50), ("2", 50), ("3", 1)]
                .iter()
                .map(|&(c, p)| LocusKey::with_default_group(c, p)),
        );
        let (_, index) = accept_and_index(&workdir, &counts, 2, 100)?;
        assert_eq!(index.len(), 3);

        let s1 = workdir.data_path(Path::new("S1.ratio"));
        let s2 = workdir.data_path(Path::new("S2.ratio"));
        write_bin(
            &s1,
            &vec![RatioRecord::new("1", 200, 0.25), RatioRecord::new("2", 50, 0.75)],
        )?;
        write_bin(
            &s2,
            &vec![RatioRecord::new("1", 100, 0.1), RatioRecord::new("3", 1, 0.9)],
        )?;
        let output = workdir.filter2_output_path(&s2);
        run_shard(&workdir, &[s1, s2], DEFAULT_GROUP_SIZE, &output)?;

        let vectors: SampleVectors = read_artifact(&output)?;
        assert_eq!(
            vectors["S1"],
            vec![Cell::Empty, Cell::Ratio(0.25), Cell::Ratio(0.75)]
        );
        assert_eq!(vectors["S2"], vec![Cell::Ratio(0.1), Cell::Empty, Cell::Empty]);
        Ok(())
    }

    #[test]
    fn test_missing_index_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workdir = WorkDir::create_at(&dir.path().join("w"))?;
        let err = load_index(&workdir).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingArtifact { path }) if path.ends_with("acceptedCoordinateList.bin")
        ));
        Ok(())
    }
}
