//!
//! Representation count: how many samples observed each locus, the
//! acceptance tree derived from it and the coordinate index over the
//! accepted loci.

use super::read_artifact;
use crate::layout::WorkDir;
use anyhow::Result;
use bs_types::io::write_bin;
use bs_types::locus::representation_threshold;
use bs_types::{AcceptanceTree, CoordinateIndex, CountTree, LocusObservation, Merge};
use log::info;
use std::path::{Path, PathBuf};

/// Count the observations in a set of filter1 loci files.
pub fn count_loci_files(files: &[PathBuf]) -> Result<CountTree> {
    let mut counts = CountTree::new();
    for file in files {
        let observations: Vec<LocusObservation> = read_artifact(file)?;
        for observation in observations {
            counts.observe(observation.key());
        }
    }
    Ok(counts)
}

/// Count one shard's loci files and persist the partial tree.
pub fn run_shard(files: &[PathBuf], output: &Path) -> Result<()> {
    let counts = count_loci_files(files)?;
    write_bin(output, &counts)?;
    info!(
        "counted {} loci files into {} loci",
        files.len(),
        counts.len()
    );
    Ok(())
}

/// Merge partial count trees written by count shards.
pub fn gather(parts: &[PathBuf]) -> Result<CountTree> {
    let trees = parts
        .iter()
        .map(|part| read_artifact::<CountTree>(part))
        .collect::<Result<Vec<_>>>()?;
    Ok(CountTree::from_chunks(trees))
}

/// Apply the representation threshold and persist the acceptance tree and
/// the coordinate index built from it.
pub fn accept_and_index(
    workdir: &WorkDir,
    counts: &CountTree,
    num_samples: usize,
    min_representation_pct: u8,
) -> Result<(AcceptanceTree, CoordinateIndex)> {
    let threshold = representation_threshold(num_samples, min_representation_pct);
    let accepted = counts.threshold(threshold);
    info!(
        "{} of {} loci seen in at least {threshold} of {num_samples} samples",
        accepted.len(),
        counts.len()
    );
    write_bin(&workdir.accepted_loci_path(), &accepted)?;

    let index = CoordinateIndex::from_accepted(&accepted);
    index.write(
        &workdir.coordinate_list_path(),
        &workdir.coordinate_index_path(),
    )?;
    Ok((accepted, index))
}
