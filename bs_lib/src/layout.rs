//!
//! The per-run working directory. Each stage owns a subdirectory, and every
//! asynchronous stage has its own marker directory that remote shards clock
//! out into.

use crate::errors::PipelineError;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prefilter,
    Filter1,
    Count,
    Filter2,
    Assemble,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Prefilter,
        Stage::Filter1,
        Stage::Count,
        Stage::Filter2,
        Stage::Assemble,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Prefilter => "prefilter",
            Stage::Filter1 => "filter1",
            Stage::Count => "count",
            Stage::Filter2 => "filter2",
            Stage::Assemble => "assemble",
        }
    }

    fn marker_dir_name(self) -> &'static str {
        match self {
            Stage::Prefilter => "prefilterClockOut",
            Stage::Filter1 => "filter1ClockOut",
            Stage::Count => "lociClockOut",
            Stage::Filter2 => "filter2ClockOut",
            Stage::Assemble => "finalPartsClockOut",
        }
    }

    /// Name given to the array job for this stage.
    pub fn job_name(self) -> String {
        format!("bs_{}", self.name())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PREFILTER: &str = "prefilter";
const FILTER1: &str = "filter1";
const FILTER2: &str = "filter2";
const LOCI: &str = "loci";
const LOCI_GATHER: &str = "lociGather";
const FINAL_PARTS: &str = "finalParts";
const SCRIPTS: &str = "scripts";
const MANIFESTS: &str = "manifests";

const DATA_SUFFIX: &str = ".data.bin";
const LOCI_SUFFIX: &str = ".loci.bin";
const SCATTER_SUFFIX: &str = ".andFriends.scatter.bin";

/// Root of one run's working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Create `<scratch>/.battlestar<timestamp>`, trying a fresh timestamp
    /// whenever the name is already taken.
    pub fn create_unique(scratch: &Path) -> Result<Self> {
        loop {
            let stamp: String = chrono::Local::now()
                .format("%Y%m%d%H%M%S%f")
                .to_string()
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect();
            let root = scratch.join(format!(".battlestar{stamp}"));
            match fs::create_dir(&root) {
                Ok(()) => {
                    let workdir = WorkDir { root };
                    workdir.create_subdirs()?;
                    return Ok(workdir);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("could not create working directory {}", root.display())
                    })
                }
            }
        }
    }

    /// Create the layout at a caller chosen path that must not exist yet.
    pub fn create_at(root: &Path) -> Result<Self> {
        if root.exists() {
            return Err(PipelineError::InvalidConfig(format!(
                "temporary directory {} already exists, please name one that does not",
                root.display()
            ))
            .into());
        }
        fs::create_dir_all(root)
            .with_context(|| format!("could not create working directory {}", root.display()))?;
        let workdir = WorkDir {
            root: root.to_path_buf(),
        };
        workdir.create_subdirs()?;
        Ok(workdir)
    }

    /// Reuse the working directory of an earlier run. Missing subdirectories
    /// are recreated, existing contents are kept.
    pub fn open_existing(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(PipelineError::InvalidConfig(format!(
                "working directory to resume from does not exist: {}",
                root.display()
            ))
            .into());
        }
        let workdir = WorkDir {
            root: root.to_path_buf(),
        };
        workdir.create_subdirs()?;
        Ok(workdir)
    }

    fn create_subdirs(&self) -> Result<()> {
        let plain = [
            PREFILTER,
            FILTER1,
            FILTER2,
            LOCI,
            LOCI_GATHER,
            FINAL_PARTS,
            SCRIPTS,
            MANIFESTS,
        ];
        let markers = Stage::ALL.map(Stage::marker_dir_name);
        for name in plain.iter().chain(markers.iter()) {
            let dir = self.root.join(name);
            fs::create_dir_all(&dir)
                .with_context(|| format!("could not create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefilter_dir(&self) -> PathBuf {
        self.root.join(PREFILTER)
    }

    pub fn filter1_dir(&self) -> PathBuf {
        self.root.join(FILTER1)
    }

    pub fn filter2_dir(&self) -> PathBuf {
        self.root.join(FILTER2)
    }

    pub fn loci_dir(&self) -> PathBuf {
        self.root.join(LOCI)
    }

    pub fn loci_gather_dir(&self) -> PathBuf {
        self.root.join(LOCI_GATHER)
    }

    pub fn final_parts_dir(&self) -> PathBuf {
        self.root.join(FINAL_PARTS)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(SCRIPTS)
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join(MANIFESTS)
    }

    pub fn marker_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.marker_dir_name())
    }

    /// Where a large input is thinned to while the prefilter is still
    /// writing it.
    pub fn prefilter_partial_path(&self, input: &Path) -> PathBuf {
        self.prefilter_dir()
            .join(format!("{}.prefilter", file_name(input)))
    }

    /// The prefiltered replacement for a large input.
    pub fn prefiltered_path(&self, input: &Path) -> PathBuf {
        self.prefilter_dir()
            .join(format!("{}.prefilter.ratio", file_name(input)))
    }

    /// Filter1 records of one input.
    pub fn data_path(&self, input: &Path) -> PathBuf {
        self.filter1_dir()
            .join(format!("{}{DATA_SUFFIX}", file_name(input)))
    }

    /// Filter1 locus observations of one input.
    pub fn loci_path(&self, input: &Path) -> PathBuf {
        self.loci_dir()
            .join(format!("{}{LOCI_SUFFIX}", file_name(input)))
    }

    pub fn accepted_loci_path(&self) -> PathBuf {
        self.loci_dir().join("acceptedLoci.bin")
    }

    pub fn coordinate_list_path(&self) -> PathBuf {
        self.loci_dir().join("acceptedCoordinateList.bin")
    }

    pub fn coordinate_index_path(&self) -> PathBuf {
        self.loci_dir().join("acceptedCoordinateIndex.bin")
    }

    /// Count tree written by the count shard whose first input is `first`.
    pub fn count_part_path(&self, first: &Path) -> PathBuf {
        self.loci_gather_dir()
            .join(format!("{}{SCATTER_SUFFIX}", file_name(first)))
    }

    /// Sample vectors written by the filter2 shard whose last input is `last`.
    pub fn filter2_output_path(&self, last: &Path) -> PathBuf {
        self.filter2_dir().join(file_name(last))
    }

    /// Merged sample vectors written by the assembly shard whose first input
    /// is `first`.
    pub fn assemble_part_path(&self, first: &Path) -> PathBuf {
        self.final_parts_dir()
            .join(format!("{}{SCATTER_SUFFIX}", file_name(first)))
    }

    /// All filter1 record files, sorted by name.
    pub fn data_files(&self) -> Result<Vec<PathBuf>> {
        list_with_suffix(&self.filter1_dir(), DATA_SUFFIX)
    }

    /// All filter1 loci files, sorted by name. The accepted loci artifacts
    /// in the same directory are not included.
    pub fn loci_files(&self) -> Result<Vec<PathBuf>> {
        list_with_suffix(&self.loci_dir(), LOCI_SUFFIX)
    }

    /// All filter2 outputs, sorted by name.
    pub fn filter2_files(&self) -> Result<Vec<PathBuf>> {
        list_with_suffix(&self.filter2_dir(), "")
    }

    /// Remove the whole tree. One retry, then a warning; a leftover directory
    /// never fails the run.
    pub fn cleanup(self) -> bool {
        for attempt in 1..=2 {
            match fs::remove_dir_all(&self.root) {
                Ok(()) => {
                    debug!("removed working directory {}", self.root.display());
                    return true;
                }
                Err(e) if attempt == 1 => {
                    debug!("first attempt to remove {} failed: {e}", self.root.display());
                }
                Err(e) => {
                    warn!(
                        "could not remove working directory {} ({e}), please remove it manually",
                        self.root.display()
                    );
                }
            }
        }
        false
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Sample name of an input or derived file: its file name up to the first `.`.
pub fn sample_name(path: &Path) -> String {
    let name = file_name(path);
    match name.split_once('.') {
        Some((head, _)) => head.to_string(),
        None => name,
    }
}

/// Regular files in `dir` whose names end with `suffix`, sorted. Artifacts
/// still being written are skipped.
pub fn list_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("could not list {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let name = file_name(&path);
        if path.is_file() && name.ends_with(suffix) && !name.ends_with(".partial") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Remove a directory and everything in it, then recreate it empty.
pub fn flush_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("could not clear {}", dir.display())),
    }
    fs::create_dir_all(dir).with_context(|| format!("could not create {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unique_workdir_layout() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let a = WorkDir::create_unique(scratch.path())?;
        let b = WorkDir::create_unique(scratch.path())?;
        assert_ne!(a.root(), b.root());
        let name = a.root().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".battlestar"));
        for stage in Stage::ALL {
            assert!(a.marker_dir(stage).is_dir());
        }
        assert!(a.loci_gather_dir().is_dir());
        assert!(a.scripts_dir().is_dir());
        assert!(a.cleanup());
        assert!(!scratch.path().join(&name).exists());
        Ok(())
    }

    #[test]
    fn test_explicit_tempdir_must_be_new() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        assert!(WorkDir::create_at(scratch.path()).is_err());
        let fresh = scratch.path().join("run1");
        let workdir = WorkDir::create_at(&fresh)?;
        assert!(workdir.filter2_dir().is_dir());
        assert!(WorkDir::open_existing(&fresh).is_ok());
        assert!(WorkDir::open_existing(&scratch.path().join("nope")).is_err());
        Ok(())
    }

    #[test]
    fn test_artifact_names() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let w = WorkDir::create_at(&scratch.path().join("w"))?;
        let input = Path::new("/data/S01.sorted.ratio");
        assert_eq!(
            w.prefiltered_path(input),
            w.root().join("prefilter/S01.sorted.ratio.prefilter.ratio")
        );
        assert_eq!(
            w.data_path(input),
            w.root().join("filter1/S01.sorted.ratio.data.bin")
        );
        assert_eq!(
            w.count_part_path(&w.loci_path(input)),
            w.root().join("lociGather/S01.sorted.ratio.loci.bin.andFriends.scatter.bin")
        );
        Ok(())
    }

    #[test]
    fn test_sample_name_stops_at_first_dot() {
        assert_eq!(sample_name(Path::new("/x/S01.sorted.ratio.data.bin")), "S01");
        assert_eq!(sample_name(Path::new("plain")), "plain");
    }

    #[test]
    fn test_listing_filters_by_suffix() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let w = WorkDir::create_at(&scratch.path().join("w"))?;
        fs::write(w.loci_dir().join("b.ratio.loci.bin"), b"")?;
        fs::write(w.loci_dir().join("a.ratio.loci.bin"), b"")?;
        fs::write(w.accepted_loci_path(), b"")?;
        let found = w.loci_files()?;
        assert_eq!(
            found,
            vec![
                w.loci_dir().join("a.ratio.loci.bin"),
                w.loci_dir().join("b.ratio.loci.bin")
            ]
        );
        Ok(())
    }

    #[test]
    fn test_flush_dir_removes_stale_markers() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let dir = scratch.path().join("markers");
        fs::create_dir(&dir)?;
        fs::write(dir.join("3"), b"")?;
        flush_dir(&dir)?;
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir)?.count(), 0);
        Ok(())
    }
}
