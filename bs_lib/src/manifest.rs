//!
//! Shard manifests: what one shard was asked to do, written as JSON into the
//! working directory so that a remote task only needs the manifest path.

use crate::layout::{Stage, WorkDir};
use crate::record::RecordFilter;
use crate::stages;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The work items of one shard and the settings it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ShardJob {
    Prefilter {
        inputs: Vec<PathBuf>,
        filter: RecordFilter,
    },
    Filter1 {
        inputs: Vec<PathBuf>,
        filter: RecordFilter,
        group_size: u64,
    },
    Count {
        loci_files: Vec<PathBuf>,
    },
    Filter2 {
        data_files: Vec<PathBuf>,
        group_size: u64,
    },
    Assemble {
        parts: Vec<PathBuf>,
    },
}

impl ShardJob {
    pub fn stage(&self) -> Stage {
        match self {
            ShardJob::Prefilter { .. } => Stage::Prefilter,
            ShardJob::Filter1 { .. } => Stage::Filter1,
            ShardJob::Count { .. } => Stage::Count,
            ShardJob::Filter2 { .. } => Stage::Filter2,
            ShardJob::Assemble { .. } => Stage::Assemble,
        }
    }

    fn items(&self) -> &[PathBuf] {
        match self {
            ShardJob::Prefilter { inputs, .. } | ShardJob::Filter1 { inputs, .. } => inputs,
            ShardJob::Count { loci_files } => loci_files,
            ShardJob::Filter2 { data_files, .. } => data_files,
            ShardJob::Assemble { parts } => parts,
        }
    }

    /// Where a gathering shard writes its result, if the stage has one
    /// output per shard. Prefilter and filter1 write one output per input.
    pub fn output_path(&self, workdir: &WorkDir) -> Option<PathBuf> {
        match self {
            ShardJob::Prefilter { .. } | ShardJob::Filter1 { .. } => None,
            ShardJob::Count { loci_files } => {
                loci_files.first().map(|f| workdir.count_part_path(f))
            }
            ShardJob::Filter2 { data_files, .. } => {
                data_files.last().map(|f| workdir.filter2_output_path(f))
            }
            ShardJob::Assemble { parts } => parts.first().map(|f| workdir.assemble_part_path(f)),
        }
    }

    /// Run the shard against `workdir`.
    pub fn run(&self, workdir: &WorkDir) -> Result<()> {
        ensure!(
            !self.items().is_empty(),
            "{} shard was given no work items",
            self.stage()
        );
        match self {
            ShardJob::Prefilter { inputs, filter } => {
                stages::prefilter::run_shard(workdir, inputs, filter)?;
            }
            ShardJob::Filter1 {
                inputs,
                filter,
                group_size,
            } => {
                stages::filter1::run_shard(workdir, inputs, filter, *group_size)?;
            }
            ShardJob::Count { loci_files } => {
                stages::count::run_shard(loci_files, &self.require_output(workdir)?)?;
            }
            ShardJob::Filter2 {
                data_files,
                group_size,
            } => {
                let output = self.require_output(workdir)?;
                stages::filter2::run_shard(workdir, data_files, *group_size, &output)?;
            }
            ShardJob::Assemble { parts } => {
                stages::assemble::run_shard(parts, &self.require_output(workdir)?)?;
            }
        }
        Ok(())
    }

    fn require_output(&self, workdir: &WorkDir) -> Result<PathBuf> {
        self.output_path(workdir)
            .with_context(|| format!("{} shard has no output path", self.stage()))
    }
}

/// A shard job bound to its run and index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardManifest {
    pub workdir: WorkDir,
    pub shard: usize,
    pub job: ShardJob,
}

impl ShardManifest {
    /// `manifests/<stage>.<shard>.json`
    pub fn path(&self) -> PathBuf {
        self.workdir
            .manifests_dir()
            .join(format!("{}.{}.json", self.job.stage(), self.shard))
    }

    pub fn write(&self) -> Result<PathBuf> {
        let path = self.path();
        let mut writer = BufWriter::new(
            File::create(&path).with_context(|| format!("could not create {}", path.display()))?,
        );
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("could not write {}", path.display()))?;
        writer.flush()?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("could not open shard manifest {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("could not parse shard manifest {}", path.display()))
    }

    pub fn run(&self) -> Result<()> {
        self.job.run(&self.workdir).with_context(|| {
            format!(
                "shard {} of the {} stage failed",
                self.shard,
                self.job.stage()
            )
        })
    }
}
