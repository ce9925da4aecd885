//!
//! The validated configuration of one pipeline run.
//!

use crate::errors::PipelineError;
use crate::layout::{list_with_suffix, Stage};
use crate::record::RecordFilter;
use anyhow::{Context, Result};
use bs_types::EmptyCellMarker;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const INPUT_SUFFIX: &str = ".ratio";
const TEXT_EXTENSION: &str = ".txt";
const BINARY_EXTENSION: &str = ".bin";

/// How array jobs reach the machines that run them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Submit through an SGE compatible `qsub`.
    #[default]
    Sge,
    /// Start every task as a child process of this host.
    Local,
}

impl FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sge" => Ok(JobMode::Sge),
            "local" => Ok(JobMode::Local),
            _ => Err(format!("unknown job mode {s:?}, expected sge or local")),
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobMode::Sge => "sge",
            JobMode::Local => "local",
        })
    }
}

/// Skip every stage before `stage` and reuse the working directory of an
/// earlier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resume {
    pub stage: Stage,
    pub workdir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub min_coverage: u64,
    pub tempdir: Option<PathBuf>,
    pub scratch_folder: PathBuf,
    pub no_cleanup: bool,
    pub context_requirement: Vec<String>,
    pub context_exclusion: Vec<String>,
    /// Percent of samples that must observe a locus for it to be kept.
    pub min_representation: u8,
    pub max_parallel_jobs: usize,
    pub resume: Option<Resume>,
    pub empty_cell_marker: EmptyCellMarker,
    pub output_file: PathBuf,
    pub binary_out: bool,
    pub filter1_ram_gb: u32,
    pub job_mode: JobMode,
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_dir: PathBuf::from("."),
            min_coverage: 10,
            tempdir: None,
            scratch_folder: PathBuf::from("."),
            no_cleanup: false,
            context_requirement: Vec::new(),
            context_exclusion: Vec::new(),
            min_representation: 75,
            max_parallel_jobs: 301,
            resume: None,
            empty_cell_marker: EmptyCellMarker::default(),
            output_file: PathBuf::from("output.txt"),
            binary_out: false,
            filter1_ram_gb: 4,
            job_mode: JobMode::Sge,
            verbose: false,
        }
    }
}

fn invalid(msg: String) -> PipelineError {
    PipelineError::InvalidConfig(msg)
}

impl PipelineConfig {
    /// Reject configurations that cannot run. Nothing is created on disk.
    /// Suspicious but usable settings are logged as warnings.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.input_dir.is_dir() {
            return Err(invalid(format!(
                "input directory {} does not exist",
                self.input_dir.display()
            )));
        }
        if self.min_representation > 100 {
            return Err(invalid(format!(
                "minimum representation is a percentage, got {}",
                self.min_representation
            )));
        }
        if !(1..=16).contains(&self.filter1_ram_gb) {
            return Err(invalid(format!(
                "filter1 RAM must be between 1 and 16 GB, got {}",
                self.filter1_ram_gb
            )));
        }
        if self.max_parallel_jobs == 0 {
            return Err(invalid("at least one parallel job is required".to_string()));
        }

        let filter = self.record_filter();
        if let Some(both) = filter.contradictory_context() {
            return Err(invalid(format!(
                "context {both} is both required and excluded"
            )));
        }

        match (&self.tempdir, &self.resume) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "a resumed run reuses its earlier working directory, --tempdir cannot be combined with --direct-to-*"
                        .to_string(),
                ))
            }
            (Some(tempdir), None) if tempdir.exists() => {
                return Err(invalid(format!(
                    "temporary directory {} already exists, please name one that does not",
                    tempdir.display()
                )))
            }
            (None, Some(resume)) if !resume.workdir.is_dir() => {
                return Err(invalid(format!(
                    "working directory to resume from does not exist: {}",
                    resume.workdir.display()
                )))
            }
            (None, None) if !self.scratch_folder.is_dir() => {
                return Err(invalid(format!(
                    "scratch folder {} does not exist",
                    self.scratch_folder.display()
                )))
            }
            _ => {}
        }
        if let Some(Resume { stage: Stage::Prefilter, .. }) = self.resume {
            return Err(invalid("a run cannot resume at the prefilter".to_string()));
        }

        if self.empty_cell_marker.may_collide_with_ratios() {
            warn!(
                "empty cell marker {} lies within [0, 1] and cannot be told apart from a ratio",
                self.empty_cell_marker
            );
        }
        let output = self.output_path();
        if output.exists() {
            warn!("{} already exists and will be overwritten", output.display());
        }
        Ok(())
    }

    pub fn record_filter(&self) -> RecordFilter {
        RecordFilter::new(
            self.min_coverage,
            &self.context_requirement,
            &self.context_exclusion,
        )
    }

    /// Whether `stage` runs in this invocation.
    pub fn runs(&self, stage: Stage) -> bool {
        match &self.resume {
            None => true,
            Some(resume) => stage >= resume.stage,
        }
    }

    /// The output file, with `.txt` swapped for `.bin` when writing a
    /// binary snapshot.
    pub fn output_path(&self) -> PathBuf {
        if !self.binary_out {
            return self.output_file.clone();
        }
        let name = self.output_file.to_string_lossy();
        match name.strip_suffix(TEXT_EXTENSION) {
            Some(stem) => PathBuf::from(format!("{stem}{BINARY_EXTENSION}")),
            None => self.output_file.clone(),
        }
    }
}

/// Sizing knobs for scattering and scheduler requests, normally read from
/// `parameters.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTuning {
    pub group_size: u64,
    pub prefilter_size_divisor: u64,
    pub count_scatter_min_files: usize,
    pub count_files_per_shard: usize,
    pub assemble_scatter_min_files: usize,
    pub assemble_files_per_shard: usize,
    pub prefilter_mem_gb: u32,
    pub count_mem_gb: u32,
    pub filter2_mem_gb: u32,
    pub assemble_mem_gb: u32,
}

impl Default for StageTuning {
    fn default() -> Self {
        StageTuning {
            group_size: bs_types::DEFAULT_GROUP_SIZE,
            prefilter_size_divisor: 10,
            count_scatter_min_files: 40,
            count_files_per_shard: 10,
            assemble_scatter_min_files: 20,
            assemble_files_per_shard: 5,
            prefilter_mem_gb: 1,
            count_mem_gb: 4,
            filter2_mem_gb: 4,
            assemble_mem_gb: 4,
        }
    }
}

impl StageTuning {
    pub fn from_parameters() -> Result<Self> {
        use crate::parameters as p;
        Ok(StageTuning {
            group_size: *p::locus_group_size()?,
            prefilter_size_divisor: *p::prefilter_size_divisor()?,
            count_scatter_min_files: *p::count_scatter_min_files()?,
            count_files_per_shard: *p::count_files_per_shard()?,
            assemble_scatter_min_files: *p::assemble_scatter_min_files()?,
            assemble_files_per_shard: *p::assemble_files_per_shard()?,
            prefilter_mem_gb: *p::prefilter_mem_gb()?,
            count_mem_gb: *p::count_mem_gb()?,
            filter2_mem_gb: *p::filter2_mem_gb()?,
            assemble_mem_gb: *p::assemble_mem_gb()?,
        })
    }
}

/// The `.ratio` inputs of `dir` with their sizes in bytes, sorted by path.
pub fn discover_inputs(dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
    let files = list_with_suffix(dir, INPUT_SUFFIX)?;
    if files.is_empty() {
        return Err(invalid(format!(
            "no {INPUT_SUFFIX} files found in {}",
            dir.display()
        ))
        .into());
    }
    files
        .into_iter()
        .map(|path| {
            let size = path
                .metadata()
                .with_context(|| format!("could not stat {}", path.display()))?
                .len();
            if size == 0 {
                warn!("{} is empty; its sample will have no values", path.display());
            }
            Ok((path, size))
        })
        .collect()
}
