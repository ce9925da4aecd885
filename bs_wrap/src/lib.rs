//! bs_wrap
//!
//! Command line surface of the `battlestar` binary.
#![deny(missing_docs)]

use anyhow::Result;
use bs_lib::{JobMode, PipelineConfig, Resume, Stage};
use bs_types::EmptyCellMarker;
use chrono::Local;
use clap::{value_parser, ArgGroup, Parser};
use env_logger::Builder;
use itertools::Itertools;
use log::LevelFilter;
use std::io::Write;
use std::path::PathBuf;

/// Print an error chain.
pub fn print_error_chain(err: &anyhow::Error) {
    let error_chain = err.chain().join("\n\tCaused by: ");
    eprintln!("ERROR: {error_chain}");
}

/// Log to stderr with a timestamp, at Info or, when verbose, Debug.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    // A second initialisation in the same process is harmless.
    let _ = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .try_init();
}

/// Filter per-sample ratio files and merge them into one sample-by-locus table.
#[derive(Parser, Debug, Clone)]
#[clap(group(ArgGroup::new("resume").multiple(false)))]
pub struct RunArgs {
    /// Directory holding the .ratio input files.
    #[clap(short = 'd', long = "directory", value_name = "PATH", default_value = ".")]
    pub directory: PathBuf,

    /// Minimum effective coverage of a row.
    #[clap(short = 'c', long, value_name = "NUM", default_value_t = 10)]
    pub min_coverage: u64,

    /// Working directory to create for this run. It must not exist yet.
    #[clap(short = 't', long, value_name = "PATH", conflicts_with = "resume")]
    pub tempdir: Option<PathBuf>,

    /// Keep the working directory after a successful run.
    #[clap(long)]
    pub no_cleanup: bool,

    /// Log debug messages.
    #[clap(short = 'v', long)]
    pub verbose: bool,

    /// Only keep rows with one of these contexts, e.g. CG.
    #[clap(short = 's', long, value_name = "CONTEXT", num_args = 1..)]
    pub context_requirement: Vec<String>,

    /// Drop rows with any of these contexts.
    #[clap(short = 'e', long, value_name = "CONTEXT", num_args = 1..)]
    pub context_exclusion: Vec<String>,

    /// Percent of samples that must cover a locus for it to be kept.
    #[clap(
        short = 'r',
        long,
        value_name = "PCT",
        default_value_t = 75,
        value_parser = value_parser!(u8).range(0..=100)
    )]
    pub min_representation: u8,

    /// Maximum number of shards per stage.
    #[clap(
        short = 'p',
        long,
        value_name = "NUM",
        default_value_t = 301,
        value_parser = value_parser!(u64).range(1..)
    )]
    pub max_parallel_jobs: u64,

    /// Where to create the working directory when --tempdir is not given.
    #[clap(long, value_name = "PATH", default_value = ".")]
    pub scratch_folder: PathBuf,

    /// Resume at filter1, reusing this working directory.
    #[clap(long, value_name = "DIR", group = "resume")]
    pub direct_to_filter1: Option<PathBuf>,

    /// Resume at the representation count, reusing this working directory.
    #[clap(long, value_name = "DIR", group = "resume")]
    pub direct_to_count: Option<PathBuf>,

    /// Resume at filter2, reusing this working directory.
    #[clap(long, value_name = "DIR", group = "resume")]
    pub direct_to_filter2: Option<PathBuf>,

    /// Resume at the final assembly, reusing this working directory.
    #[clap(long, value_name = "DIR", group = "resume")]
    pub direct_to_final_build: Option<PathBuf>,

    /// Written in cells without a value.
    #[clap(
        short = 'm',
        long,
        value_name = "TEXT",
        default_value = "",
        allow_hyphen_values = true
    )]
    pub empty_cell_marker: EmptyCellMarker,

    /// Output table.
    #[clap(short = 'o', long, value_name = "PATH", default_value = "output.txt")]
    pub output_file: PathBuf,

    /// Write a binary snapshot of the matrix instead of a text table.
    #[clap(short = 'k', long)]
    pub binary_out: bool,

    /// Memory, in GB, requested for each filter1 task.
    #[clap(
        short = '1',
        long = "filter1-ram",
        value_name = "GB",
        default_value_t = 4,
        value_parser = value_parser!(u32).range(1..=16)
    )]
    pub filter1_ram: u32,

    /// How array jobs are run: sge or local.
    #[clap(long, value_name = "MODE", default_value = "sge")]
    pub job_mode: JobMode,
}

impl RunArgs {
    fn resume(&self) -> Option<Resume> {
        [
            (Stage::Filter1, &self.direct_to_filter1),
            (Stage::Count, &self.direct_to_count),
            (Stage::Filter2, &self.direct_to_filter2),
            (Stage::Assemble, &self.direct_to_final_build),
        ]
        .into_iter()
        .find_map(|(stage, dir)| {
            dir.as_ref().map(|workdir| Resume {
                stage,
                workdir: workdir.clone(),
            })
        })
    }

    /// The run configuration these arguments describe. Not yet validated.
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            input_dir: self.directory.clone(),
            min_coverage: self.min_coverage,
            tempdir: self.tempdir.clone(),
            scratch_folder: self.scratch_folder.clone(),
            no_cleanup: self.no_cleanup,
            context_requirement: self.context_requirement.clone(),
            context_exclusion: self.context_exclusion.clone(),
            min_representation: self.min_representation,
            max_parallel_jobs: usize::try_from(self.max_parallel_jobs).unwrap_or(usize::MAX),
            resume: self.resume(),
            empty_cell_marker: self.empty_cell_marker.clone(),
            output_file: self.output_file.clone(),
            binary_out: self.binary_out,
            filter1_ram_gb: self.filter1_ram,
            job_mode: self.job_mode,
            verbose: self.verbose,
        }
    }
}

/// Run one shard from its manifest. Invoked by generated task scripts.
#[derive(Parser, Debug, Clone)]
pub struct ShardArgs {
    /// Shard manifest written by the orchestrator.
    #[clap(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Log debug messages.
    #[clap(short = 'v', long)]
    pub verbose: bool,
}

/// Run this array task's script and clock out on success. Invoked by the
/// scheduler through the generated wrapper.
#[derive(Parser, Debug, Clone)]
pub struct ClockInArgs {
    /// Working directory of the run.
    #[clap(long, value_name = "DIR")]
    pub workdir: PathBuf,

    /// Directory to clock out into.
    #[clap(long, value_name = "DIR")]
    pub marker_dir: PathBuf,
}

/// Load and run a shard manifest.
pub fn run_shard(args: &ShardArgs) -> Result<()> {
    bs_lib::ShardManifest::load(&args.manifest)?.run()
}

/// Run the wrapper body for the task named by the environment.
pub fn clock_in(args: &ClockInArgs) -> Result<()> {
    let workdir = bs_lib::WorkDir::open_existing(&args.workdir)?;
    let task_id_var = bs_lib::parameters::task_id_env_var()?;
    bs_lib::bridge::clock_in(&workdir, &args.marker_dir, task_id_var)
}
