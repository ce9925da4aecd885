//! Cluster and tuning knobs read from an optional `parameters.toml` placed
//! next to the executable. Every shard process reads the same file, so a
//! site can retune memory requests or the scheduler without rebuilding.

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct Parameters {
    /// Program that accepts SGE style array job submissions.
    submit_program: Cow<'static, str>,
    /// Where the scheduler writes task stdout and stderr.
    scheduler_output_dir: Cow<'static, str>,
    /// Wall clock limit requested for every array task.
    time_limit: Cow<'static, str>,
    /// Environment variable holding the array task index.
    task_id_env_var: Cow<'static, str>,
    /// Memory, in GB, requested per prefilter task.
    prefilter_mem_gb: u32,
    /// Memory, in GB, requested per representation count task.
    count_mem_gb: u32,
    /// Memory, in GB, requested per filter2 task.
    filter2_mem_gb: u32,
    /// Memory, in GB, requested per final assembly task.
    assemble_mem_gb: u32,
    /// Seconds between scans of a marker directory.
    poll_interval_secs: u64,
    /// Give up on a dispatch round after this many seconds. Unset waits forever.
    barrier_timeout_secs: Option<u64>,
    /// Width in bases of a locus group.
    locus_group_size: u64,
    /// Count in process below this many loci files.
    count_scatter_min_files: usize,
    /// Loci files handled by one count shard when scattering.
    count_files_per_shard: usize,
    /// Assemble in process below this many filter2 outputs.
    assemble_scatter_min_files: usize,
    /// Filter2 outputs merged by one assembly shard when scattering.
    assemble_files_per_shard: usize,
    /// Inputs larger than filter1 RAM divided by this are prefiltered.
    prefilter_size_divisor: u64,
}

const DEFAULT_PARAMETERS: Parameters = Parameters {
    submit_program: Cow::Borrowed("qsub"),
    scheduler_output_dir: Cow::Borrowed("schedulerOutput"),
    time_limit: Cow::Borrowed("23:59:00"),
    task_id_env_var: Cow::Borrowed("SGE_TASK_ID"),
    prefilter_mem_gb: 1,
    count_mem_gb: 4,
    filter2_mem_gb: 4,
    assemble_mem_gb: 4,
    poll_interval_secs: 1,
    barrier_timeout_secs: None,
    locus_group_size: 1_000_000,
    count_scatter_min_files: 40,
    count_files_per_shard: 10,
    assemble_scatter_min_files: 20,
    assemble_files_per_shard: 5,
    prefilter_size_divisor: 10,
};

impl Default for Parameters {
    fn default() -> Self {
        DEFAULT_PARAMETERS
    }
}

static PARAMETERS: OnceLock<Result<Parameters>> = OnceLock::new();

/// Return a reference to the global parameters.
/// The parameters may need to be loaded; if loading fails, return Err.
fn parameters() -> &'static Result<Parameters> {
    PARAMETERS.get_or_init(|| {
        let path = std::env::current_exe()
            .context("Unable to locate the running executable")?
            .with_file_name("parameters.toml");
        if !path.exists() {
            warn!(
                "could not find parameters.toml at {}, falling back to defaults",
                path.display()
            );
            Ok(DEFAULT_PARAMETERS)
        } else {
            let s = std::fs::read_to_string(&path).with_context(|| path.display().to_string())?;
            Ok(toml::from_str(&s).with_context(|| path.display().to_string())?)
        }
    })
}

macro_rules! parameter_getter {
    ($a:ident, $t:ty) => {
        pub fn $a() -> Result<&'static $t> {
            let val = match parameters() {
                Err(e) => return Err(anyhow!("{e:#}")),
                Ok(p) => &p.$a,
            };
            if DEFAULT_PARAMETERS.$a != *val {
                warn!("using non-default {} = {:?}", stringify!($a), val);
            }
            Ok(val)
        }
    };
}

parameter_getter!(submit_program, Cow<'static, str>);
parameter_getter!(scheduler_output_dir, Cow<'static, str>);
parameter_getter!(time_limit, Cow<'static, str>);
parameter_getter!(task_id_env_var, Cow<'static, str>);
parameter_getter!(prefilter_mem_gb, u32);
parameter_getter!(count_mem_gb, u32);
parameter_getter!(filter2_mem_gb, u32);
parameter_getter!(assemble_mem_gb, u32);
parameter_getter!(poll_interval_secs, u64);
parameter_getter!(barrier_timeout_secs, Option<u64>);
parameter_getter!(locus_group_size, u64);
parameter_getter!(count_scatter_min_files, usize);
parameter_getter!(count_files_per_shard, usize);
parameter_getter!(assemble_scatter_min_files, usize);
parameter_getter!(assemble_files_per_shard, usize);
parameter_getter!(prefilter_size_divisor, u64);
