//!
//! The external scheduler bridge.
//!
//! A dispatch round turns `K` shard jobs into one shard run right here and
//! `K - 1` tasks of a single array job. Task `i` runs the generated script
//! `scripts/<i>.sh` through the clock-in wrapper, which leaves the marker the
//! [`Barrier`] waits for only if the script exits with status 0.

use crate::barrier::{Barrier, WaitPolicy};
use crate::errors::PipelineError;
use crate::layout::{flush_dir, Stage, WorkDir};
use crate::manifest::{ShardJob, ShardManifest};
use anyhow::{bail, ensure, Context, Result};
use log::{debug, info, warn};
use shell_escape::escape;
use std::borrow::Cow;
use std::cell::RefCell;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

const WRAPPER: &str = "wrapper.sh";

/// One array job: tasks `1..=task_count` of a stage, each running `wrapper`.
#[derive(Debug)]
pub struct ArrayJob<'a> {
    pub stage: Stage,
    pub wrapper: &'a Path,
    pub task_count: usize,
    pub memory_gb: u32,
}

impl ArrayJob<'_> {
    /// Name the scheduler shows for the job.
    pub fn name(&self) -> String {
        self.stage.job_name()
    }
}

/// Hands an array job to something that will eventually run its tasks.
pub trait ArrayJobSubmitter {
    /// Return once the job is accepted, not once it is done.
    fn submit(&self, job: &ArrayJob<'_>) -> Result<()>;
}

/// Submit through `qsub` or anything that accepts the same flags.
#[derive(Debug, Clone)]
pub struct SgeSubmitter {
    pub program: String,
    pub output_dir: PathBuf,
    pub time_limit: String,
}

impl SgeSubmitter {
    pub fn from_parameters() -> Result<Self> {
        Ok(SgeSubmitter {
            program: crate::parameters::submit_program()?.to_string(),
            output_dir: PathBuf::from(crate::parameters::scheduler_output_dir()?.as_ref()),
            time_limit: crate::parameters::time_limit()?.to_string(),
        })
    }

    pub fn command(&self, job: &ArrayJob<'_>) -> Command {
        let mut out_dir = self.output_dir.as_os_str().to_owned();
        out_dir.push("/");
        let mut cmd = Command::new(&self.program);
        cmd.arg("-cwd")
            .arg("-V")
            .arg("-N")
            .arg(job.name())
            .arg("-l")
            .arg(format!("h_data={}G,time={}", job.memory_gb, self.time_limit))
            .arg("-e")
            .arg(&out_dir)
            .arg("-o")
            .arg(&out_dir)
            .arg("-t")
            .arg(format!("1-{}", job.task_count))
            .arg(job.wrapper);
        cmd
    }
}

impl ArrayJobSubmitter for SgeSubmitter {
    fn submit(&self, job: &ArrayJob<'_>) -> Result<()> {
        let failed = |reason: String| PipelineError::Submission {
            job: job.name(),
            reason,
        };
        fs::create_dir_all(&self.output_dir).map_err(|e| {
            failed(format!(
                "could not create scheduler output directory {}: {e}",
                self.output_dir.display()
            ))
        })?;
        let mut cmd = self.command(job);
        debug!("submitting {cmd:?}");
        let output = cmd
            .output()
            .map_err(|e| failed(format!("could not run {}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        info!(
            "submitted {} tasks as {}: {}",
            job.task_count,
            job.name(),
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }
}

/// Run every task as a child process of this host, for machines without a
/// cluster scheduler. Task output goes to the scheduler output directory, one
/// file per task. Tasks are not waited on; the barrier tracks them through
/// their markers, and exited tasks are collected at the next submission.
#[derive(Debug)]
pub struct LocalSubmitter {
    pub task_id_var: String,
    pub output_dir: PathBuf,
    running: RefCell<Vec<(String, Child)>>,
}

impl LocalSubmitter {
    pub fn new(task_id_var: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        LocalSubmitter {
            task_id_var: task_id_var.into(),
            output_dir: output_dir.into(),
            running: RefCell::default(),
        }
    }

    pub fn from_parameters() -> Result<Self> {
        Ok(LocalSubmitter::new(
            crate::parameters::task_id_env_var()?.to_string(),
            PathBuf::from(crate::parameters::scheduler_output_dir()?.as_ref()),
        ))
    }

    /// Collect the tasks that have exited, warning about the ones that failed.
    /// Returns how many are still running.
    pub fn reap(&self) -> usize {
        let mut running = self.running.borrow_mut();
        running.retain_mut(|(task, child)| match child.try_wait() {
            Ok(Some(status)) if status.success() => false,
            Ok(Some(status)) => {
                warn!("{task} exited with {status}");
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("could not check on {task}: {e}");
                false
            }
        });
        running.len()
    }
}

impl ArrayJobSubmitter for LocalSubmitter {
    fn submit(&self, job: &ArrayJob<'_>) -> Result<()> {
        self.reap();
        let name = job.name();
        let failed = |reason: String| PipelineError::Submission {
            job: name.clone(),
            reason,
        };
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| failed(format!("{}: {e}", self.output_dir.display())))?;
        for task in 1..=job.task_count {
            let log_path = self.output_dir.join(format!("{name}.{task}.log"));
            let log = File::create(&log_path)
                .map_err(|e| failed(format!("{}: {e}", log_path.display())))?;
            let err_log = log
                .try_clone()
                .map_err(|e| failed(format!("{}: {e}", log_path.display())))?;
            let child = Command::new("bash")
                .arg(job.wrapper)
                .env(&self.task_id_var, task.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::from(log))
                .stderr(Stdio::from(err_log))
                .spawn()
                .map_err(|e| failed(format!("could not start task {task}: {e}")))?;
            self.running
                .borrow_mut()
                .push((format!("{name} task {task}"), child));
        }
        info!("started {} local tasks for {name}", job.task_count);
        Ok(())
    }
}

impl Drop for LocalSubmitter {
    fn drop(&mut self) {
        let running = self.reap();
        if running > 0 {
            debug!("leaving {running} local tasks running");
        }
    }
}

fn quote(path: &Path) -> Cow<'_, str> {
    escape(path.to_string_lossy())
}

/// Text of the script that runs one shard.
pub fn task_script(program: &Path, manifest: &Path, verbose: bool) -> String {
    let verbose = if verbose { " --verbose" } else { "" };
    format!(
        "#!/usr/bin/env bash\nexec {} shard{verbose} {}\n",
        quote(program),
        quote(manifest)
    )
}

/// Text of the wrapper every array task runs.
pub fn wrapper_script(program: &Path, workdir: &WorkDir, marker_dir: &Path) -> String {
    format!(
        "#!/usr/bin/env bash\nexec {} clock-in --workdir {} --marker-dir {}\n",
        quote(program),
        quote(workdir.root()),
        quote(marker_dir)
    )
}

/// Timing of the completion barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierSettings {
    pub poll_interval: Duration,
    pub policy: WaitPolicy,
}

impl Default for BarrierSettings {
    fn default() -> Self {
        BarrierSettings {
            poll_interval: Duration::from_secs(1),
            policy: WaitPolicy::Forever,
        }
    }
}

impl BarrierSettings {
    pub fn from_parameters() -> Result<Self> {
        Ok(BarrierSettings {
            poll_interval: Duration::from_secs(*crate::parameters::poll_interval_secs()?),
            policy: WaitPolicy::from_secs(*crate::parameters::barrier_timeout_secs()?),
        })
    }
}

/// Runs dispatch rounds for one working directory.
pub struct Dispatcher {
    workdir: WorkDir,
    program: PathBuf,
    submitter: Box<dyn ArrayJobSubmitter>,
    barrier: BarrierSettings,
    verbose: bool,
}

impl Dispatcher {
    /// `program` is the executable that remote tasks invoke, normally this one.
    pub fn new(
        workdir: WorkDir,
        program: PathBuf,
        submitter: Box<dyn ArrayJobSubmitter>,
        barrier: BarrierSettings,
        verbose: bool,
    ) -> Self {
        Dispatcher {
            workdir,
            program,
            submitter,
            barrier,
            verbose,
        }
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    /// Run one round: submit shards `1..K` as an array job, run shard 0 here,
    /// then block until every remote shard has clocked out.
    pub fn dispatch(&self, jobs: Vec<ShardJob>, memory_gb: u32) -> Result<()> {
        let Some(stage) = jobs.first().map(ShardJob::stage) else {
            return Err(PipelineError::NoWork("dispatch round without shards".to_string()).into());
        };
        ensure!(
            jobs.iter().all(|job| job.stage() == stage),
            "a dispatch round may only hold shards of one stage"
        );
        let num_shards = jobs.len();
        let marker_dir = self.workdir.marker_dir(stage);
        flush_dir(&marker_dir)?;
        flush_dir(&self.workdir.scripts_dir())?;

        let manifests: Vec<ShardManifest> = jobs
            .into_iter()
            .enumerate()
            .map(|(shard, job)| ShardManifest {
                workdir: self.workdir.clone(),
                shard,
                job,
            })
            .collect();
        let manifest_paths = manifests
            .iter()
            .map(ShardManifest::write)
            .collect::<Result<Vec<_>>>()?;

        if num_shards > 1 {
            let wrapper = self.write_scripts(stage, &marker_dir, &manifest_paths[1..])?;
            self.submitter.submit(&ArrayJob {
                stage,
                wrapper: &wrapper,
                task_count: num_shards - 1,
                memory_gb,
            })?;
        }

        info!("{stage}: running shard 0 of {num_shards} on this node");
        manifests[0]
            .run()
            .map_err(|e| e.context(PipelineError::LocalShardFailed { stage: stage.to_string() }))?;

        Barrier::new(stage, &marker_dir, num_shards)
            .wait(self.barrier.poll_interval, self.barrier.policy)?;
        Ok(())
    }

    /// Write `scripts/<i>.sh` for every remote shard and the wrapper that
    /// array tasks run. Returns the wrapper path.
    fn write_scripts(&self, stage: Stage, marker_dir: &Path, remote: &[PathBuf]) -> Result<PathBuf> {
        let scripts = self.workdir.scripts_dir();
        for (i, manifest) in remote.iter().enumerate() {
            let path = scripts.join(format!("{}.sh", i + 1));
            fs::write(&path, task_script(&self.program, manifest, self.verbose))
                .with_context(|| format!("could not write {}", path.display()))?;
        }
        let wrapper = scripts.join(WRAPPER);
        fs::write(&wrapper, wrapper_script(&self.program, &self.workdir, marker_dir))
            .with_context(|| format!("could not write {}", wrapper.display()))?;
        debug!("{stage}: wrote {} task scripts", remote.len());
        Ok(wrapper)
    }
}

fn parse_task_id(var: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(task) if task >= 1 => Ok(task),
        _ => bail!("{var} holds {raw:?}, expected an array task index of at least 1"),
    }
}

/// Body of the per-task wrapper: find this task's index in the environment,
/// run its script and clock out only if the script succeeded.
pub fn clock_in(workdir: &WorkDir, marker_dir: &Path, task_id_var: &str) -> Result<()> {
    let raw = std::env::var(task_id_var)
        .with_context(|| format!("{task_id_var} is not set, clock-in must run as an array task"))?;
    let task = parse_task_id(task_id_var, &raw)?;
    let script = workdir.scripts_dir().join(format!("{task}.sh"));
    ensure!(
        script.is_file(),
        "no script for task {task} at {}",
        script.display()
    );
    let status = Command::new("bash")
        .arg(&script)
        .status()
        .with_context(|| format!("running {}", script.display()))?;
    if !status.success() {
        bail!("task {task} exited with {status}, not clocking out");
    }
    let marker = marker_dir.join(task.to_string());
    File::create(&marker).with_context(|| format!("could not clock out at {}", marker.display()))?;
    info!("task {task} clocked out");
    Ok(())
}
