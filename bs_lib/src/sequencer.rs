//!
//! Runs the pipeline stages in order: prefilter, filter1, representation
//! count, filter2 and final assembly. A resumed run starts at a later stage
//! and reuses the working directory of an earlier run, after checking that
//! the artifacts the stage reads are present and readable.
//!

use crate::bridge::{
    ArrayJobSubmitter, BarrierSettings, Dispatcher, LocalSubmitter, SgeSubmitter,
};
use crate::config::{discover_inputs, JobMode, PipelineConfig, StageTuning};
use crate::errors::PipelineError;
use crate::layout::{flush_dir, Stage, WorkDir};
use crate::manifest::ShardJob;
use crate::planner::{contiguous, round_robin, scatter_degree, size_descending};
use crate::record::RecordFilter;
use crate::stages::{assemble, count, filter2, prefilter, read_artifact};
use crate::table::Matrix;
use anyhow::{Context, Result};
use bs_types::{AcceptanceTree, CoordinateIndex};
use log::{info, warn};
use std::path::PathBuf;

/// Build the submitter for a job mode from `parameters.toml`.
pub fn submitter_for(mode: JobMode) -> Result<Box<dyn ArrayJobSubmitter>> {
    Ok(match mode {
        JobMode::Sge => Box::new(SgeSubmitter::from_parameters()?),
        JobMode::Local => Box::new(LocalSubmitter::from_parameters()?),
    })
}

/// Validate `config` and run the whole pipeline, re-invoking `program` for
/// remote shards. Returns the path of the written output.
pub fn run_pipeline(config: &PipelineConfig, program: PathBuf) -> Result<PathBuf> {
    execute(
        config,
        &StageTuning::from_parameters()?,
        BarrierSettings::from_parameters()?,
        submitter_for(config.job_mode)?,
        program,
    )
}

/// Run the pipeline with explicit tuning and submitter.
pub fn execute(
    config: &PipelineConfig,
    tuning: &StageTuning,
    barrier: BarrierSettings,
    submitter: Box<dyn ArrayJobSubmitter>,
    program: PathBuf,
) -> Result<PathBuf> {
    config.validate()?;
    let workdir = prepare_workdir(config)?;
    info!("working directory: {}", workdir.root().display());
    let sequencer = Sequencer {
        config,
        tuning,
        filter: config.record_filter(),
        dispatcher: Dispatcher::new(workdir.clone(), program, submitter, barrier, config.verbose),
    };
    match sequencer.run() {
        Ok(output) => {
            if config.no_cleanup {
                info!("keeping working directory {}", workdir.root().display());
            } else {
                workdir.cleanup();
            }
            Ok(output)
        }
        Err(e) => {
            warn!(
                "working directory {} is left in place for inspection or a resumed run",
                workdir.root().display()
            );
            Err(e)
        }
    }
}

/// Open the resumed working directory, or create a fresh one.
pub fn prepare_workdir(config: &PipelineConfig) -> Result<WorkDir> {
    if let Some(resume) = &config.resume {
        let workdir = WorkDir::open_existing(&resume.workdir)?;
        check_resume_artifacts(&workdir, resume.stage)?;
        return Ok(workdir);
    }
    match &config.tempdir {
        Some(tempdir) => WorkDir::create_at(tempdir),
        None => WorkDir::create_unique(&config.scratch_folder),
    }
}

fn require_listing(files: Vec<PathBuf>, dir: PathBuf) -> Result<Vec<PathBuf>> {
    if files.is_empty() {
        return Err(PipelineError::MissingArtifact { path: dir }.into());
    }
    for file in &files {
        let len = file
            .metadata()
            .with_context(|| format!("could not stat {}", file.display()))?
            .len();
        if len == 0 {
            return Err(PipelineError::MalformedArtifact { path: file.clone() }.into());
        }
    }
    Ok(files)
}

/// Check that everything a run resumed at `stage` will read already exists.
/// The acceptance tree and the coordinate index are fully loaded; the bulk
/// per-sample files must exist and be non-empty.
pub fn check_resume_artifacts(workdir: &WorkDir, stage: Stage) -> Result<()> {
    match stage {
        // Prefiltered inputs are checked when filter1 is planned.
        Stage::Prefilter | Stage::Filter1 => {}
        Stage::Count => {
            require_listing(workdir.loci_files()?, workdir.loci_dir())?;
            require_listing(workdir.data_files()?, workdir.filter1_dir())?;
        }
        Stage::Filter2 => {
            read_artifact::<AcceptanceTree>(&workdir.accepted_loci_path())?;
            filter2::load_index(workdir)?;
            require_listing(workdir.data_files()?, workdir.filter1_dir())?;
        }
        Stage::Assemble => {
            filter2::load_index(workdir)?;
            require_listing(workdir.filter2_files()?, workdir.filter2_dir())?;
        }
    }
    info!("artifacts needed to resume at {stage} are in place");
    Ok(())
}

struct Sequencer<'a> {
    config: &'a PipelineConfig,
    tuning: &'a StageTuning,
    filter: RecordFilter,
    dispatcher: Dispatcher,
}

impl Sequencer<'_> {
    fn workdir(&self) -> &WorkDir {
        self.dispatcher.workdir()
    }

    fn max_jobs(&self) -> usize {
        self.config.max_parallel_jobs
    }

    fn run(&self) -> Result<PathBuf> {
        let inputs = if self.config.runs(Stage::Filter1) {
            discover_inputs(&self.config.input_dir)?
        } else {
            Vec::new()
        };
        if self.config.runs(Stage::Prefilter) {
            self.prefilter(&inputs)?;
        }
        if self.config.runs(Stage::Filter1) {
            self.filter1(inputs)?;
        }
        let index = if self.config.runs(Stage::Count) {
            Some(self.count()?)
        } else {
            None
        };
        if self.config.runs(Stage::Filter2) {
            self.filter2()?;
        }
        let index = match index {
            Some(index) => index,
            None => filter2::load_index(self.workdir())?,
        };
        self.assemble(&index)
    }

    fn needs_prefilter(&self, size: u64) -> bool {
        prefilter::needs_prefilter(
            size,
            self.config.filter1_ram_gb,
            self.tuning.prefilter_size_divisor,
        )
    }

    fn prefilter(&self, inputs: &[(PathBuf, u64)]) -> Result<()> {
        let large: Vec<PathBuf> = inputs
            .iter()
            .filter(|&&(_, size)| self.needs_prefilter(size))
            .map(|(path, _)| path.clone())
            .collect();
        if large.is_empty() {
            info!("prefilter: no input is too large for filter1");
            return Ok(());
        }
        info!("prefilter: thinning {} large inputs", large.len());
        let jobs = round_robin(large, self.max_jobs())
            .into_shards()
            .into_iter()
            .map(|inputs| ShardJob::Prefilter {
                inputs,
                filter: self.filter.clone(),
            })
            .collect();
        self.dispatcher.dispatch(jobs, self.tuning.prefilter_mem_gb)
    }

    /// Large inputs are read from their prefiltered copies.
    fn filter1(&self, inputs: Vec<(PathBuf, u64)>) -> Result<()> {
        let mut planned = Vec::with_capacity(inputs.len());
        for (path, size) in inputs {
            if self.needs_prefilter(size) {
                let thinned = self.workdir().prefiltered_path(&path);
                if !thinned.is_file() {
                    return Err(PipelineError::MissingArtifact { path: thinned }.into());
                }
                planned.push((thinned, size));
            } else {
                planned.push((path, size));
            }
        }
        // A sample's artifacts are named by the file filter1 read, which
        // changes with the prefilter threshold; clear those of any earlier plan.
        flush_dir(&self.workdir().filter1_dir())?;
        flush_dir(&self.workdir().loci_dir())?;
        info!("filter1: filtering {} samples", planned.len());
        let jobs = size_descending(planned, self.max_jobs())
            .into_shards()
            .into_iter()
            .map(|inputs| ShardJob::Filter1 {
                inputs,
                filter: self.filter.clone(),
                group_size: self.tuning.group_size,
            })
            .collect();
        self.dispatcher.dispatch(jobs, self.config.filter1_ram_gb)
    }

    fn count(&self) -> Result<CoordinateIndex> {
        let workdir = self.workdir();
        let loci_files = workdir.loci_files()?;
        if loci_files.is_empty() {
            return Err(PipelineError::NoWork(format!(
                "no loci files in {}",
                workdir.loci_dir().display()
            ))
            .into());
        }
        let num_samples = loci_files.len();
        let degree = scatter_degree(
            num_samples,
            self.tuning.count_scatter_min_files,
            self.tuning.count_files_per_shard,
            self.max_jobs(),
        );
        let counts = match degree {
            None => {
                info!("count: counting {num_samples} loci files on this node");
                count::count_loci_files(&loci_files)?
            }
            Some(k) => {
                info!("count: scattering {num_samples} loci files over {k} shards");
                let jobs: Vec<ShardJob> = round_robin(loci_files, k)
                    .into_shards()
                    .into_iter()
                    .map(|loci_files| ShardJob::Count { loci_files })
                    .collect();
                let parts = output_paths(&jobs, workdir);
                self.dispatcher.dispatch(jobs, self.tuning.count_mem_gb)?;
                count::gather(&parts)?
            }
        };
        let (_, index) = count::accept_and_index(
            workdir,
            &counts,
            num_samples,
            self.config.min_representation,
        )?;
        if index.is_empty() {
            warn!("no locus is represented in enough samples, the output will have no rows");
        }
        Ok(index)
    }

    fn filter2(&self) -> Result<()> {
        // Outputs are named by shard; clear those of any earlier plan.
        flush_dir(&self.workdir().filter2_dir())?;
        let data_files = self.workdir().data_files()?;
        info!("filter2: extracting {} samples", data_files.len());
        let jobs = round_robin(data_files, self.max_jobs())
            .into_shards()
            .into_iter()
            .map(|data_files| ShardJob::Filter2 {
                data_files,
                group_size: self.tuning.group_size,
            })
            .collect();
        self.dispatcher.dispatch(jobs, self.tuning.filter2_mem_gb)
    }

    fn assemble(&self, index: &CoordinateIndex) -> Result<PathBuf> {
        let workdir = self.workdir();
        let files = workdir.filter2_files()?;
        let degree = scatter_degree(
            files.len(),
            self.tuning.assemble_scatter_min_files,
            self.tuning.assemble_files_per_shard,
            self.max_jobs(),
        );
        let merged = match degree {
            None => {
                info!("assemble: merging {} files on this node", files.len());
                assemble::merge_files(&files)?
            }
            Some(k) => {
                info!("assemble: merging {} files in {k} parts", files.len());
                let jobs: Vec<ShardJob> = contiguous(files, k)
                    .into_shards()
                    .into_iter()
                    .map(|parts| ShardJob::Assemble { parts })
                    .collect();
                let parts = output_paths(&jobs, workdir);
                self.dispatcher.dispatch(jobs, self.tuning.assemble_mem_gb)?;
                assemble::merge_files(&parts)?
            }
        };
        let matrix = Matrix::assemble(index, merged)?;
        write_output(self.config, &matrix)
    }
}

fn output_paths(jobs: &[ShardJob], workdir: &WorkDir) -> Vec<PathBuf> {
    jobs.iter()
        .filter_map(|job| job.output_path(workdir))
        .collect()
}

fn write_output(config: &PipelineConfig, matrix: &Matrix) -> Result<PathBuf> {
    let path = config.output_path();
    if config.binary_out {
        matrix.write_snapshot(&path)?;
    } else {
        matrix.write_table(&path, &config.empty_cell_marker)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::WaitPolicy;
    use crate::bridge::tests::InlineSubmitter;
    use crate::config::Resume;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    const HEADER: &str =
        "chr\tpos\tratio\teff_ct_count\tc_count\tct_count\trev_g_count\trev_ga_count\tcontext";

    fn write_sample(dir: &Path, name: &str, rows: &[(&str, u64, f64, u64)]) -> Result<()> {
        let mut text = format!("{HEADER}\n");
        for &(chr, pos, ratio, cov) in rows {
            text.push_str(&format!("{chr}\t{pos}\t{ratio}\t{cov}\t3\t4\t0\t0\tCG\n"));
        }
        // One malformed row per file; it must be skipped, never fatal.
        text.push_str("chr1\tnot_a_position\t0.5\t20\t1\t1\t0\t0\tCG\n");
        fs::write(dir.join(format!("{name}.ratio")), text)?;
        Ok(())
    }

    struct Fixture {
        _root: tempfile::TempDir,
        inputs: PathBuf,
        scratch: PathBuf,
    }

    fn fixture() -> Result<Fixture> {
        let root = tempfile::tempdir()?;
        let inputs = root.path().join("inputs");
        let scratch = root.path().join("scratch");
        fs::create_dir(&inputs)?;
        fs::create_dir(&scratch)?;
        write_sample(
            &inputs,
            "a",
            &[
                ("chr1", 100, 0.5, 20),
                ("chr1", 200, 0.25, 20),
                ("chrX", 5, 1.0, 20),
            ],
        )?;
        write_sample(&inputs, "b", &[("chr1", 100, 0.1, 20), ("chr2", 7, 0.3, 20)])?;
        write_sample(
            &inputs,
            "c",
            &[
                ("chr1", 100, 0.9, 20),
                ("chr1", 200, 0.4, 20),
                ("chr2", 7, 0.2, 20),
                // Too little coverage, so X:5 is seen by one sample only.
                ("chrX", 5, 0.7, 2),
            ],
        )?;
        Ok(Fixture {
            _root: root,
            inputs,
            scratch,
        })
    }

    const EXPECTED: &str = "\ta\tb\tc\n\
                            1:100\t0.5\t0.1\t0.9\n\
                            1:200\t0.25\tNA\t0.4\n\
                            2:7\tNA\t0.3\t0.2\n";

    fn config(f: &Fixture, max_parallel_jobs: usize) -> PipelineConfig {
        PipelineConfig {
            input_dir: f.inputs.clone(),
            scratch_folder: f.scratch.clone(),
            min_representation: 60,
            max_parallel_jobs,
            empty_cell_marker: "NA".parse().unwrap(),
            output_file: f.scratch.join("output.txt"),
            ..PipelineConfig::default()
        }
    }

    fn barrier() -> BarrierSettings {
        BarrierSettings {
            poll_interval: Duration::from_millis(5),
            policy: WaitPolicy::Timeout(Duration::from_secs(10)),
        }
    }

    fn run(config: &PipelineConfig, tuning: &StageTuning) -> Result<PathBuf> {
        execute(
            config,
            tuning,
            barrier(),
            Box::<InlineSubmitter>::default(),
            PathBuf::from("battlestar"),
        )
    }

    fn scattering() -> StageTuning {
        StageTuning {
            // Every input counts as large.
            prefilter_size_divisor: 10_000_000_000,
            count_scatter_min_files: 2,
            count_files_per_shard: 1,
            assemble_scatter_min_files: 2,
            assemble_files_per_shard: 1,
            ..StageTuning::default()
        }
    }

    #[test]
    fn test_single_node_run() -> Result<()> {
        let f = fixture()?;
        let output = run(&config(&f, 1), &StageTuning::default())?;
        assert_eq!(fs::read_to_string(output)?, EXPECTED);
        // The working directory is removed after a successful run.
        let leftovers = fs::read_dir(&f.scratch)?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".battlestar"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn test_scattered_run_matches_single_node() -> Result<()> {
        let f = fixture()?;
        let output = run(&config(&f, 3), &scattering())?;
        assert_eq!(fs::read_to_string(output)?, EXPECTED);
        Ok(())
    }

    #[test]
    fn test_binary_output() -> Result<()> {
        let f = fixture()?;
        let cfg = PipelineConfig {
            binary_out: true,
            ..config(&f, 2)
        };
        let output = run(&cfg, &StageTuning::default())?;
        assert_eq!(output, f.scratch.join("output.bin"));
        let matrix: Matrix = bs_types::io::read_bin(&output)?;
        assert_eq!(matrix.row_labels, ["1:100", "1:200", "2:7"]);
        assert_eq!(matrix.column_labels, ["a", "b", "c"]);
        Ok(())
    }

    #[test]
    fn test_resume_at_filter2_and_assembly() -> Result<()> {
        let f = fixture()?;
        let workdir = f.scratch.join("kept");
        let first = PipelineConfig {
            tempdir: Some(workdir.clone()),
            no_cleanup: true,
            ..config(&f, 2)
        };
        run(&first, &scattering())?;
        assert!(workdir.is_dir());

        for stage in [Stage::Filter1, Stage::Count, Stage::Filter2, Stage::Assemble] {
            let resumed = PipelineConfig {
                resume: Some(Resume {
                    stage,
                    workdir: workdir.clone(),
                }),
                no_cleanup: true,
                output_file: f.scratch.join(format!("{stage}.txt")),
                ..config(&f, 2)
            };
            let output = run(&resumed, &scattering())?;
            assert_eq!(fs::read_to_string(output)?, EXPECTED, "resumed at {stage}");
        }
        Ok(())
    }

    #[test]
    fn test_resume_at_filter1_with_other_prefilter_threshold() -> Result<()> {
        let f = fixture()?;
        let workdir = f.scratch.join("kept");
        let first = PipelineConfig {
            tempdir: Some(workdir.clone()),
            no_cleanup: true,
            ..config(&f, 2)
        };
        // Every input is prefiltered, so filter1 reads the thinned copies.
        run(&first, &scattering())?;

        let resumed = PipelineConfig {
            resume: Some(Resume {
                stage: Stage::Filter1,
                workdir: workdir.clone(),
            }),
            no_cleanup: true,
            output_file: f.scratch.join("again.txt"),
            ..config(&f, 2)
        };
        let output = run(&resumed, &StageTuning::default())?;
        assert_eq!(fs::read_to_string(output)?, EXPECTED);
        assert_eq!(WorkDir::open_existing(&workdir)?.loci_files()?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_empty_input_gives_an_empty_column() -> Result<()> {
        let f = fixture()?;
        fs::write(f.inputs.join("d.ratio"), "")?;
        let cfg = PipelineConfig {
            // Two of four samples, as two of three before.
            min_representation: 50,
            ..config(&f, 2)
        };
        let output = run(&cfg, &scattering())?;
        assert_eq!(
            fs::read_to_string(output)?,
            "\ta\tb\tc\td\n\
             1:100\t0.5\t0.1\t0.9\tNA\n\
             1:200\t0.25\tNA\t0.4\tNA\n\
             2:7\tNA\t0.3\t0.2\tNA\n"
        );
        Ok(())
    }

    #[test]
    fn test_resume_without_artifacts_fails_before_dispatch() -> Result<()> {
        let f = fixture()?;
        let empty = f.scratch.join("empty");
        fs::create_dir(&empty)?;
        for stage in [Stage::Count, Stage::Filter2, Stage::Assemble] {
            let cfg = PipelineConfig {
                resume: Some(Resume {
                    stage,
                    workdir: empty.clone(),
                }),
                ..config(&f, 1)
            };
            let err = run(&cfg, &StageTuning::default()).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<PipelineError>(),
                    Some(PipelineError::MissingArtifact { .. })
                ),
                "resume at {stage}: {err:#}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_resume_at_filter1_needs_prefiltered_inputs() -> Result<()> {
        let f = fixture()?;
        let workdir = f.scratch.join("w");
        WorkDir::create_at(&workdir)?;
        let cfg = PipelineConfig {
            resume: Some(Resume {
                stage: Stage::Filter1,
                workdir,
            }),
            ..config(&f, 1)
        };
        let err = run(&cfg, &scattering()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingArtifact { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_duplicate_sample_names_are_fatal() -> Result<()> {
        let f = fixture()?;
        // Same sample name as a.ratio.
        fs::copy(f.inputs.join("a.ratio"), f.inputs.join("a.rep2.ratio"))?;
        let cfg = config(&f, 1);
        let err = run(&cfg, &StageTuning::default()).unwrap_err();
        assert!(err.chain().any(|e| matches!(
            e.downcast_ref::<PipelineError>(),
            Some(PipelineError::SampleNameCollision { .. })
        )));
        assert!(!cfg.output_path().exists());
        Ok(())
    }

    #[test]
    fn test_no_inputs_is_a_configuration_error() -> Result<()> {
        let f = fixture()?;
        let cfg = PipelineConfig {
            input_dir: f.scratch.clone(),
            ..config(&f, 1)
        };
        let err = run(&cfg, &StageTuning::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfig(_))
        ));
        Ok(())
    }
}
