use std::path::PathBuf;

/// Failures the pipeline reports as distinct outcomes. Anything else travels
/// as a plain `anyhow` error with context.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Nothing to do: {0}")]
    NoWork(String),

    #[error("Could not submit array job {job} to the scheduler: {reason}")]
    Submission { job: String, reason: String },

    #[error("Shard 0 of the {stage} stage failed on this node")]
    LocalShardFailed { stage: String },

    #[error("Expected artifact does not exist: {path:?}")]
    MissingArtifact { path: PathBuf },

    #[error("Artifact exists but could not be read: {path:?}")]
    MalformedArtifact { path: PathBuf },

    #[error(
        "Sample name {name} is produced by more than one input file. Sample names are the \
         input file names up to the first '.', and must be unique."
    )]
    SampleNameCollision { name: String },

    #[error("Timed out waiting for shards {pending:?} of the {stage} stage to clock out")]
    BarrierTimeout { stage: String, pending: Vec<usize> },
}
