//! Worker bodies for each stage. Every function here runs inside one shard,
//! either in the orchestrating process (shard 0) or in a remote task.

pub mod assemble;
pub mod count;
pub mod filter1;
pub mod filter2;
pub mod prefilter;

use crate::errors::PipelineError;
use anyhow::Result;
use bs_types::io::read_bin;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read a binary artifact, reporting a missing file or an unreadable one as
/// the matching [`PipelineError`].
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(PipelineError::MissingArtifact {
            path: path.to_path_buf(),
        }
        .into());
    }
    read_bin(path).map_err(|e| {
        e.context(PipelineError::MalformedArtifact {
            path: path.to_path_buf(),
        })
    })
}
