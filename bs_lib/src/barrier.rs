//!
//! The completion barrier for one dispatch round.
//!
//! Remote shards `1..K` report success by leaving a zero-byte file named by
//! their index in the stage's marker directory. Shard 0 runs on this node and
//! is counted as done from the start. A shard that fails never writes its
//! marker, so the barrier cannot tell it apart from one that is still running;
//! [`WaitPolicy`] decides how long to keep waiting.

use crate::errors::PipelineError;
use crate::layout::Stage;
use itertools::Itertools;
use log::{debug, info};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// How long to wait for markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Block until every marker exists, however long that takes.
    #[default]
    Forever,
    /// Give up with [`PipelineError::BarrierTimeout`] after this long.
    Timeout(Duration),
}

impl WaitPolicy {
    pub fn from_secs(timeout: Option<u64>) -> Self {
        match timeout {
            Some(secs) => WaitPolicy::Timeout(Duration::from_secs(secs)),
            None => WaitPolicy::Forever,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Waiting { observed: usize, expected: usize },
    Complete,
}

#[derive(Debug)]
pub struct Barrier {
    stage: Stage,
    marker_dir: PathBuf,
    expected: usize,
    pending: BTreeSet<usize>,
}

impl Barrier {
    /// A barrier over `num_shards` shards whose remote members clock out in
    /// `marker_dir`.
    pub fn new(stage: Stage, marker_dir: &Path, num_shards: usize) -> Self {
        Barrier {
            stage,
            marker_dir: marker_dir.to_path_buf(),
            expected: num_shards,
            pending: (1..num_shards).collect(),
        }
    }

    pub fn marker_path(&self, shard: usize) -> PathBuf {
        self.marker_dir.join(shard.to_string())
    }

    pub fn state(&self) -> BarrierState {
        if self.pending.is_empty() {
            BarrierState::Complete
        } else {
            BarrierState::Waiting {
                observed: self.expected - self.pending.len(),
                expected: self.expected,
            }
        }
    }

    /// Shards whose markers have not appeared yet.
    pub fn pending(&self) -> Vec<usize> {
        self.pending.iter().copied().collect()
    }

    /// Scan for the markers that are still missing.
    pub fn poll(&mut self) -> BarrierState {
        let dir = &self.marker_dir;
        self.pending
            .retain(|&shard| !dir.join(shard.to_string()).is_file());
        self.state()
    }

    /// Poll every `interval` until all markers exist or the policy gives up.
    pub fn wait(mut self, interval: Duration, policy: WaitPolicy) -> Result<(), PipelineError> {
        let start = Instant::now();
        let mut last_observed = None;
        loop {
            match self.poll() {
                BarrierState::Complete => {
                    info!(
                        "{}: all {} shards clocked out after {:.0?}",
                        self.stage,
                        self.expected,
                        start.elapsed()
                    );
                    return Ok(());
                }
                BarrierState::Waiting { observed, expected } => {
                    if last_observed != Some(observed) {
                        info!("{}: {observed} of {expected} shards complete", self.stage);
                        last_observed = Some(observed);
                    }
                }
            }
            if let WaitPolicy::Timeout(limit) = policy {
                if start.elapsed() >= limit {
                    return Err(PipelineError::BarrierTimeout {
                        stage: self.stage.to_string(),
                        pending: self.pending(),
                    });
                }
            }
            debug!(
                "{}: waiting on shards {}",
                self.stage,
                self.pending.iter().join(", ")
            );
            sleep(interval);
        }
    }
}
