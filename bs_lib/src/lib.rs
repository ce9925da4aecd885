//! bs_lib
//!
//! Scatter-gather orchestration for the sample-by-locus pipeline: shard
//! planning, dispatch of shards as scheduler array jobs, the marker file
//! barrier, the per-stage worker bodies and the stage sequencer that ties
//! them together.

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]

pub mod barrier;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod layout;
pub mod manifest;
pub mod parameters;
pub mod planner;
pub mod record;
pub mod sequencer;
pub mod stages;
pub mod table;

pub use crate::barrier::WaitPolicy;
pub use crate::config::{JobMode, PipelineConfig, Resume};
pub use crate::errors::PipelineError;
pub use crate::layout::{Stage, WorkDir};
pub use crate::manifest::ShardManifest;
pub use crate::sequencer::run_pipeline;
