//! battlestar
#![deny(missing_docs)]

use anyhow::{Context, Result};
use bs_wrap::{print_error_chain, setup_logging, ClockInArgs, RunArgs, ShardArgs};
use clap::{self, Parser};
use log::info;
use std::process::ExitCode;

/// Scatter-gather filtering of per-sample ratio files on a cluster.
#[derive(Parser, Debug)]
#[clap(name = "battlestar", version)]
enum Battlestar {
    /// Run the pipeline.
    Run(RunArgs),
    /// Run one shard from its manifest.
    #[clap(hide = true)]
    Shard(ShardArgs),
    /// Run this array task's script and clock out on success.
    #[clap(hide = true)]
    ClockIn(ClockInArgs),
}

fn inner_main() -> Result<()> {
    match Battlestar::parse() {
        Battlestar::Run(args) => {
            setup_logging(args.verbose);
            let program = std::env::current_exe().context("Unable to locate the running executable")?;
            let output = bs_lib::run_pipeline(&args.to_config(), program)?;
            info!("output written to {}", output.display());
        }
        Battlestar::Shard(args) => {
            setup_logging(args.verbose);
            bs_wrap::run_shard(&args)?;
        }
        Battlestar::ClockIn(args) => {
            setup_logging(false);
            bs_wrap::clock_in(&args)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
