//!
//! Thin very large inputs before filter1 so that filter1 can hold a whole
//! sample in memory. The output is an ordinary `.ratio` file holding only the
//! header and the accepted rows.

use crate::layout::WorkDir;
use crate::record::{FilterCounts, RatioReader, RecordFilter};
use anyhow::{Context, Result};
use log::info;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// True when a file of `size_bytes` is too large to hand to a filter1 task
/// with `filter1_ram_gb` of memory.
pub fn needs_prefilter(size_bytes: u64, filter1_ram_gb: u32, divisor: u64) -> bool {
    size_bytes > u64::from(filter1_ram_gb) * 1_000_000_000 / divisor.max(1)
}

/// Prefilter one input into the prefilter directory. The finished file
/// appears under [`WorkDir::prefiltered_path`] only once it is complete.
pub fn prefilter_file(workdir: &WorkDir, input: &Path, filter: &RecordFilter) -> Result<FilterCounts> {
    let partial = workdir.prefilter_partial_path(input);
    let mut out = BufWriter::new(
        File::create(&partial)
            .with_context(|| format!("could not create {}", partial.display()))?,
    );
    let reader = RatioReader::open(input)?;
    if !reader.header_line().is_empty() {
        writeln!(out, "{}", reader.header_line())?;
    }
    let counts = reader.for_each_accepted(filter, |raw, _| {
        writeln!(out, "{raw}")?;
        Ok(())
    })?;
    out.flush()
        .with_context(|| format!("could not write {}", partial.display()))?;
    drop(out);

    let done = workdir.prefiltered_path(input);
    fs::rename(&partial, &done)
        .with_context(|| format!("could not move {} into place", done.display()))?;
    info!("prefiltered {}: {counts}", input.display());
    Ok(counts)
}

pub fn run_shard(workdir: &WorkDir, inputs: &[PathBuf], filter: &RecordFilter) -> Result<FilterCounts> {
    let mut total = FilterCounts::default();
    for input in inputs {
        total.add(prefilter_file(workdir, input, filter)?);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_threshold_scales_with_ram() {
        // 4 GB of RAM and a divisor of 10 allow 400 MB.
        assert!(!needs_prefilter(400_000_000, 4, 10));
        assert!(needs_prefilter(400_000_001, 4, 10));
        assert!(!needs_prefilter(1_000_000_000, 16, 10));
    }

    #[test]
    fn test_prefilter_keeps_header_and_accepted_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workdir = WorkDir::create_at(&dir.path().join("w"))?;
        let input = dir.path().join("S1.ratio");
        let header = "chr\tpos\tratio\teff_ct_count\tc_count\tct_count\trev_g_count\trev_ga_count\tcontext";
        fs::write(
            &input,
            format!(
                "{header}\n\
                 chr1\t5\t0.5\t30\t1\t30\t0\t0\tCG\n\
                 chr1\t6\t0.5\t3\t1\t3\t0\t0\tCG\n\
                 chr1\t7\t0.5\t30\t1\t30\t0\t0\tCHH\n"
            ),
        )?;
        let filter = RecordFilter::new(10, &["CG".to_string()], &[]);
        let counts = run_shard(&workdir, &[input.clone()], &filter)?;
        assert_eq!(counts.accepted, 1);
        assert_eq!(counts.rows, 3);

        let out = fs::read_to_string(workdir.prefiltered_path(&input))?;
        assert_eq!(out, format!("{header}\nchr1\t5\t0.5\t30\t1\t30\t0\t0\tCG\n"));
        assert!(!workdir.prefilter_partial_path(&input).exists());
        Ok(())
    }
}
