//!
//! Filter1: the per-sample coverage and context filter. For each input it
//! keeps the accepted ratios and the distinct loci they were observed at.

use crate::layout::WorkDir;
use crate::record::{FilterCounts, RatioReader, RecordFilter};
use anyhow::Result;
use bs_types::io::write_bin;
use bs_types::{LocusObservation, TxHashSet};
use log::info;
use std::path::{Path, PathBuf};

/// Filter one sample and write its data and loci artifacts.
pub fn filter_sample(
    workdir: &WorkDir,
    input: &Path,
    filter: &RecordFilter,
    group_size: u64,
) -> Result<FilterCounts> {
    let mut records = Vec::new();
    let mut loci = Vec::new();
    let mut seen = TxHashSet::default();
    let counts = RatioReader::open(input)?.for_each_accepted(filter, |_, row| {
        records.push(row.to_record());
        let key = row.key(group_size);
        if seen.insert(key.clone()) {
            loci.push(LocusObservation::from(key));
        }
        Ok(())
    })?;
    write_bin(&workdir.data_path(input), &records)?;
    write_bin(&workdir.loci_path(input), &loci)?;
    info!(
        "filtered {}: {counts}, {} distinct loci",
        input.display(),
        loci.len()
    );
    Ok(counts)
}

pub fn run_shard(
    workdir: &WorkDir,
    inputs: &[PathBuf],
    filter: &RecordFilter,
    group_size: u64,
) -> Result<FilterCounts> {
    let mut total = FilterCounts::default();
    for input in inputs {
        total.add(filter_sample(workdir, input, filter, group_size)?);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bs_types::io::read_bin;
    use bs_types::{RatioRecord, DEFAULT_GROUP_SIZE};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filter_sample_writes_both_artifacts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workdir = WorkDir::create_at(&dir.path().join("w"))?;
        let input = dir.path().join("S2.ratio");
        std::fs::write(
            &input,
            "CHR\tPOS\tRATIO\tEFF_CT_COUNT\tC_COUNT\tCT_COUNT\tREV_G_COUNT\tREV_GA_COUNT\tCONTEXT\n\
             chr2\t1500000\t1.7\t11\t1\t11\t0\t0\tCG\n\
             chr2\t1500000\t0.2\t11\t1\t11\t0\t0\tCG\n\
             chrM\t12\t0.25\t50\t1\t50\t0\t0\tCG\n\
             chrM\t13\tbad\t50\t1\t50\t0\t0\tCG\n",
        )?;
        let counts = filter_sample(&workdir, &input, &RecordFilter::new(10, &[], &[]), DEFAULT_GROUP_SIZE)?;
        assert_eq!(counts.accepted, 3);
        assert_eq!(counts.malformed, 1);

        let records: Vec<RatioRecord> = read_bin(&workdir.data_path(&input))?;
        assert_eq!(
            records,
            vec![
                RatioRecord::new("2", 1_500_000, 1.0),
                RatioRecord::new("2", 1_500_000, 0.2),
                RatioRecord::new("M", 12, 0.25),
            ]
        );
        let loci: Vec<LocusObservation> = read_bin(&workdir.loci_path(&input))?;
        assert_eq!(
            loci,
            vec![
                LocusObservation {
                    contig: "2".into(),
                    position: 1_500_000,
                    group: 1
                },
                LocusObservation {
                    contig: "M".into(),
                    position: 12,
                    group: 0
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unusable_rows_and_empty_files_do_not_fail() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let workdir = WorkDir::create_at(&dir.path().join("w"))?;
        let empty = dir.path().join("E.ratio");
        std::fs::write(&empty, b"")?;
        let garbled = dir.path().join("U.ratio");
        let mut bytes = b"chr\tpos\tratio\teff_ct_count\tc_count\tct_count\trev_g_count\trev_ga_count\tcontext\n".to_vec();
        bytes.extend_from_slice(b"chr1\t5\t0.5\t30\t1\t30\t0\t0\tCG\n");
        bytes.extend_from_slice(b"chr1\t6\t0.5\t30\t1\t30\t0\t0\tC\xffG\n");
        bytes.extend_from_slice(b"chr1\t7\t0.5\t30\t1\t30\t0\t0\tCG\n");
        std::fs::write(&garbled, bytes)?;

        let filter = RecordFilter::new(10, &[], &[]);
        let counts = run_shard(&workdir, &[empty.clone(), garbled.clone()], &filter, DEFAULT_GROUP_SIZE)?;
        assert_eq!(counts.accepted, 2);
        assert_eq!(counts.malformed, 1);

        let records: Vec<RatioRecord> = read_bin(&workdir.data_path(&empty))?;
        assert!(records.is_empty());
        let loci: Vec<LocusObservation> = read_bin(&workdir.loci_path(&empty))?;
        assert!(loci.is_empty());
        let records: Vec<RatioRecord> = read_bin(&workdir.data_path(&garbled))?;
        assert_eq!(
            records,
            vec![RatioRecord::new("1", 5, 0.5), RatioRecord::new("1", 7, 0.5)]
        );
        Ok(())
    }
}
