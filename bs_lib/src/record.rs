//!
//! The per-record filter applied to tab-delimited `.ratio` input rows.
//!
//! A row is accepted when its effective coverage meets the minimum and its
//! sequence context passes the requirement and exclusion lists. Rows that do
//! not parse are rejected and counted; they never stop a shard.

use anyhow::{Context, Result};
use bs_types::{LocusKey, RatioRecord};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const DELIMITER: char = '\t';

const CHR: &str = "chr";
const POS: &str = "pos";
const RATIO: &str = "ratio";
const EFF_CT_COUNT: &str = "eff_ct_count";
const C_COUNT: &str = "c_count";
const CT_COUNT: &str = "ct_count";
const REV_G_COUNT: &str = "rev_g_count";
const REV_GA_COUNT: &str = "rev_ga_count";
const CONTEXT: &str = "context";

/// Count columns that must hold integers for a row to be well formed.
const COUNT_COLUMNS: [&str; 4] = [C_COUNT, CT_COUNT, REV_G_COUNT, REV_GA_COUNT];

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("header line is empty")]
    EmptyHeader,

    #[error("row is not valid UTF-8")]
    NotUtf8,

    #[error("header has no column named {0}")]
    MissingColumn(&'static str),

    #[error("row has {found} fields but column {column} is field {needed}")]
    ShortRow {
        column: &'static str,
        needed: usize,
        found: usize,
    },

    #[error("column {column} holds {value:?}, expected an integer")]
    BadInteger { column: &'static str, value: String },

    #[error("column {column} holds {value:?}, expected a number")]
    BadNumber { column: &'static str, value: String },
}

/// Column positions resolved from a header row. Names match case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    chr: usize,
    pos: usize,
    ratio: usize,
    eff_ct_count: usize,
    counts: [usize; 4],
    context: usize,
}

impl Header {
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(RecordError::EmptyHeader);
        }
        let names: Vec<String> = line
            .split(DELIMITER)
            .map(|name| name.trim().to_ascii_lowercase())
            .collect();
        // A repeated column name resolves to its last occurrence.
        let find = |wanted: &'static str| {
            names
                .iter()
                .rposition(|name| name == wanted)
                .ok_or(RecordError::MissingColumn(wanted))
        };
        Ok(Header {
            chr: find(CHR)?,
            pos: find(POS)?,
            ratio: find(RATIO)?,
            eff_ct_count: find(EFF_CT_COUNT)?,
            counts: [
                find(C_COUNT)?,
                find(CT_COUNT)?,
                find(REV_G_COUNT)?,
                find(REV_GA_COUNT)?,
            ],
            context: find(CONTEXT)?,
        })
    }

    /// Parse the fields the filter needs out of one data row.
    pub fn parse_row<'a>(&self, line: &'a str) -> Result<Row<'a>, RecordError> {
        let fields: Vec<&str> = line.trim().split(DELIMITER).collect();
        let field = |column: &'static str, i: usize| {
            fields.get(i).copied().ok_or(RecordError::ShortRow {
                column,
                needed: i,
                found: fields.len(),
            })
        };
        for (&column, &i) in COUNT_COLUMNS.iter().zip(self.counts.iter()) {
            parse_integer(column, field(column, i)?)?;
        }
        let ratio_field = field(RATIO, self.ratio)?;
        let ratio: f64 = ratio_field
            .trim()
            .parse()
            .ok()
            .filter(|r: &f64| !r.is_nan())
            .ok_or_else(|| RecordError::BadNumber {
                column: RATIO,
                value: ratio_field.to_string(),
            })?;
        Ok(Row {
            contig: strip_chr(field(CHR, self.chr)?.trim()),
            position: parse_integer(POS, field(POS, self.pos)?)?,
            ratio,
            eff_ct_count: parse_integer(EFF_CT_COUNT, field(EFF_CT_COUNT, self.eff_ct_count)?)?,
            context: field(CONTEXT, self.context)?.trim(),
        })
    }
}

/// The parsed fields of one data row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<'a> {
    pub contig: &'a str,
    pub position: u64,
    pub ratio: f64,
    pub eff_ct_count: u64,
    pub context: &'a str,
}

impl Row<'_> {
    /// The ratio record kept by filter1, with the ratio clamped into `[0, 1]`.
    pub fn to_record(&self) -> RatioRecord {
        RatioRecord::new(self.contig, self.position, self.ratio.clamp(0.0, 1.0))
    }

    pub fn key(&self, group_size: u64) -> LocusKey {
        LocusKey::new(self.contig, self.position, group_size)
    }
}

/// Integers may be written with a decimal point as long as nothing but zeros
/// follows it, e.g. `"12.0"` or `"12."`.
pub fn parse_integer(column: &'static str, value: &str) -> Result<u64, RecordError> {
    let trimmed = value.trim();
    let digits = match trimmed.split_once('.') {
        Some((whole, frac)) if frac.bytes().all(|b| b == b'0') => whole,
        Some(_) => trimmed,
        None => trimmed,
    };
    digits.parse().map_err(|_| RecordError::BadInteger {
        column,
        value: value.to_string(),
    })
}

/// Drop a leading `chr` from a contig name.
pub fn strip_chr(contig: &str) -> &str {
    contig.strip_prefix(CHR).unwrap_or(contig)
}

/// Coverage and context thresholds shared by the prefilter and filter1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub min_coverage: u64,
    /// Upper case contexts a row must have, if any are given.
    pub required_contexts: Vec<String>,
    /// Upper case contexts a row must not have.
    pub excluded_contexts: Vec<String>,
}

impl RecordFilter {
    pub fn new(min_coverage: u64, required: &[String], excluded: &[String]) -> Self {
        let upper = |list: &[String]| -> Vec<String> {
            list.iter().map(|c| c.trim().to_ascii_uppercase()).collect()
        };
        RecordFilter {
            min_coverage,
            required_contexts: upper(required),
            excluded_contexts: upper(excluded),
        }
    }

    pub fn has_sufficient_coverage(&self, row: &Row<'_>) -> bool {
        row.eff_ct_count >= self.min_coverage
    }

    pub fn has_correct_context(&self, row: &Row<'_>) -> bool {
        let context = row.context.to_ascii_uppercase();
        if !self.required_contexts.is_empty() && !self.required_contexts.contains(&context) {
            return false;
        }
        !self.excluded_contexts.contains(&context)
    }

    pub fn accepts(&self, row: &Row<'_>) -> bool {
        self.has_sufficient_coverage(row) && self.has_correct_context(row)
    }

    /// A context that is both required and excluded, if there is one.
    pub fn contradictory_context(&self) -> Option<&str> {
        self.required_contexts
            .iter()
            .find(|c| self.excluded_contexts.contains(c))
            .map(String::as_str)
    }
}

/// Running totals for one input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCounts {
    pub rows: u64,
    pub accepted: u64,
    pub malformed: u64,
}

impl FilterCounts {
    pub fn add(&mut self, other: FilterCounts) {
        self.rows += other.rows;
        self.accepted += other.accepted;
        self.malformed += other.malformed;
    }
}

impl fmt::Display for FilterCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted {} of {} rows ({} malformed)",
            self.accepted, self.rows, self.malformed
        )
    }
}

/// Streams a `.ratio` file one row at a time. A zero-byte file has no header
/// and no rows.
pub struct RatioReader<R> {
    path: PathBuf,
    reader: R,
    header_line: String,
    header: Option<Header>,
}

impl RatioReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
        Self::new(path, BufReader::new(file))
    }
}

impl<R: BufRead> RatioReader<R> {
    pub fn new(path: &Path, mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("could not read header of {}", path.display()))?;
        if n == 0 {
            debug!("{} is empty", path.display());
            return Ok(RatioReader {
                path: path.to_path_buf(),
                reader,
                header_line: String::new(),
                header: None,
            });
        }
        let header_line = std::str::from_utf8(&buf)
            .with_context(|| format!("unusable header in {}", path.display()))?;
        let header = Header::parse(header_line)
            .with_context(|| format!("unusable header in {}", path.display()))?;
        Ok(RatioReader {
            path: path.to_path_buf(),
            reader,
            header_line: header_line.trim_end().to_string(),
            header: Some(header),
        })
    }

    /// The header row as read, without its line terminator. Empty for an
    /// empty file.
    pub fn header_line(&self) -> &str {
        &self.header_line
    }

    /// Call `on_accept` with every row that parses and passes `filter`.
    /// Blank lines are ignored; malformed rows, including rows that are not
    /// valid UTF-8, are counted and skipped.
    pub fn for_each_accepted<F>(self, filter: &RecordFilter, mut on_accept: F) -> Result<FilterCounts>
    where
        F: FnMut(&str, &Row<'_>) -> Result<()>,
    {
        let RatioReader {
            path,
            mut reader,
            header,
            ..
        } = self;
        let mut counts = FilterCounts::default();
        let Some(header) = header else {
            return Ok(counts);
        };
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .with_context(|| format!("could not read {}", path.display()))?;
            if n == 0 {
                break;
            }
            let parsed = match std::str::from_utf8(&buf) {
                Ok(line) => {
                    let raw = line.trim();
                    if raw.is_empty() {
                        continue;
                    }
                    counts.rows += 1;
                    header.parse_row(raw).map(|row| (raw, row))
                }
                Err(_) => {
                    counts.rows += 1;
                    Err(RecordError::NotUtf8)
                }
            };
            match parsed {
                Ok((raw, row)) => {
                    if filter.accepts(&row) {
                        counts.accepted += 1;
                        on_accept(raw, &row)?;
                    }
                }
                Err(e) => {
                    counts.malformed += 1;
                    if counts.malformed == 1 {
                        debug!("{}: skipping malformed row: {e}", path.display());
                    }
                }
            }
            if counts.rows % PROGRESS_INTERVAL == 0 {
                debug!("{}: {counts}", path.display());
            }
        }
        Ok(counts)
    }
}

const PROGRESS_INTERVAL: u64 = 1_000_000;
