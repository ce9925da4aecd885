//!
//! The final sample-by-locus matrix and its two on-disk forms: a
//! tab-delimited table or an lz4+bincode snapshot.
//!

use anyhow::{ensure, Context, Result};
use bs_types::io::write_bin;
use bs_types::{Cell, CoordinateIndex, EmptyCellMarker, SampleVectors};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One column per sample, one row per accepted coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    pub columns: Vec<Vec<Cell>>,
}

impl Matrix {
    /// Build the matrix from the merged sample vectors. Columns follow
    /// sample name order and are labelled with the common ends trimmed.
    pub fn assemble(index: &CoordinateIndex, vectors: SampleVectors) -> Result<Self> {
        let mut names = Vec::with_capacity(vectors.len());
        let mut columns = Vec::with_capacity(vectors.len());
        for (name, cells) in vectors {
            ensure!(
                cells.len() == index.len(),
                "sample {name} has {} cells but {} loci were accepted",
                cells.len(),
                index.len()
            );
            names.push(name);
            columns.push(cells);
        }
        Ok(Matrix {
            row_labels: index.coordinates().to_vec(),
            column_labels: trim_repeating_ends(&names),
            columns,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn num_columns(&self) -> usize {
        self.column_labels.len()
    }

    pub fn write_table(&self, path: &Path, marker: &EmptyCellMarker) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("could not create {}", path.display()))?;

        let mut header = Vec::with_capacity(self.num_columns() + 1);
        header.push("");
        header.extend(self.column_labels.iter().map(String::as_str));
        wtr.write_record(&header)?;

        let mut row = Vec::with_capacity(self.num_columns() + 1);
        for (i, label) in self.row_labels.iter().enumerate() {
            row.clear();
            row.push(label.clone());
            row.extend(self.columns.iter().map(|col| col[i].render(marker)));
            wtr.write_record(&row)?;
        }
        wtr.flush()
            .with_context(|| format!("could not write {}", path.display()))?;
        info!(
            "wrote {} loci by {} samples to {}",
            self.num_rows(),
            self.num_columns(),
            path.display()
        );
        Ok(())
    }

    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        write_bin(path, self)?;
        info!(
            "wrote binary snapshot of {} loci by {} samples to {}",
            self.num_rows(),
            self.num_columns(),
            path.display()
        );
        Ok(())
    }
}

/// Drop the prefix and suffix shared by every name, e.g. `run1_A.sorted` and
/// `run1_B.sorted` become `A` and `B`. Names are returned unchanged when they
/// are all identical or when trimming would leave one of them empty.
pub fn trim_repeating_ends(names: &[String]) -> Vec<String> {
    if names.len() < 2 {
        return names.to_vec();
    }
    if names.iter().all(|n| n == &names[0]) {
        warn!("all sample names are identical, column labels are not trimmed");
        return names.to_vec();
    }
    let chars: Vec<Vec<char>> = names.iter().map(|n| n.chars().collect()).collect();
    let shortest = chars.iter().map(Vec::len).min().unwrap_or(0);

    let prefix = (0..shortest)
        .take_while(|&i| chars.iter().all(|c| c[i] == chars[0][i]))
        .count();
    let suffix = (0..shortest - prefix)
        .take_while(|&i| {
            let last = chars[0].len() - 1 - i;
            chars
                .iter()
                .all(|c| c[c.len() - 1 - i] == chars[0][last])
        })
        .count();

    if chars.iter().any(|c| c.len() == prefix + suffix) {
        warn!("trimming the common ends of the sample names would leave one empty, column labels are not trimmed");
        return names.to_vec();
    }
    chars
        .iter()
        .map(|c| c[prefix..c.len() - suffix].iter().collect())
        .collect()
}
