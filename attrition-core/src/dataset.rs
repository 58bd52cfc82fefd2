//! Raw tabular data loaded from CSV.
//!
//! Cells are kept as strings; columns are classified numeric when every
//! non-empty cell parses as `f64`. Quoted fields are trimmed, embedded
//! delimiters inside quotes are not supported.

use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::DriftError;

/// Column classification used by the drift monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// A header plus rows of string cells, all of the header's width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn split_line(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter)
        .map(|s| s.trim().trim_matches('"').to_string())
        .collect()
}

impl Dataset {
    /// Build from a header and rows. Every row must match the header width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DriftError> {
        if columns.is_empty() {
            return Err(DriftError::EmptyDataset {
                message: "no columns".to_string(),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DriftError::RaggedRow {
                    line: i + 2,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    /// Parse comma-separated content with a header row.
    pub fn from_csv_str(content: &str) -> Result<Self, DriftError> {
        let mut lines = content.lines().enumerate();

        let columns = lines
            .by_ref()
            .find(|(_, line)| !line.trim().is_empty())
            .map(|(_, header)| split_line(header, ','))
            .ok_or_else(|| DriftError::EmptyDataset {
                message: "missing header row".to_string(),
            })?;

        let mut rows = Vec::new();
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let row = split_line(line, ',');
            if row.len() != columns.len() {
                return Err(DriftError::RaggedRow {
                    line: idx + 1,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(DriftError::EmptyDataset {
                message: "no data rows".to_string(),
            });
        }
        Self::new(columns, rows)
    }

    /// Load a CSV file.
    pub fn load(path: &Path) -> Result<Self, DriftError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DriftError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => DriftError::EmptyDataset {
                message: format!("{}: {}", path.display(), e),
            },
        })?;
        let dataset = Self::from_csv_str(&content)?;
        debug!(
            path = %path.display(),
            rows = dataset.len(),
            columns = dataset.columns.len(),
            "Dataset loaded"
        );
        Ok(dataset)
    }

    /// Render back to CSV.
    pub fn to_csv(&self) -> String {
        let mut out = self.columns.join(",");
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Raw cells of one column.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Parsed values of a numeric column, empty cells skipped.
    /// `None` when the column is missing or not numeric.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        let cells = self.column(name)?;
        cells
            .into_iter()
            .filter(|c| !c.is_empty())
            .map(|c| c.parse::<f64>().ok())
            .collect()
    }

    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        self.column(name)?;
        Some(match self.numeric_column(name) {
            Some(values) if !values.is_empty() => ColumnKind::Numeric,
            _ => ColumnKind::Categorical,
        })
    }

    /// Apply `f` to every cell of a numeric column. Non-numeric cells are kept.
    pub fn map_numeric(&mut self, name: &str, f: impl Fn(f64) -> f64) -> Result<(), DriftError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| DriftError::MissingColumn {
                name: name.to_string(),
            })?;
        for row in &mut self.rows {
            if let Ok(v) = row[idx].parse::<f64>() {
                row[idx] = f(v).to_string();
            }
        }
        Ok(())
    }

    /// Sample `n` rows without replacement (all rows when `n >= len`).
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Self {
        let n = n.min(self.rows.len());
        let rows = sample(rng, self.rows.len(), n)
            .into_iter()
            .map(|i| self.rows[i].clone())
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }
}
