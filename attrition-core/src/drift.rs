//! Input drift monitoring.
//!
//! Compares a current batch of raw records against the reference dataset
//! column by column. Numeric columns use the two-sample Kolmogorov-Smirnov
//! test, categorical columns the Jensen-Shannon distance between category
//! frequencies. The dataset is flagged when the share of drifted columns
//! reaches the configured threshold.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{debug, info};

use crate::config::DriftConfig;
use crate::dataset::{ColumnKind, Dataset};
use crate::error::DriftError;

/// Per-column outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub column: String,
    pub kind: ColumnKind,
    /// Name of the statistical test applied.
    pub stat_test: String,
    /// KS p-value or Jensen-Shannon distance.
    pub score: f64,
    pub threshold: f64,
    pub drifted: bool,
}

/// Outcome of one drift run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub generated_at: DateTime<Utc>,
    pub reference_rows: usize,
    pub current_rows: usize,
    pub columns: Vec<ColumnDrift>,
    /// Reference columns absent from the current batch.
    pub missing_columns: Vec<String>,
    pub drifted_columns: usize,
    pub share_drifted: f64,
    pub dataset_drift: bool,
}

impl DriftReport {
    pub fn column(&self, name: &str) -> Option<&ColumnDrift> {
        self.columns.iter().find(|c| c.column == name)
    }

    /// Human-readable table for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Data Drift Report ({})",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(
            out,
            "Reference rows: {}  Current rows: {}",
            self.reference_rows, self.current_rows
        );
        let _ = writeln!(
            out,
            "Dataset drift: {} ({} of {} columns, {:.1}%)",
            if self.dataset_drift { "DETECTED" } else { "not detected" },
            self.drifted_columns,
            self.columns.len(),
            self.share_drifted * 100.0
        );
        let _ = writeln!(out);

        let width = self
            .columns
            .iter()
            .map(|c| c.column.len())
            .max()
            .unwrap_or(6)
            .max(6);
        let _ = writeln!(
            out,
            "{:<width$}  {:<11}  {:<24}  {:>8}  {:>9}  Drift",
            "Column", "Type", "Test", "Score", "Threshold"
        );
        for c in &self.columns {
            let kind = match c.kind {
                ColumnKind::Numeric => "numeric",
                ColumnKind::Categorical => "categorical",
            };
            let _ = writeln!(
                out,
                "{:<width$}  {:<11}  {:<24}  {:>8.4}  {:>9.3}  {}",
                c.column,
                kind,
                c.stat_test,
                c.score,
                c.threshold,
                if c.drifted { "YES" } else { "no" }
            );
        }
        if !self.missing_columns.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Missing in current batch: {}", self.missing_columns.join(", "));
        }
        out
    }

    /// Write the report as pretty JSON.
    pub fn save_json(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Column-wise drift detector bound to a reference dataset.
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    reference: Dataset,
    config: DriftConfig,
}

impl DriftMonitor {
    pub fn new(reference: Dataset, config: DriftConfig) -> Result<Self, DriftError> {
        config.validate().map_err(|e| DriftError::InvalidConfig {
            message: e.to_string(),
        })?;
        if reference.is_empty() {
            return Err(DriftError::EmptyDataset {
                message: "reference dataset has no rows".to_string(),
            });
        }
        Ok(Self { reference, config })
    }

    pub fn reference(&self) -> &Dataset {
        &self.reference
    }

    fn skipped(&self, column: &str) -> bool {
        column == self.config.target_column || self.config.drop_columns.iter().any(|c| c == column)
    }

    /// Test every monitored column of `current` against the reference.
    pub fn run(&self, current: &Dataset) -> Result<DriftReport, DriftError> {
        if current.is_empty() {
            return Err(DriftError::EmptyDataset {
                message: "current batch has no rows".to_string(),
            });
        }

        let mut columns = Vec::new();
        let mut missing_columns = Vec::new();

        for name in self.reference.columns() {
            if self.skipped(name) {
                continue;
            }
            if current.column_index(name).is_none() {
                missing_columns.push(name.clone());
                continue;
            }

            let numeric = (
                self.reference.numeric_column(name),
                current.numeric_column(name),
            );
            let drift = match numeric {
                (Some(reference), Some(current_values))
                    if self.reference.column_kind(name) == Some(ColumnKind::Numeric) =>
                {
                    let p = ks_p_value(&reference, &current_values);
                    ColumnDrift {
                        column: name.clone(),
                        kind: ColumnKind::Numeric,
                        stat_test: "K-S p_value".to_string(),
                        score: p,
                        threshold: self.config.ks_p_value_threshold,
                        drifted: p < self.config.ks_p_value_threshold,
                    }
                }
                _ => {
                    let reference = self.reference.column(name).unwrap_or_default();
                    let current_cells = current.column(name).unwrap_or_default();
                    let distance = jensen_shannon_distance(&reference, &current_cells);
                    ColumnDrift {
                        column: name.clone(),
                        kind: ColumnKind::Categorical,
                        stat_test: "Jensen-Shannon distance".to_string(),
                        score: distance,
                        threshold: self.config.jensen_shannon_threshold,
                        drifted: distance >= self.config.jensen_shannon_threshold,
                    }
                }
            };
            debug!(
                column = %drift.column,
                score = drift.score,
                drifted = drift.drifted,
                "Column drift tested"
            );
            columns.push(drift);
        }

        let drifted_columns = columns.iter().filter(|c| c.drifted).count();
        let share_drifted = if columns.is_empty() {
            0.0
        } else {
            drifted_columns as f64 / columns.len() as f64
        };
        let dataset_drift = !columns.is_empty() && share_drifted >= self.config.drift_share;

        info!(
            columns = columns.len(),
            drifted = drifted_columns,
            missing = missing_columns.len(),
            dataset_drift,
            "Drift report generated"
        );

        Ok(DriftReport {
            generated_at: Utc::now(),
            reference_rows: self.reference.len(),
            current_rows: current.len(),
            columns,
            missing_columns,
            drifted_columns,
            share_drifted,
            dataset_drift,
        })
    }
}

/// Sample `n` reference rows and apply the demo shift:
/// `Age + 10`, `MonthlyIncome * 1.5`.
pub fn simulate_shift(reference: &Dataset, n: usize, seed: u64) -> Result<Dataset, DriftError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut current = reference.sample(n, &mut rng);
    current.map_numeric("Age", |v| v + 10.0)?;
    current.map_numeric("MonthlyIncome", |v| v * 1.5)?;
    Ok(current)
}

/// Two-sample Kolmogorov-Smirnov statistic. NaN values are ignored.
pub fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let mut a: Vec<f64> = a.iter().copied().filter(|v| !v.is_nan()).collect();
    let mut b: Vec<f64> = b.iter().copied().filter(|v| !v.is_nan()).collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    a.sort_by(|x, y| x.total_cmp(y));
    b.sort_by(|x, y| x.total_cmp(y));

    let (n, m) = (a.len(), b.len());
    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;
    while i < n && j < m {
        let x = a[i].min(b[j]);
        while i < n && a[i] <= x {
            i += 1;
        }
        while j < m && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n as f64 - j as f64 / m as f64).abs());
    }
    d
}

/// Asymptotic p-value of the two-sample KS test (Kolmogorov distribution
/// with the Stephens small-sample correction).
pub fn ks_p_value(a: &[f64], b: &[f64]) -> f64 {
    let n = a.iter().filter(|v| !v.is_nan()).count();
    let m = b.iter().filter(|v| !v.is_nan()).count();
    if n == 0 || m == 0 {
        return 1.0;
    }
    let d = ks_statistic(a, b);
    let ne = (n * m) as f64 / (n + m) as f64;
    let sqrt_ne = ne.sqrt();
    kolmogorov_q((sqrt_ne + 0.12 + 0.11 / sqrt_ne) * d)
}

fn kolmogorov_q(lambda: f64) -> f64 {
    if lambda < 1e-3 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let k = k as f64;
        let term = sign * (-2.0 * k * k * lambda * lambda).exp();
        sum += term;
        if term.abs() < 1e-12 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

/// Jensen-Shannon distance (natural log) between the category frequencies
/// of two samples. Empty cells count as their own category.
pub fn jensen_shannon_distance(reference: &[&str], current: &[&str]) -> f64 {
    if reference.is_empty() || current.is_empty() {
        return 0.0;
    }
    let mut counts: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for &c in reference {
        counts.entry(c).or_default().0 += 1.0;
    }
    for &c in current {
        counts.entry(c).or_default().1 += 1.0;
    }
    let (nr, nc) = (reference.len() as f64, current.len() as f64);

    let kl = |p: f64, m: f64| if p > 0.0 { p * (p / m).ln() } else { 0.0 };
    let divergence: f64 = counts
        .values()
        .map(|&(r, c)| {
            let (p, q) = (r / nr, c / nc);
            let m = (p + q) / 2.0;
            0.5 * kl(p, m) + 0.5 * kl(q, m)
        })
        .sum();
    divergence.max(0.0).sqrt()
}
