//! Ranking and normalization of attribution scores.
//!
//! Scores, feature names and raw values arrive as three parallel sequences
//! that are not guaranteed to agree in length. They are zipped to the
//! shortest one; features beyond that point are dropped from the
//! explanation and counted. Survivors are ranked by absolute score with a
//! stable sort, so ties keep schema order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::warn;

/// Whether a factor pushes the prediction up or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    IncreasesRisk,
    DecreasesRisk,
}

impl Direction {
    /// Strictly positive scores increase risk; zero and negative decrease it.
    pub fn from_score(score: f64) -> Self {
        if score > 0.0 {
            Direction::IncreasesRisk
        } else {
            Direction::DecreasesRisk
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::IncreasesRisk => write!(f, "increases risk"),
            Direction::DecreasesRisk => write!(f, "decreases risk"),
        }
    }
}

/// One contributing factor of an explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFactor {
    pub feature: String,
    pub value: f64,
    pub score: f64,
    pub direction: Direction,
}

impl RankedFactor {
    pub fn new(feature: impl Into<String>, value: f64, score: f64) -> Self {
        Self {
            feature: feature.into(),
            value,
            score,
            direction: Direction::from_score(score),
        }
    }
}

impl fmt::Display for RankedFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Value: {}) {}",
            self.feature, self.value, self.direction
        )
    }
}

/// Zip names, scores and values to the shortest length.
///
/// Returns the paired factors in input order and how many entries of the
/// longest sequence were dropped.
pub fn reconcile(names: &[String], scores: &[f64], values: &[f64]) -> (Vec<RankedFactor>, usize) {
    let factors: Vec<RankedFactor> = names
        .iter()
        .zip(scores)
        .zip(values)
        .map(|((name, &score), &value)| RankedFactor::new(name.clone(), value, score))
        .collect();

    let longest = names.len().max(scores.len()).max(values.len());
    let dropped = longest - factors.len();
    if dropped > 0 {
        warn!(
            names = names.len(),
            scores = scores.len(),
            values = values.len(),
            dropped,
            "Attribution output disagrees with the schema; truncating to the shortest"
        );
    }
    (factors, dropped)
}

fn by_impact(a: &RankedFactor, b: &RankedFactor) -> Ordering {
    match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.score.abs().total_cmp(&a.score.abs()),
    }
}

/// Stable sort by descending absolute score, then keep the first `k`.
pub fn rank_top_k(mut factors: Vec<RankedFactor>, k: usize) -> Vec<RankedFactor> {
    factors.sort_by(by_impact);
    factors.truncate(k);
    factors
}

/// Result of reconciling and ranking one attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub factors: Vec<RankedFactor>,
    pub dropped: usize,
}

/// Reconcile then rank: the full normalization step.
pub fn rank(names: &[String], scores: &[f64], values: &[f64], k: usize) -> Ranking {
    let (factors, dropped) = reconcile(names, scores, values);
    Ranking {
        factors: rank_top_k(factors, k),
        dropped,
    }
}
