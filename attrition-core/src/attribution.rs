//! Attribution engine: sampling-based Shapley value estimation.
//!
//! The classifier is treated as a black box scored in batches. For each
//! sampled feature ordering and each background row, the engine walks from
//! the background row to the instance one feature at a time and credits
//! every probability change to the feature that was just switched. Walks
//! telescope, so per class the scores sum to `prediction - base_value`.
//!
//! Output shape mirrors the classifier: one score array per class when it
//! returns several probability columns, a single array otherwise.
//! [`AttributionOutput::canonicalize`] picks the positive class.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExplanationError;
use crate::model::Classifier;
use crate::schema::{FeatureSchema, FeatureVector};

// ---------------------------------------------------------------------------
// Background reference
// ---------------------------------------------------------------------------

/// Neutral baseline rows the instance is compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundReference {
    rows: Vec<Vec<f64>>,
}

impl BackgroundReference {
    /// A background of explicit rows. At least one row is required.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, ExplanationError> {
        if rows.is_empty() {
            return Err(ExplanationError::EmptyBackground);
        }
        Ok(Self { rows })
    }

    /// A single all-zeros row over `schema`.
    pub fn zeros(schema: &FeatureSchema) -> Self {
        Self {
            rows: vec![vec![0.0; schema.len()]],
        }
    }

    /// A single row holding the per-column median of `vectors`.
    pub fn medians(vectors: &[FeatureVector]) -> Result<Self, ExplanationError> {
        let Some(first) = vectors.first() else {
            return Err(ExplanationError::EmptyBackground);
        };
        let width = first.len();
        let mut row = Vec::with_capacity(width);
        let mut column = Vec::with_capacity(vectors.len());
        for j in 0..width {
            column.clear();
            for v in vectors {
                if v.len() != width {
                    return Err(ExplanationError::SchemaMismatch {
                        what: "background",
                        expected: width,
                        actual: v.len(),
                    });
                }
                column.push(v.as_slice()[j]);
            }
            row.push(median(&mut column));
        }
        Ok(Self { rows: vec![row] })
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Raw attribution output as produced by an attribution method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionOutput {
    Single(Vec<f64>),
    PerClass(Vec<Vec<f64>>),
}

impl AttributionOutput {
    /// Index of the class treated as "attrition": 1 when more than one
    /// class array is present, else 0.
    pub fn positive_class(&self) -> usize {
        match self {
            AttributionOutput::PerClass(arrays) if arrays.len() > 1 => 1,
            _ => 0,
        }
    }

    /// Scores for the positive class.
    pub fn canonicalize(self) -> Vec<f64> {
        match self {
            AttributionOutput::Single(scores) => scores,
            AttributionOutput::PerClass(arrays) => {
                let idx = if arrays.len() > 1 { 1 } else { 0 };
                arrays.into_iter().nth(idx).unwrap_or_default()
            }
        }
    }
}

/// Attribution scores plus the reference points they are measured from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub output: AttributionOutput,
    /// Mean background score per class.
    pub base_values: Vec<f64>,
    /// Instance score per class.
    pub prediction: Vec<f64>,
}

impl Attribution {
    pub fn base_value(&self) -> f64 {
        pick(&self.base_values, self.output.positive_class())
    }

    pub fn predicted(&self) -> f64 {
        pick(&self.prediction, self.output.positive_class())
    }

    pub fn scores(self) -> Vec<f64> {
        self.output.canonicalize()
    }
}

fn pick(values: &[f64], idx: usize) -> f64 {
    values
        .get(idx)
        .or_else(|| values.first())
        .copied()
        .unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// An attribution method over a black-box classifier.
pub trait Attributor: Send + Sync {
    fn attribute(
        &self,
        classifier: &dyn Classifier,
        schema: &FeatureSchema,
        instance: &[f64],
        background: &BackgroundReference,
    ) -> Result<Attribution, ExplanationError>;
}

/// Sampling parameters for [`SamplingAttributor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Number of random feature orderings.
    pub n_permutations: usize,
    /// RNG seed; `None` draws from entropy.
    pub seed: Option<u64>,
    /// Also walk each ordering in reverse.
    pub antithetic: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_permutations: 64,
            seed: Some(42),
            antithetic: true,
        }
    }
}

/// Permutation-sampling Shapley estimator.
#[derive(Debug, Clone)]
pub struct SamplingAttributor {
    config: SamplingConfig,
}

impl SamplingAttributor {
    pub fn new(config: SamplingConfig) -> Result<Self, ExplanationError> {
        if config.n_permutations == 0 {
            return Err(ExplanationError::InvalidSampling {
                message: "n_permutations must be at least 1".into(),
            });
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }
}

impl Default for SamplingAttributor {
    fn default() -> Self {
        Self {
            config: SamplingConfig::default(),
        }
    }
}

/// Score `rows`, checking the batch and per-row class counts.
fn score(
    classifier: &dyn Classifier,
    rows: &[Vec<f64>],
    n_classes: Option<usize>,
) -> Result<Vec<Vec<f64>>, ExplanationError> {
    let out = classifier.predict_proba(rows)?;
    if out.len() != rows.len() {
        return Err(ExplanationError::ShapeMismatch {
            message: format!(
                "classifier returned {} rows for a batch of {}",
                out.len(),
                rows.len()
            ),
        });
    }
    let expected = n_classes.or_else(|| out.first().map(Vec::len)).unwrap_or(0);
    if expected == 0 {
        return Err(ExplanationError::ShapeMismatch {
            message: "classifier returned no class columns".into(),
        });
    }
    if let Some(bad) = out.iter().find(|row| row.len() != expected) {
        return Err(ExplanationError::ShapeMismatch {
            message: format!(
                "classifier returned {} class columns, expected {}",
                bad.len(),
                expected
            ),
        });
    }
    Ok(out)
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl Attributor for SamplingAttributor {
    fn attribute(
        &self,
        classifier: &dyn Classifier,
        schema: &FeatureSchema,
        instance: &[f64],
        background: &BackgroundReference,
    ) -> Result<Attribution, ExplanationError> {
        let width = schema.len();
        if instance.len() != width {
            return Err(ExplanationError::SchemaMismatch {
                what: "instance",
                expected: width,
                actual: instance.len(),
            });
        }
        if background.is_empty() {
            return Err(ExplanationError::EmptyBackground);
        }
        if let Some(row) = background.rows().iter().find(|r| r.len() != width) {
            return Err(ExplanationError::SchemaMismatch {
                what: "background",
                expected: width,
                actual: row.len(),
            });
        }

        let background_scores = score(classifier, background.rows(), None)?;
        let n_classes = background_scores[0].len();
        let prediction = score(classifier, &[instance.to_vec()], Some(n_classes))?
            .into_iter()
            .next()
            .unwrap_or_default();

        let n_bg = background.len() as f64;
        let base_values: Vec<f64> = (0..n_classes)
            .map(|c| background_scores.iter().map(|row| row[c]).sum::<f64>() / n_bg)
            .collect();

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut orderings = Vec::with_capacity(self.config.n_permutations * 2);
        for _ in 0..self.config.n_permutations {
            let mut perm: Vec<usize> = (0..width).collect();
            perm.shuffle(&mut rng);
            if self.config.antithetic {
                let reversed: Vec<usize> = perm.iter().rev().copied().collect();
                orderings.push(perm);
                orderings.push(reversed);
            } else {
                orderings.push(perm);
            }
        }

        let mut contributions = vec![vec![0.0; width]; n_classes];
        let mut evaluations = 0usize;

        for (bg_row, bg_score) in background.rows().iter().zip(background_scores.iter()) {
            let changed: Vec<bool> = (0..width)
                .map(|j| !same(instance[j], bg_row[j]))
                .collect();

            for ordering in &orderings {
                let steps: Vec<usize> = ordering.iter().copied().filter(|&j| changed[j]).collect();
                if steps.is_empty() {
                    continue;
                }

                // Intermediate rows only: the start is the background row and
                // the last step reproduces the instance, both already scored.
                let mut current = bg_row.clone();
                let mut batch = Vec::with_capacity(steps.len().saturating_sub(1));
                for &j in &steps[..steps.len() - 1] {
                    current[j] = instance[j];
                    batch.push(current.clone());
                }
                let walk_scores = if batch.is_empty() {
                    Vec::new()
                } else {
                    score(classifier, &batch, Some(n_classes))?
                };
                evaluations += batch.len();

                let mut previous = bg_score;
                for (step, &j) in steps.iter().enumerate() {
                    let after = walk_scores.get(step).unwrap_or(&prediction);
                    for c in 0..n_classes {
                        contributions[c][j] += after[c] - previous[c];
                    }
                    previous = after;
                }
            }
        }

        let walks = (orderings.len() * background.len()) as f64;
        for class in &mut contributions {
            for value in class.iter_mut() {
                *value /= walks;
            }
        }

        debug!(
            features = width,
            background_rows = background.len(),
            orderings = orderings.len(),
            evaluations,
            classes = n_classes,
            "Attribution computed"
        );

        let output = if n_classes > 1 {
            AttributionOutput::PerClass(contributions)
        } else {
            AttributionOutput::Single(contributions.into_iter().next().unwrap_or_default())
        };

        Ok(Attribution {
            output,
            base_values,
            prediction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model::{Node, Tree, TreeClassifier, TreeEnsemble};

    /// Additive single-output model: `bias + w . x`.
    struct Linear {
        bias: f64,
        weights: Vec<f64>,
    }

    impl Classifier for Linear {
        fn name(&self) -> &str {
            "linear"
        }

        fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
            Ok(rows
                .iter()
                .map(|r| {
                    vec![self.bias + r.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>()]
                })
                .collect())
        }
    }

    struct Ragged;

    impl Classifier for Ragged {
        fn name(&self) -> &str {
            "ragged"
        }

        fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
            Ok(rows
                .iter()
                .enumerate()
                .map(|(i, _)| if i == 0 { vec![0.4, 0.6] } else { vec![1.0] })
                .collect())
        }
    }

    fn schema(n: usize) -> FeatureSchema {
        FeatureSchema::new((0..n).map(|i| format!("f{}", i))).unwrap()
    }

    fn interacting_trees() -> TreeClassifier {
        let tree = Tree {
            nodes: vec![
                Node::Split {
                    feature: 0,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                    missing_left: true,
                },
                Node::Leaf { value: -1.0 },
                Node::Split {
                    feature: 1,
                    threshold: 0.5,
                    left: 3,
                    right: 4,
                    missing_left: false,
                },
                Node::Leaf { value: 0.3 },
                Node::Leaf { value: 1.7 },
            ],
        };
        let stump = Tree {
            nodes: vec![
                Node::Split {
                    feature: 2,
                    threshold: 10.0,
                    left: 1,
                    right: 2,
                    missing_left: true,
                },
                Node::Leaf { value: 0.4 },
                Node::Leaf { value: -0.6 },
            ],
        };
        TreeClassifier::new(
            TreeEnsemble {
                base_score: -0.2,
                trees: vec![tree, stump],
            },
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_linear_model_exact_against_zero_background() {
        let schema = schema(4);
        let model = Linear {
            bias: 0.1,
            weights: vec![0.5, -2.0, 0.0, 1.5],
        };
        let instance = [2.0, 1.0, 7.0, -1.0];
        let attribution = SamplingAttributor::new(SamplingConfig {
            n_permutations: 3,
            ..Default::default()
        })
        .unwrap()
        .attribute(&model, &schema, &instance, &BackgroundReference::zeros(&schema))
        .unwrap();

        assert!(matches!(attribution.output, AttributionOutput::Single(_)));
        let scores = attribution.scores();
        let expected = [1.0, -2.0, 0.0, -1.5];
        for (s, e) in scores.iter().zip(expected) {
            assert!((s - e).abs() < 1e-12, "{} vs {}", s, e);
        }
    }

    #[test]
    fn test_efficiency_for_tree_ensemble() {
        let schema = schema(3);
        let model = interacting_trees();
        let background = BackgroundReference::new(vec![
            vec![0.0, 0.0, 0.0],
            vec![1.0, 0.0, 20.0],
            vec![0.2, 1.0, 5.0],
        ])
        .unwrap();
        let instance = [1.0, 1.0, 3.0];

        let attribution = SamplingAttributor::default()
            .attribute(&model, &schema, &instance, &background)
            .unwrap();

        let AttributionOutput::PerClass(ref arrays) = attribution.output else {
            panic!("expected per-class output");
        };
        assert_eq!(arrays.len(), 2);
        for (c, scores) in arrays.iter().enumerate() {
            let sum: f64 = scores.iter().sum();
            let gap = attribution.prediction[c] - attribution.base_values[c];
            assert!((sum - gap).abs() < 1e-9, "class {}: {} vs {}", c, sum, gap);
        }
        assert!((attribution.predicted() - model.ensemble().probability(&instance)).abs() < 1e-12);
    }

    #[test]
    fn test_unchanged_features_score_zero() {
        let schema = schema(3);
        let model = interacting_trees();
        let instance = [1.0, 0.0, 0.0];
        let attribution = SamplingAttributor::default()
            .attribute(&model, &schema, &instance, &BackgroundReference::zeros(&schema))
            .unwrap();
        let scores = attribution.scores();
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
        assert!(scores[0] > 0.0);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let schema = schema(3);
        let model = interacting_trees();
        let background = BackgroundReference::new(vec![vec![0.0, 0.0, 0.0], vec![0.7, 0.0, 30.0]])
            .unwrap();
        let attributor = SamplingAttributor::new(SamplingConfig {
            n_permutations: 5,
            seed: Some(7),
            antithetic: false,
        })
        .unwrap();
        let a = attributor
            .attribute(&model, &schema, &[1.0, 1.0, 1.0], &background)
            .unwrap();
        let b = attributor
            .attribute(&model, &schema, &[1.0, 1.0, 1.0], &background)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_width_and_background_validation() {
        let schema = schema(3);
        let model = interacting_trees();
        let attributor = SamplingAttributor::default();

        let err = attributor
            .attribute(&model, &schema, &[1.0, 2.0], &BackgroundReference::zeros(&schema))
            .unwrap_err();
        assert!(matches!(
            err,
            ExplanationError::SchemaMismatch { what: "instance", expected: 3, actual: 2 }
        ));

        let narrow = BackgroundReference::new(vec![vec![0.0; 2]]).unwrap();
        let err = attributor
            .attribute(&model, &schema, &[1.0, 2.0, 3.0], &narrow)
            .unwrap_err();
        assert!(matches!(
            err,
            ExplanationError::SchemaMismatch { what: "background", .. }
        ));

        assert!(matches!(
            BackgroundReference::new(Vec::new()),
            Err(ExplanationError::EmptyBackground)
        ));
    }

    #[test]
    fn test_invalid_sampling_config() {
        let err = SamplingAttributor::new(SamplingConfig {
            n_permutations: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ExplanationError::InvalidSampling { .. }));
    }

    #[test]
    fn test_ragged_classifier_output() {
        let schema = schema(2);
        let background = BackgroundReference::new(vec![vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        let err = SamplingAttributor::default()
            .attribute(&Ragged, &schema, &[2.0, 2.0], &background)
            .unwrap_err();
        assert!(matches!(err, ExplanationError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_canonicalize_positive_class_heuristic() {
        let single = AttributionOutput::Single(vec![0.1, 0.2]);
        assert_eq!(single.positive_class(), 0);
        assert_eq!(single.canonicalize(), vec![0.1, 0.2]);

        let one = AttributionOutput::PerClass(vec![vec![0.3]]);
        assert_eq!(one.canonicalize(), vec![0.3]);

        let two = AttributionOutput::PerClass(vec![vec![-0.3], vec![0.3]]);
        assert_eq!(two.positive_class(), 1);
        assert_eq!(two.canonicalize(), vec![0.3]);

        assert!(AttributionOutput::PerClass(Vec::new()).canonicalize().is_empty());
    }

    #[test]
    fn test_median_background() {
        let schema = schema(2);
        let vectors: Vec<FeatureVector> = [[1.0, 10.0], [3.0, 20.0], [2.0, 40.0], [9.0, 30.0]]
            .iter()
            .map(|r| FeatureVector::from_values(&schema, r.to_vec()).unwrap())
            .collect();
        let background = BackgroundReference::medians(&vectors).unwrap();
        assert_eq!(background.rows(), &[vec![2.5, 25.0]]);
        assert!(matches!(
            BackgroundReference::medians(&[]),
            Err(ExplanationError::EmptyBackground)
        ));
    }
}
