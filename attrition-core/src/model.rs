//! Model bundle and classifier.
//!
//! The persisted artifact is a single JSON document holding the trained
//! gradient-boosted tree ensemble, the ordered feature names it was trained
//! on, and an optional decision threshold:
//!
//! ```json
//! { "model": { "base_score": -1.2, "trees": [ ... ] },
//!   "features": ["Age", "DailyRate", ...],
//!   "threshold": 0.5 }
//! ```
//!
//! Trees use XGBoost split semantics: go left when `x < threshold`, and a
//! missing (`NaN`) value follows the node's default direction.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::ModelError;
use crate::schema::FeatureSchema;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// A binary classifier scoring batches of rows in schema order.
///
/// Implementations return one probability row per input row, one column
/// per class. Implementations must be read-only: the explanation service
/// shares a single instance across calls.
pub trait Classifier: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Class probabilities for every row.
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError>;

    /// Class labels: `1` when the positive-class probability is at least
    /// `threshold`. Single-column outputs are treated as the positive class.
    fn predict(&self, rows: &[Vec<f64>], threshold: f64) -> Result<Vec<u8>, ModelError> {
        let probs = self.predict_proba(rows)?;
        probs
            .iter()
            .map(|row| {
                let p = match row.as_slice() {
                    [] => {
                        return Err(ModelError::Prediction {
                            message: "classifier returned an empty probability row".into(),
                        });
                    }
                    [only] => *only,
                    [_, positive, ..] => *positive,
                };
                Ok(u8::from(p >= threshold))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tree ensemble
// ---------------------------------------------------------------------------

/// One node of a regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default = "default_missing_left")]
        missing_left: bool,
    },
    Leaf {
        value: f64,
    },
}

fn default_missing_left() -> bool {
    true
}

/// A regression tree stored as a flat node array; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Leaf value reached by `row`.
    ///
    /// Validation guarantees children come after their parent, so the walk
    /// always terminates.
    pub fn leaf_value(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    missing_left,
                }) => {
                    let x = row.get(*feature).copied().unwrap_or(f64::NAN);
                    let go_left = if x.is_nan() { *missing_left } else { x < *threshold };
                    idx = if go_left { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    fn validate(&self, tree_idx: usize, width: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::InvalidModel {
                message: format!("tree {} has no nodes", tree_idx),
            });
        }
        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= width {
                        return Err(ModelError::InvalidModel {
                            message: format!(
                                "tree {} node {} splits on feature {} but the schema has {} columns",
                                tree_idx, i, feature, width
                            ),
                        });
                    }
                    if threshold.is_nan() {
                        return Err(ModelError::InvalidModel {
                            message: format!("tree {} node {} has a NaN threshold", tree_idx, i),
                        });
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= n {
                            return Err(ModelError::InvalidModel {
                                message: format!(
                                    "tree {} node {} has invalid child index {}",
                                    tree_idx, i, child
                                ),
                            });
                        }
                    }
                }
                Node::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(ModelError::InvalidModel {
                            message: format!("tree {} leaf {} is not finite", tree_idx, i),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Gradient-boosted binary classifier: `p = sigmoid(base_score + Σ leaf)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    /// Check every tree against a schema of `width` columns.
    pub fn validate(&self, width: usize) -> Result<(), ModelError> {
        if !self.base_score.is_finite() {
            return Err(ModelError::InvalidModel {
                message: "base_score is not finite".into(),
            });
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, width)?;
        }
        Ok(())
    }

    /// Raw margin before the logistic link.
    pub fn margin(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.leaf_value(row)).sum::<f64>()
    }

    /// Positive-class probability.
    pub fn probability(&self, row: &[f64]) -> f64 {
        sigmoid(self.margin(row))
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// A validated tree ensemble bound to a schema width.
#[derive(Debug, Clone)]
pub struct TreeClassifier {
    ensemble: TreeEnsemble,
    n_features: usize,
}

impl TreeClassifier {
    pub fn new(ensemble: TreeEnsemble, n_features: usize) -> Result<Self, ModelError> {
        ensemble.validate(n_features)?;
        Ok(Self {
            ensemble,
            n_features,
        })
    }

    pub fn ensemble(&self) -> &TreeEnsemble {
        &self.ensemble
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

impl Classifier for TreeClassifier {
    fn name(&self) -> &str {
        "tree_ensemble"
    }

    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != self.n_features {
                    return Err(ModelError::Prediction {
                        message: format!(
                            "row {} has {} values, model expects {}",
                            i,
                            row.len(),
                            self.n_features
                        ),
                    });
                }
                let p = self.ensemble.probability(row);
                Ok(vec![1.0 - p, p])
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct BundleFile {
    model: TreeEnsemble,
    features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    threshold: Option<f64>,
}

/// A loaded, validated model bundle.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub classifier: TreeClassifier,
    pub schema: FeatureSchema,
    pub threshold: f64,
}

impl ModelBundle {
    pub fn new(
        ensemble: TreeEnsemble,
        schema: FeatureSchema,
        threshold: Option<f64>,
    ) -> Result<Self, ModelError> {
        let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(ModelError::InvalidModel {
                message: format!("threshold {} is outside (0, 1)", threshold),
            });
        }
        let classifier = TreeClassifier::new(ensemble, schema.len())?;
        Ok(Self {
            classifier,
            schema,
            threshold,
        })
    }

    /// Parse and validate a bundle document.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let file: BundleFile = serde_json::from_str(json).map_err(|e| ModelError::Corrupt {
            message: e.to_string(),
        })?;
        let schema = FeatureSchema::new(file.features)?;
        Self::new(file.model, schema, file.threshold)
    }

    /// Load a bundle from disk. All failures are fatal for startup.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ModelError::NotFound {
                path: path.to_path_buf(),
            },
            _ => ModelError::Corrupt {
                message: format!("{}: {}", path.display(), e),
            },
        })?;
        if content.trim().is_empty() {
            return Err(ModelError::EmptyBundle {
                path: path.to_path_buf(),
            });
        }

        let bundle = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            features = bundle.schema.len(),
            trees = bundle.classifier.ensemble().trees.len(),
            threshold = bundle.threshold,
            "Model bundle loaded"
        );
        Ok(bundle)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        let file = BundleFile {
            model: self.classifier.ensemble().clone(),
            features: self.schema.names().to_vec(),
            threshold: Some(self.threshold),
        };
        serde_json::to_string_pretty(&file).map_err(|e| ModelError::Corrupt {
            message: e.to_string(),
        })
    }

    /// Write the bundle as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let json = self.to_json()?;
        let io_err = |e: std::io::Error| ModelError::Corrupt {
            message: format!("{}: {}", path.display(), e),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, json).map_err(io_err)?;
        debug!(path = %path.display(), "Model bundle written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stump(feature: usize, threshold: f64, left: f64, right: f64) -> Tree {
        Tree {
            nodes: vec![
                Node::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                    missing_left: true,
                },
                Node::Leaf { value: left },
                Node::Leaf { value: right },
            ],
        }
    }

    fn sample_bundle() -> ModelBundle {
        let ensemble = TreeEnsemble {
            base_score: 0.0,
            trees: vec![stump(0, 35.0, 0.5, -0.5), stump(1, 0.5, -0.2, 0.8)],
        };
        let schema = FeatureSchema::new(vec!["Age", "OverTime_Yes"]).unwrap();
        ModelBundle::new(ensemble, schema, None).unwrap()
    }

    #[test]
    fn test_tree_routing_and_missing() {
        let tree = stump(0, 10.0, 1.0, 2.0);
        assert_eq!(tree.leaf_value(&[5.0]), 1.0);
        assert_eq!(tree.leaf_value(&[10.0]), 2.0);
        assert_eq!(tree.leaf_value(&[f64::NAN]), 1.0);
    }

    #[test]
    fn test_predict_proba_rows_sum_to_one() {
        let bundle = sample_bundle();
        let probs = bundle
            .classifier
            .predict_proba(&[vec![30.0, 1.0], vec![50.0, 0.0]])
            .unwrap();
        assert_eq!(probs.len(), 2);
        let p = sigmoid(0.5 + 0.8);
        assert!((probs[0][1] - p).abs() < 1e-12);
        assert!((probs[0][0] + probs[0][1] - 1.0).abs() < 1e-12);
        assert!(probs[1][1] < 0.5);
    }

    #[test]
    fn test_predict_applies_threshold() {
        let bundle = sample_bundle();
        let labels = bundle
            .classifier
            .predict(&[vec![30.0, 1.0], vec![50.0, 0.0]], 0.5)
            .unwrap();
        assert_eq!(labels, vec![1, 0]);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let bundle = sample_bundle();
        let err = bundle.classifier.predict_proba(&[vec![30.0]]).unwrap_err();
        assert!(matches!(err, ModelError::Prediction { .. }));
    }

    #[test]
    fn test_bundle_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("bundle.json");
        let bundle = sample_bundle();
        bundle.save(&path).unwrap();

        let loaded = ModelBundle::load(&path).unwrap();
        assert_eq!(loaded.schema, bundle.schema);
        assert_eq!(loaded.threshold, 0.5);
        assert_eq!(loaded.classifier.ensemble(), bundle.classifier.ensemble());
    }

    #[test]
    fn test_load_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            ModelBundle::load(&missing),
            Err(ModelError::NotFound { .. })
        ));

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(matches!(
            ModelBundle::load(&empty),
            Err(ModelError::EmptyBundle { .. })
        ));
    }

    #[test]
    fn test_corrupt_and_invalid_bundles() {
        assert!(matches!(
            ModelBundle::from_json("{not json"),
            Err(ModelError::Corrupt { .. })
        ));

        let empty_features = r#"{"model": {"trees": []}, "features": []}"#;
        assert!(matches!(
            ModelBundle::from_json(empty_features),
            Err(ModelError::InvalidModel { .. })
        ));

        let duplicate = r#"{"model": {"trees": []}, "features": ["a", "a"]}"#;
        assert!(matches!(
            ModelBundle::from_json(duplicate),
            Err(ModelError::InvalidModel { .. })
        ));

        let bad_threshold = r#"{"model": {"trees": []}, "features": ["a"], "threshold": 1.5}"#;
        assert!(matches!(
            ModelBundle::from_json(bad_threshold),
            Err(ModelError::InvalidModel { .. })
        ));

        let out_of_range = r#"{"model": {"trees": [{"nodes": [
            {"type": "split", "feature": 3, "threshold": 1.0, "left": 1, "right": 2},
            {"type": "leaf", "value": 0.1},
            {"type": "leaf", "value": 0.2}
        ]}]}, "features": ["a", "b"]}"#;
        assert!(matches!(
            ModelBundle::from_json(out_of_range),
            Err(ModelError::InvalidModel { .. })
        ));

        let cycle = r#"{"model": {"trees": [{"nodes": [
            {"type": "split", "feature": 0, "threshold": 1.0, "left": 0, "right": 1},
            {"type": "leaf", "value": 0.2}
        ]}]}, "features": ["a"]}"#;
        assert!(matches!(
            ModelBundle::from_json(cycle),
            Err(ModelError::InvalidModel { .. })
        ));
    }
}
