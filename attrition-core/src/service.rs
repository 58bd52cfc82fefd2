//! Explanation service: the long-lived, read-only owner of the model, the
//! schema, the vectorizer, the background reference and the attribution
//! method.
//!
//! Build it once at startup and share it (it is `Send + Sync`); every
//! operation takes `&self`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::attribution::{Attributor, BackgroundReference, SamplingAttributor};
use crate::config::{BackgroundKind, GuardianConfig};
use crate::dataset::Dataset;
use crate::error::{ExplanationError, GuardianError, ModelError, Result};
use crate::model::{Classifier, DEFAULT_THRESHOLD, ModelBundle};
use crate::ranking::{RankedFactor, rank};
use crate::schema::{FeatureSchema, FeatureVector};
use crate::vectorizer::{RawInstance, UnknownPolicy, Vectorizer};

/// Colour band of a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Low below 30 %, Medium below 70 %, High otherwise.
    pub fn from_probability(probability: f64) -> Self {
        let percent = probability * 100.0;
        if percent < 30.0 {
            RiskLevel::Low
        } else if percent < 70.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "Low Risk"),
            RiskLevel::Medium => write!(f, "Medium Risk"),
            RiskLevel::High => write!(f, "High Risk"),
        }
    }
}

/// Prediction for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Positive-class probability.
    pub probability: f64,
    /// `probability >= threshold`.
    pub label: bool,
    pub level: RiskLevel,
}

impl RiskAssessment {
    pub fn new(probability: f64, threshold: f64) -> Self {
        Self {
            probability,
            label: probability >= threshold,
            level: RiskLevel::from_probability(probability),
        }
    }

    pub fn percent(&self) -> f64 {
        self.probability * 100.0
    }
}

impl fmt::Display for RiskAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.1}%", self.level, self.percent())
    }
}

/// Ranked explanation of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub factors: Vec<RankedFactor>,
    /// Positive-class score of the instance.
    pub prediction: f64,
    /// Positive-class mean score of the background.
    pub base_value: f64,
    /// Features lost to zip-shortest reconciliation.
    pub dropped: usize,
}

impl Explanation {
    /// Display strings, most important first.
    pub fn statements(&self) -> Vec<String> {
        self.factors.iter().map(ToString::to_string).collect()
    }
}

/// Risk plus explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub risk: RiskAssessment,
    pub explanation: Explanation,
}

pub struct ExplanationService {
    classifier: Arc<dyn Classifier>,
    schema: FeatureSchema,
    vectorizer: Vectorizer,
    background: BackgroundReference,
    attributor: Arc<dyn Attributor>,
    threshold: f64,
    top_k: usize,
}

impl fmt::Debug for ExplanationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplanationService")
            .field("classifier", &self.classifier.name())
            .field("features", &self.schema.len())
            .field("background_rows", &self.background.len())
            .field("threshold", &self.threshold)
            .field("top_k", &self.top_k)
            .finish()
    }
}

/// Builder for [`ExplanationService`].
pub struct ServiceBuilder {
    classifier: Arc<dyn Classifier>,
    schema: FeatureSchema,
    vectorizer: Option<Vectorizer>,
    background: Option<BackgroundReference>,
    attributor: Option<Arc<dyn Attributor>>,
    threshold: f64,
    top_k: usize,
}

impl ServiceBuilder {
    /// Defaults to the built-in HR attribute map with [`UnknownPolicy::Ignore`].
    pub fn vectorizer(mut self, vectorizer: Vectorizer) -> Self {
        self.vectorizer = Some(vectorizer);
        self
    }

    /// Defaults to a single all-zeros row.
    pub fn background(mut self, background: BackgroundReference) -> Self {
        self.background = Some(background);
        self
    }

    /// Defaults to [`SamplingAttributor`] with default sampling.
    pub fn attributor(mut self, attributor: Arc<dyn Attributor>) -> Self {
        self.attributor = Some(attributor);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn build(self) -> Result<ExplanationService> {
        let vectorizer = match self.vectorizer {
            Some(v) => v,
            None => Vectorizer::ibm_hr(self.schema.clone(), UnknownPolicy::default())?,
        };
        if vectorizer.schema() != &self.schema {
            return Err(ExplanationError::SchemaMismatch {
                what: "vectorizer",
                expected: self.schema.len(),
                actual: vectorizer.schema().len(),
            }
            .into());
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(ModelError::InvalidModel {
                message: format!("threshold {} is outside (0, 1)", self.threshold),
            }
            .into());
        }
        let background = self
            .background
            .unwrap_or_else(|| BackgroundReference::zeros(&self.schema));
        let attributor = self
            .attributor
            .unwrap_or_else(|| Arc::new(SamplingAttributor::default()) as Arc<dyn Attributor>);

        Ok(ExplanationService {
            classifier: self.classifier,
            schema: self.schema,
            vectorizer,
            background,
            attributor,
            threshold: self.threshold,
            top_k: self.top_k,
        })
    }
}

impl ExplanationService {
    pub fn builder(classifier: Arc<dyn Classifier>, schema: FeatureSchema) -> ServiceBuilder {
        ServiceBuilder {
            classifier,
            schema,
            vectorizer: None,
            background: None,
            attributor: None,
            threshold: DEFAULT_THRESHOLD,
            top_k: 3,
        }
    }

    /// Assemble the service from a loaded bundle and configuration.
    pub fn from_bundle(bundle: ModelBundle, config: &GuardianConfig) -> Result<Self> {
        let ModelBundle {
            classifier,
            schema,
            threshold,
        } = bundle;

        let vectorizer = Vectorizer::ibm_hr(schema.clone(), config.vectorizer.unknown_policy)?;
        let background = match config.explain.background {
            BackgroundKind::Zeros => BackgroundReference::zeros(&schema),
            BackgroundKind::Medians => {
                let path = config
                    .explain
                    .background_dataset
                    .as_deref()
                    .unwrap_or(&config.drift.reference_dataset);
                median_background(&vectorizer, path)?
            }
        };
        let attributor = SamplingAttributor::new(config.explain.sampling.clone())?;

        let service = Self::builder(Arc::new(classifier), schema)
            .vectorizer(vectorizer)
            .background(background)
            .attributor(Arc::new(attributor))
            .threshold(threshold)
            .top_k(config.explain.top_k)
            .build()?;
        info!(
            features = service.schema.len(),
            background = %config.explain.background,
            top_k = service.top_k,
            "Explanation service ready"
        );
        Ok(service)
    }

    /// Load the configured bundle and assemble the service.
    pub fn from_config(config: &GuardianConfig) -> Result<Self> {
        let bundle = ModelBundle::load(&config.model.bundle_path)?;
        Self::from_bundle(bundle, config)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn vectorize(&self, instance: &RawInstance) -> Result<FeatureVector> {
        Ok(self.vectorizer.vectorize(instance)?)
    }

    fn score(&self, vector: &FeatureVector) -> Result<f64> {
        let probs = self.classifier.predict_proba(&[vector.as_slice().to_vec()])?;
        let row = probs.into_iter().next().unwrap_or_default();
        match row.as_slice() {
            [] => Err(ExplanationError::ShapeMismatch {
                message: "classifier returned no probabilities".into(),
            }
            .into()),
            [only] => Ok(*only),
            [_, positive, ..] => Ok(*positive),
        }
    }

    pub fn predict(&self, instance: &RawInstance) -> Result<RiskAssessment> {
        let vector = self.vectorize(instance)?;
        let probability = self.score(&vector)?;
        Ok(RiskAssessment::new(probability, self.threshold))
    }

    /// Explain a vector with the service's `top_k`.
    pub fn explain_vector(&self, vector: &FeatureVector) -> Result<Explanation> {
        self.explain_vector_top(vector, self.top_k)
    }

    /// Explain a vector keeping `k` factors.
    pub fn explain_vector_top(&self, vector: &FeatureVector, k: usize) -> Result<Explanation> {
        // Same width is not enough: names are paired with values by position.
        if vector.schema().names() != self.schema.names() {
            return Err(ExplanationError::SchemaMismatch {
                what: "instance column order",
                expected: self.schema.len(),
                actual: vector.len(),
            }
            .into());
        }
        let attribution = self.attributor.attribute(
            self.classifier.as_ref(),
            &self.schema,
            vector.as_slice(),
            &self.background,
        )?;
        let prediction = attribution.predicted();
        let base_value = attribution.base_value();
        let scores = attribution.scores();

        let ranking = rank(self.schema.names(), &scores, vector.as_slice(), k);
        debug!(
            factors = ranking.factors.len(),
            dropped = ranking.dropped,
            prediction,
            base_value,
            "Explanation ranked"
        );
        Ok(Explanation {
            factors: ranking.factors,
            prediction,
            base_value,
            dropped: ranking.dropped,
        })
    }

    pub fn explain(&self, instance: &RawInstance) -> Result<Explanation> {
        let vector = self.vectorize(instance)?;
        self.explain_vector(&vector)
    }

    pub fn explain_top(&self, instance: &RawInstance, k: usize) -> Result<Explanation> {
        let vector = self.vectorize(instance)?;
        self.explain_vector_top(&vector, k)
    }

    /// Prediction and explanation from a single vectorization.
    pub fn assess(&self, instance: &RawInstance) -> Result<Assessment> {
        self.assess_top(instance, self.top_k)
    }

    pub fn assess_top(&self, instance: &RawInstance, k: usize) -> Result<Assessment> {
        let vector = self.vectorize(instance)?;
        let probability = self
            .score(&vector)
            .map_err(|e| match e {
                GuardianError::Model(e) => GuardianError::Explanation(e.into()),
                other => other,
            })?;
        let explanation = self.explain_vector_top(&vector, k)?;
        Ok(Assessment {
            risk: RiskAssessment::new(probability, self.threshold),
            explanation,
        })
    }
}

/// Median background over every vectorizable row of the reference dataset.
pub fn median_background(vectorizer: &Vectorizer, path: &Path) -> Result<BackgroundReference> {
    let dataset = Dataset::load(path)?;
    let mut vectors = Vec::with_capacity(dataset.len());
    for (i, row) in dataset.rows().iter().enumerate() {
        match vectorizer.vectorize_row(dataset.columns(), row) {
            Ok(v) => vectors.push(v),
            Err(e) => warn!(row = i + 1, error = %e, "Skipping row in background dataset"),
        }
    }
    let background = BackgroundReference::medians(&vectors)?;
    info!(
        path = %path.display(),
        rows = vectors.len(),
        "Median background built"
    );
    Ok(background)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(f64);

    impl Classifier for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn predict_proba(
            &self,
            rows: &[Vec<f64>],
        ) -> std::result::Result<Vec<Vec<f64>>, ModelError> {
            Ok(rows.iter().map(|_| vec![1.0 - self.0, self.0]).collect())
        }
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::from_probability(0.29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.699), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.70), RiskLevel::High);
        assert_eq!(
            RiskAssessment::new(0.7234, 0.5).to_string(),
            "High Risk: 72.3%"
        );
    }

    #[test]
    fn test_label_uses_threshold() {
        assert!(RiskAssessment::new(0.5, 0.5).label);
        assert!(!RiskAssessment::new(0.49, 0.5).label);
        assert!(!RiskAssessment::new(0.6, 0.65).label);
    }

    #[test]
    fn test_predict_constant() {
        let service = ExplanationService::builder(Arc::new(Constant(0.7)), FeatureSchema::ibm_hr())
            .build()
            .unwrap();
        let risk = service.predict(&RawInstance::new()).unwrap();
        assert!((risk.probability - 0.7).abs() < 1e-12);
        assert!(risk.label);
        assert_eq!(risk.level, RiskLevel::High);
    }

    #[test]
    fn test_builder_rejects_bad_threshold_and_foreign_vectorizer() {
        let err = ExplanationService::builder(Arc::new(Constant(0.5)), FeatureSchema::ibm_hr())
            .threshold(1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::error::GuardianError::Model(_)));

        let other = FeatureSchema::new(vec!["Age"]).unwrap();
        let map = crate::vectorizer::AttributeMap {
            numeric: vec![crate::vectorizer::NumericField {
                attribute: "Age".into(),
                column: "Age".into(),
                default: 30.0,
            }],
            categorical: Vec::new(),
        };
        let vectorizer = Vectorizer::new(other, &map, UnknownPolicy::Ignore).unwrap();
        let err = ExplanationService::builder(Arc::new(Constant(0.5)), FeatureSchema::ibm_hr())
            .vectorizer(vectorizer)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::GuardianError::Explanation(ExplanationError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_statements_match_factor_display() {
        let explanation = Explanation {
            factors: vec![RankedFactor::new("OverTime_Yes", 1.0, 0.2)],
            prediction: 0.7,
            base_value: 0.5,
            dropped: 0,
        };
        assert_eq!(
            explanation.statements(),
            vec!["OverTime_Yes (Value: 1) increases risk"]
        );
    }
}
