//! # Attrition Guard Core
//!
//! Core library for Attrition Guard, an employee attrition risk explainer.
//! Provides the feature vectorizer, the model bundle and tree-ensemble
//! classifier, the sampling-based attribution engine, factor ranking, the
//! explanation service, the narration agent, drift monitoring and
//! configuration.
//!
//! Data flow for one explanation:
//!
//! ```text
//! RawInstance -> Vectorizer -> FeatureVector -> Attributor -> Attribution
//!             -> canonicalize -> rank (zip-shortest, top-K) -> RankedFactor list
//! ```

pub mod attribution;
pub mod config;
pub mod dataset;
pub mod drift;
pub mod error;
pub mod model;
pub mod narration;
pub mod ranking;
pub mod schema;
pub mod service;
pub mod vectorizer;

// Re-export commonly used types at the crate root.
pub use attribution::{
    Attribution, AttributionOutput, Attributor, BackgroundReference, SamplingAttributor,
    SamplingConfig,
};
pub use config::{BackgroundKind, GuardianConfig, NarrationMode};
pub use dataset::Dataset;
pub use drift::{DriftMonitor, DriftReport, simulate_shift};
pub use error::{GuardianError, Result};
pub use model::{Classifier, ModelBundle, TreeClassifier, TreeEnsemble};
pub use narration::{EmployeeProfile, MockNarrator, NarrationRequest, Narrator, build_narrator};
pub use ranking::{Direction, RankedFactor};
pub use schema::{FeatureSchema, FeatureVector};
pub use service::{Assessment, Explanation, ExplanationService, RiskAssessment, RiskLevel};
pub use vectorizer::{RawInstance, RawValue, UnknownPolicy, Vectorizer};
