//! Error types for the Attrition Guard core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering model loading, vectorization, explanation, narration, drift
//! monitoring and configuration.

use std::path::PathBuf;

/// Top-level error type for the Attrition Guard core library.
#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Vectorization error: {0}")]
    Vectorize(#[from] VectorizeError),

    #[error("Explanation error: {0}")]
    Explanation(#[from] ExplanationError),

    #[error("Narration error: {0}")]
    Narration(#[from] NarrationError),

    #[error("Drift error: {0}")]
    Drift(#[from] DriftError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from loading the model bundle or running the classifier.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model bundle not found at {path}")]
    NotFound { path: PathBuf },

    #[error("Model bundle at {path} is empty")]
    EmptyBundle { path: PathBuf },

    #[error("Model bundle is corrupt: {message}")]
    Corrupt { message: String },

    #[error("Invalid model: {message}")]
    InvalidModel { message: String },

    #[error("Prediction failed: {message}")]
    Prediction { message: String },
}

/// Errors from mapping raw attributes onto the feature schema.
#[derive(Debug, thiserror::Error)]
pub enum VectorizeError {
    #[error("Unknown attribute: {name}")]
    UnknownAttribute { name: String },

    #[error("Unknown value '{value}' for categorical attribute '{attribute}'")]
    UnknownCategory { attribute: String, value: String },

    #[error("Invalid value for attribute '{attribute}': {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error("Attribute '{attribute}' maps to column '{column}' which is not in the model schema")]
    UnmappedColumn { attribute: String, column: String },
}

/// Errors from the attribution engine and the explanation service.
#[derive(Debug, thiserror::Error)]
pub enum ExplanationError {
    #[error("Schema mismatch for {what}: expected {expected} features, got {actual}")]
    SchemaMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Background reference has no rows")]
    EmptyBackground,

    #[error("Classifier output shape mismatch: {message}")]
    ShapeMismatch { message: String },

    #[error("Invalid sampling configuration: {message}")]
    InvalidSampling { message: String },

    #[error("Classifier failed during explanation: {0}")]
    Classifier(#[from] ModelError),
}

/// Errors from the narration agent.
#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Errors from the drift monitor and dataset loading.
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error("Dataset file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Dataset is empty: {message}")]
    EmptyDataset { message: String },

    #[error("Malformed row {line}: expected {expected} cells, got {actual}")]
    RaggedRow {
        line: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Column not found: {name}")]
    MissingColumn { name: String },

    #[error("Invalid drift configuration: {message}")]
    InvalidConfig { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `GuardianError`.
pub type Result<T> = std::result::Result<T, GuardianError>;
