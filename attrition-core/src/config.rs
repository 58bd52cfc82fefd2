//! Configuration system for Attrition Guard.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/attrition-guard/config.toml` and/or
//! `.attrition/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::attribution::SamplingConfig;
use crate::error::ConfigError;
use crate::vectorizer::UnknownPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub model: ModelConfig,
    pub vectorizer: VectorizerConfig,
    pub explain: ExplainConfig,
    pub narration: NarrationConfig,
    pub drift: DriftConfig,
}

/// Where the trained model bundle lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the JSON bundle `{model, features, threshold}`.
    pub bundle_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            bundle_path: PathBuf::from("models/attrition_bundle.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizerConfig {
    /// Handling of attributes and categorical levels outside the mapping.
    pub unknown_policy: UnknownPolicy,
}

/// Baseline used by the attribution engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    /// A single all-zeros row.
    #[default]
    Zeros,
    /// Per-column medians of the vectorized reference dataset.
    Medians,
}

impl std::fmt::Display for BackgroundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackgroundKind::Zeros => write!(f, "zeros"),
            BackgroundKind::Medians => write!(f, "medians"),
        }
    }
}

/// Explanation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Number of factors returned.
    pub top_k: usize,
    pub background: BackgroundKind,
    /// Dataset for the median background. Falls back to `drift.reference_dataset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_dataset: Option<PathBuf>,
    pub sampling: SamplingConfig,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            background: BackgroundKind::Zeros,
            background_dataset: None,
            sampling: SamplingConfig::default(),
        }
    }
}

/// Narration backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationMode {
    /// Templated text, no network.
    #[default]
    Mock,
    /// OpenAI-compatible chat completions endpoint.
    Llm,
}

impl std::fmt::Display for NarrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NarrationMode::Mock => write!(f, "mock"),
            NarrationMode::Llm => write!(f, "llm"),
        }
    }
}

/// Narration agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub mode: NarrationMode,
    /// Provider name, used in logs and auth errors.
    pub provider: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    pub timeout_secs: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            mode: NarrationMode::Mock,
            provider: "groq".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: None,
            timeout_secs: 60,
        }
    }
}

impl NarrationConfig {
    /// Validate this config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("timeout_secs is 0; every request will time out".to_string());
        }
        warnings
    }
}

/// Drift monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Reference (training) dataset in CSV form.
    pub reference_dataset: PathBuf,
    /// Numeric columns drift when the KS p-value is below this.
    pub ks_p_value_threshold: f64,
    /// Categorical columns drift when the Jensen-Shannon distance reaches this.
    pub jensen_shannon_threshold: f64,
    /// Dataset drift when at least this share of columns drifted.
    pub drift_share: f64,
    /// Target column, never tested.
    pub target_column: String,
    /// Constant or identifier columns skipped by the monitor.
    pub drop_columns: Vec<String>,
    /// Rows sampled by `drift --simulate`.
    pub simulate_rows: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            reference_dataset: PathBuf::from("data/WA_Fn-UseC_-HR-Employee-Attrition.csv"),
            ks_p_value_threshold: 0.05,
            jensen_shannon_threshold: 0.1,
            drift_share: 0.5,
            target_column: "Attrition".to_string(),
            drop_columns: ["EmployeeCount", "Over18", "StandardHours", "EmployeeNumber"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            simulate_rows: 300,
        }
    }
}

impl DriftConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.ks_p_value_threshold)
            || !in_unit(self.jensen_shannon_threshold)
            || !in_unit(self.drift_share)
        {
            return Err(ConfigError::Invalid {
                message: "drift thresholds must lie in [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "attrition-guard", "attrition-guard")
}

/// Workspace-level config file location.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".attrition").join("config.toml")
}

/// Load configuration by merging defaults, config files, and environment variables.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ATTRITION_`)
/// 3. Workspace-local config (`.attrition/config.toml`)
/// 4. User config (`~/.config/attrition-guard/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&GuardianConfig>,
) -> Result<GuardianConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(GuardianConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // ATTRITION_EXPLAIN__TOP_K, ATTRITION_NARRATION__MODE, ...
    figment = figment.merge(Env::prefixed("ATTRITION_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs()
        && dirs.config_dir().join("config.toml").exists()
    {
        return true;
    }

    if let Some(ws) = workspace
        && workspace_config_path(ws).exists()
    {
        return true;
    }

    false
}

/// Write the default configuration to `.attrition/config.toml`.
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn init_workspace_config(workspace: &Path, force: bool) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() && !force {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    let content = toml::to_string_pretty(&GuardianConfig::default()).map_err(|e| {
        ConfigError::ParseError {
            message: e.to_string(),
        }
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid {
            message: format!("{}: {}", parent.display(), e),
        })?;
    }
    std::fs::write(&path, content).map_err(|e| ConfigError::Invalid {
        message: format!("{}: {}", path.display(), e),
    })?;
    Ok(path)
}
