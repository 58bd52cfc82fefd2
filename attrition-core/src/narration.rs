//! Narration agent: turns ranked factors into a short natural-language
//! summary and answers follow-up questions about one employee.
//!
//! Two backends are available. [`MockNarrator`] renders fixed templates
//! and never touches the network. [`LlmNarrator`] calls an
//! OpenAI-compatible `/chat/completions` endpoint (Groq by default).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{NarrationConfig, NarrationMode};
use crate::error::NarrationError;
use crate::vectorizer::RawInstance;

/// Input to [`Narrator::narrate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationRequest {
    /// Display identifier of the employee.
    pub employee: String,
    /// Attrition risk in percent (0-100).
    pub risk_percent: f64,
    /// Factor display strings, most important first.
    pub factors: Vec<String>,
}

impl NarrationRequest {
    /// Factor names without the `(Value: ...)` suffix.
    pub fn factor_names(&self) -> Vec<&str> {
        self.factors
            .iter()
            .map(|f| f.split(" (").next().unwrap_or(f).trim())
            .collect()
    }
}

/// Ordered key/value description of an employee used as chat context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    entries: Vec<(String, String)>,
}

impl EmployeeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.push((key.into(), value.to_string()));
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `- key: value` line per entry.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("- {}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<&RawInstance> for EmployeeProfile {
    fn from(instance: &RawInstance) -> Self {
        instance
            .iter()
            .fold(Self::new(), |profile, (k, v)| profile.with(k, v))
    }
}

/// A narration backend.
#[async_trait]
pub trait Narrator: Send + Sync {
    fn name(&self) -> &str;

    /// Summarize an explanation. Never fails: backends fall back to the
    /// templated text.
    async fn narrate(&self, request: &NarrationRequest) -> String;

    /// Answer a manager's question about one employee.
    async fn chat(&self, question: &str, profile: &EmployeeProfile)
    -> Result<String, NarrationError>;
}

/// Templated narration used offline and as the fallback.
pub fn mock_narration(request: &NarrationRequest) -> String {
    format!(
        "[MOCK] Analysis for {}: Risk is {:.1}%. Please check factors.",
        request.employee, request.risk_percent
    )
}

pub const MOCK_CHAT_RESPONSE: &str = "This is a mock chat response. Please enable Real AI mode.";

/// Offline narrator.
#[derive(Debug, Clone, Default)]
pub struct MockNarrator;

#[async_trait]
impl Narrator for MockNarrator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn narrate(&self, request: &NarrationRequest) -> String {
        mock_narration(request)
    }

    async fn chat(
        &self,
        _question: &str,
        _profile: &EmployeeProfile,
    ) -> Result<String, NarrationError> {
        Ok(MOCK_CHAT_RESPONSE.to_string())
    }
}

/// Narrator backed by an OpenAI-compatible chat completions API.
pub struct LlmNarrator {
    client: Client,
    provider: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<usize>,
    timeout_secs: u64,
}

impl LlmNarrator {
    /// Create a narrator from configuration.
    ///
    /// Reads the API key from the environment variable named in `config.api_key_env`.
    pub fn new(config: &NarrationConfig) -> Result<Self, NarrationError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| NarrationError::AuthFailed {
                provider: format!("{}: env var '{}' not set", config.provider, config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    pub fn new_with_key(config: &NarrationConfig, api_key: String) -> Result<Self, NarrationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NarrationError::ApiRequest {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            provider: config.provider.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn narration_prompt(request: &NarrationRequest) -> String {
        format!(
            "You are an expert HR Data Scientist. Analyze the employee data.\n\
             \n\
             DATA:\n\
             - Employee: {}\n\
             - Attrition Risk: {:.1}%\n\
             - Top Risk Factors: {}\n\
             \n\
             INSTRUCTIONS:\n\
             1. Explain the primary reason for the risk.\n\
             2. Suggest one actionable retention strategy.\n\
             3. Be concise (max 3 sentences).",
            request.employee,
            request.risk_percent,
            request.factor_names().join(", ")
        )
    }

    fn chat_prompt(question: &str, profile: &EmployeeProfile) -> String {
        format!(
            "You are an HR Consultant assisting a manager.\n\
             You have the following profile for the employee under review:\n\
             \n\
             EMPLOYEE PROFILE:\n\
             {}\n\
             \n\
             MANAGER'S QUESTION:\n\
             {}\n\
             \n\
             INSTRUCTIONS:\n\
             - Answer based strictly on the profile data and general HR best practices.\n\
             - Be helpful, professional, and concise.",
            profile.render(),
            question
        )
    }

    fn parse_response(body: &Value) -> Result<String, NarrationError> {
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| NarrationError::ResponseParse {
                message: "No message content in response".to_string(),
            })?;
        Ok(content.trim().to_string())
    }

    /// Map an HTTP status code to the appropriate NarrationError.
    fn map_http_error(&self, status: reqwest::StatusCode, body: &str) -> NarrationError {
        match status.as_u16() {
            401 => {
                debug!(body = %body, "Authentication failed (401)");
                NarrationError::AuthFailed {
                    provider: self.provider.clone(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 7s"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .map(|s| s.trim().trim_end_matches('.').trim_end_matches('s'))
                            .and_then(|s| s.parse::<f64>().ok())
                    })
                    .map(|secs| secs.ceil() as u64)
                    .unwrap_or(5);
                NarrationError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => NarrationError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => NarrationError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    async fn complete(&self, prompt: String) -> Result<String, NarrationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        debug!(url = %url, model = %self.model, "Sending narration request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NarrationError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    NarrationError::ApiRequest {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| NarrationError::ApiRequest {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(self.map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| NarrationError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;
        Self::parse_response(&json)
    }
}

#[async_trait]
impl Narrator for LlmNarrator {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn narrate(&self, request: &NarrationRequest) -> String {
        match self.complete(Self::narration_prompt(request)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, provider = %self.provider, "Narration failed, using template");
                mock_narration(request)
            }
        }
    }

    async fn chat(
        &self,
        question: &str,
        profile: &EmployeeProfile,
    ) -> Result<String, NarrationError> {
        self.complete(Self::chat_prompt(question, profile)).await
    }
}

/// Select the narration backend. A missing API key degrades to the mock.
pub fn build_narrator(config: &NarrationConfig) -> Arc<dyn Narrator> {
    for warning in config.validate() {
        warn!(warning = %warning, "Narration config");
    }
    match config.mode {
        NarrationMode::Mock => Arc::new(MockNarrator),
        NarrationMode::Llm => match LlmNarrator::new(config) {
            Ok(narrator) => {
                debug!(provider = %config.provider, model = %config.model, "LLM narrator ready");
                Arc::new(narrator)
            }
            Err(e) => {
                warn!(error = %e, "LLM narrator unavailable, switching to mock mode");
                Arc::new(MockNarrator)
            }
        },
    }
}
