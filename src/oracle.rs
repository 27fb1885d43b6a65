//! Hosted LLM consulted to interpret extracted section text.
//!
//! The oracle is fallible and non-deterministic. Callers treat every error as a
//! signal to fall back to local heuristics.

use crate::config::{OracleConfig, OracleCredentials};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("oracle disabled: {0}")]
    Disabled(String),

    #[error("oracle request timed out after {0}s")]
    Timeout(u64),

    #[error("oracle rejected credentials (HTTP {0})")]
    Auth(u16),

    #[error("oracle quota exhausted")]
    Quota,

    #[error("oracle returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle returned no text")]
    EmptyResponse,
}

/// A text-completion backend.
#[allow(async_fn_in_trait)]
pub trait Oracle {
    fn name(&self) -> &str;

    /// False when no backend is configured; the deriver then skips the oracle entirely.
    fn is_available(&self) -> bool;

    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    timeout_secs: u64,
}

impl GeminiOracle {
    pub fn new(config: &OracleConfig, credentials: OracleCredentials) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: credentials.model,
            api_key: credentials.api_key,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl Oracle for GeminiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        });

        debug!("Sending {} prompt chars to {}", prompt.chars().count(), self.model);

        let response = self
            .client
            .post(self.request_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout_secs)
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(match code {
                401 | 403 => OracleError::Auth(code),
                429 => OracleError::Quota,
                _ => OracleError::Http {
                    status: code,
                    body: text.chars().take(200).collect(),
                },
            });
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.timeout_secs)
            } else {
                OracleError::Transport(format!("invalid response body: {}", e))
            }
        })?;

        extract_candidate_text(&payload).ok_or(OracleError::EmptyResponse)
    }
}

/// Concatenated text parts of the first candidate.
fn extract_candidate_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// The oracle actually used for a run.
pub enum OracleBackend {
    Gemini(GeminiOracle),
    Disabled { reason: String },
}

impl OracleBackend {
    /// Build from configuration. Missing credentials disable the oracle instead of failing.
    pub fn from_config(config: &OracleConfig, model_override: Option<&str>, force_disabled: bool) -> Self {
        if force_disabled {
            return Self::disabled("disabled on the command line");
        }
        if !config.enabled {
            return Self::disabled("disabled in configuration");
        }

        let Some(mut credentials) = config.resolve_credentials() else {
            warn!(
                "No oracle API key found in ${} or {}; using local heuristics only",
                config.api_key_env, config.env_file
            );
            return Self::disabled("no API key configured");
        };
        if let Some(model) = model_override {
            credentials.model = model.to_string();
        }

        match GeminiOracle::new(config, credentials) {
            Ok(oracle) => Self::Gemini(oracle),
            Err(e) => {
                warn!("Failed to initialize oracle client: {}", e);
                Self::disabled("client initialization failed")
            }
        }
    }

    pub fn disabled(reason: &str) -> Self {
        Self::Disabled {
            reason: reason.to_string(),
        }
    }
}

impl Oracle for OracleBackend {
    fn name(&self) -> &str {
        match self {
            OracleBackend::Gemini(g) => g.name(),
            OracleBackend::Disabled { .. } => "disabled",
        }
    }

    fn is_available(&self) -> bool {
        matches!(self, OracleBackend::Gemini(_))
    }

    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        match self {
            OracleBackend::Gemini(g) => g.complete(prompt).await,
            OracleBackend::Disabled { reason } => Err(OracleError::Disabled(reason.clone())),
        }
    }
}

/// Structured answer requested from the oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleAnswer {
    pub value: String,
    pub justification: String,
    pub confidence: Option<String>,
}

/// Remove a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse a JSON answer. Returns `None` when the response is not an object with a usable `value`.
pub fn parse_oracle_answer(raw: &str) -> Option<OracleAnswer> {
    let parsed: Value = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let obj = parsed.as_object()?;

    let value = match obj.get("value")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if value.is_empty() {
        return None;
    }

    let justification = obj
        .get("justification")
        .or_else(|| obj.get("reasoning"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let confidence = obj
        .get("confidence")
        .and_then(Value::as_str)
        .map(|c| c.trim().to_lowercase());

    Some(OracleAnswer {
        value,
        justification,
        confidence,
    })
}
