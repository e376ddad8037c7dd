//! Hugging Face Inference API integration.
//!
//! Implements `RiskAnalyzer` against a text-generation endpoint that takes
//! `{"inputs": prompt}` and answers with either a single
//! `{"generated_text": ...}` object or a list whose first element carries it.
//! Any echo of the prompt at the start of the generated text is stripped.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::prompt::build_analysis_prompt;
use super::RiskAnalyzer;
use crate::config::{InferenceConfig, RetryConfig};
use crate::types::{ForecastBundle, ReportError};

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Many(Vec<Generation>),
    One(Generation),
}

#[derive(Debug, Deserialize)]
struct Generation {
    #[serde(default)]
    generated_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HuggingFaceClient {
    http: Client,
    url: String,
    model: String,
    api_key: SecretString,
    max_new_tokens: u32,
    retry: RetryConfig,
}

impl HuggingFaceClient {
    pub fn new(config: &InferenceConfig, api_key: SecretString, retry: RetryConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build inference HTTP client")?;

        Ok(Self {
            http,
            url: config.url.clone(),
            model: Self::model_from_url(&config.url),
            api_key,
            max_new_tokens: config.max_new_tokens,
            retry,
        })
    }

    /// `.../models/Org/Name` → `Org/Name`; otherwise the last path segment.
    fn model_from_url(url: &str) -> String {
        let trimmed = url.trim_end_matches('/');
        match trimmed.split_once("/models/") {
            Some((_, model)) => model.to_string(),
            None => trimmed.rsplit('/').next().unwrap_or(trimmed).to_string(),
        }
    }

    /// POST the prompt, retrying rate limits and server errors per policy.
    async fn call_api(&self, prompt: &str) -> Result<String> {
        let request = InferenceRequest {
            inputs: prompt,
            parameters: InferenceParameters {
                max_new_tokens: self.max_new_tokens,
                return_full_text: false,
            },
        };

        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_before(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying inference call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.text().await.context("Failed to read inference response");
                    }

                    // 503 is also what the endpoint returns while a model is loading.
                    let error_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = %status, attempt, error = %error_text, "Retryable inference error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    bail!("Inference API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Inference request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        bail!(
            "Inference API failed after {} attempt(s): {}",
            self.retry.max_attempts,
            last_error.unwrap_or_default()
        )
    }

    /// Pull the generated text out of a response body and strip the prompt echo.
    pub fn extract_generated_text(body: &str, prompt: &str) -> Result<String> {
        let parsed: InferenceResponse =
            serde_json::from_str(body).context("Unexpected inference response shape")?;

        let generated = match parsed {
            InferenceResponse::Many(items) => items.into_iter().next().and_then(|g| g.generated_text),
            InferenceResponse::One(g) => g.generated_text,
        }
        .context("Response contains no generated_text")?;

        let text = strip_prompt_echo(&generated, prompt);
        if text.is_empty() {
            bail!("Generated text is empty");
        }
        Ok(text.to_string())
    }
}

/// Remove a leading copy of the prompt and surrounding whitespace.
fn strip_prompt_echo<'a>(text: &'a str, prompt: &str) -> &'a str {
    let text = text.trim_start();
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return text.trim();
    }
    text.strip_prefix(prompt).unwrap_or(text).trim()
}

#[async_trait]
impl RiskAnalyzer for HuggingFaceClient {
    async fn analyze(&self, bundle: &ForecastBundle) -> Result<String, ReportError> {
        let prompt = build_analysis_prompt(bundle);

        debug!(
            location = %bundle.location.name,
            model = %self.model,
            prompt_chars = prompt.len(),
            "Requesting flood risk analysis"
        );

        let body = self
            .call_api(&prompt)
            .await
            .map_err(|e| ReportError::AnalysisUnavailable(format!("{e:#}")))?;

        let text = Self::extract_generated_text(&body, &prompt)
            .map_err(|e| ReportError::AnalysisUnavailable(format!("{e:#}")))?;

        info!(
            location = %bundle.location.name,
            model = %self.model,
            response_chars = text.len(),
            "Analysis received"
        );

        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
