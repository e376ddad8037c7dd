//! LLM integration for flood-risk analysis.
//!
//! Defines the `RiskAnalyzer` trait, the pure prompt builder, the strict
//! response parser, and the Hugging Face inference client.

pub mod huggingface;
pub mod parser;
pub mod prompt;

use async_trait::async_trait;

use crate::types::{ForecastBundle, ReportError};

/// Abstraction over text-generation endpoints.
///
/// Implementors turn a forecast into raw generated text. Validation of
/// that text is the parser's job, not the analyzer's.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskAnalyzer: Send + Sync {
    /// Submit the analysis prompt for `bundle` and return the generated text.
    async fn analyze(&self, bundle: &ForecastBundle) -> Result<String, ReportError>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}
