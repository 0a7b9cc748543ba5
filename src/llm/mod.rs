//! LLM integration for edge evaluation.
//!
//! Defines the `EdgeEvaluator` trait and provides two implementations:
//! OpenRouter (primary + fallback model) and Gemini (direct). Both share
//! one prompt and one strict parser in [`prompt`].

pub mod gemini;
pub mod openrouter;
pub mod prompt;

use async_trait::async_trait;

use crate::types::{EvaluationResult, MarketSnapshot};

/// Abstraction over LLM edge judges.
///
/// Implementors never return a bare error: transport failures become
/// `ProviderError` and unusable answers become `ParseError`.
#[async_trait]
pub trait EdgeEvaluator: Send + Sync {
    /// Judge whether `market` is mispriced. `context` is optional external
    /// information (news, stats) appended to the prompt.
    async fn evaluate(&self, market: &MarketSnapshot, context: Option<&str>) -> EvaluationResult;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}
