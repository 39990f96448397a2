//! AI provider port.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::ProviderError;

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Deadline the adapter should apply to its HTTP request.
    pub deadline: Duration,
}

/// Provider output with token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl CompletionResponse {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Capability shared by every AI provider. The fallback chain only talks
/// to providers through this trait.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Registry name of the provider, e.g. `openai`.
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}
