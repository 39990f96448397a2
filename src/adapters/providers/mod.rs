//! AI provider adapters.
//!
//! Each adapter speaks one vendor API and maps its failures onto
//! [`ProviderErrorKind`]. [`build_registry`] wires the configured backends
//! into a [`ProviderRegistry`].

pub mod anthropic;
pub mod mock;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

pub use anthropic::AnthropicProvider;
pub use mock::{ScriptedProvider, ScriptedReply};
pub use openai::OpenAiProvider;

use crate::domain::errors::{DomainError, DomainResult, ProviderError, ProviderErrorKind};
use crate::domain::models::{ProviderKind, ProvidersConfig};
use crate::domain::ports::AiProvider;
use crate::services::provider_gateway::ProviderRegistry;

/// Shared HTTP client for provider adapters. Per-call deadlines come from
/// each request, so only the connect timeout is fixed here.
pub fn http_client() -> DomainResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| DomainError::ConfigurationError(format!("Failed to create HTTP client: {}", e)))
}

/// Register every configured backend. Backends without an API key are
/// still registered; their calls fail with an authentication error.
pub fn build_registry(config: &ProvidersConfig, client: &Client) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (name, settings) in &config.backends {
        let api_key = settings.api_key.clone().or_else(|| {
            let var = match settings.kind {
                ProviderKind::Openai => "OPENAI_API_KEY",
                ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            };
            std::env::var(var).ok()
        });
        if api_key.is_none() {
            warn!(provider = %name, "no API key configured");
        }

        let provider: Arc<dyn AiProvider> = match settings.kind {
            ProviderKind::Openai => Arc::new(OpenAiProvider::new(
                name.clone(),
                client.clone(),
                api_key,
                settings.base_url.clone(),
            )),
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
                name.clone(),
                client.clone(),
                api_key,
                settings.base_url.clone(),
            )),
        };
        registry.register(provider, settings.clone());
        info!(provider = %name, kind = ?settings.kind, model = %settings.default_model, "provider registered");
    }
    registry
}

/// Map a transport-level failure.
pub(crate) fn transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else if err.is_connect() {
        ProviderError::unavailable(err.to_string())
    } else {
        ProviderError::new(ProviderErrorKind::Transport, err.to_string())
    }
}

/// Turn a non-success response into a classified error.
pub(crate) async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    ProviderError::from_status(status, body)
}

pub(crate) fn missing_key(provider: &str) -> ProviderError {
    ProviderError::new(ProviderErrorKind::Authentication, format!("no API key configured for {}", provider))
}
