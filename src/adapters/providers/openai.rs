//! OpenAI Chat Completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{missing_key, status_error, transport_error};
use crate::domain::errors::ProviderError;
use crate::domain::ports::{AiProvider, CompletionRequest, CompletionResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

pub struct OpenAiProvider {
    name: String,
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(name: impl Into<String>, client: Client, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| missing_key(&self.name))?;

        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage { role: "system", content: &request.system });
        }
        messages.push(ChatMessage { role: "user", content: &request.user });

        let body = ChatRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .timeout(request.deadline)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(format!("failed to parse response: {}", e)))?;

        let (input_tokens, output_tokens) =
            parsed.usage.as_ref().map_or((0, 0), |u| (u.prompt_tokens, u.completion_tokens));

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty());

        match text {
            Some(text) => Ok(CompletionResponse { text, input_tokens, output_tokens }),
            None => {
                let mut err = ProviderError::malformed("response contained no choices");
                err.tokens_used = Some(input_tokens + output_tokens);
                Err(err)
            }
        }
    }
}
