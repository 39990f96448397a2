//! Scripted AI provider for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::errors::{ProviderError, ProviderErrorKind};
use crate::domain::ports::{AiProvider, CompletionRequest, CompletionResponse};

/// Well-formed analysis returned when nothing else is scripted.
pub const DEFAULT_ANALYSIS: &str = r#"{
  "analysis": "Steady delivery with small, focused commits.",
  "key_insights": ["Commits are small and frequent", "Most work lands on weekdays"],
  "recommendations": ["Add tests alongside feature commits"]
}"#;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    /// Output text or the error to return
    pub result: Result<String, ProviderErrorKind>,
    /// Simulated latency before replying
    pub delay: Duration,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ScriptedReply {
    pub fn text(output: impl Into<String>) -> Self {
        Self { result: Ok(output.into()), delay: Duration::ZERO, input_tokens: 100, output_tokens: 50 }
    }

    pub fn delayed_text(output: impl Into<String>, delay: Duration) -> Self {
        Self { delay, ..Self::text(output) }
    }

    pub fn error(kind: ProviderErrorKind) -> Self {
        Self { result: Err(kind), delay: Duration::ZERO, input_tokens: 0, output_tokens: 0 }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Provider that replays a script of replies, then repeats a fallback reply.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: ScriptedReply::text(DEFAULT_ANALYSIS),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Queue a reply.
    pub fn then(self, reply: ScriptedReply) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
        self
    }

    /// Reply used once the script is exhausted.
    pub fn repeat(mut self, reply: ScriptedReply) -> Self {
        self.fallback = reply;
        self
    }

    /// Number of completion calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request);
        }

        let reply = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        match reply.result {
            Ok(text) => Ok(CompletionResponse {
                text,
                input_tokens: reply.input_tokens,
                output_tokens: reply.output_tokens,
            }),
            Err(kind) => Err(ProviderError::new(kind, format!("scripted {} failure", kind.as_str()))),
        }
    }
}
