//! Resilient chat-completion source for the AI assistant.
//!
//! The chat pipeline calls an OpenAI-compatible completions endpoint through
//! the same orchestration as the rate sources: one long-lived breaker guards
//! the provider, each request runs as a short-lived source value around it.
//! When the provider is down the caller receives a canned degraded reply,
//! never a raw error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use cambio_resilience::{
    CircuitBreaker, HealthRegistry, ResilientSource, SourceAdapter, SourceConfig, SourceError,
    SourceResult,
};

use crate::transport::{check_status, into_source_error};

const DEGRADED_REPLY: &str = "I can't reach the assistant service right now. \
     Please try again in a moment; your financial data is unaffected.";

/// One message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request sent to the completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Response body of the completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    pub content: Option<String>,
}

impl ChatResponse {
    /// Content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

/// Reply handed to the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
    /// True when this is a fallback, not a live model answer.
    pub degraded: bool,
}

/// Transport seam over the completions endpoint.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, SourceError>;
}

/// `reqwest`-backed transport for OpenAI-compatible providers.
pub struct HttpChatTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
}

impl HttpChatTransport {
    /// Create a transport against the given base URL (without the
    /// `/chat/completions` suffix).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(8),
        }
    }

    /// Override the per-attempt request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, SourceError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(into_source_error)?;

        check_status(&response)?;
        response.json().await.map_err(into_source_error)
    }
}

/// Adapter for one chat request; built per call around the shared breaker.
struct ChatRequestAdapter {
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
    name: String,
}

#[async_trait]
impl SourceAdapter for ChatRequestAdapter {
    type Raw = ChatResponse;
    type Parsed = String;
    type Output = ChatReply;

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<ChatResponse, SourceError> {
        self.transport.complete(&self.request).await
    }

    fn parse(&self, raw: ChatResponse) -> Result<String, SourceError> {
        raw.content()
            .map(str::to_string)
            .ok_or_else(|| SourceError::Parse("response carried no choices".into()))
    }

    fn validate(&self, parsed: &String) -> Result<(), SourceError> {
        if parsed.trim().is_empty() {
            Err(SourceError::Validation("empty assistant reply".into()))
        } else {
            Ok(())
        }
    }

    fn transform(&self, parsed: String) -> ChatReply {
        ChatReply {
            content: parsed,
            degraded: false,
        }
    }

    fn fallback(&self, _error: &SourceError) -> Option<ChatReply> {
        Some(ChatReply {
            content: DEGRADED_REPLY.to_string(),
            degraded: true,
        })
    }
}

/// Chat entry point used by the AI pipeline.
pub struct ChatAssistant {
    transport: Arc<dyn ChatTransport>,
    config: SourceConfig,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<HealthRegistry>,
    model: String,
    system_prompt: String,
}

impl ChatAssistant {
    /// Create the assistant and register its source for health tracking.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        config: SourceConfig,
        registry: Arc<HealthRegistry>,
        model: impl Into<String>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.name.as_str(),
            config.breaker.clone(),
        ));
        registry.register(config.name.as_str(), breaker.clone());

        Self {
            transport,
            config,
            breaker,
            registry,
            model: model.into(),
            system_prompt: "You are a personal-finance assistant. Answer briefly and \
                            only from the user's own data."
                .to_string(),
        }
    }

    /// Override the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// The breaker guarding the chat provider.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Ask the assistant one question.
    ///
    /// Always resolves to a result envelope; when the provider is failing
    /// the reply is the canned degraded answer with `degraded: true`.
    pub async fn ask(&self, prompt: &str) -> SourceResult<ChatReply> {
        let adapter = ChatRequestAdapter {
            transport: self.transport.clone(),
            request: ChatRequest {
                model: self.model.clone(),
                messages: vec![
                    ChatMessage::system(&self.system_prompt),
                    ChatMessage::user(prompt),
                ],
                temperature: Some(0.3),
                max_tokens: Some(1024),
            },
            name: self.config.name.clone(),
        };

        ResilientSource::with_breaker(
            adapter,
            self.config.clone(),
            self.breaker.clone(),
            self.registry.clone(),
        )
        .scrape()
        .await
    }
}
