//! Foundation-models completion client.
//!
//! One low-level client covers both call sites: reply generation (long
//! timeout, conversational temperature) and LLM moderation (short timeout,
//! near-deterministic sampling). Non-streaming only.

use crate::engine::traits::Generator;
use crate::error::DependencyError;
use crate::types::{ChatMessage, ChatRole, Credential};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// -- Wire types -------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    #[serde(rename = "modelUri")]
    model_uri: &'a str,
    #[serde(rename = "completionOptions")]
    completion_options: WireOptions,
    messages: Vec<MessagePayload<'a>>,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    stream: bool,
    temperature: f64,
    #[serde(rename = "maxTokens")]
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    role: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Debug, Deserialize)]
struct CompletionResult {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Debug, Deserialize)]
struct AlternativeMessage {
    text: String,
}

// -- Client -----------------------------------------------------------------

/// Sampling options for one completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Low-level completion client.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    completion_url: String,
    folder_id: String,
    http: reqwest::Client,
}

impl CompletionClient {
    pub fn new(
        completion_url: &str,
        folder_id: &str,
        connect_timeout: Duration,
    ) -> Result<Self, DependencyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DependencyError(format!("http client: {e}")))?;
        Ok(Self {
            completion_url: completion_url.to_string(),
            folder_id: folder_id.to_string(),
            http,
        })
    }

    /// Run one completion call and return the first alternative's text.
    ///
    /// Every call carries a correlation id; the service's request id header
    /// is logged for support escalation but never affects the outcome.
    pub async fn complete(
        &self,
        model_uri: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
        credential: &Credential,
        read_timeout: Duration,
    ) -> Result<String, DependencyError> {
        let payloads: Vec<MessagePayload> = messages
            .iter()
            .map(|m| MessagePayload {
                role: match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                text: &m.text,
            })
            .collect();

        let request = CompletionRequest {
            model_uri,
            completion_options: WireOptions {
                stream: false,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            },
            messages: payloads,
        };

        let correlation_id = ulid::Ulid::new().to_string();
        debug!(model_uri, correlation_id, "completion request");

        let resp = self
            .http
            .post(&self.completion_url)
            .timeout(read_timeout)
            .bearer_auth(&credential.token)
            .header("x-folder-id", &self.folder_id)
            .header("x-client-request-id", &correlation_id)
            .json(&request)
            .send()
            .await
            .map_err(|e| DependencyError(format!("completion request: {e}")))?;

        if let Some(request_id) = resp.headers().get("x-request-id") {
            debug!(correlation_id, ?request_id, "completion response headers");
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DependencyError(format!(
                "completion failed ({status}): {body}"
            )));
        }

        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| DependencyError(format!("completion response: {e}")))?;

        body.result
            .alternatives
            .into_iter()
            .next()
            .map(|a| a.message.text)
            .ok_or_else(|| DependencyError("completion returned no alternatives".into()))
    }
}

/// Reply generation over the completion client.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    client: CompletionClient,
    model_uri: String,
    read_timeout: Duration,
}

/// Sampling used for user-facing replies.
const GENERATION_OPTIONS: CompletionOptions = CompletionOptions {
    temperature: 0.6,
    max_tokens: 2000,
};

impl GenerationClient {
    pub fn new(client: CompletionClient, model_uri: &str, read_timeout: Duration) -> Self {
        Self {
            client,
            model_uri: model_uri.to_string(),
            read_timeout,
        }
    }
}

#[async_trait]
impl Generator for GenerationClient {
    async fn generate(
        &self,
        history: &[ChatMessage],
        credential: &Credential,
    ) -> Result<String, DependencyError> {
        self.client
            .complete(
                &self.model_uri,
                history,
                GENERATION_OPTIONS,
                credential,
                self.read_timeout,
            )
            .await
    }
}
