//! Provider calls. The engine only depends on [`ProviderClient`]; the HTTP
//! implementation speaks the minimal chat shape of each provider family.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::classifier::RawError;
use crate::types::config::ProviderType;
use crate::types::credential::ProviderCredential;

/// Upper bound on how much of an error body is kept as the failure message.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.into(),
            }],
            max_tokens: 4000,
            temperature: 0.7,
        }
    }

    /// Smallest possible completion, used to check that a key is accepted.
    pub fn verification() -> Self {
        Self {
            max_tokens: 1,
            ..Self::prompt("test")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub provider_name: String,
    pub model: String,
    pub text: String,
    pub latency_ms: u64,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// One attempt against one credential. Must respect `cred.timeout_ms`.
    async fn complete(
        &self,
        cred: &ProviderCredential,
        request: &CompletionRequest,
    ) -> Result<String, RawError>;

    /// Cheapest call that proves the credential is accepted. Defaults to a
    /// one-token completion.
    async fn verify(&self, cred: &ProviderCredential) -> Result<(), RawError> {
        self.complete(cred, &CompletionRequest::verification())
            .await
            .map(|_| ())
    }
}

pub struct HttpProviderClient {
    http: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn complete(
        &self,
        cred: &ProviderCredential,
        request: &CompletionRequest,
    ) -> Result<String, RawError> {
        let body = request_body(cred, request);
        let builder = match cred.provider_type {
            ProviderType::Anthropic => self
                .http
                .post(&cred.endpoint)
                .header("x-api-key", &cred.secret)
                .header("anthropic-version", "2023-06-01"),
            ProviderType::Openai => self.http.post(&cred.endpoint).bearer_auth(&cred.secret),
            ProviderType::Google => self
                .http
                .post(format!("{}/{}:generateContent", cred.endpoint, cred.model_hint))
                .query(&[("key", cred.secret.as_str())]),
        };

        let response = builder
            .timeout(Duration::from_millis(cred.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RawError::status(status.as_u16(), truncate(&text, MAX_ERROR_BODY)));
        }

        let value: Value = response.json().await.map_err(transport_error)?;
        extract_text(cred.provider_type, &value).ok_or_else(|| {
            RawError::message(format!(
                "Unexpected {} response shape",
                cred.provider_name
            ))
        })
    }

    /// OpenAI and Google expose a free model listing; Anthropic needs a
    /// one-token message, where a 400 still means the key was accepted.
    async fn verify(&self, cred: &ProviderCredential) -> Result<(), RawError> {
        let builder = match cred.provider_type {
            ProviderType::Anthropic => self
                .http
                .post(&cred.endpoint)
                .header("x-api-key", &cred.secret)
                .header("anthropic-version", "2023-06-01")
                .json(&request_body(cred, &CompletionRequest::verification())),
            ProviderType::Openai => self
                .http
                .get(models_url(&cred.endpoint))
                .bearer_auth(&cred.secret),
            ProviderType::Google => self
                .http
                .get(&cred.endpoint)
                .query(&[("key", cred.secret.as_str())]),
        };

        let response = builder
            .timeout(Duration::from_millis(cred.timeout_ms))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success()
            || (cred.provider_type == ProviderType::Anthropic && status.as_u16() == 400)
        {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(RawError::status(status.as_u16(), truncate(&text, MAX_ERROR_BODY)))
    }
}

/// `.../v1/chat/completions` to `.../v1/models`.
fn models_url(endpoint: &str) -> String {
    match endpoint.rfind("/chat/completions") {
        Some(idx) => format!("{}/models", &endpoint[..idx]),
        None => endpoint.to_string(),
    }
}

fn transport_error(e: reqwest::Error) -> RawError {
    if e.is_timeout() || e.is_connect() {
        RawError::timeout(e.to_string())
    } else if let Some(status) = e.status() {
        RawError::status(status.as_u16(), e.to_string())
    } else {
        RawError::message(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub fn request_body(cred: &ProviderCredential, request: &CompletionRequest) -> Value {
    match cred.provider_type {
        ProviderType::Anthropic => json!({
            "model": cred.model_hint,
            "max_tokens": request.max_tokens.min(4096),
            "messages": request.messages,
        }),
        ProviderType::Openai => json!({
            "model": cred.model_hint,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        }),
        ProviderType::Google => {
            let text = request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            json!({ "contents": [{ "parts": [{ "text": text }] }] })
        }
    }
}

pub fn extract_text(provider_type: ProviderType, value: &Value) -> Option<String> {
    let text = match provider_type {
        ProviderType::Anthropic => value.pointer("/content/0/text"),
        ProviderType::Openai => value.pointer("/choices/0/message/content"),
        ProviderType::Google => value.pointer("/candidates/0/content/parts/0/text"),
    };
    text.and_then(|t| t.as_str()).map(String::from)
}
