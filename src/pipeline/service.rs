//! Reasoning-service client: one chat-completions call per audit.
//!
//! The call is all-or-nothing and never retried here. Failures are split
//! into [`AuditError::ServiceUnavailable`] (the caller may try again later)
//! and [`AuditError::ServiceRejected`] (the same request will fail again).
//!
//! Two endpoint shapes are supported:
//!
//! | flavor | URL | auth |
//! |---|---|---|
//! | Azure OpenAI | `{endpoint}/openai/deployments/{model}/chat/completions?api-version=..` | `api-key` header |
//! | OpenAI-compatible | `{base}/chat/completions` | `Authorization: Bearer` |

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::model::{AuditRequest, AuditResult, ContentBlock};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Default Azure OpenAI REST API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-12-01-preview";

/// Default OpenAI-compatible base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Longest error-body excerpt carried into an error message.
const ERROR_BODY_EXCERPT: usize = 300;

#[async_trait]
pub trait AuditService: Send + Sync {
    /// Submit the request and wait for the complete answer.
    async fn complete(&self, request: &AuditRequest) -> Result<AuditResult, AuditError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flavor {
    Azure { endpoint: String, api_version: String },
    OpenAi { base_url: String },
}

/// HTTP client for a chat-completions endpoint.
pub struct ChatCompletionsClient {
    flavor: Flavor,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("flavor", &self.flavor)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ChatCompletionsClient {
    /// Azure OpenAI deployment. `deployment` doubles as the model identity.
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self::with_flavor(
            Flavor::Azure {
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            },
            api_key.into(),
            deployment.into(),
        )
    }

    /// OpenAI or any server speaking the same protocol.
    pub fn openai(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self::with_flavor(
            Flavor::OpenAi {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
            api_key.into(),
            model.into(),
        )
    }

    fn with_flavor(flavor: Flavor, api_key: String, model: String) -> Self {
        Self {
            flavor,
            api_key,
            model,
            max_tokens: None,
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    /// Pick a provider from the environment.
    ///
    /// `AZURE_OPENAI_API_KEY` + `AZURE_OPENAI_ENDPOINT` select Azure
    /// (`AZURE_OPENAI_API_VERSION` optional); otherwise `OPENAI_API_KEY`
    /// (+ `OPENAI_BASE_URL`) selects an OpenAI-compatible endpoint. Model,
    /// token cap and temperature come from `config`.
    pub fn from_env(config: &AuditConfig) -> Result<Self, AuditError> {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let client = match (env("AZURE_OPENAI_API_KEY"), env("AZURE_OPENAI_ENDPOINT")) {
            (Some(key), Some(endpoint)) => {
                let mut c = Self::azure(endpoint, key, &config.model);
                if let Some(version) = env("AZURE_OPENAI_API_VERSION") {
                    c = c.with_api_version(version);
                }
                c
            }
            _ => {
                let key = env("OPENAI_API_KEY").ok_or_else(|| {
                    AuditError::InvalidConfig(
                        "no audit service credentials: set AZURE_OPENAI_API_KEY and \
                         AZURE_OPENAI_ENDPOINT, or OPENAI_API_KEY"
                            .into(),
                    )
                })?;
                let base =
                    env("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
                Self::openai(base, key, &config.model)
            }
        };
        Ok(client.with_options(config))
    }

    /// Copy model, token cap and temperature from `config`.
    pub fn with_options(mut self, config: &AuditConfig) -> Self {
        self.model = config.model.clone();
        self.max_tokens = config.max_tokens;
        self.temperature = config.temperature;
        self
    }

    /// Azure only; ignored for OpenAI-compatible endpoints.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        if let Flavor::Azure { api_version, .. } = &mut self.flavor {
            *api_version = version.into();
        }
        self
    }

    /// Upper bound on the whole call. Exceeding it is `ServiceUnavailable`.
    ///
    /// # Errors
    /// [`AuditError::InvalidConfig`] if the HTTP client cannot be built with
    /// the bound; the client is never left without it.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AuditError> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AuditError::InvalidConfig(format!("HTTP client with {timeout:?} timeout: {e}"))
            })?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_url(&self) -> String {
        match &self.flavor {
            Flavor::Azure {
                endpoint,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{}/chat/completions?api-version={api_version}",
                self.model
            ),
            Flavor::OpenAi { base_url } => format!("{base_url}/chat/completions"),
        }
    }

    fn body<'a>(&'a self, request: &'a AuditRequest) -> ChatRequest<'a> {
        let content = request
            .content()
            .map(|block| match block {
                ContentBlock::Text(text) => WirePart::Text { text },
                ContentBlock::Image(url) => WirePart::ImageUrl {
                    image_url: ImageUrl { url },
                },
            })
            .collect();
        ChatRequest {
            model: match self.flavor {
                Flavor::Azure { .. } => None,
                Flavor::OpenAi { .. } => Some(self.model.as_str()),
            },
            messages: vec![WireMessage {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl AuditService for ChatCompletionsClient {
    #[instrument(name = "audit_service_complete", skip_all, fields(model = %self.model))]
    async fn complete(&self, request: &AuditRequest) -> Result<AuditResult, AuditError> {
        let start = Instant::now();
        let url = self.endpoint_url();
        let mut req = self.client.post(&url).json(&self.body(request));
        req = match self.flavor {
            Flavor::Azure { .. } => req.header("api-key", &self.api_key),
            Flavor::OpenAi { .. } => req.bearer_auth(&self.api_key),
        };

        info!(
            "Submitting audit request: {} text block(s), {} image(s)",
            request.text_block_count() + 1,
            request.image_block_count()
        );

        let resp = req.send().await.map_err(classify_send_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AuditError::ServiceUnavailable {
                detail: format!("response body could not be read: {e}"),
            })?;
        let text = first_completion(parsed)?;

        debug!(
            "Audit service answered {} chars in {} ms",
            text.len(),
            start.elapsed().as_millis()
        );
        Ok(AuditResult::new(text))
    }
}

fn classify_send_error(e: reqwest::Error) -> AuditError {
    if e.is_builder() {
        return AuditError::ServiceRejected {
            status: None,
            detail: format!("request could not be built: {e}"),
        };
    }
    let detail = if e.is_timeout() {
        format!("request timed out: {e}")
    } else {
        e.to_string()
    };
    AuditError::ServiceUnavailable { detail }
}

fn classify_status(status: StatusCode, body: &str) -> AuditError {
    let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        AuditError::ServiceUnavailable {
            detail: format!("HTTP {status}: {excerpt}"),
        }
    } else {
        AuditError::ServiceRejected {
            status: Some(status.as_u16()),
            detail: excerpt,
        }
    }
}

fn first_completion(resp: ChatResponse) -> Result<String, AuditError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AuditError::ServiceRejected {
            status: None,
            detail: "response contained no completion".into(),
        })?;
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(AuditError::ServiceRejected {
            status: None,
            detail: "completion withheld by the content filter".into(),
        });
    }
    choice
        .message
        .and_then(|m| m.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AuditError::ServiceRejected {
            status: None,
            detail: "completion has no text content".into(),
        })
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_http::serve;

    fn request() -> AuditRequest {
        AuditRequest {
            instruction: "Audit.".into(),
            blocks: vec![
                ContentBlock::Text("Document 1: Purchase Order (PO).".into()),
                ContentBlock::Image("https://blob/po_page_1.png?sig=x".into()),
                ContentBlock::Text("Document 2: Invoice.".into()),
                ContentBlock::Image("https://blob/invoice_img.png?sig=y".into()),
            ],
        }
    }

    fn completion(content: &str, finish: &str) -> String {
        serde_json::json!({
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": finish
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn openai_success_returns_first_completion() {
        let (base, log) = serve(|_, _| (200, completion("| A |\n|---|\n| 1 |", "stop"))).await;
        let client = ChatCompletionsClient::openai(base, "sk-test", "gpt-4o-mini");

        let result = client.complete(&request()).await.unwrap();
        assert_eq!(result.as_str(), "| A |\n|---|\n| 1 |");

        let log = log.lock().unwrap();
        let req = &log[0];
        assert_eq!(req.target, "/chat/completions");
        assert_eq!(req.header("authorization"), Some("Bearer sk-test"));

        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 5);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "Audit.");
        assert_eq!(content[2]["type"], "image_url");
        assert_eq!(content[2]["image_url"]["url"], "https://blob/po_page_1.png?sig=x");
        assert_eq!(content[4]["image_url"]["url"], "https://blob/invoice_img.png?sig=y");
    }

    #[tokio::test]
    async fn azure_uses_deployment_path_and_api_key_header() {
        let (base, log) = serve(|_, _| (200, completion("ok", "stop"))).await;
        let client = ChatCompletionsClient::azure(base, "az-key", "gpt-4o-mini");

        client.complete(&request()).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            log[0].target,
            format!(
                "/openai/deployments/gpt-4o-mini/chat/completions?api-version={DEFAULT_AZURE_API_VERSION}"
            )
        );
        assert_eq!(log[0].header("api-key"), Some("az-key"));
        let body: serde_json::Value = serde_json::from_slice(&log[0].body).unwrap();
        assert!(body.get("model").is_none());
    }

    #[tokio::test]
    async fn rate_limit_is_unavailable() {
        let (base, _) = serve(|_, _| (429, r#"{"error":"slow down"}"#.into())).await;
        let err = ChatCompletionsClient::openai(base, "k", "m")
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ServiceUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let (base, _) = serve(|_, _| (500, String::new())).await;
        let err = ChatCompletionsClient::openai(base, "k", "m")
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn unauthorized_is_rejected_with_status() {
        let (base, _) = serve(|_, _| (401, r#"{"error":"bad key"}"#.into())).await;
        let err = ChatCompletionsClient::openai(base, "k", "m")
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuditError::ServiceRejected {
                status: Some(401),
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn content_filter_is_rejected() {
        let (base, _) = serve(|_, _| (200, completion("", "content_filter"))).await;
        let err = ChatCompletionsClient::openai(base, "k", "m")
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ServiceRejected { status: None, .. }));
    }

    #[tokio::test]
    async fn empty_choices_is_rejected() {
        let (base, _) = serve(|_, _| (200, r#"{"choices":[]}"#.into())).await;
        let err = ChatCompletionsClient::openai(base, "k", "m")
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ServiceRejected { .. }));
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ChatCompletionsClient::openai(format!("http://{addr}"), "k", "m")
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn timeout_bounds_a_silent_server() {
        // Accepts the connection and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = ChatCompletionsClient::openai(format!("http://{addr}"), "k", "m")
            .with_timeout(Duration::from_millis(300))
            .unwrap();
        let start = Instant::now();
        let err = client.complete(&request()).await.unwrap_err();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(matches!(err, AuditError::ServiceUnavailable { ref detail } if detail.contains("timed out")));
        assert!(err.is_retryable());
    }

    #[test]
    fn options_come_from_config() {
        let config = AuditConfig::builder()
            .model("gpt-4o")
            .max_tokens(2048)
            .temperature(0.0)
            .build()
            .unwrap();
        let client = ChatCompletionsClient::openai("http://x", "k", "ignored").with_options(&config);
        assert_eq!(client.model(), "gpt-4o");
        let body = serde_json::to_value(client.body(&request())).unwrap();
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn debug_hides_api_key() {
        let client = ChatCompletionsClient::openai("http://x", "sk-secret", "m");
        assert!(!format!("{client:?}").contains("sk-secret"));
    }
}
