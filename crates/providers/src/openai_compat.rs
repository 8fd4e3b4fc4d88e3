//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions`.
//!
//! Transport failures are mapped onto [`ProviderError`] variants that the
//! retry classifier understands: connection failures carry a system error
//! code, HTTP statuses are preserved.

use async_trait::async_trait;
use parley_config::ProviderConfig;
use parley_core::error::ProviderError;
use parley_core::message::Message;
use parley_core::provider::*;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// No client-wide timeout is set; each request carries the per-call
    /// timeout chosen by the invocation engine.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.name.clone(),
            config.base_url.clone(),
            config.api_key.clone().unwrap_or_default(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect()
    }

    fn to_api_request(request: &ProviderRequest) -> ApiRequest<'_> {
        ApiRequest {
            model: &request.model,
            messages: Self::to_api_messages(&request.messages),
            sampling: &request.sampling,
            max_tokens: request.max_tokens,
            stop: request.stop.as_deref(),
            logit_bias: request.logit_bias.as_ref(),
            response_format: request.response_format.as_ref(),
            reasoning_effort: request.reasoning_effort.as_deref(),
            provider: request.provider_routing.as_ref(),
            stream: false,
        }
    }

    fn map_send_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() {
            ProviderError::network("ECONNREFUSED", err.to_string())
        } else {
            ProviderError::Network {
                code: io_error_code(&err).map(String::from),
                message: err.to_string(),
            }
        }
    }

    /// The status line arrived but the body did not. Always a transport
    /// fault; a body that ends early without an OS error is a reset peer.
    fn map_body_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            return ProviderError::Timeout(err.to_string());
        }
        ProviderError::network(
            io_error_code(&err).unwrap_or("ECONNRESET"),
            format!("Response body interrupted: {err}"),
        )
    }

    fn map_status(status: u16, model: &str, body: String, retry_after: Option<u64>) -> ProviderError {
        match status {
            401 | 403 => ProviderError::AuthenticationFailed(if body.is_empty() {
                "Invalid API key or insufficient permissions".into()
            } else {
                body
            }),
            404 => ProviderError::ModelNotFound(model.to_string()),
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }

    /// Turn a decoded body into a response, surfacing in-band errors.
    fn into_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
        if let Some(error) = api_response.error {
            let status_code = error
                .code
                .as_ref()
                .and_then(|c| c.as_u64())
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(200);
            return Err(ProviderError::ApiError {
                status_code,
                message: error.message,
            });
        }

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let stop_value = choice.stop_reason.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            content: choice
                .message
                .content
                .unwrap_or_else(|| Content::Text(String::new())),
            metadata: Some(ResponseMetadata {
                finish_reason: choice.finish_reason,
                stop_value,
                model: api_response.model,
                usage,
            }),
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::to_api_request(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            stop = request.stop.is_some(),
            "Sending completion request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(Self::map_send_error)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let error_body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(status, error = %e, "Failed to read error body");
                    format!("unreadable error body: {e}")
                }
            };
            warn!(status, body = %error_body, "Provider returned error");
            return Err(Self::map_status(status, &request.model, error_body, retry_after));
        }

        let bytes = response.bytes().await.map_err(Self::map_body_error)?;
        let api_response: ApiResponse =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::ApiError {
                status_code: status,
                message: format!("Failed to parse response: {e}"),
            })?;

        Self::into_response(api_response)
    }
}

/// The system error code of the first I/O error in `err`'s source chain.
fn io_error_code(err: &(dyn std::error::Error + 'static)) -> Option<&'static str> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return match io.kind() {
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof => {
                    Some("ECONNRESET")
                }
                ErrorKind::BrokenPipe => Some("EPIPE"),
                ErrorKind::TimedOut => Some("ETIMEDOUT"),
                ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
                _ => None,
            };
        }
        source = e.source();
    }
    None
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    #[serde(flatten)]
    sampling: &'a SamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logit_bias: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a serde_json::Value>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
    /// vLLM reports the matched stop string (or token id) here
    #[serde(default)]
    stop_reason: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ErrorClass, classify};

    fn parse(json: &str) -> Result<ProviderResponse, ProviderError> {
        let api: ApiResponse = serde_json::from_str(json).unwrap();
        OpenAiCompatProvider::into_response(api)
    }

    #[test]
    fn from_config_trims_base_url() {
        let p = OpenAiCompatProvider::from_config(&ProviderConfig {
            name: "ollama".into(),
            base_url: "http://box:11434/v1/".into(),
            api_key: None,
        });
        assert_eq!(p.name(), "ollama");
        assert_eq!(p.base_url(), "http://box:11434/v1");
    }

    #[test]
    fn message_conversion() {
        let msgs = vec![Message::system("be brief"), Message::user("Hello")];
        let api = OpenAiCompatProvider::to_api_messages(&msgs);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].content, "Hello");
    }

    #[test]
    fn request_body_omits_absent_fields() {
        let req = ProviderRequest::new("m1", vec![Message::user("hi")]);
        let body = serde_json::to_value(OpenAiCompatProvider::to_api_request(&req)).unwrap();
        assert_eq!(body["model"], "m1");
        assert_eq!(body["stream"], false);
        assert!(body.get("stop").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("provider").is_none());
    }

    #[test]
    fn request_body_carries_sampling_and_stop() {
        let mut req = ProviderRequest::new("m1", vec![Message::user("hi")])
            .with_stop(vec!["\nUser:".into()]);
        req.sampling.temperature = Some(0.4);
        req.sampling.top_k = Some(20);
        req.max_tokens = Some(256);
        req.provider_routing = Some(serde_json::json!({"order": ["groq"]}));

        let body = serde_json::to_value(OpenAiCompatProvider::to_api_request(&req)).unwrap();
        assert_eq!(body["temperature"], 0.4);
        assert_eq!(body["top_k"], 20);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stop"][0], "\nUser:");
        assert_eq!(body["provider"]["order"][0], "groq");
    }

    #[test]
    fn parse_string_content() {
        let resp = parse(
            r#"{"model":"m1","choices":[{"message":{"content":"Hello"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(resp.content, Content::Text("Hello".into()));
        let meta = resp.metadata.unwrap();
        assert_eq!(meta.finish_reason.as_deref(), Some("stop"));
        assert_eq!(meta.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn parse_array_content_and_stop_value() {
        let resp = parse(
            r#"{"choices":[{"message":{"content":[{"type":"text","text":"Hi"}]},
                "finish_reason":"stop","stop_reason":"\nUser:"}]}"#,
        )
        .unwrap();
        assert_eq!(resp.content.to_text(), "Hi");
        assert_eq!(resp.metadata.unwrap().stop_value.as_deref(), Some("\nUser:"));
    }

    #[test]
    fn null_content_becomes_empty_text() {
        let resp = parse(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert_eq!(resp.content, Content::Text(String::new()));
    }

    #[test]
    fn in_band_error_is_surfaced() {
        let err = parse(r#"{"error":{"message":"Insufficient credits","code":402}}"#).unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 402, .. }));
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn no_choices_is_an_error() {
        assert!(parse(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn status_mapping_feeds_classifier() {
        let auth = OpenAiCompatProvider::map_status(401, "m1", String::new(), None);
        assert!(matches!(auth, ProviderError::AuthenticationFailed(_)));
        assert_eq!(classify(&auth), ErrorClass::Fatal);

        let billing = OpenAiCompatProvider::map_status(402, "m1", "Payment Required".into(), None);
        assert_eq!(classify(&billing), ErrorClass::Fatal);

        let limited = OpenAiCompatProvider::map_status(429, "m1", String::new(), Some(30));
        assert!(matches!(limited, ProviderError::RateLimited { retry_after_secs: 30 }));

        let gateway = OpenAiCompatProvider::map_status(504, "m1", "Gateway Timeout".into(), None);
        assert_eq!(classify(&gateway), ErrorClass::Transient);

        let missing = OpenAiCompatProvider::map_status(404, "nope/model", String::new(), None);
        assert!(matches!(missing, ProviderError::ModelNotFound(ref m) if m == "nope/model"));
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Port 9 (discard) on localhost is virtually never listening
        let provider = OpenAiCompatProvider::new("local", "http://127.0.0.1:9/v1", "k");
        let err = provider
            .complete(ProviderRequest::new("m1", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    /// Serve one canned HTTP response on a local port, after reading the
    /// whole request, then drop the connection.
    async fn serve_once(response: &'static [u8]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response).await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn body_cut_off_after_ok_status_is_transient() {
        let base = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 500\r\n\r\n{\"choices\":[{\"message\"",
        )
        .await;
        let provider = OpenAiCompatProvider::new("local", base, "k");
        let err = provider
            .complete(ProviderRequest::new("m1", vec![Message::user("hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Network { code: Some(_), .. }), "{err:?}");
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn malformed_body_stays_a_decode_error() {
        let base = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 8\r\n\r\nnot json",
        )
        .await;
        let provider = OpenAiCompatProvider::new("local", base, "k");
        let err = provider
            .complete(ProviderRequest::new("m1", vec![Message::user("hi")]))
            .await
            .unwrap_err();

        assert!(
            matches!(err, ProviderError::ApiError { status_code: 200, ref message } if message.starts_with("Failed to parse response")),
            "{err:?}"
        );
        assert_eq!(classify(&err), ErrorClass::NonRetryable);
    }

    #[tokio::test]
    async fn unreadable_error_body_is_reported() {
        let base = serve_once(
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 300\r\n\r\nupstream",
        )
        .await;
        let provider = OpenAiCompatProvider::new("local", base, "k");
        let err = provider
            .complete(ProviderRequest::new("m1", vec![Message::user("hi")]))
            .await
            .unwrap_err();

        match err {
            ProviderError::ApiError { status_code, message } => {
                assert_eq!(status_code, 500);
                assert!(message.starts_with("unreadable error body"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
