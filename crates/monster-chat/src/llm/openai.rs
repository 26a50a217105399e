//! OpenAI-compatible chat client.
//!
//! Works against any endpoint that speaks the OpenAI chat completions protocol.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};
use url::Url;

use super::error::{LLMError, check_response_error, rate_limit_error};
use super::params::ClientParams;
use super::transport::AsyncTransport;
use super::types::{ChatRequest, ChatResponse, ChatStream, Message, StreamEvent, Usage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

// ============================================================================
// Endpoint
// ============================================================================

/// Everything a request needs that is fixed at construction.
#[derive(Debug)]
struct Endpoint {
    params: ClientParams,
    completions_url: Url,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    timeout: Duration,
    max_retries: u32,
}

impl Endpoint {
    fn new(params: ClientParams) -> Result<Self, LLMError> {
        // Treat the base as a directory so joins keep the version prefix ("/v1/").
        let base = format!("{}/", params.base_url.trim_end_matches('/'));
        let completions_url = Url::parse(&base)?.join("chat/completions")?;

        let mut headers = HeaderMap::new();
        if let Some(ref key) = params.api_key {
            let mut value = header_value("authorization", &format!("Bearer {key}"))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        if let Some(ref org) = params.organization {
            headers.insert(
                HeaderName::from_static("openai-organization"),
                header_value("openai-organization", org)?,
            );
        }
        for (name, value) in params.default_headers.iter().flatten() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| LLMError::InvalidHeader { name: name.clone() })?;
            headers.insert(header_name, header_value(name, value)?);
        }

        let query = params
            .default_query
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            timeout: params.timeout.unwrap_or(DEFAULT_TIMEOUT),
            max_retries: params.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            params,
            completions_url,
            headers,
            query,
        })
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// A server `retry-after` is honored as sent; only computed backoff is capped.
    fn backoff(attempt: u32, err: &LLMError) -> Duration {
        if let LLMError::RateLimit {
            retry_after: Some(secs),
        } = err
        {
            return Duration::from_secs(*secs);
        }
        INITIAL_BACKOFF
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, LLMError> {
    HeaderValue::from_str(value).map_err(|_| LLMError::InvalidHeader {
        name: name.to_string(),
    })
}

#[derive(serde::Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

impl<'a> From<&'a ChatRequest> for StreamRequest<'a> {
    fn from(request: &'a ChatRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        }
    }
}

// ============================================================================
// OpenAIClient (async)
// ============================================================================

/// Async chat client. Cheap to clone; clones share the transport.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    endpoint: Arc<Endpoint>,
    transport: AsyncTransport,
}

impl OpenAIClient {
    /// Build a client. Purely local: no request is sent.
    pub fn new(params: ClientParams, transport: AsyncTransport) -> Result<Self, LLMError> {
        let endpoint = Endpoint::new(params)?;
        debug!(url = %endpoint.completions_url, "Built async chat client");
        Ok(Self {
            endpoint: Arc::new(endpoint),
            transport,
        })
    }

    pub fn params(&self) -> &ClientParams {
        &self.endpoint.params
    }

    pub fn transport(&self) -> &AsyncTransport {
        &self.transport
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LLMError> {
        let (response, _permit) = self.post(request).await?;
        Ok(response.json().await?)
    }

    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, LLMError> {
        let (response, permit) = self.post(&StreamRequest::from(request)).await?;
        let parser = StreamParser::new(response.bytes_stream(), permit);
        Ok(Box::pin(parser))
    }

    /// Send with retries. The returned permit must outlive reading the body.
    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<(reqwest::Response, Option<OwnedSemaphorePermit>), LLMError> {
        let mut attempt = 0;
        loop {
            match self.post_once(body).await {
                Ok(sent) => return Ok(sent),
                Err(e) if attempt < self.endpoint.max_retries && e.is_retryable() => {
                    let delay = Endpoint::backoff(attempt, &e);
                    attempt += 1;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying chat completion");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<T: serde::Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<(reqwest::Response, Option<OwnedSemaphorePermit>), LLMError> {
        let permit = self.transport.acquire().await;
        let endpoint = &self.endpoint;

        let mut req = self
            .transport
            .client()
            .post(endpoint.completions_url.clone())
            .headers(endpoint.headers.clone())
            .timeout(endpoint.timeout);
        if !endpoint.query.is_empty() {
            req = req.query(&endpoint.query);
        }

        let response = req.json(body).send().await?;

        if let Some(err) = check_response_error(&response) {
            return Err(err);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message });
        }

        Ok((response, permit))
    }
}

// ============================================================================
// BlockingOpenAIClient (sync)
// ============================================================================

/// Blocking chat client for callers outside an async runtime.
#[derive(Debug, Clone)]
pub struct BlockingOpenAIClient {
    endpoint: Arc<Endpoint>,
    http: reqwest::blocking::Client,
}

impl BlockingOpenAIClient {
    /// Build a client. Purely local: no request is sent.
    pub fn new(params: ClientParams, http: reqwest::blocking::Client) -> Result<Self, LLMError> {
        let endpoint = Endpoint::new(params)?;
        debug!(url = %endpoint.completions_url, "Built blocking chat client");
        Ok(Self {
            endpoint: Arc::new(endpoint),
            http,
        })
    }

    pub fn params(&self) -> &ClientParams {
        &self.endpoint.params
    }

    pub fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LLMError> {
        let mut attempt = 0;
        loop {
            match self.chat_once(request) {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.endpoint.max_retries && e.is_retryable() => {
                    let delay = Endpoint::backoff(attempt, &e);
                    attempt += 1;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying chat completion");
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn chat_once(&self, request: &ChatRequest) -> Result<ChatResponse, LLMError> {
        let endpoint = &self.endpoint;

        let mut req = self
            .http
            .post(endpoint.completions_url.clone())
            .headers(endpoint.headers.clone())
            .timeout(endpoint.timeout);
        if !endpoint.query.is_empty() {
            req = req.query(&endpoint.query);
        }

        let response = req.json(request).send()?;

        let status = response.status();
        if let Some(err) = rate_limit_error(status, response.headers()) {
            return Err(err);
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(LLMError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json()?)
    }
}

// ============================================================================
// Streaming
// ============================================================================

struct StreamParser<S> {
    inner: S,
    buffer: Vec<u8>,
    usage: Option<Usage>,
    eof: bool,
    done: bool,
    // Holds the connection slot until the body is drained.
    _permit: Option<OwnedSemaphorePermit>,
}

impl<S> StreamParser<S> {
    fn new(inner: S, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            usage: None,
            eof: false,
            done: false,
            _permit: permit,
        }
    }

    fn finish(&mut self) -> StreamEvent {
        self.done = true;
        self._permit = None;
        StreamEvent::Done {
            usage: self.usage.take(),
        }
    }
}

impl<S> Stream for StreamParser<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        if self.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();

                let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                    continue;
                };
                if data == "[DONE]" {
                    let done = self.finish();
                    return Poll::Ready(Some(Ok(done)));
                }

                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(chunk) => {
                        if chunk.usage.is_some() {
                            self.usage = chunk.usage;
                        }
                        if let Some(choice) = chunk.choices.first()
                            && let Some(ref content) = choice.delta.content
                            && !content.is_empty()
                        {
                            return Poll::Ready(Some(Ok(StreamEvent::Token(content.clone()))));
                        }
                    }
                    Err(e) => debug!(error = %e, "Skipping unparseable stream chunk"),
                }
                continue;
            }

            if self.eof {
                let done = self.finish();
                return Poll::Ready(Some(Ok(done)));
            }

            match std::pin::Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::Request(e))));
                }
                Poll::Ready(None) => {
                    self.eof = true;
                    if !self.buffer.is_empty() {
                        // Flush a final line that lacks a trailing newline.
                        self.buffer.push(b'\n');
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(serde::Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(serde::Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use futures::StreamExt;

    use super::*;

    fn params(base_url: &str) -> ClientParams {
        ClientParams::new(base_url)
    }

    #[test]
    fn test_endpoint_keeps_version_prefix() {
        let endpoint = Endpoint::new(params("https://llm.monsterapi.ai/v1/")).unwrap();
        assert_eq!(
            endpoint.completions_url.as_str(),
            "https://llm.monsterapi.ai/v1/chat/completions"
        );

        let endpoint = Endpoint::new(params("https://llm.monsterapi.ai/v1")).unwrap();
        assert_eq!(
            endpoint.completions_url.as_str(),
            "https://llm.monsterapi.ai/v1/chat/completions"
        );
    }

    #[test]
    fn test_endpoint_defaults() {
        let endpoint = Endpoint::new(params("https://a/")).unwrap();
        assert_eq!(endpoint.timeout, DEFAULT_TIMEOUT);
        assert_eq!(endpoint.max_retries, DEFAULT_MAX_RETRIES);
        assert!(endpoint.headers.is_empty());
        assert!(endpoint.query.is_empty());
    }

    #[test]
    fn test_endpoint_zero_retries_is_kept() {
        let mut p = params("https://a/");
        p.max_retries = Some(0);
        assert_eq!(Endpoint::new(p).unwrap().max_retries, 0);
    }

    #[test]
    fn test_endpoint_headers() {
        let mut p = params("https://a/");
        p.api_key = Some("abc123".to_string());
        p.default_headers = Some(BTreeMap::from([("x-trace".to_string(), "1".to_string())]));
        p.default_query = Some(BTreeMap::from([("tier".to_string(), "free".to_string())]));

        let endpoint = Endpoint::new(p).unwrap();
        assert_eq!(endpoint.headers["authorization"], "Bearer abc123");
        assert!(endpoint.headers["authorization"].is_sensitive());
        assert_eq!(endpoint.headers["x-trace"], "1");
        assert!(!endpoint.headers.contains_key("openai-organization"));
        assert_eq!(
            endpoint.query,
            vec![("tier".to_string(), "free".to_string())]
        );
    }

    #[test]
    fn test_endpoint_rejects_bad_input() {
        assert!(matches!(
            Endpoint::new(params("not a url")),
            Err(LLMError::InvalidUrl(_))
        ));

        let mut p = params("https://a/");
        p.default_headers = Some(BTreeMap::from([("bad header".to_string(), "v".to_string())]));
        assert!(matches!(
            Endpoint::new(p),
            Err(LLMError::InvalidHeader { ref name }) if name == "bad header"
        ));

        let mut p = params("https://a/");
        p.api_key = Some("line\nbreak".to_string());
        assert!(matches!(
            Endpoint::new(p),
            Err(LLMError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let err = LLMError::Api {
            status: 503,
            message: String::new(),
        };
        assert_eq!(Endpoint::backoff(0, &err), Duration::from_millis(500));
        assert_eq!(Endpoint::backoff(1, &err), Duration::from_secs(1));
        assert_eq!(Endpoint::backoff(2, &err), Duration::from_secs(2));
        assert_eq!(Endpoint::backoff(10, &err), MAX_BACKOFF);

        let limited = LLMError::RateLimit {
            retry_after: Some(3),
        };
        assert_eq!(Endpoint::backoff(0, &limited), Duration::from_secs(3));

        let long_wait = LLMError::RateLimit {
            retry_after: Some(30),
        };
        assert_eq!(Endpoint::backoff(0, &long_wait), Duration::from_secs(30));
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Unpin {
        let owned: Vec<Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<StreamEvent> {
        StreamParser::new(chunks(parts), None)
            .map(|e| e.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_stream_tokens_and_done() {
        let events = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Hel".to_string()),
                StreamEvent::Token("lo".to_string()),
                StreamEvent::Done { usage: None },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_line_split_across_chunks() {
        let events = collect(&[
            "data: {\"choices\":[{\"delta\":",
            "{\"content\":\"Hi\"}}]}\n",
            "data: [DONE]\n",
        ])
        .await;

        assert_eq!(events[0], StreamEvent::Token("Hi".to_string()));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_reports_usage() {
        let events = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":1,\"total_tokens\":4}}\n",
            "data: [DONE]\n",
        ])
        .await;

        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 3,
                    completion_tokens: 1,
                    total_tokens: 4,
                })
            })
        );
    }

    #[tokio::test]
    async fn test_stream_without_done_marker() {
        let events = collect(&[
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Token("tail".to_string()),
                StreamEvent::Done { usage: None },
            ]
        );
    }
}
