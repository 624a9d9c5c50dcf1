//! Streaming LLM adapter — one provider call per turn.
//!
//! The adapter opens a streamed `/v1/responses` request, forwards text
//! deltas as they arrive, services synchronous function-tool calls through
//! the tool registry, captures retrieval evidence and usage, and applies the
//! post-stream text fixups (URL validation, markdown normalization) before
//! handing the completed turn back.

mod events;
mod wiring;

pub use events::{parse_event, parse_sse_line, ProviderEvent};
pub use wiring::{build_tools, policy_prefix, DerivedTools};

use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lexgate_config::TokenUsage;
use lexgate_textproc::{normalize_markdown, validate_urls, EvidenceChunk, UrlValidation};
use lexgate_tools::ToolRegistry;

/// Tool-call → result → continuation iterations before forcing an answer.
pub const MAX_TOOL_ROUNDS: usize = 5;

const MAX_RETRIES: usize = 2;
const BACKOFF_BASE_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum LlmError {
    /// Transient upstream failure that survived the retry budget.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Non-retryable rejection (4xx other than rate limiting).
    #[error("provider rejected the request ({status}): {message}")]
    BadRequest { status: u16, message: String },
    /// The stream broke or reported an in-band failure.
    #[error("provider stream failed: {0}")]
    Stream(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// What the adapter forwards to the caller while the stream is live.
#[derive(Debug, Clone)]
pub enum StreamNotice {
    /// Incremental answer text, in provider order.
    Delta(String),
    /// Short informational status (tool activity).
    Status(String),
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    pub input: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tools: Vec<Value>,
    pub include_retrieval_results: bool,
    pub validate_urls: bool,
}

#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Final answer text, URL-repaired and markdown-normalized.
    pub text: String,
    pub usage: TokenUsage,
    pub evidence: Vec<EvidenceChunk>,
    pub url_validation: Option<UrlValidation>,
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| LlmError::Unavailable(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Run one turn against the provider.  Blocks until the stream
    /// terminates; the whole call (including tool rounds and
    /// post-processing) is bounded by `deadline`.
    pub async fn stream(
        &self,
        request: &StreamRequest,
        registry: &ToolRegistry,
        deadline: Duration,
        notice_tx: &mpsc::Sender<StreamNotice>,
    ) -> Result<StreamOutcome, LlmError> {
        match tokio::time::timeout(deadline, self.stream_inner(request, registry, notice_tx)).await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::DeadlineExceeded),
        }
    }

    async fn stream_inner(
        &self,
        request: &StreamRequest,
        registry: &ToolRegistry,
        notice_tx: &mpsc::Sender<StreamNotice>,
    ) -> Result<StreamOutcome, LlmError> {
        let mut text = String::new();
        let mut evidence: Vec<EvidenceChunk> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut payload = initial_payload(request);

        for round in 0..MAX_TOOL_ROUNDS {
            let mut response = self.send_with_retry(&payload).await?;

            let mut pending: Vec<(String, String, Value)> = Vec::new();
            let mut response_id = String::new();
            let mut buffer = String::new();

            loop {
                let chunk = response
                    .chunk()
                    .await
                    .map_err(|err| LlmError::Stream(err.to_string()))?;
                let Some(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let Some(event) = parse_sse_line(&line) else { continue };
                    self.handle_event(
                        event,
                        &mut text,
                        &mut evidence,
                        &mut usage,
                        &mut pending,
                        &mut response_id,
                        notice_tx,
                    )
                    .await?;
                }
            }
            if let Some(event) = parse_sse_line(&buffer) {
                self.handle_event(
                    event,
                    &mut text,
                    &mut evidence,
                    &mut usage,
                    &mut pending,
                    &mut response_id,
                    notice_tx,
                )
                .await?;
            }

            if pending.is_empty() {
                break;
            }
            if round == MAX_TOOL_ROUNDS - 1 {
                warn!(round, "tool loop exhausted; returning accumulated text");
                break;
            }

            info!(count = pending.len(), round, "servicing function tool calls");
            let mut outputs = Vec::new();
            for (call_id, name, args) in &pending {
                let _ = notice_tx
                    .send(StreamNotice::Status(format!("⚙ ejecutando {name}…")))
                    .await;
                let result = registry.execute(name, args).await;
                if !result.success {
                    warn!(%name, output = %result.output, "tool call failed; continuing");
                }
                outputs.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": result.output.to_string(),
                }));
            }
            payload = continuation_payload(request, &response_id, outputs);
        }

        let url_validation = if request.validate_urls && !evidence.is_empty() {
            let validation = validate_urls(&text, &evidence);
            debug!(
                corrections = validation.corrections.len(),
                warnings = validation.warnings.len(),
                "url validation applied"
            );
            text = validation.text.clone();
            Some(validation)
        } else {
            None
        };

        let text = normalize_markdown(&text);
        Ok(StreamOutcome { text, usage, evidence, url_validation })
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_event(
        &self,
        event: ProviderEvent,
        text: &mut String,
        evidence: &mut Vec<EvidenceChunk>,
        usage: &mut TokenUsage,
        pending: &mut Vec<(String, String, Value)>,
        response_id: &mut String,
        notice_tx: &mpsc::Sender<StreamNotice>,
    ) -> Result<(), LlmError> {
        match event {
            ProviderEvent::Delta(delta) => {
                text.push_str(&delta);
                let _ = notice_tx.send(StreamNotice::Delta(delta)).await;
            }
            ProviderEvent::RetrievalSearching => {
                let _ = notice_tx
                    .send(StreamNotice::Status(
                        "🔎 consultando la base normativa…".to_string(),
                    ))
                    .await;
            }
            ProviderEvent::WebSearching => {
                let _ = notice_tx
                    .send(StreamNotice::Status("🌐 buscando en la web…".to_string()))
                    .await;
            }
            ProviderEvent::FunctionCall { call_id, name, arguments } => {
                pending.push((call_id, name, arguments));
            }
            ProviderEvent::RetrievalResults(chunks) => {
                evidence.extend(chunks);
            }
            ProviderEvent::Completed { response_id: id, usage: reported } => {
                *usage = reported;
                *response_id = id;
            }
            ProviderEvent::Failed(message) => {
                return Err(LlmError::Stream(message));
            }
            ProviderEvent::Done => {}
        }
        Ok(())
    }

    /// Issue the request, retrying transient failures (rate limit, timeout,
    /// 5xx) with exponential back-off plus jitter.
    async fn send_with_retry(&self, payload: &Value) -> Result<reqwest::Response, LlmError> {
        let endpoint = format!("{}/v1/responses", self.base_url);
        let mut attempt = 0usize;

        loop {
            let result = self
                .http
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(payload)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < MAX_RETRIES {
                        warn!(%status, attempt, "transient provider status; retrying");
                        backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    let message = response.text().await.unwrap_or_default();
                    return Err(if retryable {
                        LlmError::Unavailable(format!("HTTP {status}: {message}"))
                    } else {
                        LlmError::BadRequest { status: status.as_u16(), message }
                    });
                }
                Err(err) if (err.is_timeout() || err.is_connect()) && attempt < MAX_RETRIES => {
                    warn!(%err, attempt, "transient provider error; retrying");
                    backoff(attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(LlmError::Unavailable(err.to_string())),
            }
        }
    }
}

async fn backoff(attempt: usize) {
    let jitter = rand::thread_rng().gen_range(0..250);
    let delay = BACKOFF_BASE_MS * (1 << attempt) + jitter;
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

fn initial_payload(request: &StreamRequest) -> Value {
    let mut payload = json!({
        "model": request.model,
        "input": request.input,
        "temperature": request.temperature,
        "max_output_tokens": request.max_tokens,
        "stream": true,
    });
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(request.tools.clone());
    }
    if request.include_retrieval_results {
        payload["include"] = json!(["file_search_call.results"]);
    }
    payload
}

fn continuation_payload(request: &StreamRequest, response_id: &str, outputs: Vec<Value>) -> Value {
    let mut payload = json!({
        "model": request.model,
        "previous_response_id": response_id,
        "input": outputs,
        "stream": true,
    });
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(request.tools.clone());
    }
    if request.include_retrieval_results {
        payload["include"] = json!(["file_search_call.results"]);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> StreamRequest {
        StreamRequest {
            model: "gpt-4o".to_string(),
            input: "[SYSTEM]\nhola".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            tools: vec![json!({ "type": "file_search" })],
            include_retrieval_results: true,
            validate_urls: true,
        }
    }

    #[test]
    fn initial_payload_shape() {
        let payload = initial_payload(&request());
        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["tools"][0]["type"], "file_search");
        assert_eq!(payload["include"][0], "file_search_call.results");
    }

    #[test]
    fn initial_payload_omits_empty_tools() {
        let mut req = request();
        req.tools.clear();
        req.include_retrieval_results = false;
        let payload = initial_payload(&req);
        assert!(payload.get("tools").is_none());
        assert!(payload.get("include").is_none());
    }

    #[test]
    fn continuation_payload_carries_previous_response() {
        let outputs = vec![json!({
            "type": "function_call_output",
            "call_id": "call_1",
            "output": "{\"pages\":[]}",
        })];
        let payload = continuation_payload(&request(), "resp_9", outputs);
        assert_eq!(payload["previous_response_id"], "resp_9");
        assert_eq!(payload["input"][0]["call_id"], "call_1");
        assert_eq!(payload["tools"][0]["type"], "file_search");
    }

    #[test]
    fn client_normalizes_base_url() {
        let client =
            LlmClient::new("https://api.test/", "sk-x", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "https://api.test");
    }
}
