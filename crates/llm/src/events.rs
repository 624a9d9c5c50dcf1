//! Provider stream events.  The wire is server-sent `data:` lines carrying
//! JSON objects with a `type` discriminator; parsing is tolerant because
//! providers add event kinds over time.

use serde_json::Value;

use lexgate_config::TokenUsage;
use lexgate_textproc::EvidenceChunk;

#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Incremental output text.
    Delta(String),
    /// The retrieval tool started searching.
    RetrievalSearching,
    /// The web-search tool started searching.
    WebSearching,
    /// The model requires a synchronous function-tool call.
    FunctionCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// Retrieval result bodies included in the stream.
    RetrievalResults(Vec<EvidenceChunk>),
    /// Terminal success; carries usage and the response id used for
    /// tool-output continuations.
    Completed {
        response_id: String,
        usage: TokenUsage,
    },
    /// Terminal failure reported in-stream.
    Failed(String),
    /// The literal `[DONE]` sentinel.
    Done,
}

/// Parse one SSE line.  Returns `None` for blanks, comments, and event kinds
/// we have no use for.
pub fn parse_sse_line(line: &str) -> Option<ProviderEvent> {
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(ProviderEvent::Done);
    }
    let json: Value = serde_json::from_str(data).ok()?;
    parse_event(&json)
}

pub fn parse_event(json: &Value) -> Option<ProviderEvent> {
    let kind = json.get("type").and_then(|t| t.as_str())?;
    match kind {
        "response.output_text.delta" => {
            let delta = json.get("delta").and_then(|d| d.as_str())?;
            Some(ProviderEvent::Delta(delta.to_string()))
        }
        "response.file_search_call.searching" | "response.file_search_call.in_progress" => {
            Some(ProviderEvent::RetrievalSearching)
        }
        "response.web_search_call.searching" | "response.web_search_call.in_progress" => {
            Some(ProviderEvent::WebSearching)
        }
        "response.output_item.done" => parse_output_item(json.get("item")?),
        "response.completed" => {
            let response = json.get("response")?;
            let usage = response.get("usage");
            let input = read_u64(usage, "input_tokens");
            let output = read_u64(usage, "output_tokens");
            Some(ProviderEvent::Completed {
                response_id: response
                    .get("id")
                    .and_then(|id| id.as_str())
                    .unwrap_or_default()
                    .to_string(),
                usage: TokenUsage::new(input, output),
            })
        }
        "response.failed" | "error" => {
            let message = json
                .pointer("/response/error/message")
                .or_else(|| json.pointer("/error/message"))
                .or_else(|| json.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("provider reported failure");
            Some(ProviderEvent::Failed(message.to_string()))
        }
        _ => None,
    }
}

fn parse_output_item(item: &Value) -> Option<ProviderEvent> {
    match item.get("type").and_then(|t| t.as_str())? {
        "function_call" => {
            let name = item.get("name")?.as_str()?.to_string();
            let call_id = item
                .get("call_id")
                .or_else(|| item.get("id"))
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string();
            // Arguments arrive as a JSON-encoded string.
            let arguments = item
                .get("arguments")
                .map(|a| {
                    if let Some(raw) = a.as_str() {
                        serde_json::from_str(raw).unwrap_or(Value::Null)
                    } else {
                        a.clone()
                    }
                })
                .unwrap_or(Value::Null);
            Some(ProviderEvent::FunctionCall { call_id, name, arguments })
        }
        "file_search_call" => {
            let item_id = item
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or("file_search")
                .to_string();
            let chunks: Vec<EvidenceChunk> = item
                .get("results")
                .and_then(|r| r.as_array())
                .map(|results| {
                    results
                        .iter()
                        .enumerate()
                        .filter_map(|(i, result)| {
                            let body = result.get("text")?.as_str()?.to_string();
                            Some(EvidenceChunk { id: format!("{item_id}:{i}"), body })
                        })
                        .collect()
                })
                .unwrap_or_default();
            if chunks.is_empty() {
                None
            } else {
                Some(ProviderEvent::RetrievalResults(chunks))
            }
        }
        _ => None,
    }
}

fn read_u64(value: Option<&Value>, field: &str) -> u64 {
    value
        .and_then(|v| v.get(field))
        .and_then(|n| n.as_u64())
        .unwrap_or(0)
}
