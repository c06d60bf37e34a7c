//! OpenAI-compatible analysis provider.
//!
//! Works with any service implementing the chat completions API, including its
//! server-sent-events streaming mode.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{parse_analysis_document, ContractAnalysis};
use crate::analyzer::{AnalysisOptions, Analyzer, DeltaStream};
use crate::result::AiError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";

const SYSTEM_PROMPT: &str = "You are an experienced contract lawyer reviewing agreements for a \
non-lawyer. Identify the key clauses (payment, ip, confidentiality, termination, liability, \
other), rate each clause's risk as low, medium or high, and explain each one in plain English. \
Reply with a single JSON object and nothing else, shaped as: \
{\"overallRisk\": \"low|medium|high\", \"summary\": string, \"clauses\": [{\"id\": string, \
\"type\": string, \"title\": string, \"risk\": \"low|medium|high\", \"originalText\": string, \
\"summary\": string, \"whyItMatters\": string, \"suggestedEdit\": string|null}]}";

pub struct OpenAiAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiAnalyzer {
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g. "https://api.openai.com/v1").
    /// * `model` - Model to use.
    /// * `api_key` - Bearer key; requests fail with `NotConfigured` without one.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, text: &str, options: &AnalysisOptions, stream: bool) -> ChatRequest {
        let mut prompt = format!("Analyze the following contract text:\n\n{text}");
        if !options.questions.is_empty() {
            prompt.push_str("\n\nAlso answer these specific questions in your summary: ");
            prompt.push_str(&options.questions.join(", "));
        }

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest) -> Result<reqwest::Response, AiError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AiError::NotConfigured("missing API key".to_string()))?;

        debug!(model = %self.model, stream = body.stream, "sending analysis request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::InferenceFailed(format!(
                "provider returned {}: {}",
                status.as_u16(),
                body.chars().take(300).collect::<String>()
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn analyze(
        &self,
        text: &str,
        options: &AnalysisOptions,
    ) -> Result<ContractAnalysis, AiError> {
        let response = self.send(&self.request(text, options, false)).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::InferenceFailed(format!("unreadable provider response: {e}")))?;

        let choice = body.choices.into_iter().next().ok_or(AiError::EmptyResponse)?;
        if let Some(refusal) = choice.message.refusal {
            return Err(AiError::InferenceFailed(format!("provider refused: {refusal}")));
        }
        let content = choice.message.content.unwrap_or_default();

        parse_analysis_document(&content)
    }

    async fn analyze_incremental(
        &self,
        text: &str,
        options: &AnalysisOptions,
    ) -> Result<DeltaStream, AiError> {
        let response = self.send(&self.request(text, options, true)).await?;
        Ok(sse_deltas(response.bytes_stream()))
    }
}

fn map_transport_error(e: reqwest::Error) -> AiError {
    if e.is_timeout() {
        AiError::Timeout
    } else {
        AiError::Connection(e.to_string())
    }
}

/// Turn a chat-completions SSE byte stream into content deltas.
///
/// Lines are reassembled across chunk boundaries before decoding, so multi-byte
/// characters split between chunks survive.
pub fn sse_deltas<S, B, E>(bytes: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        line: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.pending.pop_front() {
                return Some((Ok(delta), st));
            }
            if st.finished {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => st.feed(chunk.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(AiError::Connection(e.to_string())), st));
                }
                None => {
                    let rest = std::mem::take(&mut st.line);
                    st.handle_line(&rest);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

struct SseState<S> {
    bytes: std::pin::Pin<Box<S>>,
    line: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

impl<S> SseState<S> {
    fn feed(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if self.finished {
                return;
            }
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line);
                self.handle_line(&line);
            } else {
                self.line.push(byte);
            }
        }
    }

    fn handle_line(&mut self, raw: &[u8]) {
        match parse_sse_line(&String::from_utf8_lossy(raw)) {
            SseLine::Delta(delta) => self.pending.push_back(delta),
            SseLine::Done => self.finished = true,
            SseLine::Skip => {}
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Skip),
        Err(_) => SseLine::Skip,
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn parses_data_lines() {
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"{\"a\""}}]}"#),
            SseLine::Delta("{\"a\"".to_string())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseLine::Skip
        );
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let body = format!("{}{}data: [DONE]\n\n{}", chunk("{\"x\":"), chunk("\"é\"}"), chunk("ignored"));
        let bytes = body.into_bytes();
        // Split in the middle of the two-byte 'é'.
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let parts: Vec<Result<Vec<u8>, String>> =
            vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];

        let deltas: Vec<_> = sse_deltas(futures::stream::iter(parts)).collect().await;
        let joined: String = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(joined, "{\"x\":\"é\"}");
    }

    #[tokio::test]
    async fn transport_error_ends_stream_with_error() {
        let parts: Vec<Result<Vec<u8>, String>> =
            vec![Ok(chunk("{").into_bytes()), Err("reset by peer".to_string())];

        let deltas: Vec<_> = sse_deltas(futures::stream::iter(parts)).collect().await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].as_deref(), Ok("{"));
        assert!(matches!(deltas[1], Err(AiError::Connection(_))));
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let analyzer = OpenAiAnalyzer::new(DEFAULT_BASE_URL, DEFAULT_MODEL, None);
        assert!(!analyzer.is_configured());
        let err = analyzer
            .analyze("text", &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::NotConfigured(_)));
    }
}
