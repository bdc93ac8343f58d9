use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::config::LlmSettings;
use crate::core::errors::LlmError;

/// Provider for any server speaking the OpenAI chat/embeddings API.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            timeout,
            client: Client::new(),
        }
    }

    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.post(url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

fn chat_body(request: &ChatRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": request.parameters.name,
        "messages": request.messages,
        "temperature": request.parameters.temperature,
        "stream": stream,
    });
    if let (Some(max_tokens), Some(obj)) = (request.parameters.max_tokens, body.as_object_mut()) {
        obj.insert("max_tokens".to_string(), json!(max_tokens));
    }
    body
}

async fn error_for_status(res: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(LlmError::Status { status, body })
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let res = self
            .post("/v1/chat/completions")
            .timeout(self.timeout)
            .json(&chat_body(request, false))
            .send()
            .await?;
        let res = error_for_status(res).await?;

        let payload: Value = res.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|content| content.to_string())
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError> {
        let res = self
            .post("/v1/chat/completions")
            .json(&chat_body(request, true))
            .send()
            .await?;
        let res = error_for_status(res).await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(forward_sse(res.bytes_stream(), tx));

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .post("/v1/embeddings")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let res = error_for_status(res).await?;

        let payload: Value = res.json().await?;
        let data = payload["data"]
            .as_array()
            .ok_or_else(|| LlmError::Parse("missing data array".to_string()))?;

        let embeddings: Vec<Vec<f32>> = data
            .iter()
            .filter_map(|item| item["embedding"].as_array())
            .map(|vals| {
                vals.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .collect();

        if embeddings.len() != inputs.len() {
            return Err(LlmError::Parse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }
}

/// Reads an SSE body and forwards each token. A body that ends without
/// `[DONE]` ends with an error.
async fn forward_sse<S, B, E>(mut stream: S, tx: mpsc::Sender<Result<String, LlmError>>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut lines = SseLineBuffer::default();
    while let Some(item) = stream.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(LlmError::Stream(e.to_string()))).await;
                return;
            }
        };
        for line in lines.push(bytes.as_ref()) {
            if !forward_line(&line, &tx).await {
                return;
            }
        }
    }

    if let Some(line) = lines.finish() {
        if !forward_line(&line, &tx).await {
            return;
        }
    }
    let _ = tx
        .send(Err(LlmError::Stream(
            "stream ended before [DONE]".to_string(),
        )))
        .await;
}

/// Returns false once the stream is finished or the receiver is gone.
async fn forward_line(line: &str, tx: &mpsc::Sender<Result<String, LlmError>>) -> bool {
    match parse_sse_line(line) {
        SseLine::Skip => true,
        SseLine::Done => false,
        SseLine::Token(content) => tx.send(Ok(content)).await.is_ok(),
        SseLine::Error(message) => {
            let _ = tx.send(Err(LlmError::Stream(message))).await;
            false
        }
    }
}

/// Reassembles SSE lines that may be split across network chunks. Bytes are
/// only decoded once a full line has arrived.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flushes an unterminated trailing line.
    fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        decode_line(&raw)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Skip,
    Done,
    Token(String),
    Error(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(json) = serde_json::from_str::<Value>(data) else {
        return SseLine::Skip;
    };
    if let Some(error) = json.get("error") {
        let message = error["message"]
            .as_str()
            .map(|m| m.to_string())
            .unwrap_or_else(|| error.to_string());
        return SseLine::Error(message);
    }
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseLine::Token(content.to_string()),
        _ => SseLine::Skip,
    }
}
