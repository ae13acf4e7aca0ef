use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    runtime::{
        ChatRuntime, ChunkStream,
        types::{
            ChatRequest, WireChatRequest, WireChatResponse, WireMessage, WireTagsResponse,
        },
    },
};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub base_url: String,
    /// How many calls the client keeps connections ready for.
    pub parallel_requests: usize,
    pub request_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            parallel_requests: 4,
            request_timeout: None,
        }
    }
}

/// HTTP client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self, ServiceError> {
        let mut builder =
            reqwest::Client::builder().pool_max_idle_per_host(config.parallel_requests.max(1));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ServiceError::Inference(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_chat(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ServiceError> {
        let url = format!("{}/api/chat", self.base_url);
        let messages = encode_messages(request).await?;
        let body = WireChatRequest {
            model: &request.model,
            messages,
            stream,
            format: request.format,
        };

        debug!(%url, model = %request.model, stream, "sending chat request");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| unreachable_error(&url, e))?;

        ensure_success(response).await
    }
}

#[async_trait]
impl ChatRuntime for OllamaClient {
    async fn chat(&self, request: ChatRequest) -> Result<String, ServiceError> {
        let response = self.post_chat(&request, false).await?;
        let body: WireChatResponse = response.json().await.map_err(|e| {
            ServiceError::Inference(format!("malformed response from runtime: {e}"))
        })?;

        if let Some(error) = body.error {
            return Err(ServiceError::Inference(error));
        }
        body.message
            .map(|m| m.content)
            .ok_or_else(|| ServiceError::Inference("runtime response carried no message".into()))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, ServiceError> {
        let response = self.post_chat(&request, true).await?;
        Ok(decode_chunks(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| unreachable_error(&url, e))?;
        let tags: WireTagsResponse = ensure_success(response).await?.json().await.map_err(|e| {
            ServiceError::Inference(format!("malformed model list from runtime: {e}"))
        })?;

        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }
}

async fn encode_messages(request: &ChatRequest) -> Result<Vec<WireMessage<'_>>, ServiceError> {
    let mut messages = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        let mut images = Vec::with_capacity(message.images.len());
        for path in &message.images {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                ServiceError::Inference(format!("cannot read image {}: {e}", path.display()))
            })?;
            images.push(STANDARD.encode(bytes));
        }
        messages.push(WireMessage {
            role: message.role,
            content: &message.content,
            images,
        });
    }
    Ok(messages)
}

fn unreachable_error(url: &str, err: reqwest::Error) -> ServiceError {
    warn!(%url, error = %err, "inference runtime unreachable");
    ServiceError::Inference(format!("cannot reach inference runtime at {url}: {err}"))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<WireChatResponse>(&body)
        .ok()
        .and_then(|parsed| parsed.error)
        .unwrap_or_else(|| body.trim().to_string());
    Err(ServiceError::Inference(format!(
        "runtime returned HTTP {}: {detail}",
        status.as_u16()
    )))
}

struct LineReader<S> {
    bytes: std::pin::Pin<Box<S>>,
    buffer: Vec<u8>,
    finished: bool,
}

/// Turns a newline-delimited JSON body into content fragments. Empty
/// fragments (such as the final `done` chunk) are skipped. The stream ends
/// after the first error.
pub(crate) fn decode_chunks<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let reader = LineReader {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if reader.finished {
                return None;
            }

            if let Some(pos) = reader.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                match decode_line(&line) {
                    Ok(Some(fragment)) => return Some((Ok(fragment), reader)),
                    Ok(None) => continue,
                    Err(err) => {
                        reader.finished = true;
                        return Some((Err(err), reader));
                    }
                }
            }

            match reader.bytes.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    reader.finished = true;
                    return Some((
                        Err(ServiceError::Inference(format!("stream read error: {err}"))),
                        reader,
                    ));
                }
                None => {
                    reader.finished = true;
                    let rest = std::mem::take(&mut reader.buffer);
                    return match decode_line(&rest) {
                        Ok(Some(fragment)) => Some((Ok(fragment), reader)),
                        Ok(None) => None,
                        Err(err) => Some((Err(err), reader)),
                    };
                }
            }
        }
    })
    .boxed()
}

fn decode_line(line: &[u8]) -> Result<Option<String>, ServiceError> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let chunk: WireChatResponse = serde_json::from_str(trimmed).map_err(|e| {
        ServiceError::Inference(format!("failed to parse stream chunk: {e} (line: {trimmed})"))
    })?;
    if let Some(error) = chunk.error {
        return Err(ServiceError::Inference(error));
    }

    Ok(chunk
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty()))
}
