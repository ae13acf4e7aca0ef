mod client;
#[cfg(test)]
pub(crate) mod scripted;
mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ServiceError;

pub use client::{OllamaClient, RuntimeConfig};
pub use types::{ChatRequest, Message, ResponseFormat, Role};

/// Lazy, single-use sequence of text fragments from one streamed call.
pub type ChunkStream = BoxStream<'static, Result<String, ServiceError>>;

/// The chat-completion service the adapter talks to.
#[async_trait]
pub trait ChatRuntime: Send + Sync {
    /// Issues one non-streaming call and returns the full message text.
    async fn chat(&self, request: ChatRequest) -> Result<String, ServiceError>;

    /// Starts a streaming call. The returned stream performs the remaining
    /// reads as it is polled.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, ServiceError>;

    /// Names of the models the runtime has available locally.
    async fn list_models(&self) -> Result<Vec<String>, ServiceError>;
}
