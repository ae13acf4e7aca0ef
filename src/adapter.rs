//! Translation of a single query into one runtime call.
//!
//! An [`InferenceAdapter`] is cheap to build and is meant to live for one
//! request. Its `stream` setting fixes the delivery mode before the call
//! starts: [`InferenceAdapter::query`] always hands back one string, while
//! [`InferenceAdapter::query_stream`] exposes the fragments as they arrive.

use std::{path::Path, sync::Arc};

use futures::TryStreamExt;
use tracing::debug;

use crate::{
    error::ServiceError,
    runtime::{ChatRequest, ChatRuntime, ChunkStream, Message, ResponseFormat},
};

#[derive(Debug, Clone, Default)]
pub struct AdapterOptions {
    pub model: String,
    pub stream: bool,
    pub format: Option<ResponseFormat>,
    /// Only multimodal adapters forward image attachments.
    pub multimodal: bool,
}

pub struct InferenceAdapter {
    runtime: Arc<dyn ChatRuntime>,
    options: AdapterOptions,
}

impl InferenceAdapter {
    pub fn new(runtime: Arc<dyn ChatRuntime>, options: AdapterOptions) -> Result<Self, ServiceError> {
        if options.model.trim().is_empty() {
            return Err(ServiceError::BadRequest("model must not be empty".into()));
        }
        Ok(Self { runtime, options })
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn is_streaming(&self) -> bool {
        self.options.stream
    }

    /// System message first when one is given, then the user message.
    pub fn build_messages(
        &self,
        text: &str,
        system_prompt: Option<&str>,
        image_path: Option<&Path>,
    ) -> Result<Vec<Message>, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::BadRequest("query must not be empty".into()));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
            messages.push(Message::system(system));
        }

        let mut user = Message::user(text);
        if let Some(path) = image_path.filter(|_| self.options.multimodal) {
            user = user.with_image(path);
        }
        messages.push(user);

        Ok(messages)
    }

    pub async fn query(
        &self,
        text: &str,
        system_prompt: Option<&str>,
        image_path: Option<&Path>,
    ) -> Result<String, ServiceError> {
        if self.options.stream {
            return self
                .query_stream(text, system_prompt, image_path)
                .await?
                .try_fold(String::new(), |mut acc, fragment| async move {
                    acc.push_str(&fragment);
                    Ok(acc)
                })
                .await;
        }

        let request = self.chat_request(text, system_prompt, image_path)?;
        debug!(model = %request.model, "issuing buffered inference call");
        self.runtime.chat(request).await
    }

    pub async fn query_stream(
        &self,
        text: &str,
        system_prompt: Option<&str>,
        image_path: Option<&Path>,
    ) -> Result<ChunkStream, ServiceError> {
        let request = self.chat_request(text, system_prompt, image_path)?;
        debug!(model = %request.model, "issuing streaming inference call");
        self.runtime.chat_stream(request).await
    }

    fn chat_request(
        &self,
        text: &str,
        system_prompt: Option<&str>,
        image_path: Option<&Path>,
    ) -> Result<ChatRequest, ServiceError> {
        Ok(ChatRequest {
            model: self.options.model.clone(),
            messages: self.build_messages(text, system_prompt, image_path)?,
            format: self.options.format,
        })
    }
}
