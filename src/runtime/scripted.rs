//! In-memory runtime used by the adapter and server tests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use crate::{
    error::ServiceError,
    runtime::{ChatRequest, ChatRuntime, ChunkStream},
};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: ChatRequest,
    pub stream: bool,
}

enum Failure {
    None,
    Unreachable(String),
    MidStream(String),
}

pub struct ScriptedRuntime {
    fragments: Vec<String>,
    failure: Failure,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRuntime {
    pub fn replying(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            failure: Failure::None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(message: &str) -> Self {
        Self {
            failure: Failure::Unreachable(message.to_string()),
            ..Self::replying(&[])
        }
    }

    pub fn failing_mid_stream(fragments: &[&str], message: &str) -> Self {
        Self {
            failure: Failure::MidStream(message.to_string()),
            ..Self::replying(fragments)
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn record(&self, request: ChatRequest, stream: bool) {
        self.calls.lock().push(RecordedCall { request, stream });
    }
}

#[async_trait]
impl ChatRuntime for ScriptedRuntime {
    async fn chat(&self, request: ChatRequest) -> Result<String, ServiceError> {
        self.record(request, false);
        match &self.failure {
            Failure::None => Ok(self.fragments.concat()),
            Failure::Unreachable(message) | Failure::MidStream(message) => {
                Err(ServiceError::Inference(message.clone()))
            }
        }
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<ChunkStream, ServiceError> {
        self.record(request, true);
        let mut items: Vec<Result<String, ServiceError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        match &self.failure {
            Failure::None => {}
            Failure::Unreachable(message) => return Err(ServiceError::Inference(message.clone())),
            Failure::MidStream(message) => items.push(Err(ServiceError::Inference(message.clone()))),
        }
        Ok(stream::iter(items).boxed())
    }

    async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        match &self.failure {
            Failure::Unreachable(message) => Err(ServiceError::Inference(message.clone())),
            _ => Ok(vec!["demo".to_string()]),
        }
    }
}
