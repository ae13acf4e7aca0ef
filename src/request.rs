use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{config::ServerDefaults, error::ServiceError, runtime::ResponseFormat};

/// Body of `POST /api/inference`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceRequest {
    pub query: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub stream: Option<bool>,
    pub format: Option<String>,
    pub image_path: Option<PathBuf>,
}

/// Settings a request runs with once server defaults have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub model: String,
    pub stream: bool,
    pub format: Option<ResponseFormat>,
}

impl InferenceRequest {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.query.trim().is_empty() {
            return Err(ServiceError::BadRequest("query must not be empty".into()));
        }
        Ok(())
    }

    /// A server default that is set always wins; otherwise the request's
    /// value is used, then `stream = false` and no format.
    pub fn resolve(&self, defaults: &ServerDefaults) -> Result<ResolvedSettings, ServiceError> {
        let model = defaults
            .model
            .clone()
            .or_else(|| self.model.clone())
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::BadRequest(
                    "no model configured on the server and none given in the request".into(),
                )
            })?;

        let stream = defaults.stream.or(self.stream).unwrap_or(false);

        let format = match defaults.format {
            Some(format) => Some(format),
            None => ResponseFormat::parse_optional(self.format.as_deref())?,
        };

        Ok(ResolvedSettings {
            model,
            stream,
            format,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InferenceOutput {
    Text(String),
    Chunks(Vec<String>),
}

#[derive(Debug, Serialize)]
pub struct InferenceResponse {
    pub response: InferenceOutput,
}
