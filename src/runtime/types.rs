use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Structured-output constraint forwarded to the runtime. Absence means the
/// model may answer in free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Json,
}

impl ResponseFormat {
    /// Parses an optional wire value. Blank strings mean "no constraint".
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, ServiceError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some),
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("json") {
            Ok(ResponseFormat::Json)
        } else {
            Err(ServiceError::BadRequest(format!(
                "unsupported format {raw:?}, only \"json\" is accepted"
            )))
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Image files on the local disk; the runtime client encodes them.
    pub images: Vec<PathBuf>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.images.push(path.into());
        self
    }
}

/// One chat call. Whether it streams is decided by which `ChatRuntime`
/// method receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage<'a>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage<'a> {
    pub role: Role,
    pub content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Both the full response and every streamed chunk share this shape.
#[derive(Debug, Deserialize)]
pub(crate) struct WireChatResponse {
    #[serde(default)]
    pub message: Option<WireResponseMessage>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireResponseMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTagsResponse {
    #[serde(default)]
    pub models: Vec<WireTag>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTag {
    pub name: String,
}
