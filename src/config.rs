use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Context, bail};
use serde::Serialize;

use crate::runtime::{ResponseFormat, RuntimeConfig};

/// Server-level overrides. A `Some` value wins over whatever the request
/// carries; `None` defers to the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerDefaults {
    pub model: Option<String>,
    pub stream: Option<bool>,
    pub format: Option<ResponseFormat>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub defaults: ServerDefaults,
    pub multimodal: bool,
    pub runtime: RuntimeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
            defaults: ServerDefaults::default(),
            multimodal: false,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr = match var("SERVER_ADDR") {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .with_context(|| format!("SERVER_ADDR is not a socket address: {raw}"))?,
            None => base.listen_addr,
        };

        let model = var("DEFAULT_MODEL");
        let stream = var("DEFAULT_STREAM")
            .map(|raw| parse_bool("DEFAULT_STREAM", &raw))
            .transpose()?;
        let format = var("DEFAULT_FORMAT")
            .map(|raw| {
                raw.parse::<ResponseFormat>()
                    .map_err(|err| anyhow::anyhow!("DEFAULT_FORMAT: {err}"))
            })
            .transpose()?;

        let multimodal = var("MULTIMODAL")
            .map(|raw| parse_bool("MULTIMODAL", &raw))
            .transpose()?
            .unwrap_or(base.multimodal);

        let base_url = var("OLLAMA_HOST")
            .map(|raw| normalize_base_url(&raw))
            .unwrap_or(base.runtime.base_url);
        let parallel_requests = match var("OLLAMA_NUM_PARALLEL") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("OLLAMA_NUM_PARALLEL is not a number: {raw}"))?,
            None => base.runtime.parallel_requests,
        };
        let request_timeout = match var("OLLAMA_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(raw.parse::<u64>().with_context(|| {
                format!("OLLAMA_TIMEOUT_SECS is not a number: {raw}")
            })?)),
            None => base.runtime.request_timeout,
        };

        Ok(Self {
            listen_addr,
            defaults: ServerDefaults {
                model,
                stream,
                format,
            },
            multimodal,
            runtime: RuntimeConfig {
                base_url,
                parallel_requests,
                request_timeout,
            },
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got {other:?}"),
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.defaults, ServerDefaults::default());
        assert!(!config.multimodal);
        assert_eq!(config.runtime.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.runtime.parallel_requests, 4);
        assert!(config.runtime.request_timeout.is_none());
    }

    #[test]
    fn reads_server_defaults_and_runtime_settings() {
        let config = AppConfig::from_lookup(lookup(&[
            ("SERVER_ADDR", "127.0.0.1:9000"),
            ("DEFAULT_MODEL", "llama3.2"),
            ("DEFAULT_STREAM", "true"),
            ("DEFAULT_FORMAT", "JSON"),
            ("MULTIMODAL", "yes"),
            ("OLLAMA_HOST", "localhost:11500/"),
            ("OLLAMA_NUM_PARALLEL", "2"),
            ("OLLAMA_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.defaults.model.as_deref(), Some("llama3.2"));
        assert_eq!(config.defaults.stream, Some(true));
        assert_eq!(config.defaults.format, Some(ResponseFormat::Json));
        assert!(config.multimodal);
        assert_eq!(config.runtime.base_url, "http://localhost:11500");
        assert_eq!(config.runtime.parallel_requests, 2);
        assert_eq!(config.runtime.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let config =
            AppConfig::from_lookup(lookup(&[("DEFAULT_MODEL", "  "), ("DEFAULT_STREAM", "")]))
                .unwrap();
        assert!(config.defaults.model.is_none());
        assert!(config.defaults.stream.is_none());
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(AppConfig::from_lookup(lookup(&[("DEFAULT_STREAM", "maybe")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("DEFAULT_FORMAT", "xml")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("OLLAMA_NUM_PARALLEL", "many")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("SERVER_ADDR", "nowhere")])).is_err());
    }
}
