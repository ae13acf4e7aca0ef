pub mod adapter;
pub mod config;
pub mod error;
pub mod request;
pub mod runtime;
pub mod server;

pub use adapter::{AdapterOptions, InferenceAdapter};
pub use config::{AppConfig, ServerDefaults};
pub use error::ServiceError;
pub use request::{InferenceRequest, InferenceResponse};
pub use runtime::{ChatRuntime, OllamaClient, RuntimeConfig};
pub use server::build_router;
