use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header::ACCEPT},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt, TryStreamExt, stream};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    adapter::{AdapterOptions, InferenceAdapter},
    config::{AppConfig, ServerDefaults},
    error::ServiceError,
    request::{InferenceOutput, InferenceRequest, InferenceResponse},
    runtime::{ChatRuntime, ChunkStream},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub runtime: Arc<dyn ChatRuntime>,
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    config: &'a ServerDefaults,
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// Routes are mounted under `/api` and again at the root.
pub fn build_router(config: Arc<AppConfig>, runtime: Arc<dyn ChatRuntime>) -> Router {
    let state = AppState { config, runtime };

    let routes = Router::new()
        .route("/inference", post(inference))
        .route("/health", get(health))
        .route("/models", get(models));

    Router::new()
        .nest("/api", routes.clone())
        .merge(routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "ok",
        config: &state.config.defaults,
    })
    .into_response()
}

async fn models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ServiceError> {
    let models = state.runtime.list_models().await?;
    Ok(Json(ModelsResponse { models }))
}

async fn inference(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Json(request) = payload?;
    request.validate()?;
    let settings = request.resolve(&state.config.defaults)?;
    info!(model = %settings.model, stream = settings.stream, "dispatching inference");

    let adapter = InferenceAdapter::new(
        state.runtime.clone(),
        AdapterOptions {
            model: settings.model,
            stream: settings.stream,
            format: settings.format,
            multimodal: state.config.multimodal,
        },
    )?;
    let system_prompt = request.system_prompt.as_deref();
    let image_path = request.image_path.as_deref();

    if !adapter.is_streaming() {
        let text = adapter
            .query(&request.query, system_prompt, image_path)
            .await
            .inspect_err(|err| warn!(error = %err, "inference failed"))?;
        return Ok(Json(InferenceResponse {
            response: InferenceOutput::Text(text),
        })
        .into_response());
    }

    let chunks = adapter
        .query_stream(&request.query, system_prompt, image_path)
        .await
        .inspect_err(|err| warn!(error = %err, "inference stream failed to start"))?;

    if accepts_event_stream(&headers) {
        return Ok(Sse::new(sse_events(chunks))
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let collected: Vec<String> = chunks
        .try_collect()
        .await
        .inspect_err(|err| warn!(error = %err, "inference stream failed"))?;
    Ok(Json(InferenceResponse {
        response: InferenceOutput::Chunks(collected),
    })
    .into_response())
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"))
}

/// One `data: {"chunk": ..}` event per fragment, then a `done` event. A
/// failure ends the stream with an `error` event instead.
fn sse_events(chunks: ChunkStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(chunks), |state| async move {
        let mut chunks = state?;
        let event = match chunks.next().await {
            Some(Ok(fragment)) => {
                let data = serde_json::json!({ "chunk": fragment });
                return Some((Event::default().data(data.to_string()), Some(chunks)));
            }
            Some(Err(err)) => {
                warn!(error = %err, "inference stream failed");
                let data = serde_json::json!({ "error": err.to_string() });
                Event::default().event("error").data(data.to_string())
            }
            None => Event::default().event("done").data("[DONE]"),
        };
        Some((event, None))
    })
    .map(Ok)
}
