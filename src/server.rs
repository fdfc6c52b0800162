//! The HTTP surface: completions, directory listings, a health check and the
//! streaming websocket, all under `/api`.

mod ws;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::chat::Message;
use crate::resolver::{self, Constraints, Resolver};

#[derive(Clone)]
pub(crate) struct AppState {
    pub resolver: Arc<Resolver>,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/completions", post(completions))
        .route("/api/providers", get(providers))
        .route("/api/models", get(models))
        .route("/api/health", get(health))
        .route("/api/ws", get(ws::ws_handler))
        .with_state(state)
}

/// A resolver error on its way to the client.
pub(crate) struct ApiError(resolver::Error);

impl From<resolver::Error> for ApiError {
    fn from(value: resolver::Error) -> Self {
        ApiError(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self.0.to_string();

        let context = match self.0 {
            resolver::Error::UnknownModel { allowed, .. }
            | resolver::Error::Incompatible { allowed, .. } => json!({ "allowed_models": allowed }),
            resolver::Error::UnknownProvider { allowed, .. } => {
                json!({ "allowed_providers": allowed })
            }
            resolver::Error::NoModels(_) => json!({}),
            resolver::Error::Downstream { .. } | resolver::Error::Exhausted { .. } => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": detail })),
                )
                    .into_response();
            }
        };

        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": detail, "error": context })),
        )
            .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CompletionParams {
    pub model: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CompletionRequest {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct CompletionResponse {
    pub completion: String,
    pub provider: String,
    pub model: String,
}

async fn root() -> Redirect {
    Redirect::temporary("/api/health")
}

async fn completions(
    State(state): State<AppState>,
    Query(params): Query<CompletionParams>,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let constraints = Constraints::new(params.model, params.provider);

    let completion = state
        .resolver
        .complete(&request.messages, &constraints)
        .await?;

    Ok(Json(CompletionResponse {
        completion: completion.text,
        provider: completion.provider,
        model: completion.model,
    }))
}

async fn providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.resolver.registry().live().providers().clone())
}

async fn models(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.resolver.registry().live().models().clone())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }

    tracing::info!("received shutdown signal");
}

/// Serve the API on `bind` until ctrl-c.
pub(crate) async fn serve(state: AppState, bind: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}
