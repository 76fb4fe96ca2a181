//! HTTP routes.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use react_agent_core::{AgentSession, ReasoningExecutor, RunStatus, SessionError, Usage};

use crate::config::ServerConfig;

/// The agent as served over HTTP.
pub type Agent = AgentSession<Box<dyn ReasoningExecutor>>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// `None` when no model is configured.
    pub agent: Option<Arc<Agent>>,
    pub info: ConfigInfo,
}

/// Active integrations, without secret values.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigInfo {
    pub service_name: String,
    /// `APPLICATIONINSIGHTS_CONNECTION_STRING` is present. Spans are only
    /// written to the log; nothing is exported.
    pub telemetry_connection_string_set: bool,
    pub model_configured: bool,
    pub deployment: String,
    pub api_version: Option<String>,
    pub agent_name: String,
    pub tools: Vec<String>,
}

impl ConfigInfo {
    pub fn new(config: &ServerConfig, agent: Option<&Agent>) -> Self {
        Self {
            service_name: config.service_name.clone(),
            telemetry_connection_string_set: config.telemetry_connection_string_set,
            model_configured: config.openai.is_some(),
            deployment: config.agent.model.clone(),
            api_version: config.openai.as_ref().map(|c| c.api_version.clone()),
            agent_name: config.agent.agent_name.clone(),
            tools: agent
                .map(|a| a.tools().names().into_iter().map(String::from).collect())
                .unwrap_or_default(),
        }
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .route("/api/chat", post(chat_handler))
        .with_state(Arc::new(state))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.info.clone())
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatResponse {
    success: bool,
    response: String,
    run_id: String,
    status: RunStatus,
    iterations: u32,
    usage: Usage,
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let agent = state.agent.as_ref().ok_or(AppError::NotConfigured)?;

    info!(message_len = req.message.len(), "Chat request");
    let reply = agent.run(&req.message).await?;

    Ok(Json(ChatResponse {
        success: true,
        response: reply.answer,
        run_id: reply.run_id.to_string(),
        status: reply.status,
        iterations: reply.iterations,
        usage: reply.usage,
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotConfigured,
    Provider(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidInput(msg) => AppError::BadRequest(msg),
            SessionError::Provider(msg) => AppError::Provider(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Agent not configured. Set AZURE_OPENAI_ENDPOINT and AZURE_OPENAI_API_KEY.".into(),
            ),
            AppError::Provider(msg) => (StatusCode::BAD_GATEWAY, format!("Model provider error: {msg}")),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        warn!(status = %status, error = %message, "Request failed");
        (
            status,
            Json(serde_json::json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}
