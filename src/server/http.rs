//! HTTP surface: token endpoint and health check

use crate::auth::{PermissionMode, UserId};
use crate::gateway::GatewayError;
use crate::server::warm::Warmer;
use crate::server::shutdown_signal;
use crate::service::Permgate;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";
pub const DEFAULT_WARM_INTERVAL: Duration = Duration::from_secs(4 * 60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Request header carrying the caller's user id
    pub identity_header: String,
    /// Keep-warm period; zero disables the ticker
    pub warm_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            warm_interval: DEFAULT_WARM_INTERVAL,
        }
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub permgate: Permgate,
    pub identity_header: HeaderName,
}

impl AppState {
    pub fn new(permgate: Permgate, identity_header: &str) -> Result<Self> {
        let identity_header = HeaderName::try_from(identity_header)
            .with_context(|| format!("Invalid identity header: {}", identity_header))?;
        Ok(Self {
            permgate,
            identity_header,
        })
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/data/{database_id}/{collection_id}/token",
            get(token_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub mode: Option<String>,
}

/// Body of every failed response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

fn error_response(
    status: StatusCode,
    kind: &str,
    request_id: Uuid,
    retry_after: Option<Duration>,
) -> Response {
    let body = ErrorBody {
        error: kind.to_string(),
        request_id: request_id.to_string(),
        retry_after_secs: retry_after.map(|d| d.as_secs().max(1)),
    };
    (status, Json(body)).into_response()
}

async fn token_handler(
    State(state): State<AppState>,
    Path((database_id, collection_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let request_id = Uuid::new_v4();

    let header = match headers.get(&state.identity_header).map(|v| v.to_str()) {
        None => None,
        Some(Ok(value)) => Some(value),
        Some(Err(_)) => {
            warn!(request_id = %request_id, "Identity header is not valid text");
            return error_response(StatusCode::BAD_REQUEST, "invalid_identity", request_id, None);
        }
    };
    let user = match UserId::from_header(header) {
        Ok(user) => user,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Rejected identity");
            return error_response(StatusCode::BAD_REQUEST, "invalid_identity", request_id, None);
        }
    };

    let gateway = state.permgate.gateway();
    let mode = match query.mode.as_deref() {
        None => gateway.config().default_mode,
        Some(raw) => match PermissionMode::parse(raw) {
            Some(mode) => mode,
            None => {
                return error_response(StatusCode::BAD_REQUEST, "invalid_mode", request_id, None)
            }
        },
    };

    let duration = gateway.config().token_duration;
    match gateway
        .get_token(&database_id, &collection_id, user.as_str(), mode, duration)
        .await
    {
        Ok(token) => Json(token).into_response(),
        Err(e) => failure(e, request_id),
    }
}

fn failure(err: GatewayError, request_id: Uuid) -> Response {
    warn!(request_id = %request_id, error = %err, kind = err.kind(), "Token request failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        err.kind(),
        request_id,
        err.retry_after(),
    )
}

/// HTTP server with its keep-warm ticker
pub struct PermgateServer {
    config: ServerConfig,
    permgate: Permgate,
}

impl PermgateServer {
    pub fn new(config: ServerConfig, permgate: Permgate) -> Self {
        Self { config, permgate }
    }

    pub fn router(&self) -> Result<Router> {
        let state = AppState::new(self.permgate.clone(), &self.config.identity_header)?;
        Ok(create_router(state))
    }

    /// Serve until ctrl-c or SIGTERM
    pub async fn run(self) -> Result<()> {
        let app = self.router()?;

        let warmer = Warmer::new(
            self.permgate.registry().clone(),
            self.permgate.events().clone(),
            self.config.warm_interval,
        )
        .spawn();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;
        info!(addr = %self.config.bind_addr, "permgate listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        warmer.abort();
        info!("permgate stopped");
        Ok(())
    }
}
