//! HTTP surface for the relay.
//!
//! - `POST /api/chat` - one chat message, optionally bound to `X-Session-Id`
//! - `GET /api/health` - liveness and credential status
//! - everything else - the static frontend, when a directory is configured

use crate::chat::{
    insert_rate_limit_headers, ChatError, ChatRequest, ChatService, InvalidRequest, SESSION_HEADER,
};
use crate::rate_limit::ClientKeyExtractor;
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, FailedToBufferBody},
        ConnectInfo, DefaultBodyLimit, State,
    },
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use solace_common::ServerConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub client_keys: Arc<dyn ClientKeyExtractor>,
}

/// Chat reply body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub session_id: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub api_key_configured: bool,
    pub server_time: String,
}

/// Build the full router: API routes, optional static frontend, body limit and CORS.
pub fn build_routes(state: AppState, server: &ServerConfig) -> Router {
    let router = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    let router = match &server.static_dir {
        Some(dir) => router.fallback_service(frontend_service(dir)),
        None => router,
    };

    router.layer(cors_layer(server))
}

/// Static files with unknown paths answered by `index.html`.
fn frontend_service(dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")))
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(SESSION_HEADER),
            HeaderName::from_static("ratelimit-limit"),
            HeaderName::from_static("ratelimit-remaining"),
            HeaderName::from_static("ratelimit-reset"),
            HeaderName::from_static("retry-after"),
        ]);

    if server.allows_any_origin() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(origins)
}

// ============================================================================
// Handlers
// ============================================================================

async fn chat_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            tracing::info!("Rejected chat request: body too large");
            return ChatError::from(InvalidRequest::BodyTooLarge).into_response();
        }
        Err(rejection) => {
            tracing::info!(error = %rejection, "Rejected chat request: unreadable body");
            return ChatError::from(InvalidRequest::MalformedBody).into_response();
        }
    };

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let request = ChatRequest {
        body: serde_json::from_slice(&body).ok(),
        session_id: headers
            .get(SESSION_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned()),
        client_key: state.client_keys.client_key(&headers, peer),
    };

    match state.chat.handle(request).await {
        Ok(outcome) => {
            let session_header = HeaderValue::from_str(&outcome.session_id).ok();
            let mut response = Json(ChatResponse {
                reply: outcome.reply,
                session_id: outcome.session_id,
            })
            .into_response();

            let headers = response.headers_mut();
            if let Some(value) = session_header {
                headers.insert(HeaderName::from_static(SESSION_HEADER), value);
            }
            if let Some(status) = &outcome.rate_limit {
                insert_rate_limit_headers(headers, status);
            }
            response
        }
        Err(e) => e.into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        message: "Server is running".into(),
        api_key_configured: state.chat.api_key_configured(),
        server_time: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}
