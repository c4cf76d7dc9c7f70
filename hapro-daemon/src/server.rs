//! HTTP surface. Every request goes through the static route table; axum only
//! provides the listener and the request/response plumbing.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use hapro_client::SupervisorClient;
use hapro_core::RelayConfig;
use hapro_router::{Endpoint, RouteMatch, RouteTable};

use crate::controllers::{self, Upload};
use crate::error::DaemonError;

/// Shared by every request.
pub struct AppState {
    pub config: RelayConfig,
    pub supervisor: SupervisorClient,
    pub routes: RouteTable<Endpoint>,
}

impl AppState {
    pub fn new(config: RelayConfig, supervisor: SupervisorClient) -> Self {
        Self {
            config,
            supervisor,
            routes: hapro_router::table(),
        }
    }
}

/// A controller's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiReply {
    Json {
        status: StatusCode,
        body: Value,
    },
    Bytes {
        content_type: String,
        cache_control: Option<&'static str>,
        disposition: Option<String>,
        body: Vec<u8>,
    },
}

impl ApiReply {
    /// `{StatusCode: 200, data}`.
    pub fn ok(data: Value) -> Self {
        Self::Json {
            status: StatusCode::OK,
            body: json!({ "StatusCode": 200, "data": data }),
        }
    }

    /// `{StatusCode, Message}` with the HTTP status set to match.
    pub fn message(status: StatusCode, message: &str) -> Self {
        Self::Json {
            status,
            body: json!({ "StatusCode": status.as_u16(), "Message": message }),
        }
    }

    /// `message` with the status's canonical reason phrase.
    pub fn status(status: StatusCode) -> Self {
        Self::message(status, status.canonical_reason().unwrap_or("Error"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiReply::Json { status, .. } => *status,
            ApiReply::Bytes { .. } => StatusCode::OK,
        }
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        match self {
            ApiReply::Json { status, body } => (status, Json(body)).into_response(),
            ApiReply::Bytes {
                content_type,
                cache_control,
                disposition,
                body,
            } => {
                let mut headers = HeaderMap::new();
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    headers.insert(CONTENT_TYPE, value);
                }
                if let Some(cache) = cache_control {
                    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache));
                }
                if let Some(value) = disposition.and_then(|d| HeaderValue::from_str(&d).ok()) {
                    headers.insert(CONTENT_DISPOSITION, value);
                }
                (StatusCode::OK, headers, Body::from(body)).into_response()
            }
        }
    }
}

/// Resolve and run one request. Router mismatches and controller failures
/// become well-formed error replies.
pub async fn route_request(state: &AppState, method: &Method, path: &str, upload: Upload) -> ApiReply {
    match state.routes.resolve(method, path) {
        RouteMatch::NotFound => {
            debug!(%method, path, "no route");
            ApiReply::status(StatusCode::NOT_FOUND)
        }
        RouteMatch::MethodNotAllowed { route } => {
            debug!(%method, path, expected = %route.method(), "method not allowed");
            ApiReply::status(StatusCode::METHOD_NOT_ALLOWED)
        }
        RouteMatch::Matched { route, params } => {
            let endpoint = *route.handler();
            match controllers::handle(state, endpoint, &params, upload).await {
                Ok(reply) => reply,
                Err(err) => {
                    error!(%endpoint, path, error = %err, "controller failed");
                    ApiReply::status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
    }
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiReply {
    let upload = Upload {
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    };
    route_request(&state, &method, uri.path(), upload).await
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// Serve until shutdown.
pub async fn server_task(
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let addr = state.config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| DaemonError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(%addr, "http surface listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|source| DaemonError::Bind { addr, source })
}
