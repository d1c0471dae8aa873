//! HTTP surface: `POST /interactions` and `GET /healthz`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use kite_access::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use serde_json::json;
use tokio::net::TcpListener;

use crate::interaction_router::{InboundInteraction, InteractionRouter, RouterError};

pub const INTERACTIONS_ENDPOINT: &str = "/interactions";
pub const HEALTH_ENDPOINT: &str = "/healthz";
pub const DEFAULT_GATEWAY_BIND: &str = "127.0.0.1:8787";

#[derive(Debug)]
pub(crate) struct GatewayApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl GatewayApiError {
    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

pub fn build_gateway_router(router: Arc<InteractionRouter>) -> Router {
    Router::new()
        .route(INTERACTIONS_ENDPOINT, post(handle_interaction))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(router)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

async fn handle_interaction(
    State(router): State<Arc<InteractionRouter>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let inbound = InboundInteraction {
        raw_body: &body,
        signature_hex: header_str(&headers, SIGNATURE_HEADER),
        timestamp: header_str(&headers, TIMESTAMP_HEADER),
    };
    match router.route(inbound).await {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(RouterError::AuthenticationFailure) => StatusCode::UNAUTHORIZED.into_response(),
        Err(RouterError::MalformedInteraction(message)) => {
            GatewayApiError::bad_request("malformed_interaction", message).into_response()
        }
    }
}

async fn handle_health(State(router): State<Arc<InteractionRouter>>) -> Response {
    Json(json!({
        "status": "ok",
        "agents": router.registry().len(),
    }))
    .into_response()
}

/// Serves until Ctrl-C.
pub async fn run_gateway_server(bind: &str, router: InteractionRouter) -> Result<()> {
    let bind_addr = bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{bind}'"))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind interaction gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    tracing::info!(
        addr = %local_addr,
        endpoint = INTERACTIONS_ENDPOINT,
        agents = router.registry().len(),
        "interaction gateway listening"
    );
    let app = build_gateway_router(Arc::new(router));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("interaction gateway exited unexpectedly")?;
    tracing::info!("interaction gateway stopped");
    Ok(())
}
