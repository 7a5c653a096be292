use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, Method, header},
    middleware,
    response::IntoResponse,
    routing::{any, get},
};
use std::{collections::HashMap, sync::Arc};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{
    auth::bearer_token,
    error::ChatError,
    metrics::{metrics_handler, metrics_middleware},
    state::AppState,
};

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod presence;
pub mod state;
pub mod store;

/// Authenticates the handshake before the upgrade completes. A missing or
/// invalid credential, or an inactive user, rejects the connection outright.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = params
        .get("token")
        .cloned()
        .or_else(|| bearer_token(&headers).map(str::to_string));

    let Some(token) = token else {
        return ChatError::Unauthenticated.into_response();
    };

    match state.auth.verify(&token).await {
        Ok(user) => ws
            .on_upgrade(move |socket| gateway::handle_connection(socket, user, state))
            .into_response(),
        Err(e) => e.into_response(),
    }
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ORIGIN,
        ])
        .allow_origin(AllowOrigin::any());

    Router::new()
        .route("/ws", any(ws_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/conversations", http::conversations::routes())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(cors)
        .with_state(state)
}
