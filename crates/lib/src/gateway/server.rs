//! Gateway HTTP server: chat relay, stored-chat routes, bug reports and health.

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::auth::AuthUser;
use super::bug_report::submit_bug_report;
use super::protocol::{
    ApiResponse, ChatQuery, Health, HistoryQuery, RouteNotFound, SavedQuery, UPSTREAM_FAILED,
};
use super::relay::relay_chat;
use super::store::{ChatStore, JsonChatStore, StoreError};
use crate::config::{self, Config};
use crate::init;
use crate::llm::BeckyClient;

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct GatewayState {
    pub port: u16,
    pub jwt_secret: Arc<str>,
    pub cookie_name: Arc<str>,
    pub store: Arc<dyn ChatStore>,
    pub upstream: BeckyClient,
    /// Forwarded as `auth_token` when a request carries none.
    pub upstream_token: Option<String>,
    pub bug_report_log: Arc<PathBuf>,
}

impl GatewayState {
    /// State for `config`, with storage paths resolved against `config_path`.
    pub async fn from_config(config: &Config, config_path: &Path) -> Result<Self> {
        let jwt_secret = config::resolve_jwt_secret(config)
            .context("no session secret configured (auth.jwtSecret or BECKY_JWT_SECRET)")?;
        let store_path = config::resolve_store_path(config, config_path);
        let store = JsonChatStore::load(&store_path)
            .await
            .with_context(|| format!("loading document store {}", store_path.display()))?;
        log::info!("document store at {}", store_path.display());
        Ok(Self {
            port: config.gateway.port,
            jwt_secret: jwt_secret.into(),
            cookie_name: config.auth.cookie_name.as_str().into(),
            store: Arc::new(store),
            upstream: BeckyClient::new(Some(config::resolve_upstream_url(config))),
            upstream_token: config::resolve_upstream_token(config),
            bug_report_log: Arc::new(config::resolve_bug_report_log(config, config_path)),
        })
    }
}

/// All routes, without CORS or body limits.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/health", get(health_http))
        .route("/api/chat", post(relay_chat).get(load_chat))
        .route("/api/chat/history", get(chat_history))
        .route("/api/chat/saved", get(saved_chats))
        .route("/api/chat/all", delete(delete_all_chats))
        .route("/api/bug-report", post(submit_bug_report))
        .fallback(route_not_found)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
    )
}

pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let bind = config.gateway.bind.trim();
    if !config::is_loopback_bind(bind) {
        log::warn!(
            "gateway bound to non-loopback address {}; session cookies travel unencrypted unless a TLS proxy fronts it",
            bind
        );
    }

    let state = GatewayState::from_config(&config, &config_path).await?;
    log::info!("relaying chat turns to {}", state.upstream.base_url());

    let mut app = router(state).layer(DefaultBodyLimit::max(config.gateway.max_upload_bytes));
    if let Some(cors) = cors_layer(&config.gateway.allowed_origins) {
        app = app.layer(cors);
    }

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET /api/health returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<Health> {
    Json(Health {
        msg: "api is running".to_string(),
        runtime: "running".to_string(),
        port: state.port,
    })
}

fn upstream_token(state: &GatewayState, provided: Option<String>) -> String {
    provided
        .filter(|t| !t.trim().is_empty())
        .or_else(|| state.upstream_token.clone())
        .unwrap_or_default()
}

/// GET /api/chat?chatId=: stored messages of one chat, from the inference service.
async fn load_chat(
    State(state): State<GatewayState>,
    _user: AuthUser,
    Query(query): Query<ChatQuery>,
) -> Response {
    let Some(chat_id) = query.chat_id.filter(|c| !c.trim().is_empty()) else {
        return ApiResponse::message(StatusCode::BAD_REQUEST, "chatId is required").into_response();
    };
    let token = upstream_token(&state, query.auth_token);
    match state.upstream.retrieve_messages(&chat_id, &token).await {
        Ok(messages) => ApiResponse::success(messages).into_response(),
        Err(e) => {
            log::error!("retrieve_messages for {} failed: {}", chat_id, e);
            ApiResponse::message(StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_FAILED).into_response()
        }
    }
}

/// GET /api/chat/history: the caller's chat list, from the inference service.
async fn chat_history(
    State(state): State<GatewayState>,
    _user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let token = upstream_token(&state, query.auth_token);
    match state.upstream.history_list(&token).await {
        Ok(list) => ApiResponse::success(list).into_response(),
        Err(e) => {
            log::error!("history_list failed: {}", e);
            ApiResponse::message(StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_FAILED).into_response()
        }
    }
}

/// GET /api/chat/saved: chats recorded by this gateway for the caller.
async fn saved_chats(
    State(state): State<GatewayState>,
    user: AuthUser,
    Query(query): Query<SavedQuery>,
) -> Response {
    match state.store.saved_chats(&user.email, query.chat_id.as_deref()).await {
        Ok(chats) => ApiResponse::success(chats).into_response(),
        Err(StoreError::NotFound) => {
            ApiResponse::message(StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => {
            log::error!("reading saved chats for {} failed: {}", user.email, e);
            ApiResponse::message(StatusCode::INTERNAL_SERVER_ERROR, "Could not read saved chats")
                .into_response()
        }
    }
}

/// DELETE /api/chat/all: forgets every recorded chat of the caller.
async fn delete_all_chats(State(state): State<GatewayState>, user: AuthUser) -> Response {
    match state.store.delete_all(&user.email).await {
        Ok(removed) => {
            log::info!("deleted {} saved chat(s) of {}", removed, user.email);
            ApiResponse::message(StatusCode::OK, "Success").into_response()
        }
        Err(e) => {
            log::error!("deleting chats of {} failed: {}", user.email, e);
            ApiResponse::message(StatusCode::INTERNAL_SERVER_ERROR, "Could not delete chats")
                .into_response()
        }
    }
}

async fn route_not_found() -> (StatusCode, Json<RouteNotFound>) {
    (
        StatusCode::NOT_FOUND,
        Json(RouteNotFound {
            error: "API route not found".to_string(),
        }),
    )
}
