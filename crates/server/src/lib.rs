use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use gamegraph_engine::{Engine, EventRecord, StoreError};
use gamegraph_protocol::{Health, UserId};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;

mod api_games;
mod api_nodes;
mod api_users;
pub mod config;

pub use config::{Cli, ServerConfig};

use api_games::*;
use api_nodes::*;
use api_users::*;

pub const SESSION_COOKIE: &str = "gg_session";

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            secure_cookies: false,
        }
    }
}

pub type ApiError = (StatusCode, String);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// The authenticated caller, inserted by the session middleware.
#[derive(Debug, Clone)]
pub struct SessionUser(pub UserId);

pub(crate) fn internal_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Maps store failures to responses. `conflict` is the status a uniqueness violation gets on this route.
pub(crate) fn store_error(conflict: StatusCode) -> impl Fn(StoreError) -> ApiError {
    move |e| match e {
        StoreError::NotFound(what) => (StatusCode::NOT_FOUND, not_found_message(what)),
        StoreError::Conflict(msg) => (conflict, msg),
        StoreError::Invalid(msg) => {
            tracing::debug!(%msg, "rejected request");
            (StatusCode::BAD_REQUEST, "Bad request".to_string())
        }
        e => {
            tracing::error!(error = %e, "store failure");
            internal_error()
        }
    }
}

pub(crate) fn db_error(e: StoreError) -> ApiError {
    store_error(StatusCode::CONFLICT)(e)
}

fn not_found_message(what: &str) -> String {
    let mut chars = what.chars();
    match chars.next() {
        Some(first) => format!("{}{} not found", first.to_uppercase(), chars.as_str()),
        None => "Not found".to_string(),
    }
}

pub(crate) fn forbidden(msg: &str) -> ApiError {
    (StatusCode::FORBIDDEN, msg.to_string())
}

pub(crate) fn bad_request() -> ApiError {
    (StatusCode::BAD_REQUEST, "Bad request".to_string())
}

/// Parses an optional JSON body. An empty body yields the default value.
pub(crate) fn json_or_default<T>(body: &[u8]) -> Result<T, ApiError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "malformed json body");
        bad_request()
    })
}

/// `Json<T>` whose rejections (wrong content type, syntax, missing fields, unknown ranks)
/// all answer 400 "Bad request".
pub(crate) struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                tracing::debug!(error = %rejection.body_text(), "rejected json body");
                Err(bad_request())
            }
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let public = Router::new()
        .route("/health", get(health))
        .route("/user", post(api_create_user))
        .route("/user/login", post(api_login))
        .route("/user/logout", get(api_logout))
        .route("/user/check-session", get(api_check_session));

    let authed = Router::new()
        .route("/events", get(api_events))
        .route(
            "/user/{id}",
            get(api_get_user)
                .delete(api_delete_user)
                .patch(api_update_user),
        )
        .route("/user/username/{username}", get(api_get_user_by_username))
        .route("/user/{id}/images", patch(api_add_user_image))
        .route("/game", post(api_create_game))
        .route(
            "/game/{id}",
            get(api_get_game)
                .patch(api_update_game)
                .delete(api_delete_game),
        )
        .route(
            "/game/{id}/user/{user_id}",
            post(api_add_player)
                .delete(api_remove_player)
                .patch(api_update_player_permission),
        )
        .route("/node/{game_id}", post(api_create_node))
        .route(
            "/node/{game_id}/{node_id}",
            patch(api_update_node).delete(api_delete_node),
        )
        .route("/subnode/{game_id}/{node_id}", post(api_create_subnode))
        .route(
            "/subnode/{game_id}/{node_id}/{subnode_id}",
            patch(api_update_subnode).delete(api_delete_subnode),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .nest(
            "/api",
            public
                .merge(authed)
                .route_layer(middleware::from_fn_with_state(state.clone(), db_checker)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Router with CORS for the configured frontend origins.
pub fn build_app(state: AppState, cors_origins: &[String]) -> Router {
    build_router(state).layer(frontend_cors(cors_origins.to_vec()))
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Health> {
    let rev = state.engine.get_rev().map_err(db_error)?;
    Ok(Json(Health { ok: true, rev }))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Events of the caller's games and of their own account.
async fn api_events(
    State(state): State<Arc<AppState>>,
    axum::Extension(me): axum::Extension<SessionUser>,
    axum::extract::Query(q): axum::extract::Query<EventsQuery>,
) -> ApiResult<Vec<EventRecord>> {
    let events = state
        .engine
        .events_for(&me.0, q.since.unwrap_or(0), q.limit.unwrap_or(100))
        .map_err(db_error)?;
    Ok(Json(events))
}

/// Fails fast with 500 when the database cannot be opened.
async fn db_checker(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: middleware::Next,
) -> Response {
    if let Err(e) = state.engine.open() {
        tracing::error!(error = %e, "database unavailable");
        return internal_error().into_response();
    }
    next.run(req).await
}

async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: middleware::Next,
) -> Response {
    let Some(token) = session_token(req.headers()) else {
        return (StatusCode::UNAUTHORIZED, "Not logged in").into_response();
    };
    match state.engine.session_user(&token) {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(SessionUser(user_id));
            next.run(req).await
        }
        Ok(None) => (StatusCode::UNAUTHORIZED, "Not logged in").into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|kv| kv.trim().split_once('='))
        .find(|(k, v)| *k == SESSION_COOKIE && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

pub(crate) fn session_cookie(token: &str, secure: bool) -> HeaderValue {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub(crate) fn expired_session_cookie() -> HeaderValue {
    HeaderValue::from_static("gg_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn frontend_cors(origins: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _req| {
            is_allowed_origin(origin, &origins)
        }))
}

fn is_allowed_origin(origin: &HeaderValue, allowed: &[String]) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };
    allowed.iter().any(|a| a.trim_end_matches('/') == s)
}

/// Installs the global tracing subscriber. The filter falls back to `RUST_LOG`, then `info`.
pub fn init_tracing(filter: Option<&str>) {
    let env_filter = match filter {
        Some(f) => tracing_subscriber::EnvFilter::new(f),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    serve_listener(listener, config, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    config: ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let engine = Engine::new(&config.db_path);
    engine.open()?;
    let state = AppState {
        engine,
        secure_cookies: config.secure_cookies,
    };
    let app = build_app(state, &config.cors_origins);
    let addr = listener.local_addr()?;
    tracing::info!(%addr, db = %config.db_path.display(), "gamegraph server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(addr)
}
