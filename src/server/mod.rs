// LinkedOut — HTTP server (Axum)
//
// Authenticated reverse proxy to the webhook backend, the setup proxy to the
// automation engine's REST API, superuser login/logout and the cookie guard
// in front of every page.

pub mod handlers;
pub mod templates;

use crate::config::Config;
use crate::remote::RemoteClient;
use axum::extract::Request;
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const AUTH_COOKIE: &str = "auth_token";
/// Seven days.
pub const AUTH_COOKIE_MAX_AGE: u64 = 604_800;

/// Paths reachable without the auth cookie.
pub const PUBLIC_PATHS: &[&str] = &["/", "/login"];

/// Shared state for HTTP handlers. Immutable after startup.
pub struct ServerState {
    pub client: RemoteClient,
    /// Where `/api/proxy` forwards to.
    pub proxy_base: String,
    /// Automation engine base, used by `/api/setup`.
    pub n8n_url: String,
    /// Document database base, used by `/login`.
    pub pocketbase_url: String,
}

impl ServerState {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            client: RemoteClient::from_config(config)?,
            proxy_base: config.proxy_base_url()?,
            n8n_url: config.n8n.url.clone(),
            pocketbase_url: config.pocketbase.url.clone(),
        })
    }
}

/// Build the application router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/login", get(handlers::login_page).post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route(
            "/api/proxy",
            get(handlers::proxy_get).post(handlers::proxy_post),
        )
        .route("/api/setup", post(handlers::setup_proxy))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(route_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(addr: SocketAddr, config: Config) -> anyhow::Result<()> {
    let state = Arc::new(ServerState::from_config(&config)?);
    tracing::info!(
        addr = %addr,
        proxy_base = %state.proxy_base,
        "Starting LinkedOut server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Routing guard
// ---------------------------------------------------------------------------

/// Value of the auth cookie, if present and non-empty.
pub fn auth_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn is_guarded(path: &str) -> bool {
    !(path == "/api" || path.starts_with("/api/") || path == "/favicon.ico")
}

/// Redirect anonymous visitors to the login page, and signed-in visitors
/// away from it. API routes check their own credentials.
async fn route_guard(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if !is_guarded(&path) {
        return next.run(req).await;
    }

    let has_cookie = auth_cookie(req.headers()).is_some();
    let is_public = PUBLIC_PATHS.contains(&path.as_str());

    if !has_cookie && !is_public {
        tracing::debug!(path = %path, "No auth cookie, redirecting to login");
        return Redirect::to("/login").into_response();
    }

    if has_cookie && path == "/login" {
        tracing::debug!("Auth cookie present, redirecting to inbox");
        return Redirect::to("/inbox").into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_auth_cookie_parsing() {
        let mut headers = HeaderMap::new();
        assert!(auth_cookie(&headers).is_none());

        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; auth_token=abc.def"));
        assert_eq!(auth_cookie(&headers), Some("abc.def"));

        headers.insert(COOKIE, HeaderValue::from_static("auth_token="));
        assert!(auth_cookie(&headers).is_none());

        headers.insert(COOKIE, HeaderValue::from_static("xauth_token=1"));
        assert!(auth_cookie(&headers).is_none());
    }

    #[test]
    fn test_guarded_paths() {
        assert!(is_guarded("/"));
        assert!(is_guarded("/inbox"));
        assert!(is_guarded("/apiary"));
        assert!(!is_guarded("/api/proxy"));
        assert!(!is_guarded("/api"));
    }
}
