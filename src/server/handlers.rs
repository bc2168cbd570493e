// LinkedOut — HTTP handlers

use super::{ServerState, AUTH_COOKIE, AUTH_COOKIE_MAX_AGE};
use crate::pocketbase::{self, AuthError};
use crate::remote::{join_url, Credential, RemoteRequest, RemoteResponse, ResponseBody};
use crate::setup::steps::n8n_credential;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const SETUP_PREFIX: &str = "setup/";

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Empty body forwards nothing; anything else must be JSON.
fn parse_body(body: &Bytes) -> Result<Option<Value>, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid JSON body"))
}

/// Relay an upstream response: same status, JSON when it parsed, plain text
/// otherwise.
fn relay(resp: RemoteResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    match resp.body {
        ResponseBody::Json(value) => (status, Json(value)).into_response(),
        ResponseBody::Text(text) => (status, [(CONTENT_TYPE, "text/plain")], text).into_response(),
    }
}

/// Normalise a proxy endpoint and refuse the setup webhooks, which are only
/// reachable through the wizard.
fn webhook_endpoint(raw: &str) -> Result<&str, Response> {
    let endpoint = raw.trim_start_matches('/');
    if endpoint.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Missing endpoint"));
    }
    if endpoint.starts_with(SETUP_PREFIX) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Setup endpoints not supported in this route",
        ));
    }
    Ok(endpoint)
}

async fn forward(state: &ServerState, req: RemoteRequest) -> Response {
    let url = req.url.clone();
    match state.client.call(req).await {
        Ok(resp) => {
            tracing::info!(url = %url, status = resp.status, "Upstream responded");
            relay(resp)
        }
        Err(e) => {
            tracing::error!(url = %url, error = %e, "Proxy error");
            internal_error()
        }
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

pub async fn index() -> Html<&'static str> {
    Html(super::templates::INDEX_HTML)
}

pub async fn login_page() -> Html<&'static str> {
    Html(super::templates::LOGIN_HTML)
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

// ---------------------------------------------------------------------------
// Reverse proxy
// ---------------------------------------------------------------------------

/// `POST /api/proxy`: forward the JSON body to `<proxy_base>/<x-endpoint>`.
pub async fn proxy_post(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(raw) = header_str(&headers, "x-endpoint") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing endpoint");
    };
    let endpoint = match webhook_endpoint(raw) {
        Ok(e) => e,
        Err(resp) => return resp,
    };

    let Some(token) = header_str(&headers, AUTHORIZATION.as_str()) else {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    };

    let body = match parse_body(&body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    tracing::info!(endpoint = %endpoint, "Forwarding request to webhook");

    let mut req = RemoteRequest::post(join_url(&state.proxy_base, endpoint))
        .credential(Credential::Authorization(token.to_string()));
    if let Some(body) = body {
        req = req.json(body);
    }
    forward(&state, req).await
}

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    pub endpoint: Option<String>,
}

/// `GET /api/proxy?endpoint=<path>`.
pub async fn proxy_get(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
) -> Response {
    let Some(raw) = params.endpoint.filter(|e| !e.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing endpoint");
    };
    let endpoint = match webhook_endpoint(&raw) {
        Ok(e) => e,
        Err(resp) => return resp,
    };

    let Some(token) = header_str(&headers, AUTHORIZATION.as_str()) else {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    };

    tracing::info!(endpoint = %endpoint, "Forwarding GET request to webhook");

    let req = RemoteRequest::get(join_url(&state.proxy_base, endpoint))
        .credential(Credential::Authorization(token.to_string()));
    forward(&state, req).await
}

// ---------------------------------------------------------------------------
// Setup proxy
// ---------------------------------------------------------------------------

/// `POST /api/setup`: forward to the automation engine's REST API with the
/// caller's API key.
pub async fn setup_proxy(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (Some(service), Some(endpoint)) = (
        header_str(&headers, "x-service"),
        header_str(&headers, "x-endpoint"),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required headers");
    };

    if service != "n8n" {
        return error_response(StatusCode::BAD_REQUEST, "Unsupported service");
    }

    let Some(api_key) = header_str(&headers, "x-n8n-api-key") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing n8n API key");
    };

    if state.n8n_url.is_empty() {
        tracing::error!("n8n.url is not configured");
        return internal_error();
    }

    let body = match parse_body(&body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    tracing::info!(endpoint = %endpoint, "Forwarding setup request to n8n");

    let mut req =
        RemoteRequest::post(join_url(&state.n8n_url, endpoint)).credential(n8n_credential(api_key));
    if let Some(body) = body {
        req = req.json(body);
    }
    forward(&state, req).await
}

// ---------------------------------------------------------------------------
// Login / logout
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

fn auth_cookie_header(token: &str, max_age: u64) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Lax",
        AUTH_COOKIE, token, max_age
    )
}

/// `POST /login`: password-auth a superuser and set the auth cookie.
pub async fn login(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let creds: LoginRequest = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    if creds.email.is_empty() || creds.password.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Email and password are required");
    }

    if state.pocketbase_url.is_empty() {
        tracing::error!("pocketbase.url is not configured");
        return internal_error();
    }

    match pocketbase::auth_with_password(
        &state.client,
        &state.pocketbase_url,
        &creds.email,
        &creds.password,
    )
    .await
    {
        Ok(session) => {
            tracing::info!(email = %creds.email, "Superuser logged in");
            (
                StatusCode::OK,
                [(SET_COOKIE, auth_cookie_header(&session.token, AUTH_COOKIE_MAX_AGE))],
                Json(json!({ "token": session.token, "record": session.record })),
            )
                .into_response()
        }
        Err(AuthError::Rejected { status, message }) => {
            tracing::warn!(status, "Login rejected");
            error_response(StatusCode::UNAUTHORIZED, &message)
        }
        Err(e) => {
            tracing::error!(error = %e, "Login failed");
            internal_error()
        }
    }
}

/// `POST /logout`: clear the cookie and go back to the login page.
pub async fn logout() -> Response {
    (
        [(SET_COOKIE, auth_cookie_header("", 0))],
        Redirect::to("/login"),
    )
        .into_response()
}
