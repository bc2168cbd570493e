// LinkedOut — Document database (PocketBase) superuser authentication

use crate::remote::{join_url, RemoteClient, RemoteError, RemoteRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

pub const SUPERUSER_AUTH_PATH: &str = "api/collections/_superusers/auth-with-password";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("PocketBase rejected the credentials (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("PocketBase auth response did not contain a token")]
    MissingToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub record: Option<AuthRecord>,
}

/// Password-auth a superuser and return its token.
pub async fn auth_with_password(
    client: &RemoteClient,
    base_url: &str,
    identity: &str,
    password: &str,
) -> Result<AuthSession, AuthError> {
    let url = join_url(base_url, SUPERUSER_AUTH_PATH);
    tracing::debug!(url = %url, "Authenticating PocketBase superuser");

    let resp = client
        .call(RemoteRequest::post(url).json(json!({
            "identity": identity,
            "password": password,
        })))
        .await?;

    if !resp.ok {
        let message = resp
            .body
            .error_message()
            .unwrap_or_else(|| "no details".to_string());
        tracing::warn!(status = resp.status, "PocketBase authentication failed");
        return Err(AuthError::Rejected {
            status: resp.status,
            message,
        });
    }

    let token = resp.str_field("token").ok_or(AuthError::MissingToken)?.to_string();
    let record = resp
        .body
        .as_json()
        .and_then(|v| v.get("record"))
        .and_then(|r| serde_json::from_value(r.clone()).ok());

    Ok(AuthSession { token, record })
}
