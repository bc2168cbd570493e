// LinkedOut — Remote call wrapper
//
// One place that talks HTTP to the automation engine and the document
// database. Every call is normalised into `{ok, status, body}` where the body
// is JSON when it parses and raw text otherwise.

use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context} (status {status}): {message}")]
    Upstream {
        context: String,
        status: u16,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Request side
// ---------------------------------------------------------------------------

/// How a request authenticates against the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: <value>`, forwarded verbatim.
    Authorization(String),
    /// A service-specific header such as `X-N8N-API-KEY`.
    Header { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: Method,
    pub url: String,
    pub credential: Credential,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            credential: Credential::None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

// ---------------------------------------------------------------------------
// Response side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// JSON if the text parses, the raw text otherwise.
    pub fn parse(text: String) -> Self {
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => ResponseBody::Json(v),
            Err(_) => ResponseBody::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Text(_) => None,
        }
    }

    /// Best human-readable error text: the `message` or `error` field of a JSON
    /// body, else the raw text.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ResponseBody::Json(v) => ["message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()))
                .map(String::from),
            ResponseBody::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
            ResponseBody::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub ok: bool,
    pub status: u16,
    pub body: ResponseBody,
}

impl RemoteResponse {
    /// Turn a non-2xx response into [`RemoteError::Upstream`]. `context` is the
    /// fallback message when the body carries none.
    pub fn error_for_status(self, context: &str) -> Result<Self, RemoteError> {
        if self.ok {
            return Ok(self);
        }
        let message = self
            .body
            .error_message()
            .unwrap_or_else(|| "no details".to_string());
        Err(RemoteError::Upstream {
            context: context.to_string(),
            status: self.status,
            message,
        })
    }

    /// String field of a JSON body.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body
            .as_json()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RemoteClient {
    client: Client,
}

impl RemoteClient {
    /// `timeout: None` leaves reqwest's default in place.
    pub fn new(timeout: Option<Duration>) -> Result<Self, RemoteError> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build().map_err(RemoteError::Client)?,
        })
    }

    pub fn from_config(cfg: &crate::config::Config) -> Result<Self, RemoteError> {
        Self::new(cfg.http.timeout_secs.map(Duration::from_secs))
    }

    /// Perform the call. Only transport failures are errors; any HTTP status
    /// comes back as a [`RemoteResponse`].
    pub async fn call(&self, req: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        tracing::debug!(method = %req.method, url = %req.url, "Sending remote request");

        let mut builder = self.client.request(req.method.clone(), &req.url);

        builder = match &req.credential {
            Credential::None => builder,
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Authorization(value) => builder.header("Authorization", value),
            Credential::Header { name, value } => builder.header(name.as_str(), value),
        };

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value);
        }

        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|source| RemoteError::Transport {
            url: req.url.clone(),
            source,
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| RemoteError::Transport {
                url: req.url.clone(),
                source,
            })?;

        tracing::debug!(url = %req.url, status = %status, body_len = text.len(), "Remote response received");

        Ok(RemoteResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            body: ResponseBody::parse(text),
        })
    }
}

/// Join a base URL and a relative path with exactly one slash between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
