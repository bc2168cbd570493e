// LinkedOut — Backend reachability checks

use crate::config::Config;
use crate::remote::{join_url, RemoteClient, RemoteRequest};

pub const POCKETBASE_HEALTH_PATH: &str = "api/health";

/// Result of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCheck {
    pub name: &'static str,
    pub url: String,
    pub reachable: bool,
    /// HTTP status, transport error or "not configured".
    pub detail: String,
}

async fn check(client: &RemoteClient, name: &'static str, url: String) -> BackendCheck {
    match client.call(RemoteRequest::get(url.as_str())).await {
        Ok(resp) => BackendCheck {
            name,
            reachable: resp.ok,
            detail: format!("status {}", resp.status),
            url,
        },
        Err(e) => {
            tracing::debug!(backend = name, url = %url, error = %e, "Backend unreachable");
            BackendCheck {
                name,
                reachable: false,
                detail: e.to_string(),
                url,
            }
        }
    }
}

fn not_configured(name: &'static str) -> BackendCheck {
    BackendCheck {
        name,
        url: String::new(),
        reachable: false,
        detail: "not configured".to_string(),
    }
}

/// `GET <pocketbase>/api/health` and `GET <n8n>`; a 2xx answer counts as
/// reachable.
pub async fn check_backends(client: &RemoteClient, config: &Config) -> Vec<BackendCheck> {
    let pocketbase = match config.pocketbase_url() {
        Ok(base) => check(client, "PocketBase", join_url(base, POCKETBASE_HEALTH_PATH)).await,
        Err(_) => not_configured("PocketBase"),
    };
    let n8n = match config.n8n_url() {
        Ok(base) => check(client, "n8n", base.to_string()).await,
        Err(_) => not_configured("n8n"),
    };
    vec![pocketbase, n8n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_both_backends_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": 200, "message": "API is healthy."})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.pocketbase.url = server.uri();
        config.n8n.url = server.uri();
        let client = RemoteClient::new(None).unwrap();

        let checks = check_backends(&client, &config).await;
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].name, "PocketBase");
        assert_eq!(checks[0].url, format!("{}/api/health", server.uri()));
        assert!(checks[0].reachable);
        assert_eq!(checks[1].name, "n8n");
        assert!(checks[1].reachable);
        assert_eq!(checks[1].detail, "status 200");
    }

    #[tokio::test]
    async fn test_error_status_and_missing_url_are_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.pocketbase.url = server.uri();
        let client = RemoteClient::new(None).unwrap();

        let checks = check_backends(&client, &config).await;
        assert!(!checks[0].reachable);
        assert_eq!(checks[0].detail, "status 503");
        assert!(!checks[1].reachable);
        assert_eq!(checks[1].detail, "not configured");
    }

    #[tokio::test]
    async fn test_transport_failure_is_unreachable() {
        let mut config = Config::default();
        config.n8n.url = "http://127.0.0.1:9".into();
        let client = RemoteClient::new(None).unwrap();

        let checks = check_backends(&client, &config).await;
        assert!(!checks[1].reachable);
        assert!(checks[1].detail.starts_with("request to http://127.0.0.1:9 failed"));
    }
}
