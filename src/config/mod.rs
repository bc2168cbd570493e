// LinkedOut — LinkedIn DM triage backend
// License: Apache-2.0

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("home directory not found")]
    NoHomeDir,
    #[error("{0} is not configured")]
    Missing(&'static str),
    #[error("{key} is not a valid http(s) URL: {value}")]
    InvalidUrl { key: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pocketbase: PocketbaseConfig,
    #[serde(default)]
    pub n8n: N8nConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub unipile: UnipileConfig,
    #[serde(default)]
    pub service_account: ServiceAccountConfig,
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    3000
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Document database (PocketBase).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PocketbaseConfig {
    #[serde(default)]
    pub url: String,
}

/// Automation engine (n8n). `url` is the instance root; the REST API lives
/// under `api/v1/` and webhooks under `webhook/`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct N8nConfig {
    #[serde(default)]
    pub url: String,
}

/// Target of `/api/proxy`. Empty means `<n8n.url>/webhook`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxyConfig {
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnipileConfig {
    #[serde(default)]
    pub dsn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceAccountConfig {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

// ---------------------------------------------------------------------------
// Setup wizard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Directory holding the workflow templates (`<file>.json`).
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,
    #[serde(default = "default_workflows")]
    pub workflows: Vec<WorkflowEntry>,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            workflows_dir: default_workflows_dir(),
            workflows: default_workflows(),
            sessions_dir: default_sessions_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowEntry {
    /// Name the workflow is created under in n8n.
    pub name: String,
    /// Template file stem inside `workflows_dir`.
    pub file: String,
}

fn default_workflows_dir() -> String {
    "workflows".to_string()
}
fn default_workflows() -> Vec<WorkflowEntry> {
    [
        ("/inbox backend [linkedout]", "inbox-backend"),
        ("/thread backend [linkedout]", "thread-backend"),
        ("/setup backend [linkedout]", "setup-workflow"),
    ]
    .into_iter()
    .map(|(name, file)| WorkflowEntry {
        name: name.to_string(),
        file: file.to_string(),
    })
    .collect()
}
fn default_sessions_dir() -> String {
    "~/.linkedout/sessions".to_string()
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HttpConfig {
    /// Request timeout. Unset leaves the client default (no timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a JSON file, falling back to defaults.
    /// Environment overrides are applied in both cases.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a variable lookup. The deployment variables of the
    /// web front end are honoured first, `LINKEDOUT_*` variables win over them.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |keys: &[&str]| keys.iter().rev().find_map(|k| lookup(*k));

        if let Some(v) = pick(&["NEXT_PUBLIC_POCKETBASE_URL", "LINKEDOUT_POCKETBASE_URL"]) {
            self.pocketbase.url = v;
        }
        if let Some(v) = pick(&["NEXT_PUBLIC_N8N_WEBHOOK_URL", "LINKEDOUT_N8N_URL"]) {
            self.n8n.url = v;
        }
        if let Some(v) = pick(&["NEXT_PUBLIC_API_BASE_URL", "LINKEDOUT_PROXY_BASE_URL"]) {
            self.proxy.base_url = v;
        }
        if let Some(v) = pick(&["UNIPILE_DSN_URL"]) {
            self.unipile.dsn = v;
        }
        if let Some(v) = pick(&["POCKETBASE_SERVICE_USER_EMAIL"]) {
            self.service_account.email = v;
        }
        if let Some(v) = pick(&["POCKETBASE_SERVICE_USER_PASSWORD"]) {
            self.service_account.password = v;
        }
        if let Some(v) = pick(&["LINKEDOUT_SERVER_HOST"]) {
            self.server.host = v;
        }
        if let Some(v) = pick(&["LINKEDOUT_SERVER_PORT"]) {
            if let Ok(n) = v.parse() {
                self.server.port = n;
            }
        }
        if let Some(v) = pick(&["LINKEDOUT_HTTP_TIMEOUT_SECS"]) {
            if let Ok(n) = v.parse() {
                self.http.timeout_secs = Some(n);
            }
        }
    }

    /// Get the default config file path: ~/.linkedout/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".linkedout").join("config.json"))
    }

    /// Resolve the sessions directory, expanding `~` to home directory.
    pub fn sessions_path(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.setup.sessions_dir)
    }

    pub fn workflows_path(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.setup.workflows_dir)
    }

    pub fn pocketbase_url(&self) -> Result<&str, ConfigError> {
        non_empty(&self.pocketbase.url, "pocketbase.url")
    }

    pub fn n8n_url(&self) -> Result<&str, ConfigError> {
        non_empty(&self.n8n.url, "n8n.url")
    }

    /// Base URL the reverse proxy forwards to.
    pub fn proxy_base_url(&self) -> Result<String, ConfigError> {
        if !self.proxy.base_url.is_empty() {
            return Ok(self.proxy.base_url.clone());
        }
        let n8n = self
            .n8n_url()
            .map_err(|_| ConfigError::Missing("proxy.base_url"))?;
        Ok(format!("{}/webhook", n8n.trim_end_matches('/')))
    }

    /// Validate configuration for basic correctness. Every configured URL must
    /// be absolute http(s); unset URLs are reported by the accessor that needs
    /// them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("pocketbase.url", &self.pocketbase.url),
            ("n8n.url", &self.n8n.url),
            ("proxy.base_url", &self.proxy.base_url),
        ] {
            if value.is_empty() {
                continue;
            }
            let ok = url::Url::parse(value)
                .map(|u| matches!(u.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !ok {
                return Err(ConfigError::InvalidUrl {
                    key,
                    value: value.clone(),
                });
            }
        }

        if self.service_account.email.is_empty() != self.service_account.password.is_empty() {
            tracing::warn!("Service account email and password should be set together");
        }

        Ok(())
    }
}

fn non_empty<'a>(value: &'a str, key: &'static str) -> Result<&'a str, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(key))
    } else {
        Ok(value)
    }
}

fn expand_home(path: &str) -> Result<PathBuf, ConfigError> {
    if let Some(stripped) = path.strip_prefix('~') {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(path.strip_prefix("~/").unwrap_or(stripped)))
    } else {
        Ok(PathBuf::from(path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.setup.workflows_dir, "workflows");
        assert_eq!(cfg.setup.workflows.len(), 3);
        assert_eq!(cfg.setup.workflows[0].file, "inbox-backend");
        assert_eq!(cfg.setup.workflows[2].name, "/setup backend [linkedout]");
        assert!(cfg.http.timeout_secs.is_none());
    }

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{"pocketbase": {"url": "http://127.0.0.1:8090"}}"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.pocketbase.url, "http://127.0.0.1:8090");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.setup.sessions_dir, "~/.linkedout/sessions");
    }

    #[test]
    fn test_env_overrides_prefer_linkedout_prefix() {
        let vars: HashMap<&str, &str> = [
            ("NEXT_PUBLIC_POCKETBASE_URL", "http://pb.public"),
            ("LINKEDOUT_POCKETBASE_URL", "http://pb.local"),
            ("NEXT_PUBLIC_N8N_WEBHOOK_URL", "https://n8n.example"),
            ("UNIPILE_DSN_URL", "api1.unipile.com:13111"),
            ("LINKEDOUT_SERVER_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.pocketbase.url, "http://pb.local");
        assert_eq!(cfg.n8n.url, "https://n8n.example");
        assert_eq!(cfg.unipile.dsn, "api1.unipile.com:13111");
        assert_eq!(cfg.server.port, 3000);
    }

    #[test]
    fn test_proxy_base_falls_back_to_n8n_webhook() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.proxy_base_url(),
            Err(ConfigError::Missing("proxy.base_url"))
        ));

        cfg.n8n.url = "https://n8n.example/".into();
        assert_eq!(cfg.proxy_base_url().unwrap(), "https://n8n.example/webhook");

        cfg.proxy.base_url = "https://hooks.example/webhook".into();
        assert_eq!(cfg.proxy_base_url().unwrap(), "https://hooks.example/webhook");
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());

        cfg.pocketbase.url = "ftp://pb".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidUrl { key: "pocketbase.url", .. })
        ));
    }

    #[test]
    fn test_sessions_path_tilde() {
        let cfg = Config::default();
        let path = cfg.sessions_path().unwrap();
        assert!(path.to_str().unwrap().contains(".linkedout"));
        assert!(!path.to_str().unwrap().starts_with('~'));
    }
}
