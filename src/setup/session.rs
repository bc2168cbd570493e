// LinkedOut — Setup session state and file-based persistence

use super::runner::SetupRunner;
use super::Status;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const N8N_API_KEY: &str = "n8n";
pub const UNIPILE_API_KEY: &str = "unipile";

/// Wizard pages, in navigation order.
pub const FIRST_STEP: u8 = 1;
pub const STEP_N8N: u8 = 2;
pub const STEP_MANUAL: u8 = 3;
pub const STEP_POCKETBASE: u8 = 4;
pub const LAST_STEP: u8 = 5;

/// A response field that was either returned by the upstream or filled in
/// locally because it was missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "lowercase")]
pub enum Field<T> {
    Present(T),
    Defaulted(T),
}

impl<T> Field<T> {
    pub fn from_option(value: Option<T>, default: T) -> Self {
        match value {
            Some(v) => Field::Present(v),
            None => Field::Defaulted(default),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Field::Present(v) | Field::Defaulted(v) => v,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Field::Defaulted(_))
    }
}

/// Credentials of the service account the automation engine writes records
/// with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub username: Field<String>,
    pub password: Field<String>,
    #[serde(default)]
    pub workflow_created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupSession {
    pub id: String,
    #[serde(default)]
    service_api_keys: BTreeMap<String, String>,
    #[serde(default)]
    unipile_dsn: String,
    #[serde(default)]
    pocketbase_superuser_email: String,
    /// Never written to disk; re-entered after a restart.
    #[serde(skip)]
    pocketbase_superuser_password: String,
    #[serde(default)]
    credential_id: Option<String>,
    #[serde(default)]
    service_account: Option<ServiceAccount>,
    #[serde(default)]
    step_status: BTreeMap<String, Status>,
    #[serde(default)]
    n8n_complete: bool,
    #[serde(default)]
    manual_complete: bool,
    #[serde(default)]
    pocketbase_complete: bool,
    #[serde(default = "first_step")]
    current_step: u8,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn first_step() -> u8 {
    FIRST_STEP
}

impl Default for SetupSession {
    fn default() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }
}

impl SetupSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            service_api_keys: BTreeMap::new(),
            unipile_dsn: String::new(),
            pocketbase_superuser_email: String::new(),
            pocketbase_superuser_password: String::new(),
            credential_id: None,
            service_account: None,
            step_status: BTreeMap::new(),
            n8n_complete: false,
            manual_complete: false,
            pocketbase_complete: false,
            current_step: FIRST_STEP,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    // -- details -----------------------------------------------------------

    pub fn api_key(&self, service: &str) -> Option<&str> {
        self.service_api_keys
            .get(service)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    pub fn set_api_key(&mut self, service: &str, key: impl Into<String>) {
        self.service_api_keys.insert(service.to_string(), key.into());
    }

    pub fn n8n_api_key(&self) -> Option<&str> {
        self.api_key(N8N_API_KEY)
    }

    pub fn set_n8n_api_key(&mut self, key: impl Into<String>) {
        self.set_api_key(N8N_API_KEY, key);
    }

    pub fn unipile_api_key(&self) -> Option<&str> {
        self.api_key(UNIPILE_API_KEY)
    }

    pub fn set_unipile_api_key(&mut self, key: impl Into<String>) {
        self.set_api_key(UNIPILE_API_KEY, key);
    }

    pub fn unipile_dsn(&self) -> Option<&str> {
        Some(self.unipile_dsn.as_str()).filter(|s| !s.is_empty())
    }

    pub fn set_unipile_dsn(&mut self, dsn: impl Into<String>) {
        self.unipile_dsn = dsn.into();
    }

    pub fn superuser_email(&self) -> Option<&str> {
        Some(self.pocketbase_superuser_email.as_str()).filter(|s| !s.is_empty())
    }

    pub fn set_superuser_email(&mut self, email: impl Into<String>) {
        self.pocketbase_superuser_email = email.into();
    }

    pub fn superuser_password(&self) -> Option<&str> {
        Some(self.pocketbase_superuser_password.as_str()).filter(|s| !s.is_empty())
    }

    pub fn set_superuser_password(&mut self, password: impl Into<String>) {
        self.pocketbase_superuser_password = password.into();
    }

    // -- step results ------------------------------------------------------

    pub fn credential_id(&self) -> Option<&str> {
        self.credential_id.as_deref()
    }

    pub fn set_credential_id(&mut self, id: impl Into<String>) {
        self.credential_id = Some(id.into());
    }

    pub fn service_account(&self) -> Option<&ServiceAccount> {
        self.service_account.as_ref()
    }

    pub fn set_service_account(&mut self, account: ServiceAccount) {
        self.service_account = Some(account);
    }

    pub fn step_status(&self, step: &str) -> Status {
        self.step_status.get(step).copied().unwrap_or_default()
    }

    pub fn step_statuses(&self) -> &BTreeMap<String, Status> {
        &self.step_status
    }

    /// Copy the runner's per-step statuses into the session.
    pub fn record_statuses(&mut self, runner: &SetupRunner) {
        for (name, _, status) in runner.statuses() {
            self.step_status.insert(name.to_string(), status);
        }
    }

    // -- completion flags --------------------------------------------------

    pub fn n8n_complete(&self) -> bool {
        self.n8n_complete
    }

    pub fn set_n8n_complete(&mut self, done: bool) {
        self.n8n_complete = done;
    }

    pub fn manual_complete(&self) -> bool {
        self.manual_complete
    }

    pub fn set_manual_complete(&mut self, done: bool) {
        self.manual_complete = done;
    }

    pub fn pocketbase_complete(&self) -> bool {
        self.pocketbase_complete
    }

    pub fn set_pocketbase_complete(&mut self, done: bool) {
        self.pocketbase_complete = done;
    }

    // -- navigation --------------------------------------------------------

    pub fn current_step(&self) -> u8 {
        self.current_step
    }

    pub fn set_current_step(&mut self, step: u8) {
        self.current_step = step.clamp(FIRST_STEP, LAST_STEP);
    }

    pub fn next_step(&mut self) {
        self.set_current_step(self.current_step.saturating_add(1));
    }

    pub fn previous_step(&mut self) {
        self.set_current_step(self.current_step.saturating_sub(1));
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Stores one JSON file per session id under `dir`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the session atomically: temp file then rename.
    pub async fn save(&self, session: &SetupSession) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.session_path(&session.id)?;
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&tmp_path, &content).await?;

        // API keys live in this file.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp_path, &path).await?;
        tracing::debug!(session = %session.id, path = %path.display(), "Setup session saved");
        Ok(())
    }

    /// `Ok(None)` when no session with this id was saved.
    pub async fn load(&self, id: &str) -> anyhow::Result<Option<SetupSession>> {
        let path = self.session_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let session: SetupSession = serde_json::from_str(&content)?;
        Ok(Some(session))
    }

    pub async fn remove(&self, id: &str) -> anyhow::Result<()> {
        let path = self.session_path(id)?;
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    /// List the ids stored in the saved session files. Unreadable files are
    /// skipped.
    pub async fn list(&self) -> Vec<String> {
        let mut ids = Vec::new();

        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let stored = match tokio::fs::read_to_string(&path).await {
                    Ok(content) => serde_json::from_str::<SetupSession>(&content),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to read setup session");
                        continue;
                    }
                };
                match stored {
                    Ok(session) => ids.push(session.id),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping invalid setup session")
                    }
                }
            }
        }

        ids.sort();
        ids
    }

    /// Ids map one-to-one onto file names, so only `[A-Za-z0-9_-]` is allowed.
    fn session_path(&self, id: &str) -> anyhow::Result<PathBuf> {
        if !is_valid_session_id(id) {
            anyhow::bail!(
                "invalid session id '{}': use letters, digits, '-' or '_'",
                id
            );
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}
