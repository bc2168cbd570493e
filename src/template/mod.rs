// LinkedOut — Workflow templates and placeholder substitution

use crate::config::WorkflowEntry;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

pub const POCKETBASE_BASE_URL: &str = "****POCKETBASE_BASE_URL****";
pub const UNIPILE_CREDENTIAL_ID: &str = "****UNIPILE_CREDENTIAL_ID****";
pub const UNIPILE_DSN_URL: &str = "****UNIPILE_DSN_URL****";
pub const POCKETBASE_SERVICE_USER_EMAIL: &str = "****POCKETBASE_SERVICE_USER_EMAIL****";
pub const POCKETBASE_SERVICE_USER_PASSWORD: &str = "****POCKETBASE_SERVICE_USER_PASSWORD****";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("failed to read workflow template {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("workflow template {path:?} is not valid JSON: {source}")]
    InvalidTemplate {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("template no longer parses after substitution: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("workflow '{workflow}' still contains placeholders: {}", .placeholders.join(", "))]
    Unresolved {
        workflow: String,
        placeholders: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Replacements
// ---------------------------------------------------------------------------

/// Ordered placeholder → value mapping. Replacement runs in insertion order;
/// re-inserting a placeholder updates its value but keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replacements {
    entries: Vec<(String, String)>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, placeholder: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let placeholder = placeholder.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(p, _)| *p == placeholder) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((placeholder, value)),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Replacements {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut r = Replacements::new();
        for (k, v) in iter {
            r.insert(k, v);
        }
        r
    }
}

/// Serialize `template`, replace every occurrence of every placeholder
/// literally, and parse the result again.
///
/// Values are inserted as raw text: a value containing `"` or `\` breaks the
/// surrounding JSON string and surfaces as [`TemplateError::Parse`].
pub fn substitute(template: &Value, replacements: &Replacements) -> Result<Value, TemplateError> {
    let mut text = template.to_string();
    for (placeholder, value) in replacements.iter() {
        if placeholder.is_empty() {
            continue;
        }
        text = text.replace(placeholder, value);
    }
    serde_json::from_str(&text).map_err(TemplateError::Parse)
}

fn sentinel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*{4}[A-Z0-9_]+\*{4}").expect("sentinel pattern is valid"))
}

/// Sentinels (`****NAME****`) still present anywhere in the document, sorted
/// and deduplicated.
pub fn unresolved_placeholders(document: &Value) -> Vec<String> {
    let text = document.to_string();
    let mut found: Vec<String> = sentinel_re()
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();
    found.sort();
    found.dedup();
    found
}

// ---------------------------------------------------------------------------
// Workflow templates
// ---------------------------------------------------------------------------

/// An n8n workflow export with sentinel placeholders, plus the name it is
/// imported under.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    pub name: String,
    document: Value,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, document: Value) -> Self {
        Self {
            name: name.into(),
            document,
        }
    }

    /// Load `<dir>/<entry.file>.json`.
    pub fn load(dir: &Path, entry: &WorkflowEntry) -> Result<Self, TemplateError> {
        let path = dir.join(format!("{}.json", entry.file));
        let content = std::fs::read_to_string(&path).map_err(|source| TemplateError::Read {
            path: path.clone(),
            source,
        })?;
        let document = serde_json::from_str(&content)
            .map_err(|source| TemplateError::InvalidTemplate { path, source })?;
        Ok(Self::new(entry.name.clone(), document))
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Sentinels referenced by the template before any substitution.
    pub fn placeholders(&self) -> Vec<String> {
        unresolved_placeholders(&self.document)
    }

    /// Substitute placeholders and wrap the result into the body accepted by
    /// `POST /api/v1/workflows`.
    pub fn render(&self, replacements: &Replacements) -> Result<Value, TemplateError> {
        let document = substitute(&self.document, replacements)?;

        let unresolved = unresolved_placeholders(&document);
        if !unresolved.is_empty() {
            return Err(TemplateError::Unresolved {
                workflow: self.name.clone(),
                placeholders: unresolved,
            });
        }

        Ok(clean_workflow(&self.name, &document))
    }
}

/// Keep only what the n8n public API accepts on create: exported workflows
/// carry ids, tags, pin data and metadata that the endpoint rejects.
pub fn clean_workflow(name: &str, document: &Value) -> Value {
    json!({
        "name": name,
        "nodes": document.get("nodes").cloned().unwrap_or_else(|| json!([])),
        "connections": document.get("connections").cloned().unwrap_or_else(|| json!({})),
        "settings": {
            "saveExecutionProgress": true,
            "saveManualExecutions": true,
            "saveDataErrorExecution": "all",
            "saveDataSuccessExecution": "all",
            "executionTimeout": 3600,
            "timezone": "UTC"
        }
    })
}
