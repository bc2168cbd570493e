// LinkedOut — First-run setup wizard
//
// Provisions the automation engine (n8n) and the document database
// (PocketBase) through a fixed sequence of remote calls. Each step carries an
// idle/loading/success/error status; the first failure halts the sequence.

pub mod runner;
pub mod session;
pub mod steps;

use crate::config::{Config, ConfigError};
use crate::pocketbase::AuthError;
use crate::remote::{RemoteClient, RemoteError};
use crate::template::TemplateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use runner::SetupRunner;
pub use session::{SessionStore, SetupSession};
pub use steps::SetupPhase;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl Status {
    /// idle→loading, loading→success|error, error→loading. Nothing else.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Idle, Status::Loading)
                | (Status::Loading, Status::Success)
                | (Status::Loading, Status::Error)
                | (Status::Error, Status::Loading)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Loading => "loading",
            Status::Success => "success",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum StepError {
    #[error("missing input: {0}")]
    MissingInput(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Failed to authenticate with PocketBase: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("{context}: response has no '{field}' field")]
    MissingField {
        context: &'static str,
        field: &'static str,
    },
    #[error("step '{step}' cannot go from {from} to {to}")]
    InvalidTransition {
        step: String,
        from: Status,
        to: Status,
    },
}

/// Why a setup phase did not complete.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("missing input: {}", .0.join(", "))]
    MissingInput(Vec<&'static str>),
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },
}

impl SetupError {
    pub fn step(&self) -> Option<&str> {
        match self {
            SetupError::StepFailed { step, .. } => Some(step),
            SetupError::MissingInput(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// What a step can touch while it runs.
pub struct StepContext<'a> {
    pub client: &'a RemoteClient,
    pub config: &'a Config,
    pub session: &'a mut SetupSession,
}

#[async_trait]
pub trait SetupStep: Send + Sync {
    /// Stable identifier, used as the status key.
    fn name(&self) -> &str;
    /// One-line description for progress output.
    fn description(&self) -> &str;
    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<(), StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use Status::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Success));
        assert!(Loading.can_transition_to(Error));
        assert!(Error.can_transition_to(Loading));
    }

    #[test]
    fn test_forbidden_transitions() {
        use Status::*;
        for (from, to) in [
            (Idle, Success),
            (Idle, Error),
            (Idle, Idle),
            (Loading, Idle),
            (Loading, Loading),
            (Success, Loading),
            (Success, Idle),
            (Success, Error),
            (Error, Success),
            (Error, Idle),
        ] {
            assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
        }
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(serde_json::to_string(&Status::Loading).unwrap(), "\"loading\"");
        let s: Status = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(s, Status::Error);
    }
}
