// LinkedOut — Concrete setup steps and the phases that group them

use super::runner::SetupRunner;
use super::session::{
    Field, ServiceAccount, SetupSession, LAST_STEP, STEP_MANUAL, STEP_POCKETBASE,
};
use super::{SetupError, SetupStep, StepContext, StepError};
use crate::config::Config;
use crate::pocketbase;
use crate::remote::{join_url, Credential, RemoteRequest};
use crate::template::{self, Replacements, WorkflowTemplate};
use async_trait::async_trait;
use serde_json::json;

pub const N8N_API_KEY_HEADER: &str = "X-N8N-API-KEY";
pub const CREDENTIALS_PATH: &str = "api/v1/credentials";
pub const WORKFLOWS_PATH: &str = "api/v1/workflows";
pub const DB_TABLES_WEBHOOK: &str = "webhook/linkedout/setup/db-tables";
pub const SERVICE_USER_WEBHOOK: &str = "webhook/linkedout/setup/service-user";

pub const UNIPILE_CREDENTIAL_NAME: &str = "Unipile - LinkedIn API";
pub const DEFAULT_SERVICE_USERNAME: &str = "service_account@example.com";
pub const DEFAULT_SERVICE_PASSWORD: &str = "placeholder_password";

pub fn n8n_credential(api_key: &str) -> Credential {
    Credential::Header {
        name: N8N_API_KEY_HEADER.to_string(),
        value: api_key.to_string(),
    }
}

fn require<'a>(value: Option<&'a str>, what: &'static str) -> Result<&'a str, StepError> {
    value.ok_or(StepError::MissingInput(what))
}

// ---------------------------------------------------------------------------
// n8n: credential
// ---------------------------------------------------------------------------

/// Create the Unipile header-auth credential in n8n and remember its id.
pub struct AddUnipileCredential;

#[async_trait]
impl SetupStep for AddUnipileCredential {
    fn name(&self) -> &str {
        "unipile_credential"
    }

    fn description(&self) -> &str {
        "Add Unipile credential to n8n"
    }

    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let n8n_key = require(ctx.session.n8n_api_key(), "n8n API key")?.to_string();
        let unipile_key = require(ctx.session.unipile_api_key(), "Unipile API key")?.to_string();
        let url = join_url(ctx.config.n8n_url()?, CREDENTIALS_PATH);

        let body = json!({
            "name": UNIPILE_CREDENTIAL_NAME,
            "type": "headerAuth",
            "data": {
                "name": "X-API-KEY",
                "value": unipile_key,
            }
        });

        let resp = ctx
            .client
            .call(
                RemoteRequest::post(url)
                    .credential(n8n_credential(&n8n_key))
                    .json(body),
            )
            .await?
            .error_for_status("Failed to create Unipile credential in n8n")?;

        let id = resp.str_field("id").ok_or(StepError::MissingField {
            context: "n8n credential response",
            field: "id",
        })?;

        tracing::info!(credential_id = %id, "Unipile credential created");
        ctx.session.set_credential_id(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// n8n: workflows
// ---------------------------------------------------------------------------

/// Templates expect an absolute URL; a bare `host:port` DSN gets `https://`.
pub fn normalize_dsn(dsn: &str) -> String {
    if dsn.is_empty() || dsn.starts_with("https://") || dsn.starts_with("http://") {
        dsn.to_string()
    } else {
        format!("https://{}", dsn)
    }
}

/// Placeholder values known at this point of the setup, in substitution
/// order.
pub fn standard_replacements(
    config: &Config,
    session: &SetupSession,
) -> Result<Replacements, StepError> {
    let credential_id = require(session.credential_id(), "Unipile credential ID")?;
    let dsn = normalize_dsn(session.unipile_dsn().unwrap_or(&config.unipile.dsn));

    let (service_email, service_password) = match session.service_account() {
        Some(acc) => (acc.username.value().as_str(), acc.password.value().as_str()),
        None => (
            config.service_account.email.as_str(),
            config.service_account.password.as_str(),
        ),
    };

    let mut r = Replacements::new();
    r.insert(template::POCKETBASE_BASE_URL, config.pocketbase.url.as_str())
        .insert(template::UNIPILE_CREDENTIAL_ID, credential_id)
        .insert(template::UNIPILE_DSN_URL, dsn)
        .insert(template::POCKETBASE_SERVICE_USER_EMAIL, service_email)
        .insert(template::POCKETBASE_SERVICE_USER_PASSWORD, service_password);
    Ok(r)
}

fn placeholder_label(placeholder: &str) -> &'static str {
    match placeholder {
        template::POCKETBASE_BASE_URL => "PocketBase URL",
        template::UNIPILE_CREDENTIAL_ID => "Unipile credential ID",
        template::UNIPILE_DSN_URL => "Unipile DSN",
        template::POCKETBASE_SERVICE_USER_EMAIL => "service account email",
        template::POCKETBASE_SERVICE_USER_PASSWORD => "service account password",
        _ => "workflow placeholder value",
    }
}

/// A placeholder the template references must not be substituted with an
/// empty value.
pub fn check_blank_placeholders(
    workflow: &WorkflowTemplate,
    replacements: &Replacements,
) -> Result<(), StepError> {
    let used = workflow.placeholders();
    match replacements
        .iter()
        .find(|(placeholder, value)| value.is_empty() && used.iter().any(|u| u == placeholder))
    {
        Some((placeholder, _)) => Err(StepError::MissingInput(placeholder_label(placeholder))),
        None => Ok(()),
    }
}

/// Import every configured workflow template, placeholders substituted.
pub struct ImportWorkflows;

#[async_trait]
impl SetupStep for ImportWorkflows {
    fn name(&self) -> &str {
        "import_workflows"
    }

    fn description(&self) -> &str {
        "Import modified workflows to n8n"
    }

    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let n8n_key = require(ctx.session.n8n_api_key(), "n8n API key")?.to_string();
        let replacements = standard_replacements(ctx.config, ctx.session)?;
        let url = join_url(ctx.config.n8n_url()?, WORKFLOWS_PATH);
        let dir = ctx.config.workflows_path()?;

        // Every template is rendered before the first one is posted.
        let mut bodies = Vec::with_capacity(ctx.config.setup.workflows.len());
        for entry in &ctx.config.setup.workflows {
            let workflow = WorkflowTemplate::load(&dir, entry)?;
            check_blank_placeholders(&workflow, &replacements)?;
            bodies.push((entry, workflow.render(&replacements)?));
        }

        for (entry, body) in bodies {
            tracing::info!(workflow = %entry.name, "Importing workflow");

            let resp = ctx
                .client
                .call(
                    RemoteRequest::post(url.as_str())
                        .credential(n8n_credential(&n8n_key))
                        .json(body),
                )
                .await?
                .error_for_status(&format!("Failed to import workflow: {}", entry.name))?;

            tracing::info!(
                workflow = %entry.name,
                id = resp.str_field("id").unwrap_or("-"),
                "Workflow imported"
            );
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PocketBase
// ---------------------------------------------------------------------------

async fn superuser_token(ctx: &StepContext<'_>) -> Result<String, StepError> {
    let email = require(ctx.session.superuser_email(), "PocketBase superuser email")?;
    let password = require(ctx.session.superuser_password(), "PocketBase superuser password")?;
    let base = ctx.config.pocketbase_url()?;
    let session = pocketbase::auth_with_password(ctx.client, base, email, password).await?;
    Ok(session.token)
}

/// Ask the setup webhook to create the PocketBase collections.
pub struct CreatePocketbaseTables;

#[async_trait]
impl SetupStep for CreatePocketbaseTables {
    fn name(&self) -> &str {
        "pocketbase_tables"
    }

    fn description(&self) -> &str {
        "Create tables in PocketBase"
    }

    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let token = superuser_token(ctx).await?;
        let url = join_url(ctx.config.n8n_url()?, DB_TABLES_WEBHOOK);

        ctx.client
            .call(
                RemoteRequest::post(url)
                    .credential(Credential::Bearer(token))
                    .json(json!({ "pocketbaseUrl": ctx.config.pocketbase.url })),
            )
            .await?
            .error_for_status("Failed to create tables in PocketBase")?;

        Ok(())
    }
}

/// Ask the setup webhook to create the service account and the message
/// ingress workflow.
pub struct CreateServiceAccount;

#[async_trait]
impl SetupStep for CreateServiceAccount {
    fn name(&self) -> &str {
        "service_account"
    }

    fn description(&self) -> &str {
        "Create service account and message ingress workflow"
    }

    async fn run(&self, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let token = superuser_token(ctx).await?;
        let url = join_url(ctx.config.n8n_url()?, SERVICE_USER_WEBHOOK);
        let dsn = ctx
            .session
            .unipile_dsn()
            .unwrap_or(&ctx.config.unipile.dsn)
            .to_string();

        let resp = ctx
            .client
            .call(
                RemoteRequest::post(url)
                    .credential(Credential::Bearer(token))
                    .json(json!({
                        "pocketbaseUrl": ctx.config.pocketbase.url,
                        "unipileCredentialId": ctx.session.credential_id().unwrap_or(""),
                        "unipileDsn": dsn,
                    })),
            )
            .await?
            .error_for_status("Failed to create service account in PocketBase")?;

        let account = ServiceAccount {
            username: Field::from_option(
                resp.str_field("serviceUsername").map(String::from),
                DEFAULT_SERVICE_USERNAME.to_string(),
            ),
            password: Field::from_option(
                resp.str_field("servicePassword").map(String::from),
                DEFAULT_SERVICE_PASSWORD.to_string(),
            ),
            workflow_created: resp
                .body
                .as_json()
                .and_then(|v| v.get("workflowCreated"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        };

        if account.username.is_defaulted() {
            tracing::warn!("serviceUsername missing from webhook response, using default");
        }
        if account.password.is_defaulted() {
            tracing::warn!("servicePassword missing from webhook response, using default");
        }
        if !account.workflow_created {
            tracing::warn!("workflowCreated flag missing from webhook response");
        }

        ctx.session.set_service_account(account);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    N8n,
    /// Setting things up by hand; no remote calls.
    Manual,
    Pocketbase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Already complete in the session; nothing was called and the runner
    /// was left as it was.
    Skipped,
    Completed,
}

impl SetupPhase {
    pub fn name(self) -> &'static str {
        match self {
            SetupPhase::N8n => "n8n",
            SetupPhase::Manual => "manual",
            SetupPhase::Pocketbase => "pocketbase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "n8n" => Some(SetupPhase::N8n),
            "manual" => Some(SetupPhase::Manual),
            "pocketbase" => Some(SetupPhase::Pocketbase),
            _ => None,
        }
    }

    pub fn steps(self) -> Vec<Box<dyn SetupStep>> {
        match self {
            SetupPhase::N8n => vec![Box::new(AddUnipileCredential), Box::new(ImportWorkflows)],
            SetupPhase::Manual => Vec::new(),
            SetupPhase::Pocketbase => vec![
                Box::new(CreatePocketbaseTables),
                Box::new(CreateServiceAccount),
            ],
        }
    }

    pub fn runner(self) -> SetupRunner {
        SetupRunner::new(self.steps())
    }

    /// Inputs that must be present before any remote call is made.
    pub fn missing_inputs(self, session: &SetupSession, config: &Config) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self {
            SetupPhase::N8n => {
                if session.n8n_api_key().is_none() {
                    missing.push("n8n API key");
                }
                if session.unipile_api_key().is_none() {
                    missing.push("Unipile API key");
                }
                if session.unipile_dsn().is_none() && config.unipile.dsn.is_empty() {
                    missing.push("Unipile DSN");
                }
                // Substituted into the imported workflows.
                if config.pocketbase.url.is_empty() {
                    missing.push("PocketBase URL");
                }
                if config.n8n.url.is_empty() {
                    missing.push("n8n URL");
                }
            }
            SetupPhase::Manual => {}
            SetupPhase::Pocketbase => {
                if session.n8n_api_key().is_none() {
                    missing.push("n8n API key");
                }
                if session.superuser_email().is_none() {
                    missing.push("PocketBase superuser email");
                }
                if session.superuser_password().is_none() {
                    missing.push("PocketBase superuser password");
                }
                if config.pocketbase.url.is_empty() {
                    missing.push("PocketBase URL");
                }
                if config.n8n.url.is_empty() {
                    missing.push("n8n URL");
                }
            }
        }
        missing
    }

    pub fn is_complete(self, session: &SetupSession) -> bool {
        match self {
            SetupPhase::N8n => session.n8n_complete(),
            SetupPhase::Manual => session.manual_complete(),
            SetupPhase::Pocketbase => session.pocketbase_complete(),
        }
    }

    fn mark_complete(self, session: &mut SetupSession) {
        match self {
            SetupPhase::N8n => {
                session.set_n8n_complete(true);
                session.set_current_step(STEP_MANUAL);
            }
            SetupPhase::Manual => {
                session.set_manual_complete(true);
                session.set_current_step(STEP_POCKETBASE);
            }
            SetupPhase::Pocketbase => {
                session.set_pocketbase_complete(true);
                session.set_current_step(LAST_STEP);
            }
        }
    }

    /// Run the phase's steps, or skip them when the session already records
    /// the phase as complete. A runner that has run before is retried from
    /// its first step.
    pub async fn execute(
        self,
        runner: &mut SetupRunner,
        ctx: &mut StepContext<'_>,
    ) -> Result<PhaseOutcome, SetupError> {
        if self.is_complete(ctx.session) {
            // Step statuses stay untouched; the outcome alone reports the skip.
            tracing::info!(phase = self.name(), "Phase already complete, skipping");
            return Ok(PhaseOutcome::Skipped);
        }

        let missing = self.missing_inputs(ctx.session, ctx.config);
        if !missing.is_empty() {
            return Err(SetupError::MissingInput(missing));
        }

        let result = if runner.overall() == super::Status::Idle {
            runner.run(ctx).await
        } else {
            runner.retry(ctx).await
        };

        ctx.session.record_statuses(runner);
        ctx.session.touch();
        result?;

        self.mark_complete(ctx.session);
        tracing::info!(phase = self.name(), "Phase complete");
        Ok(PhaseOutcome::Completed)
    }
}
