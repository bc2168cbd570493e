use linkedout::config::{Config, WorkflowEntry};
use linkedout::remote::RemoteClient;
use linkedout::setup::session::{LAST_STEP, STEP_MANUAL};
use linkedout::setup::steps::{
    AddUnipileCredential, CreatePocketbaseTables, ImportWorkflows, PhaseOutcome,
    DEFAULT_SERVICE_PASSWORD,
};
use linkedout::setup::{
    SessionStore, SetupError, SetupPhase, SetupRunner, SetupSession, SetupStep, Status,
    StepContext, StepError,
};
use linkedout::template::TemplateError;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEMPLATE: &str = r#"{
  "name": "exported",
  "nodes": [
    {"name": "Fetch", "parameters": {"url": "****POCKETBASE_BASE_URL****/api/collections/chats/records"}},
    {"name": "Send", "parameters": {"url": "****UNIPILE_DSN_URL****/api/v1/messages"},
     "credentials": {"httpHeaderAuth": {"id": "****UNIPILE_CREDENTIAL_ID****"}}}
  ],
  "connections": {},
  "pinData": {}
}"#;

fn config_for(server: &MockServer, workflows: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.n8n.url = server.uri();
    cfg.pocketbase.url = server.uri();
    cfg.setup.workflows_dir = workflows.path().to_string_lossy().to_string();
    cfg.setup.workflows = vec![WorkflowEntry {
        name: "/inbox backend [linkedout]".into(),
        file: "inbox-backend".into(),
    }];
    cfg
}

fn workflows_dir(template: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("inbox-backend.json"), template).unwrap();
    dir
}

fn n8n_session() -> SetupSession {
    let mut s = SetupSession::with_id("it-session");
    s.set_n8n_api_key("n8n-key");
    s.set_unipile_api_key("unipile-key");
    s.set_unipile_dsn("api1.unipile.com:13111");
    s
}

async fn mount_credential(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/credentials"))
        .and(header("X-N8N-API-KEY", "n8n-key"))
        .and(body_json(json!({
            "name": "Unipile - LinkedIn API",
            "type": "headerAuth",
            "data": {"name": "X-API-KEY", "value": "unipile-key"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cred-1"})))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_failure_on_second_of_three_steps() {
    linkedout::logger::init_test();
    let server = MockServer::start().await;
    let tpl = workflows_dir(TEMPLATE);
    let cfg = config_for(&server, &tpl);

    mount_credential(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/linkedout/setup/db-tables"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let steps: Vec<Box<dyn SetupStep>> = vec![
        Box::new(AddUnipileCredential),
        Box::new(ImportWorkflows),
        Box::new(CreatePocketbaseTables),
    ];
    let mut runner = SetupRunner::new(steps);
    let client = RemoteClient::new(None).unwrap();
    let mut session = n8n_session();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let err = runner.run(&mut ctx).await.unwrap_err();
    assert_eq!(err.step(), Some("import_workflows"));
    assert_eq!(runner.status_of("unipile_credential"), Some(Status::Success));
    assert_eq!(runner.status_of("import_workflows"), Some(Status::Error));
    assert_eq!(runner.status_of("pocketbase_tables"), Some(Status::Idle));
    assert_eq!(runner.overall(), Status::Error);
    assert_eq!(
        runner.last_error(),
        Some("Failed to import workflow: /inbox backend [linkedout] (status 500): boom")
    );
}

#[tokio::test]
async fn test_n8n_phase_retry_restarts_from_credential() {
    linkedout::logger::init_test();
    let server = MockServer::start().await;
    let tpl = workflows_dir(TEMPLATE);
    let cfg = config_for(&server, &tpl);

    // Credential is created once per attempt.
    mount_credential(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal error"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .and(header("X-N8N-API-KEY", "n8n-key"))
        .and(body_partial_json(json!({
            "name": "/inbox backend [linkedout]",
            "settings": {"executionTimeout": 3600, "timezone": "UTC"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "wf-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteClient::new(None).unwrap();
    let mut session = n8n_session();
    let mut runner = SetupPhase::N8n.runner();

    {
        let mut ctx = StepContext {
            client: &client,
            config: &cfg,
            session: &mut session,
        };
        let err = SetupPhase::N8n
            .execute(&mut runner, &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.step(), Some("import_workflows"));
    }
    assert!(!session.n8n_complete());
    assert_eq!(session.credential_id(), Some("cred-1"));
    assert_eq!(session.step_status("import_workflows"), Status::Error);

    {
        let mut ctx = StepContext {
            client: &client,
            config: &cfg,
            session: &mut session,
        };
        let outcome = SetupPhase::N8n.execute(&mut runner, &mut ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Completed);
    }
    assert!(session.n8n_complete());
    assert_eq!(session.current_step(), STEP_MANUAL);
    assert_eq!(session.step_status("unipile_credential"), Status::Success);
    assert_eq!(session.step_status("import_workflows"), Status::Success);

    let requests = server.received_requests().await.unwrap();
    let imported = requests
        .iter()
        .filter(|r| r.url.path() == "/api/v1/workflows")
        .last()
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&imported.body).unwrap();
    assert_eq!(
        body["nodes"][0]["parameters"]["url"],
        format!("{}/api/collections/chats/records", server.uri())
    );
    assert_eq!(
        body["nodes"][1]["parameters"]["url"],
        "https://api1.unipile.com:13111/api/v1/messages"
    );
    assert_eq!(body["nodes"][1]["credentials"]["httpHeaderAuth"]["id"], "cred-1");
    assert!(body.get("pinData").is_none());
}

#[tokio::test]
async fn test_credential_response_without_id_fails() {
    let server = MockServer::start().await;
    let tpl = workflows_dir(TEMPLATE);
    let cfg = config_for(&server, &tpl);
    Mock::given(method("POST"))
        .and(path("/api/v1/credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "x"})))
        .mount(&server)
        .await;

    let client = RemoteClient::new(None).unwrap();
    let mut session = n8n_session();
    let mut runner = SetupPhase::N8n.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let err = SetupPhase::N8n
        .execute(&mut runner, &mut ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetupError::StepFailed {
            source: StepError::MissingField { field: "id", .. },
            ..
        }
    ));
    assert_eq!(runner.status_of("import_workflows"), Some(Status::Idle));
}

#[tokio::test]
async fn test_unresolved_placeholder_stops_import() {
    let server = MockServer::start().await;
    let tpl = workflows_dir(r#"{"nodes": [{"parameters": {"x": "****SOMETHING_ELSE****"}}]}"#);
    let cfg = config_for(&server, &tpl);
    mount_credential(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = RemoteClient::new(None).unwrap();
    let mut session = n8n_session();
    let mut runner = SetupPhase::N8n.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let err = SetupPhase::N8n
        .execute(&mut runner, &mut ctx)
        .await
        .unwrap_err();
    match err {
        SetupError::StepFailed {
            source: StepError::Template(TemplateError::Unresolved { placeholders, .. }),
            ..
        } => assert_eq!(placeholders, vec!["****SOMETHING_ELSE****".to_string()]),
        other => panic!("expected unresolved placeholder error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_n8n_phase_requires_pocketbase_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let tpl = workflows_dir(TEMPLATE);
    let mut cfg = config_for(&server, &tpl);
    cfg.pocketbase.url.clear();

    let client = RemoteClient::new(None).unwrap();
    let mut session = n8n_session();
    let mut runner = SetupPhase::N8n.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let err = SetupPhase::N8n
        .execute(&mut runner, &mut ctx)
        .await
        .unwrap_err();
    match err {
        SetupError::MissingInput(missing) => assert_eq!(missing, vec!["PocketBase URL"]),
        other => panic!("expected missing input, got {other:?}"),
    }
    assert_eq!(runner.overall(), Status::Idle);
}

#[tokio::test]
async fn test_blank_service_account_stops_import() {
    let server = MockServer::start().await;
    let tpl = workflows_dir(
        r#"{
  "name": "exported",
  "nodes": [{"parameters": {
    "url": "****POCKETBASE_BASE_URL****/api",
    "u": "****POCKETBASE_SERVICE_USER_EMAIL****",
    "p": "****POCKETBASE_SERVICE_USER_PASSWORD****"
  }}],
  "connections": {}
}"#,
    );
    let cfg = config_for(&server, &tpl);
    mount_credential(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = RemoteClient::new(None).unwrap();
    let mut session = n8n_session();
    let mut runner = SetupPhase::N8n.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let err = SetupPhase::N8n
        .execute(&mut runner, &mut ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SetupError::StepFailed {
            source: StepError::MissingInput("service account email"),
            ..
        }
    ));
    assert_eq!(runner.status_of("import_workflows"), Some(Status::Error));
    assert_eq!(
        runner.last_error(),
        Some("missing input: service account email")
    );
}

// ---------------------------------------------------------------------------
// PocketBase phase
// ---------------------------------------------------------------------------

fn pocketbase_session() -> SetupSession {
    let mut s = n8n_session();
    s.set_credential_id("cred-1");
    s.set_n8n_complete(true);
    s.set_superuser_email("admin@example.com");
    s.set_superuser_password("pw");
    s
}

async fn mount_superuser_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/collections/_superusers/auth-with-password"))
        .and(body_json(json!({"identity": "admin@example.com", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "pb-token"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pocketbase_phase_records_defaulted_fields() {
    linkedout::logger::init_test();
    let server = MockServer::start().await;
    let tpl = workflows_dir(TEMPLATE);
    let cfg = config_for(&server, &tpl);

    mount_superuser_auth(&server).await;
    Mock::given(method("POST"))
        .and(path("/webhook/linkedout/setup/db-tables"))
        .and(header("authorization", "Bearer pb-token"))
        .and(body_json(json!({"pocketbaseUrl": server.uri()})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/linkedout/setup/service-user"))
        .and(header("authorization", "Bearer pb-token"))
        .and(body_json(json!({
            "pocketbaseUrl": server.uri(),
            "unipileCredentialId": "cred-1",
            "unipileDsn": "api1.unipile.com:13111"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "serviceUsername": "svc@linkedout.local",
            "workflowCreated": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteClient::new(None).unwrap();
    let mut session = pocketbase_session();
    let mut runner = SetupPhase::Pocketbase.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let outcome = SetupPhase::Pocketbase
        .execute(&mut runner, &mut ctx)
        .await
        .unwrap();
    assert_eq!(outcome, PhaseOutcome::Completed);
    assert!(session.pocketbase_complete());
    assert_eq!(session.current_step(), LAST_STEP);

    let account = session.service_account().unwrap();
    assert!(!account.username.is_defaulted());
    assert_eq!(account.username.value(), "svc@linkedout.local");
    assert!(account.password.is_defaulted());
    assert_eq!(account.password.value(), DEFAULT_SERVICE_PASSWORD);
    assert!(account.workflow_created);
}

#[tokio::test]
async fn test_service_account_webhook_error_fails_step() {
    let server = MockServer::start().await;
    let tpl = workflows_dir(TEMPLATE);
    let cfg = config_for(&server, &tpl);

    mount_superuser_auth(&server).await;
    Mock::given(method("POST"))
        .and(path("/webhook/linkedout/setup/db-tables"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook/linkedout/setup/service-user"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad gateway"))
        .mount(&server)
        .await;

    let client = RemoteClient::new(None).unwrap();
    let mut session = pocketbase_session();
    let mut runner = SetupPhase::Pocketbase.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let err = SetupPhase::Pocketbase
        .execute(&mut runner, &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some("service_account"));
    assert!(err.to_string().contains("(status 502): Bad gateway"));
    assert!(!session.pocketbase_complete());
    assert!(session.service_account().is_none());
}

#[tokio::test]
async fn test_superuser_rejection_names_pocketbase() {
    let server = MockServer::start().await;
    let tpl = workflows_dir(TEMPLATE);
    let cfg = config_for(&server, &tpl);
    Mock::given(method("POST"))
        .and(path("/api/collections/_superusers/auth-with-password"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Failed to authenticate."})),
        )
        .mount(&server)
        .await;

    let client = RemoteClient::new(None).unwrap();
    let mut session = pocketbase_session();
    let mut runner = SetupPhase::Pocketbase.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut session,
    };

    let err = SetupPhase::Pocketbase
        .execute(&mut runner, &mut ctx)
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some("pocketbase_tables"));
    assert_eq!(
        runner.last_error(),
        Some("Failed to authenticate with PocketBase: PocketBase rejected the credentials (status 400): Failed to authenticate.")
    );
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_saved_session_skips_completed_phase() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let tpl = workflows_dir(TEMPLATE);
    let cfg = config_for(&server, &tpl);

    let sessions = TempDir::new().unwrap();
    let store = SessionStore::new(sessions.path());
    let mut session = n8n_session();
    session.set_credential_id("cred-1");
    session.set_n8n_complete(true);
    session.set_current_step(STEP_MANUAL);
    store.save(&session).await.unwrap();

    let mut restored = store.load("it-session").await.unwrap().unwrap();
    assert_eq!(restored.credential_id(), Some("cred-1"));

    let client = RemoteClient::new(None).unwrap();
    let mut runner = SetupPhase::N8n.runner();
    let mut ctx = StepContext {
        client: &client,
        config: &cfg,
        session: &mut restored,
    };
    let outcome = SetupPhase::N8n.execute(&mut runner, &mut ctx).await.unwrap();
    assert_eq!(outcome, PhaseOutcome::Skipped);
    assert_eq!(runner.overall(), Status::Idle);
    assert_eq!(restored.current_step(), STEP_MANUAL);
}
