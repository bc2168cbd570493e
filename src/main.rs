// LinkedOut — LinkedIn DM triage backend
// License: Apache-2.0

use clap::{Parser, Subcommand};
use linkedout::config::Config;
use linkedout::remote::RemoteClient;
use linkedout::setup::steps::PhaseOutcome;
use linkedout::setup::{SessionStore, SetupError, SetupPhase, SetupRunner, SetupSession, StepContext};
use std::net::SocketAddr;
use std::path::PathBuf;

const LOGO: &str = "📨";

const MANUAL_CHECKLIST: &[&str] = &[
    "Open n8n and check that the imported workflows are present",
    "Open the 'Unipile - LinkedIn API' credential and confirm the API key",
    "Activate the imported [linkedout] workflows",
    "Make sure PocketBase is reachable from n8n at the configured URL",
];

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "linkedout",
    about = "LinkedOut — LinkedIn DM triage backend",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (proxy, setup proxy, login)
    Serve {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the first-run setup wizard
    Setup {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Resume (or create) the setup session with this id
        #[arg(short, long)]
        session: Option<String>,
        /// Run a single phase: n8n, manual or pocketbase
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        n8n_api_key: Option<String>,
        #[arg(long)]
        unipile_api_key: Option<String>,
        #[arg(long)]
        unipile_dsn: Option<String>,
        #[arg(long)]
        superuser_email: Option<String>,
        #[arg(long)]
        superuser_password: Option<String>,
        /// Automatic retries of a failed phase before giving up
        #[arg(long, default_value = "0")]
        retries: u32,
        /// Never prompt; fail when an input is missing
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show configuration and setup sessions, and check backend connectivity
    Status {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Show details of one setup session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Write a default config file
    Onboard,
    /// Show version information
    Version,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    linkedout::logger::init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { config, host, port }) => {
            serve_cmd(config, host, port).await;
        }
        Some(Commands::Setup {
            config,
            session,
            phase,
            n8n_api_key,
            unipile_api_key,
            unipile_dsn,
            superuser_email,
            superuser_password,
            retries,
            non_interactive,
        }) => {
            let inputs = SetupInputs {
                n8n_api_key,
                unipile_api_key,
                unipile_dsn,
                superuser_email,
                superuser_password,
            };
            setup_cmd(config, session, phase, inputs, retries, non_interactive).await;
        }
        Some(Commands::Status { config, session }) => {
            status_cmd(config, session).await;
        }
        Some(Commands::Onboard) => {
            onboard_cmd();
        }
        Some(Commands::Version) | None => {
            version_cmd();
        }
    }
}

// ---------------------------------------------------------------------------
// Serve command
// ---------------------------------------------------------------------------

async fn serve_cmd(config_path: Option<String>, host: Option<String>, port: Option<u16>) {
    let mut cfg = load_config(config_path.as_deref());
    if let Some(h) = host {
        cfg.server.host = h;
    }
    if let Some(p) = port {
        cfg.server.port = p;
    }

    if let Err(e) = cfg.validate() {
        eprintln!("{} Configuration Error: {}", LOGO, e);
        std::process::exit(1);
    }

    let addr: SocketAddr = match format!("{}:{}", cfg.server.host, cfg.server.port).parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{} Invalid listen address: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    println!("{} LinkedOut listening on http://{}", LOGO, addr);

    if let Err(e) = linkedout::server::start_server(addr, cfg).await {
        eprintln!("{} Server error: {}", LOGO, e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Setup command
// ---------------------------------------------------------------------------

struct SetupInputs {
    n8n_api_key: Option<String>,
    unipile_api_key: Option<String>,
    unipile_dsn: Option<String>,
    superuser_email: Option<String>,
    superuser_password: Option<String>,
}

impl SetupInputs {
    fn apply(self, session: &mut SetupSession) {
        if let Some(v) = self.n8n_api_key {
            session.set_n8n_api_key(v);
        }
        if let Some(v) = self.unipile_api_key {
            session.set_unipile_api_key(v);
        }
        if let Some(v) = self.unipile_dsn {
            session.set_unipile_dsn(v);
        }
        if let Some(v) = self.superuser_email {
            session.set_superuser_email(v);
        }
        if let Some(v) = self.superuser_password {
            session.set_superuser_password(v);
        }
    }
}

/// Line prompts; `None` editor means non-interactive.
struct Prompter {
    rl: Option<rustyline::DefaultEditor>,
}

impl Prompter {
    fn new(interactive: bool) -> Self {
        let rl = if interactive {
            match rustyline::DefaultEditor::new() {
                Ok(r) => Some(r),
                Err(e) => {
                    eprintln!("Failed to initialize readline: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self { rl }
    }

    fn ask(&mut self, label: &str) -> Option<String> {
        let rl = self.rl.as_mut()?;
        match rl.readline(&format!("  {}: ", label)) {
            Ok(line) => Some(line.trim().to_string()).filter(|s| !s.is_empty()),
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => {
                println!("Aborted.");
                std::process::exit(130);
            }
            Err(e) => {
                eprintln!("Readline error: {}", e);
                None
            }
        }
    }

    fn confirm(&mut self, question: &str) -> bool {
        self.ask(&format!("{} [y/N]", question))
            .map(|a| matches!(a.to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }
}

/// Ask for whatever the phase still needs.
fn prompt_inputs(phase: SetupPhase, session: &mut SetupSession, cfg: &Config, p: &mut Prompter) {
    match phase {
        SetupPhase::N8n => {
            if session.n8n_api_key().is_none() {
                if let Some(v) = p.ask("n8n API key") {
                    session.set_n8n_api_key(v);
                }
            }
            if session.unipile_api_key().is_none() {
                if let Some(v) = p.ask("Unipile API key") {
                    session.set_unipile_api_key(v);
                }
            }
            if session.unipile_dsn().is_none() && cfg.unipile.dsn.is_empty() {
                if let Some(v) = p.ask("Unipile DSN") {
                    session.set_unipile_dsn(v);
                }
            }
        }
        SetupPhase::Manual => {}
        SetupPhase::Pocketbase => {
            if session.n8n_api_key().is_none() {
                if let Some(v) = p.ask("n8n API key") {
                    session.set_n8n_api_key(v);
                }
            }
            if session.superuser_email().is_none() {
                if let Some(v) = p.ask("PocketBase superuser email") {
                    session.set_superuser_email(v);
                }
            }
            if session.superuser_password().is_none() {
                if let Some(v) = p.ask("PocketBase superuser password") {
                    session.set_superuser_password(v);
                }
            }
        }
    }
}

fn print_runner(runner: &SetupRunner) {
    for (_, description, status) in runner.statuses() {
        let icon = match status {
            linkedout::setup::Status::Idle => "⏸️ ",
            linkedout::setup::Status::Loading => "⏳",
            linkedout::setup::Status::Success => "✅",
            linkedout::setup::Status::Error => "❌",
        };
        println!("  {} {}", icon, description);
    }
    if let Some(err) = runner.last_error() {
        println!("     {}", err);
    }
}

async fn save_session(store: &SessionStore, session: &SetupSession) {
    if let Err(e) = store.save(session).await {
        tracing::warn!(error = %e, "Failed to save setup session");
    }
}

async fn setup_cmd(
    config_path: Option<String>,
    session_id: Option<String>,
    phase: Option<String>,
    inputs: SetupInputs,
    retries: u32,
    non_interactive: bool,
) {
    let cfg = load_config(config_path.as_deref());
    if let Err(e) = cfg.validate() {
        eprintln!("{} Configuration Error: {}", LOGO, e);
        eprintln!("\nRun `linkedout onboard` to set up your configuration.");
        std::process::exit(1);
    }

    let phases = match phase.as_deref() {
        Some(name) => match SetupPhase::parse(name) {
            Some(p) => vec![p],
            None => {
                eprintln!("{} Unknown phase '{}' (expected n8n, manual or pocketbase)", LOGO, name);
                std::process::exit(1);
            }
        },
        None => vec![SetupPhase::N8n, SetupPhase::Manual, SetupPhase::Pocketbase],
    };

    let store = match cfg.sessions_path() {
        Ok(dir) => SessionStore::new(dir),
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    let mut session = match session_id {
        Some(id) => match store.load(&id).await {
            Ok(Some(s)) => {
                println!("{} Resuming setup session {}", LOGO, s.id);
                s
            }
            Ok(None) => SetupSession::with_id(id),
            Err(e) => {
                eprintln!("{} Failed to load session '{}': {}", LOGO, id, e);
                std::process::exit(1);
            }
        },
        None => SetupSession::new(),
    };
    inputs.apply(&mut session);

    let client = match RemoteClient::from_config(&cfg) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    println!("{} LinkedOut setup (session {})\n", LOGO, session.id);
    let mut prompter = Prompter::new(!non_interactive);

    for phase in phases {
        println!("── {} ──", phase.name());

        if !phase.is_complete(&session) {
            prompt_inputs(phase, &mut session, &cfg, &mut prompter);
        }
        if phase == SetupPhase::Manual && !phase.is_complete(&session) {
            for item in MANUAL_CHECKLIST {
                println!("  • {}", item);
            }
            if prompter.rl.is_some() && !prompter.confirm("Done with these steps?") {
                println!("\nRun `linkedout setup --session {}` when ready.", session.id);
                save_session(&store, &session).await;
                return;
            }
        }

        let mut runner = phase.runner();
        let mut attempts = 0;

        loop {
            let result = {
                let mut ctx = StepContext {
                    client: &client,
                    config: &cfg,
                    session: &mut session,
                };
                phase.execute(&mut runner, &mut ctx).await
            };
            save_session(&store, &session).await;

            match result {
                Ok(PhaseOutcome::Skipped) => {
                    println!("  ⏭️  Already complete");
                    break;
                }
                Ok(PhaseOutcome::Completed) => {
                    print_runner(&runner);
                    break;
                }
                Err(SetupError::MissingInput(missing)) => {
                    eprintln!("{} Missing input: {}", LOGO, missing.join(", "));
                    std::process::exit(1);
                }
                Err(e) => {
                    print_runner(&runner);
                    eprintln!("\n{} {}", LOGO, e);
                    println!("  Retrying starts again from the first step; resources created");
                    println!("  before the failure (credential, workflows) are submitted again.");

                    if attempts < retries {
                        attempts += 1;
                        tracing::info!(attempt = attempts, phase = phase.name(), "Retrying phase");
                        continue;
                    }
                    if prompter.confirm("Retry?") {
                        continue;
                    }
                    println!("\nResume later with `linkedout setup --session {}`.", session.id);
                    std::process::exit(1);
                }
            }
        }
        println!();
    }

    review(&session);
}

fn review(session: &SetupSession) {
    println!("{} Review", LOGO);
    let flag = |done: bool| if done { "✅" } else { "⏸️ " };
    println!("  n8n:        {}", flag(session.n8n_complete()));
    println!("  manual:     {}", flag(session.manual_complete()));
    println!("  pocketbase: {}", flag(session.pocketbase_complete()));

    if let Some(id) = session.credential_id() {
        println!("  Unipile credential: {}", id);
    }
    if let Some(acc) = session.service_account() {
        let note = |defaulted: bool| if defaulted { " (default, not returned by webhook)" } else { "" };
        println!(
            "  Service account:    {}{}",
            acc.username.value(),
            note(acc.username.is_defaulted())
        );
        println!(
            "  Service password:   {}{}",
            acc.password.value(),
            note(acc.password.is_defaulted())
        );
        println!(
            "  Ingress workflow:   {}",
            if acc.workflow_created { "created" } else { "not reported" }
        );
    }
}

// ---------------------------------------------------------------------------
// Other commands
// ---------------------------------------------------------------------------

fn version_cmd() {
    println!("{} LinkedOut v{}", LOGO, linkedout::VERSION);
    println!("  LinkedIn DM triage backend");
}

async fn status_cmd(config_path: Option<String>, session_id: Option<String>) {
    println!("{} LinkedOut Status\n", LOGO);

    let cfg = load_config(config_path.as_deref());

    let default_path = Config::default_path().unwrap_or_default();
    let path = config_path.map(PathBuf::from).unwrap_or(default_path);
    if path.exists() {
        println!("  Config:     ✅ {}", path.display());
    } else {
        println!("  Config:     ❌ Not found (run 'linkedout onboard')");
    }

    let show = |v: &str| if v.is_empty() { "(not set)".to_string() } else { v.to_string() };
    println!("  PocketBase: {}", show(&cfg.pocketbase.url));
    println!("  n8n:        {}", show(&cfg.n8n.url));
    match cfg.proxy_base_url() {
        Ok(base) => println!("  Proxy base: {}", base),
        Err(_) => println!("  Proxy base: (not set)"),
    }
    if let Err(e) = cfg.validate() {
        println!("  ❌ {}", e);
    }

    match RemoteClient::from_config(&cfg) {
        Ok(client) => {
            println!("\n  Connectivity:");
            for check in linkedout::health::check_backends(&client, &cfg).await {
                let icon = if check.reachable { "✅" } else { "❌" };
                println!("    {} {:<11} {} ({})", icon, check.name, check.url, check.detail);
            }
            println!();
        }
        Err(e) => println!("  Connectivity: ❌ {}", e),
    }

    let store = match cfg.sessions_path() {
        Ok(dir) => SessionStore::new(dir),
        Err(e) => {
            println!("  Sessions:   ❌ {}", e);
            return;
        }
    };

    let ids = store.list().await;
    println!("  Sessions:   {} in {}", ids.len(), store.dir().display());

    let Some(id) = session_id else {
        for id in &ids {
            println!("              {}", id);
        }
        return;
    };

    match store.load(&id).await {
        Ok(Some(session)) => {
            println!("\n  Session {} (updated {})", session.id, session.updated_at);
            println!("  Page:       {}", session.current_step());
            for (step, status) in session.step_statuses() {
                println!("    {:<20} {}", step, status);
            }
            println!();
            review(&session);
        }
        Ok(None) => println!("\n  Session '{}' not found", id),
        Err(e) => println!("\n  ❌ Failed to load session '{}': {}", id, e),
    }
}

fn onboard_cmd() {
    println!("{} LinkedOut Onboard — writing default configuration\n", LOGO);

    let config_path = match Config::default_path() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    let cfg = Config::default();
    let mut dirs = Vec::new();
    if let Some(parent) = config_path.parent() {
        dirs.push(parent.to_path_buf());
    }
    if let Ok(sessions) = cfg.sessions_path() {
        dirs.push(sessions);
    }
    for dir in &dirs {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Failed to create {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    }

    if config_path.exists() {
        println!("  ⏭️  Config already exists at {}", config_path.display());
    } else {
        let written = serde_json::to_string_pretty(&cfg)
            .map_err(anyhow::Error::from)
            .and_then(|content| std::fs::write(&config_path, content).map_err(anyhow::Error::from));
        match written {
            Ok(()) => println!("  ✅ Config created at {}", config_path.display()),
            Err(e) => {
                eprintln!("Failed to write config: {}", e);
                std::process::exit(1);
            }
        }
    }

    println!("\nNext steps:");
    println!("  1. Edit {} and set pocketbase.url and n8n.url", config_path.display());
    println!("  2. Run: linkedout setup");
    println!("  3. Then: linkedout serve");
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&str>) -> Config {
    let config_path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        Config::default_path().unwrap_or_else(|_| PathBuf::from("config.json"))
    };

    Config::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default()
    })
}
