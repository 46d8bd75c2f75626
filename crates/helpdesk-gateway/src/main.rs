#![allow(clippy::print_stdout, clippy::print_stderr)] // CLI binary — stdout/stderr is the UI

mod cli;
mod close_gate;
mod config;
mod config_check;
mod config_store;
mod dispatch;
mod health;
mod supervisor;
mod tickets;
mod tracing_setup;
mod transcript;

use anyhow::{Context, Result};
use clap::Parser;
use helpdesk_core::{ClientFactory, InteractionHandler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, OutputFormat};
use crate::close_gate::ClosureGate;
use crate::config::{Settings, resolve_path};
use crate::config_store::ConfigStore;
use crate::dispatch::Dispatcher;
use crate::supervisor::{RestartPolicy, Supervisor};
use crate::tickets::TicketManager;
use crate::transcript::TranscriptStore;

const TOKEN_ENV: &str = "DISCORD_TOKEN";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing_guard = tracing_setup::init();

    match cli.command {
        Commands::Check { format } => cmd_check(cli.config.as_deref(), format),
        Commands::Start => cmd_start(cli.config.as_deref()).await,
        Commands::Version => {
            println!("🎫 helpdesk {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn config_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

#[allow(clippy::unnecessary_wraps)] // must return Result to match main's match arms
fn cmd_check(config_path: Option<&str>, format: OutputFormat) -> Result<()> {
    let config_file = Settings::find_config_path(config_path);
    let token = std::env::var(TOKEN_ENV).ok();
    let report = config_check::validate(&config_file, &config_dir(&config_file), token.as_deref());

    match format {
        OutputFormat::Json => report.print_json(),
        OutputFormat::Human => report.print_human(),
    }

    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

/// Everything a running bot shares, built once at startup.
struct App {
    settings: Settings,
    gate: Arc<ClosureGate>,
    supervisor: Arc<Supervisor>,
}

impl App {
    fn build(settings: Settings, config_dir: &Path, token: String) -> Result<Self> {
        let store = Arc::new(ConfigStore::open(resolve_path(
            config_dir,
            &settings.state.path,
        )));
        let transcripts = TranscriptStore::new(resolve_path(config_dir, &settings.transcripts.dir));
        let tickets = Arc::new(TicketManager::new(
            store,
            transcripts,
            settings.transcripts.history_limit,
            settings.tickets.close_grace(),
        ));
        let gate = Arc::new(ClosureGate::new(settings.tickets.confirm_timeout()));
        let dispatcher: Arc<dyn InteractionHandler> =
            Arc::new(Dispatcher::new(tickets, Arc::clone(&gate)));

        let policy = RestartPolicy {
            restart_delay: Duration::from_secs(settings.supervisor.restart_delay_secs),
            max_restarts: settings.supervisor.max_restarts,
        };
        let supervisor = Arc::new(Supervisor::new(client_factory(token, dispatcher)?, policy));

        Ok(Self {
            settings,
            gate,
            supervisor,
        })
    }
}

#[cfg(feature = "discord")]
#[allow(clippy::unnecessary_wraps)]
fn client_factory(
    token: String,
    interactions: Arc<dyn InteractionHandler>,
) -> Result<Arc<dyn ClientFactory>> {
    Ok(Arc::new(helpdesk_channels::DiscordClientFactory::new(
        token,
        interactions,
    )))
}

#[cfg(not(feature = "discord"))]
fn client_factory(
    _token: String,
    _interactions: Arc<dyn InteractionHandler>,
) -> Result<Arc<dyn ClientFactory>> {
    anyhow::bail!("helpdesk was built without the discord feature")
}

async fn cmd_start(config_path: Option<&str>) -> Result<()> {
    let config_file = Settings::find_config_path(config_path);
    let settings = Settings::load(&config_file)
        .with_context(|| format!("loading config from {}", config_file.display()))?;
    let token = std::env::var(TOKEN_ENV)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .with_context(|| format!("{TOKEN_ENV} is not set"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        config = %config_file.display(),
        "helpdesk starting"
    );

    if settings.transcripts.history_limit > config::HISTORY_PAGE_LIMIT {
        warn!(
            history_limit = settings.transcripts.history_limit,
            archived = config::HISTORY_PAGE_LIMIT,
            "history_limit exceeds what Discord returns"
        );
    }
    let app = App::build(settings, &config_dir(&config_file), token)?;

    let shutdown_token = CancellationToken::new();
    let health_task = health::spawn(
        app.settings.health.clone(),
        app.supervisor.status_handle(),
        shutdown_token.clone(),
    );
    let _sweeper = close_gate::spawn_sweeper(
        Arc::clone(&app.gate),
        app.gate.timeout().max(Duration::from_secs(1)),
        shutdown_token.clone(),
    );
    let _reporter = supervisor::spawn_status_reporter(
        app.supervisor.status_handle(),
        Duration::from_secs(app.settings.supervisor.status_log_secs.max(1)),
        shutdown_token.clone(),
    );

    let run = app.supervisor.run_forever();
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            app.supervisor.stop().await;
            run.await
        }
    };

    shutdown_token.cancel();
    if let Err(error) = health_task.await {
        warn!(error = %error, "health server task panicked");
    }

    let exit = outcome?;
    info!(exit = ?exit, "helpdesk stopped");
    Ok(())
}
