use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use greenpoint::accounts;
use greenpoint::backend::{Backend, Credential};
use greenpoint::config::{Cli, Command, Config, StorageCommand};
use greenpoint::events;
use greenpoint::provision;
use greenpoint::routes;
use greenpoint::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    let backend = if cli.memory {
        tracing::warn!("Using the in-memory backend; all data is lost on exit");
        Backend::memory()
    } else {
        Backend::remote(&config.backend)?
    };

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(backend, config).await,
        Command::Storage { action } => storage(&backend, action).await,
        Command::SweepEvents => {
            let retention = chrono::Duration::hours(config.events.retention_hours);
            let removed = events::sweep_expired(
                backend.store.as_ref(),
                &Credential::Service,
                retention,
                chrono::Utc::now(),
            )
            .await?;
            println!("Removed {removed} expired events");
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset { confirm } => {
            accounts::reset_app(&backend, &confirm).await?;
            println!("All tables cleared");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(backend: Backend, config: Config) -> anyhow::Result<ExitCode> {
    let state = AppState::new(backend, config.clone());

    let every = Duration::from_secs(config.events.sweep_interval_secs.max(1));
    events::spawn_sweeper(state.backend.store.clone(), every, state.event_retention());

    let app = routes::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(ExitCode::SUCCESS)
}

async fn storage(backend: &Backend, action: StorageCommand) -> anyhow::Result<ExitCode> {
    match action {
        StorageCommand::Policies => {
            println!("{}", provision::policy_sql());
            Ok(ExitCode::SUCCESS)
        }
        StorageCommand::Setup => {
            for line in provision::setup(backend).await? {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
        StorageCommand::Check => {
            let report = provision::check(backend).await?;
            for line in &report.lines {
                println!("{line}");
            }
            if report.is_healthy() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
