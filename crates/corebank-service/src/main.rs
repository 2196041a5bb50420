use clap::{Parser, ValueEnum};
use corebank_ledger::JournalStorageConfig;
use corebank_service::config::PlatformConfig;
use corebank_service::{build_router, spawn_background, AppState, ServiceConfig};
use std::net::SocketAddr;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JournalMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "corebankd", version, about = "CoreBank REST service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
    /// Posting journal backend. `auto` picks postgres when a database url is
    /// configured.
    #[arg(long, value_enum, default_value_t = JournalMode::Auto, env = "COREBANK_JOURNAL_STORAGE")]
    journal_storage: JournalMode,
    /// PostgreSQL url for the posting journal mirror.
    #[arg(long, env = "COREBANK_JOURNAL_DATABASE_URL")]
    journal_database_url: Option<String>,
    /// Max PostgreSQL pool connections for the journal mirror.
    #[arg(long, default_value_t = 5, env = "COREBANK_JOURNAL_PG_MAX_CONNECTIONS")]
    journal_pg_max_connections: u32,
    /// Platform configuration overrides as `key=value`, e.g.
    /// `--config aml.flag_threshold=40`. Unrecognized keys are rejected.
    #[arg(long = "config", value_name = "KEY=VALUE")]
    config_overrides: Vec<String>,
}

fn resolve_journal(cli: &Cli) -> anyhow::Result<JournalStorageConfig> {
    let resolved_url = cli
        .journal_database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.journal_storage {
        JournalMode::Memory => JournalStorageConfig::Memory,
        JournalMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!(
                    "journal_storage=postgres requires --journal-database-url or DATABASE_URL"
                )
            })?;
            JournalStorageConfig::postgres(database_url, cli.journal_pg_max_connections)
        }
        JournalMode::Auto => {
            if let Some(database_url) = resolved_url {
                JournalStorageConfig::postgres(database_url, cli.journal_pg_max_connections)
            } else {
                JournalStorageConfig::Memory
            }
        }
    };
    Ok(storage)
}

fn resolve_platform(cli: &Cli) -> anyhow::Result<PlatformConfig> {
    let mut pairs = Vec::new();
    for entry in &cli.config_overrides {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{entry}'"))?;
        pairs.push((key, value));
    }
    Ok(PlatformConfig::from_overrides(pairs)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "corebank_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig {
        platform: resolve_platform(&cli)?,
        journal: resolve_journal(&cli)?,
    };

    let state = AppState::bootstrap(config).await?;
    let background = spawn_background(&state);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("corebank-service listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    for task in background {
        task.abort();
    }
    Ok(())
}
