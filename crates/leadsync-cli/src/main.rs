use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use leadsync_sync::{connect_store, Services, SyncConfig, SyncOutcome};
use leadsync_web::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "leadsync-cli")]
#[command(about = "Lead ingestion and distribution service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import the configured spreadsheet once and exit.
    Sync,
    /// Apply database migrations.
    Migrate,
    /// Run the API with the background sync scheduler.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => match leadsync_sync::run_sync_once_from_env().await? {
            SyncOutcome::Failed(message) => bail!("sync failed: {message}"),
            outcome => println!("sync complete: {outcome:?}"),
        },
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Serve { port } => {
            let store = connect_store(&config).await?;
            let services = Services::build(&config, store)?;
            let scheduler = services.sync.start_scheduler().await?;
            if scheduler.is_none() {
                info!("sheet sync scheduler disabled; use POST /api/sheets/sync-now to import");
            }
            let port = port.unwrap_or_else(leadsync_web::port_from_env);
            leadsync_web::serve(AppState::new(services), port).await?;
        }
    }

    Ok(())
}
