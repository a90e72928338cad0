use clap::Parser;
use std::sync::Arc;

use tout::adapters::PostgresStore;
use tout::cli::{self, Cli, Commands};
use tout::config::{AppConfig, LoggingConfig};
use tout::error::Result;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for message in &errors {
            error!(%message, "Invalid configuration");
        }
        anyhow::bail!("configuration failed validation ({} error(s))", errors.len());
    }

    match cli.command {
        Commands::StartCohort { force } => {
            let store = connect(&config).await?;
            cli::start_cohort(store, &config, force).await?;
        }
        Commands::Cycle => {
            let store = connect(&config).await?;
            cli::run_cycle(store, &config).await?;
        }
        Commands::Resolve => {
            let store = connect(&config).await?;
            cli::run_resolution(store, &config).await?;
        }
        Commands::Status { cohort } => {
            let store = connect(&config).await?;
            cli::show_status(store, cohort).await?;
        }
        Commands::ParseCheck { file } => {
            cli::parse_check(&config, file.as_deref())?;
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> Result<Arc<PostgresStore>> {
    let store = PostgresStore::new(&config.database).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", config.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
