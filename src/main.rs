use clap::Parser;
use std::path::PathBuf;
use token_enricher::config::AppConfig;
use token_enricher::storage_utils::AsyncStorageManager;
use token_enricher::{logging, pipeline};
use tracing::{error, info};

/// Enrich the alerted tokens of the sheet and write data.json
#[derive(Parser)]
#[command(name = "token-enricher", version)]
struct Cli {
    /// JSON config file; defaults are used for missing keys
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory data.json is written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Skip the summary table
    #[arg(long)]
    no_table: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging();
    let cli = Cli::parse();

    // Step 1: Configuration
    let config = AppConfig::load(cli.config.as_deref())?;
    let storage = AsyncStorageManager::new(&cli.output_dir).await?;
    info!(output = %storage.base_dir.display(), "starting enrichment");

    // Step 2: Sheet, quotes, enrichment, data.json
    let (records, updated_at) = match pipeline::run_pipeline(&config, &storage).await {
        Ok(done) => done,
        Err(e) => {
            error!(error = %e, "batch failed");
            return Err(e);
        }
    };

    // Step 3: Display Results
    if !cli.no_table {
        token_enricher::comfy_table::run(&records, updated_at);
    }

    Ok(())
}
