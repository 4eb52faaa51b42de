use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use goodbooks_api::book_store::PostgresBookStore;
use goodbooks_api::bulk_load::{load_all, CsvSource, DEFAULT_BASE_URL};
use goodbooks_api::settings::Settings;
use goodbooks_api::telemetry::init_logging;

/// Replaces the content of every collection with the goodbooks-10k csv files.
/// Database connection is configured with the same environment as the server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Url the `<collection>.csv` files are downloaded from
    #[arg(long, default_value = DEFAULT_BASE_URL, conflicts_with = "data_dir")]
    base_url: String,

    /// Directory with local `<collection>.csv` files
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_logging("goodbooks_loader")?;

    let settings = Settings::load()?;
    let store = PostgresBookStore::init(settings.postgres()).await?;
    let source = match args.data_dir {
        Some(dir) => CsvSource::Local(dir),
        None => CsvSource::remote(&args.base_url)?,
    };

    tracing::info!("Starting data ingestion");
    let report = load_all(&store, &source).await;
    if report.is_complete() {
        tracing::info!("Data ingestion completed successfully");
        Ok(ExitCode::SUCCESS)
    } else if report.all_loaded() {
        tracing::error!("Data ingestion completed but indexes could not be created");
        Ok(ExitCode::FAILURE)
    } else {
        tracing::error!(
            "Data ingestion completed with errors. {}/{} collections loaded",
            report.loaded,
            report.total
        );
        Ok(ExitCode::FAILURE)
    }
}
