use newsdb::{
    conf::{load_dotenv, AppConfig},
    provision::{ping, provision, success_message, ProvisionReport},
    utils::o11y::logging::{build_subscriber, log_error},
};

use std::process::ExitCode;

use clap::Parser;
use tracing::{info, instrument};

/// Creates the news database collections and their indexes. Safe to run
/// repeatedly and from several deployments at once.
#[derive(Parser)]
struct Cli {
    /// Path to the configuration file, defaults to config.yaml when present
    #[arg(long, value_name = "FILE")]
    config: Option<String>,
}

#[instrument(skip_all)]
async fn run(args: Cli) -> Result<(AppConfig, ProvisionReport, Vec<String>), Box<dyn std::error::Error>> {
    let config = match args.config {
        Some(path) => AppConfig::from_path(&path)?,
        None => AppConfig::from_default_path()?,
    };

    let db = config.build_db().await?;
    info!(database = db.name(), "connecting to database");
    ping(&db).await?;

    let report = provision(&db, &config.manifest()).await?;
    info!(
        collections_created = report.collections_created.len(),
        indexes_created = report.indexes_created.len(),
        indexes_existing = report.indexes_existing.len(),
        "provisioning complete"
    );

    let mut collections = db.list_collection_names().await?;
    collections.sort();

    Ok((config, report, collections))
}

#[tokio::main]
async fn main() -> ExitCode {
    load_dotenv();

    let subscriber = match build_subscriber() {
        Ok(subscriber) => subscriber,
        Err(e) => {
            eprintln!("failed to build tracing subscriber: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    match run(Cli::parse()).await {
        Ok((config, _report, collections)) => {
            println!(
                "{}",
                success_message(&config.collections.news, &config.collections.bulletin)
            );
            println!("Collections in {}:", config.database.name);
            for name in collections {
                println!("  - {}", name);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_error(e.as_ref());
            ExitCode::FAILURE
        }
    }
}
