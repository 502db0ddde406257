use gdpr_reporter::gdpr::GdprReportService;
use gdpr_reporter::partner::HttpPartnerApi;
use gdpr_reporter::poller::TokioBackoff;
use gdpr_reporter::repository::SqliteReportRepository;
use gdpr_reporter::ReporterConfig;
use log::{error, info};
use sqlx::sqlite::SqlitePoolOptions;
use std::process::ExitCode;

async fn run() -> anyhow::Result<()> {
    let config = ReporterConfig::from_env()?;

    info!("Connecting to database: {}", config.database.url);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let repository = SqliteReportRepository::new(pool, config.database.users.clone());
    let service = GdprReportService::new(repository, HttpPartnerApi::new(), TokioBackoff, config);

    let result = service.run_report().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("GDPR report failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
