use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convoy_orchestrator::config::Config;
use convoy_orchestrator::scheduler::Scheduler;
use convoy_orchestrator::service::JobService;
use convoy_orchestrator::db;
use convoy_worker_client::{DirectoryArchiveProvider, WorkerClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convoy_orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Convoy housekeeping daemon...");

    let config = Config::from_env();
    config.validate()?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let mut service = JobService::new(pool).with_retention(
        config.hours_after_which_old_jobs_are_deleted,
        config.hours_after_which_not_executed_jobs_are_deleted,
    );

    match (&config.worker_base_url, &config.job_archive_directory) {
        (Some(base_url), Some(archive_dir)) => {
            tracing::info!("Remote executor enabled against {}", base_url);
            service = service.with_remote_executor(
                WorkerClient::new(base_url.as_str()),
                Arc::new(DirectoryArchiveProvider::new(archive_dir.as_path())),
            );
        }
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!(
                "Remote executor disabled: both WORKER_BASE_URL and JOB_ARCHIVE_DIR must be set"
            );
        }
        (None, None) => {}
    }

    Scheduler::new(Arc::new(service), config).run().await;
    Ok(())
}
