//! Periodic driver
//!
//! Ticks the job service's maintenance entry points: queue draining, the
//! timeout sweep, the retention sweeps, and one independent polling loop per
//! remote job definition at its configured polling interval. Every loop runs
//! until the process is stopped and logs per-cycle failures instead of dying.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use convoy_core::domain::JobDefinition;

use crate::config::Config;
use crate::repository::job_definition;
use crate::service::JobService;

/// Lower bound for remote polling so a zeroed interval cannot busy-loop.
const MIN_POLLING_INTERVAL_MS: i64 = 1_000;

pub struct Scheduler {
    service: Arc<JobService>,
    config: Config,
}

impl Scheduler {
    pub fn new(service: Arc<JobService>, config: Config) -> Self {
        Self { service, config }
    }

    /// Starts all maintenance loops and runs until the process is stopped.
    pub async fn run(&self) {
        info!(
            "starting scheduler (queue drain: {:?}, timeout sweep: {:?}, retention sweep: {:?})",
            self.config.queue_drain_interval,
            self.config.timeout_sweep_interval,
            self.config.retention_sweep_interval
        );

        let handles = vec![
            self.start_queue_drain_loop(),
            self.start_timeout_sweep_loop(),
            self.start_retention_sweep_loop(),
            self.start_remote_poll_supervisor(),
        ];

        for handle in handles {
            let _ = handle.await;
        }
    }

    fn start_queue_drain_loop(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let interval = self.config.queue_drain_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                debug!("draining queued jobs");
                if let Err(err) = service.execute_queued_jobs().await {
                    error!("queue drain cycle failed: {}", err);
                }
            }
        })
    }

    fn start_timeout_sweep_loop(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let interval = self.config.timeout_sweep_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                match service.cleanup_timed_out_jobs().await {
                    Ok(0) => {}
                    Ok(removed) => info!("timed out {} stale job(s)", removed),
                    Err(err) => error!("timeout sweep failed: {}", err),
                }
            }
        })
    }

    fn start_retention_sweep_loop(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let interval = self.config.retention_sweep_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                match service.cleanup_old_jobs().await {
                    Ok(removed) if removed > 0 => info!("deleted {} old job(s)", removed),
                    Ok(_) => {}
                    Err(err) => error!("old-job sweep failed: {}", err),
                }
                match service.cleanup_not_executed_jobs().await {
                    Ok(removed) if removed > 0 => {
                        info!("deleted {} not-executed job(s)", removed)
                    }
                    Ok(_) => {}
                    Err(err) => error!("not-executed sweep failed: {}", err),
                }
            }
        })
    }

    /// Re-reads the job definitions periodically and spawns one polling loop
    /// for each remote definition it has not seen yet.
    fn start_remote_poll_supervisor(&self) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let refresh = self.config.definition_refresh_interval;

        tokio::spawn(async move {
            let mut polled: HashSet<String> = HashSet::new();
            let mut ticker = time::interval(refresh);
            loop {
                ticker.tick().await;
                let definitions = match job_definition::find_all(service.pool()).await {
                    Ok(definitions) => definitions,
                    Err(err) => {
                        error!("could not read job definitions: {}", err);
                        continue;
                    }
                };
                for definition in definitions.into_iter().filter(|d| d.remote) {
                    if polled.insert(definition.name.clone()) {
                        Self::spawn_remote_poll_loop(Arc::clone(&service), definition);
                    }
                }
            }
        })
    }

    fn spawn_remote_poll_loop(service: Arc<JobService>, definition: JobDefinition) {
        let interval_ms = definition.polling_interval.max(MIN_POLLING_INTERVAL_MS) as u64;
        info!(
            "polling remote job {} every {}ms",
            definition.name, interval_ms
        );

        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                if let Err(err) = service.poll_remote_job(&definition.name).await {
                    error!("poll cycle for remote job {} failed: {}", definition.name, err);
                }
            }
        });
    }
}
