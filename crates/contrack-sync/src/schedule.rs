use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::aggregate::Aggregator;
use crate::solutions::SolutionLinker;

pub const DEFAULT_REFRESH_CRON: &str = "0 */30 * * * *";
pub const DEFAULT_PLAYLIST_CRON: &str = "0 0 4 * * *";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub refresh_cron: String,
    pub playlist_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_cron: DEFAULT_REFRESH_CRON.to_string(),
            playlist_cron: DEFAULT_PLAYLIST_CRON.to_string(),
        }
    }
}

/// Periodic contest refresh and playlist sync. Jobs stop when `shutdown` is called.
pub struct ContrackScheduler {
    sched: JobScheduler,
}

impl ContrackScheduler {
    pub async fn start(
        config: &ScheduleConfig,
        aggregator: Arc<Aggregator>,
        linker: Option<Arc<SolutionLinker>>,
    ) -> Result<Self> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let refresh = Job::new_async(config.refresh_cron.as_str(), move |_uuid, _l| {
            let aggregator = aggregator.clone();
            Box::pin(async move {
                match aggregator.run_once().await {
                    Ok(outcome) => info!(run_id = %outcome.run_id, disposition = ?outcome.disposition, "scheduled contest refresh finished"),
                    Err(err) => warn!(error = %format!("{err:#}"), "scheduled contest refresh failed"),
                }
            })
        })
        .with_context(|| format!("creating refresh job for cron {}", config.refresh_cron))?;
        sched.add(refresh).await.context("adding refresh job")?;

        if let Some(linker) = linker {
            let playlist = Job::new_async(config.playlist_cron.as_str(), move |_uuid, _l| {
                let linker = linker.clone();
                Box::pin(async move {
                    match linker.run_once(Utc::now()).await {
                        Ok(report) => info!(linked = report.linked.len(), "scheduled playlist sync finished"),
                        Err(err) => warn!(error = %format!("{err:#}"), "scheduled playlist sync failed"),
                    }
                })
            })
            .with_context(|| format!("creating playlist job for cron {}", config.playlist_cron))?;
            sched.add(playlist).await.context("adding playlist job")?;
        }

        sched.start().await.context("starting scheduler")?;
        info!(refresh = %config.refresh_cron, playlist = %config.playlist_cron, "scheduler started");
        Ok(Self { sched })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.sched.shutdown().await.context("stopping scheduler")?;
        info!("scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contrack_storage::{HttpClientConfig, HttpFetcher, MemoryStore};

    fn aggregator() -> Arc<Aggregator> {
        Arc::new(Aggregator::new(
            vec![],
            Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
            Arc::new(MemoryStore::new()),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn starts_and_shuts_down_with_default_crons() {
        let sched = ContrackScheduler::start(&ScheduleConfig::default(), aggregator(), None)
            .await
            .unwrap();
        sched.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejects_malformed_cron() {
        let config = ScheduleConfig {
            refresh_cron: "every half hour".to_string(),
            ..ScheduleConfig::default()
        };
        assert!(ContrackScheduler::start(&config, aggregator(), None).await.is_err());
    }
}
