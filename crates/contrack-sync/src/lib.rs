//! Contest sync pipeline: normalization, reconciliation, run orchestration and the read/bookmark
//! services built on top of the persisted store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contrack_adapters::{adapter_for_platform, SourceAdapter};
use contrack_core::Platform;
use contrack_storage::{
    BookmarkStore, ContestReader, ContestWriter, HttpClientConfig, HttpFetcher, MemoryStore, PgStore,
    SnapshotCache,
};
use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};

mod aggregate;
mod bookmarks;
mod feed;
mod gate;
mod normalize;
mod reconcile;
mod report;
mod schedule;
mod solutions;

pub use aggregate::{
    AggregationOutcome, Aggregator, CollectedBatch, RunDisposition, SourceFailure, SourceSuccess,
};
pub use bookmarks::{
    BookmarkCoordinator, BookmarkError, BookmarkView, SessionEvent, SessionHandle, SessionSubscription,
};
pub use feed::{ContestFeed, ContestQuery, ContestView, FeedError, FeedPage};
pub use gate::{GateGuard, RunGate, RunTicket};
pub use normalize::{normalize, normalize_all, NormalizeError, RejectedRecord};
pub use reconcile::{apply_plan, plan_upserts, reconcile, ReconcileSummary, UpsertPlan};
pub use report::write_run_report;
pub use schedule::{ContrackScheduler, ScheduleConfig, DEFAULT_PLAYLIST_CRON, DEFAULT_REFRESH_CRON};
pub use solutions::{
    LinkReport, LinkedSolution, MatcherConfig, PlaylistSource, PlaylistVideo, SolutionLinker, SolutionMatcher,
    YouTubePlaylist,
};

pub const CRATE_NAME: &str = "contrack-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub platform: Platform,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Replaces the adapter's built-in listing URL, e.g. to point at a mirror.
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceRegistry {
    pub fn all_platforms() -> Self {
        Self {
            sources: Platform::ALL
                .iter()
                .map(|&platform| SourceConfig {
                    platform,
                    enabled: true,
                    listing_url: None,
                    notes: None,
                })
                .collect(),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    /// A missing registry file enables every platform with its default listing URL.
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            info!(path = %path.display(), "no source registry; enabling all platforms");
            return Ok(Self::all_platforms());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Operator notes of the enabled sources, for the run brief.
    pub fn notes(&self) -> BTreeMap<Platform, String> {
        self.enabled()
            .filter_map(|s| Some((s.platform, s.notes.clone()?)))
            .collect()
    }

    pub fn adapters(&self) -> Vec<Box<dyn SourceAdapter>> {
        self.enabled()
            .map(|s| adapter_for_platform(s.platform, s.listing_url.as_deref()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Postgres when set; otherwise an in-memory store seeded from the snapshot cache.
    pub database_url: Option<String>,
    pub snapshot_path: PathBuf,
    pub reports_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub schedule: ScheduleConfig,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub source_timeout_secs: u64,
    pub youtube_api_key: Option<String>,
    pub solution_playlists: Vec<String>,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            database_url: non_empty("DATABASE_URL"),
            snapshot_path: non_empty("CONTRACK_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/contest_snapshot.json")),
            reports_dir: non_empty("CONTRACK_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            scheduler_enabled: lookup("CONTRACK_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            schedule: ScheduleConfig {
                refresh_cron: non_empty("CONTRACK_REFRESH_CRON")
                    .unwrap_or_else(|| DEFAULT_REFRESH_CRON.to_string()),
                playlist_cron: non_empty("CONTRACK_PLAYLIST_CRON")
                    .unwrap_or_else(|| DEFAULT_PLAYLIST_CRON.to_string()),
            },
            user_agent: non_empty("CONTRACK_USER_AGENT").unwrap_or_else(|| "contrack-bot/0.1".to_string()),
            http_timeout_secs: lookup("CONTRACK_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            source_timeout_secs: lookup("CONTRACK_SOURCE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            youtube_api_key: non_empty("YOUTUBE_API_KEY"),
            solution_playlists: lookup("CONTRACK_SOLUTION_PLAYLISTS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            workspace_root: PathBuf::from("."),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..HttpClientConfig::default()
        }
    }

    pub fn snapshot_cache(&self) -> SnapshotCache {
        SnapshotCache::new(&self.snapshot_path)
    }
}

/// The persisted store seen through its three access surfaces.
#[derive(Clone)]
pub struct StoreHandles {
    pub contests: Arc<dyn ContestReader>,
    pub writer: Arc<dyn ContestWriter>,
    pub bookmarks: Arc<dyn BookmarkStore>,
    pub backend: &'static str,
}

impl StoreHandles {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            contests: store.clone(),
            writer: store.clone(),
            bookmarks: store,
            backend: "memory",
        }
    }

    pub fn postgres(store: Arc<PgStore>) -> Self {
        Self {
            contests: store.clone(),
            writer: store.clone(),
            bookmarks: store,
            backend: "postgres",
        }
    }
}

pub async fn open_stores(config: &SyncConfig) -> Result<StoreHandles> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await.context("connecting to postgres")?;
            store.migrate().await?;
            Ok(StoreHandles::postgres(Arc::new(store)))
        }
        None => {
            let seed = match config.snapshot_cache().load().await {
                Ok(Some(snapshot)) => snapshot.contests,
                Ok(None) => Vec::new(),
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "ignoring unreadable snapshot cache");
                    Vec::new()
                }
            };
            info!(seeded = seed.len(), "no DATABASE_URL; using in-memory store");
            Ok(StoreHandles::memory(Arc::new(MemoryStore::with_contests(seed))))
        }
    }
}

/// Everything the web server and CLI need, wired from one config.
#[derive(Clone)]
pub struct ContrackServices {
    pub config: SyncConfig,
    pub stores: StoreHandles,
    pub aggregator: Arc<Aggregator>,
    pub feed: Arc<ContestFeed>,
    pub bookmarks: BookmarkCoordinator,
    pub linker: Option<Arc<SolutionLinker>>,
}

impl ContrackServices {
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let stores = open_stores(&config).await?;
        let registry = SourceRegistry::load(&config.workspace_root.join("sources.yaml")).await?;
        Self::assemble(config, stores, registry)
    }

    pub fn assemble(config: SyncConfig, stores: StoreHandles, registry: SourceRegistry) -> Result<Self> {
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let aggregator = Aggregator::new(registry.adapters(), http.clone(), stores.writer.clone())
            .with_snapshot_cache(config.snapshot_cache())
            .with_reports_dir(&config.reports_dir)
            .with_source_notes(registry.notes())
            .with_source_timeout(Duration::from_secs(config.source_timeout_secs));
        let feed = ContestFeed::new(stores.contests.clone(), stores.bookmarks.clone())
            .with_snapshot_cache(config.snapshot_cache());
        let linker = build_linker(&config, http, stores.writer.clone());
        Ok(Self {
            bookmarks: BookmarkCoordinator::new(stores.bookmarks.clone()),
            aggregator: Arc::new(aggregator),
            feed: Arc::new(feed),
            linker,
            stores,
            config,
        })
    }

    pub async fn maybe_start_scheduler(&self) -> Result<Option<ContrackScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }
        ContrackScheduler::start(&self.config.schedule, self.aggregator.clone(), self.linker.clone())
            .await
            .map(Some)
    }
}

fn build_linker(
    config: &SyncConfig,
    http: Arc<HttpFetcher>,
    store: Arc<dyn ContestWriter>,
) -> Option<Arc<SolutionLinker>> {
    let Some(api_key) = &config.youtube_api_key else {
        return None;
    };
    if config.solution_playlists.is_empty() {
        return None;
    }
    let playlists = config
        .solution_playlists
        .iter()
        .map(|id| Box::new(YouTubePlaylist::new(http.clone(), api_key.clone(), id.clone())) as Box<dyn PlaylistSource>)
        .collect();
    Some(Arc::new(SolutionLinker::new(store, playlists)))
}

pub async fn run_sync_once_from_env() -> Result<AggregationOutcome> {
    let services = ContrackServices::from_config(SyncConfig::from_env()).await?;
    services.aggregator.run_once().await
}
