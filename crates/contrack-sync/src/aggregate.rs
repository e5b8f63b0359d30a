//! Parallel fetch across sources, normalization, gated reconciliation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use contrack_adapters::{AdapterContext, SourceAdapter};
use contrack_core::{Contest, ContestDraft, Platform};
use contrack_storage::{ContestReader, ContestSnapshot, ContestWriter, HttpFetcher, SnapshotCache};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::gate::RunGate;
use crate::normalize::{normalize_all, RejectedRecord};
use crate::reconcile::{reconcile, ReconcileSummary};
use crate::report::write_run_report;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSuccess {
    pub platform: Platform,
    pub drafts: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub platform: Platform,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDisposition {
    Complete,
    /// Some sources failed; the rest were reconciled.
    Partial,
    AllSourcesFailed,
    StoreUnavailable,
    /// A run that started later already wrote; this run's results were discarded.
    Superseded,
}

/// Everything fetched in one cycle, before touching the store.
#[derive(Debug, Clone, Default)]
pub struct CollectedBatch {
    pub contests: Vec<Contest>,
    pub succeeded: Vec<SourceSuccess>,
    pub failed: Vec<SourceFailure>,
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationOutcome {
    pub run_id: Uuid,
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_ok: Vec<SourceSuccess>,
    pub failed_sources: Vec<SourceFailure>,
    pub rejected: Vec<RejectedRecord>,
    pub contests_in_batch: usize,
    pub reconcile: Option<ReconcileSummary>,
    pub disposition: RunDisposition,
    /// Non-blocking notice for the UI when the run degraded.
    pub notice: Option<String>,
}

impl AggregationOutcome {
    pub fn failed_platforms(&self) -> Vec<Platform> {
        self.failed_sources.iter().map(|f| f.platform).collect()
    }
}

enum SourceResult {
    Fetched(Platform, Vec<ContestDraft>, usize),
    Failed(SourceFailure),
}

pub struct Aggregator {
    adapters: Vec<Box<dyn SourceAdapter>>,
    http: Arc<HttpFetcher>,
    store: Arc<dyn ContestWriter>,
    snapshots: Option<SnapshotCache>,
    reports_dir: Option<PathBuf>,
    source_notes: BTreeMap<Platform, String>,
    source_timeout: Duration,
    gate: RunGate,
    latest: RwLock<Option<AggregationOutcome>>,
}

impl Aggregator {
    pub fn new(
        adapters: Vec<Box<dyn SourceAdapter>>,
        http: Arc<HttpFetcher>,
        store: Arc<dyn ContestWriter>,
    ) -> Self {
        Self {
            adapters,
            http,
            store,
            snapshots: None,
            reports_dir: None,
            source_notes: BTreeMap::new(),
            source_timeout: Duration::from_secs(20),
            gate: RunGate::new(),
            latest: RwLock::new(None),
        }
    }

    pub fn with_snapshot_cache(mut self, cache: SnapshotCache) -> Self {
        self.snapshots = Some(cache);
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn with_source_notes(mut self, notes: BTreeMap<Platform, String>) -> Self {
        self.source_notes = notes;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    pub async fn latest_outcome(&self) -> Option<AggregationOutcome> {
        self.latest.read().await.clone()
    }

    /// Fetches every source concurrently and waits for all of them to settle.
    pub async fn collect(&self, ctx: &AdapterContext) -> CollectedBatch {
        let fetches = self.adapters.iter().map(|adapter| {
            let platform = adapter.platform();
            let span = info_span!("source_fetch", run_id = %ctx.run_id, %platform);
            async move {
                match tokio::time::timeout(self.source_timeout, adapter.fetch_listing(&self.http, ctx)).await {
                    Ok(Ok(listing)) => SourceResult::Fetched(platform, listing.drafts, listing.skipped),
                    Ok(Err(err)) => SourceResult::Failed(SourceFailure {
                        platform,
                        reason: err.to_string(),
                    }),
                    Err(_) => SourceResult::Failed(SourceFailure {
                        platform,
                        reason: format!("timed out after {}s", self.source_timeout.as_secs_f32()),
                    }),
                }
            }
            .instrument(span)
        });

        let mut batch = CollectedBatch::default();
        let mut drafts = Vec::new();
        for result in join_all(fetches).await {
            match result {
                SourceResult::Fetched(platform, fetched, skipped) => {
                    batch.succeeded.push(SourceSuccess {
                        platform,
                        drafts: fetched.len(),
                        skipped,
                    });
                    drafts.extend(fetched);
                }
                SourceResult::Failed(failure) => {
                    warn!(run_id = %ctx.run_id, platform = %failure.platform, reason = %failure.reason, "source produced no records this cycle");
                    batch.failed.push(failure);
                }
            }
        }

        let (contests, rejected) = normalize_all(drafts);
        batch.contests = contests;
        batch.rejected = rejected;
        batch
    }

    pub async fn run_once(&self) -> Result<AggregationOutcome> {
        let started_at = Utc::now();
        let ticket = self.gate.issue(Uuid::new_v4(), started_at);
        let ctx = AdapterContext::new(ticket.run_id, started_at);

        let batch = self.collect(&ctx).await;
        let contests_in_batch = batch.contests.len();

        let (disposition, reconciled) = if batch.succeeded.is_empty() && !self.adapters.is_empty() {
            (RunDisposition::AllSourcesFailed, None)
        } else {
            let mut guard = self.gate.lock().await;
            if guard.is_superseded(&ticket) {
                info!(run_id = %ticket.run_id, sequence = ticket.sequence, "newer run already wrote; discarding results");
                (RunDisposition::Superseded, None)
            } else {
                match reconcile(self.store.as_ref(), batch.contests).await {
                    Ok(summary) => {
                        guard.record(ticket);
                        drop(guard);
                        self.save_snapshot(ticket.run_id).await;
                        let disposition = if batch.failed.is_empty() {
                            RunDisposition::Complete
                        } else {
                            RunDisposition::Partial
                        };
                        (disposition, Some(summary))
                    }
                    Err(err) => {
                        warn!(run_id = %ticket.run_id, %err, "store unavailable; abandoning this cycle's writes");
                        (RunDisposition::StoreUnavailable, None)
                    }
                }
            }
        };

        let outcome = AggregationOutcome {
            run_id: ticket.run_id,
            sequence: ticket.sequence,
            started_at,
            finished_at: Utc::now(),
            notice: notice_for(disposition, &batch.failed, self.adapters.len()),
            sources_ok: batch.succeeded,
            failed_sources: batch.failed,
            rejected: batch.rejected,
            contests_in_batch,
            reconcile: reconciled,
            disposition,
        };

        info!(
            run_id = %outcome.run_id,
            disposition = ?outcome.disposition,
            contests = outcome.contests_in_batch,
            failed = outcome.failed_sources.len(),
            rejected = outcome.rejected.len(),
            "aggregation run finished"
        );

        if let Some(dir) = &self.reports_dir {
            if let Err(err) = write_run_report(dir, &outcome, &self.source_notes).await {
                warn!(run_id = %outcome.run_id, %err, "failed to write run report");
            }
        }

        if disposition != RunDisposition::Superseded {
            let mut latest = self.latest.write().await;
            match latest.as_ref() {
                Some(current) if current.sequence > outcome.sequence => {
                    info!(run_id = %outcome.run_id, sequence = outcome.sequence, "newer run already reported; keeping its outcome");
                }
                _ => *latest = Some(outcome.clone()),
            }
        }
        Ok(outcome)
    }

    async fn save_snapshot(&self, run_id: Uuid) {
        let Some(cache) = &self.snapshots else {
            return;
        };
        let contests = match self.store.all_contests().await {
            Ok(contests) => contests,
            Err(err) => {
                warn!(%run_id, %err, "could not read back contests for the snapshot cache");
                return;
            }
        };
        let snapshot = ContestSnapshot {
            run_id,
            taken_at: Utc::now(),
            contests,
        };
        if let Err(err) = cache.save(&snapshot).await {
            warn!(%run_id, %err, "failed to save contest snapshot");
        }
    }
}

fn notice_for(disposition: RunDisposition, failed: &[SourceFailure], total: usize) -> Option<String> {
    let names = || {
        failed
            .iter()
            .map(|f| f.platform.display_name())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match disposition {
        RunDisposition::Complete | RunDisposition::Superseded => None,
        RunDisposition::Partial => Some(format!(
            "{} of {} sources could not be reached ({}); some contests may be missing",
            failed.len(),
            total,
            names()
        )),
        RunDisposition::AllSourcesFailed => Some(format!(
            "no contest source could be reached ({}); showing the last saved contest list",
            names()
        )),
        RunDisposition::StoreUnavailable => {
            Some("contest database unavailable; showing the last saved contest list".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use contrack_adapters::{AdapterError, ParsedListing};
    use contrack_core::{classify, ContestId, ContestStatus};
    use contrack_storage::{ContestReader, HttpClientConfig, MemoryStore};
    use tempfile::tempdir;

    /// Serves canned drafts (or a failure) after an optional delay. The name suffix records
    /// which call produced a draft.
    struct CannedAdapter {
        platform: Platform,
        native_ids: Vec<&'static str>,
        fail: bool,
        failing_calls: Vec<usize>,
        delays_ms: Vec<u64>,
        calls: AtomicUsize,
        reference: DateTime<Utc>,
        offsets_hours: (i64, i64),
    }

    impl CannedAdapter {
        fn ok(platform: Platform, native_ids: Vec<&'static str>, reference: DateTime<Utc>, offsets_hours: (i64, i64)) -> Self {
            Self {
                platform,
                native_ids,
                fail: false,
                failing_calls: vec![],
                delays_ms: vec![],
                calls: AtomicUsize::new(0),
                reference,
                offsets_hours,
            }
        }

        fn failing(platform: Platform) -> Self {
            Self {
                fail: true,
                ..Self::ok(platform, vec![], Utc::now(), (0, 0))
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for CannedAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        fn listing_url(&self) -> &str {
            "memory://canned"
        }

        fn parse_listing(&self, _ctx: &AdapterContext, _body: &[u8]) -> Result<ParsedListing, AdapterError> {
            unreachable!("canned adapter never parses")
        }

        async fn fetch_listing(&self, _http: &HttpFetcher, ctx: &AdapterContext) -> Result<ParsedListing, AdapterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = self.delays_ms.get(call) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if self.fail || self.failing_calls.contains(&call) {
                return Err(AdapterError::unavailable(self.platform, "connection refused"));
            }
            let drafts = self
                .native_ids
                .iter()
                .map(|id| ContestDraft {
                    platform: self.platform,
                    native_id: id.to_string(),
                    name: format!("{} {id} (call {call})", self.platform),
                    start_time: self.reference + ChronoDuration::hours(self.offsets_hours.0),
                    end_time: self.reference + ChronoDuration::hours(self.offsets_hours.1),
                    url: String::new(),
                    fetched_at: ctx.fetched_at,
                })
                .collect();
            Ok(ParsedListing { drafts, skipped: 0 })
        }
    }

    fn http() -> Arc<HttpFetcher> {
        Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn failing_source_does_not_block_the_others() {
        let t = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::new(
            vec![
                Box::new(CannedAdapter::ok(Platform::Codeforces, vec!["1"], t, (1, 3))),
                Box::new(CannedAdapter::ok(Platform::LeetCode, vec!["1"], t, (-1, 1))),
                Box::new(CannedAdapter::failing(Platform::CodeChef)),
            ],
            http(),
            store.clone(),
        );

        let outcome = aggregator.run_once().await.unwrap();
        assert_eq!(outcome.disposition, RunDisposition::Partial);
        assert_eq!(outcome.failed_platforms(), vec![Platform::CodeChef]);
        assert!(outcome.notice.as_deref().unwrap().contains("CodeChef"));

        let stored = store.all_contests().await.unwrap();
        let mut ids = stored.iter().map(|c| c.id.as_str().to_string()).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, vec!["cf:1", "lc:1"]);
        assert!(stored.iter().all(|c| c.platform != Platform::CodeChef));

        let cf = store.contest(&ContestId::from_stored("cf:1")).await.unwrap().unwrap();
        let lc = store.contest(&ContestId::from_stored("lc:1")).await.unwrap().unwrap();
        assert_eq!(classify(&cf, t), ContestStatus::Upcoming);
        assert_eq!(classify(&lc, t), ContestStatus::Ongoing);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_and_is_reported() {
        let t = Utc::now();
        let mut slow = CannedAdapter::ok(Platform::AtCoder, vec!["abc1"], t, (1, 2));
        slow.delays_ms = vec![60_000];
        let aggregator = Aggregator::new(
            vec![
                Box::new(slow),
                Box::new(CannedAdapter::ok(Platform::Codeforces, vec!["1"], t, (1, 3))),
            ],
            http(),
            Arc::new(MemoryStore::new()),
        )
        .with_source_timeout(Duration::from_secs(5));

        let outcome = aggregator.run_once().await.unwrap();
        assert_eq!(outcome.failed_platforms(), vec![Platform::AtCoder]);
        assert!(outcome.failed_sources[0].reason.contains("timed out"));
        assert_eq!(outcome.contests_in_batch, 1);
    }

    #[tokio::test]
    async fn all_sources_failing_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::new(
            vec![
                Box::new(CannedAdapter::failing(Platform::Codeforces)),
                Box::new(CannedAdapter::failing(Platform::LeetCode)),
            ],
            http(),
            store.clone(),
        );
        let outcome = aggregator.run_once().await.unwrap();
        assert_eq!(outcome.disposition, RunDisposition::AllSourcesFailed);
        assert!(outcome.reconcile.is_none());
        assert!(store.all_contests().await.unwrap().is_empty());
        assert_eq!(aggregator.latest_outcome().await.unwrap().run_id, outcome.run_id);
    }

    #[tokio::test]
    async fn store_outage_abandons_writes_and_keeps_snapshot() {
        let dir = tempdir().expect("tempdir");
        let cache = SnapshotCache::new(dir.path().join("snapshot.json"));
        let t = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::new(
            vec![Box::new(CannedAdapter::ok(Platform::Codeforces, vec!["1", "2"], t, (1, 3)))],
            http(),
            store.clone(),
        )
        .with_snapshot_cache(cache.clone());

        let first = aggregator.run_once().await.unwrap();
        assert_eq!(first.disposition, RunDisposition::Complete);
        let saved = cache.load().await.unwrap().unwrap();
        assert_eq!(saved.contests.len(), 2);
        assert_eq!(saved.run_id, first.run_id);

        store.set_available(false);
        let second = aggregator.run_once().await.unwrap();
        assert_eq!(second.disposition, RunDisposition::StoreUnavailable);
        assert_eq!(cache.load().await.unwrap().unwrap().run_id, first.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn late_finishing_older_run_does_not_clobber_newer_results() {
        let t = Utc::now();
        let mut adapter = CannedAdapter::ok(Platform::Codeforces, vec!["1"], t, (1, 3));
        adapter.delays_ms = vec![2_000, 10];
        let store = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::new(vec![Box::new(adapter)], http(), store.clone());

        let (older, newer) = tokio::join!(aggregator.run_once(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            aggregator.run_once().await
        });
        let (older, newer) = (older.unwrap(), newer.unwrap());

        assert!(older.sequence < newer.sequence);
        assert_eq!(newer.disposition, RunDisposition::Complete);
        assert_eq!(older.disposition, RunDisposition::Superseded);

        let stored = store.contest(&ContestId::from_stored("cf:1")).await.unwrap().unwrap();
        assert!(stored.name.ends_with("(call 1)"), "stale run overwrote: {}", stored.name);
        assert_eq!(aggregator.latest_outcome().await.unwrap().run_id, newer.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn late_failing_older_run_keeps_newer_outcome() {
        let t = Utc::now();
        let mut adapter = CannedAdapter::ok(Platform::Codeforces, vec!["1"], t, (1, 3));
        adapter.delays_ms = vec![2_000, 10];
        adapter.failing_calls = vec![0];
        let aggregator = Aggregator::new(vec![Box::new(adapter)], http(), Arc::new(MemoryStore::new()));

        let (older, newer) = tokio::join!(aggregator.run_once(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            aggregator.run_once().await
        });
        let (older, newer) = (older.unwrap(), newer.unwrap());

        assert!(older.sequence < newer.sequence);
        assert_eq!(older.disposition, RunDisposition::AllSourcesFailed);
        assert_eq!(newer.disposition, RunDisposition::Complete);

        let latest = aggregator.latest_outcome().await.unwrap();
        assert_eq!(latest.run_id, newer.run_id);
        assert!(latest.notice.is_none());
    }

    #[tokio::test]
    async fn run_report_is_written_per_run() {
        let dir = tempdir().expect("tempdir");
        let aggregator = Aggregator::new(
            vec![
                Box::new(CannedAdapter::ok(Platform::Codeforces, vec!["1"], Utc::now(), (1, 3))),
                Box::new(CannedAdapter::failing(Platform::CodeChef)),
            ],
            http(),
            Arc::new(MemoryStore::new()),
        )
        .with_reports_dir(dir.path())
        .with_source_notes(BTreeMap::from([
            (Platform::CodeChef, "internal listing endpoint".to_string()),
            (Platform::AtCoder, "community mirror".to_string()),
        ]));

        let outcome = aggregator.run_once().await.unwrap();
        let run_dir = dir.path().join(outcome.run_id.to_string());
        let brief = std::fs::read_to_string(run_dir.join("run_brief.md")).unwrap();
        assert!(brief.contains("CodeChef: FAILED"));
        assert!(brief.contains("## Source Notes\n- CodeChef: internal listing endpoint"));
        assert!(!brief.contains("community mirror"));
        assert!(run_dir.join("run_outcome.json").exists());
    }
}
