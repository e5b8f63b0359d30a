//! Curation workflow: matches playlist videos to past contests and fills in missing solution links.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contrack_core::{Contest, ContestId, ContestStatus};
use contrack_storage::{ContestReader, ContestWriter, HttpFetcher};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::{info, warn};
use uuid::Uuid;

pub const YOUTUBE_PLAYLIST_ITEMS_URL: &str = "https://www.googleapis.com/youtube/v3/playlistItems";
const MAX_PLAYLIST_PAGES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistVideo {
    pub video_id: String,
    pub title: String,
}

impl PlaylistVideo {
    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    fn name(&self) -> &str;

    async fn videos(&self) -> Result<Vec<PlaylistVideo>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    title: Option<String>,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistPage {
    pub videos: Vec<PlaylistVideo>,
    pub next_page_token: Option<String>,
}

/// YouTube Data API v3 `playlistItems`, followed through `nextPageToken`.
pub struct YouTubePlaylist {
    http: Arc<HttpFetcher>,
    endpoint: String,
    api_key: String,
    playlist_id: String,
}

impl YouTubePlaylist {
    pub fn new(http: Arc<HttpFetcher>, api_key: impl Into<String>, playlist_id: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: YOUTUBE_PLAYLIST_ITEMS_URL.to_string(),
            api_key: api_key.into(),
            playlist_id: playlist_id.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Items without a title or video id (deleted and private videos) are dropped.
    pub fn parse_page(body: &[u8]) -> Result<PlaylistPage> {
        let resp: PlaylistItemsResponse =
            serde_json::from_slice(body).context("parsing playlistItems response")?;
        let videos = resp
            .items
            .into_iter()
            .filter_map(|item| {
                let snippet = item.snippet?;
                let video_id = snippet.resource_id?.video_id?;
                let title = snippet.title?.trim().to_string();
                (!title.is_empty()).then_some(PlaylistVideo { video_id, title })
            })
            .collect();
        Ok(PlaylistPage {
            videos,
            next_page_token: resp.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl PlaylistSource for YouTubePlaylist {
    fn name(&self) -> &str {
        &self.playlist_id
    }

    async fn videos(&self) -> Result<Vec<PlaylistVideo>> {
        let run_id = Uuid::new_v4();
        let mut videos = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_PLAYLIST_PAGES {
            let mut query = vec![
                ("part", "snippet"),
                ("maxResults", "50"),
                ("playlistId", self.playlist_id.as_str()),
                ("key", self.api_key.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let resp = self
                .http
                .fetch_bytes_with_query(run_id, "youtube", &self.endpoint, &query)
                .await
                .with_context(|| format!("fetching playlist {}", self.playlist_id))?;
            let page = Self::parse_page(&resp.body)?;
            videos.extend(page.videos);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(videos),
            }
        }
        warn!(playlist = %self.playlist_id, pages = MAX_PLAYLIST_PAGES, "playlist truncated at page limit");
        Ok(videos)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    pub threshold: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { threshold: 0.92 }
    }
}

const NOISE_WORDS: &[&str] = &[
    "solution", "solutions", "editorial", "explained", "explanation", "video", "videos",
    "discussion", "screencast", "problems", "problem", "live",
];

pub struct SolutionMatcher {
    config: MatcherConfig,
}

impl SolutionMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Lowercase alphanumeric words, platform abbreviations expanded, filler words dropped.
    pub fn normalize_title(input: &str) -> String {
        input
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .filter(|w| !NOISE_WORDS.contains(w))
            .map(|w| match w {
                "abc" => "atcoder beginner contest",
                "arc" => "atcoder regular contest",
                "agc" => "atcoder grand contest",
                "cf" => "codeforces",
                other => other,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First multi-digit number, e.g. the round number in "Codeforces Round 1010 (Div. 2)".
    fn contest_number(normalized: &str) -> Option<&str> {
        normalized
            .split(' ')
            .find(|w| w.len() >= 2 && w.chars().all(|c| c.is_ascii_digit()))
    }

    fn division(normalized: &str) -> Option<&str> {
        let mut words = normalized.split(' ');
        while let Some(w) = words.next() {
            if w == "div" || w == "division" {
                return words.next();
            }
        }
        None
    }

    pub fn score(&self, video_title: &str, contest_name: &str) -> f64 {
        let video = Self::normalize_title(video_title);
        let contest = Self::normalize_title(contest_name);
        if video.is_empty() || contest.is_empty() {
            return 0.0;
        }
        if conflicting(Self::contest_number(&video), Self::contest_number(&contest))
            || conflicting(Self::division(&video), Self::division(&contest))
        {
            return 0.0;
        }
        if video.contains(&contest) || contest.contains(&video) {
            return 1.0;
        }
        jaro_winkler(&video, &contest)
    }

    /// Highest-scoring video at or above the threshold; the earlier video wins ties.
    pub fn best_match<'a>(&self, contest: &Contest, videos: &'a [PlaylistVideo]) -> Option<(&'a PlaylistVideo, f64)> {
        let mut best: Option<(&PlaylistVideo, f64)> = None;
        for video in videos {
            let score = self.score(&video.title, &contest.name);
            if score < self.config.threshold {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((video, score));
            }
        }
        best
    }
}

fn conflicting(a: Option<&str>, b: Option<&str>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedSolution {
    pub contest_id: ContestId,
    pub video_url: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkReport {
    pub videos_seen: usize,
    pub candidates: usize,
    pub linked: Vec<LinkedSolution>,
    pub failed_playlists: Vec<String>,
}

pub struct SolutionLinker {
    store: Arc<dyn ContestWriter>,
    playlists: Vec<Box<dyn PlaylistSource>>,
    matcher: SolutionMatcher,
}

impl SolutionLinker {
    pub fn new(store: Arc<dyn ContestWriter>, playlists: Vec<Box<dyn PlaylistSource>>) -> Self {
        Self {
            store,
            playlists,
            matcher: SolutionMatcher::new(MatcherConfig::default()),
        }
    }

    pub fn with_matcher(mut self, config: MatcherConfig) -> Self {
        self.matcher = SolutionMatcher::new(config);
        self
    }

    /// Links past contests that have no solution yet. Existing links are never replaced.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<LinkReport> {
        let mut report = LinkReport::default();
        let mut videos = Vec::new();
        for playlist in &self.playlists {
            match playlist.videos().await {
                Ok(found) => videos.extend(found),
                Err(err) => {
                    warn!(playlist = playlist.name(), error = %format!("{err:#}"), "playlist fetch failed");
                    report.failed_playlists.push(playlist.name().to_string());
                }
            }
        }
        report.videos_seen = videos.len();
        if !self.playlists.is_empty() && report.failed_playlists.len() == self.playlists.len() {
            return Err(anyhow!("every solution playlist failed to load"));
        }

        let contests = self.store.all_contests().await.context("reading contests for linking")?;
        let candidates = contests
            .iter()
            .filter(|c| c.solution_link.is_none() && c.status_at(now) == ContestStatus::Past)
            .collect::<Vec<_>>();
        report.candidates = candidates.len();

        for contest in candidates {
            let Some((video, score)) = self.matcher.best_match(contest, &videos) else {
                continue;
            };
            let url = video.url();
            if self
                .store
                .set_solution_link(&contest.id, &url)
                .await
                .with_context(|| format!("linking solution for {}", contest.id.as_str()))?
            {
                report.linked.push(LinkedSolution {
                    contest_id: contest.id.clone(),
                    video_url: url,
                    score,
                });
            }
        }

        info!(
            videos = report.videos_seen,
            candidates = report.candidates,
            linked = report.linked.len(),
            "solution linking finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::{Duration, TimeZone};
    use contrack_core::Platform;
    use contrack_storage::{ContestReader, MemoryStore};

    fn fixture_page() -> Vec<u8> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/youtube/playlist_page.json");
        contrack_adapters::load_fixture(path).unwrap()
    }

    struct StaticPlaylist(Option<Vec<PlaylistVideo>>);

    #[async_trait]
    impl PlaylistSource for StaticPlaylist {
        fn name(&self) -> &str {
            "static"
        }

        async fn videos(&self) -> Result<Vec<PlaylistVideo>> {
            self.0.clone().ok_or_else(|| anyhow!("quota exceeded"))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).single().unwrap()
    }

    fn contest(id: &str, name: &str, start_days: i64, link: Option<&str>) -> Contest {
        let (prefix, _) = id.split_once(':').unwrap();
        let start = now() + Duration::days(start_days);
        Contest {
            id: ContestId::from_stored(id),
            name: name.to_string(),
            platform: Platform::from_id_prefix(prefix).unwrap(),
            start_time: start,
            end_time: start + Duration::hours(2),
            duration_seconds: 7200,
            url: String::new(),
            solution_link: link.map(ToString::to_string),
        }
    }

    #[test]
    fn parses_playlist_page_and_skips_private_items() {
        let page = YouTubePlaylist::parse_page(&fixture_page()).unwrap();
        assert_eq!(page.videos.len(), 3);
        assert_eq!(page.videos[0].video_id, "a1B2c3D4e5F");
        assert_eq!(page.next_page_token.as_deref(), Some("EAAaBlBUOkNESQ"));
    }

    #[test]
    fn matcher_respects_numbers_and_divisions() {
        let matcher = SolutionMatcher::new(MatcherConfig::default());
        assert_eq!(
            matcher.score("ABC 444 Editorial | A to F explained", "AtCoder Beginner Contest 444"),
            1.0
        );
        assert_eq!(matcher.score("Leetcode Weekly Contest 438 | Video Solutions", "Weekly Contest 437"), 0.0);
        assert_eq!(
            matcher.score("Codeforces Round 1010 (Div. 1) solutions", "Codeforces Round 1010 (Div. 2)"),
            0.0
        );
        assert!(matcher.score("Starters 230 discussion", "Codeforces Round 1010 (Div. 2)") < 0.92);
    }

    #[tokio::test]
    async fn links_only_past_contests_without_a_link() {
        let videos = YouTubePlaylist::parse_page(&fixture_page()).unwrap().videos;
        let store = Arc::new(MemoryStore::with_contests([
            contest("cf:1010", "Codeforces Round 1010 (Div. 2)", -6, None),
            contest("lc:weekly-contest-438", "Weekly Contest 438", -5, None),
            contest("ac:abc444", "AtCoder Beginner Contest 444", -4, Some("https://video/kept")),
            contest("lc:weekly-contest-439", "Weekly Contest 439", 2, None),
        ]));
        let linker = SolutionLinker::new(store.clone(), vec![Box::new(StaticPlaylist(Some(videos)))]);

        let report = linker.run_once(now()).await.unwrap();
        assert_eq!(report.videos_seen, 3);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.linked.len(), 2);

        let cf = store.contest(&ContestId::from_stored("cf:1010")).await.unwrap().unwrap();
        assert_eq!(cf.solution_link.as_deref(), Some("https://www.youtube.com/watch?v=a1B2c3D4e5F"));
        let ac = store.contest(&ContestId::from_stored("ac:abc444")).await.unwrap().unwrap();
        assert_eq!(ac.solution_link.as_deref(), Some("https://video/kept"));
        let upcoming = store
            .contest(&ContestId::from_stored("lc:weekly-contest-439"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(upcoming.solution_link, None);

        // second pass has nothing left to do
        let again = linker.run_once(now()).await.unwrap();
        assert!(again.linked.is_empty());
    }

    #[tokio::test]
    async fn all_playlists_failing_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let linker = SolutionLinker::new(store, vec![Box::new(StaticPlaylist(None))]);
        assert!(linker.run_once(now()).await.is_err());
    }
}
