use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contrack_core::{ContestDraft, Platform};
use serde::Deserialize;
use tracing::warn;

use crate::{end_after_seconds, AdapterContext, AdapterError, ParsedListing, SourceAdapter};

/// AtCoder has no public listing API; this is the AtCoder Problems mirror.
const LISTING_URL: &str = "https://kenkoooo.com/atcoder/resources/contests.json";

#[derive(Debug, Clone)]
pub struct AtCoderAdapter {
    listing_url: String,
}

impl Default for AtCoderAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AtCoderAdapter {
    pub fn new() -> Self {
        Self::with_listing_url(LISTING_URL)
    }

    pub fn with_listing_url(url: impl Into<String>) -> Self {
        Self {
            listing_url: url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AcContest {
    id: Option<String>,
    start_epoch_second: Option<i64>,
    duration_second: Option<i64>,
    #[serde(default)]
    title: Option<String>,
}

#[async_trait]
impl SourceAdapter for AtCoderAdapter {
    fn platform(&self) -> Platform {
        Platform::AtCoder
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    fn parse_listing(&self, ctx: &AdapterContext, body: &[u8]) -> Result<ParsedListing, AdapterError> {
        let contests: Vec<AcContest> = serde_json::from_slice(body)
            .map_err(|e| AdapterError::unavailable(Platform::AtCoder, format!("malformed payload: {e}")))?;

        let mut listing = ParsedListing::default();
        for contest in contests {
            let start = contest
                .start_epoch_second
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
            let end = start.zip(contest.duration_second).and_then(|(s, d)| end_after_seconds(s, d));
            let (Some(id), Some(start_time), Some(end_time)) = (contest.id, start, end) else {
                warn!(run_id = %ctx.run_id, title = ?contest.title, "atcoder record with missing or out-of-range id, start or duration; skipped");
                listing.skipped += 1;
                continue;
            };
            listing.drafts.push(ContestDraft {
                platform: Platform::AtCoder,
                url: format!("https://atcoder.jp/contests/{id}"),
                native_id: id,
                name: contest.title.unwrap_or_default(),
                start_time,
                end_time,
                fetched_at: ctx.fetched_at,
            });
        }
        Ok(listing)
    }
}
