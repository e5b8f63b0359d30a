use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contrack_core::{ContestDraft, Platform};
use serde::Deserialize;
use tracing::warn;

use crate::{end_after_seconds, AdapterContext, AdapterError, ParsedListing, SourceAdapter};

const LISTING_URL: &str = "https://codeforces.com/api/contest.list?gym=false";

#[derive(Debug, Clone)]
pub struct CodeforcesAdapter {
    listing_url: String,
}

impl Default for CodeforcesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeforcesAdapter {
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
struct Envelope {
    status: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    result: Vec<CfContest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfContest {
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    start_time_seconds: Option<i64>,
    duration_seconds: Option<i64>,
}

impl CfContest {
    fn into_draft(self, ctx: &AdapterContext) -> Option<ContestDraft> {
        let id = self.id?;
        let start_time = DateTime::<Utc>::from_timestamp(self.start_time_seconds?, 0)?;
        let end_time = end_after_seconds(start_time, self.duration_seconds?)?;
        Some(ContestDraft {
            platform: Platform::Codeforces,
            native_id: id.to_string(),
            name: self.name.unwrap_or_default(),
            start_time,
            end_time,
            url: format!("https://codeforces.com/contest/{id}"),
            fetched_at: ctx.fetched_at,
        })
    }
}

#[async_trait]
impl SourceAdapter for CodeforcesAdapter {
    fn platform(&self) -> Platform {
        Platform::Codeforces
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    fn parse_listing(&self, ctx: &AdapterContext, body: &[u8]) -> Result<ParsedListing, AdapterError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| AdapterError::unavailable(Platform::Codeforces, format!("malformed payload: {e}")))?;
        if envelope.status != "OK" {
            return Err(AdapterError::unavailable(
                Platform::Codeforces,
                format!(
                    "api status {}: {}",
                    envelope.status,
                    envelope.comment.as_deref().unwrap_or("no comment")
                ),
            ));
        }

        let mut listing = ParsedListing::default();
        for contest in envelope.result {
            let id = contest.id;
            match contest.into_draft(ctx) {
                Some(draft) => listing.drafts.push(draft),
                None => {
                    warn!(run_id = %ctx.run_id, ?id, "codeforces record with missing or out-of-range id, start or duration; skipped");
                    listing.skipped += 1;
                }
            }
        }
        Ok(listing)
    }
}
