use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contrack_core::{ContestDraft, Platform};
use serde::Deserialize;
use tracing::warn;

use crate::{end_after_seconds, AdapterContext, AdapterError, ParsedListing, SourceAdapter};

/// GraphQL over GET; the query is pre-encoded.
const LISTING_URL: &str =
    "https://leetcode.com/graphql?query=%7BallContests%7Btitle%20titleSlug%20startTime%20duration%7D%7D";

#[derive(Debug, Clone)]
pub struct LeetCodeAdapter {
    listing_url: String,
}

impl Default for LeetCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LeetCodeAdapter {
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
struct GraphQlResponse {
    data: Option<ContestsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContestsData {
    #[serde(default)]
    all_contests: Vec<LcContest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LcContest {
    #[serde(default)]
    title: Option<String>,
    title_slug: Option<String>,
    start_time: Option<i64>,
    /// Seconds.
    duration: Option<i64>,
}

#[async_trait]
impl SourceAdapter for LeetCodeAdapter {
    fn platform(&self) -> Platform {
        Platform::LeetCode
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    fn parse_listing(&self, ctx: &AdapterContext, body: &[u8]) -> Result<ParsedListing, AdapterError> {
        let resp: GraphQlResponse = serde_json::from_slice(body)
            .map_err(|e| AdapterError::unavailable(Platform::LeetCode, format!("malformed payload: {e}")))?;
        if !resp.errors.is_empty() {
            let messages = resp
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AdapterError::unavailable(Platform::LeetCode, format!("graphql errors: {messages}")));
        }
        let Some(data) = resp.data else {
            return Err(AdapterError::unavailable(Platform::LeetCode, "response carried no data"));
        };

        let mut listing = ParsedListing::default();
        for contest in data.all_contests {
            let slug = contest.title_slug.filter(|s| !s.trim().is_empty());
            let start = contest
                .start_time
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
            let end = start.zip(contest.duration).and_then(|(s, d)| end_after_seconds(s, d));
            let (Some(slug), Some(start_time), Some(end_time)) = (slug, start, end) else {
                warn!(run_id = %ctx.run_id, title = ?contest.title, "leetcode record with missing or out-of-range slug, start or duration; skipped");
                listing.skipped += 1;
                continue;
            };
            listing.drafts.push(ContestDraft {
                platform: Platform::LeetCode,
                url: format!("https://leetcode.com/contest/{slug}"),
                native_id: slug,
                name: contest.title.unwrap_or_default(),
                start_time,
                end_time,
                fetched_at: ctx.fetched_at,
            });
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_fixture;
    use crate::test_support::{ctx, fixture_path, read_snapshot, to_golden};

    #[test]
    fn golden_snapshot_leetcode() {
        let body = load_fixture(fixture_path("leetcode", "listing.json")).unwrap();
        let listing = LeetCodeAdapter::new().parse_listing(&ctx(), &body).unwrap();
        assert_eq!(listing.skipped, 1);
        assert_eq!(to_golden(&listing.drafts), read_snapshot("leetcode"));
    }

    #[test]
    fn out_of_range_duration_skips_only_that_record() {
        let body = br#"{"data":{"allContests":[
            {"title":"Huge","titleSlug":"weekly-contest-900","startTime":1700000000,"duration":9223372036854775807},
            {"title":"Bad start","titleSlug":"weekly-contest-901","startTime":-9223372036854775808,"duration":5400},
            {"title":"Fine","titleSlug":"weekly-contest-902","startTime":1700000000,"duration":5400}
        ]}}"#;
        let listing = LeetCodeAdapter::new().parse_listing(&ctx(), body).unwrap();
        assert_eq!(listing.skipped, 2);
        assert_eq!(listing.drafts.len(), 1);
        assert_eq!(listing.drafts[0].native_id, "weekly-contest-902");
    }

    #[test]
    fn graphql_errors_fail_the_listing() {
        let body = br#"{"data":null,"errors":[{"message":"rate limited"}]}"#;
        let err = LeetCodeAdapter::new().parse_listing(&ctx(), body).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }
}
