use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contrack_core::{ContestDraft, Platform};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{end_after_minutes, AdapterContext, AdapterError, ParsedListing, SourceAdapter};

const LISTING_URL: &str =
    "https://www.codechef.com/api/list/contests/all?sort_by=START&sorting_order=asc&offset=0&mode=all";

#[derive(Debug, Clone)]
pub struct CodeChefAdapter {
    listing_url: String,
}

impl Default for CodeChefAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeChefAdapter {
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
struct ContestLists {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    present_contests: Vec<CcContest>,
    #[serde(default)]
    future_contests: Vec<CcContest>,
    #[serde(default)]
    past_contests: Vec<CcContest>,
}

#[derive(Debug, Deserialize)]
struct CcContest {
    contest_code: Option<String>,
    #[serde(default)]
    contest_name: Option<String>,
    #[serde(default)]
    contest_start_date_iso: Option<String>,
    #[serde(default)]
    contest_end_date_iso: Option<String>,
    /// Minutes, sent either as a string or a number.
    #[serde(default)]
    contest_duration: Option<JsonValue>,
}

fn parse_iso(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn duration_minutes(value: Option<&JsonValue>) -> Option<i64> {
    match value? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl CcContest {
    fn into_draft(self, ctx: &AdapterContext) -> Option<ContestDraft> {
        let code = self.contest_code.filter(|c| !c.trim().is_empty())?;
        let start_time = parse_iso(self.contest_start_date_iso.as_deref())?;
        let end_time = match parse_iso(self.contest_end_date_iso.as_deref()) {
            Some(end) => end,
            None => end_after_minutes(start_time, duration_minutes(self.contest_duration.as_ref())?)?,
        };
        Some(ContestDraft {
            platform: Platform::CodeChef,
            url: format!("https://www.codechef.com/{code}"),
            native_id: code,
            name: self.contest_name.unwrap_or_default(),
            start_time,
            end_time,
            fetched_at: ctx.fetched_at,
        })
    }
}

#[async_trait]
impl SourceAdapter for CodeChefAdapter {
    fn platform(&self) -> Platform {
        Platform::CodeChef
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    fn parse_listing(&self, ctx: &AdapterContext, body: &[u8]) -> Result<ParsedListing, AdapterError> {
        let lists: ContestLists = serde_json::from_slice(body)
            .map_err(|e| AdapterError::unavailable(Platform::CodeChef, format!("malformed payload: {e}")))?;
        if lists.status != "success" {
            return Err(AdapterError::unavailable(
                Platform::CodeChef,
                format!(
                    "api status {}: {}",
                    lists.status,
                    lists.message.as_deref().unwrap_or("no message")
                ),
            ));
        }

        let mut listing = ParsedListing::default();
        let mut seen = HashSet::new();
        let records = lists
            .present_contests
            .into_iter()
            .chain(lists.future_contests)
            .chain(lists.past_contests);
        for contest in records {
            let code = contest.contest_code.clone();
            match contest.into_draft(ctx) {
                // A contest can sit in two lists while it flips from future to present.
                Some(draft) if !seen.insert(draft.native_id.clone()) => {}
                Some(draft) => listing.drafts.push(draft),
                None => {
                    warn!(run_id = %ctx.run_id, ?code, "codechef record with missing or out-of-range code, start or end; skipped");
                    listing.skipped += 1;
                }
            }
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
    fn golden_snapshot_codechef() {
        let body = load_fixture(fixture_path("codechef", "listing.json")).unwrap();
        let listing = CodeChefAdapter::new().parse_listing(&ctx(), &body).unwrap();
        assert_eq!(listing.skipped, 1);
        assert_eq!(to_golden(&listing.drafts), read_snapshot("codechef"));
    }

    #[test]
    fn end_is_computed_from_minutes_when_absent() {
        let body = br#"{
            "status": "success",
            "future_contests": [
                {"contest_code": "START1", "contest_name": "Starters 1",
                 "contest_start_date_iso": "2026-03-04T20:00:00+05:30", "contest_duration": 150}
            ]
        }"#;
        let listing = CodeChefAdapter::new().parse_listing(&ctx(), body).unwrap();
        let draft = &listing.drafts[0];
        assert_eq!((draft.end_time - draft.start_time).num_minutes(), 150);
        assert_eq!(draft.start_time.to_rfc3339(), "2026-03-04T14:30:00+00:00");
    }

    #[test]
    fn out_of_range_minutes_skip_only_that_record() {
        let body = br#"{
            "status": "success",
            "future_contests": [
                {"contest_code": "START3", "contest_name": "Huge",
                 "contest_start_date_iso": "2026-03-04T20:00:00+05:30", "contest_duration": 9223372036854775807},
                {"contest_code": "START4", "contest_name": "Past max date",
                 "contest_start_date_iso": "2026-03-04T20:00:00+05:30", "contest_duration": "100000000000000"},
                {"contest_code": "START5", "contest_name": "Fine",
                 "contest_start_date_iso": "2026-03-04T20:00:00+05:30", "contest_duration": "120"}
            ]
        }"#;
        let listing = CodeChefAdapter::new().parse_listing(&ctx(), body).unwrap();
        assert_eq!(listing.skipped, 2);
        assert_eq!(listing.drafts.len(), 1);
        assert_eq!(listing.drafts[0].native_id, "START5");
    }

    #[test]
    fn duplicate_codes_across_lists_are_collapsed() {
        let body = br#"{
            "status": "success",
            "present_contests": [
                {"contest_code": "START2", "contest_name": "Starters 2",
                 "contest_start_date_iso": "2026-03-04T20:00:00+05:30",
                 "contest_end_date_iso": "2026-03-04T22:00:00+05:30"}
            ],
            "future_contests": [
                {"contest_code": "START2", "contest_name": "Starters 2",
                 "contest_start_date_iso": "2026-03-04T20:00:00+05:30",
                 "contest_end_date_iso": "2026-03-04T22:00:00+05:30"}
            ]
        }"#;
        let listing = CodeChefAdapter::new().parse_listing(&ctx(), body).unwrap();
        assert_eq!(listing.drafts.len(), 1);
        assert_eq!(listing.skipped, 0);
    }

    #[test]
    fn non_success_status_is_source_unavailable() {
        let body = br#"{"status":"error","message":"blocked"}"#;
        assert!(CodeChefAdapter::new().parse_listing(&ctx(), body).is_err());
    }
}
