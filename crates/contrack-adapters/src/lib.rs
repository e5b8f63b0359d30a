//! Upstream contest-listing adapters, one per platform.
//!
//! Each adapter owns its payload types and its parse path; the only shared pieces are the
//! HTTP fetcher and the `ContestDraft` handoff record.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use contrack_core::{ContestDraft, Platform};
use contrack_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod atcoder;
mod codechef;
mod codeforces;
mod leetcode;

pub use atcoder::AtCoderAdapter;
pub use codechef::CodeChefAdapter;
pub use codeforces::CodeforcesAdapter;
pub use leetcode::LeetCodeAdapter;

pub const CRATE_NAME: &str = "contrack-adapters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid, fetched_at: DateTime<Utc>) -> Self {
        Self { run_id, fetched_at }
    }
}

/// Drafts parsed from one listing, plus how many upstream records were unusable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedListing {
    pub drafts: Vec<ContestDraft>,
    pub skipped: usize,
}

/// `start` plus an upstream duration in seconds; `None` when either leaves chrono's range.
pub(crate) fn end_after_seconds(start: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    start.checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

pub(crate) fn end_after_minutes(start: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    start.checked_add_signed(TimeDelta::try_minutes(minutes)?)
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{platform} source unavailable: {reason}")]
    SourceUnavailable { platform: Platform, reason: String },
}

impl AdapterError {
    pub fn unavailable(platform: Platform, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            platform,
            reason: reason.to_string(),
        }
    }

    pub fn from_fetch(platform: Platform, err: FetchError) -> Self {
        Self::unavailable(platform, err)
    }

    pub fn platform(&self) -> Platform {
        match self {
            AdapterError::SourceUnavailable { platform, .. } => *platform,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    fn listing_url(&self) -> &str;

    /// Translates a raw listing body into drafts. Unusable records are skipped and counted;
    /// an unusable envelope fails the whole listing.
    fn parse_listing(&self, ctx: &AdapterContext, body: &[u8]) -> Result<ParsedListing, AdapterError>;

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<ParsedListing, AdapterError> {
        let platform = self.platform();
        let resp = http
            .fetch_bytes(ctx.run_id, platform.slug(), self.listing_url())
            .await
            .map_err(|e| AdapterError::from_fetch(platform, e))?;
        self.parse_listing(ctx, &resp.body)
    }
}

pub fn adapter_for_platform(
    platform: Platform,
    listing_url: Option<&str>,
) -> Box<dyn SourceAdapter> {
    match platform {
        Platform::Codeforces => Box::new(match listing_url {
            Some(url) => CodeforcesAdapter::with_listing_url(url),
            None => CodeforcesAdapter::new(),
        }),
        Platform::LeetCode => Box::new(match listing_url {
            Some(url) => LeetCodeAdapter::with_listing_url(url),
            None => LeetCodeAdapter::new(),
        }),
        Platform::CodeChef => Box::new(match listing_url {
            Some(url) => CodeChefAdapter::with_listing_url(url),
            None => CodeChefAdapter::new(),
        }),
        Platform::AtCoder => Box::new(match listing_url {
            Some(url) => AtCoderAdapter::with_listing_url(url),
            None => AtCoderAdapter::new(),
        }),
    }
}

/// Reads a recorded listing body from disk.
pub fn load_fixture(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).with_context(|| format!("reading fixture {}", path.display()))
}
