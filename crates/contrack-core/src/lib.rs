//! Core domain model for the contest tracker: contests, platforms, bookmarks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod status;

pub use status::{classify, ContestStatus, TimeRemaining};

pub const CRATE_NAME: &str = "contrack-core";

/// Contest platforms with a registered adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Codeforces,
    LeetCode,
    CodeChef,
    AtCoder,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Codeforces,
        Platform::LeetCode,
        Platform::CodeChef,
        Platform::AtCoder,
    ];

    /// Short prefix used in contest ids, e.g. `cf` in `cf:1999`.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Platform::Codeforces => "cf",
            Platform::LeetCode => "lc",
            Platform::CodeChef => "cc",
            Platform::AtCoder => "ac",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Platform::Codeforces => "codeforces",
            Platform::LeetCode => "leetcode",
            Platform::CodeChef => "codechef",
            Platform::AtCoder => "atcoder",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Codeforces => "Codeforces",
            Platform::LeetCode => "LeetCode",
            Platform::CodeChef => "CodeChef",
            Platform::AtCoder => "AtCoder",
        }
    }

    pub fn from_id_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id_prefix() == prefix)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform `{}`", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    /// Accepts the slug, the display name or the id prefix, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.slug() == needle || p.id_prefix() == needle)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

/// Stable contest identifier: `<platform prefix>:<platform-native id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContestId(String);

impl ContestId {
    pub fn new(platform: Platform, native_id: &str) -> Self {
        Self(format!("{}:{}", platform.id_prefix(), native_id.trim()))
    }

    /// Parses an id coming from a caller; the prefix must name a known platform.
    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, native) = raw.split_once(':')?;
        Platform::from_id_prefix(prefix)?;
        if native.trim().is_empty() {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    /// Wraps an id read back from the persisted store without validation.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn platform(&self) -> Option<Platform> {
        self.0
            .split_once(':')
            .and_then(|(prefix, _)| Platform::from_id_prefix(prefix))
    }
}

impl fmt::Display for ContestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity handed out by the auth/session provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is asking, as reported by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "lowercase")]
pub enum Identity {
    #[default]
    Anonymous,
    User(UserId),
}

impl Identity {
    pub fn user(&self) -> Option<&UserId> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }
}

impl From<Option<UserId>> for Identity {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Identity::Anonymous, Identity::User)
    }
}

/// Intermediate handoff record produced by adapters, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestDraft {
    pub platform: Platform,
    pub native_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

/// Canonical persisted contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contest {
    pub id: ContestId,
    pub name: String,
    pub platform: Platform,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Redundant with the timestamps; kept for display.
    pub duration_seconds: i64,
    pub url: String,
    /// Curated solution video. Only the curation workflow writes it.
    pub solution_link: Option<String>,
}

impl Contest {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Compares everything an upstream source is allowed to change.
    pub fn same_upstream_fields(&self, other: &Contest) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.platform == other.platform
            && self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.duration_seconds == other.duration_seconds
            && self.url == other.url
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ContestStatus {
        classify(self, now)
    }
}

/// A user's saved-contest relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: Uuid,
    pub user_id: UserId,
    pub contest_id: ContestId,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(user_id: UserId, contest_id: ContestId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Self::key(&user_id, &contest_id),
            user_id,
            contest_id,
            created_at,
        }
    }

    /// Deterministic row key; one bookmark per (user, contest).
    pub fn key(user_id: &UserId, contest_id: &ContestId) -> Uuid {
        let source = format!("bookmark:{}:{}", user_id.as_str(), contest_id.as_str());
        Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contest_ids_use_platform_prefix_and_native_id() {
        let id = ContestId::new(Platform::Codeforces, "1999");
        assert_eq!(id.as_str(), "cf:1999");
        assert_eq!(id.platform(), Some(Platform::Codeforces));
        assert_eq!(ContestId::new(Platform::LeetCode, " weekly-contest-400 ").as_str(), "lc:weekly-contest-400");
    }

    #[test]
    fn parse_rejects_unknown_prefix_and_empty_native_id() {
        assert!(ContestId::parse("cf:1").is_some());
        assert!(ContestId::parse("xx:1").is_none());
        assert!(ContestId::parse("cf:").is_none());
        assert!(ContestId::parse("cf1").is_none());
    }

    #[test]
    fn platform_parses_slugs_and_prefixes() {
        assert_eq!("CodeChef".parse::<Platform>().unwrap(), Platform::CodeChef);
        assert_eq!("lc".parse::<Platform>().unwrap(), Platform::LeetCode);
        assert!("topcoder".parse::<Platform>().is_err());
        assert_eq!(serde_json::to_string(&Platform::AtCoder).unwrap(), "\"atcoder\"");
    }

    #[test]
    fn bookmark_key_is_stable_per_user_and_contest() {
        let user = UserId::new("user-a");
        let contest = ContestId::new(Platform::Codeforces, "1");
        assert_eq!(Bookmark::key(&user, &contest), Bookmark::key(&user, &contest));
        assert_ne!(
            Bookmark::key(&user, &contest),
            Bookmark::key(&UserId::new("user-b"), &contest)
        );
    }

    #[test]
    fn identity_serializes_with_kind_tag() {
        let signed_in = Identity::from(Some(UserId::new("u1")));
        assert_eq!(signed_in.user().map(UserId::as_str), Some("u1"));
        assert_eq!(
            serde_json::to_value(&signed_in).unwrap(),
            serde_json::json!({"kind": "user", "user_id": "u1"})
        );
        assert_eq!(Identity::from(None), Identity::Anonymous);
        assert_eq!(Identity::default().user(), None);
    }
}
