//! Draft -> canonical contest. Pure and deterministic.

use contrack_core::{Contest, ContestDraft, ContestId, Platform};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("invalid contest record {platform} `{native_id}`: {reason}")]
    InvalidContestRecord {
        platform: Platform,
        native_id: String,
        reason: String,
    },
}

/// A draft dropped by the normalizer, kept for run reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub platform: Platform,
    pub native_id: String,
    pub reason: String,
}

impl From<NormalizeError> for RejectedRecord {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::InvalidContestRecord {
                platform,
                native_id,
                reason,
            } => RejectedRecord {
                platform,
                native_id,
                reason,
            },
        }
    }
}

fn invalid(draft: &ContestDraft, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidContestRecord {
        platform: draft.platform,
        native_id: draft.native_id.clone(),
        reason: reason.into(),
    }
}

/// Builds the canonical contest. `end < start` is rejected, never swapped or clamped, and
/// `solution_link` always starts out empty.
pub fn normalize(draft: &ContestDraft) -> Result<Contest, NormalizeError> {
    let native_id = draft.native_id.trim();
    if native_id.is_empty() {
        return Err(invalid(draft, "empty platform-native id"));
    }
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(invalid(draft, "empty contest name"));
    }
    if draft.end_time < draft.start_time {
        return Err(invalid(
            draft,
            format!(
                "end {} precedes start {}",
                draft.end_time.to_rfc3339(),
                draft.start_time.to_rfc3339()
            ),
        ));
    }

    Ok(Contest {
        id: ContestId::new(draft.platform, native_id),
        name: name.to_string(),
        platform: draft.platform,
        start_time: draft.start_time,
        end_time: draft.end_time,
        duration_seconds: (draft.end_time - draft.start_time).num_seconds(),
        url: draft.url.trim().to_string(),
        solution_link: None,
    })
}

/// Normalizes a batch, dropping and logging invalid records.
pub fn normalize_all(drafts: Vec<ContestDraft>) -> (Vec<Contest>, Vec<RejectedRecord>) {
    let mut contests = Vec::with_capacity(drafts.len());
    let mut rejected = Vec::new();
    for draft in &drafts {
        match normalize(draft) {
            Ok(contest) => contests.push(contest),
            Err(err) => {
                warn!(%err, "dropping contest record");
                rejected.push(err.into());
            }
        }
    }
    (contests, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 28, 15, 0, 0).single().unwrap()
    }

    fn draft(native_id: &str, name: &str, minutes: i64) -> ContestDraft {
        ContestDraft {
            platform: Platform::Codeforces,
            native_id: native_id.to_string(),
            name: name.to_string(),
            start_time: t0(),
            end_time: t0() + Duration::minutes(minutes),
            url: format!("https://codeforces.com/contest/{native_id}"),
            fetched_at: t0() - Duration::hours(3),
        }
    }

    #[test]
    fn builds_stable_id_duration_and_empty_link() {
        let contest = normalize(&draft("2100", "  Codeforces Round 1010 (Div. 1) ", 150)).unwrap();
        assert_eq!(contest.id.as_str(), "cf:2100");
        assert_eq!(contest.name, "Codeforces Round 1010 (Div. 1)");
        assert_eq!(contest.duration_seconds, 9000);
        assert_eq!(contest.duration(), Duration::minutes(150));
        assert!(contest.solution_link.is_none());
    }

    #[test]
    fn deterministic_across_refetches() {
        let first = draft("2100", "Round", 120);
        let mut refetched = first.clone();
        refetched.fetched_at = first.fetched_at + Duration::minutes(30);
        assert_eq!(normalize(&first).unwrap(), normalize(&refetched).unwrap());
        assert_eq!(normalize(&first).unwrap(), normalize(&first).unwrap());
    }

    #[test]
    fn end_before_start_is_rejected_not_clamped() {
        let err = normalize(&draft("7", "Broken", -30)).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidContestRecord { ref native_id, .. } if native_id == "7"));
    }

    #[test]
    fn zero_length_contest_is_valid() {
        assert_eq!(normalize(&draft("8", "Instant", 0)).unwrap().duration_seconds, 0);
    }

    #[test]
    fn empty_name_or_id_is_rejected() {
        assert!(normalize(&draft("9", "   ", 60)).is_err());
        assert!(normalize(&draft(" ", "Round", 60)).is_err());
    }

    #[test]
    fn normalize_all_partitions_valid_and_rejected() {
        let (contests, rejected) = normalize_all(vec![
            draft("1", "Round 1", 120),
            draft("2", "", 120),
            draft("3", "Round 3", -1),
        ]);
        assert_eq!(contests.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].native_id, "2");
        assert_eq!(rejected[1].platform, Platform::Codeforces);
    }
}
