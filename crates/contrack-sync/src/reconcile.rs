//! Additive, idempotent merge of a normalized batch into the persisted contest set.

use std::collections::{BTreeMap, HashMap};

use contrack_core::{Contest, ContestId};
use contrack_storage::{ContestReader, ContestWriter, StoreError, UpsertCounts};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertPlan {
    pub inserts: Vec<Contest>,
    pub updates: Vec<Contest>,
    pub unchanged: usize,
    /// Persisted rows the batch did not mention. They are left alone.
    pub retained: usize,
    pub duplicates_in_batch: usize,
}

impl UpsertPlan {
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }

    pub fn writes(&self) -> Vec<Contest> {
        self.inserts.iter().chain(&self.updates).cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub planned_inserts: usize,
    pub planned_updates: usize,
    pub unchanged: usize,
    pub retained: usize,
    pub duplicates_in_batch: usize,
    pub applied_inserts: usize,
    pub applied_updates: usize,
}

/// Computes the upsert set for `batch` against the `persisted` snapshot.
///
/// Matching ids are updated for every upstream field; a persisted non-null `solution_link`
/// is carried over. Ids repeated inside the batch collapse to the last occurrence.
pub fn plan_upserts(batch: Vec<Contest>, persisted: &[Contest]) -> UpsertPlan {
    let mut plan = UpsertPlan::default();

    let mut incoming: BTreeMap<ContestId, Contest> = BTreeMap::new();
    for contest in batch {
        if let Some(previous) = incoming.insert(contest.id.clone(), contest) {
            debug!(id = %previous.id, "duplicate id within batch; keeping the later record");
            plan.duplicates_in_batch += 1;
        }
    }

    let existing: HashMap<&ContestId, &Contest> = persisted.iter().map(|c| (&c.id, c)).collect();
    plan.retained = persisted
        .iter()
        .filter(|c| !incoming.contains_key(&c.id))
        .count();

    for (id, mut contest) in incoming {
        match existing.get(&id) {
            None => plan.inserts.push(contest),
            Some(current) => {
                if current.solution_link.is_some() {
                    contest.solution_link = current.solution_link.clone();
                }
                if contest == **current {
                    plan.unchanged += 1;
                } else {
                    plan.updates.push(contest);
                }
            }
        }
    }

    plan
}

pub async fn apply_plan(
    store: &dyn ContestWriter,
    plan: &UpsertPlan,
) -> Result<UpsertCounts, StoreError> {
    if plan.is_noop() {
        return Ok(UpsertCounts::default());
    }
    store.upsert_contests(&plan.writes()).await
}

/// Reads the persisted snapshot, plans and applies. Any store failure abandons the cycle.
pub async fn reconcile(
    store: &dyn ContestWriter,
    batch: Vec<Contest>,
) -> Result<ReconcileSummary, StoreError> {
    let persisted = store.all_contests().await?;
    let plan = plan_upserts(batch, &persisted);
    let applied = apply_plan(store, &plan).await?;
    if applied.inserted != plan.inserts.len() || applied.updated != plan.updates.len() {
        // Another writer raced this one between read and write.
        warn!(?applied, planned_inserts = plan.inserts.len(), planned_updates = plan.updates.len(), "store applied a different upsert count than planned");
    }
    Ok(ReconcileSummary {
        planned_inserts: plan.inserts.len(),
        planned_updates: plan.updates.len(),
        unchanged: plan.unchanged,
        retained: plan.retained,
        duplicates_in_batch: plan.duplicates_in_batch,
        applied_inserts: applied.inserted,
        applied_updates: applied.updated,
    })
}
