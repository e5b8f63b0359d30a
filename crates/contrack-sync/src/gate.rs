//! Last-write-wins ordering of aggregation runs by start, not by completion.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RunGate {
    next_sequence: AtomicU64,
    last_written: Mutex<Option<RunTicket>>,
}

/// Held across a run's write so the check and the write cannot interleave with another run.
pub struct GateGuard<'a> {
    last_written: MutexGuard<'a, Option<RunTicket>>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issued when a run starts; later starts always get larger sequences.
    pub fn issue(&self, run_id: Uuid, started_at: DateTime<Utc>) -> RunTicket {
        RunTicket {
            run_id,
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            started_at,
        }
    }

    pub async fn lock(&self) -> GateGuard<'_> {
        GateGuard {
            last_written: self.last_written.lock().await,
        }
    }

    pub async fn last_written(&self) -> Option<RunTicket> {
        *self.last_written.lock().await
    }
}

impl GateGuard<'_> {
    /// True when a run that started after `ticket` has already written.
    pub fn is_superseded(&self, ticket: &RunTicket) -> bool {
        matches!(*self.last_written, Some(last) if last.sequence > ticket.sequence)
    }

    pub fn record(&mut self, ticket: RunTicket) {
        *self.last_written = Some(ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn older_run_finishing_late_is_superseded() {
        let gate = RunGate::new();
        let now = Utc::now();
        let older = gate.issue(Uuid::new_v4(), now);
        let newer = gate.issue(Uuid::new_v4(), now);

        {
            let mut guard = gate.lock().await;
            assert!(!guard.is_superseded(&newer));
            guard.record(newer);
        }

        let guard = gate.lock().await;
        assert!(guard.is_superseded(&older));
        assert!(!guard.is_superseded(&newer));
    }

    #[tokio::test]
    async fn runs_finishing_in_start_order_both_write() {
        let gate = RunGate::new();
        let now = Utc::now();
        let first = gate.issue(Uuid::new_v4(), now);
        let second = gate.issue(Uuid::new_v4(), now);

        let mut guard = gate.lock().await;
        assert!(!guard.is_superseded(&first));
        guard.record(first);
        assert!(!guard.is_superseded(&second));
        guard.record(second);
        drop(guard);

        assert_eq!(gate.last_written().await.map(|t| t.sequence), Some(second.sequence));
    }
}
