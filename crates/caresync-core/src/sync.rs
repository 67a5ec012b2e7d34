//! Sync Coordinator — ordered, at-least-once replay of pending records.
//!
//! Per record kind the coordinator runs a small state machine:
//!
//! ```text
//! Idle ──trigger──► Draining ──┬─all delivered─► Idle
//!                              └─record failed─► BackingOff ──deadline──► Idle
//! ```
//!
//! All trigger sources (the platform's background-execution signal, the
//! app-foreground transition, and a manual "sync now") converge on
//! [`SyncCoordinator::drain`]. Drains for the same kind never overlap: an
//! in-memory per-partition lock serializes them, and a trigger arriving while
//! one runs is simply skipped. The lock is not persisted — after a restart
//! any assumed in-flight state is forgotten, which is safe because `ack` is
//! idempotent-by-removal.
//!
//! Within a partition, replay is strictly ordered: a failed record stops the
//! batch so later records are never reordered ahead of a stuck one. Each
//! failure bumps the record's own persisted attempt counter and schedules a
//! jittered exponential backoff deadline; a manual trigger bypasses the
//! deadline, automatic triggers respect it.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::Result;
use crate::queue::{CaptureQueue, RecordKind};
use crate::server::ServerApi;

/// What caused a drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Platform background-execution signal.
    Background,
    /// App moved to the foreground.
    Foreground,
    /// Explicit "sync now" user action; bypasses a pending backoff window.
    Manual,
}

/// Internal per-partition phase. `Draining` is only ever observed through a
/// failed `try_lock`, but is kept explicit for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainPhase {
    Idle,
    Draining,
    BackingOff { until: Instant },
}

/// Serializable view of a partition's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum SyncPhaseView {
    Idle,
    Draining,
    BackingOff { remaining_ms: u64 },
}

/// How a drain attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Every pending record was delivered and acknowledged.
    Drained,
    /// Nothing was pending.
    Empty,
    /// A record failed; the partition is backing off.
    Failed,
    /// Another drain for this kind was already running.
    SkippedInFlight,
    /// An automatic trigger arrived inside the backoff window.
    SkippedBackoff,
}

/// Result of one [`SyncCoordinator::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub kind: RecordKind,
    pub outcome: DrainOutcome,
    /// Records pending when the drain started.
    pub attempted: usize,
    /// Records delivered and acknowledged by this drain.
    pub delivered: usize,
}

impl DrainReport {
    fn skipped(kind: RecordKind, outcome: DrainOutcome) -> Self {
        Self {
            kind,
            outcome,
            attempted: 0,
            delivered: 0,
        }
    }
}

/// Read-only sync status for one kind — the UI's "pending sync" indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub kind: RecordKind,
    pub pending: usize,
    #[serde(flatten)]
    pub phase: SyncPhaseView,
    /// Last replay failure for this partition, if any.
    pub last_error: Option<String>,
}

/// Registration seam for the platform's background-execution trigger.
pub trait SyncScheduler: Send + Sync {
    /// Ask the platform to wake the coordinator when connectivity returns.
    fn register(&self, tag: &str) -> Result<()>;
}

/// Scheduler for hosts without a background-trigger capability.
pub struct NoopSyncScheduler;

impl SyncScheduler for NoopSyncScheduler {
    fn register(&self, tag: &str) -> Result<()> {
        debug!(tag = %tag, "no background trigger capability, registration skipped");
        Ok(())
    }
}

struct PartitionState {
    phase: DrainPhase,
    last_error: Option<String>,
}

impl PartitionState {
    fn new() -> Self {
        Self {
            phase: DrainPhase::Idle,
            last_error: None,
        }
    }
}

/// Drives eventual replay of pending records, one partition at a time.
pub struct SyncCoordinator<S> {
    queue: CaptureQueue,
    server: Arc<S>,
    policy: BackoffPolicy,
    symptom: Mutex<PartitionState>,
    journal: Mutex<PartitionState>,
}

impl<S: ServerApi> SyncCoordinator<S> {
    pub fn new(queue: CaptureQueue, server: Arc<S>, policy: BackoffPolicy) -> Self {
        Self {
            queue,
            server,
            policy,
            symptom: Mutex::new(PartitionState::new()),
            journal: Mutex::new(PartitionState::new()),
        }
    }

    fn partition(&self, kind: RecordKind) -> &Mutex<PartitionState> {
        match kind {
            RecordKind::Symptom => &self.symptom,
            RecordKind::Journal => &self.journal,
        }
    }

    /// Replay all pending records of `kind`, in capture order, stopping at
    /// the first failure. Concurrent calls for the same kind do not overlap.
    pub async fn drain(&self, kind: RecordKind, trigger: SyncTrigger) -> DrainReport {
        let Ok(mut state) = self.partition(kind).try_lock() else {
            debug!(kind = %kind, ?trigger, "drain already in flight, skipping");
            return DrainReport::skipped(kind, DrainOutcome::SkippedInFlight);
        };

        if let DrainPhase::BackingOff { until } = state.phase {
            if trigger != SyncTrigger::Manual && Instant::now() < until {
                debug!(kind = %kind, ?trigger, "inside backoff window, skipping");
                return DrainReport::skipped(kind, DrainOutcome::SkippedBackoff);
            }
        }
        state.phase = DrainPhase::Draining;

        let records = match self.queue.peek_all(kind) {
            Ok(records) => records,
            Err(err) => {
                warn!(kind = %kind, error = %err, "cannot read pending records");
                state.phase = DrainPhase::Idle;
                state.last_error = Some(err.to_string());
                return DrainReport::skipped(kind, DrainOutcome::Failed);
            }
        };
        if records.is_empty() {
            state.phase = DrainPhase::Idle;
            return DrainReport::skipped(kind, DrainOutcome::Empty);
        }

        let attempted = records.len();
        let mut delivered = 0usize;
        for mut record in records {
            match self
                .server
                .put_record(kind, &record.id, &record.payload)
                .await
            {
                Ok(()) => {
                    if let Err(err) = self.queue.ack(kind, &record.id) {
                        // Delivered but not removed; the id is the
                        // idempotency key, so a re-send is harmless.
                        warn!(kind = %kind, id = %record.id, error = %err,
                              "ack failed after delivery, stopping drain");
                        state.phase = DrainPhase::Idle;
                        state.last_error = Some(err.to_string());
                        return DrainReport {
                            kind,
                            outcome: DrainOutcome::Failed,
                            attempted,
                            delivered,
                        };
                    }
                    delivered += 1;
                }
                Err(err) => {
                    record.attempt_count += 1;
                    record.last_error = Some(err.to_string());
                    if let Err(persist_err) = self.queue.persist(&record) {
                        warn!(kind = %kind, id = %record.id, error = %persist_err,
                              "failed to persist replay bookkeeping");
                    }
                    let delay = self.policy.delay_for_attempt(record.attempt_count);
                    state.phase = DrainPhase::BackingOff {
                        until: Instant::now() + delay,
                    };
                    state.last_error = Some(err.to_string());
                    warn!(
                        kind = %kind,
                        id = %record.id,
                        attempts = record.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "record replay failed, backing off"
                    );
                    return DrainReport {
                        kind,
                        outcome: DrainOutcome::Failed,
                        attempted,
                        delivered,
                    };
                }
            }
        }

        state.phase = DrainPhase::Idle;
        state.last_error = None;
        info!(kind = %kind, delivered, "drain complete");
        DrainReport {
            kind,
            outcome: DrainOutcome::Drained,
            attempted,
            delivered,
        }
    }

    /// Drain every kind, in declaration order.
    pub async fn drain_all(&self, trigger: SyncTrigger) -> Vec<DrainReport> {
        let mut reports = Vec::with_capacity(RecordKind::ALL.len());
        for kind in RecordKind::ALL {
            reports.push(self.drain(kind, trigger).await);
        }
        reports
    }

    /// Status snapshot for one kind.
    pub fn status(&self, kind: RecordKind) -> Result<SyncStatus> {
        let pending = self.queue.pending_count(kind)?;
        let (phase, last_error) = match self.partition(kind).try_lock() {
            Ok(state) => {
                let view = match state.phase {
                    DrainPhase::Idle | DrainPhase::Draining => SyncPhaseView::Idle,
                    DrainPhase::BackingOff { until } => SyncPhaseView::BackingOff {
                        remaining_ms: until
                            .saturating_duration_since(Instant::now())
                            .as_millis() as u64,
                    },
                };
                (view, state.last_error.clone())
            }
            Err(_) => (SyncPhaseView::Draining, None),
        };
        Ok(SyncStatus {
            kind,
            pending,
            phase,
            last_error,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::push::PushEndpoint;
    use crate::store::MemoryStore;
    use serde_json::{Value, json};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Server fake that fails a scripted set of ids exactly once each.
    #[derive(Default)]
    struct ScriptedServer {
        accepted: StdMutex<Vec<String>>,
        fail_once: StdMutex<HashSet<String>>,
        fail_all: std::sync::atomic::AtomicBool,
    }

    impl ScriptedServer {
        fn fail_once(&self, id: &str) {
            self.fail_once.lock().unwrap().insert(id.to_string());
        }

        fn accepted_ids(&self) -> Vec<String> {
            self.accepted.lock().unwrap().clone()
        }
    }

    impl ServerApi for &ScriptedServer {
        async fn put_record(&self, _kind: RecordKind, id: &str, _payload: &Value) -> Result<()> {
            if self.fail_all.load(std::sync::atomic::Ordering::SeqCst)
                || self.fail_once.lock().unwrap().remove(id)
            {
                return Err(Error::ServerStatus {
                    endpoint: "/records".to_string(),
                    status: 503,
                });
            }
            self.accepted.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn push_public_key(&self) -> Result<String> {
            unreachable!("not used by drain tests")
        }

        async fn subscribe(&self, _subscription: &PushEndpoint, _topic: &str) -> Result<()> {
            unreachable!("not used by drain tests")
        }
    }

    fn coordinator(server: &ScriptedServer) -> (SyncCoordinator<&ScriptedServer>, CaptureQueue) {
        let queue = CaptureQueue::new(std::sync::Arc::new(MemoryStore::new()));
        let coordinator = SyncCoordinator::new(
            queue.clone(),
            Arc::new(server),
            BackoffPolicy::default().without_jitter(),
        );
        (coordinator, queue)
    }

    #[tokio::test]
    async fn drain_delivers_in_capture_order() {
        let server = ScriptedServer::default();
        let (coordinator, queue) = coordinator(&server);
        let a = queue.enqueue(RecordKind::Journal, json!({"n": 1})).unwrap();
        let b = queue.enqueue(RecordKind::Journal, json!({"n": 2})).unwrap();

        let report = coordinator.drain(RecordKind::Journal, SyncTrigger::Manual).await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(report.delivered, 2);
        assert_eq!(server.accepted_ids(), vec![a.id, b.id]);
        assert_eq!(queue.pending_count(RecordKind::Journal).unwrap(), 0);
    }

    #[tokio::test]
    async fn failure_stops_the_batch_and_preserves_order() {
        let server = ScriptedServer::default();
        let (coordinator, queue) = coordinator(&server);
        let s1 = queue.enqueue(RecordKind::Symptom, json!({"n": 1})).unwrap();
        let s2 = queue.enqueue(RecordKind::Symptom, json!({"n": 2})).unwrap();
        let s3 = queue.enqueue(RecordKind::Symptom, json!({"n": 3})).unwrap();
        server.fail_once(&s2.id);

        let report = coordinator.drain(RecordKind::Symptom, SyncTrigger::Manual).await;
        assert_eq!(report.outcome, DrainOutcome::Failed);
        assert_eq!(report.delivered, 1);
        // s3 was not submitted ahead of the stuck s2.
        assert_eq!(server.accepted_ids(), vec![s1.id.clone()]);

        let pending = queue.peek_all(RecordKind::Symptom).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, s2.id);
        assert_eq!(pending[0].attempt_count, 1);
        assert!(pending[0].last_error.is_some());
        assert_eq!(pending[1].attempt_count, 0);

        // Manual retry bypasses backoff; s2 then s3 go through.
        let report = coordinator.drain(RecordKind::Symptom, SyncTrigger::Manual).await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(server.accepted_ids(), vec![s1.id, s2.id, s3.id]);
        assert_eq!(queue.pending_count(RecordKind::Symptom).unwrap(), 0);
    }

    #[tokio::test]
    async fn automatic_triggers_respect_the_backoff_window() {
        let server = ScriptedServer::default();
        let (coordinator, queue) = coordinator(&server);
        let record = queue.enqueue(RecordKind::Symptom, json!({})).unwrap();
        server.fail_once(&record.id);

        let report = coordinator.drain(RecordKind::Symptom, SyncTrigger::Background).await;
        assert_eq!(report.outcome, DrainOutcome::Failed);

        // Default policy waits 2s after one failure; this trigger is inside.
        let report = coordinator.drain(RecordKind::Symptom, SyncTrigger::Background).await;
        assert_eq!(report.outcome, DrainOutcome::SkippedBackoff);

        // A manual sync-now goes through regardless.
        let report = coordinator.drain(RecordKind::Symptom, SyncTrigger::Manual).await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn empty_partition_reports_empty() {
        let server = ScriptedServer::default();
        let (coordinator, _queue) = coordinator(&server);
        let report = coordinator.drain(RecordKind::Journal, SyncTrigger::Foreground).await;
        assert_eq!(report.outcome, DrainOutcome::Empty);
    }

    #[tokio::test]
    async fn status_reports_backoff_and_last_error() {
        let server = ScriptedServer::default();
        let (coordinator, queue) = coordinator(&server);
        let record = queue.enqueue(RecordKind::Journal, json!({})).unwrap();
        server.fail_once(&record.id);
        coordinator.drain(RecordKind::Journal, SyncTrigger::Manual).await;

        let status = coordinator.status(RecordKind::Journal).unwrap();
        assert_eq!(status.pending, 1);
        assert!(matches!(status.phase, SyncPhaseView::BackingOff { .. }));
        assert!(status.last_error.as_deref().unwrap().contains("503"));

        coordinator.drain(RecordKind::Journal, SyncTrigger::Manual).await;
        let status = coordinator.status(RecordKind::Journal).unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.phase, SyncPhaseView::Idle);
        assert!(status.last_error.is_none());
    }

    /// A slow server keeps the first drain in flight; a concurrent trigger
    /// for the same kind must be skipped, never run in parallel.
    #[tokio::test]
    async fn concurrent_drains_do_not_overlap() {
        struct SlowServer;

        impl ServerApi for SlowServer {
            async fn put_record(&self, _kind: RecordKind, _id: &str, _payload: &Value) -> Result<()> {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }

            async fn push_public_key(&self) -> Result<String> {
                unreachable!()
            }

            async fn subscribe(&self, _subscription: &PushEndpoint, _topic: &str) -> Result<()> {
                unreachable!()
            }
        }

        let queue = CaptureQueue::new(std::sync::Arc::new(MemoryStore::new()));
        let coordinator = SyncCoordinator::new(
            queue.clone(),
            Arc::new(SlowServer),
            BackoffPolicy::default().without_jitter(),
        );
        queue.enqueue(RecordKind::Symptom, json!({})).unwrap();

        let (first, second) = tokio::join!(
            coordinator.drain(RecordKind::Symptom, SyncTrigger::Manual),
            coordinator.drain(RecordKind::Symptom, SyncTrigger::Manual),
        );
        let outcomes = [first.outcome, second.outcome];
        assert!(outcomes.contains(&DrainOutcome::Drained));
        assert!(outcomes.contains(&DrainOutcome::SkippedInFlight));
        assert_eq!(first.delivered + second.delivered, 1);
    }
}
