//! Capture Queue — durable staging for records written while offline.
//!
//! Each record kind has its own append-only partition. A record enters the
//! queue at capture time and leaves it exactly one way: [`CaptureQueue::ack`]
//! after the server has durably accepted it. There is no in-place payload
//! mutation; corrections are new enqueues carrying a domain-level superseding
//! payload.
//!
//! Capture never blocks on the network: `enqueue` only writes through the
//! local store and returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::store::{DurableStore, Partition};

/// Domain record kinds the sync layer transports. The payload itself stays
/// opaque; the kind only selects a partition and a server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Symptom,
    Journal,
}

impl RecordKind {
    /// All kinds, in drain order.
    pub const ALL: [Self; 2] = [Self::Symptom, Self::Journal];

    /// Storage partition backing this kind's pending queue.
    #[must_use]
    pub fn partition(self) -> Partition {
        match self {
            Self::Symptom => Partition::SymptomPending,
            Self::Journal => Partition::JournalPending,
        }
    }

    /// Path segment used by the server write API (`POST /records/{kind}`).
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Symptom => "symptom",
            Self::Journal => "journal",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "symptom" => Ok(Self::Symptom),
            "journal" => Ok(Self::Journal),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// A locally captured record awaiting server acknowledgement.
///
/// The `id` doubles as the idempotency key for replay: it is stable across
/// retries so the server can deduplicate resubmissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Unique, retry-stable identifier.
    pub id: String,
    /// Which partition and server endpoint this record targets.
    pub kind: RecordKind,
    /// Opaque domain payload; never interpreted by the sync layer.
    pub payload: Value,
    /// Wall-clock capture time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Failed replay attempts so far.
    pub attempt_count: u32,
    /// Last failure reason, cleared on success (success removes the record).
    pub last_error: Option<String>,
}

/// Generate a retry-stable record id from wall-clock time and a
/// process-monotonic counter. Collision-resistant without a UUID crate.
fn generate_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    format!("rec-{ts_ms:x}-{counter:04x}")
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Typed staging queue over the durable store.
#[derive(Clone)]
pub struct CaptureQueue {
    store: Arc<dyn DurableStore>,
}

impl CaptureQueue {
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Durably capture a domain payload. Assigns id and capture timestamp,
    /// writes through the store, and returns immediately.
    pub fn enqueue(&self, kind: RecordKind, payload: Value) -> Result<PendingRecord> {
        let record = PendingRecord {
            id: generate_id(),
            kind,
            payload,
            created_at_ms: now_ms(),
            attempt_count: 0,
            last_error: None,
        };
        self.persist(&record)?;
        debug!(kind = %kind, id = %record.id, "captured record");
        Ok(record)
    }

    /// All pending records for `kind`, oldest first (capture order).
    pub fn peek_all(&self, kind: RecordKind) -> Result<Vec<PendingRecord>> {
        let mut records: Vec<PendingRecord> = self
            .store
            .get_all(kind.partition())?
            .into_iter()
            .map(|(_, body)| serde_json::from_value(body))
            .collect::<std::result::Result<_, _>>()?;
        records.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    /// Remove a record after the server confirmed receipt. Returns whether
    /// the record was still pending; acking twice is harmless.
    pub fn ack(&self, kind: RecordKind, id: &str) -> Result<bool> {
        let existed = self.store.delete(kind.partition(), id)?;
        if existed {
            debug!(kind = %kind, id = %id, "acknowledged record");
        }
        Ok(existed)
    }

    /// Number of records awaiting replay.
    pub fn pending_count(&self, kind: RecordKind) -> Result<usize> {
        Ok(self.store.get_all(kind.partition())?.len())
    }

    /// Rewrite a record's replay bookkeeping (attempt count, last error).
    /// The payload is carried through untouched.
    pub(crate) fn persist(&self, record: &PendingRecord) -> Result<()> {
        let body = serde_json::to_value(record)?;
        self.store.put(record.kind.partition(), &record.id, &body)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn queue() -> CaptureQueue {
        CaptureQueue::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn enqueue_assigns_unique_ids_and_timestamps() {
        let queue = queue();
        let a = queue.enqueue(RecordKind::Symptom, json!({"n": 1})).unwrap();
        let b = queue.enqueue(RecordKind::Symptom, json!({"n": 2})).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.created_at_ms > 0);
        assert_eq!(a.attempt_count, 0);
        assert!(a.last_error.is_none());
    }

    #[test]
    fn peek_all_returns_capture_order() {
        let queue = queue();
        let first = queue.enqueue(RecordKind::Journal, json!({"n": 1})).unwrap();
        let second = queue.enqueue(RecordKind::Journal, json!({"n": 2})).unwrap();
        let third = queue.enqueue(RecordKind::Journal, json!({"n": 3})).unwrap();
        let pending = queue.peek_all(RecordKind::Journal).unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![&first.id, &second.id, &third.id]);
    }

    #[test]
    fn kinds_are_partitioned() {
        let queue = queue();
        queue.enqueue(RecordKind::Symptom, json!({})).unwrap();
        assert_eq!(queue.pending_count(RecordKind::Symptom).unwrap(), 1);
        assert_eq!(queue.pending_count(RecordKind::Journal).unwrap(), 0);
    }

    #[test]
    fn ack_removes_exactly_once() {
        let queue = queue();
        let record = queue.enqueue(RecordKind::Symptom, json!({})).unwrap();
        assert!(queue.ack(RecordKind::Symptom, &record.id).unwrap());
        assert!(!queue.ack(RecordKind::Symptom, &record.id).unwrap());
        assert_eq!(queue.pending_count(RecordKind::Symptom).unwrap(), 0);
    }

    #[test]
    fn persist_updates_bookkeeping_not_payload() {
        let queue = queue();
        let mut record = queue
            .enqueue(RecordKind::Journal, json!({"text": "slept well"}))
            .unwrap();
        record.attempt_count = 2;
        record.last_error = Some("HTTP 503".to_string());
        queue.persist(&record).unwrap();

        let pending = queue.peek_all(RecordKind::Journal).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt_count, 2);
        assert_eq!(pending[0].last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(pending[0].payload, json!({"text": "slept well"}));
    }

    #[test]
    fn record_kind_round_trips_from_str() {
        assert_eq!("symptom".parse::<RecordKind>().unwrap(), RecordKind::Symptom);
        assert_eq!("journal".parse::<RecordKind>().unwrap(), RecordKind::Journal);
        assert!("mood".parse::<RecordKind>().is_err());
    }
}
