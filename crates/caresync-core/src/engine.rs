//! `SyncEngine` — the facade UI collaborators talk to.
//!
//! Wires the durable store, capture queue, sync coordinator, push manager,
//! and install tracker together, and exposes the narrow surface the rest of
//! the application is allowed to touch: capture, sync triggers, permission
//! and topic subscription, install-offer actions, and read-only status.
//!
//! The engine is restartable: all durable state lives in the store, and a
//! freshly constructed engine over the same store picks up exactly where the
//! previous process stopped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::CaresyncConfig;
use crate::error::Result;
use crate::install::{InstallPlatform, InstallTracker};
use crate::push::{Permission, PushManager, PushPlatform};
use crate::queue::{CaptureQueue, PendingRecord, RecordKind};
use crate::server::ServerApi;
use crate::store::{Durability, DurableStore, open_store_or_fallback};
use crate::sync::{DrainReport, SyncCoordinator, SyncScheduler, SyncStatus, SyncTrigger};

/// Tag passed to the platform's background-trigger registration.
const SYNC_TAG: &str = "caresync-replay";

/// Aggregate engine status for UI indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Degraded-durability flag: `MemoryOnly` means captures will not
    /// survive a reload.
    pub durability: Durability,
    /// Whether install-offer UI should be shown.
    pub installable: bool,
    /// True when any partition's last drain ended in failure.
    pub last_sync_failed: bool,
    pub partitions: Vec<SyncStatus>,
}

/// Offline-first sync and engagement engine.
pub struct SyncEngine<S, P, I> {
    durability: Durability,
    queue: CaptureQueue,
    coordinator: SyncCoordinator<S>,
    push: PushManager<S, P>,
    install: InstallTracker<I>,
}

impl<S: ServerApi, P: PushPlatform, I: InstallPlatform> SyncEngine<S, P, I> {
    /// Assemble an engine over an already-opened store.
    pub fn new(
        store: Arc<dyn DurableStore>,
        durability: Durability,
        server: Arc<S>,
        push_platform: P,
        install_platform: I,
        policy: BackoffPolicy,
        scheduler: &dyn SyncScheduler,
    ) -> Result<Self> {
        let queue = CaptureQueue::new(Arc::clone(&store));
        let coordinator = SyncCoordinator::new(queue.clone(), Arc::clone(&server), policy);
        let push = PushManager::new(Arc::clone(&store), server, push_platform);
        let install = InstallTracker::new(store, install_platform)?;

        // Best-effort: a host without the capability still gets a working
        // engine driven by foreground and manual triggers.
        if let Err(err) = scheduler.register(SYNC_TAG) {
            warn!(error = %err, "background trigger registration failed");
        }

        info!(?durability, "sync engine ready");
        Ok(Self {
            durability,
            queue,
            coordinator,
            push,
            install,
        })
    }

    /// Open the configured store (falling back to memory when the platform
    /// has no durable storage) and assemble an engine.
    pub fn open(
        config: &CaresyncConfig,
        server: Arc<S>,
        push_platform: P,
        install_platform: I,
        scheduler: &dyn SyncScheduler,
    ) -> Result<Self> {
        let (store, durability) = open_store_or_fallback(&config.db_path());
        Self::new(
            store,
            durability,
            server,
            push_platform,
            install_platform,
            config.backoff.policy(),
            scheduler,
        )
    }

    // -- Capture ---------------------------------------------------------------

    /// Durably capture a domain payload for deferred replay.
    pub fn enqueue(&self, kind: RecordKind, payload: Value) -> Result<PendingRecord> {
        self.queue.enqueue(kind, payload)
    }

    /// Records of `kind` awaiting replay.
    pub fn pending_count(&self, kind: RecordKind) -> Result<usize> {
        self.queue.pending_count(kind)
    }

    // -- Sync ------------------------------------------------------------------

    /// Explicit user-initiated drain of one kind; bypasses backoff.
    pub async fn sync_now(&self, kind: RecordKind) -> DrainReport {
        self.coordinator.drain(kind, SyncTrigger::Manual).await
    }

    /// Drain every kind for the given trigger source.
    pub async fn drain_all(&self, trigger: SyncTrigger) -> Vec<DrainReport> {
        self.coordinator.drain_all(trigger).await
    }

    // -- Push ------------------------------------------------------------------

    /// Negotiate notification permission (never re-prompts after a denial).
    pub fn ensure_permission(&self) -> Permission {
        self.push.ensure_permission()
    }

    /// Subscribe this device to a notification topic; idempotent.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.push.subscribe(topic).await
    }

    // -- Install offer ---------------------------------------------------------

    /// The install-offer tracker, for hosts that receive platform offer
    /// events and for UI that triggers or dismisses the offer.
    pub fn install(&self) -> &InstallTracker<I> {
        &self.install
    }

    /// Whether install-offer UI should be shown.
    pub fn is_installable(&self) -> bool {
        self.install.is_installable()
    }

    // -- Status ----------------------------------------------------------------

    /// Aggregate read-only status across all subsystems.
    pub fn status(&self) -> Result<EngineStatus> {
        let mut partitions = Vec::with_capacity(RecordKind::ALL.len());
        for kind in RecordKind::ALL {
            partitions.push(self.coordinator.status(kind)?);
        }
        let last_sync_failed = partitions.iter().any(|status| status.last_error.is_some());
        Ok(EngineStatus {
            durability: self.durability,
            installable: self.install.is_installable(),
            last_sync_failed,
            partitions,
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
    use crate::install::{InstallChoice, OfferToken};
    use crate::push::{PushEndpoint, UnsupportedPushPlatform};
    use crate::store::MemoryStore;
    use crate::sync::{DrainOutcome, NoopSyncScheduler};
    use serde_json::json;

    struct OkServer;

    impl ServerApi for OkServer {
        async fn put_record(&self, _kind: RecordKind, _id: &str, _payload: &Value) -> Result<()> {
            Ok(())
        }

        async fn push_public_key(&self) -> Result<String> {
            Ok("BKey".to_string())
        }

        async fn subscribe(&self, _subscription: &PushEndpoint, _topic: &str) -> Result<()> {
            Ok(())
        }
    }

    struct NeverPrompt;

    impl InstallPlatform for NeverPrompt {
        fn prompt(&self, _token: OfferToken) -> Result<InstallChoice> {
            Err(Error::Unsupported {
                capability: "install prompt",
            })
        }
    }

    fn engine() -> SyncEngine<OkServer, UnsupportedPushPlatform, NeverPrompt> {
        SyncEngine::new(
            Arc::new(MemoryStore::new()),
            Durability::MemoryOnly,
            Arc::new(OkServer),
            UnsupportedPushPlatform,
            NeverPrompt,
            BackoffPolicy::default().without_jitter(),
            &NoopSyncScheduler,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn capture_then_sync_now_clears_the_queue() {
        let engine = engine();
        engine
            .enqueue(RecordKind::Symptom, json!({"severity": 4}))
            .unwrap();
        assert_eq!(engine.pending_count(RecordKind::Symptom).unwrap(), 1);

        let report = engine.sync_now(RecordKind::Symptom).await;
        assert_eq!(report.outcome, DrainOutcome::Drained);
        assert_eq!(engine.pending_count(RecordKind::Symptom).unwrap(), 0);
    }

    #[tokio::test]
    async fn status_aggregates_subsystems() {
        let engine = engine();
        engine.enqueue(RecordKind::Journal, json!({})).unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.durability, Durability::MemoryOnly);
        assert!(!status.installable);
        assert!(!status.last_sync_failed);
        assert_eq!(status.partitions.len(), 2);
        let journal = status
            .partitions
            .iter()
            .find(|p| p.kind == RecordKind::Journal)
            .unwrap();
        assert_eq!(journal.pending, 1);
    }

    #[test]
    fn push_without_capability_reports_unsupported() {
        let engine = engine();
        assert_eq!(engine.ensure_permission(), Permission::Unsupported);
    }
}
