//! caresync-core: offline-first sync and engagement layer for CareSync.
//!
//! CareSync is a patient-facing health application. This crate is the one
//! part of it with infrastructure shape: everything a device needs to keep
//! capturing data while offline and reconcile with the server later.
//!
//! # Architecture
//!
//! ```text
//! UI collaborators ──► SyncEngine
//!                        ├── CaptureQueue ──► DurableStore (SQLite / memory)
//!                        ├── SyncCoordinator ──► ServerApi (replay + backoff)
//!                        ├── PushManager ──► PushPlatform + ServerApi
//!                        └── InstallTracker ──► InstallPlatform
//! ```
//!
//! # Modules
//!
//! - `store`: crash-safe partitioned key-value store with versioned schema
//! - `queue`: durable capture queue for offline domain records
//! - `sync`: ordered at-least-once replay with per-kind serialization
//! - `backoff`: jittered exponential retry policy
//! - `push`: notification permission and per-topic subscription lifecycle
//! - `install`: one-shot install-offer state machine
//! - `server`: the consumed server API (records, push key, subscribe)
//! - `engine`: facade wiring the subsystems for UI collaborators
//! - `config`: TOML configuration
//! - `error`: error taxonomy with stable classes
//! - `logging`: tracing subscriber setup
//!
//! Platform capabilities (durable storage, permission prompts, push
//! subscription creation, install offers, background triggers) sit behind
//! traits injected at construction, so hosts and tests substitute their own
//! without touching component logic.
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod install;
pub mod logging;
pub mod push;
pub mod queue;
pub mod server;
pub mod store;
pub mod sync;

pub use backoff::BackoffPolicy;
pub use config::CaresyncConfig;
pub use engine::{EngineStatus, SyncEngine};
pub use error::{Error, ErrorClass, Result};
pub use install::{InstallChoice, InstallPlatform, InstallTracker, OfferPhase, OfferToken};
pub use push::{Permission, PushEndpoint, PushManager, PushPlatform, PushSubscriptionState};
pub use queue::{CaptureQueue, PendingRecord, RecordKind};
pub use server::{HttpServerApi, ServerApi};
pub use store::{Durability, DurableStore, MemoryStore, Partition, SqliteStore};
pub use sync::{
    DrainOutcome, DrainReport, NoopSyncScheduler, SyncCoordinator, SyncScheduler, SyncStatus,
    SyncTrigger,
};
