//! Local Durable Store — the crash-safe foundation everything writes through.
//!
//! A small partitioned key-value store with two backends:
//!
//! - [`SqliteStore`]: SQLite with WAL journaling. Each `put`/`delete` is a
//!   single statement, so SQLite's statement atomicity gives the crash
//!   guarantee: a process killed mid-write leaves the prior committed state
//!   intact on the next open. Schema is versioned through `PRAGMA
//!   user_version`; migrations only ever create partitions, never drop them.
//! - [`MemoryStore`]: in-memory fallback for platforms without durable
//!   storage. Callers learn they are degraded via [`Durability`] and must
//!   surface that status upward.
//!
//! Values are opaque JSON documents; the store never interprets record
//! payloads.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Current on-disk schema version. Bump when adding partitions.
const SCHEMA_VERSION: i64 = 2;

/// Named storage partitions. Fixed set so table names never come from
/// runtime strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Symptom entries captured offline, pending server acknowledgement.
    SymptomPending,
    /// Journal entries captured offline, pending server acknowledgement.
    JournalPending,
    /// Push subscription endpoint and topic set.
    PushState,
    /// Install-offer dismissal state.
    InstallState,
}

impl Partition {
    /// All partitions, in schema order.
    pub const ALL: [Self; 4] = [
        Self::SymptomPending,
        Self::JournalPending,
        Self::PushState,
        Self::InstallState,
    ];

    /// Backing table name for this partition.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::SymptomPending => "symptom_pending",
            Self::JournalPending => "journal_pending",
            Self::PushState => "push_state",
            Self::InstallState => "install_state",
        }
    }
}

/// Whether writes actually reach durable media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Backed by SQLite on disk; survives restarts.
    Durable,
    /// In-memory fallback; data is lost on process exit.
    MemoryOnly,
}

/// Storage boundary used by the capture queue, push manager, and install
/// tracker. Implementations must make each `put`/`delete` atomic.
pub trait DurableStore: Send + Sync {
    /// Insert or replace a record.
    fn put(&self, partition: Partition, id: &str, value: &Value) -> Result<()>;

    /// Fetch a single record by id.
    fn get(&self, partition: Partition, id: &str) -> Result<Option<Value>>;

    /// Fetch every record in a partition, ordered by id.
    fn get_all(&self, partition: Partition) -> Result<Vec<(String, Value)>>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, partition: Partition, id: &str) -> Result<bool>;

    /// Durability level of this backend.
    fn durability(&self) -> Durability;
}

// =============================================================================
// SQLite backend
// =============================================================================

/// SQLite-backed durable store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`, running any pending migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrate(&mut conn)?;
        info!(path = %path.display(), "opened durable store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory SQLite store (tests and ephemeral hosts).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; SQLite state is still
        // consistent, so recover the guard.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run additive schema migrations up to [`SCHEMA_VERSION`].
///
/// Migrations never drop partitions: opening an old database only creates
/// what is missing. A database written by a newer build is refused rather
/// than risk silent data loss.
fn migrate(conn: &mut Connection) -> Result<()> {
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        return Err(Error::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    if found < 1 {
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS symptom_pending (
                id   TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS journal_pending (
                id   TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );",
        )?;
    }
    if found < 2 {
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS push_state (
                id   TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS install_state (
                id   TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );",
        )?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    debug!(from = found, to = SCHEMA_VERSION, "migrated store schema");
    Ok(())
}

impl DurableStore for SqliteStore {
    fn put(&self, partition: Partition, id: &str, value: &Value) -> Result<()> {
        let body = serde_json::to_string(value)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, body) VALUES (?1, ?2)",
            partition.table()
        );
        self.lock().execute(&sql, rusqlite::params![id, body])?;
        Ok(())
    }

    fn get(&self, partition: Partition, id: &str) -> Result<Option<Value>> {
        let sql = format!("SELECT body FROM {} WHERE id = ?1", partition.table());
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params![id])?;
        match rows.next()? {
            Some(row) => {
                let body: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    fn get_all(&self, partition: Partition) -> Result<Vec<(String, Value)>> {
        let sql = format!(
            "SELECT id, body FROM {} ORDER BY id",
            partition.table()
        );
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let body: String = row.get(1)?;
            out.push((id, serde_json::from_str(&body)?));
        }
        Ok(out)
    }

    fn delete(&self, partition: Partition, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", partition.table());
        let affected = self.lock().execute(&sql, rusqlite::params![id])?;
        Ok(affected > 0)
    }

    fn durability(&self) -> Durability {
        Durability::Durable
    }
}

// =============================================================================
// In-memory fallback
// =============================================================================

/// In-memory store used when no durable backend can be opened.
#[derive(Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<Partition, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, partition: Partition, id: &str, value: &Value) -> Result<()> {
        let mut guard = self
            .partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(partition)
            .or_default()
            .insert(id.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, partition: Partition, id: &str) -> Result<Option<Value>> {
        let guard = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(&partition).and_then(|p| p.get(id)).cloned())
    }

    fn get_all(&self, partition: Partition) -> Result<Vec<(String, Value)>> {
        let guard = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get(&partition)
            .map(|p| p.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn delete(&self, partition: Partition, id: &str) -> Result<bool> {
        let mut guard = self
            .partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get_mut(&partition)
            .is_some_and(|p| p.remove(id).is_some()))
    }

    fn durability(&self) -> Durability {
        Durability::MemoryOnly
    }
}

/// Open the SQLite store at `path`, falling back to [`MemoryStore`] when the
/// platform has no usable durable storage. The returned [`Durability`] must
/// be surfaced in status so users learn their data will not survive a reload.
pub fn open_store_or_fallback(path: &Path) -> (Arc<dyn DurableStore>, Durability) {
    match SqliteStore::open(path) {
        Ok(store) => (Arc::new(store), Durability::Durable),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "durable store unavailable, falling back to memory-only operation"
            );
            (Arc::new(MemoryStore::new()), Durability::MemoryOnly)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
