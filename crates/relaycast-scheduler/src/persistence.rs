//! SQLite-backed persistence for checkpoints, the response guard, broadcast
//! timestamps and engaged accounts. Survives restarts.

use async_trait::async_trait;
use chrono::Utc;
use relaycast_core::error::{RelayError, Result};
use relaycast_core::traits::{CheckpointStore, EngagementCheck, LastSentStore, ResponseGuard};
use relaycast_core::types::Checkpoint;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite store for all durable Relaycast state.
///
/// The connection lock is held for a single statement at a time, so writes
/// for different recipients never wait on each other's runs.
pub struct StateDb {
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> RelayError + '_ {
    move |e| RelayError::Persistence(format!("{context}: {e}"))
}

impl StateDb {
    /// Open or create the state database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RelayError::Persistence(format!("DB lock poisoned: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            PRAGMA journal_mode = WAL;

            -- In-flight sequences: one row per recipient
            CREATE TABLE IF NOT EXISTS sequence_progress (
                recipient_id TEXT PRIMARY KEY,
                sequence TEXT,
                step_index INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Recipients already routed into a sequence once (append-only)
            CREATE TABLE IF NOT EXISTS responded_recipients (
                recipient_id TEXT PRIMARY KEY,
                responded_at TEXT NOT NULL
            );

            -- Last successful broadcast per group
            CREATE TABLE IF NOT EXISTS broadcast_last_sent (
                group_id TEXT PRIMARY KEY,
                last_sent_ms INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Accounts engaged through another channel (active customers)
            CREATE TABLE IF NOT EXISTS engaged_accounts (
                recipient_id TEXT PRIMARY KEY,
                reason TEXT NOT NULL DEFAULT 'active account',
                is_active INTEGER NOT NULL DEFAULT 1
            );
         ",
            )
            .map_err(db_err("Migration"))?;
        Ok(())
    }

    // ─── Operator helpers ──────────────────────────────────────

    /// Remove a recipient from the response guard. Operator action only.
    pub fn forget_responded(&self, recipient_id: &str) -> Result<bool> {
        let n = self
            .conn()?
            .execute(
                "DELETE FROM responded_recipients WHERE recipient_id = ?1",
                [recipient_id],
            )
            .map_err(db_err("Forget responded"))?;
        Ok(n > 0)
    }

    /// Flag (or unflag) a recipient as engaged elsewhere.
    pub fn set_engaged(&self, recipient_id: &str, reason: &str, active: bool) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO engaged_accounts (recipient_id, reason, is_active)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![recipient_id, reason, active as i32],
            )
            .map_err(db_err("Set engaged"))?;
        Ok(())
    }

    /// All last-sent timestamps, for status output.
    pub fn all_last_sent(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT group_id, last_sent_ms FROM broadcast_last_sent ORDER BY group_id")
            .map_err(db_err("Load last sent"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(db_err("Load last sent"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Load last sent"))
    }

    fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
        let step_index: i64 = row.get(2)?;
        Ok(Checkpoint {
            recipient_id: row.get(0)?,
            sequence: row.get(1)?,
            step_index: step_index.max(0) as usize,
        })
    }
}

#[async_trait]
impl CheckpointStore for StateDb {
    async fn load(&self) -> Result<Vec<Checkpoint>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT recipient_id, sequence, step_index FROM sequence_progress ORDER BY updated_at",
            )
            .map_err(db_err("Load checkpoints"))?;
        let rows = stmt
            .query_map([], Self::row_to_checkpoint)
            .map_err(db_err("Load checkpoints"))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Load checkpoints"))
    }

    async fn get(&self, recipient_id: &str) -> Result<Option<Checkpoint>> {
        self.conn()?
            .query_row(
                "SELECT recipient_id, sequence, step_index FROM sequence_progress WHERE recipient_id = ?1",
                [recipient_id],
                Self::row_to_checkpoint,
            )
            .optional()
            .map_err(db_err("Get checkpoint"))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO sequence_progress (recipient_id, sequence, step_index, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    checkpoint.recipient_id,
                    checkpoint.sequence,
                    checkpoint.step_index as i64,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err("Save checkpoint"))?;
        Ok(())
    }

    async fn clear(&self, recipient_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "DELETE FROM sequence_progress WHERE recipient_id = ?1",
                [recipient_id],
            )
            .map_err(db_err("Clear checkpoint"))?;
        Ok(())
    }
}

#[async_trait]
impl ResponseGuard for StateDb {
    async fn is_responded(&self, recipient_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM responded_recipients WHERE recipient_id = ?1",
                [recipient_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Check responded"))?;
        Ok(found.is_some())
    }

    async fn mark_responded(&self, recipient_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR IGNORE INTO responded_recipients (recipient_id, responded_at) VALUES (?1, ?2)",
                rusqlite::params![recipient_id, Utc::now().to_rfc3339()],
            )
            .map_err(db_err("Mark responded"))?;
        Ok(())
    }
}

#[async_trait]
impl LastSentStore for StateDb {
    async fn last_sent_ms(&self, group_id: &str) -> Result<Option<i64>> {
        self.conn()?
            .query_row(
                "SELECT last_sent_ms FROM broadcast_last_sent WHERE group_id = ?1",
                [group_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Get last sent"))
    }

    async fn record_sent(&self, group_id: &str, at_ms: i64) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO broadcast_last_sent (group_id, last_sent_ms, updated_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![group_id, at_ms, Utc::now().to_rfc3339()],
            )
            .map_err(db_err("Record sent"))?;
        Ok(())
    }
}

#[async_trait]
impl EngagementCheck for StateDb {
    async fn engaged_reason(&self, recipient_id: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT reason FROM engaged_accounts WHERE recipient_id = ?1 AND is_active = 1",
                [recipient_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Check engaged"))
    }
}
