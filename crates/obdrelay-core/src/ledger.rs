// ── Transmission ledger ──
//
// SQLite-backed audit trail of every sample the relay tried to publish.
// Rows start as unsent and flip to sent only after the sink confirmed
// the write. Sent rows older than the retention window are purged.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::CoreError;
use crate::model::Sample;

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRecord {
    pub id: i64,
    pub key: String,
    pub value: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub sent: bool,
}

impl LedgerRecord {
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// SQLite ledger.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE records (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     key TEXT NOT NULL,
///     value TEXT NOT NULL,
///     timestamp INTEGER NOT NULL,
///     sent INTEGER NOT NULL DEFAULT 0
/// );
/// ```
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) a ledger database file.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CoreError::Config {
                    message: format!("cannot create ledger directory {}: {e}", parent.display()),
                })?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// In-memory ledger, gone when dropped.
    pub fn open_in_memory() -> Result<Self, CoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CoreError> {
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<(), CoreError> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp);
            CREATE INDEX IF NOT EXISTS idx_records_sent ON records(sent);",
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerRecord> {
        Ok(LedgerRecord {
            id: row.get(0)?,
            key: row.get(1)?,
            value: row.get(2)?,
            timestamp: row.get(3)?,
            sent: row.get::<_, i64>(4)? != 0,
        })
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<LedgerRecord>, CoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Append an unsent record. Returns its id.
    pub fn record(&self, key: &str, value: &str, timestamp: i64) -> Result<i64, CoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO records (key, value, timestamp, sent) VALUES (?1, ?2, ?3, 0)",
            params![key, value, timestamp],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append one unsent record per sample in a single transaction.
    /// Returns the ids in input order.
    pub fn record_all(&self, samples: &[Sample], timestamp: i64) -> Result<Vec<i64>, CoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(samples.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (key, value, timestamp, sent) VALUES (?1, ?2, ?3, 0)",
            )?;
            for sample in samples {
                stmt.execute(params![sample.key, sample.value, timestamp])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn mark_sent(&self, id: i64) -> Result<(), CoreError> {
        self.lock()
            .execute("UPDATE records SET sent = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Mark several records sent in one transaction.
    pub fn mark_all_sent(&self, ids: &[i64]) -> Result<(), CoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE records SET sent = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Records not yet confirmed by the sink, oldest first.
    pub fn unsent(&self) -> Result<Vec<LedgerRecord>, CoreError> {
        self.query(
            "SELECT id, key, value, timestamp, sent FROM records
             WHERE sent = 0 ORDER BY timestamp ASC, id ASC",
            [],
        )
    }

    /// Records with `start <= timestamp <= end`, oldest first.
    pub fn by_time_range(&self, start: i64, end: i64) -> Result<Vec<LedgerRecord>, CoreError> {
        self.query(
            "SELECT id, key, value, timestamp, sent FROM records
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC, id ASC",
            params![start, end],
        )
    }

    /// Delete sent records older than `before` (ms). Returns the number removed.
    pub fn purge_sent_older_than(&self, before: i64) -> Result<usize, CoreError> {
        let removed = self.lock().execute(
            "DELETE FROM records WHERE sent = 1 AND timestamp < ?1",
            [before],
        )?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<u64, CoreError> {
        self.scalar("SELECT COUNT(*) FROM records")
    }

    pub fn unsent_count(&self) -> Result<u64, CoreError> {
        self.scalar("SELECT COUNT(*) FROM records WHERE sent = 0")
    }

    fn scalar(&self, sql: &str) -> Result<u64, CoreError> {
        let n: i64 = self.lock().query_row(sql, [], |row| row.get(0))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Delete every record.
    pub fn clear(&self) -> Result<usize, CoreError> {
        Ok(self.lock().execute("DELETE FROM records", [])?)
    }
}
