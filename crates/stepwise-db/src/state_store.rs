use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, TransactionBehavior, params};
use stepwise_common::{ExecutionRecord, Result, StateStore, StoreError};
use tracing::{debug, info, warn};

use crate::database::Database;

/// Unique index that turns `migration_lock` into a mutual-exclusion primitive.
pub const LOCK_INDEX_NAME: &str = "migration_lock_num_unique";

/// Execution records and lock records kept in the target SQLite database.
///
/// `migrations` holds one row per applied migration. `migration_lock` holds
/// the same numbers under a unique index, so two processes racing to record
/// the same number cannot both succeed.
pub struct SqliteStateStore {
    db: Database,
}

impl SqliteStateStore {
    pub fn new(db: Database) -> Result<Self> {
        let store = Self { db };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Database::in_memory()?)
    }

    /// The target handle sharing this store's connection.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn run_migrations(&self) -> Result<()> {
        self.db.execute_batch(
            "CREATE TABLE IF NOT EXISTS migrations (
                num INTEGER NOT NULL,
                name TEXT NOT NULL,
                executed TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_migrations_num ON migrations(num);

            CREATE TABLE IF NOT EXISTS migration_lock (
                num INTEGER NOT NULL,
                name TEXT,
                locked_at TEXT NOT NULL
            );",
        )
    }

    /// All execution records, lowest number first.
    pub fn records(&self) -> Result<Vec<ExecutionRecord>> {
        self.db.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT num, name, executed FROM migrations ORDER BY num ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(ExecutionRecord {
                    num: row.get::<_, i64>(0)? as u64,
                    name: row.get(1)?,
                    executed: parse_datetime(row.get::<_, String>(2)?),
                })
            })?;
            rows.collect()
        })
    }

    /// Numbers currently held in the lock table.
    pub fn locked_numbers(&self) -> Result<BTreeSet<u64>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT num FROM migration_lock")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            rows.map(|r| r.map(|n| n as u64)).collect()
        })
    }

    pub fn lock_index_exists(&self) -> Result<bool> {
        self.db.with_connection(index_exists)
    }

    fn connection(
        &self,
    ) -> std::result::Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.db
            .connection()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn find_highest_applied_number(&self) -> std::result::Result<Option<u64>, StoreError> {
        let conn = self.connection()?;
        let highest: Option<i64> = conn
            .query_row("SELECT MAX(num) FROM migrations", [], |row| row.get(0))
            .map_err(|e| StoreError::Storage(format!("failed to query migrations: {e}")))?;
        Ok(highest.map(|n| n as u64))
    }

    async fn list_applied_numbers(&self) -> std::result::Result<BTreeSet<u64>, StoreError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT num FROM migrations")
            .map_err(|e| StoreError::Storage(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| StoreError::Storage(format!("failed to query migrations: {e}")))?;

        let mut applied = BTreeSet::new();
        for row in rows {
            let num = row
                .map_err(|e| StoreError::Storage(format!("failed to read migration row: {e}")))?;
            applied.insert(num as u64);
        }
        Ok(applied)
    }

    async fn insert_execution_record(
        &self,
        record: &ExecutionRecord,
    ) -> std::result::Result<(), StoreError> {
        let num = sql_num(record.num)?;
        let executed = record.executed.to_rfc3339();

        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::Storage(format!("failed to begin transaction: {e}")))?;

        // The lock row goes first: if another run owns this number nothing else is written.
        if let Err(e) = tx.execute(
            "INSERT INTO migration_lock (num, name, locked_at) VALUES (?1, ?2, ?3)",
            params![num, record.name, executed],
        ) {
            if is_unique_violation(&e) {
                return Err(StoreError::UniqueViolation(record.num));
            }
            return Err(StoreError::Storage(format!("failed to insert lock record: {e}")));
        }

        tx.execute(
            "INSERT INTO migrations (num, name, executed) VALUES (?1, ?2, ?3)",
            params![num, record.name, executed],
        )
        .map_err(|e| StoreError::Storage(format!("failed to insert execution record: {e}")))?;

        tx.commit()
            .map_err(|e| StoreError::Storage(format!("failed to commit execution record: {e}")))?;

        debug!("recorded migration {} ({})", record.num, record.name);
        Ok(())
    }

    async fn delete_execution_record(&self, num: u64) -> std::result::Result<(), StoreError> {
        let sql_num = sql_num(num)?;

        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::Storage(format!("failed to begin transaction: {e}")))?;

        let removed = tx
            .execute("DELETE FROM migrations WHERE num = ?1", params![sql_num])
            .map_err(|e| StoreError::Storage(format!("failed to remove execution record: {e}")))?;
        tx.execute("DELETE FROM migration_lock WHERE num = ?1", params![sql_num])
            .map_err(|e| StoreError::Storage(format!("failed to remove lock record: {e}")))?;

        tx.commit()
            .map_err(|e| StoreError::Storage(format!("failed to commit removal: {e}")))?;

        if removed == 0 {
            warn!("no execution record found for migration {num}");
        }
        Ok(())
    }

    async fn ensure_unique_index_on_number(&self) -> std::result::Result<(), StoreError> {
        let mut conn = self.connection()?;
        let exists = index_exists(&conn)
            .map_err(|e| StoreError::Storage(format!("failed to check lock index: {e}")))?;
        if exists {
            return Ok(());
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::Storage(format!("failed to begin transaction: {e}")))?;

        // Another process may have won the race between the check and the write lock.
        let exists = index_exists(&tx)
            .map_err(|e| StoreError::Storage(format!("failed to check lock index: {e}")))?;
        if exists {
            return Ok(());
        }

        // Lock rows without an execution record are claims by other runs and stay.
        // Only duplicates must go for the index to be creatable.
        let duplicates = tx
            .execute(
                "DELETE FROM migration_lock WHERE rowid NOT IN
                    (SELECT MIN(rowid) FROM migration_lock GROUP BY num)",
                [],
            )
            .map_err(|e| StoreError::Storage(format!("failed to clear duplicate locks: {e}")))?;
        let backfilled = tx
            .execute(
                "INSERT INTO migration_lock (num, name, locked_at)
                    SELECT num, MIN(name), MIN(executed) FROM migrations
                    WHERE num NOT IN (SELECT num FROM migration_lock)
                    GROUP BY num",
                [],
            )
            .map_err(|e| StoreError::Storage(format!("failed to backfill locks: {e}")))?;

        tx.execute_batch(&format!(
            "CREATE UNIQUE INDEX {LOCK_INDEX_NAME} ON migration_lock(num)"
        ))
        .map_err(|e| StoreError::Storage(format!("failed to create lock index: {e}")))?;

        tx.commit()
            .map_err(|e| StoreError::Storage(format!("failed to commit lock index: {e}")))?;

        info!(
            "created lock index {LOCK_INDEX_NAME} (removed {duplicates} duplicate locks, backfilled {backfilled})"
        );
        Ok(())
    }

    async fn save(&self) -> std::result::Result<(), StoreError> {
        let conn = self.connection()?;
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
            .map_err(|e| StoreError::Storage(format!("failed to checkpoint: {e}")))?;
        Ok(())
    }
}

fn index_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='index' AND name=?1",
        params![LOCK_INDEX_NAME],
        |row| row.get(0),
    )
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

fn sql_num(num: u64) -> std::result::Result<i64, StoreError> {
    i64::try_from(num)
        .map_err(|_| StoreError::Storage(format!("sequence number {num} does not fit in SQLite")))
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // Rows written by hand may use SQLite's datetime('now') format.
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}
