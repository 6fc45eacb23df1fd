//! SQLite-backed versioned store.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections and apply migrations.
//! - Implement create-if-absent and CAS primitives inside IMMEDIATE
//!   transactions so concurrent writers serialize on the database lock.
//!
//! # Invariants
//! - Returned stores have `foreign_keys=ON` and all migrations applied.
//! - `kv_buckets.last_revision` is bumped in the same transaction as the
//!   entry write it numbers.

use super::migrations::apply_migrations;
use super::{KvEntry, KvError, KvResult, KvStore};
use crate::context::OpContext;
use log::{error, info};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Opens (or creates) a database file and applies pending migrations.
    ///
    /// # Side effects
    /// - Emits `kv_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        open_logged("file", || Connection::open(path))
    }

    /// Opens a private in-memory database and applies all migrations.
    pub fn open_in_memory() -> KvResult<Self> {
        open_logged("memory", Connection::open_in_memory)
    }

    /// Current `PRAGMA user_version` of the underlying database.
    pub fn schema_version(&self) -> KvResult<u32> {
        let conn = self.conn.lock();
        let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
        Ok(version)
    }

    fn write_tx<T>(
        &self,
        ctx: &OpContext,
        op: impl FnOnce(&Transaction<'_>) -> KvResult<T>,
    ) -> KvResult<T> {
        ctx.check()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn open_logged(
    mode: &'static str,
    opener: impl FnOnce() -> rusqlite::Result<Connection>,
) -> KvResult<SqliteKvStore> {
    let started_at = Instant::now();
    info!("event=kv_open module=kv status=start mode={mode}");

    let mut conn = match opener() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=kv_open module=kv status=error mode={mode} duration_ms={} error_code=kv_open_failed error={err}",
                started_at.elapsed().as_millis()
            );
            return Err(err.into());
        }
    };

    if let Err(err) = bootstrap_connection(&mut conn) {
        error!(
            "event=kv_open module=kv status=error mode={mode} duration_ms={} error_code=kv_bootstrap_failed error={err}",
            started_at.elapsed().as_millis()
        );
        return Err(err);
    }

    info!(
        "event=kv_open module=kv status=ok mode={mode} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(SqliteKvStore {
        conn: Mutex::new(conn),
    })
}

fn bootstrap_connection(conn: &mut Connection) -> KvResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)?;
    Ok(())
}

fn next_revision(tx: &Transaction<'_>, bucket: &str) -> KvResult<u64> {
    let revision: i64 = tx.query_row(
        "INSERT INTO kv_buckets (bucket, last_revision) VALUES (?1, 1)
         ON CONFLICT (bucket) DO UPDATE SET last_revision = last_revision + 1
         RETURNING last_revision;",
        [bucket],
        |row| row.get(0),
    )?;
    to_revision(revision)
}

fn stored_revision(tx: &Transaction<'_>, bucket: &str, key: &str) -> KvResult<Option<u64>> {
    let revision: Option<i64> = tx
        .query_row(
            "SELECT revision FROM kv_entries WHERE bucket = ?1 AND key = ?2;",
            params![bucket, key],
            |row| row.get(0),
        )
        .optional()?;
    revision.map(to_revision).transpose()
}

fn require_revision(
    tx: &Transaction<'_>,
    bucket: &str,
    key: &str,
    expected: u64,
) -> KvResult<()> {
    match stored_revision(tx, bucket, key)? {
        None => Err(KvError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }),
        Some(actual) if actual != expected => Err(KvError::RevisionMismatch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            expected,
            actual,
        }),
        Some(_) => Ok(()),
    }
}

fn to_revision(value: i64) -> KvResult<u64> {
    u64::try_from(value)
        .map_err(|_| KvError::InvalidData(format!("negative revision `{value}` in kv store")))
}

fn to_db_revision(value: u64) -> KvResult<i64> {
    i64::try_from(value)
        .map_err(|_| KvError::InvalidData(format!("revision `{value}` exceeds storage range")))
}

impl KvStore for SqliteKvStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn get(&self, ctx: &OpContext, bucket: &str, key: &str) -> KvResult<KvEntry> {
        ctx.check()?;
        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT value, revision FROM kv_entries WHERE bucket = ?1 AND key = ?2;",
                params![bucket, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (value, revision) = row.ok_or_else(|| KvError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        Ok(KvEntry {
            key: key.to_string(),
            value,
            revision: to_revision(revision)?,
        })
    }

    fn create(&self, ctx: &OpContext, bucket: &str, key: &str, value: &[u8]) -> KvResult<u64> {
        self.write_tx(ctx, |tx| {
            if stored_revision(tx, bucket, key)?.is_some() {
                return Err(KvError::AlreadyExists {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            let revision = next_revision(tx, bucket)?;
            tx.execute(
                "INSERT INTO kv_entries (bucket, key, value, revision) VALUES (?1, ?2, ?3, ?4);",
                params![bucket, key, value, to_db_revision(revision)?],
            )?;
            Ok(revision)
        })
    }

    fn update(
        &self,
        ctx: &OpContext,
        bucket: &str,
        key: &str,
        value: &[u8],
        expected_revision: u64,
    ) -> KvResult<u64> {
        self.write_tx(ctx, |tx| {
            require_revision(tx, bucket, key, expected_revision)?;
            let revision = next_revision(tx, bucket)?;
            tx.execute(
                "UPDATE kv_entries
                 SET
                    value = ?1,
                    revision = ?2,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE bucket = ?3 AND key = ?4;",
                params![value, to_db_revision(revision)?, bucket, key],
            )?;
            Ok(revision)
        })
    }

    fn delete(
        &self,
        ctx: &OpContext,
        bucket: &str,
        key: &str,
        expected_revision: u64,
    ) -> KvResult<()> {
        self.write_tx(ctx, |tx| {
            require_revision(tx, bucket, key, expected_revision)?;
            tx.execute(
                "DELETE FROM kv_entries WHERE bucket = ?1 AND key = ?2;",
                params![bucket, key],
            )?;
            next_revision(tx, bucket)?;
            Ok(())
        })
    }

    fn keys(&self, ctx: &OpContext, bucket: &str) -> KvResult<Vec<String>> {
        ctx.check()?;
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key FROM kv_entries WHERE bucket = ?1 ORDER BY key ASC;")?;
        let mut rows = stmt.query([bucket])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }
}
