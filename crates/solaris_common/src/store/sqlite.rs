// SQLite-backed progression store
// Single connection behind an async mutex, blocking work on the blocking pool

use super::{run_mutation, Commit, Mutation, ProgressionStore};
use crate::error::StoreError;
use crate::levels::Level;
use crate::member::{MemberId, MemberRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Task(format!("create {}: {}", parent.display(), e)))?;
            }
        }

        info!("Opening progression database at: {}", db_path.display());

        let open_path = db_path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&open_path)?;

            // WAL lets readers proceed while a member transaction is open
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            Ok(conn)
        })
        .await??;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(db_path),
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Private in-memory database (tests, dry runs)
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        self.execute(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS members (
                    member_id INTEGER PRIMARY KEY,
                    points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
                    level INTEGER NOT NULL DEFAULT 0 CHECK (level >= 0),
                    synced_level INTEGER,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_members_sync
                    ON members(level, synced_level);
                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
                );",
            )?;
            debug!("Progression schema ready");
            Ok(())
        })
        .await
    }

    /// Run a closure against the connection on the blocking pool
    pub async fn execute<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

fn read_member(conn: &Connection, member: MemberId) -> Result<Option<MemberRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT points, level, synced_level, updated_at FROM members WHERE member_id = ?1",
            params![member.0 as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(points, level, synced, updated_at)| decode(member, points, level, synced, updated_at))
        .transpose()
}

fn decode(
    member: MemberId,
    points: i64,
    level: i64,
    synced_level: Option<i64>,
    updated_at: DateTime<Utc>,
) -> Result<MemberRecord, StoreError> {
    let to_level = |value: i64| -> Result<Level, StoreError> {
        Level::try_from(value).map_err(|_| StoreError::Corrupt {
            member: member.0,
            reason: format!("level {} out of range", value),
        })
    };
    Ok(MemberRecord {
        member_id: member,
        points: u64::try_from(points).map_err(|_| StoreError::Corrupt {
            member: member.0,
            reason: format!("negative points {}", points),
        })?,
        level: to_level(level)?,
        synced_level: synced_level.map(to_level).transpose()?,
        updated_at,
    })
}

fn write_member(conn: &Connection, record: &MemberRecord) -> Result<(), StoreError> {
    let points = i64::try_from(record.points).map_err(|_| StoreError::Corrupt {
        member: record.member_id.0,
        reason: format!("points {} exceed the storable range", record.points),
    })?;
    conn.execute(
        "INSERT INTO members (member_id, points, level, synced_level, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(member_id) DO UPDATE SET
            points = excluded.points,
            level = excluded.level,
            synced_level = excluded.synced_level,
            updated_at = excluded.updated_at",
        params![
            record.member_id.0 as i64,
            points,
            record.level as i64,
            record.synced_level.map(|l| l as i64),
            record.updated_at,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl ProgressionStore for SqliteStore {
    async fn get(&self, member: MemberId) -> Result<Option<MemberRecord>, StoreError> {
        self.execute(move |conn| read_member(conn, member)).await
    }

    async fn upsert(&self, record: &MemberRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.execute(move |conn| write_member(conn, &record)).await
    }

    async fn update(&self, member: MemberId, mutation: Mutation) -> Result<Commit, StoreError> {
        self.execute(move |conn| {
            // IMMEDIATE takes the write lock up front so no other writer can
            // slip in between the read and the write
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing = read_member(&tx, member)?;
            let (commit, write) = run_mutation(member, existing, &mutation)?;
            if write {
                write_member(&tx, &commit.after)?;
            }
            tx.commit()?;
            Ok(commit)
        })
        .await
    }

    async fn pending_sync(&self) -> Result<Vec<MemberRecord>, StoreError> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT member_id, points, level, synced_level, updated_at FROM members
                 WHERE synced_level IS NULL OR synced_level != level
                 ORDER BY member_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, DateTime<Utc>>(4)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, points, level, synced, updated_at) = row?;
                records.push(decode(MemberId(id as u64), points, level, synced, updated_at)?);
            }
            Ok(records)
        })
        .await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value, updated_at)
                 VALUES (?1, ?2, CURRENT_TIMESTAMP)",
                params![key, value],
            )?;
            debug!("Saved setting: {}", key);
            Ok(())
        })
        .await
    }
}
