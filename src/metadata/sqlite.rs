//! SQLite-backed object catalog.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  The connection is guarded by a `Mutex`; callers
//! are already on blocking threads.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{BucketRecord, ObjectCatalog, ObjectFilter, ObjectRecord, ObjectStatus};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const OBJECT_COLUMNS: &str =
    "id, site, bucket, name, hash, status, creation, expires, size, metadata";

const BUCKET_COLUMNS: &str = "name, site, status, created_at";

/// Catalog backed by a single SQLite database file.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database.
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create tables and indexes if missing.  Safe to call on every start.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS buckets (
                name       TEXT PRIMARY KEY,
                site       TEXT NOT NULL DEFAULT '',
                status     TEXT NOT NULL,
                created_at TEXT
            );

            CREATE TABLE IF NOT EXISTS objects (
                bucket    TEXT NOT NULL,
                name      TEXT NOT NULL,
                id        TEXT NOT NULL,
                site      TEXT NOT NULL DEFAULT '',
                hash      TEXT,
                status    TEXT NOT NULL,
                creation  TEXT,
                expires   TEXT,
                size      INTEGER NOT NULL DEFAULT 0,
                metadata  TEXT NOT NULL DEFAULT '{}',

                PRIMARY KEY (bucket, name),
                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_objects_bucket_status
                ON objects(bucket, status);
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |version| version < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_text()],
            )?;
        }
        Ok(())
    }
}

fn now_text() -> String {
    time_text(&Utc::now())
}

fn time_text(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
        .map(|time| time.with_timezone(&Utc))
}

fn row_to_bucket(row: &Row<'_>) -> rusqlite::Result<BucketRecord> {
    let status: String = row.get(2)?;
    Ok(BucketRecord {
        name: row.get(0)?,
        site: row.get(1)?,
        status: ObjectStatus::parse(&status).unwrap_or_default(),
        creation: parse_time(row.get(3)?),
    })
}

fn row_to_object(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let status: String = row.get(5)?;
    let metadata: String = row.get(9)?;
    let size: i64 = row.get(8)?;
    Ok(ObjectRecord {
        id: row.get(0)?,
        site: row.get(1)?,
        bucket: row.get(2)?,
        name: row.get(3)?,
        hash: row.get(4)?,
        status: ObjectStatus::parse(&status).unwrap_or_default(),
        creation: parse_time(row.get(6)?),
        expires: parse_time(row.get(7)?),
        size: u64::try_from(size).unwrap_or(0),
        metadata: serde_json::from_str::<HashMap<String, String>>(&metadata).unwrap_or_default(),
    })
}

fn write_object(conn: &Connection, record: &ObjectRecord) -> anyhow::Result<usize> {
    let metadata = serde_json::to_string(&record.metadata)?;
    let changed = conn.execute(
        "INSERT OR REPLACE INTO objects
            (id, site, bucket, name, hash, status, creation, expires, size, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            record.site,
            record.bucket,
            record.name,
            record.hash,
            record.status.as_str(),
            record.creation.as_ref().map(time_text),
            record.expires.as_ref().map(time_text),
            i64::try_from(record.size)?,
            metadata,
        ],
    )?;
    Ok(changed)
}

impl ObjectCatalog for SqliteCatalog {
    fn create_bucket(&self, record: &BucketRecord) -> anyhow::Result<Option<ObjectStatus>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let tx = conn.unchecked_transaction()?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT status FROM buckets WHERE name = ?1",
                params![record.name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(status) = existing {
            let status = ObjectStatus::parse(&status).unwrap_or_default();
            if !status.is_replaceable() {
                return Ok(Some(status));
            }
        }
        // Plain upsert: `INSERT OR REPLACE` would cascade into the objects.
        tx.execute(
            "INSERT INTO buckets (name, site, status, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE
                SET site = excluded.site, status = excluded.status,
                    created_at = excluded.created_at",
            params![
                record.name,
                record.site,
                record.status.as_str(),
                record.creation.as_ref().map(time_text),
            ],
        )?;
        tx.commit()?;
        Ok(None)
    }

    fn get_bucket(&self, bucket: &str) -> anyhow::Result<Option<BucketRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let record = conn
            .query_row(
                &format!("SELECT {BUCKET_COLUMNS} FROM buckets WHERE name = ?1"),
                params![bucket],
                row_to_bucket,
            )
            .optional()?;
        Ok(record)
    }

    fn list_buckets(&self) -> anyhow::Result<Vec<BucketRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets ORDER BY name"
        ))?;
        let rows = stmt.query_map([], row_to_bucket)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn update_bucket_status(&self, bucket: &str, status: ObjectStatus) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let changed = conn.execute(
            "UPDATE buckets SET status = ?1 WHERE name = ?2",
            params![status.as_str(), bucket],
        )?;
        if changed == 0 {
            anyhow::bail!("bucket does not exist: {bucket}");
        }
        Ok(())
    }

    fn get_object(&self, bucket: &str, name: &str) -> anyhow::Result<Option<ObjectRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let record = conn
            .query_row(
                &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket = ?1 AND name = ?2"),
                params![bucket, name],
                row_to_object,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_object(&self, record: &ObjectRecord) -> anyhow::Result<Option<ObjectStatus>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let tx = conn.unchecked_transaction()?;
        let bucket_status: Option<String> = tx
            .query_row(
                "SELECT status FROM buckets WHERE name = ?1",
                params![record.bucket],
                |row| row.get(0),
            )
            .optional()?;
        if bucket_status.as_deref().and_then(ObjectStatus::parse) != Some(ObjectStatus::Ready) {
            anyhow::bail!("bucket does not exist: {}", record.bucket);
        }
        let existing: Option<String> = tx
            .query_row(
                "SELECT status FROM objects WHERE bucket = ?1 AND name = ?2",
                params![record.bucket, record.name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(status) = existing {
            let status = ObjectStatus::parse(&status).unwrap_or_default();
            if !status.is_replaceable() {
                return Ok(Some(status));
            }
        }
        write_object(&tx, record)?;
        tx.commit()?;
        Ok(None)
    }

    fn update_object(&self, record: &ObjectRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let metadata = serde_json::to_string(&record.metadata)?;
        let changed = conn.execute(
            "UPDATE objects
                SET id = ?1, site = ?2, hash = ?3, status = ?4, creation = ?5,
                    expires = ?6, size = ?7, metadata = ?8
              WHERE bucket = ?9 AND name = ?10",
            params![
                record.id,
                record.site,
                record.hash,
                record.status.as_str(),
                record.creation.as_ref().map(time_text),
                record.expires.as_ref().map(time_text),
                i64::try_from(record.size)?,
                metadata,
                record.bucket,
                record.name,
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("object does not exist: {}/{}", record.bucket, record.name);
        }
        Ok(())
    }

    fn list_objects(
        &self,
        bucket: &str,
        filter: &ObjectFilter,
    ) -> anyhow::Result<Vec<ObjectRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let prefix = filter.name_prefix.clone().unwrap_or_default();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
              WHERE bucket = ?1 AND substr(name, 1, length(?2)) = ?2
              ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![bucket, prefix], row_to_object)?;
        let mut records = Vec::new();
        for row in rows {
            let record = row?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}
