//! Local store for LabourLink Offline
//!
//! SQLite-backed persistence for domain collections (worker profiles,
//! bookings, chat messages, cities, trade categories), the durable
//! mutation queue, and a last-write-wins preferences table. Everything
//! survives app restarts; reads return fully materialized snapshots.
//!
//! Storage failures are surfaced to the caller as `Err` — this layer
//! never retries. Retry is the sync processor's job and applies only
//! to the mutation queue.

pub mod records;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use records::{
    Booking, BookingFilter, BookingStatus, ChatMessage, City, ProfileFilter, TradeCategory,
    WorkerProfile,
};

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Local store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn ts_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Thread-safe handle to the local SQLite database.
///
/// Uses an r2d2 connection pool so concurrent UI callers never contend
/// on a single mutex'd connection.
#[derive(Clone)]
pub struct LocalStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl LocalStore {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: PathBuf) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path);

        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(2))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open the database at the platform-default data location.
    pub fn open_default() -> StoreResult<Self> {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("labourlink");
        std::fs::create_dir_all(&path)?;
        path.push("offline.db");
        Self::open(path)
    }

    /// Create an in-memory database (for tests).
    pub fn in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // A single connection so every caller sees the same in-memory db
        let pool = Pool::builder().max_size(1).build(manager)?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> StoreResult<()> {
        let conn = self.get_conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;

        Ok(())
    }

    fn get_conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(StoreError::from)
    }

    // =========================================================================
    // GENERIC HELPERS (used by the sync queue)
    // =========================================================================

    pub(crate) fn execute<P>(&self, sql: &str, params: P) -> StoreResult<usize>
    where
        P: rusqlite::Params,
    {
        let conn = self.get_conn()?;
        let affected = conn.execute(sql, params)?;
        Ok(affected)
    }

    /// Execute an INSERT statement and return the last inserted row ID
    pub(crate) fn execute_insert<P>(&self, sql: &str, params: P) -> StoreResult<i64>
    where
        P: rusqlite::Params,
    {
        let conn = self.get_conn()?;
        conn.execute(sql, params)?;
        Ok(conn.last_insert_rowid())
    }

    pub(crate) fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> StoreResult<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;

        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(StoreError::from)
    }

    pub(crate) fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> StoreResult<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;
        conn.query_row(sql, params, f).map_err(StoreError::from)
    }

    /// Run several statements in one transaction; all or nothing.
    pub(crate) fn with_transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // =========================================================================
    // WORKER PROFILES
    // =========================================================================

    /// Upsert worker profiles by id. Durable once this returns.
    pub fn upsert_profiles(&self, profiles: &[WorkerProfile]) -> StoreResult<()> {
        let conn = self.get_conn()?;

        for profile in profiles {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO worker_profiles
                (id, name, phone, category, city_id, daily_rate, is_available, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    profile.id,
                    profile.name,
                    profile.phone,
                    profile.category,
                    profile.city_id,
                    profile.daily_rate,
                    profile.is_available,
                    profile.updated_at.timestamp(),
                ],
            )?;
        }

        Ok(())
    }

    /// Read profiles, optionally narrowed by equality filters on the
    /// indexed fields. Snapshot at call time; no ordering guarantee.
    pub fn get_profiles(&self, filter: &ProfileFilter) -> StoreResult<Vec<WorkerProfile>> {
        let mut sql = String::from(
            "SELECT id, name, phone, category, city_id, daily_rate, is_available, updated_at \
             FROM worker_profiles",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(category) = &filter.category {
            clauses.push("category = ?");
            bound.push(Box::new(category.clone()));
        }
        if let Some(city_id) = &filter.city_id {
            clauses.push("city_id = ?");
            bound.push(Box::new(city_id.clone()));
        }
        if let Some(is_available) = filter.is_available {
            clauses.push("is_available = ?");
            bound.push(Box::new(is_available));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref())),
            |row| {
                Ok(WorkerProfile {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    phone: row.get(2)?,
                    category: row.get(3)?,
                    city_id: row.get(4)?,
                    daily_rate: row.get(5)?,
                    is_available: row.get(6)?,
                    updated_at: ts_to_datetime(row.get(7)?),
                })
            },
        )?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    pub fn delete_profile(&self, id: &str) -> StoreResult<()> {
        self.execute("DELETE FROM worker_profiles WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn clear_profiles(&self) -> StoreResult<()> {
        self.execute("DELETE FROM worker_profiles", params![])?;
        Ok(())
    }

    // =========================================================================
    // BOOKINGS
    // =========================================================================

    pub fn upsert_bookings(&self, bookings: &[Booking]) -> StoreResult<()> {
        let conn = self.get_conn()?;

        for booking in bookings {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO bookings
                (id, worker_id, employer_id, category, city_id, status,
                 scheduled_for, notes, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    booking.id,
                    booking.worker_id,
                    booking.employer_id,
                    booking.category,
                    booking.city_id,
                    booking.status.as_str(),
                    booking.scheduled_for.timestamp(),
                    booking.notes,
                    booking.updated_at.timestamp(),
                ],
            )?;
        }

        Ok(())
    }

    pub fn get_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let mut sql = String::from(
            "SELECT id, worker_id, employer_id, category, city_id, status, \
             scheduled_for, notes, updated_at FROM bookings",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(worker_id) = &filter.worker_id {
            clauses.push("worker_id = ?");
            bound.push(Box::new(worker_id.clone()));
        }
        if let Some(employer_id) = &filter.employer_id {
            clauses.push("employer_id = ?");
            bound.push(Box::new(employer_id.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            bound.push(Box::new(status.as_str().to_string()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref())),
            |row| {
                Ok(Booking {
                    id: row.get(0)?,
                    worker_id: row.get(1)?,
                    employer_id: row.get(2)?,
                    category: row.get(3)?,
                    city_id: row.get(4)?,
                    status: BookingStatus::from_str(&row.get::<_, String>(5)?),
                    scheduled_for: ts_to_datetime(row.get(6)?),
                    notes: row.get(7)?,
                    updated_at: ts_to_datetime(row.get(8)?),
                })
            },
        )?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    pub fn get_booking(&self, id: &str) -> StoreResult<Booking> {
        self.query_row(
            r#"
            SELECT id, worker_id, employer_id, category, city_id, status,
                   scheduled_for, notes, updated_at
            FROM bookings WHERE id = ?1
            "#,
            params![id],
            |row| {
                Ok(Booking {
                    id: row.get(0)?,
                    worker_id: row.get(1)?,
                    employer_id: row.get(2)?,
                    category: row.get(3)?,
                    city_id: row.get(4)?,
                    status: BookingStatus::from_str(&row.get::<_, String>(5)?),
                    scheduled_for: ts_to_datetime(row.get(6)?),
                    notes: row.get(7)?,
                    updated_at: ts_to_datetime(row.get(8)?),
                })
            },
        )
        .map_err(|e| match e {
            StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => {
                StoreError::NotFound(format!("booking {id}"))
            }
            other => other,
        })
    }

    pub fn delete_booking(&self, id: &str) -> StoreResult<()> {
        self.execute("DELETE FROM bookings WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn clear_bookings(&self) -> StoreResult<()> {
        self.execute("DELETE FROM bookings", params![])?;
        Ok(())
    }

    // =========================================================================
    // CHAT MESSAGES
    // =========================================================================

    pub fn insert_message(&self, message: &ChatMessage) -> StoreResult<()> {
        self.execute(
            r#"
            INSERT OR REPLACE INTO chat_messages (id, booking_id, sender_id, body, sent_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                message.id,
                message.booking_id,
                message.sender_id,
                message.body,
                message.sent_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Messages for one booking thread, oldest first.
    pub fn get_messages(&self, booking_id: &str) -> StoreResult<Vec<ChatMessage>> {
        self.query(
            r#"
            SELECT id, booking_id, sender_id, body, sent_at
            FROM chat_messages
            WHERE booking_id = ?1
            ORDER BY sent_at ASC
            "#,
            params![booking_id],
            |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    booking_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    body: row.get(3)?,
                    sent_at: ts_to_datetime(row.get(4)?),
                })
            },
        )
    }

    pub fn clear_messages(&self) -> StoreResult<()> {
        self.execute("DELETE FROM chat_messages", params![])?;
        Ok(())
    }

    // =========================================================================
    // REFERENCE DATA (cities, trade categories)
    // =========================================================================

    /// Replace the cities collection wholesale (reference data refresh).
    pub fn replace_cities(&self, cities: &[City]) -> StoreResult<()> {
        let conn = self.get_conn()?;

        conn.execute("DELETE FROM cities", params![])?;
        for city in cities {
            conn.execute(
                "INSERT INTO cities (id, name, state) VALUES (?1, ?2, ?3)",
                params![city.id, city.name, city.state],
            )?;
        }

        Ok(())
    }

    pub fn get_cities(&self) -> StoreResult<Vec<City>> {
        self.query(
            "SELECT id, name, state FROM cities ORDER BY name ASC",
            params![],
            |row| {
                Ok(City {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    state: row.get(2)?,
                })
            },
        )
    }

    pub fn replace_categories(&self, categories: &[TradeCategory]) -> StoreResult<()> {
        let conn = self.get_conn()?;

        conn.execute("DELETE FROM trade_categories", params![])?;
        for category in categories {
            conn.execute(
                "INSERT INTO trade_categories (id, code, name) VALUES (?1, ?2, ?3)",
                params![category.id, category.code, category.name],
            )?;
        }

        Ok(())
    }

    pub fn get_categories(&self) -> StoreResult<Vec<TradeCategory>> {
        self.query(
            "SELECT id, code, name FROM trade_categories ORDER BY name ASC",
            params![],
            |row| {
                Ok(TradeCategory {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                })
            },
        )
    }

    // =========================================================================
    // PREFERENCES (last write wins)
    // =========================================================================

    /// Read a preference value, deserialized from JSON.
    pub fn get_preference<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let conn = self.get_conn()?;
        let result: Result<String, _> = conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(json) => {
                let value: T = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a preference value. Last write wins per key.
    pub fn set_preference<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let json =
            serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.execute(
            "INSERT OR REPLACE INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, json, Utc::now().timestamp()],
        )?;

        Ok(())
    }

    pub fn delete_preference(&self, key: &str) -> StoreResult<()> {
        self.execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
        Ok(())
    }
}
