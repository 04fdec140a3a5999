//! Mutation queue persistence
//!
//! Durable FIFO queue of pending writes, backed by the local store's
//! sync_queue table. Entries carry a retry count and a next-attempt
//! timestamp (exponential backoff). An entry leaves the queue in
//! exactly two ways: deleted after successful dispatch, or moved to
//! the dead-letter table after exhausting its retries.

use chrono::{DateTime, Utc};
use rusqlite::params;
use thiserror::Error;

use super::models::{DeadLetter, QueueEntry, QueuedMutation, QueueStats, RetryPolicy};
use crate::db::{LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("queue entry not found: {0}")]
    EntryNotFound(i64),

    #[error("payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}

fn ts_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Persistence operations for the mutation queue and dead-letter table.
#[derive(Clone)]
pub struct MutationQueue {
    store: LocalStore,
    policy: RetryPolicy,
}

impl MutationQueue {
    pub fn new(store: LocalStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append a mutation with retry_count 0. Returns the entry id.
    pub fn enqueue(&self, mutation: &QueuedMutation) -> Result<i64, QueueError> {
        let payload = serde_json::to_string(mutation)?;
        let now = Utc::now();

        let id = self.store.execute_insert(
            r#"
            INSERT INTO sync_queue
            (action, payload, retry_count, max_retries, enqueued_at, next_attempt_at)
            VALUES (?1, ?2, 0, ?3, ?4, ?5)
            "#,
            params![
                mutation.kind(),
                payload,
                self.policy.max_retries,
                now.timestamp(),
                now.timestamp(),
            ],
        )?;

        log::info!("Enqueued {} as queue entry {}", mutation.kind(), id);
        Ok(id)
    }

    /// All entries due for a dispatch attempt, in enqueue order (FIFO).
    pub fn due_entries(&self, now: DateTime<Utc>) -> Result<Vec<QueueEntry>, QueueError> {
        self.select_entries(
            r#"
            SELECT id, payload, retry_count, max_retries, enqueued_at,
                   next_attempt_at, last_error
            FROM sync_queue
            WHERE retry_count < max_retries
              AND next_attempt_at <= ?1
            ORDER BY enqueued_at ASC, id ASC
            "#,
            params![now.timestamp()],
        )
    }

    /// All entries still in the queue, FIFO, whether or not they are due.
    pub fn all_entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.select_entries(
            r#"
            SELECT id, payload, retry_count, max_retries, enqueued_at,
                   next_attempt_at, last_error
            FROM sync_queue
            ORDER BY enqueued_at ASC, id ASC
            "#,
            params![],
        )
    }

    fn select_entries<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let rows = self.store.query(sql, params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i32>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, payload, retry_count, max_retries, enqueued_at, next_attempt_at, last_error) in
            rows
        {
            let mutation: QueuedMutation = serde_json::from_str(&payload)?;
            entries.push(QueueEntry {
                id,
                mutation,
                retry_count,
                max_retries,
                enqueued_at: ts_to_datetime(enqueued_at),
                next_attempt_at: ts_to_datetime(next_attempt_at),
                last_error,
            });
        }

        Ok(entries)
    }

    /// Remove an entry after successful dispatch.
    pub fn remove(&self, id: i64) -> Result<(), QueueError> {
        let affected = self
            .store
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(QueueError::EntryNotFound(id));
        }
        Ok(())
    }

    /// Record a failed attempt. Returns the entry's new retry count.
    /// Entries at max_retries after the increment must be dead-lettered
    /// by the caller via [`Self::dead_letter`].
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<i32, QueueError> {
        let retry_count: i32 = self
            .store
            .query_row(
                "SELECT retry_count FROM sync_queue WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => {
                    QueueError::EntryNotFound(id)
                }
                other => QueueError::Storage(other),
            })?;

        let new_retry_count = retry_count + 1;
        let next_attempt = self.policy.next_attempt(new_retry_count, Utc::now());

        self.store.execute(
            r#"
            UPDATE sync_queue
            SET retry_count = ?1, next_attempt_at = ?2, last_error = ?3
            WHERE id = ?4
            "#,
            params![new_retry_count, next_attempt.timestamp(), error, id],
        )?;

        log::warn!(
            "Queue entry {} failed (attempt {}/{}): {}",
            id,
            new_retry_count,
            self.policy.max_retries,
            error
        );
        Ok(new_retry_count)
    }

    /// Drop an exhausted entry from the queue and record it as a dead
    /// letter. The entry is never retried again. Insert and delete run
    /// in one transaction so the entry can never exist in both tables.
    pub fn dead_letter(&self, entry: &QueueEntry, error: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&entry.mutation)?;
        let now = Utc::now();

        self.store.with_transaction(|tx| {
            tx.execute(
                r#"
                INSERT INTO sync_dead_letters
                (action, payload, retry_count, enqueued_at, failed_at, last_error)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    entry.mutation.kind(),
                    payload,
                    entry.retry_count + 1,
                    entry.enqueued_at.timestamp(),
                    now.timestamp(),
                    error,
                ],
            )?;
            tx.execute("DELETE FROM sync_queue WHERE id = ?1", params![entry.id])?;
            Ok(())
        })?;

        log::error!(
            "Queue entry {} ({}) permanently failed after {} attempts: {}",
            entry.id,
            entry.mutation.kind(),
            entry.retry_count + 1,
            error
        );
        Ok(())
    }

    /// Dead letters, most recent first.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let letters = self.store.query(
            r#"
            SELECT id, action, payload, retry_count, enqueued_at, failed_at, last_error
            FROM sync_dead_letters
            ORDER BY failed_at DESC, id DESC
            "#,
            params![],
            |row| {
                Ok(DeadLetter {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    payload: row.get(2)?,
                    retry_count: row.get(3)?,
                    enqueued_at: ts_to_datetime(row.get(4)?),
                    failed_at: ts_to_datetime(row.get(5)?),
                    last_error: row.get(6)?,
                })
            },
        )?;
        Ok(letters)
    }

    /// Delete dead letters after the UI has surfaced them.
    pub fn purge_dead_letters(&self) -> Result<usize, QueueError> {
        let deleted = self
            .store
            .execute("DELETE FROM sync_dead_letters", params![])?;
        Ok(deleted)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let pending_count: i64 = self.store.query_row(
            "SELECT COUNT(*) FROM sync_queue",
            params![],
            |row| row.get(0),
        )?;
        let dead_letter_count: i64 = self.store.query_row(
            "SELECT COUNT(*) FROM sync_dead_letters",
            params![],
            |row| row.get(0),
        )?;

        Ok(QueueStats {
            pending_count,
            dead_letter_count,
        })
    }

    pub fn clear(&self) -> Result<(), QueueError> {
        self.store.execute("DELETE FROM sync_queue", params![])?;
        Ok(())
    }
}
