//! Sync data models
//!
//! The mutation queue entry types, retry policy, drain reporting, and
//! the crate-level configuration struct.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::db::records::{Booking, ChatMessage, WorkerProfile};

// ============================================================================
// Queued Mutations
// ============================================================================

/// A pending write operation awaiting delivery to the remote system.
///
/// Tagged per collection so the payload always carries the fields the
/// remote endpoint requires; no untyped blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum QueuedMutation {
    CreateBooking(Booking),
    UpdateBooking(Booking),
    SendMessage(ChatMessage),
    UpdateProfile(WorkerProfile),
}

impl QueuedMutation {
    /// Stable action name, used for the queue's `action` column and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateBooking(_) => "create_booking",
            Self::UpdateBooking(_) => "update_booking",
            Self::SendMessage(_) => "send_message",
            Self::UpdateProfile(_) => "update_profile",
        }
    }
}

/// A mutation queue entry as persisted in the sync_queue table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub mutation: QueuedMutation,
    pub retry_count: i32,
    pub max_retries: i32,
    pub enqueued_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// Whether this entry is due for a dispatch attempt.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.retry_count < self.max_retries && self.next_attempt_at <= now
    }
}

/// A mutation that exhausted its retries and was dropped from the queue.
/// Kept so the UI can surface it; never retried automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub action: String,
    pub payload: String,
    pub retry_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries still waiting in the queue (due or backing off)
    pub pending_count: i64,

    /// Entries that exhausted retries and moved to the dead-letter table
    pub dead_letter_count: i64,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrainReport {
    /// Another drain pass held the single-flight guard; nothing was attempted
    pub already_running: bool,

    /// The network monitor reported offline; nothing was attempted
    pub offline: bool,

    /// Entries delivered and removed from the queue
    pub delivered: i64,

    /// Entries that failed and stayed queued for a later pass
    pub retried: i64,

    /// Entries dropped after exhausting retries (reported as dead letters)
    pub dead_lettered: i64,
}

// ============================================================================
// Retry Policy
// ============================================================================

const BASE_DELAY_SECS: i64 = 30; // Initial retry delay: 30 seconds
const MAX_DELAY_SECS: i64 = 3600; // Max retry delay: 1 hour
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Retry bounds and backoff spacing for queued mutations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before an entry is dropped to the dead-letter table
    pub max_retries: i32,

    /// Base backoff delay in seconds; doubles per retry, capped
    pub base_delay_secs: i64,

    pub max_delay_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_secs: BASE_DELAY_SECS,
            max_delay_secs: MAX_DELAY_SECS,
        }
    }
}

impl RetryPolicy {
    /// No inter-attempt spacing; every entry is always due. Used in tests
    /// and by embedders that prefer the periodic timer as the only pacing.
    pub fn immediate() -> Self {
        Self {
            base_delay_secs: 0,
            ..Self::default()
        }
    }

    /// Next attempt timestamp after `retry_count` failed attempts.
    pub fn next_attempt(&self, retry_count: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.base_delay_secs <= 0 {
            return now;
        }
        let delay_secs = (self.base_delay_secs * 2_i64.pow(retry_count.max(0) as u32))
            .min(self.max_delay_secs);
        now + Duration::seconds(delay_secs)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Crate configuration, injected into [`crate::sync::OfflineManager`].
///
/// Constructed programmatically or from the environment; never a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Remote API base URL, e.g. "https://api.labourlink.in/v1"
    pub api_base_url: String,

    /// Local database path; `None` uses the platform data dir
    pub db_path: Option<PathBuf>,

    /// Unique device identifier (UUID v4), sent as X-Device-Id
    pub device_id: String,

    /// Device name from the hostname, sent as X-Device-Name
    pub device_name: String,

    /// Whether the embedder reports the process as online at startup
    pub assume_online: bool,

    /// Safety-net drain interval in minutes
    pub drain_interval_minutes: u64,

    pub retry_policy: RetryPolicy,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.labourlink.in/v1".to_string(),
            db_path: None,
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name: default_device_name(),
            assume_online: true,
            drain_interval_minutes: 5,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl OfflineConfig {
    /// Load configuration from the environment (and a `.env` file when
    /// present). Unset variables fall back to the defaults.
    ///
    /// Recognized variables: `LABOURLINK_API_BASE`, `LABOURLINK_DB_PATH`,
    /// `LABOURLINK_DRAIN_INTERVAL_MINUTES`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Ok(base) = std::env::var("LABOURLINK_API_BASE") {
            config.api_base_url = base;
        }
        if let Ok(path) = std::env::var("LABOURLINK_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Ok(minutes) = std::env::var("LABOURLINK_DRAIN_INTERVAL_MINUTES") {
            if let Ok(minutes) = minutes.parse::<u64>() {
                config.drain_interval_minutes = minutes;
            }
        }

        config
    }
}

/// Default device name from the hostname.
fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "LabourLink Device".to_string())
}
