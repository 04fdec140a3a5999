//! # LabourLink Offline
//!
//! Offline-first data layer for the LabourLink labour marketplace client.
//!
//! Every read and write goes through the local SQLite store first, so the
//! app stays usable on flaky or absent connectivity. Writes are queued as
//! typed mutations and delivered to the backend in the background: on
//! reconnect, after each online write, and on a periodic timer. Delivery
//! is at-least-once with bounded retries; mutations that permanently fail
//! land in a dead-letter table the UI can surface.
//!
//! Typical usage:
//!
//! ```no_run
//! use labourlink_offline::sync::{OfflineConfig, OfflineManager};
//!
//! # async fn run() -> Result<(), labourlink_offline::sync::ManagerError> {
//! let manager = OfflineManager::new(OfflineConfig::from_env())?;
//! manager.init().await?;
//!
//! // Reads and writes work offline; delivery happens in the background.
//! let stats = manager.queue_stats()?;
//! println!("{} mutation(s) awaiting delivery", stats.pending_count);
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod sync;

pub use db::records::{
    Booking, BookingFilter, BookingStatus, ChatMessage, City, ProfileFilter, TradeCategory,
    WorkerProfile,
};
pub use db::{LocalStore, StoreError};
pub use sync::{
    DeadLetter, DrainReport, ManagerError, OfflineConfig, OfflineManager, QueueStats,
    QueuedMutation, RetryPolicy,
};
