//! Sync Module - Offline Mutation Delivery
//!
//! Keeps local writes flowing to the LabourLink backend:
//! - Mutation queue (persisted, FIFO, bounded retries)
//! - Queue processor (drains on reconnect, on enqueue, and on a timer)
//! - Network monitor (platform connectivity events)
//! - Offline manager (the facade the embedding app uses)
//!
//! Architecture:
//! - Local-first: every read and write hits SQLite before the network
//! - At-least-once delivery: a mutation is removed from the queue only
//!   after the remote accepted it
//! - Dead letters: a mutation that exhausts its retries is dropped from
//!   the queue but kept for the UI to surface

pub mod api;
pub mod manager;
pub mod models;
pub mod network;
pub mod processor;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;


// Re-export commonly used types
pub use api::{ApiEnvelope, Dispatcher, RemoteApi, RemoteApiError};
pub use manager::{ManagerError, OfflineManager};
pub use models::{
    DeadLetter, DrainReport, OfflineConfig, QueueEntry, QueueStats, QueuedMutation, RetryPolicy,
};
pub use network::NetworkMonitor;
pub use processor::{ProcessorError, SyncProcessor};
pub use queue::{MutationQueue, QueueError};
pub use scheduler::{DrainScheduler, SchedulerConfig, SchedulerError};
