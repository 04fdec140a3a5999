//! Offline manager - the data access facade
//!
//! The single entry point the embedding app talks to. Coordinates local
//! storage, the mutation queue, connectivity tracking, and the drain
//! scheduler. Handles:
//! - Reads served from the local store (works offline)
//! - Writes applied locally, then queued for remote delivery
//! - Reference data refresh (cities, trade categories) from the server
//! - Connectivity events: a drain is kicked on every offline-to-online
//!   transition

use std::sync::{Arc, Mutex as StdMutex};
use tokio::task::JoinHandle;

use super::api::{Dispatcher, RemoteApi};
use super::models::{DeadLetter, DrainReport, OfflineConfig, QueueStats, QueuedMutation};
use super::network::NetworkMonitor;
use super::processor::{ProcessorError, SyncProcessor};
use super::queue::{MutationQueue, QueueError};
use super::scheduler::{DrainScheduler, SchedulerError};
use crate::db::records::{
    Booking, BookingFilter, ChatMessage, City, ProfileFilter, TradeCategory, WorkerProfile,
};
use crate::db::{LocalStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Offline-first data layer facade.
///
/// Writes follow a fire-and-forget contract: the local write is applied
/// and `Ok` returned before any network traffic happens. Remote delivery
/// runs in the background; a mutation that permanently fails surfaces
/// through [`OfflineManager::dead_letters`], never as a write error.
#[derive(Clone)]
pub struct OfflineManager {
    store: LocalStore,
    network: Arc<NetworkMonitor>,
    processor: SyncProcessor,
    scheduler: DrainScheduler,
    watcher_handle: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl OfflineManager {
    /// Create a manager backed by the real HTTP API.
    pub fn new(config: OfflineConfig) -> Result<Self, ManagerError> {
        let store = match &config.db_path {
            Some(path) => LocalStore::open(path.clone())?,
            None => LocalStore::open_default()?,
        };

        let dispatcher = Arc::new(RemoteApi::new(
            config.api_base_url.clone(),
            config.device_id.clone(),
            config.device_name.clone(),
        ));

        Ok(Self::with_dispatcher(config, store, dispatcher))
    }

    /// Create a manager over an explicit store and dispatcher. This is
    /// the seam tests use to substitute a mock dispatcher.
    pub fn with_dispatcher(
        config: OfflineConfig,
        store: LocalStore,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let network = Arc::new(NetworkMonitor::new(config.assume_online));
        let queue = MutationQueue::new(store.clone(), config.retry_policy);
        let processor = SyncProcessor::new(queue, dispatcher, network.clone());
        let scheduler = DrainScheduler::new(store.clone());

        Self {
            store,
            network,
            processor,
            scheduler,
            watcher_handle: Arc::new(StdMutex::new(None)),
        }
    }

    /// Start the background machinery: the connectivity watcher and,
    /// when enabled, the periodic drain scheduler.
    pub async fn init(&self) -> Result<(), ManagerError> {
        self.scheduler.load_config().await?;
        if self.scheduler.get_config().await.enabled {
            self.scheduler.start(self.processor.clone()).await?;
        }

        let mut rx = self.network.subscribe();
        let processor = self.processor.clone();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if !online {
                    continue;
                }
                log::info!("Back online, draining mutation queue");
                if let Err(e) = processor.drain().await {
                    log::error!("Reconnect drain failed: {e}");
                }
            }
        });
        if let Ok(mut guard) = self.watcher_handle.lock() {
            *guard = Some(handle);
        }

        // Entries persisted by a previous session should not wait a full
        // scheduler interval when we start up already online.
        if self.network.is_online() {
            let processor = self.processor.clone();
            tokio::spawn(async move {
                if let Err(e) = processor.drain().await {
                    log::warn!("Startup drain failed: {e}");
                }
            });
        }

        log::info!("Offline manager initialized");
        Ok(())
    }

    /// Stop background tasks. Queued mutations stay persisted and are
    /// delivered after the next `init`.
    pub fn shutdown(&self) {
        if self.scheduler.is_running() {
            let _ = self.scheduler.stop();
        }
        if let Ok(mut guard) = self.watcher_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        log::info!("Offline manager shut down");
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Forward a platform connectivity event.
    pub fn set_online(&self, online: bool) -> bool {
        self.network.set_online(online)
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    // ========================================================================
    // Reads (local store only)
    // ========================================================================

    pub fn worker_profiles(&self, filter: &ProfileFilter) -> Result<Vec<WorkerProfile>, ManagerError> {
        Ok(self.store.get_profiles(filter)?)
    }

    pub fn bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, ManagerError> {
        Ok(self.store.get_bookings(filter)?)
    }

    pub fn booking(&self, id: &str) -> Result<Booking, ManagerError> {
        Ok(self.store.get_booking(id)?)
    }

    pub fn messages(&self, booking_id: &str) -> Result<Vec<ChatMessage>, ManagerError> {
        Ok(self.store.get_messages(booking_id)?)
    }

    pub fn cities(&self) -> Result<Vec<City>, ManagerError> {
        Ok(self.store.get_cities()?)
    }

    pub fn trade_categories(&self) -> Result<Vec<TradeCategory>, ManagerError> {
        Ok(self.store.get_categories()?)
    }

    // ========================================================================
    // Writes (local first, then queued for delivery)
    // ========================================================================

    /// Create a booking. Applied to the local store immediately; the
    /// remote create is queued and delivered in the background.
    pub async fn create_booking(&self, booking: &Booking) -> Result<(), ManagerError> {
        self.store.upsert_bookings(std::slice::from_ref(booking))?;
        self.processor
            .enqueue(&QueuedMutation::CreateBooking(booking.clone()))
            .await?;
        Ok(())
    }

    /// Update a booking (status change, reschedule, notes).
    pub async fn update_booking(&self, booking: &Booking) -> Result<(), ManagerError> {
        self.store.upsert_bookings(std::slice::from_ref(booking))?;
        self.processor
            .enqueue(&QueuedMutation::UpdateBooking(booking.clone()))
            .await?;
        Ok(())
    }

    /// Send a chat message within a booking.
    pub async fn send_message(&self, message: &ChatMessage) -> Result<(), ManagerError> {
        self.store.insert_message(message)?;
        self.processor
            .enqueue(&QueuedMutation::SendMessage(message.clone()))
            .await?;
        Ok(())
    }

    /// Update a worker profile (rate, availability, details).
    pub async fn update_profile(&self, profile: &WorkerProfile) -> Result<(), ManagerError> {
        self.store.upsert_profiles(std::slice::from_ref(profile))?;
        self.processor
            .enqueue(&QueuedMutation::UpdateProfile(profile.clone()))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Server-refresh ingestion (no queueing; data came FROM the server)
    // ========================================================================

    pub fn cache_profiles(&self, profiles: &[WorkerProfile]) -> Result<(), ManagerError> {
        Ok(self.store.upsert_profiles(profiles)?)
    }

    pub fn cache_bookings(&self, bookings: &[Booking]) -> Result<(), ManagerError> {
        Ok(self.store.upsert_bookings(bookings)?)
    }

    pub fn replace_cities(&self, cities: &[City]) -> Result<(), ManagerError> {
        Ok(self.store.replace_cities(cities)?)
    }

    pub fn replace_trade_categories(
        &self,
        categories: &[TradeCategory],
    ) -> Result<(), ManagerError> {
        Ok(self.store.replace_categories(categories)?)
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    pub fn get_preference<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ManagerError> {
        Ok(self.store.get_preference(key)?)
    }

    pub fn set_preference<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), ManagerError> {
        Ok(self.store.set_preference(key, value)?)
    }

    pub fn delete_preference(&self, key: &str) -> Result<(), ManagerError> {
        Ok(self.store.delete_preference(key)?)
    }

    // ========================================================================
    // Queue inspection & manual drain
    // ========================================================================

    /// Trigger a drain pass immediately (manual "sync now").
    pub async fn drain_now(&self) -> Result<DrainReport, ManagerError> {
        Ok(self.processor.drain().await?)
    }

    pub fn queue_stats(&self) -> Result<QueueStats, ManagerError> {
        Ok(self.processor.queue().stats()?)
    }

    /// Mutations that exhausted their retries, for the UI to surface.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, ManagerError> {
        Ok(self.processor.queue().dead_letters()?)
    }

    pub fn purge_dead_letters(&self) -> Result<usize, ManagerError> {
        Ok(self.processor.queue().purge_dead_letters()?)
    }

    pub fn scheduler(&self) -> &DrainScheduler {
        &self.scheduler
    }
}
