//! Background drain scheduler
//!
//! Periodic safety-net drain of the mutation queue. Connectivity events
//! already trigger a drain; the timer catches entries whose backoff
//! elapsed while the network state never changed. Uses Tokio tasks for
//! non-blocking background execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::processor::SyncProcessor;
use crate::db::LocalStore;

const CONFIG_KEY: &str = "drain_scheduler";

/// Scheduler configuration stored in the preferences table
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 5,
            last_run: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

/// Periodic drain driver.
#[derive(Clone)]
pub struct DrainScheduler {
    store: LocalStore,
    config: Arc<RwLock<SchedulerConfig>>,
    running: Arc<AtomicBool>,
    task_handle: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl DrainScheduler {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            config: Arc::new(RwLock::new(SchedulerConfig::default())),
            running: Arc::new(AtomicBool::new(false)),
            task_handle: Arc::new(StdMutex::new(None)),
        }
    }

    /// Load configuration from the preferences table.
    pub async fn load_config(&self) -> Result<(), SchedulerError> {
        let config: SchedulerConfig = self
            .store
            .get_preference(CONFIG_KEY)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?
            .unwrap_or_default();

        *self.config.write().await = config;
        Ok(())
    }

    /// Save configuration to the preferences table.
    pub async fn save_config(&self) -> Result<(), SchedulerError> {
        let config = self.config.read().await.clone();
        self.store
            .set_preference(CONFIG_KEY, &config)
            .map_err(|e| SchedulerError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Start the periodic drain task.
    pub async fn start(&self, processor: SyncProcessor) -> Result<(), SchedulerError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let interval_minutes = self.config.read().await.interval_minutes;
        validate_interval(interval_minutes)?;

        self.running.store(true, Ordering::Relaxed);

        let running = self.running.clone();
        let store = self.store.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            Self::scheduler_loop(running, store, config, processor).await;
        });

        *self
            .task_handle
            .lock()
            .map_err(|_| SchedulerError::Storage("task handle lock poisoned".to_string()))? =
            Some(handle);

        log::info!(
            "Drain scheduler started (interval: {} minutes)",
            interval_minutes
        );
        Ok(())
    }

    /// Stop the periodic drain task.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::NotRunning);
        }

        self.running.store(false, Ordering::Relaxed);

        if let Ok(mut guard) = self.task_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }

        log::info!("Drain scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub async fn get_config(&self) -> SchedulerConfig {
        self.config.read().await.clone()
    }

    /// Update configuration, persist it, and restart the task if needed.
    pub async fn update_config(
        &self,
        enabled: bool,
        interval_minutes: u64,
        processor: SyncProcessor,
    ) -> Result<(), SchedulerError> {
        validate_interval(interval_minutes)?;

        {
            let mut config = self.config.write().await;
            config.enabled = enabled;
            config.interval_minutes = interval_minutes;
        }

        self.save_config().await?;

        if self.is_running() {
            // Ignore NotRunning from a concurrent stop
            let _ = self.stop();
        }

        if enabled {
            self.start(processor).await?;
        }

        log::info!(
            "Scheduler config updated: enabled={}, interval={} minutes",
            enabled,
            interval_minutes
        );
        Ok(())
    }

    async fn scheduler_loop(
        running: Arc<AtomicBool>,
        store: LocalStore,
        config: Arc<RwLock<SchedulerConfig>>,
        processor: SyncProcessor,
    ) {
        let interval_minutes = config.read().await.interval_minutes;
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(60 * interval_minutes));
        // The first tick fires immediately; skip it so startup drains are
        // driven by the connectivity watcher, not the timer.
        interval.tick().await;

        log::info!(
            "Scheduler loop started (interval: {} minutes)",
            interval_minutes
        );

        loop {
            interval.tick().await;

            if !running.load(Ordering::Relaxed) {
                log::info!("Scheduler loop: stopping (running flag is false)");
                break;
            }

            log::debug!("Periodic drain triggered by scheduler");

            match processor.drain().await {
                Ok(report) => {
                    if report.offline || report.already_running {
                        continue;
                    }

                    if report.delivered + report.retried + report.dead_lettered > 0 {
                        log::info!(
                            "Periodic drain: {} delivered, {} retried, {} dead-lettered",
                            report.delivered,
                            report.retried,
                            report.dead_lettered
                        );
                    }

                    {
                        let mut cfg = config.write().await;
                        cfg.last_run = Some(chrono::Utc::now());
                    }

                    if let Err(e) = store.set_preference(CONFIG_KEY, &*config.read().await) {
                        log::error!("Failed to save last_run timestamp: {e}");
                    }
                }
                Err(e) => {
                    log::error!("Periodic drain failed: {e}");
                }
            }
        }

        log::info!("Scheduler loop exited");
    }
}

fn validate_interval(interval_minutes: u64) -> Result<(), SchedulerError> {
    if !(1..=1440).contains(&interval_minutes) {
        return Err(SchedulerError::InvalidInterval(format!(
            "Interval must be 1-1440 minutes, got {}",
            interval_minutes
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
