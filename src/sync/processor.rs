//! Sync queue processor
//!
//! Drains queued mutations against the remote API whenever connectivity
//! allows. One drain pass loads the due entries FIFO and dispatches them
//! one at a time; a failing entry is retried on a later pass (bounded at
//! max_retries) and never blocks the entries behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::api::Dispatcher;
use super::models::{DrainReport, QueuedMutation};
use super::network::NetworkMonitor;
use super::queue::{MutationQueue, QueueError};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Drives the mutation queue against a [`Dispatcher`].
#[derive(Clone)]
pub struct SyncProcessor {
    queue: MutationQueue,
    dispatcher: Arc<dyn Dispatcher>,
    network: Arc<NetworkMonitor>,
    draining: Arc<AtomicBool>,
}

impl SyncProcessor {
    pub fn new(
        queue: MutationQueue,
        dispatcher: Arc<dyn Dispatcher>,
        network: Arc<NetworkMonitor>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            network,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Persist a mutation and, when online, kick a best-effort drain on a
    /// background task. The caller is never blocked on remote delivery;
    /// the returned id is the queue entry id.
    pub async fn enqueue(&self, mutation: &QueuedMutation) -> Result<i64, ProcessorError> {
        let id = self.queue.enqueue(mutation)?;

        if self.network.is_online() {
            let processor = self.clone();
            tokio::spawn(async move {
                if let Err(e) = processor.drain().await {
                    log::warn!("Post-enqueue drain failed: {e}");
                }
            });
        }

        Ok(id)
    }

    /// Attempt to deliver every due queue entry, in enqueue order.
    ///
    /// No-op while offline. Guarded so overlapping triggers (periodic
    /// timer vs. connectivity event) cannot run two passes at once.
    ///
    /// Delivery is at-least-once, not exactly-once: the remote call
    /// happens before the local entry is deleted, so a crash between the
    /// two redelivers the mutation on the next pass.
    pub async fn drain(&self) -> Result<DrainReport, ProcessorError> {
        if !self.network.is_online() {
            log::debug!("Drain skipped: offline");
            return Ok(DrainReport {
                offline: true,
                ..Default::default()
            });
        }

        // Single-flight guard
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Drain skipped: another pass is running");
            return Ok(DrainReport {
                already_running: true,
                ..Default::default()
            });
        }

        let result = self.drain_pass().await;
        self.draining.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_pass(&self) -> Result<DrainReport, ProcessorError> {
        let entries = self.queue.due_entries(chrono::Utc::now())?;
        if entries.is_empty() {
            return Ok(DrainReport::default());
        }

        log::info!("Draining {} queued mutation(s)", entries.len());
        let mut report = DrainReport::default();

        for entry in entries {
            match self.dispatcher.dispatch(&entry.mutation).await {
                Ok(()) => {
                    // Remote applied; a failure to delete here means the
                    // entry is redelivered next pass (at-least-once).
                    match self.queue.remove(entry.id) {
                        Ok(()) => {
                            log::info!(
                                "Delivered queue entry {} ({})",
                                entry.id,
                                entry.mutation.kind()
                            );
                            report.delivered += 1;
                        }
                        Err(e) => {
                            log::error!(
                                "Delivered entry {} but failed to dequeue it: {e}",
                                entry.id
                            );
                        }
                    }
                }
                Err(e) => {
                    // A poison entry must not starve the rest of the pass
                    let error = e.to_string();
                    if entry.retry_count + 1 >= entry.max_retries {
                        if let Err(e) = self.queue.dead_letter(&entry, &error) {
                            log::error!("Failed to dead-letter entry {}: {e}", entry.id);
                        } else {
                            report.dead_lettered += 1;
                        }
                    } else {
                        if let Err(e) = self.queue.mark_failed(entry.id, &error) {
                            log::error!("Failed to record retry for entry {}: {e}", entry.id);
                        } else {
                            report.retried += 1;
                        }
                    }
                }
            }
        }

        log::info!(
            "Drain pass complete: {} delivered, {} retried, {} dead-lettered",
            report.delivered,
            report.retried,
            report.dead_lettered
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::records::{Booking, BookingStatus, ChatMessage};
    use crate::db::LocalStore;
    use crate::sync::api::RemoteApiError;
    use crate::sync::models::RetryPolicy;
    use crate::sync::testing::MockDispatcher;
    use chrono::{TimeZone, Utc};

    fn booking(id: &str) -> Booking {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Booking {
            id: id.to_string(),
            worker_id: "w1".to_string(),
            employer_id: "e1".to_string(),
            category: "MASON".to_string(),
            city_id: "c1".to_string(),
            status: BookingStatus::Requested,
            scheduled_for: now,
            notes: None,
            updated_at: now,
        }
    }

    fn message(id: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            booking_id: "b1".to_string(),
            sender_id: "e1".to_string(),
            body: "hello".to_string(),
            sent_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn processor(
        dispatcher: Arc<MockDispatcher>,
        online: bool,
    ) -> (SyncProcessor, Arc<NetworkMonitor>) {
        let store = LocalStore::in_memory().unwrap();
        let queue = MutationQueue::new(store, RetryPolicy::immediate());
        let network = Arc::new(NetworkMonitor::new(online));
        (
            SyncProcessor::new(queue, dispatcher, network.clone()),
            network,
        )
    }

    /// Delegates to the inner mock, but after the first successful
    /// dispatch replaces the queue row (delete + re-enqueue under a new
    /// id). The processor then fails to dequeue the delivered entry,
    /// which is exactly the window between remote success and local
    /// removal that a crash would leave behind.
    struct RowSwappingDispatcher {
        inner: Arc<MockDispatcher>,
        queue: MutationQueue,
        armed: AtomicBool,
    }

    impl RowSwappingDispatcher {
        fn swap_row(&self) {
            if !self.armed.swap(false, Ordering::SeqCst) {
                return;
            }
            let entries = self.queue.all_entries().unwrap();
            let entry = &entries[0];
            self.queue.remove(entry.id).unwrap();
            self.queue.enqueue(&entry.mutation).unwrap();
        }
    }

    #[async_trait::async_trait]
    impl crate::sync::api::Dispatcher for RowSwappingDispatcher {
        async fn create_booking(&self, booking: &Booking) -> Result<(), RemoteApiError> {
            self.inner.create_booking(booking).await?;
            self.swap_row();
            Ok(())
        }

        async fn update_booking(&self, booking: &Booking) -> Result<(), RemoteApiError> {
            self.inner.update_booking(booking).await
        }

        async fn send_message(
            &self,
            message: &ChatMessage,
        ) -> Result<(), RemoteApiError> {
            self.inner.send_message(message).await
        }

        async fn update_profile(
            &self,
            profile: &crate::db::records::WorkerProfile,
        ) -> Result<(), RemoteApiError> {
            self.inner.update_profile(profile).await
        }
    }

    #[tokio::test]
    async fn test_delivery_is_at_least_once_when_dequeue_fails() {
        let mock = Arc::new(MockDispatcher::new());
        let store = LocalStore::in_memory().unwrap();
        let queue = MutationQueue::new(store, RetryPolicy::immediate());
        let dispatcher = Arc::new(RowSwappingDispatcher {
            inner: mock.clone(),
            queue: queue.clone(),
            armed: AtomicBool::new(true),
        });
        let network = Arc::new(NetworkMonitor::new(true));
        let processor = SyncProcessor::new(queue, dispatcher, network);

        processor
            .queue()
            .enqueue(&QueuedMutation::CreateBooking(booking("b1")))
            .unwrap();

        // First pass: the remote accepted the mutation, but the local
        // entry could not be dequeued; it stays in the queue.
        let first = processor.drain().await.unwrap();
        assert_eq!(first.delivered, 0);
        assert_eq!(processor.queue().stats().unwrap().pending_count, 1);

        // Second pass redelivers the same mutation. Two dispatches for
        // one logical write: at-least-once, never exactly-once.
        let second = processor.drain().await.unwrap();
        assert_eq!(second.delivered, 1);
        assert_eq!(mock.calls(), vec!["create_booking:b1", "create_booking:b1"]);
        assert_eq!(processor.queue().stats().unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn test_drain_is_noop_while_offline() {
        let dispatcher = Arc::new(MockDispatcher::new());
        let (processor, _network) = processor(dispatcher.clone(), false);

        processor
            .queue()
            .enqueue(&QueuedMutation::CreateBooking(booking("b1")))
            .unwrap();

        let report = processor.drain().await.unwrap();
        assert!(report.offline);
        assert_eq!(dispatcher.calls().len(), 0);
        assert_eq!(processor.queue().stats().unwrap().pending_count, 1);
    }

    #[tokio::test]
    async fn test_successful_drain_empties_queue_in_order() {
        let dispatcher = Arc::new(MockDispatcher::new());
        let (processor, _network) = processor(dispatcher.clone(), true);

        processor
            .queue()
            .enqueue(&QueuedMutation::CreateBooking(booking("b1")))
            .unwrap();
        processor
            .queue()
            .enqueue(&QueuedMutation::SendMessage(message("m1")))
            .unwrap();

        let report = processor.drain().await.unwrap();
        assert_eq!(report.delivered, 2);

        let calls = dispatcher.calls();
        assert_eq!(calls, vec!["create_booking:b1", "send_message:m1"]);
        assert_eq!(processor.queue().stats().unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn test_failing_entry_does_not_block_later_entries() {
        // Entry A fails, entry B succeeds within the same pass
        let dispatcher = Arc::new(MockDispatcher::new());
        dispatcher.fail_action("create_booking", usize::MAX);
        let (processor, _network) = processor(dispatcher.clone(), true);

        processor
            .queue()
            .enqueue(&QueuedMutation::CreateBooking(booking("a")))
            .unwrap();
        processor
            .queue()
            .enqueue(&QueuedMutation::SendMessage(message("b")))
            .unwrap();

        let report = processor.drain().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.retried, 1);

        let remaining = processor.queue().all_entries().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].mutation.kind(), "create_booking");
        assert_eq!(remaining[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_dead_letters_after_three_passes() {
        let dispatcher = Arc::new(MockDispatcher::new());
        dispatcher.fail_action("send_message", usize::MAX);
        let (processor, _network) = processor(dispatcher.clone(), true);

        processor
            .queue()
            .enqueue(&QueuedMutation::SendMessage(message("m1")))
            .unwrap();

        let first = processor.drain().await.unwrap();
        assert_eq!(first.retried, 1);
        let second = processor.drain().await.unwrap();
        assert_eq!(second.retried, 1);
        let third = processor.drain().await.unwrap();
        assert_eq!(third.dead_lettered, 1);

        let stats = processor.queue().stats().unwrap();
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.dead_letter_count, 1);

        // Exactly 3 dispatch attempts, never a fourth
        let fourth = processor.drain().await.unwrap();
        assert_eq!(fourth.delivered + fourth.retried + fourth.dead_lettered, 0);
        assert_eq!(dispatcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let dispatcher = Arc::new(MockDispatcher::new());
        dispatcher.fail_action("send_message", 1);
        let (processor, _network) = processor(dispatcher.clone(), true);

        processor
            .queue()
            .enqueue(&QueuedMutation::SendMessage(message("m1")))
            .unwrap();

        assert_eq!(processor.drain().await.unwrap().retried, 1);
        assert_eq!(processor.drain().await.unwrap().delivered, 1);
        assert_eq!(processor.queue().stats().unwrap().pending_count, 0);
    }

    #[tokio::test]
    async fn test_enqueue_kicks_drain_when_online() {
        let dispatcher = Arc::new(MockDispatcher::new());
        let (processor, _network) = processor(dispatcher.clone(), true);

        processor
            .enqueue(&QueuedMutation::CreateBooking(booking("b1")))
            .await
            .unwrap();

        // The spawned drain is best-effort; give it a moment
        for _ in 0..50 {
            if processor.queue().stats().unwrap().pending_count == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(processor.queue().stats().unwrap().pending_count, 0);
        assert_eq!(dispatcher.calls(), vec!["create_booking:b1"]);
    }

    #[tokio::test]
    async fn test_enqueue_while_offline_does_not_dispatch() {
        let dispatcher = Arc::new(MockDispatcher::new());
        let (processor, _network) = processor(dispatcher.clone(), false);

        processor
            .enqueue(&QueuedMutation::CreateBooking(booking("b1")))
            .await
            .unwrap();
        processor
            .enqueue(&QueuedMutation::SendMessage(message("m1")))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(dispatcher.calls().len(), 0);

        // Queue holds exactly the enqueued entries, in order
        let entries = processor.queue().all_entries().unwrap();
        let kinds: Vec<&str> = entries.iter().map(|e| e.mutation.kind()).collect();
        assert_eq!(kinds, vec!["create_booking", "send_message"]);
    }

    #[tokio::test]
    async fn test_overlapping_drains_single_flight() {
        let dispatcher = Arc::new(MockDispatcher::new());
        dispatcher.delay_dispatch(std::time::Duration::from_millis(100));
        let (processor, _network) = processor(dispatcher.clone(), true);

        processor
            .queue()
            .enqueue(&QueuedMutation::CreateBooking(booking("b1")))
            .unwrap();

        let slow = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.drain().await.unwrap() })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Second trigger while the first pass is mid-dispatch
        let overlapping = processor.drain().await.unwrap();
        assert!(overlapping.already_running);

        let first = slow.await.unwrap();
        assert_eq!(first.delivered, 1);
        // The entry was dispatched exactly once
        assert_eq!(dispatcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_error_kinds_are_all_retryable() {
        // Both transport-style and envelope-style failures count the same
        let dispatcher = Arc::new(MockDispatcher::new());
        dispatcher.fail_action_with(
            "send_message",
            1,
            || RemoteApiError::Rejected("booking closed".to_string()),
        );
        let (processor, _network) = processor(dispatcher.clone(), true);

        processor
            .queue()
            .enqueue(&QueuedMutation::SendMessage(message("m1")))
            .unwrap();

        assert_eq!(processor.drain().await.unwrap().retried, 1);
        let entries = processor.queue().all_entries().unwrap();
        assert!(entries[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("booking closed"));
    }
}
