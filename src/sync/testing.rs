//! Test doubles shared by the sync tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use super::api::{Dispatcher, RemoteApiError};
use crate::db::records::{Booking, ChatMessage, WorkerProfile};

type ErrorFactory = Box<dyn Fn() -> RemoteApiError + Send + Sync>;

/// Programmable [`Dispatcher`] that records every dispatch attempt and
/// can be told to fail the next N attempts of a given action.
pub struct MockDispatcher {
    calls: StdMutex<Vec<String>>,
    failures: StdMutex<HashMap<String, (usize, ErrorFactory)>>,
    delay: StdMutex<Option<Duration>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self {
            calls: StdMutex::new(Vec::new()),
            failures: StdMutex::new(HashMap::new()),
            delay: StdMutex::new(None),
        }
    }

    /// Attempts recorded so far, as `"action:entity_id"` strings in
    /// dispatch order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Fail the next `count` attempts of `action` with a server error.
    pub fn fail_action(&self, action: &str, count: usize) {
        self.fail_action_with(action, count, || {
            RemoteApiError::ServerError("injected failure".to_string())
        });
    }

    /// Fail the next `count` attempts of `action` with a custom error.
    pub fn fail_action_with<F>(&self, action: &str, count: usize, factory: F)
    where
        F: Fn() -> RemoteApiError + Send + Sync + 'static,
    {
        self.failures
            .lock()
            .unwrap()
            .insert(action.to_string(), (count, Box::new(factory)));
    }

    /// Sleep this long inside every dispatch, to widen race windows.
    pub fn delay_dispatch(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn attempt(&self, action: &str, entity_id: &str) -> Result<(), RemoteApiError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls
            .lock()
            .unwrap()
            .push(format!("{action}:{entity_id}"));

        let mut failures = self.failures.lock().unwrap();
        if let Some((remaining, factory)) = failures.get_mut(action) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(factory());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn create_booking(&self, booking: &Booking) -> Result<(), RemoteApiError> {
        self.attempt("create_booking", &booking.id).await
    }

    async fn update_booking(&self, booking: &Booking) -> Result<(), RemoteApiError> {
        self.attempt("update_booking", &booking.id).await
    }

    async fn send_message(&self, message: &ChatMessage) -> Result<(), RemoteApiError> {
        self.attempt("send_message", &message.id).await
    }

    async fn update_profile(&self, profile: &WorkerProfile) -> Result<(), RemoteApiError> {
        self.attempt("update_profile", &profile.id).await
    }
}
