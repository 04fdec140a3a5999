//! Remote API client
//!
//! HTTP communication with the LabourLink backend. The endpoint set is
//! fixed: booking creation/update, message sending, profile update.
//! Every response uses the JSON envelope `{ success, data?, message? }`;
//! a non-2xx status or `success: false` both count as dispatch failure.
//!
//! The processor depends on the [`Dispatcher`] trait rather than this
//! concrete client so drain behaviour is testable without a server.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::models::QueuedMutation;
use crate::db::records::{Booking, ChatMessage, WorkerProfile};

/// Response envelope shared by every LabourLink API route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server rejected the request: {0}")]
    Rejected(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("server error: {0}")]
    ServerError(String),

    #[error("invalid response from server")]
    InvalidResponse,
}

/// Delivers queued mutations to the remote system.
///
/// One method per spec'd operation plus the `dispatch` entry point the
/// queue processor uses; the default `dispatch` fans out over the fixed
/// action-to-endpoint mapping.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn create_booking(&self, booking: &Booking) -> Result<(), RemoteApiError>;
    async fn update_booking(&self, booking: &Booking) -> Result<(), RemoteApiError>;
    async fn send_message(&self, message: &ChatMessage) -> Result<(), RemoteApiError>;
    async fn update_profile(&self, profile: &WorkerProfile) -> Result<(), RemoteApiError>;

    async fn dispatch(&self, mutation: &QueuedMutation) -> Result<(), RemoteApiError> {
        match mutation {
            QueuedMutation::CreateBooking(booking) => self.create_booking(booking).await,
            QueuedMutation::UpdateBooking(booking) => self.update_booking(booking).await,
            QueuedMutation::SendMessage(message) => self.send_message(message).await,
            QueuedMutation::UpdateProfile(profile) => self.update_profile(profile).await,
        }
    }
}

/// reqwest-backed API client.
pub struct RemoteApi {
    client: Client,
    base_url: String,
    device_id: String,
    device_name: String,
}

impl RemoteApi {
    /// Create a client for the given base URL. The URL is injected (not
    /// a constant) so tests can point it at a local mock server.
    pub fn new(
        base_url: impl Into<String>,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_id: device_id.into(),
            device_name: device_name.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), RemoteApiError> {
        let response = self
            .client
            .post(self.url(path))
            .header("X-Device-Id", &self.device_id)
            .header("X-Device-Name", &self.device_name)
            .json(body)
            .send()
            .await?;

        check_envelope::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn put_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), RemoteApiError> {
        let response = self
            .client
            .put(self.url(path))
            .header("X-Device-Id", &self.device_id)
            .header("X-Device-Name", &self.device_name)
            .json(body)
            .send()
            .await?;

        check_envelope::<serde_json::Value>(response).await.map(|_| ())
    }
}

#[async_trait]
impl Dispatcher for RemoteApi {
    async fn create_booking(&self, booking: &Booking) -> Result<(), RemoteApiError> {
        self.post_json("/bookings", booking).await
    }

    async fn update_booking(&self, booking: &Booking) -> Result<(), RemoteApiError> {
        self.put_json(&format!("/bookings/{}", booking.id), booking)
            .await
    }

    async fn send_message(&self, message: &ChatMessage) -> Result<(), RemoteApiError> {
        self.post_json("/messages", message).await
    }

    async fn update_profile(&self, profile: &WorkerProfile) -> Result<(), RemoteApiError> {
        self.put_json(&format!("/profiles/{}", profile.id), profile)
            .await
    }
}

/// Parse the response envelope, mapping HTTP status and the `success`
/// flag to errors.
async fn check_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, RemoteApiError> {
    let status = response.status();

    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(match status {
            StatusCode::TOO_MANY_REQUESTS => RemoteApiError::RateLimitExceeded,
            s if s.is_server_error() => RemoteApiError::ServerError(message),
            _ => RemoteApiError::Rejected(format!("{status}: {message}")),
        });
    }

    let envelope: ApiEnvelope<T> = response
        .json()
        .await
        .map_err(|_| RemoteApiError::InvalidResponse)?;

    if envelope.success {
        Ok(envelope.data)
    } else {
        Err(RemoteApiError::Rejected(
            envelope
                .message
                .unwrap_or_else(|| "request not accepted".to_string()),
        ))
    }
}
