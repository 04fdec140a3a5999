//! Typed domain records stored in the local database.
//!
//! One concrete type per collection so required fields (primary keys,
//! foreign keys) are enforced at compile time instead of flowing
//! through as untyped JSON blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Worker Profiles
// ============================================================================

/// A worker's public profile as shown in search results and bookings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProfile {
    /// Stable worker identifier (server-assigned)
    pub id: String,

    pub name: String,

    pub phone: String,

    /// Trade category code, e.g. "MASON", "ELECTRICIAN"
    pub category: String,

    /// Foreign key into the cities collection
    pub city_id: String,

    /// Quoted day rate in the smallest currency unit
    pub daily_rate: i64,

    /// Whether the worker is currently accepting bookings
    pub is_available: bool,

    pub updated_at: DateTime<Utc>,
}

/// Equality filters for profile reads. `None` fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileFilter {
    pub category: Option<String>,
    pub city_id: Option<String>,
    pub is_available: Option<bool>,
}

// ============================================================================
// Bookings
// ============================================================================

/// Booking lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Requested,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "confirmed" => Self::Confirmed,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Requested,
        }
    }
}

/// An employer's booking of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier; client-generated (UUID v4) for offline creation
    pub id: String,

    pub worker_id: String,

    pub employer_id: String,

    /// Trade category code at booking time
    pub category: String,

    pub city_id: String,

    pub status: BookingStatus,

    /// Requested start date (unix seconds kept as a UTC timestamp)
    pub scheduled_for: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub updated_at: DateTime<Utc>,
}

/// Equality filters for booking reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingFilter {
    pub worker_id: Option<String>,
    pub employer_id: Option<String>,
    pub status: Option<BookingStatus>,
}

// ============================================================================
// Chat Messages
// ============================================================================

/// A chat message exchanged within a booking thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier; client-generated (UUID v4) for offline sending
    pub id: String,

    /// Foreign key into the bookings collection
    pub booking_id: String,

    pub sender_id: String,

    pub body: String,

    pub sent_at: DateTime<Utc>,
}

// ============================================================================
// Reference Data
// ============================================================================

/// A serviceable city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// A trade category (mason, plumber, electrician, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCategory {
    pub id: String,
    /// Stable uppercase code used as the profile/booking category key
    pub code: String,
    pub name: String,
}
