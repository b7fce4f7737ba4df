use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::StoreError;
use crate::transport::{DeliveryError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Who owes the next reply on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    WaitingOnUs,
    WaitingOnVendor,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::WaitingOnUs => "waiting_on_us",
            ThreadStatus::WaitingOnVendor => "waiting_on_vendor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Us,
    Vendor,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Us => "us",
            Actor::Vendor => "vendor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    SelfReminder,
    VendorNudge,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::SelfReminder => "self_reminder",
            ReminderKind::VendorNudge => "vendor_nudge",
        }
    }
}

/// One observed message, immutable once stored. The message id is unique per
/// account; re-ingesting the same id is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub account_id: Uuid,
    pub message_id: String,
    pub provider_thread_id: Option<String>,
    pub subject: String,
    pub normalized_subject: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub direction: Direction,
    pub gateway: Option<String>,
    pub body_preview: String,
    pub observed_at: DateTime<Utc>,
}

/// One logical conversation with a vendor. Mutated on every correlated email
/// and on every fired reminder; never deleted by normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Provider conversation id. Nullable and rebindable: correlation may
    /// discover the provider switched ids mid-conversation and bind the new
    /// one onto this thread.
    pub provider_thread_id: Option<String>,
    pub normalized_subject: String,
    pub subject: String,
    pub gateway: Option<String>,
    pub vendor_address: Option<String>,
    pub vendor_name: Option<String>,
    pub status: ThreadStatus,
    pub last_actor: Actor,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub last_self_reminder_at: Option<DateTime<Utc>>,
    pub last_vendor_nudge_at: Option<DateTime<Utc>>,
    pub self_reminder_count: u32,
    pub vendor_nudge_count: u32,
    pub is_hot: bool,
    pub is_completed: bool,
    pub is_snoozed: bool,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    /// Snooze is only effective while `snoozed_until` lies in the future; an
    /// expired snooze re-enables both reminder tracks.
    pub fn snoozed_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_snoozed {
            return false;
        }
        match self.snoozed_until {
            Some(until) => until > now,
            None => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("classification error: {0}")]
    Classification(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("composition error: {0}")]
    Composition(String),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}
