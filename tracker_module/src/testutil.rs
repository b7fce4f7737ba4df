//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use crate::config::AccountConfig;
use crate::store::SqliteEngineStore;
use crate::subject::normalize_subject;
use crate::types::{Actor, Direction, EmailRecord, Thread, ThreadStatus};

pub(crate) fn sample_account() -> AccountConfig {
    AccountConfig {
        id: Uuid::parse_str("4fd1b7c6-5f2a-4f4e-9f3e-0a8de0cbe401").expect("uuid"),
        name: "acme-onboarding".to_string(),
        mailbox_address: "onboarding@acme.example".to_string(),
        operator_address: "ops@acme.example".to_string(),
        timezone: "Asia/Kolkata".to_string(),
        poll_interval_minutes: 5,
        self_reminder_minutes: 30,
        vendor_nudge_minutes: 180,
        active: true,
        gateways: Vec::new(),
        lookback_days: 30,
    }
}

/// Tuesday 2026-03-10 10:00 IST — squarely inside working hours.
pub(crate) fn working_hours_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 4, 30, 0).single().expect("valid")
}

pub(crate) fn store_in(dir: &TempDir) -> SqliteEngineStore {
    SqliteEngineStore::new(dir.path().join("tracker.db")).expect("store")
}

pub(crate) fn sample_thread(account_id: Uuid) -> Thread {
    let now = working_hours_instant();
    Thread {
        id: Uuid::new_v4(),
        account_id,
        provider_thread_id: None,
        normalized_subject: "merchant kyc required".to_string(),
        subject: "Merchant KYC Required".to_string(),
        gateway: Some("razorpay".to_string()),
        vendor_address: Some("onboarding@razorpay.com".to_string()),
        vendor_name: Some("Razorpay Onboarding".to_string()),
        status: ThreadStatus::WaitingOnUs,
        last_actor: Actor::Vendor,
        last_inbound_at: Some(now),
        last_outbound_at: None,
        last_activity_at: now,
        last_self_reminder_at: None,
        last_vendor_nudge_at: None,
        self_reminder_count: 0,
        vendor_nudge_count: 0,
        is_hot: false,
        is_completed: false,
        is_snoozed: false,
        snoozed_until: None,
        created_at: now,
    }
}

pub(crate) fn sample_email(account_id: Uuid, message_id: &str) -> EmailRecord {
    inbound_record(account_id, message_id, "Merchant KYC Required", None)
}

pub(crate) fn inbound_record(
    account_id: Uuid,
    message_id: &str,
    subject: &str,
    provider_thread_id: Option<&str>,
) -> EmailRecord {
    EmailRecord {
        account_id,
        message_id: message_id.to_string(),
        provider_thread_id: provider_thread_id.map(str::to_string),
        subject: subject.to_string(),
        normalized_subject: normalize_subject(subject),
        from_address: "onboarding@razorpay.com".to_string(),
        from_name: Some("Razorpay Onboarding".to_string()),
        to_addresses: vec!["onboarding@acme.example".to_string()],
        direction: Direction::Inbound,
        gateway: Some("razorpay".to_string()),
        body_preview: "Please share the pending KYC documents.".to_string(),
        observed_at: working_hours_instant(),
    }
}

pub(crate) fn outbound_record(account_id: Uuid, message_id: &str, subject: &str) -> EmailRecord {
    EmailRecord {
        account_id,
        message_id: message_id.to_string(),
        provider_thread_id: None,
        subject: subject.to_string(),
        normalized_subject: normalize_subject(subject),
        from_address: "onboarding@acme.example".to_string(),
        from_name: None,
        to_addresses: vec!["onboarding@razorpay.com".to_string()],
        direction: Direction::Outbound,
        gateway: None,
        body_preview: "Documents attached.".to_string(),
        observed_at: working_hours_instant(),
    }
}
