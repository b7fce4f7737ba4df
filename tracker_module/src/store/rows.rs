use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{Actor, Direction, EmailRecord, Thread, ThreadStatus};

use super::StoreError;

pub(super) fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(super) fn format_optional_datetime(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub(super) fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(super) fn parse_optional_datetime(
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match value {
        Some(raw) => Ok(Some(parse_datetime(raw)?)),
        None => Ok(None),
    }
}

pub(super) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(super) fn join_addresses(values: &[String]) -> String {
    values.join("\n")
}

pub(super) fn split_addresses(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .collect()
}

fn parse_status(raw: &str) -> Result<ThreadStatus, StoreError> {
    match raw {
        "waiting_on_us" => Ok(ThreadStatus::WaitingOnUs),
        "waiting_on_vendor" => Ok(ThreadStatus::WaitingOnVendor),
        other => Err(StoreError::Corrupt(format!("unknown status {other:?}"))),
    }
}

fn parse_actor(raw: &str) -> Result<Actor, StoreError> {
    match raw {
        "us" => Ok(Actor::Us),
        "vendor" => Ok(Actor::Vendor),
        other => Err(StoreError::Corrupt(format!("unknown actor {other:?}"))),
    }
}

fn parse_direction(raw: &str) -> Result<Direction, StoreError> {
    match raw {
        "inbound" => Ok(Direction::Inbound),
        "outbound" => Ok(Direction::Outbound),
        other => Err(StoreError::Corrupt(format!("unknown direction {other:?}"))),
    }
}

/// Raw `threads` row, column order matching `THREAD_COLUMNS`.
pub(super) type ThreadRow = (
    String,         // id
    String,         // account_id
    Option<String>, // provider_thread_id
    String,         // normalized_subject
    String,         // subject
    Option<String>, // gateway
    Option<String>, // vendor_address
    Option<String>, // vendor_name
    String,         // status
    String,         // last_actor
    Option<String>, // last_inbound_at
    Option<String>, // last_outbound_at
    String,         // last_activity_at
    Option<String>, // last_self_reminder_at
    Option<String>, // last_vendor_nudge_at
    i64,            // self_reminder_count
    i64,            // vendor_nudge_count
    i64,            // is_hot
    i64,            // is_completed
    i64,            // is_snoozed
    Option<String>, // snoozed_until
    String,         // created_at
);

pub(super) const THREAD_COLUMNS: &str = "id, account_id, provider_thread_id, \
    normalized_subject, subject, gateway, vendor_address, vendor_name, status, \
    last_actor, last_inbound_at, last_outbound_at, last_activity_at, \
    last_self_reminder_at, last_vendor_nudge_at, self_reminder_count, \
    vendor_nudge_count, is_hot, is_completed, is_snoozed, snoozed_until, created_at";

pub(super) fn read_thread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
        row.get(15)?,
        row.get(16)?,
        row.get(17)?,
        row.get(18)?,
        row.get(19)?,
        row.get(20)?,
        row.get(21)?,
    ))
}

pub(super) fn thread_from_row(row: ThreadRow) -> Result<Thread, StoreError> {
    Ok(Thread {
        id: Uuid::parse_str(&row.0)?,
        account_id: Uuid::parse_str(&row.1)?,
        provider_thread_id: row.2,
        normalized_subject: row.3,
        subject: row.4,
        gateway: row.5,
        vendor_address: row.6,
        vendor_name: row.7,
        status: parse_status(&row.8)?,
        last_actor: parse_actor(&row.9)?,
        last_inbound_at: parse_optional_datetime(row.10.as_deref())?,
        last_outbound_at: parse_optional_datetime(row.11.as_deref())?,
        last_activity_at: parse_datetime(&row.12)?,
        last_self_reminder_at: parse_optional_datetime(row.13.as_deref())?,
        last_vendor_nudge_at: parse_optional_datetime(row.14.as_deref())?,
        self_reminder_count: row.15.max(0) as u32,
        vendor_nudge_count: row.16.max(0) as u32,
        is_hot: row.17 != 0,
        is_completed: row.18 != 0,
        is_snoozed: row.19 != 0,
        snoozed_until: parse_optional_datetime(row.20.as_deref())?,
        created_at: parse_datetime(&row.21)?,
    })
}

/// Raw `emails` row, column order matching `EMAIL_COLUMNS`.
pub(super) type EmailRow = (
    String,         // account_id
    String,         // message_id
    Option<String>, // provider_thread_id
    String,         // subject
    String,         // normalized_subject
    String,         // from_address
    Option<String>, // from_name
    String,         // to_addresses
    String,         // direction
    Option<String>, // gateway
    String,         // body_preview
    String,         // observed_at
);

pub(super) const EMAIL_COLUMNS: &str = "account_id, message_id, provider_thread_id, \
    subject, normalized_subject, from_address, from_name, to_addresses, direction, \
    gateway, body_preview, observed_at";

pub(super) fn read_email_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmailRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

pub(super) fn email_from_row(row: EmailRow) -> Result<EmailRecord, StoreError> {
    Ok(EmailRecord {
        account_id: Uuid::parse_str(&row.0)?,
        message_id: row.1,
        provider_thread_id: row.2,
        subject: row.3,
        normalized_subject: row.4,
        from_address: row.5,
        from_name: row.6,
        to_addresses: split_addresses(&row.7),
        direction: parse_direction(&row.8)?,
        gateway: row.9,
        body_preview: row.10,
        observed_at: parse_datetime(&row.11)?,
    })
}
