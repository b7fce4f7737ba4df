use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::types::{EmailRecord, ReminderKind, Thread};

mod rows;
mod schema;

use rows::{
    bool_to_int, email_from_row, format_datetime, format_optional_datetime, join_addresses,
    parse_optional_datetime, read_email_row, read_thread_row, thread_from_row, EMAIL_COLUMNS,
    THREAD_COLUMNS,
};
use schema::TRACKER_SCHEMA;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("uuid parse error: {0}")]
    UuidParse(#[from] uuid::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Durable storage as the engine needs it. Single-row thread updates are the
/// unit of transactionality; callers keep a single-writer-per-account
/// discipline so read-then-write cycles never race themselves.
pub trait EngineStore: Send + Sync {
    fn ping(&self) -> Result<(), StoreError>;

    fn find_thread_by_provider_id(
        &self,
        account_id: Uuid,
        provider_thread_id: &str,
    ) -> Result<Option<Thread>, StoreError>;

    fn find_thread_by_subject(
        &self,
        account_id: Uuid,
        normalized_subject: &str,
    ) -> Result<Option<Thread>, StoreError>;

    fn insert_thread(&self, thread: &Thread) -> Result<(), StoreError>;

    fn update_thread(&self, thread: &Thread) -> Result<(), StoreError>;

    /// Insert keyed by (account, message id); returns `false` when the id was
    /// already present (a silent no-op, not an error).
    fn insert_email_if_absent(&self, email: &EmailRecord) -> Result<bool, StoreError>;

    fn email_exists(&self, account_id: Uuid, message_id: &str) -> Result<bool, StoreError>;

    /// Every non-completed thread of the account.
    fn list_active_threads(&self, account_id: Uuid) -> Result<Vec<Thread>, StoreError>;

    /// Non-completed threads whose snooze (if any) has lapsed by `now`;
    /// the reminder policy applies its timers on top of this set.
    fn list_threads_due_for_reminder(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Thread>, StoreError>;

    fn record_reminder_event(
        &self,
        thread_id: Uuid,
        kind: ReminderKind,
        fired_at: DateTime<Utc>,
        sequence: u32,
    ) -> Result<(), StoreError>;

    fn last_checked_at(&self, account_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn advance_last_checked(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // Monitor queries.

    fn count_emails_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    fn count_threads_created_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    fn count_reminder_events_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Normalized subjects with more than `limit` threads created in the
    /// window, with their thread counts. A non-empty result means the
    /// correlator failed to deduplicate.
    fn duplicate_subject_groups(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(String, u32)>, StoreError>;

    fn list_recent_emails(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<EmailRecord>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteEngineStore {
    path: PathBuf,
}

impl SqliteEngineStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let conn = store.open()?;
        conn.execute_batch(TRACKER_SCHEMA)?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn find_thread_where(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Thread>, StoreError> {
        let conn = self.open()?;
        let sql = format!("SELECT {THREAD_COLUMNS} FROM threads WHERE {clause} LIMIT 1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params, read_thread_row)?;
        match rows.next() {
            Some(row) => Ok(Some(thread_from_row(row?)?)),
            None => Ok(None),
        }
    }

    fn list_threads_where(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Thread>, StoreError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE {clause} ORDER BY last_activity_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, read_thread_row)?;
        let mut threads = Vec::new();
        for row in rows {
            threads.push(thread_from_row(row?)?);
        }
        Ok(threads)
    }

    fn count_where(&self, sql: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(sql, params![format_datetime(since)], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

impl EngineStore for SqliteEngineStore {
    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn find_thread_by_provider_id(
        &self,
        account_id: Uuid,
        provider_thread_id: &str,
    ) -> Result<Option<Thread>, StoreError> {
        self.find_thread_where(
            "account_id = ?1 AND provider_thread_id = ?2",
            params![account_id.to_string(), provider_thread_id],
        )
    }

    fn find_thread_by_subject(
        &self,
        account_id: Uuid,
        normalized_subject: &str,
    ) -> Result<Option<Thread>, StoreError> {
        self.find_thread_where(
            "account_id = ?1 AND normalized_subject = ?2",
            params![account_id.to_string(), normalized_subject],
        )
    }

    fn insert_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO threads (id, account_id, provider_thread_id, normalized_subject,
                subject, gateway, vendor_address, vendor_name, status, last_actor,
                last_inbound_at, last_outbound_at, last_activity_at,
                last_self_reminder_at, last_vendor_nudge_at, self_reminder_count,
                vendor_nudge_count, is_hot, is_completed, is_snoozed, snoozed_until,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                thread.id.to_string(),
                thread.account_id.to_string(),
                thread.provider_thread_id,
                thread.normalized_subject,
                thread.subject,
                thread.gateway,
                thread.vendor_address,
                thread.vendor_name,
                thread.status.as_str(),
                thread.last_actor.as_str(),
                format_optional_datetime(thread.last_inbound_at),
                format_optional_datetime(thread.last_outbound_at),
                format_datetime(thread.last_activity_at),
                format_optional_datetime(thread.last_self_reminder_at),
                format_optional_datetime(thread.last_vendor_nudge_at),
                thread.self_reminder_count as i64,
                thread.vendor_nudge_count as i64,
                bool_to_int(thread.is_hot),
                bool_to_int(thread.is_completed),
                bool_to_int(thread.is_snoozed),
                format_optional_datetime(thread.snoozed_until),
                format_datetime(thread.created_at),
            ],
        )?;
        Ok(())
    }

    fn update_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE threads SET provider_thread_id = ?2, normalized_subject = ?3,
                subject = ?4, gateway = ?5, vendor_address = ?6, vendor_name = ?7,
                status = ?8, last_actor = ?9, last_inbound_at = ?10,
                last_outbound_at = ?11, last_activity_at = ?12,
                last_self_reminder_at = ?13, last_vendor_nudge_at = ?14,
                self_reminder_count = ?15, vendor_nudge_count = ?16, is_hot = ?17,
                is_completed = ?18, is_snoozed = ?19, snoozed_until = ?20
             WHERE id = ?1",
            params![
                thread.id.to_string(),
                thread.provider_thread_id,
                thread.normalized_subject,
                thread.subject,
                thread.gateway,
                thread.vendor_address,
                thread.vendor_name,
                thread.status.as_str(),
                thread.last_actor.as_str(),
                format_optional_datetime(thread.last_inbound_at),
                format_optional_datetime(thread.last_outbound_at),
                format_datetime(thread.last_activity_at),
                format_optional_datetime(thread.last_self_reminder_at),
                format_optional_datetime(thread.last_vendor_nudge_at),
                thread.self_reminder_count as i64,
                thread.vendor_nudge_count as i64,
                bool_to_int(thread.is_hot),
                bool_to_int(thread.is_completed),
                bool_to_int(thread.is_snoozed),
                format_optional_datetime(thread.snoozed_until),
            ],
        )?;
        Ok(())
    }

    fn insert_email_if_absent(&self, email: &EmailRecord) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO emails (account_id, message_id, provider_thread_id,
                subject, normalized_subject, from_address, from_name, to_addresses,
                direction, gateway, body_preview, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                email.account_id.to_string(),
                email.message_id,
                email.provider_thread_id,
                email.subject,
                email.normalized_subject,
                email.from_address,
                email.from_name,
                join_addresses(&email.to_addresses),
                email.direction.as_str(),
                email.gateway,
                email.body_preview,
                format_datetime(email.observed_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn email_exists(&self, account_id: Uuid, message_id: &str) -> Result<bool, StoreError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM emails WHERE account_id = ?1 AND message_id = ?2",
            params![account_id.to_string(), message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_active_threads(&self, account_id: Uuid) -> Result<Vec<Thread>, StoreError> {
        self.list_threads_where(
            "account_id = ?1 AND is_completed = 0",
            params![account_id.to_string()],
        )
    }

    fn list_threads_due_for_reminder(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Thread>, StoreError> {
        self.list_threads_where(
            "account_id = ?1 AND is_completed = 0
                AND (is_snoozed = 0 OR (snoozed_until IS NOT NULL AND snoozed_until <= ?2))",
            params![account_id.to_string(), format_datetime(now)],
        )
    }

    fn record_reminder_event(
        &self,
        thread_id: Uuid,
        kind: ReminderKind,
        fired_at: DateTime<Utc>,
        sequence: u32,
    ) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO reminder_events (thread_id, kind, fired_at, sequence)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                thread_id.to_string(),
                kind.as_str(),
                format_datetime(fired_at),
                sequence as i64,
            ],
        )?;
        Ok(())
    }

    fn last_checked_at(&self, account_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT last_checked_at FROM account_state WHERE account_id = ?1")?;
        let mut rows = stmt.query_map(params![account_id.to_string()], |row| {
            row.get::<_, Option<String>>(0)
        })?;
        match rows.next() {
            Some(row) => Ok(parse_optional_datetime(row?.as_deref())?),
            None => Ok(None),
        }
    }

    fn advance_last_checked(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO account_state (account_id, last_checked_at) VALUES (?1, ?2)
             ON CONFLICT(account_id) DO UPDATE SET last_checked_at = excluded.last_checked_at",
            params![account_id.to_string(), format_datetime(at)],
        )?;
        Ok(())
    }

    fn count_emails_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.count_where("SELECT COUNT(*) FROM emails WHERE observed_at >= ?1", since)
    }

    fn count_threads_created_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.count_where("SELECT COUNT(*) FROM threads WHERE created_at >= ?1", since)
    }

    fn count_reminder_events_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.count_where(
            "SELECT COUNT(*) FROM reminder_events WHERE fired_at >= ?1",
            since,
        )
    }

    fn duplicate_subject_groups(
        &self,
        account_id: Uuid,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(String, u32)>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT normalized_subject, COUNT(*) AS n FROM threads
             WHERE account_id = ?1 AND created_at >= ?2
             GROUP BY normalized_subject
             HAVING n > ?3
             ORDER BY n DESC",
        )?;
        let rows = stmt.query_map(
            params![account_id.to_string(), format_datetime(since), limit as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let mut groups = Vec::new();
        for row in rows {
            let (subject, count) = row?;
            groups.push((subject, count.max(0) as u32));
        }
        Ok(groups)
    }

    fn list_recent_emails(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<EmailRecord>, StoreError> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE observed_at >= ?1
             ORDER BY observed_at DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![format_datetime(since), limit as i64], read_email_row)?;
        let mut emails = Vec::new();
        for row in rows {
            emails.push(email_from_row(row?)?);
        }
        Ok(emails)
    }
}
