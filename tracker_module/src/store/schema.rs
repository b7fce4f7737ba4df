pub(super) const TRACKER_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    provider_thread_id TEXT,
    normalized_subject TEXT NOT NULL,
    subject TEXT NOT NULL,
    gateway TEXT,
    vendor_address TEXT,
    vendor_name TEXT,
    status TEXT NOT NULL,
    last_actor TEXT NOT NULL,
    last_inbound_at TEXT,
    last_outbound_at TEXT,
    last_activity_at TEXT NOT NULL,
    last_self_reminder_at TEXT,
    last_vendor_nudge_at TEXT,
    self_reminder_count INTEGER NOT NULL DEFAULT 0,
    vendor_nudge_count INTEGER NOT NULL DEFAULT 0,
    is_hot INTEGER NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0,
    is_snoozed INTEGER NOT NULL DEFAULT 0,
    snoozed_until TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_account_subject
    ON threads(account_id, normalized_subject);
CREATE INDEX IF NOT EXISTS idx_threads_account_provider
    ON threads(account_id, provider_thread_id);

CREATE TABLE IF NOT EXISTS emails (
    account_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    provider_thread_id TEXT,
    subject TEXT NOT NULL,
    normalized_subject TEXT NOT NULL,
    from_address TEXT NOT NULL,
    from_name TEXT,
    to_addresses TEXT NOT NULL,
    direction TEXT NOT NULL,
    gateway TEXT,
    body_preview TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    PRIMARY KEY (account_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_emails_observed_at ON emails(observed_at);

CREATE TABLE IF NOT EXISTS reminder_events (
    thread_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    fired_at TEXT NOT NULL,
    sequence INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reminder_events_fired_at ON reminder_events(fired_at);

CREATE TABLE IF NOT EXISTS account_state (
    account_id TEXT PRIMARY KEY,
    last_checked_at TEXT
);
";
