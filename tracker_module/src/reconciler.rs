//! Per-account ingestion pass: fetch what the mailbox saw, drop the noise,
//! classify, correlate, persist. Each pass is idempotent — the same message
//! id is never stored or threaded twice.

use std::sync::OnceLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::AccountConfig;
use crate::correlator::correlate;
use crate::gateway::GatewayClassifier;
use crate::store::EngineStore;
use crate::subject::normalize_subject;
use crate::transport::{FetchedEmail, MailTransport};
use crate::types::{Direction, EmailRecord, EngineError};

/// Subjects that mark tracker-generated or workflow-notification mail. These
/// must never create or advance threads; a persisted email matching this is a
/// pre-filter failure the health monitor flags.
fn system_subject() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(reminder|action required|reply needed)|^\s*[⏰🔔⚠️✅]")
            .expect("valid regex")
    })
}

pub fn is_system_subject(subject: &str) -> bool {
    system_subject().is_match(subject)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub new_emails: usize,
    pub new_threads: usize,
    pub skipped: usize,
}

pub struct Reconciler<'a> {
    pub store: &'a dyn EngineStore,
    pub transport: &'a dyn MailTransport,
    pub classifier: &'a dyn GatewayClassifier,
}

impl<'a> Reconciler<'a> {
    pub fn reconcile(
        &self,
        account: &AccountConfig,
        now: DateTime<Utc>,
    ) -> Result<ReconcileSummary, EngineError> {
        let lookback_floor = now - ChronoDuration::days(account.lookback_days);
        let since = self
            .store
            .last_checked_at(account.id)?
            .map(|at| at.max(lookback_floor))
            .unwrap_or(lookback_floor);

        let inbound = self.transport.fetch_inbound(account, since)?;
        let outbound = self.transport.fetch_outbound(account, since)?;

        // Replay in observed order so a reply arriving between two fetches
        // still lands on the correct final status.
        let mut batch: Vec<(Direction, FetchedEmail)> = inbound
            .into_iter()
            .map(|email| (Direction::Inbound, email))
            .chain(outbound.into_iter().map(|email| (Direction::Outbound, email)))
            .collect();
        batch.sort_by_key(|(_, email)| email.observed_at);

        let mut summary = ReconcileSummary::default();
        for (direction, email) in batch {
            match self.ingest_one(account, direction, &email, &mut summary) {
                Ok(()) => {}
                Err(EngineError::Persistence(err)) => {
                    // One bad row must not sink the rest of the batch.
                    warn!(
                        account = %account.name,
                        message_id = %email.message_id,
                        "persistence failed, skipping email: {err}"
                    );
                    summary.skipped += 1;
                }
                Err(other) => return Err(other),
            }
        }

        // Advanced even on an empty batch: staleness tracking means "did we
        // poll", not "did we find anything".
        self.store.advance_last_checked(account.id, now)?;
        debug!(
            account = %account.name,
            new_emails = summary.new_emails,
            new_threads = summary.new_threads,
            skipped = summary.skipped,
            "reconcile complete"
        );
        Ok(summary)
    }

    fn ingest_one(
        &self,
        account: &AccountConfig,
        direction: Direction,
        email: &FetchedEmail,
        summary: &mut ReconcileSummary,
    ) -> Result<(), EngineError> {
        if self.prefiltered(account, email) {
            summary.skipped += 1;
            return Ok(());
        }

        match direction {
            Direction::Inbound => self.ingest_inbound(account, email, summary),
            Direction::Outbound => self.ingest_outbound(account, email, summary),
        }
    }

    /// Drops tracker-generated notifications and operator loopback mail
    /// before any of it can masquerade as conversation activity.
    fn prefiltered(&self, account: &AccountConfig, email: &FetchedEmail) -> bool {
        if is_system_subject(&email.subject) {
            return true;
        }
        let operator = account.operator_address.to_lowercase();
        if email.from_address.to_lowercase() == operator {
            return true;
        }
        email
            .to_addresses
            .iter()
            .any(|to| to.to_lowercase() == operator)
    }

    fn ingest_inbound(
        &self,
        account: &AccountConfig,
        email: &FetchedEmail,
        summary: &mut ReconcileSummary,
    ) -> Result<(), EngineError> {
        let Some(gateway) = self.classifier.classify(email, &account.gateways) else {
            // Not vendor correspondence; never persisted, never threaded.
            summary.skipped += 1;
            return Ok(());
        };
        if self.store.email_exists(account.id, &email.message_id)? {
            summary.skipped += 1;
            return Ok(());
        }
        let identity = self.classifier.extract_vendor_identity(email);
        let record = EmailRecord {
            account_id: account.id,
            message_id: email.message_id.clone(),
            provider_thread_id: email.provider_thread_id.clone(),
            subject: email.subject.clone(),
            normalized_subject: normalize_subject(&email.subject),
            from_address: identity.address,
            from_name: identity.name,
            to_addresses: email.to_addresses.clone(),
            direction: Direction::Inbound,
            gateway: Some(gateway),
            body_preview: email.body_preview.clone(),
            observed_at: email.observed_at,
        };

        // Thread write first, email row second: if the thread update fails,
        // the message must stay unseen so the next tick replays it.
        let outcome = correlate(self.store, account.id, &record)?;
        self.store.insert_email_if_absent(&record)?;
        summary.new_emails += 1;
        if outcome.is_new {
            summary.new_threads += 1;
        }
        Ok(())
    }

    /// Outbound mail only advances threads that already exist; a conversation
    /// must originate from a gateway-classified inbound email.
    fn ingest_outbound(
        &self,
        account: &AccountConfig,
        email: &FetchedEmail,
        summary: &mut ReconcileSummary,
    ) -> Result<(), EngineError> {
        if self.store.email_exists(account.id, &email.message_id)? {
            summary.skipped += 1;
            return Ok(());
        }
        let normalized = normalize_subject(&email.subject);
        let matched = match email.provider_thread_id.as_deref() {
            Some(provider_id) => self
                .store
                .find_thread_by_provider_id(account.id, provider_id)?
                .is_some(),
            None => false,
        } || self
            .store
            .find_thread_by_subject(account.id, &normalized)?
            .is_some();
        if !matched {
            summary.skipped += 1;
            return Ok(());
        }

        let record = EmailRecord {
            account_id: account.id,
            message_id: email.message_id.clone(),
            provider_thread_id: email.provider_thread_id.clone(),
            subject: email.subject.clone(),
            normalized_subject: normalized,
            from_address: email.from_address.clone(),
            from_name: email.from_name.clone(),
            to_addresses: email.to_addresses.clone(),
            direction: Direction::Outbound,
            gateway: None,
            body_preview: email.body_preview.clone(),
            observed_at: email.observed_at,
        };

        correlate(self.store, account.id, &record)?;
        self.store.insert_email_if_absent(&record)?;
        summary.new_emails += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::KeywordClassifier;
    use crate::store::StoreError;
    use crate::testutil::{sample_account, store_in, working_hours_instant};
    use crate::transport::{DeliveryError, OutgoingEmail, TransportError};
    use crate::types::{ReminderKind, Thread, ThreadStatus};
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeTransport {
        inbound: Vec<FetchedEmail>,
        outbound: Vec<FetchedEmail>,
    }

    impl MailTransport for FakeTransport {
        fn fetch_inbound(
            &self,
            _account: &AccountConfig,
            _since: DateTime<Utc>,
        ) -> Result<Vec<FetchedEmail>, TransportError> {
            Ok(self.inbound.clone())
        }

        fn fetch_outbound(
            &self,
            _account: &AccountConfig,
            _since: DateTime<Utc>,
        ) -> Result<Vec<FetchedEmail>, TransportError> {
            Ok(self.outbound.clone())
        }

        fn deliver(
            &self,
            _account: &AccountConfig,
            _message: &OutgoingEmail,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn fetched(message_id: &str, from: &str, to: &str, subject: &str) -> FetchedEmail {
        FetchedEmail {
            message_id: message_id.to_string(),
            provider_thread_id: None,
            subject: subject.to_string(),
            from_address: from.to_string(),
            from_name: None,
            to_addresses: vec![to.to_string()],
            body_preview: String::new(),
            observed_at: working_hours_instant(),
        }
    }

    fn run(
        transport: &FakeTransport,
        store: &crate::store::SqliteEngineStore,
        account: &AccountConfig,
        now: DateTime<Utc>,
    ) -> ReconcileSummary {
        let classifier = KeywordClassifier;
        let reconciler = Reconciler {
            store,
            transport,
            classifier: &classifier,
        };
        reconciler.reconcile(account, now).expect("reconcile")
    }

    #[test]
    fn classified_inbound_creates_thread() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let account = sample_account();
        let transport = FakeTransport {
            inbound: vec![fetched(
                "msg-1",
                "onboarding@razorpay.com",
                &account.mailbox_address,
                "Merchant KYC Required",
            )],
            ..Default::default()
        };

        let summary = run(&transport, &store, &account, working_hours_instant());
        assert_eq!(summary.new_emails, 1);
        assert_eq!(summary.new_threads, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn unclassified_inbound_is_discarded_not_persisted() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let account = sample_account();
        let transport = FakeTransport {
            inbound: vec![fetched(
                "msg-1",
                "friend@gmail.com",
                &account.mailbox_address,
                "lunch on friday?",
            )],
            ..Default::default()
        };

        let now = working_hours_instant();
        let summary = run(&transport, &store, &account, now);
        assert_eq!(summary.new_emails, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            store
                .count_emails_since(now - ChronoDuration::days(1))
                .expect("count"),
            0
        );
    }

    #[test]
    fn system_and_loopback_mail_is_prefiltered() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let account = sample_account();
        let transport = FakeTransport {
            inbound: vec![
                fetched(
                    "msg-1",
                    "onboarding@razorpay.com",
                    &account.mailbox_address,
                    "⏰ Action required: Merchant KYC Required",
                ),
                fetched(
                    "msg-2",
                    "onboarding@razorpay.com",
                    &account.mailbox_address,
                    "Reminder: your razorpay dashboard",
                ),
                fetched(
                    "msg-3",
                    &account.operator_address,
                    &account.mailbox_address,
                    "internal note about razorpay",
                ),
            ],
            outbound: vec![fetched(
                "msg-4",
                &account.mailbox_address,
                &account.operator_address,
                "forwarding the razorpay thread",
            )],
        };

        let summary = run(&transport, &store, &account, working_hours_instant());
        assert_eq!(summary.new_emails, 0);
        assert_eq!(summary.skipped, 4);
    }

    #[test]
    fn reingesting_same_message_id_is_a_noop() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let account = sample_account();
        let transport = FakeTransport {
            inbound: vec![fetched(
                "msg-1",
                "onboarding@razorpay.com",
                &account.mailbox_address,
                "Merchant KYC Required",
            )],
            ..Default::default()
        };

        let now = working_hours_instant();
        let first = run(&transport, &store, &account, now);
        assert_eq!(first.new_emails, 1);

        let second = run(&transport, &store, &account, now + ChronoDuration::minutes(5));
        assert_eq!(second.new_emails, 0);
        assert_eq!(second.new_threads, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(store.list_active_threads(account.id).expect("list").len(), 1);
    }

    #[test]
    fn unmatched_outbound_never_opens_a_thread() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let account = sample_account();
        let transport = FakeTransport {
            outbound: vec![fetched(
                "msg-1",
                &account.mailbox_address,
                "someone@razorpay.com",
                "Question about settlement cycles",
            )],
            ..Default::default()
        };

        let now = working_hours_instant();
        let summary = run(&transport, &store, &account, now);
        assert_eq!(summary.new_emails, 0);
        assert_eq!(summary.skipped, 1);
        assert!(store.list_active_threads(account.id).expect("list").is_empty());
    }

    #[test]
    fn outbound_reply_advances_existing_thread() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let account = sample_account();
        let now = working_hours_instant();

        let opening = fetched(
            "msg-1",
            "onboarding@razorpay.com",
            &account.mailbox_address,
            "Merchant KYC Required",
        );
        let mut reply = fetched(
            "msg-2",
            &account.mailbox_address,
            "onboarding@razorpay.com",
            "Re: Merchant KYC Required",
        );
        reply.observed_at = opening.observed_at + ChronoDuration::minutes(40);

        let transport = FakeTransport {
            inbound: vec![opening],
            outbound: vec![reply],
        };
        let summary = run(&transport, &store, &account, now);
        assert_eq!(summary.new_emails, 2);
        assert_eq!(summary.new_threads, 1);

        let threads = store.list_active_threads(account.id).expect("list");
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].status, ThreadStatus::WaitingOnVendor);
    }

    #[test]
    fn last_checked_advances_even_with_no_mail() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let account = sample_account();
        let transport = FakeTransport::default();

        let now = working_hours_instant();
        run(&transport, &store, &account, now);
        assert_eq!(store.last_checked_at(account.id).expect("read"), Some(now));
    }

    struct FlakyStore {
        inner: crate::store::SqliteEngineStore,
        fail_next_update: AtomicBool,
    }

    impl EngineStore for FlakyStore {
        fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping()
        }

        fn find_thread_by_provider_id(
            &self,
            account_id: Uuid,
            provider_thread_id: &str,
        ) -> Result<Option<Thread>, StoreError> {
            self.inner
                .find_thread_by_provider_id(account_id, provider_thread_id)
        }

        fn find_thread_by_subject(
            &self,
            account_id: Uuid,
            normalized_subject: &str,
        ) -> Result<Option<Thread>, StoreError> {
            self.inner
                .find_thread_by_subject(account_id, normalized_subject)
        }

        fn insert_thread(&self, thread: &Thread) -> Result<(), StoreError> {
            self.inner.insert_thread(thread)
        }

        fn update_thread(&self, thread: &Thread) -> Result<(), StoreError> {
            if self.fail_next_update.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Corrupt("simulated write failure".to_string()));
            }
            self.inner.update_thread(thread)
        }

        fn insert_email_if_absent(&self, email: &EmailRecord) -> Result<bool, StoreError> {
            self.inner.insert_email_if_absent(email)
        }

        fn email_exists(&self, account_id: Uuid, message_id: &str) -> Result<bool, StoreError> {
            self.inner.email_exists(account_id, message_id)
        }

        fn list_active_threads(&self, account_id: Uuid) -> Result<Vec<Thread>, StoreError> {
            self.inner.list_active_threads(account_id)
        }

        fn list_threads_due_for_reminder(
            &self,
            account_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<Vec<Thread>, StoreError> {
            self.inner.list_threads_due_for_reminder(account_id, now)
        }

        fn record_reminder_event(
            &self,
            thread_id: Uuid,
            kind: ReminderKind,
            fired_at: DateTime<Utc>,
            sequence: u32,
        ) -> Result<(), StoreError> {
            self.inner
                .record_reminder_event(thread_id, kind, fired_at, sequence)
        }

        fn last_checked_at(&self, account_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
            self.inner.last_checked_at(account_id)
        }

        fn advance_last_checked(
            &self,
            account_id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.advance_last_checked(account_id, at)
        }

        fn count_emails_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.count_emails_since(since)
        }

        fn count_threads_created_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.count_threads_created_since(since)
        }

        fn count_reminder_events_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.count_reminder_events_since(since)
        }

        fn duplicate_subject_groups(
            &self,
            account_id: Uuid,
            since: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<(String, u32)>, StoreError> {
            self.inner.duplicate_subject_groups(account_id, since, limit)
        }

        fn list_recent_emails(
            &self,
            since: DateTime<Utc>,
            limit: u32,
        ) -> Result<Vec<EmailRecord>, StoreError> {
            self.inner.list_recent_emails(since, limit)
        }
    }

    #[test]
    fn failed_thread_update_leaves_email_replayable() {
        let dir = TempDir::new().expect("tempdir");
        let store = FlakyStore {
            inner: store_in(&dir),
            fail_next_update: AtomicBool::new(false),
        };
        let account = sample_account();
        let classifier = KeywordClassifier;
        let now = working_hours_instant();

        let opening = FakeTransport {
            inbound: vec![fetched(
                "msg-1",
                "onboarding@razorpay.com",
                &account.mailbox_address,
                "Merchant KYC Required",
            )],
            ..Default::default()
        };
        let reconciler = Reconciler {
            store: &store,
            transport: &opening,
            classifier: &classifier,
        };
        reconciler.reconcile(&account, now).expect("open thread");

        // The outbound reply hits a store that drops the thread write.
        let mut reply = fetched(
            "msg-2",
            &account.mailbox_address,
            "onboarding@razorpay.com",
            "Re: Merchant KYC Required",
        );
        reply.observed_at = now + ChronoDuration::minutes(30);
        let replying = FakeTransport {
            outbound: vec![reply],
            ..Default::default()
        };
        let reconciler = Reconciler {
            store: &store,
            transport: &replying,
            classifier: &classifier,
        };
        store.fail_next_update.store(true, Ordering::SeqCst);
        let failed = reconciler
            .reconcile(&account, now + ChronoDuration::minutes(31))
            .expect("batch survives");
        assert_eq!(failed.new_emails, 0);
        assert_eq!(failed.skipped, 1);

        let thread = &store.list_active_threads(account.id).expect("list")[0];
        assert_eq!(thread.status, ThreadStatus::WaitingOnUs);
        assert!(!store.email_exists(account.id, "msg-2").expect("exists check"));

        // Next tick refetches the same reply and replays the transition.
        let retried = reconciler
            .reconcile(&account, now + ChronoDuration::minutes(36))
            .expect("retry");
        assert_eq!(retried.new_emails, 1);
        let thread = &store.list_active_threads(account.id).expect("list")[0];
        assert_eq!(thread.status, ThreadStatus::WaitingOnVendor);
    }

    #[test]
    fn system_subject_patterns() {
        assert!(is_system_subject("Reminder: follow up"));
        assert!(is_system_subject("ACTION REQUIRED: KYC"));
        assert!(is_system_subject("Reply needed on onboarding"));
        assert!(is_system_subject("⏰ Action required: Merchant KYC"));
        assert!(is_system_subject("🔔 Reply needed: Merchant KYC"));
        assert!(!is_system_subject("Merchant KYC Required"));
        assert!(!is_system_subject("Re: settlement query"));
    }
}
