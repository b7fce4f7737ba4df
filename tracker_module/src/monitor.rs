//! Out-of-band watchdog over the tracker's own behavior.
//!
//! Samples the store on a fixed interval, independent of the per-account
//! schedules, and raises alerts when the pipeline looks wedged: stale
//! ingestion, stuck threads, duplicate-thread storms, leaked system mail,
//! reminder inaction, volume spikes. Criticals alert immediately; warnings
//! deduplicate per issue signature through an explicit cooldown registry
//! that is cleared on monitor restart. A daily digest reports aggregate
//! counters regardless of severity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use tracing::{error, info, warn};

use crate::config::{AccountConfig, MonitorConfig, ReminderPolicy};
use crate::policy::due_action;
use crate::reconciler::is_system_subject;
use crate::store::EngineStore;
use crate::transport::{MailTransport, OutgoingEmail};
use crate::types::ThreadStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthIssue {
    pub severity: Severity,
    /// Stable identity for cooldown deduplication; two occurrences of the
    /// same underlying problem share a signature.
    pub signature: String,
    pub message: String,
}

/// Cooldown ledger for warning-level alerts. Explicit component rather than
/// ambient global state; dropped (and thus cleared) with the monitor.
#[derive(Debug)]
pub struct AlertCooldowns {
    window: ChronoDuration,
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl AlertCooldowns {
    pub fn new(window: ChronoDuration) -> Self {
        Self {
            window,
            last_sent: HashMap::new(),
        }
    }

    /// Records the send when it returns `true`.
    pub fn should_alert(&mut self, signature: &str, now: DateTime<Utc>) -> bool {
        match self.last_sent.get(signature) {
            Some(last) if now - *last < self.window => false,
            _ => {
                self.last_sent.insert(signature.to_string(), now);
                true
            }
        }
    }
}

pub struct HealthMonitor {
    store: Arc<dyn EngineStore>,
    transport: Arc<dyn MailTransport>,
    accounts: Vec<AccountConfig>,
    config: MonitorConfig,
    policy: ReminderPolicy,
    cooldowns: AlertCooldowns,
    health_check_runs: u64,
    alerts_raised: u64,
    last_digest_date: Option<NaiveDate>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn EngineStore>,
        transport: Arc<dyn MailTransport>,
        accounts: Vec<AccountConfig>,
        config: MonitorConfig,
        policy: ReminderPolicy,
    ) -> Self {
        let cooldowns = AlertCooldowns::new(ChronoDuration::minutes(config.alert_cooldown_minutes));
        Self {
            store,
            transport,
            accounts,
            config,
            policy,
            cooldowns,
            health_check_runs: 0,
            alerts_raised: 0,
            last_digest_date: None,
        }
    }

    /// One full sweep of every check. Issues are returned in no particular
    /// order; alerting policy is applied by `tick`.
    pub fn run_checks(&self, now: DateTime<Utc>) -> Vec<HealthIssue> {
        let mut issues = Vec::new();

        if let Err(err) = self.store.ping() {
            issues.push(HealthIssue {
                severity: Severity::Critical,
                signature: "store_unreachable".to_string(),
                message: format!("store unreachable: {err}"),
            });
            // Every other check reads the store; nothing more to learn.
            return issues;
        }

        for account in &self.accounts {
            if !account.active {
                continue;
            }
            self.check_staleness(account, now, &mut issues);
            self.check_threads(account, now, &mut issues);
            self.check_duplicate_storms(account, now, &mut issues);
        }
        self.check_leaked_system_emails(now, &mut issues);
        self.check_volume(now, &mut issues);

        issues
    }

    fn check_staleness(
        &self,
        account: &AccountConfig,
        now: DateTime<Utc>,
        issues: &mut Vec<HealthIssue>,
    ) {
        match self.store.last_checked_at(account.id) {
            Ok(Some(at)) => {
                let stale_for = (now - at).num_minutes();
                if stale_for > self.config.staleness_minutes {
                    issues.push(HealthIssue {
                        severity: Severity::Warning,
                        signature: format!("stale_ingestion:{}", account.id),
                        message: format!(
                            "{}: no successful ingestion for {stale_for} minutes",
                            account.name
                        ),
                    });
                }
            }
            Ok(None) => issues.push(HealthIssue {
                severity: Severity::Warning,
                signature: format!("never_polled:{}", account.id),
                message: format!("{}: mailbox has never been polled", account.name),
            }),
            Err(err) => issues.push(HealthIssue {
                severity: Severity::Warning,
                signature: format!("staleness_check_failed:{}", account.id),
                message: format!("{}: staleness check failed: {err}", account.name),
            }),
        }
    }

    fn check_threads(
        &self,
        account: &AccountConfig,
        now: DateTime<Utc>,
        issues: &mut Vec<HealthIssue>,
    ) {
        let threads = match self.store.list_active_threads(account.id) {
            Ok(threads) => threads,
            Err(err) => {
                issues.push(HealthIssue {
                    severity: Severity::Warning,
                    signature: format!("thread_scan_failed:{}", account.id),
                    message: format!("{}: thread scan failed: {err}", account.name),
                });
                return;
            }
        };

        let stuck_after = ChronoDuration::hours(self.config.stuck_thread_hours);
        let mut stuck = 0usize;
        let mut inaction = 0usize;
        let mut capped = 0usize;
        for thread in &threads {
            if !thread.is_hot && now - thread.last_activity_at > stuck_after {
                stuck += 1;
            }
            if thread.vendor_nudge_count >= self.policy.vendor_nudge_cap {
                capped += 1;
            }
            // Overdue by a wide margin yet never reminded: the policy engine
            // is not doing its job for this thread.
            let never_reminded = match thread.status {
                ThreadStatus::WaitingOnUs => thread.self_reminder_count == 0,
                ThreadStatus::WaitingOnVendor => thread.vendor_nudge_count == 0,
            };
            let margin = ChronoDuration::minutes(self.longest_interval(account));
            if never_reminded
                && due_action(thread, account, &self.policy, now).is_some()
                && due_action(thread, account, &self.policy, now - margin).is_some()
            {
                inaction += 1;
            }
        }

        if stuck > 0 {
            issues.push(HealthIssue {
                severity: Severity::Warning,
                signature: format!("stuck_threads:{}", account.id),
                message: format!(
                    "{}: {stuck} thread(s) with no activity for over {} hours",
                    account.name, self.config.stuck_thread_hours
                ),
            });
        }
        if inaction > 0 {
            issues.push(HealthIssue {
                severity: Severity::Warning,
                signature: format!("reminder_inaction:{}", account.id),
                message: format!(
                    "{}: {inaction} thread(s) long overdue for a reminder with none sent",
                    account.name
                ),
            });
        }
        if capped > 0 {
            issues.push(HealthIssue {
                severity: Severity::Info,
                signature: format!("nudge_cap_reached:{}", account.id),
                message: format!(
                    "{}: {capped} thread(s) pinned at the vendor nudge cap",
                    account.name
                ),
            });
        }
    }

    fn longest_interval(&self, account: &AccountConfig) -> i64 {
        account
            .self_reminder_minutes
            .max(account.vendor_nudge_minutes)
    }

    fn check_duplicate_storms(
        &self,
        account: &AccountConfig,
        now: DateTime<Utc>,
        issues: &mut Vec<HealthIssue>,
    ) {
        let since = now - ChronoDuration::hours(self.config.duplicate_window_hours);
        match self
            .store
            .duplicate_subject_groups(account.id, since, self.config.duplicate_thread_limit)
        {
            Ok(groups) => {
                for (subject, count) in groups {
                    issues.push(HealthIssue {
                        severity: Severity::Critical,
                        signature: format!("duplicate_threads:{}:{subject}", account.id),
                        message: format!(
                            "{}: {count} threads created for subject {subject:?} in the last {}h — correlation failure",
                            account.name, self.config.duplicate_window_hours
                        ),
                    });
                }
            }
            Err(err) => issues.push(HealthIssue {
                severity: Severity::Warning,
                signature: format!("duplicate_check_failed:{}", account.id),
                message: format!("{}: duplicate check failed: {err}", account.name),
            }),
        }
    }

    fn check_leaked_system_emails(&self, now: DateTime<Utc>, issues: &mut Vec<HealthIssue>) {
        let since = now - ChronoDuration::hours(24);
        match self.store.list_recent_emails(since, 500) {
            Ok(emails) => {
                let leaked = emails
                    .iter()
                    .filter(|email| is_system_subject(&email.subject))
                    .count();
                if leaked > 0 {
                    issues.push(HealthIssue {
                        severity: Severity::Critical,
                        signature: "leaked_system_emails".to_string(),
                        message: format!(
                            "{leaked} system-generated email(s) persisted in the last 24h — pre-filter failure"
                        ),
                    });
                }
            }
            Err(err) => issues.push(HealthIssue {
                severity: Severity::Warning,
                signature: "leak_check_failed".to_string(),
                message: format!("leak check failed: {err}"),
            }),
        }
    }

    fn check_volume(&self, now: DateTime<Utc>, issues: &mut Vec<HealthIssue>) {
        match self.store.count_emails_since(now - ChronoDuration::hours(1)) {
            Ok(count) if count > self.config.volume_limit_per_hour => {
                issues.push(HealthIssue {
                    severity: Severity::Warning,
                    signature: "volume_spike".to_string(),
                    message: format!(
                        "{count} emails ingested in the last hour (limit {})",
                        self.config.volume_limit_per_hour
                    ),
                });
            }
            Ok(_) => {}
            Err(err) => issues.push(HealthIssue {
                severity: Severity::Warning,
                signature: "volume_check_failed".to_string(),
                message: format!("volume check failed: {err}"),
            }),
        }
    }

    /// One monitor cycle: sweep, alert, and possibly emit the daily digest.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.health_check_runs += 1;
        let issues = self.run_checks(now);
        for issue in &issues {
            match issue.severity {
                Severity::Critical => {
                    error!("health: {}", issue.message);
                    self.send_alert(issue);
                }
                Severity::Warning => {
                    warn!("health: {}", issue.message);
                    if self.cooldowns.should_alert(&issue.signature, now) {
                        self.send_alert(issue);
                    }
                }
                Severity::Info => info!("health: {}", issue.message),
            }
        }
        self.maybe_send_digest(now);
    }

    fn alert_route(&self) -> Option<&AccountConfig> {
        self.accounts.iter().find(|account| account.active)
    }

    fn send_alert(&mut self, issue: &HealthIssue) {
        let Some(account) = self.alert_route() else {
            warn!("health alert with no active account to notify: {}", issue.message);
            return;
        };
        let message = OutgoingEmail {
            to: account.operator_address.clone(),
            subject: format!("⚠️ Tracker health {}: {}", issue.severity.as_str(), issue.signature),
            body: issue.message.clone(),
            reply_to: None,
            tag: Some("health_alert".to_string()),
        };
        // Best effort: a failed alert is logged, never retried here.
        if let Err(err) = self.transport.deliver(account, &message) {
            warn!("health alert delivery failed: {err}");
        } else {
            self.alerts_raised += 1;
        }
    }

    fn maybe_send_digest(&mut self, now: DateTime<Utc>) {
        let Some(account) = self.alert_route().cloned() else {
            return;
        };
        let local = now.with_timezone(&account.tz());
        if local.hour() != self.config.digest_hour {
            return;
        }
        let today = local.date_naive();
        if self.last_digest_date == Some(today) {
            return;
        }
        self.last_digest_date = Some(today);

        let since = now - ChronoDuration::hours(24);
        let emails = self.store.count_emails_since(since).unwrap_or(0);
        let threads = self.store.count_threads_created_since(since).unwrap_or(0);
        let reminders = self.store.count_reminder_events_since(since).unwrap_or(0);
        let body = format!(
            "Daily tracker digest for {today}\n\n\
             Emails processed (24h): {emails}\n\
             Threads created (24h): {threads}\n\
             Reminders and nudges sent (24h): {reminders}\n\
             Health check runs since start: {}\n\
             Alerts raised since last digest: {}\n",
            self.health_check_runs, self.alerts_raised,
        );
        let message = OutgoingEmail {
            to: account.operator_address.clone(),
            subject: format!("✅ Daily tracker digest — {today}"),
            body,
            reply_to: None,
            tag: Some("daily_digest".to_string()),
        };
        if let Err(err) = self.transport.deliver(&account, &message) {
            warn!("digest delivery failed: {err}");
        }
        self.alerts_raised = 0;
    }

    /// Blocking monitor loop; runs until the stop flag is raised.
    pub fn run_loop(&mut self, stop: &AtomicBool) {
        let interval = Duration::from_secs(self.config.check_interval_minutes.max(1) * 60);
        while !stop.load(Ordering::Relaxed) {
            self.tick(Utc::now());
            let mut waited = Duration::ZERO;
            while waited < interval {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let step = Duration::from_millis(250).min(interval - waited);
                std::thread::sleep(step);
                waited += step;
            }
        }
    }
}
