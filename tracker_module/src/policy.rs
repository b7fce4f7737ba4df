//! Reminder escalation policy: who gets nagged, and when.
//!
//! Two independent tracks per thread. The self-reminder track nags the
//! internal operator while the thread waits on us; it has a cooldown but no
//! cap, because the operator replying is what ends it. The vendor-nudge
//! track follows up with the external party; it is capped hard and its
//! repeat cooldown depends on how aggressive the configured interval is.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::composer::{NotificationComposer, ReminderContext};
use crate::config::{AccountConfig, ReminderPolicy};
use crate::store::EngineStore;
use crate::transport::{MailTransport, OutgoingEmail};
use crate::types::{EngineError, ReminderKind, Thread, ThreadStatus};

/// Process-wide eligibility gate: Monday through Saturday, inside the
/// configured hours, in the account's civil time zone. Sunday never fires.
pub fn within_working_hours(now: DateTime<Utc>, tz: Tz, policy: &ReminderPolicy) -> bool {
    let local = now.with_timezone(&tz);
    if local.weekday() == Weekday::Sun {
        return false;
    }
    let hour = local.hour();
    hour >= policy.workday_start_hour && hour < policy.workday_end_hour
}

/// Pure due-ness decision for one thread. Working hours are gated separately
/// (once per pass), so this only looks at the thread's own timers.
pub fn due_action(
    thread: &Thread,
    account: &AccountConfig,
    policy: &ReminderPolicy,
    now: DateTime<Utc>,
) -> Option<ReminderKind> {
    if thread.is_completed || thread.snoozed_at(now) {
        return None;
    }
    match thread.status {
        ThreadStatus::WaitingOnUs => {
            let last_inbound = thread.last_inbound_at?;
            if thread.self_reminder_count == 0 {
                let waited = now - last_inbound;
                (waited >= ChronoDuration::minutes(account.self_reminder_minutes))
                    .then_some(ReminderKind::SelfReminder)
            } else {
                let last_fired = thread.last_self_reminder_at?;
                let cooled = now - last_fired
                    >= ChronoDuration::minutes(policy.self_reminder_cooldown_minutes);
                cooled.then_some(ReminderKind::SelfReminder)
            }
        }
        ThreadStatus::WaitingOnVendor => {
            // Never nudge a vendor we have not written to.
            let last_outbound = thread.last_outbound_at?;
            if thread.vendor_nudge_count >= policy.vendor_nudge_cap {
                return None;
            }
            if thread.vendor_nudge_count == 0 {
                let waited = now - last_outbound;
                (waited >= ChronoDuration::minutes(account.vendor_nudge_minutes))
                    .then_some(ReminderKind::VendorNudge)
            } else {
                let last_fired = thread.last_vendor_nudge_at?;
                let cooldown = vendor_repeat_cooldown(account, policy);
                (now - last_fired >= cooldown).then_some(ReminderKind::VendorNudge)
            }
        }
    }
}

/// Accounts on a sub-threshold nudge interval get the short repeat cooldown.
fn vendor_repeat_cooldown(account: &AccountConfig, policy: &ReminderPolicy) -> ChronoDuration {
    if account.vendor_nudge_minutes < policy.short_interval_threshold_minutes {
        ChronoDuration::minutes(policy.short_cooldown_minutes)
    } else {
        ChronoDuration::minutes(policy.long_cooldown_minutes)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderPassSummary {
    pub evaluated: usize,
    pub self_reminders_sent: usize,
    pub vendor_nudges_sent: usize,
    pub skipped: usize,
    pub failures: usize,
}

/// A due reminder either went out or was deliberately not sent; the two must
/// not be conflated in the pass counters.
enum FireOutcome {
    Sent,
    Skipped,
}

pub struct ReminderEngine<'a> {
    pub store: &'a dyn EngineStore,
    pub transport: &'a dyn MailTransport,
    pub composer: &'a dyn NotificationComposer,
    pub policy: &'a ReminderPolicy,
}

impl<'a> ReminderEngine<'a> {
    /// One reminder pass over an account's threads. Runs after ingestion so
    /// decisions always see the freshest status.
    pub fn run_pass(
        &self,
        account: &AccountConfig,
        now: DateTime<Utc>,
    ) -> Result<ReminderPassSummary, EngineError> {
        let mut summary = ReminderPassSummary::default();
        if !within_working_hours(now, account.tz(), self.policy) {
            return Ok(summary);
        }

        for thread in self.store.list_threads_due_for_reminder(account.id, now)? {
            summary.evaluated += 1;
            let Some(kind) = due_action(&thread, account, self.policy, now) else {
                continue;
            };
            match self.fire(account, thread, kind, now) {
                Ok(FireOutcome::Sent) => match kind {
                    ReminderKind::SelfReminder => summary.self_reminders_sent += 1,
                    ReminderKind::VendorNudge => summary.vendor_nudges_sent += 1,
                },
                Ok(FireOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    // Counters stay untouched so the next eligible tick
                    // retries the send.
                    warn!(account = %account.name, "reminder send failed: {err}");
                    summary.failures += 1;
                }
            }
        }
        Ok(summary)
    }

    fn fire(
        &self,
        account: &AccountConfig,
        mut thread: Thread,
        kind: ReminderKind,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome, EngineError> {
        let recipient = match kind {
            ReminderKind::SelfReminder => account.operator_address.clone(),
            ReminderKind::VendorNudge => match thread.vendor_address.clone() {
                Some(address) => address,
                None => {
                    warn!(thread_id = %thread.id, "vendor nudge due but no vendor address");
                    return Ok(FireOutcome::Skipped);
                }
            },
        };

        let ctx = ReminderContext {
            account,
            thread: &thread,
            now,
        };
        let notice = self
            .composer
            .compose(kind, &ctx)
            .map_err(|err| EngineError::Composition(err.to_string()))?;

        let message = OutgoingEmail {
            to: recipient,
            subject: notice.subject,
            body: notice.body,
            reply_to: match kind {
                ReminderKind::SelfReminder => None,
                ReminderKind::VendorNudge => Some(account.mailbox_address.clone()),
            },
            tag: Some(kind.as_str().to_string()),
        };
        self.transport.deliver(account, &message)?;

        let sequence = match kind {
            ReminderKind::SelfReminder => {
                thread.self_reminder_count += 1;
                thread.last_self_reminder_at = Some(now);
                thread.self_reminder_count
            }
            ReminderKind::VendorNudge => {
                thread.vendor_nudge_count += 1;
                thread.last_vendor_nudge_at = Some(now);
                thread.vendor_nudge_count
            }
        };
        thread.is_hot = true;
        self.store.update_thread(&thread)?;
        self.store
            .record_reminder_event(thread.id, kind, now, sequence)?;
        info!(
            account = %account.name,
            thread_id = %thread.id,
            kind = kind.as_str(),
            sequence,
            "reminder sent"
        );
        Ok(FireOutcome::Sent)
    }
}
