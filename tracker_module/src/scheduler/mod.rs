//! Per-account periodic driver.
//!
//! Each account gets its own worker thread and stop flag, registered in an
//! explicit job registry. One thread per account means a tick can never
//! overlap itself, and accounts never block one another. Stopping an account
//! only prevents future ticks; an in-flight tick always runs to completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::composer::NotificationComposer;
use crate::config::{AccountConfig, ReminderPolicy};
use crate::gateway::GatewayClassifier;
use crate::policy::{ReminderEngine, ReminderPassSummary};
use crate::reconciler::{ReconcileSummary, Reconciler};
use crate::store::EngineStore;
use crate::transport::MailTransport;
use crate::types::EngineError;


const STOP_POLL_STEP: Duration = Duration::from_millis(250);

/// Everything a tick needs, shared across worker threads.
pub struct EngineContext {
    pub store: Arc<dyn EngineStore>,
    pub transport: Arc<dyn MailTransport>,
    pub classifier: Arc<dyn GatewayClassifier>,
    pub composer: Arc<dyn NotificationComposer>,
    pub policy: ReminderPolicy,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub ingest: ReconcileSummary,
    pub reminders: ReminderPassSummary,
}

/// One scheduler tick: ingestion completes and is durably persisted before
/// reminder evaluation reads thread state.
pub fn run_account_tick(
    ctx: &EngineContext,
    account: &AccountConfig,
    now: DateTime<Utc>,
) -> Result<TickSummary, EngineError> {
    let reconciler = Reconciler {
        store: ctx.store.as_ref(),
        transport: ctx.transport.as_ref(),
        classifier: ctx.classifier.as_ref(),
    };
    let ingest = reconciler.reconcile(account, now)?;

    let engine = ReminderEngine {
        store: ctx.store.as_ref(),
        transport: ctx.transport.as_ref(),
        composer: ctx.composer.as_ref(),
        policy: &ctx.policy,
    };
    let reminders = engine.run_pass(account, now)?;

    Ok(TickSummary { ingest, reminders })
}

#[derive(Default)]
struct JobShared {
    last_run: Mutex<Option<DateTime<Utc>>>,
}

struct AccountJob {
    account: AccountConfig,
    stop: Arc<AtomicBool>,
    shared: Arc<JobShared>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub account_id: Uuid,
    pub account_name: String,
    pub frequency_minutes: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

pub struct Scheduler {
    ctx: Arc<EngineContext>,
    jobs: Mutex<HashMap<Uuid, AccountJob>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a recurring job for the account; the first tick runs
    /// immediately. Returns `false` if the account is inactive or already
    /// scheduled.
    pub fn start_for_account(&self, account: &AccountConfig) -> bool {
        if !account.active {
            return false;
        }
        let mut jobs = self.lock_jobs();
        if jobs.contains_key(&account.id) {
            return false;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(JobShared::default());
        let handle = spawn_worker(
            Arc::clone(&self.ctx),
            account.clone(),
            Arc::clone(&stop),
            Arc::clone(&shared),
        );
        jobs.insert(
            account.id,
            AccountJob {
                account: account.clone(),
                stop,
                shared,
                handle: Some(handle),
            },
        );
        info!(account = %account.name, "schedule started");
        true
    }

    /// Cancels the account's recurring job. Waits for an in-flight tick to
    /// finish rather than aborting it.
    pub fn stop_for_account(&self, account_id: Uuid) -> bool {
        let job = self.lock_jobs().remove(&account_id);
        match job {
            Some(mut job) => {
                job.stop.store(true, Ordering::Relaxed);
                if let Some(handle) = job.handle.take() {
                    if handle.join().is_err() {
                        warn!(account = %job.account.name, "scheduler worker panicked");
                    }
                }
                info!(account = %job.account.name, "schedule stopped");
                true
            }
            None => false,
        }
    }

    pub fn restart_for_account(&self, account: &AccountConfig) -> bool {
        self.stop_for_account(account.id);
        self.start_for_account(account)
    }

    /// Starts every active account; returns how many jobs were started.
    pub fn start_all(&self, accounts: &[AccountConfig]) -> usize {
        accounts
            .iter()
            .filter(|account| self.start_for_account(account))
            .count()
    }

    pub fn stop_all(&self) {
        let ids: Vec<Uuid> = self.lock_jobs().keys().copied().collect();
        for id in ids {
            self.stop_for_account(id);
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.lock_jobs();
        let mut entries: Vec<JobStatus> = jobs
            .values()
            .map(|job| {
                let last_run = *job
                    .shared
                    .last_run
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let next_run = last_run.map(|at| {
                    at + chrono::Duration::minutes(job.account.poll_interval_minutes as i64)
                });
                JobStatus {
                    account_id: job.account.id,
                    account_name: job.account.name.clone(),
                    frequency_minutes: job.account.poll_interval_minutes,
                    last_run,
                    next_run,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.account_name.cmp(&b.account_name));
        SchedulerStatus {
            running: !entries.is_empty(),
            jobs: entries,
        }
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, AccountJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_worker(
    ctx: Arc<EngineContext>,
    account: AccountConfig,
    stop: Arc<AtomicBool>,
    shared: Arc<JobShared>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let interval = Duration::from_secs(account.poll_interval_minutes.max(1) * 60);
        while !stop.load(Ordering::Relaxed) {
            let now = Utc::now();
            match run_account_tick(&ctx, &account, now) {
                Ok(summary) => info!(
                    account = %account.name,
                    new_emails = summary.ingest.new_emails,
                    new_threads = summary.ingest.new_threads,
                    self_reminders = summary.reminders.self_reminders_sent,
                    vendor_nudges = summary.reminders.vendor_nudges_sent,
                    "tick complete"
                ),
                // Failed ticks never cancel the schedule; the next tick
                // still fires.
                Err(err) => warn!(account = %account.name, "tick failed: {err}"),
            }
            *shared
                .last_run
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

            let mut waited = Duration::ZERO;
            while waited < interval {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let step = STOP_POLL_STEP.min(interval - waited);
                std::thread::sleep(step);
                waited += step;
            }
        }
    })
}
