//! Thread correlation: deciding which conversation an observed email belongs
//! to, despite providers that omit or rotate their thread identifiers.
//!
//! Matching order is provider thread id first, normalized subject second. A
//! subject match with a differing provider id rebinds the stored id instead
//! of opening a duplicate thread, which keeps the one-thread-per-subject
//! invariant self-healing.

use chrono::Utc;
use uuid::Uuid;

use crate::store::{EngineStore, StoreError};
use crate::types::{Actor, Direction, EmailRecord, Thread, ThreadStatus};

#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    pub thread: Thread,
    pub is_new: bool,
}

pub fn correlate(
    store: &dyn EngineStore,
    account_id: Uuid,
    email: &EmailRecord,
) -> Result<CorrelationOutcome, StoreError> {
    if let Some(provider_id) = email.provider_thread_id.as_deref() {
        if let Some(mut thread) = store.find_thread_by_provider_id(account_id, provider_id)? {
            apply_email(&mut thread, email);
            store.update_thread(&thread)?;
            return Ok(CorrelationOutcome {
                thread,
                is_new: false,
            });
        }
    }

    if let Some(mut thread) =
        store.find_thread_by_subject(account_id, &email.normalized_subject)?
    {
        // Same conversation under a new provider id: rebind rather than
        // duplicate.
        if email.provider_thread_id.is_some()
            && thread.provider_thread_id != email.provider_thread_id
        {
            thread.provider_thread_id = email.provider_thread_id.clone();
        }
        apply_email(&mut thread, email);
        store.update_thread(&thread)?;
        return Ok(CorrelationOutcome {
            thread,
            is_new: false,
        });
    }

    let thread = new_thread(account_id, email);
    store.insert_thread(&thread)?;
    Ok(CorrelationOutcome {
        thread,
        is_new: true,
    })
}

/// Status and timer transitions for one observed email.
///
/// Each reminder track is reset only by the *other* side's action: an
/// outbound reply restarts self-reminder escalation, an inbound reply
/// restarts vendor-nudge escalation.
fn apply_email(thread: &mut Thread, email: &EmailRecord) {
    match email.direction {
        Direction::Inbound => {
            thread.status = ThreadStatus::WaitingOnUs;
            thread.last_actor = Actor::Vendor;
            thread.last_inbound_at = Some(email.observed_at);
            thread.vendor_nudge_count = 0;
            thread.last_vendor_nudge_at = None;
            if thread.vendor_address.is_none() {
                thread.vendor_address = Some(email.from_address.clone());
            }
            if thread.vendor_name.is_none() {
                thread.vendor_name = email.from_name.clone();
            }
        }
        Direction::Outbound => {
            thread.status = ThreadStatus::WaitingOnVendor;
            thread.last_actor = Actor::Us;
            thread.last_outbound_at = Some(email.observed_at);
            thread.self_reminder_count = 0;
            thread.last_self_reminder_at = None;
            thread.is_hot = false;
        }
    }
    if thread.gateway.is_none() {
        thread.gateway = email.gateway.clone();
    }
    if email.observed_at > thread.last_activity_at {
        thread.last_activity_at = email.observed_at;
    }
}

fn new_thread(account_id: Uuid, email: &EmailRecord) -> Thread {
    let (status, last_actor) = match email.direction {
        Direction::Inbound => (ThreadStatus::WaitingOnUs, Actor::Vendor),
        Direction::Outbound => (ThreadStatus::WaitingOnVendor, Actor::Us),
    };
    let inbound = email.direction == Direction::Inbound;
    Thread {
        id: Uuid::new_v4(),
        account_id,
        provider_thread_id: email.provider_thread_id.clone(),
        normalized_subject: email.normalized_subject.clone(),
        subject: email.subject.clone(),
        gateway: email.gateway.clone(),
        vendor_address: inbound.then(|| email.from_address.clone()),
        vendor_name: if inbound { email.from_name.clone() } else { None },
        status,
        last_actor,
        last_inbound_at: inbound.then_some(email.observed_at),
        last_outbound_at: (!inbound).then_some(email.observed_at),
        last_activity_at: email.observed_at,
        last_self_reminder_at: None,
        last_vendor_nudge_at: None,
        self_reminder_count: 0,
        vendor_nudge_count: 0,
        is_hot: false,
        is_completed: false,
        is_snoozed: false,
        snoozed_until: None,
        created_at: Utc::now(),
    }
}
