//! Reminder and nudge text composition.
//!
//! The primary composer drafts a natural-language follow-up through an
//! OpenAI-compatible chat endpoint; any failure there falls back to a fixed
//! template so the send path is never blocked by the drafting layer.
//!
//! Configuration:
//! - `COMPOSER_API_KEY`: API key; unset disables the LLM path entirely
//! - `COMPOSER_URL`: API base URL (default: `https://api.openai.com/v1`)
//! - `COMPOSER_MODEL`: model name (default: `gpt-4o-mini`)

use std::env;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AccountConfig;
use crate::types::{ReminderKind, Thread};

const DEFAULT_COMPOSER_URL: &str = "https://api.openai.com/v1";
const DEFAULT_COMPOSER_MODEL: &str = "gpt-4o-mini";
const COMPOSER_TIMEOUT: Duration = Duration::from_secs(20);

/// Subject prefixes that mark mail as generated by the tracker itself. The
/// ingestion pre-filter relies on these to keep our own notifications from
/// re-entering the correlation loop.
pub const SELF_REMINDER_PREFIX: &str = "⏰ Action required:";
pub const VENDOR_NUDGE_PREFIX: &str = "🔔 Reply needed:";

#[derive(Debug, thiserror::Error)]
#[error("composition error: {0}")]
pub struct CompositionError(pub String);

#[derive(Debug, Clone)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReminderContext<'a> {
    pub account: &'a AccountConfig,
    pub thread: &'a Thread,
    pub now: DateTime<Utc>,
}

pub trait NotificationComposer: Send + Sync {
    fn compose(&self, kind: ReminderKind, ctx: &ReminderContext<'_>)
        -> Result<Notice, CompositionError>;
}

/// Deterministic template composer; the always-available fallback.
#[derive(Debug, Default, Clone)]
pub struct TemplateComposer;

impl TemplateComposer {
    fn waiting_minutes(ctx: &ReminderContext<'_>) -> i64 {
        let basis = match ctx.thread.status {
            crate::types::ThreadStatus::WaitingOnUs => ctx.thread.last_inbound_at,
            crate::types::ThreadStatus::WaitingOnVendor => ctx.thread.last_outbound_at,
        };
        basis
            .map(|at| (ctx.now - at).num_minutes().max(0))
            .unwrap_or(0)
    }
}

impl NotificationComposer for TemplateComposer {
    fn compose(
        &self,
        kind: ReminderKind,
        ctx: &ReminderContext<'_>,
    ) -> Result<Notice, CompositionError> {
        let thread = ctx.thread;
        let gateway = thread.gateway.as_deref().unwrap_or("the vendor");
        let waiting = Self::waiting_minutes(ctx);
        match kind {
            ReminderKind::SelfReminder => Ok(Notice {
                subject: format!("{} {}", SELF_REMINDER_PREFIX, thread.subject),
                body: format!(
                    "The {gateway} conversation \"{}\" has been waiting on a reply from \
                     you for {waiting} minutes.\n\nLast message from: {}\n\nThis is \
                     reminder #{} for this thread.",
                    thread.subject,
                    thread.vendor_address.as_deref().unwrap_or("unknown sender"),
                    thread.self_reminder_count + 1,
                ),
            }),
            ReminderKind::VendorNudge => Ok(Notice {
                subject: format!("{} {}", VENDOR_NUDGE_PREFIX, thread.subject),
                body: format!(
                    "Hello,\n\nFollowing up on \"{}\" — we replied {waiting} minutes ago \
                     and are still waiting to hear back. Could you share an update on \
                     the onboarding status?\n\nThank you,\n{}",
                    thread.subject, ctx.account.name,
                ),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmComposerConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl LlmComposerConfig {
    /// Returns `None` when no API key is configured; the caller then runs
    /// template-only.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("COMPOSER_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())?;
        let base_url = env::var("COMPOSER_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_COMPOSER_URL.to_string());
        let model = env::var("COMPOSER_MODEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COMPOSER_MODEL.to_string());
        Some(Self {
            api_key,
            base_url,
            model,
        })
    }
}

/// AI-drafted follow-ups via an OpenAI-compatible chat endpoint.
pub struct LlmComposer {
    config: LlmComposerConfig,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl LlmComposer {
    pub fn new(config: LlmComposerConfig) -> Result<Self, CompositionError> {
        let client = Client::builder()
            .timeout(COMPOSER_TIMEOUT)
            .build()
            .map_err(|err| CompositionError(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn prompt(kind: ReminderKind, ctx: &ReminderContext<'_>) -> String {
        let thread = ctx.thread;
        match kind {
            ReminderKind::SelfReminder => format!(
                "Write a short internal reminder (2-3 sentences, plain text, no \
                 greeting) telling an operations person they still owe a reply on the \
                 email thread \"{}\" with {} ({}). They have been waiting since {}.",
                thread.subject,
                thread.vendor_name.as_deref().unwrap_or("the vendor"),
                thread.gateway.as_deref().unwrap_or("payment gateway"),
                thread
                    .last_inbound_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            ),
            ReminderKind::VendorNudge => format!(
                "Write a polite, professional follow-up email body (plain text, under \
                 120 words, no subject line) to {} about the thread \"{}\". We replied \
                 on {} and have not heard back. Ask for a status update on the merchant \
                 onboarding. Sign off as {}.",
                thread.vendor_name.as_deref().unwrap_or("the onboarding team"),
                thread.subject,
                thread
                    .last_outbound_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                ctx.account.name,
            ),
        }
    }
}

impl NotificationComposer for LlmComposer {
    fn compose(
        &self,
        kind: ReminderKind,
        ctx: &ReminderContext<'_>,
    ) -> Result<Notice, CompositionError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: Self::prompt(kind, ctx),
            }],
            temperature: 0.4,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .map_err(|err| CompositionError(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CompositionError(format!(
                "composer api returned {}",
                response.status()
            )));
        }
        let parsed: ChatResponse = response
            .json()
            .map_err(|err| CompositionError(err.to_string()))?;
        let body = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| CompositionError("composer returned empty draft".to_string()))?;
        let prefix = match kind {
            ReminderKind::SelfReminder => SELF_REMINDER_PREFIX,
            ReminderKind::VendorNudge => VENDOR_NUDGE_PREFIX,
        };
        Ok(Notice {
            subject: format!("{} {}", prefix, ctx.thread.subject),
            body,
        })
    }
}

/// Primary composer with template fallback. The fallback path cannot fail,
/// so neither can this stack.
pub struct ComposerStack {
    primary: Option<Box<dyn NotificationComposer>>,
    fallback: TemplateComposer,
}

impl ComposerStack {
    pub fn new(primary: Option<Box<dyn NotificationComposer>>) -> Self {
        Self {
            primary,
            fallback: TemplateComposer,
        }
    }

    pub fn from_env() -> Self {
        let primary = LlmComposerConfig::from_env()
            .and_then(|config| match LlmComposer::new(config) {
                Ok(composer) => Some(Box::new(composer) as Box<dyn NotificationComposer>),
                Err(err) => {
                    warn!("llm composer unavailable, using templates: {err}");
                    None
                }
            });
        Self::new(primary)
    }
}

impl NotificationComposer for ComposerStack {
    fn compose(
        &self,
        kind: ReminderKind,
        ctx: &ReminderContext<'_>,
    ) -> Result<Notice, CompositionError> {
        if let Some(primary) = &self.primary {
            match primary.compose(kind, ctx) {
                Ok(notice) => return Ok(notice),
                Err(err) => {
                    warn!(
                        thread_id = %ctx.thread.id,
                        "composer draft failed, falling back to template: {err}"
                    );
                }
            }
        }
        self.fallback.compose(kind, ctx)
    }
}
