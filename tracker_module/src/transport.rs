use chrono::{DateTime, Utc};

use crate::config::AccountConfig;

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, thiserror::Error)]
#[error("delivery error: {0}")]
pub struct DeliveryError(pub String);

/// A raw message as seen at the mailbox, before classification and
/// normalization. Direction is implied by which fetch produced it.
#[derive(Debug, Clone)]
pub struct FetchedEmail {
    pub message_id: String,
    pub provider_thread_id: Option<String>,
    pub subject: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub body_preview: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Replies should land back in the monitored mailbox, not wherever the
    /// sending identity lives.
    pub reply_to: Option<String>,
    pub tag: Option<String>,
}

/// Mailbox access as the engine needs it. Implementations own their own
/// retry policy; the engine reports failures and moves on.
pub trait MailTransport: Send + Sync {
    fn fetch_inbound(
        &self,
        account: &AccountConfig,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedEmail>, TransportError>;

    fn fetch_outbound(
        &self,
        account: &AccountConfig,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedEmail>, TransportError>;

    fn deliver(
        &self,
        account: &AccountConfig,
        message: &OutgoingEmail,
    ) -> Result<(), DeliveryError>;
}

/// Adapter from the HTTP mail client to `MailTransport`.
pub struct HttpTransport {
    config: send_emails_module::MailApiConfig,
    fetch_limit: u32,
}

impl HttpTransport {
    pub fn new(config: send_emails_module::MailApiConfig) -> Self {
        Self {
            config,
            fetch_limit: 500,
        }
    }

    pub fn from_env() -> Result<Self, TransportError> {
        let config = send_emails_module::MailApiConfig::from_env()
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(Self::new(config))
    }

    fn convert(summary: send_emails_module::MessageSummary) -> FetchedEmail {
        let observed_at = DateTime::parse_from_rfc3339(&summary.received_at)
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        FetchedEmail {
            message_id: summary.message_id,
            provider_thread_id: summary.thread_id,
            subject: summary.subject,
            from_address: summary.from_address,
            from_name: summary.from_name,
            to_addresses: summary.to_full.into_iter().map(|r| r.email).collect(),
            body_preview: summary.body_preview,
            observed_at,
        }
    }
}

impl MailTransport for HttpTransport {
    fn fetch_inbound(
        &self,
        account: &AccountConfig,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedEmail>, TransportError> {
        let from_date = since.format("%Y-%m-%d").to_string();
        let messages = send_emails_module::fetch_inbound(
            &self.config,
            &account.mailbox_address,
            &from_date,
            self.fetch_limit,
        )
        .map_err(|err| TransportError(err.to_string()))?;
        Ok(messages.into_iter().map(Self::convert).collect())
    }

    fn fetch_outbound(
        &self,
        account: &AccountConfig,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchedEmail>, TransportError> {
        let from_date = since.format("%Y-%m-%d").to_string();
        let messages = send_emails_module::fetch_outbound(
            &self.config,
            &account.mailbox_address,
            &from_date,
            self.fetch_limit,
        )
        .map_err(|err| TransportError(err.to_string()))?;
        Ok(messages.into_iter().map(Self::convert).collect())
    }

    fn deliver(
        &self,
        account: &AccountConfig,
        message: &OutgoingEmail,
    ) -> Result<(), DeliveryError> {
        let params = send_emails_module::SendEmailParams {
            from: account.mailbox_address.clone(),
            to: vec![message.to.clone()],
            subject: message.subject.clone(),
            text_body: message.body.clone(),
            reply_to: message.reply_to.clone(),
            tag: message.tag.clone(),
        };
        send_emails_module::send_email(&self.config, &params)
            .map_err(|err| DeliveryError(err.to_string()))
    }
}
