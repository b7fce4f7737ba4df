//! Thin HTTP mail client for a Postmark-style transactional mail API.
//!
//! Sending and fetching are deliberately fire-and-forget: failures are
//! reported to the caller and never retried here. Retry policy belongs to
//! whoever schedules the call.
//!
//! Configuration:
//! - `MAIL_API_URL`: API base URL (default: `https://api.postmarkapp.com`)
//! - `MAIL_API_TOKEN`: server token sent as `X-Postmark-Server-Token`

use std::env;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_API_URL: &str = "https://api.postmarkapp.com";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SendEmailError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("missing MAIL_API_TOKEN")]
    MissingToken,
}

#[derive(Debug, Clone)]
pub struct MailApiConfig {
    pub base_url: String,
    pub server_token: String,
}

impl MailApiConfig {
    pub fn from_env() -> Result<Self, SendEmailError> {
        let server_token = env::var("MAIL_API_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(SendEmailError::MissingToken)?;
        let base_url = env::var("MAIL_API_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Ok(Self {
            base_url,
            server_token,
        })
    }

    pub fn new(base_url: &str, server_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            server_token: server_token.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendEmailParams {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub reply_to: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    #[serde(rename = "From")]
    from: &'a str,
    #[serde(rename = "To")]
    to: String,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "TextBody")]
    text_body: &'a str,
    #[serde(rename = "ReplyTo", skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(rename = "Tag", skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}

pub fn send_email(config: &MailApiConfig, params: &SendEmailParams) -> Result<(), SendEmailError> {
    let client = http_client()?;
    let request = SendEmailRequest {
        from: &params.from,
        to: params.to.join(","),
        subject: &params.subject,
        text_body: &params.text_body,
        reply_to: params.reply_to.as_deref(),
        tag: params.tag.as_deref(),
    };
    let response = client
        .post(format!("{}/email", config.base_url))
        .header("X-Postmark-Server-Token", &config.server_token)
        .header("Accept", "application/json")
        .json(&request)
        .send()?;
    ensure_success(response)
}

/// One message as reported by the mail API, reduced to the fields the
/// tracker cares about. `thread_id` is whatever conversation identifier the
/// provider exposes; many providers omit it or change it mid-conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageSummary {
    #[serde(rename = "MessageID")]
    pub message_id: String,
    #[serde(rename = "Subject", default)]
    pub subject: String,
    #[serde(rename = "From", default)]
    pub from_address: String,
    #[serde(rename = "FromName", default)]
    pub from_name: Option<String>,
    #[serde(rename = "ToFull", default)]
    pub to_full: Vec<Recipient>,
    #[serde(rename = "ThreadID", default)]
    pub thread_id: Option<String>,
    #[serde(rename = "TextBody", default)]
    pub body_preview: String,
    #[serde(rename = "ReceivedAt", default)]
    pub received_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recipient {
    #[serde(rename = "Email")]
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct InboundPage {
    #[serde(rename = "InboundMessages", default)]
    messages: Vec<MessageSummary>,
}

#[derive(Debug, Deserialize)]
struct OutboundPage {
    #[serde(rename = "Messages", default)]
    messages: Vec<MessageSummary>,
}

pub fn fetch_inbound(
    config: &MailApiConfig,
    mailbox: &str,
    from_date: &str,
    limit: u32,
) -> Result<Vec<MessageSummary>, SendEmailError> {
    let page: InboundPage = fetch_messages(config, "/messages/inbound", mailbox, from_date, limit)?;
    Ok(page.messages)
}

pub fn fetch_outbound(
    config: &MailApiConfig,
    mailbox: &str,
    from_date: &str,
    limit: u32,
) -> Result<Vec<MessageSummary>, SendEmailError> {
    let page: OutboundPage =
        fetch_messages(config, "/messages/outbound", mailbox, from_date, limit)?;
    Ok(page.messages)
}

fn fetch_messages<T: serde::de::DeserializeOwned>(
    config: &MailApiConfig,
    path: &str,
    mailbox: &str,
    from_date: &str,
    limit: u32,
) -> Result<T, SendEmailError> {
    let client = http_client()?;
    let response = client
        .get(format!("{}{}", config.base_url, path))
        .header("X-Postmark-Server-Token", &config.server_token)
        .header("Accept", "application/json")
        .query(&[
            ("recipient", mailbox),
            ("fromdate", from_date),
            ("count", &limit.to_string()),
            ("offset", "0"),
        ])
        .send()?;
    let response = check_status(response)?;
    Ok(response.json()?)
}

fn http_client() -> Result<Client, SendEmailError> {
    Ok(Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

fn ensure_success(response: reqwest::blocking::Response) -> Result<(), SendEmailError> {
    check_status(response).map(|_| ())
}

fn check_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, SendEmailError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().unwrap_or_default();
        Err(SendEmailError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SendEmailParams {
        SendEmailParams {
            from: "ops@merchant.example".to_string(),
            to: vec!["onboarding@razorpay.com".to_string()],
            subject: "Re: Merchant KYC Required".to_string(),
            text_body: "Following up on the pending KYC documents.".to_string(),
            reply_to: Some("ops@merchant.example".to_string()),
            tag: Some("vendor_nudge".to_string()),
        }
    }

    #[test]
    fn send_email_posts_to_email_endpoint() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/email")
            .match_header("x-postmark-server-token", "token-1")
            .with_status(200)
            .with_body(r#"{"ErrorCode":0,"Message":"OK"}"#)
            .create();

        let config = MailApiConfig::new(&server.url(), "token-1");
        send_email(&config, &params()).expect("send");
        mock.assert();
    }

    #[test]
    fn send_email_surfaces_api_errors() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/email")
            .with_status(422)
            .with_body(r#"{"ErrorCode":300,"Message":"Invalid 'To' address"}"#)
            .create();

        let config = MailApiConfig::new(&server.url(), "token-1");
        let err = send_email(&config, &params()).expect_err("should fail");
        match err {
            SendEmailError::Api { status, .. } => assert_eq!(status, 422),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fetch_inbound_parses_message_page() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/messages/inbound")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"InboundMessages":[{"MessageID":"msg-1","Subject":"Merchant KYC Required",
                    "From":"onboarding@razorpay.com","FromName":"Razorpay Onboarding",
                    "ToFull":[{"Email":"ops@merchant.example"}],
                    "TextBody":"Please share the KYC documents.",
                    "ReceivedAt":"2026-03-10T04:30:00Z"}]}"#,
            )
            .create();

        let config = MailApiConfig::new(&server.url(), "token-1");
        let messages = fetch_inbound(&config, "ops@merchant.example", "2026-03-01", 50)
            .expect("fetch");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "msg-1");
        assert_eq!(messages[0].thread_id, None);
        assert_eq!(messages[0].to_full[0].email, "ops@merchant.example");
    }
}
