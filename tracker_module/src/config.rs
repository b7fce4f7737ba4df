//! File-based configuration for the tracker.
//!
//! Accounts and policy knobs come from a TOML file; secrets (mail API token,
//! composer API key) stay in the environment. The engine treats everything
//! here as read-only.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono_tz::Tz;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default)]
    pub policy: ReminderPolicy,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// One monitored mailbox: a merchant's onboarding correspondence.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: Uuid,
    pub name: String,
    /// Address of the monitored mailbox itself.
    pub mailbox_address: String,
    /// Where self-reminders and health alerts for this account go.
    pub operator_address: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,
    #[serde(default = "default_self_reminder_minutes")]
    pub self_reminder_minutes: i64,
    #[serde(default = "default_vendor_nudge_minutes")]
    pub vendor_nudge_minutes: i64,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Gateways this account tracks; empty means every known gateway.
    #[serde(default)]
    pub gateways: Vec<String>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

impl AccountConfig {
    /// Civil time zone for the working-hours gate. Validated at load time;
    /// falls back to UTC if the config was constructed by hand with a bad
    /// zone name.
    pub fn tz(&self) -> Tz {
        Tz::from_str(&self.timezone).unwrap_or(Tz::UTC)
    }
}

/// Named reminder policy knobs. The short/long cooldown split mirrors the
/// observed contract: accounts configured with a sub-threshold nudge interval
/// get the short cooldown between repeat nudges.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReminderPolicy {
    pub short_interval_threshold_minutes: i64,
    pub short_cooldown_minutes: i64,
    pub long_cooldown_minutes: i64,
    pub self_reminder_cooldown_minutes: i64,
    pub vendor_nudge_cap: u32,
    pub workday_start_hour: u32,
    pub workday_end_hour: u32,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            short_interval_threshold_minutes: 60,
            short_cooldown_minutes: 30,
            long_cooldown_minutes: 360,
            self_reminder_cooldown_minutes: 360,
            vendor_nudge_cap: 3,
            workday_start_hour: 9,
            workday_end_hour: 19,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_minutes: u64,
    /// Local hour (account time zone of the alert route) for the daily digest.
    pub digest_hour: u32,
    pub staleness_minutes: i64,
    pub stuck_thread_hours: i64,
    pub duplicate_window_hours: i64,
    /// More than this many threads sharing a normalized subject within the
    /// window counts as a correlation failure.
    pub duplicate_thread_limit: u32,
    pub volume_limit_per_hour: u64,
    pub alert_cooldown_minutes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_minutes: 10,
            digest_hour: 9,
            staleness_minutes: 120,
            stuck_thread_hours: 72,
            duplicate_window_hours: 24,
            duplicate_thread_limit: 2,
            volume_limit_per_hour: 100,
            alert_cooldown_minutes: 240,
        }
    }
}

impl TrackerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: TrackerConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for account in &self.accounts {
            if Tz::from_str(&account.timezone).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "account {}: unknown timezone {:?}",
                    account.name, account.timezone
                )));
            }
            if account.poll_interval_minutes == 0 {
                return Err(ConfigError::Invalid(format!(
                    "account {}: poll_interval_minutes must be positive",
                    account.name
                )));
            }
            if account.self_reminder_minutes <= 0 || account.vendor_nudge_minutes <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "account {}: reminder intervals must be positive",
                    account.name
                )));
            }
            if account.mailbox_address.trim().is_empty()
                || account.operator_address.trim().is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "account {}: mailbox and operator addresses are required",
                    account.name
                )));
            }
        }
        if self.policy.workday_start_hour >= self.policy.workday_end_hour
            || self.policy.workday_end_hour > 24
        {
            return Err(ConfigError::Invalid(
                "working hours must satisfy start < end <= 24".to_string(),
            ));
        }
        Ok(())
    }

    pub fn account(&self, id: Uuid) -> Option<&AccountConfig> {
        self.accounts.iter().find(|account| account.id == id)
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tracker.db")
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_self_reminder_minutes() -> i64 {
    30
}

fn default_vendor_nudge_minutes() -> i64 {
    180
}

fn default_lookback_days() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database_path = "state/tracker.db"

[policy]
short_interval_threshold_minutes = 60
vendor_nudge_cap = 3

[[accounts]]
id = "4fd1b7c6-5f2a-4f4e-9f3e-0a8de0cbe401"
name = "acme-onboarding"
mailbox_address = "onboarding@acme.example"
operator_address = "ops@acme.example"
timezone = "Asia/Kolkata"
poll_interval_minutes = 5
self_reminder_minutes = 30
vendor_nudge_minutes = 180
gateways = ["razorpay", "payu"]
"#;

    #[test]
    fn parses_sample_config() {
        let config: TrackerConfig = toml::from_str(SAMPLE).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.accounts.len(), 1);
        let account = &config.accounts[0];
        assert_eq!(account.name, "acme-onboarding");
        assert_eq!(account.poll_interval_minutes, 5);
        assert_eq!(account.gateways, vec!["razorpay", "payu"]);
        assert!(account.active);
        assert_eq!(account.lookback_days, 30);
        assert_eq!(config.policy.vendor_nudge_cap, 3);
        assert_eq!(config.monitor.check_interval_minutes, 10);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut config: TrackerConfig = toml::from_str(SAMPLE).expect("parse");
        config.accounts[0].timezone = "Mars/Olympus".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut config: TrackerConfig = toml::from_str(SAMPLE).expect("parse");
        config.accounts[0].poll_interval_minutes = 0;
        assert!(config.validate().is_err());
    }
}
