//! Keyword-based gateway classification.
//!
//! The rule table is a pluggable policy: the engine only depends on the
//! `GatewayClassifier` trait. Classification failures are never fatal; a rule
//! that cannot decide simply reports no match and the email is ignored.

use crate::transport::FetchedEmail;

#[derive(Debug, Clone)]
pub struct VendorIdentity {
    pub address: String,
    pub name: Option<String>,
}

pub trait GatewayClassifier: Send + Sync {
    /// Returns the gateway id this email belongs to, restricted to the
    /// account's allowed list (empty list means every known gateway).
    fn classify(&self, email: &FetchedEmail, allowed: &[String]) -> Option<String>;

    fn extract_vendor_identity(&self, email: &FetchedEmail) -> VendorIdentity;
}

struct GatewayRule {
    id: &'static str,
    sender_domains: &'static [&'static str],
    keywords: &'static [&'static str],
}

const GATEWAY_RULES: &[GatewayRule] = &[
    GatewayRule {
        id: "razorpay",
        sender_domains: &["razorpay.com"],
        keywords: &["razorpay"],
    },
    GatewayRule {
        id: "payu",
        sender_domains: &["payu.in", "payumoney.com"],
        keywords: &["payu", "payumoney"],
    },
    GatewayRule {
        id: "cashfree",
        sender_domains: &["cashfree.com", "gocashfree.com"],
        keywords: &["cashfree"],
    },
    GatewayRule {
        id: "paytm",
        sender_domains: &["paytm.com", "paytmpayments.com"],
        keywords: &["paytm"],
    },
    GatewayRule {
        id: "ccavenue",
        sender_domains: &["ccavenue.com", "avenues.info"],
        keywords: &["ccavenue"],
    },
    GatewayRule {
        id: "stripe",
        sender_domains: &["stripe.com"],
        keywords: &["stripe"],
    },
];

#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    fn rule_matches(rule: &GatewayRule, email: &FetchedEmail) -> bool {
        let sender = email.from_address.to_lowercase();
        if let Some(domain) = sender.rsplit('@').next() {
            if rule
                .sender_domains
                .iter()
                .any(|candidate| domain == *candidate || domain.ends_with(&format!(".{candidate}")))
            {
                return true;
            }
        }
        let haystack = format!(
            "{} {}",
            email.subject.to_lowercase(),
            email.body_preview.to_lowercase()
        );
        rule.keywords.iter().any(|keyword| haystack.contains(keyword))
    }
}

impl GatewayClassifier for KeywordClassifier {
    fn classify(&self, email: &FetchedEmail, allowed: &[String]) -> Option<String> {
        GATEWAY_RULES
            .iter()
            .filter(|rule| allowed.is_empty() || allowed.iter().any(|a| a == rule.id))
            .find(|rule| Self::rule_matches(rule, email))
            .map(|rule| rule.id.to_string())
    }

    fn extract_vendor_identity(&self, email: &FetchedEmail) -> VendorIdentity {
        let name = email
            .from_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| value.trim_matches('"').to_string());
        VendorIdentity {
            address: email.from_address.trim().to_lowercase(),
            name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn email(from: &str, subject: &str, body: &str) -> FetchedEmail {
        FetchedEmail {
            message_id: "m1".to_string(),
            provider_thread_id: None,
            subject: subject.to_string(),
            from_address: from.to_string(),
            from_name: Some(" Razorpay Onboarding ".to_string()),
            to_addresses: vec!["ops@merchant.example".to_string()],
            body_preview: body.to_string(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn matches_by_sender_domain() {
        let classifier = KeywordClassifier;
        let email = email("no-reply@razorpay.com", "Documents pending", "");
        assert_eq!(classifier.classify(&email, &[]), Some("razorpay".to_string()));
    }

    #[test]
    fn matches_by_subdomain() {
        let classifier = KeywordClassifier;
        let email = email("kyc@onboarding.razorpay.com", "Documents pending", "");
        assert_eq!(classifier.classify(&email, &[]), Some("razorpay".to_string()));
    }

    #[test]
    fn matches_by_keyword_in_subject_or_body() {
        let classifier = KeywordClassifier;
        let by_subject = email("help@example.com", "Your PayU merchant account", "");
        assert_eq!(classifier.classify(&by_subject, &[]), Some("payu".to_string()));
        let by_body = email("help@example.com", "Update", "cashfree activation is pending");
        assert_eq!(classifier.classify(&by_body, &[]), Some("cashfree".to_string()));
    }

    #[test]
    fn respects_account_allow_list() {
        let classifier = KeywordClassifier;
        let email = email("no-reply@razorpay.com", "KYC", "");
        let allowed = vec!["payu".to_string()];
        assert_eq!(classifier.classify(&email, &allowed), None);
    }

    #[test]
    fn unmatched_email_yields_none() {
        let classifier = KeywordClassifier;
        let email = email("friend@gmail.com", "lunch?", "see you at noon");
        assert_eq!(classifier.classify(&email, &[]), None);
    }

    #[test]
    fn vendor_identity_is_trimmed_and_lowercased() {
        let classifier = KeywordClassifier;
        let email = email("No-Reply@Razorpay.com", "KYC", "");
        let identity = classifier.extract_vendor_identity(&email);
        assert_eq!(identity.address, "no-reply@razorpay.com");
        assert_eq!(identity.name.as_deref(), Some("Razorpay Onboarding"));
    }
}
