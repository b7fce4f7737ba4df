use std::sync::OnceLock;

use regex::Regex;

fn reply_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(re|fwd?|fw)\s*:\s*").expect("valid regex"))
}

/// Strip reply/forward markers for fuzzy thread matching: repeated leading
/// `Re:`/`Fwd:`/`Fw:` in any case, surrounding whitespace, then lowercase.
/// Idempotent, so stored normalized subjects can be re-normalized safely.
pub fn normalize_subject(subject: &str) -> String {
    let mut current = subject.trim();
    loop {
        match reply_prefix().find(current) {
            Some(found) if found.start() == 0 => current = &current[found.end()..],
            _ => break,
        }
    }
    current.trim().to_lowercase()
}
