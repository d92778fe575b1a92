//! Secret redaction for log and error output
//!
//! Git tokens travel inside job payloads and clone URLs. Anything that may
//! end up in a log line or a dead-letter reason goes through these helpers
//! first.

use regex::Regex;

const REDACTED: &str = "***";

/// Get the URL userinfo regex - returns None if regex compilation fails
fn userinfo_regex() -> Option<&'static Regex> {
    static USERINFO_REGEX: std::sync::OnceLock<Option<Regex>> = std::sync::OnceLock::new();
    USERINFO_REGEX
        .get_or_init(|| Regex::new(r"(?P<scheme>[a-zA-Z][a-zA-Z0-9+.-]*://)[^/@\s]+@").ok())
        .as_ref()
}

/// Strip `user:password@` credentials from every URL in `text`
pub fn redact_url_credentials(text: &str) -> String {
    userinfo_regex().map_or_else(
        || text.to_string(),
        |regex| {
            regex
                .replace_all(text, format!("${{scheme}}{REDACTED}@").as_str())
                .into_owned()
        },
    )
}

/// Replace every occurrence of the given secrets in `text` and strip URL credentials
///
/// Empty secrets are ignored so an absent token never blanks out the message.
pub fn redact_secrets(text: &str, secrets: &[&str]) -> String {
    let mut redacted = redact_url_credentials(text);
    for secret in secrets.iter().filter(|s| !s.trim().is_empty()) {
        redacted = redacted.replace(secret, REDACTED);
    }
    redacted
}
