//! Credential redaction for logs, error messages, and DLQ contexts.
//!
//! Any value bound to a key matching the sensitive pattern must never leave
//! the process. Redaction is applied at error construction and again at the
//! DLQ boundary, so a missed call site cannot leak through both.

use once_cell::sync::Lazy;
use regex::Regex;

/// Field-name pattern for sensitive data, matching the upstream convention.
pub static SENSITIVE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(api_key|token|auth|password|secret|credential)").unwrap());

/// `key=value` / `key: value` / `"key": "value"` forms with a sensitive key.
static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)("?[a-z0-9_\-]*(?:api_key|token|auth|password|secret|credential)[a-z0-9_\-]*"?\s*[:=]\s*)("[^"]*"|[^\s&,;"]+)"#,
    )
    .unwrap()
});

/// `Authorization: Bearer xyz` style headers.
static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(bearer)\s+[a-z0-9._\-]+").unwrap());

pub const REDACTED: &str = "[REDACTED]";

/// True when a config/JSON key should never be emitted verbatim.
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY.is_match(key)
}

/// Redact credential material from free text (error messages, log lines,
/// URLs with sensitive query keys).
pub fn redact_text(text: &str) -> String {
    let out = KEY_VALUE.replace_all(text, |caps: &regex::Captures<'_>| {
        format!("{}{}", &caps[1], REDACTED)
    });
    BEARER
        .replace_all(&out, |caps: &regex::Captures<'_>| format!("{} {}", &caps[1], REDACTED))
        .into_owned()
}

/// Recursively redact sensitive keys in a JSON value (DLQ payload contexts).
pub fn redact_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *val = serde_json::Value::String(REDACTED.to_string());
                } else {
                    redact_json(val);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact_json(item);
            }
        }
        serde_json::Value::String(s) => {
            let redacted = redact_text(s);
            if redacted != *s {
                *s = redacted;
            }
        }
        _ => {}
    }
}
