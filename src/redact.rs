use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Maximum length of `last_error` stored on a queue entry.
pub const MAX_ERROR_LEN: usize = 500;

const CREDENTIAL_MARKERS: [&str; 7] = [
    "key",
    "token",
    "secret",
    "password",
    "credential",
    "authorization",
    "cookie",
];

static INLINE_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:api[_-]?key|access[_-]?token|token|secret|password|bearer)\s*[:=]?\s*)([A-Za-z0-9._\-+/]{8,})",
    )
    .unwrap()
});

static PREFIXED_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(sk|pk|rk)-[A-Za-z0-9_\-]{12,}").unwrap());

pub fn is_credential_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    CREDENTIAL_MARKERS.iter().any(|m| key.contains(m))
}

/// Keep the first and last four characters. Short values are fully masked.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// Recursively mask every value stored under a credential-shaped key.
pub fn mask_metadata(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let masked = if is_credential_key(k) {
                        match v {
                            Value::String(s) => Value::String(mask(s)),
                            Value::Null => Value::Null,
                            Value::Object(_) | Value::Array(_) => mask_metadata(v),
                            _ => Value::String("****".to_string()),
                        }
                    } else {
                        mask_metadata(v)
                    };
                    (k.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_metadata).collect()),
        other => other.clone(),
    }
}

/// Mask secrets embedded in free text.
pub fn redact_text(text: &str) -> String {
    let text = INLINE_SECRET_RE.replace_all(text, |caps: &regex::Captures| {
        format!("{}{}", &caps[1], mask(&caps[2]))
    });
    PREFIXED_KEY_RE
        .replace_all(&text, |caps: &regex::Captures| mask(&caps[0]))
        .into_owned()
}

/// Short single-line operator message: redacted and truncated.
pub fn short_error(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let redacted = redact_text(line);
    if redacted.chars().count() <= MAX_ERROR_LEN {
        return redacted;
    }
    let mut short: String = redacted.chars().take(MAX_ERROR_LEN - 3).collect();
    short.push_str("...");
    short
}
