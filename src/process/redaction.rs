//! Redaction of secrets in rendered command lines.

use std::borrow::Cow;

const REDACTED: &str = "***REDACTED***";

fn is_sensitive_key(key: &str) -> bool {
    const SENSITIVE_KEYS: [&str; 7] = [
        "password",
        "token",
        "secret",
        "api_key",
        "apikey",
        "auth",
        "authorization",
    ];
    let bare = key.trim().trim_start_matches('-');
    SENSITIVE_KEYS
        .iter()
        .any(|candidate| bare.eq_ignore_ascii_case(candidate))
}

/// Replace the value of a `key=value` argument when `key` names a secret.
pub(crate) fn redact_argument(arg: &str) -> Cow<'_, str> {
    match arg.split_once('=') {
        Some((key, _)) if is_sensitive_key(key) => {
            Cow::Owned(format!("{}={REDACTED}", key.trim()))
        }
        _ => Cow::Borrowed(arg),
    }
}

/// Replace `value` when the environment variable `key` names a secret.
pub(crate) fn redact_env_value<'a>(key: &str, value: &'a str) -> &'a str {
    let lowered = key.to_ascii_lowercase();
    let sensitive = lowered
        .split('_')
        .any(is_sensitive_key)
        || is_sensitive_key(&lowered);
    if sensitive { REDACTED } else { value }
}
