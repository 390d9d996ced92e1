//! Entity id construction for sample keys.

/// Prefix prepended to every sanitized key unless the profile overrides it.
pub const DEFAULT_ENTITY_PREFIX: &str = "sensor.androbd_";

/// Lowercase `key` and collapse every run of characters outside
/// `[a-z0-9_]` into a single `_`.
///
/// Runs of literal underscores are collapsed as well, so `"A__B"` and
/// `"A  B"` both become `"a_b"`.
pub fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut last_underscore = false;

    for ch in key.chars().flat_map(char::to_lowercase) {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(mapped);
    }

    out
}

/// Full entity id for a sample key: `{prefix}{sanitized_key}`.
pub fn entity_id(prefix: &str, key: &str) -> String {
    format!("{prefix}{}", sanitize_key(key))
}
