// SPDX-License-Identifier: MIT OR Apache-2.0
//! The pure redactor applied to every serialized log record before write
//! (spec §4.2 "Redaction").

use regex::Regex;
use std::sync::OnceLock;

const REDACTED: &str = "***REDACTED***";

/// Keys (matched as a case-insensitive substring) whose values are masked by
/// [`redact_value`], regardless of what the value looks like.
const SENSITIVE_KEY_SUBSTRINGS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api_key",
    "apikey",
    "token",
    "password",
    "secret",
    "credential",
    "auth",
    "bearer",
    "hf_token",
    "runpod_api_key",
    "github_token",
];

/// Recursion depth [`redact_value`] will not descend past.
const MAX_DEPTH: usize = 10;

struct Pattern {
    regex: Regex,
    replace: fn(&regex::Captures<'_>) -> String,
}

fn patterns() -> &'static Vec<Pattern> {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // Vendor token prefixes: hf_, sk-, ghp_, rpa_.
            Pattern {
                regex: Regex::new(r"\bhf_[A-Za-z0-9]+\b").unwrap(),
                replace: |_| format!("hf_{REDACTED}"),
            },
            Pattern {
                regex: Regex::new(r"\bsk-[A-Za-z0-9-]+\b").unwrap(),
                replace: |_| format!("sk-{REDACTED}"),
            },
            Pattern {
                regex: Regex::new(r"\bghp_[A-Za-z0-9]+\b").unwrap(),
                replace: |_| format!("ghp_{REDACTED}"),
            },
            Pattern {
                regex: Regex::new(r"\brpa_[A-Za-z0-9]+\b").unwrap(),
                replace: |_| format!("rpa_{REDACTED}"),
            },
            // Bearer <token>
            Pattern {
                regex: Regex::new(r"(?i)Bearer\s+\S+").unwrap(),
                replace: |_| format!("Bearer {REDACTED}"),
            },
            // key=value for token/password/api[_-]?key
            Pattern {
                regex: Regex::new(r"(?i)(token|password|api[_-]?key)=\S+").unwrap(),
                replace: |caps| format!("{}=***", &caps[1]),
            },
            // "password": "value" / 'token': 'value' style JSON fragments.
            Pattern {
                regex: Regex::new(
                    r#"(?i)"(password|token|api_key)"\s*:\s*"[^"]*""#,
                )
                .unwrap(),
                replace: |caps| format!("\"{}\": \"***\"", &caps[1]),
            },
            // Home directory paths.
            Pattern {
                regex: Regex::new(r"/Users/[^/]+/").unwrap(),
                replace: |_| "/[HOME]/".to_string(),
            },
            Pattern {
                regex: Regex::new(r"/home/[^/]+/").unwrap(),
                replace: |_| "/[HOME]/".to_string(),
            },
        ]
    })
}

/// Applies every redaction pattern to `text`, returning the scrubbed string.
///
/// Idempotent: `redact(&redact(text)) == redact(text)` for every input,
/// which is what spec §8 invariant 4 relies on (`redact(line) == line` for a
/// line that has already been through this function).
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in patterns() {
        out = pattern
            .regex
            .replace_all(&out, |caps: &regex::Captures<'_>| (pattern.replace)(caps))
            .into_owned();
    }
    out
}

fn key_is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

/// Recursively masks any object value whose key matches a sensitive-key
/// substring (spec §4.2), in place. Recursion is bounded at depth 10; values
/// found beyond that depth are left untouched rather than explored further.
pub fn redact_value(value: &mut serde_json::Value) {
    redact_value_at_depth(value, 0);
}

fn redact_value_at_depth(value: &mut serde_json::Value, depth: usize) {
    if depth >= MAX_DEPTH {
        return;
    }
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if key_is_sensitive(key) {
                    *v = serde_json::Value::String(REDACTED.to_string());
                } else {
                    redact_value_at_depth(v, depth + 1);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value_at_depth(item, depth + 1);
            }
        }
        serde_json::Value::String(s) => {
            *s = redact(s);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_hf_token() {
        assert_eq!(redact("hf_abc123 secret"), "hf_***REDACTED*** secret");
    }

    #[test]
    fn redacts_sk_token() {
        assert_eq!(redact("key is sk-proj-ab12cd34"), "key is sk-***REDACTED***");
    }

    #[test]
    fn redacts_bearer_header() {
        assert_eq!(redact("Authorization: Bearer abc.def.ghi"), "Authorization: Bearer ***REDACTED***");
    }

    #[test]
    fn redacts_key_equals_value() {
        assert_eq!(redact("password=hunter2"), "password=***");
        assert_eq!(redact("api_key=xyz"), "api_key=***");
    }

    #[test]
    fn redacts_home_paths() {
        assert_eq!(redact("/Users/sam/projects/x"), "/[HOME]/projects/x");
        assert_eq!(redact("/home/sam/projects/x"), "/[HOME]/projects/x");
    }

    #[test]
    fn redact_is_idempotent() {
        let once = redact("hf_abc123 token=secret /home/sam/x Bearer zzz");
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn redact_value_masks_sensitive_keys_recursively() {
        let mut payload = json!({
            "user": "sam",
            "auth": { "password": "hunter2", "nested": { "api_key": "xyz" } },
            "notes": ["fine", "token=abc123"],
        });
        redact_value(&mut payload);
        assert_eq!(payload["auth"], json!(REDACTED));
        assert_eq!(payload["notes"][1], "token=***");
        assert_eq!(payload["user"], "sam");
    }

    #[test]
    fn redact_value_stops_recursing_past_max_depth() {
        let mut deep = json!({"a":{"a":{"a":{"a":{"a":{"a":{"a":{"a":{"a":{"a":{"token":"leak"}}}}}}}}}}});
        redact_value(&mut deep);
        // the "token" key sits at nesting depth 10, at MAX_DEPTH's boundary.
        let mut cursor = &deep;
        for _ in 0..10 {
            cursor = &cursor["a"];
        }
        assert_eq!(cursor["token"], "leak");
    }
}
