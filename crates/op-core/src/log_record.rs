// SPDX-License-Identifier: MIT OR Apache-2.0
//! Log record shapes shared by the service log and per-job JSONL (spec
//! §3 "Log Record", §4.2, §6 "Per-job JSONL format").

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};

/// Serializes `ts` as RFC-3339 with a fixed millisecond fractional-second
/// width and a `Z` suffix, rather than chrono's default variable-width
/// fractional seconds.
fn serialize_millis_rfc3339<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Severity of a [`LogRecord`] or [`JobLogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail, not normally surfaced.
    Debug,
    /// Routine operational information.
    Info,
    /// Unexpected but recoverable condition.
    Warning,
    /// A failure that affected the current operation.
    Error,
}

/// One service-log line: `{ts, level, service, logger, correlation_id?,
/// event?, msg, context?}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogRecord {
    /// RFC-3339 timestamp, millisecond precision, UTC, `Z` suffix.
    #[serde(serialize_with = "serialize_millis_rfc3339")]
    pub ts: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// First dotted component of `logger` unless overridden.
    pub service: String,
    /// Fully-qualified logger name.
    pub logger: String,
    /// Correlation ID active when this record was emitted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Dotted `<area>.<verb>` event name, if this record marks a canonical
    /// event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Human-readable message.
    pub msg: String,
    /// Remaining keyword fields not otherwise named above.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// One per-job JSONL line: keys exactly `ts, level, service, job_id, msg`
/// plus optional `correlation_id, event, fields`. `None`-valued keys are
/// omitted from the encoding (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobLogRecord {
    /// RFC-3339 timestamp, millisecond precision, UTC, `Z` suffix.
    #[serde(serialize_with = "serialize_millis_rfc3339")]
    pub ts: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Owning service name.
    pub service: String,
    /// The job this line is scoped to.
    pub job_id: String,
    /// Human-readable message.
    pub msg: String,
    /// Correlation ID active when this record was emitted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Dotted `<area>.<verb>` event name, if this record marks a canonical
    /// event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Arbitrary structured fields, already passed through the redactor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_fixed_width_millis_ts(serialized: &serde_json::Value) {
        let ts = serialized["ts"].as_str().expect("ts is a string");
        assert!(ts.ends_with('Z'), "{ts}");
        let fractional = ts.split('.').nth(1).expect("has a fractional-second part");
        assert_eq!(fractional.len(), "000Z".len(), "{ts}");
    }

    #[test]
    fn log_record_ts_serializes_with_fixed_millisecond_width() {
        let record = LogRecord {
            ts: DateTime::parse_from_rfc3339("2026-07-26T00:00:00Z").unwrap().with_timezone(&Utc),
            level: LogLevel::Info,
            service: "api".to_string(),
            logger: "api.jobs".to_string(),
            correlation_id: None,
            event: None,
            msg: "hello".to_string(),
            context: None,
        };
        assert_fixed_width_millis_ts(&serde_json::to_value(&record).unwrap());
    }

    #[test]
    fn job_log_record_ts_serializes_with_fixed_millisecond_width() {
        let record = JobLogRecord {
            ts: DateTime::parse_from_rfc3339("2026-07-26T00:00:00.4Z").unwrap().with_timezone(&Utc),
            level: LogLevel::Error,
            service: "worker".to_string(),
            job_id: "train-000000000000".to_string(),
            msg: "failed".to_string(),
            correlation_id: None,
            event: None,
            fields: None,
        };
        assert_fixed_width_millis_ts(&serde_json::to_value(&record).unwrap());
    }
}
