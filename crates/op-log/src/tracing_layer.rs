// SPDX-License-Identifier: MIT OR Apache-2.0
//! A [`tracing_subscriber::Layer`] that renders every event into the exact
//! envelope spec §4.2 names (`ts, level, service, logger, correlation_id?,
//! event?, msg, context?`), then redacts and writes it.

use crate::redact::redact;
use chrono::Utc;
use op_core::{LogLevel, LogRecord};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// One or more byte sinks an event line is mirrored into (stdout, a rotated
/// file, or both — spec §4.2 "log_to_file, log_to_stdout").
#[derive(Clone, Default)]
pub struct LineSinks {
    sinks: Vec<Arc<Mutex<dyn Write + Send>>>,
}

impl LineSinks {
    /// Builds an empty sink set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink, returning `self` for chaining.
    pub fn with_sink(mut self, sink: Arc<Mutex<dyn Write + Send>>) -> Self {
        self.sinks.push(sink);
        self
    }

    fn write_line(&self, line: &str) {
        for sink in &self.sinks {
            if let Ok(mut guard) = sink.lock() {
                let _ = writeln!(guard, "{line}");
            }
        }
    }
}

/// Renders every [`tracing::Event`] as one redacted JSON line per spec
/// §4.2's envelope, with `service` fixed at construction (the first dotted
/// component of the logger name, unless overridden).
pub struct JsonLineLayer {
    service: String,
    sinks: LineSinks,
}

impl JsonLineLayer {
    /// Builds a layer that tags every record with `service` and writes into
    /// `sinks`.
    pub fn new(service: impl Into<String>, sinks: LineSinks) -> Self {
        Self { service: service.into(), sinks }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    event: Option<String>,
    context: serde_json::Map<String, serde_json::Value>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            name => {
                self.context.insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.context.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.context.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.context.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.context.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        match field.name() {
            "message" => self.message = Some(rendered),
            "event" => self.event = Some(rendered),
            name => {
                self.context.insert(name.to_string(), serde_json::Value::String(rendered));
            }
        }
    }
}

impl<S: Subscriber> Layer<S> for JsonLineLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let level = match *event.metadata().level() {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        };

        let record = LogRecord {
            ts: Utc::now(),
            level,
            service: self.service.clone(),
            logger: event.metadata().target().to_string(),
            correlation_id: op_context::get_correlation_id(),
            event: visitor.event,
            msg: visitor.message.unwrap_or_default(),
            context: if visitor.context.is_empty() {
                None
            } else {
                Some(serde_json::Value::Object(visitor.context))
            },
        };

        if let Ok(line) = serde_json::to_string(&record) {
            self.sinks.write_line(&redact(&line));
        }
    }
}
