//! Diagnostics routed to the host's log channel
//!
//! The bridge logs with ordinary `tracing` macros. Each bridge instance owns
//! a [`Dispatch`] whose [`HostLogLayer`] renders events and forwards them
//! to a [`LogSink`], normally OpenVPN's `plugin_log` callback. Entry points
//! enter that dispatch for their whole duration, so several instances in
//! one process keep separate sinks.

use crate::error::ConfigError;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer};

/// Severity understood by the host log channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warn,
    Note,
    Debug,
}

impl Severity {
    fn from_level(level: &Level) -> Self {
        match *level {
            Level::ERROR => Self::Error,
            Level::WARN => Self::Warn,
            Level::INFO => Self::Note,
            _ => Self::Debug,
        }
    }
}

/// Destination for rendered log lines
pub type LogSink = Arc<dyn Fn(Severity, &str) + Send + Sync>;

/// `tracing` layer forwarding events to a [`LogSink`]
pub struct HostLogLayer {
    sink: LogSink,
}

impl HostLogLayer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for HostLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);
        (self.sink)(Severity::from_level(event.metadata().level()), &line.finish());
    }
}

/// Renders `message key=value key=value`
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Parse an `EnvFilter` directive given as the `log` option
pub fn parse_filter(filter: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(filter).map_err(|e| ConfigError::invalid_option("log", e.to_string()))
}

/// Build the per-instance dispatcher
///
/// Without a host sink, events go to stderr through the `fmt` layer.
pub fn dispatch(sink: Option<LogSink>, filter: &str) -> Result<Dispatch, ConfigError> {
    let filter = parse_filter(filter)?;

    let dispatch = match sink {
        Some(sink) => Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(HostLogLayer::new(sink)),
        ),
        None => Dispatch::new(
            tracing_subscriber::registry().with(filter).with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            ),
        ),
    };
    Ok(dispatch)
}
