//! Logging setup.
//!
//! A program using this crate calls one of the `init_*` functions once at
//! startup to install a subscriber. Library code logs through the
//! `trace!()`..`error!()` macros, imported with
//! `use crate::tracing::prelude::*`.
//!
//! Console output is one line per event: local time, level, target with the
//! `serial_link::` prefix stripped, and the message. Structured fields go on
//! a dimmed second line.

use std::env;
use std::io::IsTerminal;

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime, FmtContext, FormatEvent, FormatFields, MakeWriter},
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

const CRATE_PREFIX: &str = "serial_link::";

/// Initialize logging for a service.
///
/// Under systemd (`JOURNAL_STREAM` set) events go to journald; otherwise to
/// stdout. `RUST_LOG` filters, defaulting to INFO.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
            return;
        }
        init_console(std::io::stdout, LevelFilter::INFO, std::io::stdout().is_terminal());
        error!("Failed to initialize journald logging, using stdout.");
    } else {
        init_console(std::io::stdout, LevelFilter::INFO, std::io::stdout().is_terminal());
    }
}

/// Initialize logging for an interactive tool whose stdout carries data.
///
/// Events go to stderr. `default_level` applies unless `RUST_LOG` says
/// otherwise.
pub fn init_stderr(default_level: LevelFilter, color: bool) {
    init_console(std::io::stderr, default_level, color && std::io::stderr().is_terminal());
}

fn init_console<W>(writer: W, default_level: LevelFilter, color: bool)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .event_format(LinkFormatter { color }),
        )
        .init();
}

/// Collects an event's message and fields.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldCollector {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(formatted);
            return;
        }
        // Some("foo") -> "foo"
        let cleaned = match formatted.strip_prefix("Some(") {
            Some(inner) => inner.strip_suffix(')').unwrap_or(inner).to_string(),
            None => formatted,
        };
        self.fields.push((field.name(), cleaned));
    }
}

struct LinkFormatter {
    color: bool,
}

impl LinkFormatter {
    fn paint(&self, writer: &mut Writer<'_>, code: &str, text: &str) -> std::fmt::Result {
        if self.color {
            write!(writer, "\x1b[{}m{}\x1b[0m", code, text)
        } else {
            write!(writer, "{}", text)
        }
    }
}

impl<S, N> FormatEvent<S, N> for LinkFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;
        write!(writer, " ")?;

        let (code, text) = match *event.metadata().level() {
            tracing::Level::ERROR => ("31", "ERROR"),
            tracing::Level::WARN => ("33", "WARN "),
            tracing::Level::INFO => ("32", "INFO "),
            tracing::Level::DEBUG => ("34", "DEBUG"),
            tracing::Level::TRACE => ("35", "TRACE"),
        };
        self.paint(&mut writer, code, text)?;

        let target = event.metadata().target();
        let target = target.strip_prefix(CRATE_PREFIX).unwrap_or(target);
        write!(writer, " {}: ", target)?;

        if let Some(message) = &visitor.message {
            write!(writer, "{}", message)?;
        }

        if !visitor.fields.is_empty() {
            let fields = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.trim_matches('"')))
                .collect::<Vec<_>>()
                .join(", ");
            // Align under the target: "HH:MM:SS LEVEL "
            writeln!(writer)?;
            write!(writer, "               ")?;
            self.paint(&mut writer, "90", &fields)?;
        }

        writeln!(writer)
    }
}

/// Local wall-clock time to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
