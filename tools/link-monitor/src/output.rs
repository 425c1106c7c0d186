//! Output formatting for records and link events.

use std::time::Instant;

use colored::{ColoredString, Colorize};
use serial_link::{LinkEvent, Record};

/// Output formatter configuration
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Print records as JSON arrays
    pub json: bool,
    pub use_color: bool,
}

pub struct Output {
    config: OutputConfig,
    start: Instant,
}

impl Output {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            start: Instant::now(),
        }
    }

    fn timestamp(&self) -> String {
        format!("{:10.3}", self.start.elapsed().as_secs_f64())
    }

    /// Format a record for stdout.
    pub fn record(&self, record: &Record) -> String {
        if self.config.json {
            return serde_json::to_string(record).unwrap_or_else(|_| record.to_string());
        }

        let fields = record.to_string();
        if self.config.use_color {
            format!("{} {}", self.timestamp().dimmed(), fields)
        } else {
            format!("{} {}", self.timestamp(), fields)
        }
    }

    /// Format a link event for stderr.
    pub fn event(&self, event: &LinkEvent) -> String {
        let text = format!("[{}]", event);
        let text = if self.config.use_color {
            event_color(event, &text).to_string()
        } else {
            text
        };
        format!("{} {}", self.timestamp(), text)
    }
}

fn event_color(event: &LinkEvent, text: &str) -> ColoredString {
    match event {
        LinkEvent::Ready | LinkEvent::PermissionGranted => text.green(),
        LinkEvent::Disconnected | LinkEvent::NoDevice => text.yellow(),
        LinkEvent::DecodeError { .. } | LinkEvent::IoError { .. } => text.magenta(),
        LinkEvent::Unsupported
        | LinkEvent::PermissionDenied
        | LinkEvent::DriverIncompatible
        | LinkEvent::DeviceNotWorking => text.red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        ["21.5", "40", "ok"].into_iter().collect()
    }

    #[test]
    fn plain_record_has_timestamp_and_fields() {
        let output = Output::new(OutputConfig::default());
        let line = output.record(&record());
        assert!(line.ends_with(" 21.5,40,ok"), "{line}");
        assert!(line.trim_start().starts_with("0."), "{line}");
    }

    #[test]
    fn json_record_is_a_bare_array() {
        let output = Output::new(OutputConfig {
            json: true,
            use_color: false,
        });
        assert_eq!(output.record(&record()), r#"["21.5","40","ok"]"#);
    }

    #[test]
    fn events_are_bracketed() {
        let output = Output::new(OutputConfig::default());
        assert!(output
            .event(&LinkEvent::DecodeError { dropped: 3 })
            .ends_with("[dropped 3 undecodable bytes]"));
    }
}
