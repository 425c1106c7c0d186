//! Link configuration.
//!
//! A [`ControllerConfig`] bundles everything the Link Controller needs: the
//! serial framing applied at open ([`LinkConfig`]), the parsing rules
//! ([`ReassemblerConfig`]) and the read loop's behavior ([`ReaderConfig`]).
//! Two [`LinkProfile`] presets cover the common cases; environment variables
//! adjust individual values on top of a profile.

use std::time::Duration;

use serde::Serialize;
use strum::{Display, EnumString};

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial flow control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial parameters applied once, when the port is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,

    /// Pause between opening the port and reporting the link ready.
    ///
    /// Many Arduino boards reset when the port opens and drop whatever
    /// arrives during their bootloader window.
    pub settle_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            flow_control: FlowControl::None,
            settle_delay: Duration::ZERO,
        }
    }
}

/// When the reassembler hands a record to consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmitPolicy {
    /// Each terminated record, exactly once.
    #[default]
    Delimited,
    /// The newest record on every read, as a running snapshot.
    Snapshot,
}

/// Record parsing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblerConfig {
    pub record_delimiter: char,
    pub field_delimiter: char,

    /// Records with fewer fields are not emitted.
    pub min_fields: usize,

    /// Buffer is cleared once it holds more segments than this.
    pub segment_cap: usize,

    /// Buffer is cleared once it grows beyond this many bytes.
    pub max_buffer_len: usize,

    pub emit: EmitPolicy,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            record_delimiter: '#',
            field_delimiter: ',',
            min_fields: 6,
            segment_cap: 10,
            max_buffer_len: 64 * 1024,
            emit: EmitPolicy::Delimited,
        }
    }
}

/// Read loop behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Upper bound on a single read.
    pub chunk_size: usize,

    /// Write every chunk read straight back to the device (loopback self-test).
    pub echo: bool,

    /// Wait after a transient I/O error before reading again.
    pub retry_delay: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            echo: false,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Preset configurations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinkProfile {
    /// Sensor telemetry from a microcontroller at 9600 baud.
    #[default]
    Telemetry,
    /// High-rate echo self-test at 115200 baud.
    Loopback,
}

/// Everything the Link Controller is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub link: LinkConfig,
    pub reassembler: ReassemblerConfig,
    pub reader: ReaderConfig,

    /// Give up on an unanswered permission request after this long.
    /// `None` waits indefinitely.
    pub permission_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        LinkProfile::default().config()
    }
}

impl LinkProfile {
    pub fn config(self) -> ControllerConfig {
        match self {
            LinkProfile::Telemetry => ControllerConfig {
                link: LinkConfig {
                    baud_rate: 9600,
                    settle_delay: Duration::from_secs(1),
                    ..Default::default()
                },
                reassembler: ReassemblerConfig {
                    min_fields: 6,
                    ..Default::default()
                },
                reader: ReaderConfig {
                    chunk_size: 64,
                    echo: false,
                    ..Default::default()
                },
                permission_timeout: None,
            },
            LinkProfile::Loopback => ControllerConfig {
                link: LinkConfig {
                    baud_rate: 115200,
                    settle_delay: Duration::ZERO,
                    ..Default::default()
                },
                reassembler: ReassemblerConfig {
                    min_fields: 5,
                    ..Default::default()
                },
                reader: ReaderConfig {
                    chunk_size: 16384,
                    echo: true,
                    ..Default::default()
                },
                permission_timeout: None,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl ControllerConfig {
    /// Build a configuration from environment variables.
    ///
    /// Unset or unparseable variables leave the profile's value in place.
    ///
    /// # Environment Variables
    ///
    /// - `SERIAL_LINK_PROFILE`: `telemetry` (default) or `loopback`
    /// - `SERIAL_LINK_BAUD`: baud rate (clamped to 50-4000000)
    /// - `SERIAL_LINK_MIN_FIELDS`: minimum fields per record (clamped to 1-64)
    /// - `SERIAL_LINK_EMIT`: `delimited` or `snapshot`
    /// - `SERIAL_LINK_ECHO`: `true`/`false`
    /// - `SERIAL_LINK_PERMISSION_TIMEOUT_MS`: permission timeout; 0 disables
    pub fn from_env() -> Self {
        let profile: LinkProfile = env_parse("SERIAL_LINK_PROFILE").unwrap_or_default();
        let mut config = profile.config();

        if let Some(baud) = env_parse::<u32>("SERIAL_LINK_BAUD") {
            config.link.baud_rate = baud.clamp(50, 4_000_000);
        }
        if let Some(min) = env_parse::<usize>("SERIAL_LINK_MIN_FIELDS") {
            config.reassembler.min_fields = min.clamp(1, 64);
        }
        if let Some(emit) = env_parse("SERIAL_LINK_EMIT") {
            config.reassembler.emit = emit;
        }
        if let Some(echo) = env_parse("SERIAL_LINK_ECHO") {
            config.reader.echo = echo;
        }
        if let Some(ms) = env_parse::<u64>("SERIAL_LINK_PERMISSION_TIMEOUT_MS") {
            config.permission_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SERIAL_LINK_PROFILE",
        "SERIAL_LINK_BAUD",
        "SERIAL_LINK_MIN_FIELDS",
        "SERIAL_LINK_EMIT",
        "SERIAL_LINK_ECHO",
        "SERIAL_LINK_PERMISSION_TIMEOUT_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn profiles_match_the_two_device_modes() {
        let telemetry = LinkProfile::Telemetry.config();
        assert_eq!(telemetry.link.baud_rate, 9600);
        assert_eq!(telemetry.reassembler.min_fields, 6);
        assert_eq!(telemetry.link.settle_delay, Duration::from_secs(1));
        assert!(!telemetry.reader.echo);

        let loopback = LinkProfile::Loopback.config();
        assert_eq!(loopback.link.baud_rate, 115200);
        assert_eq!(loopback.reassembler.min_fields, 5);
        assert_eq!(loopback.reader.chunk_size, 16384);
        assert!(loopback.reader.echo);

        for config in [telemetry, loopback] {
            assert_eq!(config.link.data_bits, 8);
            assert_eq!(config.link.stop_bits, 1);
            assert_eq!(config.link.parity, Parity::None);
            assert_eq!(config.link.flow_control, FlowControl::None);
            assert_eq!(config.reassembler.record_delimiter, '#');
            assert_eq!(config.reassembler.field_delimiter, ',');
            assert_eq!(config.reassembler.segment_cap, 10);
        }
    }

    #[test]
    fn profile_and_policy_names() {
        assert_eq!("loopback".parse::<LinkProfile>().unwrap(), LinkProfile::Loopback);
        assert_eq!("snapshot".parse::<EmitPolicy>().unwrap(), EmitPolicy::Snapshot);
        assert_eq!(EmitPolicy::Delimited.to_string(), "delimited");
        assert!("bogus".parse::<LinkProfile>().is_err());
    }

    #[test]
    #[serial]
    fn from_env_defaults_to_telemetry() {
        clear_env();
        assert_eq!(ControllerConfig::from_env(), LinkProfile::Telemetry.config());
    }

    #[test]
    #[serial]
    fn from_env_overrides_profile_values() {
        clear_env();
        std::env::set_var("SERIAL_LINK_PROFILE", "loopback");
        std::env::set_var("SERIAL_LINK_MIN_FIELDS", "3");
        std::env::set_var("SERIAL_LINK_EMIT", "snapshot");
        std::env::set_var("SERIAL_LINK_ECHO", "false");
        std::env::set_var("SERIAL_LINK_PERMISSION_TIMEOUT_MS", "2500");

        let config = ControllerConfig::from_env();
        assert_eq!(config.link.baud_rate, 115200);
        assert_eq!(config.reassembler.min_fields, 3);
        assert_eq!(config.reassembler.emit, EmitPolicy::Snapshot);
        assert!(!config.reader.echo);
        assert_eq!(config.permission_timeout, Some(Duration::from_millis(2500)));

        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_clamps_and_ignores_garbage() {
        clear_env();
        std::env::set_var("SERIAL_LINK_BAUD", "10");
        std::env::set_var("SERIAL_LINK_MIN_FIELDS", "0");
        std::env::set_var("SERIAL_LINK_EMIT", "sometimes");
        std::env::set_var("SERIAL_LINK_PERMISSION_TIMEOUT_MS", "0");

        let config = ControllerConfig::from_env();
        assert_eq!(config.link.baud_rate, 50);
        assert_eq!(config.reassembler.min_fields, 1);
        assert_eq!(config.reassembler.emit, EmitPolicy::Delimited);
        assert_eq!(config.permission_timeout, None);

        clear_env();
    }
}
