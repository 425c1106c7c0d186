//! link-monitor: watch a USB serial link and print the records it carries.
//!
//! Records go to stdout, link events and logs to stderr. Lines typed on
//! stdin are sent to the device, each terminated by the record delimiter.

mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use output::{Output, OutputConfig};
use serial_link::{
    transport::{system_source, FixedPortSource, UsbTransport},
    AutoGrant, ControllerConfig, DeviceSelector, DeviceSource, EmitPolicy, LinkController,
    LinkEvent, LinkHandle, LinkProfile, Record, SerialOpener,
};
use tokio::{
    signal::unix::{self, SignalKind},
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port to open instead of discovering a USB device
    #[arg(short, long)]
    port: Option<String>,

    /// Parameter preset (telemetry, loopback); defaults to SERIAL_LINK_* env
    #[arg(long)]
    profile: Option<LinkProfile>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Minimum fields for a record to be printed
    #[arg(short, long)]
    min_fields: Option<usize>,

    /// Record emission (delimited, snapshot)
    #[arg(short, long)]
    emit: Option<EmitPolicy>,

    /// Echo everything read back to the device
    #[arg(long)]
    echo: bool,

    /// Print records as JSON arrays
    #[arg(short, long)]
    json: bool,

    /// Don't watch for USB hotplug events
    #[arg(long)]
    no_hotplug: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        let mut config = match self.profile {
            Some(profile) => profile.config(),
            None => ControllerConfig::from_env(),
        };
        if let Some(baud) = self.baud {
            config.link.baud_rate = baud;
        }
        if let Some(min_fields) = self.min_fields {
            config.reassembler.min_fields = min_fields.max(1);
        }
        if let Some(emit) = self.emit {
            config.reassembler.emit = emit;
        }
        if self.echo {
            config.reader.echo = true;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    serial_link::tracing::init_stderr(level, !args.no_color);

    let config = args.controller_config();
    let record_delimiter = config.reassembler.record_delimiter;
    info!(
        baud = config.link.baud_rate,
        min_fields = config.reassembler.min_fields,
        emit = %config.reassembler.emit,
        echo = config.reader.echo,
        "Starting link"
    );

    let source: Box<dyn DeviceSource> = match &args.port {
        Some(path) => Box::new(FixedPortSource::new(path.clone())),
        None => system_source(),
    };
    let controller = LinkController::new(
        config,
        DeviceSelector::with_driver_table(source),
        Arc::new(SerialOpener),
        Arc::new(AutoGrant),
    );
    let link = controller.handle();

    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let output = Arc::new(Output::new(OutputConfig {
        json: args.json,
        use_color: !args.no_color && std::io::IsTerminal::is_terminal(&std::io::stdout()),
    }));

    tracker.spawn(print_records(
        link.subscribe_records(),
        output.clone(),
        shutdown.clone(),
    ));
    tracker.spawn(print_events(link.subscribe_events(), output, shutdown.clone()));
    tracker.spawn(forward_stdin(link.clone(), record_delimiter, shutdown.clone()));
    tracker.spawn(controller.run());

    if args.port.is_none() && !args.no_hotplug {
        if let Err(e) = UsbTransport::new(link.clone())
            .start_discovery(shutdown.clone())
            .await
        {
            warn!("USB hotplug unavailable: {}", e);
        }
    }

    link.attach().await.context("Link controller stopped early")?;
    tracker.close();

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => debug!("Received SIGINT."),
        _ = sigterm.recv() => debug!("Received SIGTERM."),
    }

    shutdown.cancel();
    link.shutdown();
    tracker.wait().await;
    Ok(())
}

async fn print_records(
    mut records: broadcast::Receiver<Record>,
    output: Arc<Output>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            record = records.recv() => match record {
                Ok(record) => println!("{}", output.record(&record)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn print_events(
    mut events: broadcast::Receiver<LinkEvent>,
    output: Arc<Output>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => eprintln!("{}", output.event(&event)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed link events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Send each stdin line to the device.
///
/// Reading happens on a plain thread: a blocking stdin read can't be
/// cancelled and would otherwise hold up runtime shutdown.
async fn forward_stdin(link: LinkHandle, record_delimiter: char, shutdown: CancellationToken) {
    let (tx, mut lines) = mpsc::channel::<String>(16);
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to spawn stdin reader: {}", e);
        return;
    }

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut command = line.to_string();
        if !command.ends_with(record_delimiter) {
            command.push(record_delimiter);
        }
        if let Err(e) = link.send(command).await {
            warn!("Send failed: {}", e);
        }
    }
}
