//! The Link Controller.
//!
//! A single task owns the link state and reacts to messages on its input
//! channel: host notifications, permission answers, open results and reader
//! exits. Work that can block (the permission round-trip, opening the port,
//! reading and writing) runs in separate tasks that report back through the
//! same channel, tagged with the attempt they belong to. Results from an
//! attempt that has since been abandoned are discarded.
//!
//! ```text
//!   Idle ──attach──▶ AwaitingPermission ──grant──▶ Connecting ──open──▶ Streaming
//!                          │ deny/timeout              │ fail               │ detach/EOF
//!                          ▼                           ▼                    ▼
//!                       Failed                       Failed            Disconnected
//! ```
//!
//! Idle, Disconnected and Failed all accept a fresh attach.

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, watch},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    event::{HostEvent, LinkEvent},
    reader::{Reader, ReaderExit},
    state::{FailReason, LinkState},
    writer::{self, WriteRequest},
};
use crate::{
    config::ControllerConfig,
    error::{Error, Result},
    reassembler::FrameReassembler,
    record::Record,
    selector::DeviceSelector,
    tracing::prelude::*,
    transport::{DeviceDescriptor, Port, PortOpener},
};

const INPUT_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;
const RECORD_CAPACITY: usize = 256;
const WRITE_CAPACITY: usize = 32;

pub(crate) enum Input {
    Host(HostEvent),
    Permission { attempt: u64, granted: bool },
    PermissionTimedOut { attempt: u64 },
    Opened { attempt: u64, result: Result<Box<dyn Port>> },
    ReaderExited { attempt: u64, exit: ReaderExit },
    Send(WriteRequest),
}

/// Asks the host for permission to use a device.
///
/// Called from the controller task, so implementations must not block: show
/// the dialog, stash the responder, return. The answer is delivered later
/// through the [`PermissionResponder`] (or
/// [`LinkHandle::permission_response`]).
pub trait PermissionHost: Send + Sync {
    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder);
}

/// Grants every request. For hosts without a runtime permission model.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoGrant;

impl PermissionHost for AutoGrant {
    fn request_permission(&self, device: &DeviceDescriptor, responder: PermissionResponder) {
        trace!(device = %device.name, "Granting permission");
        responder.grant();
    }
}

/// Delivers the answer to one permission request.
///
/// May be used from any thread. Answers for a request that has been
/// superseded (device detached, a newer attach) are ignored by the
/// controller.
pub struct PermissionResponder {
    input: mpsc::Sender<Input>,
    attempt: u64,
    runtime: Handle,
}

impl PermissionResponder {
    pub fn grant(self) {
        self.respond(true)
    }

    pub fn deny(self) {
        self.respond(false)
    }

    pub fn respond(self, granted: bool) {
        let message = Input::Permission {
            attempt: self.attempt,
            granted,
        };
        match self.input.try_send(message) {
            Ok(()) => {}
            // Queue full; deliver once the controller catches up
            Err(mpsc::error::TrySendError::Full(message)) => {
                let input = self.input;
                self.runtime.spawn(async move {
                    let _ = input.send(message).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(attempt = self.attempt, "Link not accepting permission answers");
            }
        }
    }
}

/// Cloneable handle for talking to a running [`LinkController`].
#[derive(Clone)]
pub struct LinkHandle {
    input: mpsc::Sender<Input>,
    state: watch::Receiver<LinkState>,
    events: broadcast::Sender<LinkEvent>,
    records: broadcast::Sender<Record>,
    shutdown: CancellationToken,
}

impl LinkHandle {
    /// Push a host notification into the link.
    pub async fn notify(&self, event: HostEvent) -> Result<()> {
        self.input
            .send(Input::Host(event))
            .await
            .map_err(|_| Error::ChannelClosed("link controller has stopped".to_string()))
    }

    /// A device was attached; run discovery unless a link is up.
    pub async fn attach(&self) -> Result<()> {
        self.notify(HostEvent::DeviceAttached { name: None }).await
    }

    /// The link's device was detached.
    pub async fn detach(&self) -> Result<()> {
        self.notify(HostEvent::DeviceDetached { name: None }).await
    }

    /// Answer the outstanding permission request.
    pub async fn permission_response(&self, granted: bool) -> Result<()> {
        self.notify(HostEvent::PermissionResponse { granted }).await
    }

    /// Run discovery and ask for permission again.
    pub async fn request_permission(&self) -> Result<()> {
        self.notify(HostEvent::PermissionRequested).await
    }

    /// Write bytes to the device.
    ///
    /// Resolves once the bytes have been written. Unless the link is
    /// streaming this fails with [`Error::Disconnected`] after a session
    /// ended, [`Error::PermissionDenied`] after a refused or unanswered
    /// permission request, and [`Error::NotConnected`] otherwise.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        match self.state() {
            LinkState::Streaming => {}
            LinkState::Disconnected => return Err(Error::Disconnected),
            LinkState::Failed(FailReason::PermissionDenied | FailReason::PermissionTimeout) => {
                return Err(Error::PermissionDenied)
            }
            _ => return Err(Error::NotConnected),
        }

        let (request, done) = WriteRequest::new(data.into());
        self.input
            .send(Input::Send(request))
            .await
            .map_err(|_| Error::NotConnected)?;

        match done.await {
            Ok(result) => result.map_err(Error::Io),
            // Dropped unanswered: the session ended first
            Err(_) => Err(Error::Disconnected),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_records(&self) -> broadcast::Receiver<Record> {
        self.records.subscribe()
    }

    /// Stop the controller, closing any open session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// An open port and the tasks serving it.
struct Session {
    attempt: u64,
    device: DeviceDescriptor,
    cancel: CancellationToken,
    writer: mpsc::Sender<WriteRequest>,
}

pub struct LinkController {
    config: ControllerConfig,
    selector: DeviceSelector,
    opener: Arc<dyn PortOpener>,
    host: Arc<dyn PermissionHost>,

    input_tx: mpsc::Sender<Input>,
    input_rx: mpsc::Receiver<Input>,
    state: watch::Sender<LinkState>,
    events: broadcast::Sender<LinkEvent>,
    records: broadcast::Sender<Record>,

    /// Bumped on every new attempt and on abandonment, so late results from
    /// a previous attempt can be told apart.
    attempt: u64,
    /// Device awaiting permission or being opened.
    candidate: Option<DeviceDescriptor>,
    session: Option<Session>,

    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl LinkController {
    pub fn new(
        config: ControllerConfig,
        selector: DeviceSelector,
        opener: Arc<dyn PortOpener>,
        host: Arc<dyn PermissionHost>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (state, _) = watch::channel(LinkState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (records, _) = broadcast::channel(RECORD_CAPACITY);

        Self {
            config,
            selector,
            opener,
            host,
            input_tx,
            input_rx,
            state,
            events,
            records,
            attempt: 0,
            candidate: None,
            session: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            input: self.input_tx.clone(),
            state: self.state.subscribe(),
            events: self.events.clone(),
            records: self.records.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Process input until [`LinkHandle::shutdown`] is called.
    pub async fn run(mut self) {
        debug!("Link controller started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                input = self.input_rx.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
            }
        }

        self.end_session("shutdown");
        self.input_rx.close();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Link controller stopped");
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Host(event) => self.handle_host_event(event),
            Input::Permission { attempt, granted } => self.permission_answered(attempt, granted),
            Input::PermissionTimedOut { attempt } => self.permission_timed_out(attempt),
            Input::Opened { attempt, result } => self.opened(attempt, result),
            Input::ReaderExited { attempt, exit } => self.reader_exited(attempt, exit),
            Input::Send(request) => self.forward_write(request),
        }
    }

    fn handle_host_event(&mut self, event: HostEvent) {
        debug!(?event, "Host event");
        match event {
            HostEvent::DeviceAttached { .. } | HostEvent::PermissionRequested => self.discover(),
            HostEvent::DeviceDetached { name } => self.detached(name.as_deref()),
            HostEvent::PermissionResponse { granted } => {
                self.permission_answered(self.attempt, granted)
            }
        }
    }

    fn set_state(&mut self, next: LinkState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Link state");
        }
    }

    fn emit(&self, event: LinkEvent) {
        trace!(%event, "Link event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn current_state(&self) -> LinkState {
        *self.state.borrow()
    }

    fn discover(&mut self) {
        if self.current_state().is_busy() {
            debug!(state = %self.current_state(), "Link in use, ignoring attach");
            return;
        }

        let device = match self.selector.discover() {
            Ok(device) => device,
            Err(e) => {
                if !matches!(e, Error::NoDeviceFound) {
                    warn!(error = %e, "Device enumeration failed");
                }
                info!("No supported device attached");
                self.attempt += 1;
                self.candidate = None;
                self.set_state(LinkState::Idle);
                self.emit(LinkEvent::NoDevice);
                return;
            }
        };

        self.attempt += 1;
        let attempt = self.attempt;
        self.candidate = Some(device.clone());

        if let Some(timeout) = self.config.permission_timeout {
            let input = self.input_tx.clone();
            let shutdown = self.shutdown.clone();
            self.tracker.spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        let _ = input.send(Input::PermissionTimedOut { attempt }).await;
                    }
                    _ = shutdown.cancelled() => {}
                }
            });
        }

        debug!(device = %device.name, attempt, "Requesting permission");
        self.host.request_permission(
            &device,
            PermissionResponder {
                input: self.input_tx.clone(),
                attempt,
                runtime: Handle::current(),
            },
        );
        // Answers are queued behind this input, so they always see this state
        self.set_state(LinkState::AwaitingPermission);
    }

    fn permission_answered(&mut self, attempt: u64, granted: bool) {
        if attempt != self.attempt || self.current_state() != LinkState::AwaitingPermission {
            debug!(attempt, granted, "Ignoring stale permission answer");
            return;
        }

        if !granted {
            info!("Permission denied");
            self.candidate = None;
            self.set_state(LinkState::Failed(FailReason::PermissionDenied));
            self.emit(LinkEvent::PermissionDenied);
            return;
        }

        let Some(device) = self.candidate.clone() else {
            return;
        };

        self.emit(LinkEvent::PermissionGranted);
        self.set_state(LinkState::Connecting);

        let opener = self.opener.clone();
        let link = self.config.link.clone();
        let input = self.input_tx.clone();
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let open = async {
                let port = opener.open(&device, &link).await?;
                if !link.settle_delay.is_zero() {
                    trace!(delay = ?link.settle_delay, "Waiting for device to settle");
                    tokio::time::sleep(link.settle_delay).await;
                }
                Ok::<_, Error>(port)
            };

            let result = tokio::select! {
                result = open => result,
                _ = shutdown.cancelled() => return,
            };
            let _ = input.send(Input::Opened { attempt, result }).await;
        });
    }

    fn permission_timed_out(&mut self, attempt: u64) {
        if attempt != self.attempt || self.current_state() != LinkState::AwaitingPermission {
            return;
        }

        warn!(
            timeout = ?self.config.permission_timeout,
            "No answer to permission request"
        );
        self.candidate = None;
        self.set_state(LinkState::Failed(FailReason::PermissionTimeout));
        self.emit(LinkEvent::PermissionDenied);
    }

    fn opened(&mut self, attempt: u64, result: Result<Box<dyn Port>>) {
        if attempt != self.attempt || self.current_state() != LinkState::Connecting {
            // Dropping the port closes it
            debug!(attempt, "Discarding result of abandoned open");
            return;
        }

        let Some(device) = self.candidate.take() else {
            return;
        };

        let port = match result {
            Ok(port) => port,
            Err(e) => {
                let event = match &e {
                    Error::Unsupported { .. } => LinkEvent::Unsupported,
                    e if e.is_cdc_open_failure() => LinkEvent::DriverIncompatible,
                    _ => LinkEvent::DeviceNotWorking,
                };
                error!(device = %device.name, error = %e, "Failed to open device");
                self.set_state(LinkState::Failed(FailReason::OpenError));
                self.emit(event);
                return;
            }
        };

        let (read_half, write_half) = tokio::io::split(port);
        let cancel = self.shutdown.child_token();
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_CAPACITY);

        self.tracker
            .spawn(writer::run(write_half, writer_rx, cancel.clone()));

        let reader = Reader {
            config: self.config.reader.clone(),
            reassembler: FrameReassembler::new(self.config.reassembler.clone()),
            events: self.events.clone(),
            records: self.records.clone(),
            echo: self.config.reader.echo.then(|| writer_tx.clone()),
        };
        let input = self.input_tx.clone();
        let reader_cancel = cancel.clone();
        self.tracker.spawn(async move {
            let exit = reader.run(read_half, reader_cancel).await;
            let _ = input.send(Input::ReaderExited { attempt, exit }).await;
        });

        info!(
            device = %device.name,
            port = ?device.port_path(),
            baud = self.config.link.baud_rate,
            "Link ready"
        );
        self.session = Some(Session {
            attempt,
            device,
            cancel,
            writer: writer_tx,
        });
        self.set_state(LinkState::Streaming);
        self.emit(LinkEvent::Ready);
    }

    fn reader_exited(&mut self, attempt: u64, exit: ReaderExit) {
        if self.session.as_ref().map(|s| s.attempt) != Some(attempt) {
            return;
        }

        match exit {
            ReaderExit::Closed => self.end_session("port closed"),
            ReaderExit::Failed(e) => {
                warn!(error = %e, "Port failed");
                self.end_session("port failed");
            }
            ReaderExit::Cancelled => self.end_session("reader cancelled"),
        }
    }

    fn detached(&mut self, name: Option<&str>) {
        let matches = |device: &DeviceDescriptor| name.map_or(true, |n| device.matches_removal(n));

        if let Some(session) = &self.session {
            if matches(&session.device) {
                self.end_session("device detached");
            }
            return;
        }

        let pending = matches!(
            self.current_state(),
            LinkState::AwaitingPermission | LinkState::Connecting
        );
        if pending && self.candidate.as_ref().is_some_and(matches) {
            info!("Device detached before link came up");
            // Invalidate in-flight permission and open results
            self.attempt += 1;
            self.candidate = None;
            self.set_state(LinkState::Idle);
        }
    }

    /// Close the session, if any. Emits `Disconnected` once per session.
    fn end_session(&mut self, reason: &str) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.cancel.cancel();
        info!(device = %session.device.name, reason, "Link disconnected");
        self.set_state(LinkState::Disconnected);
        self.emit(LinkEvent::Disconnected);
    }

    fn forward_write(&mut self, request: WriteRequest) {
        let Some(session) = &self.session else {
            request.finish(Err(std::io::ErrorKind::NotConnected.into()));
            return;
        };

        match session.writer.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!("Write queue full, rejecting send");
                request.finish(Err(std::io::ErrorKind::WouldBlock.into()));
            }
            Err(mpsc::error::TrySendError::Closed(request)) => {
                request.finish(Err(std::io::ErrorKind::NotConnected.into()));
            }
        }
    }
}
