//! Read loop.
//!
//! Runs for the life of a streaming session. Each iteration reads at most
//! `chunk_size` bytes, feeds them to the reassembler and publishes whatever
//! records come out. Timeouts and interrupted reads are reported and retried.
//! Any other error means the port is gone (a pulled USB tty fails with `EIO`
//! or `ENODEV`), and ends the loop like end of stream or cancellation.

use std::io;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::{broadcast, mpsc},
};
use tokio_util::sync::CancellationToken;

use super::{event::LinkEvent, writer::WriteRequest};
use crate::{
    config::ReaderConfig, reassembler::FrameReassembler, record::Record, tracing::prelude::*,
};

/// Why the read loop stopped.
#[derive(Debug)]
pub(crate) enum ReaderExit {
    /// The session's token was cancelled.
    Cancelled,
    /// The port reported end of stream.
    Closed,
    /// The port failed in a way retrying won't fix.
    Failed(io::Error),
}

/// Errors worth another read. Everything else ends the session.
fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

pub(crate) struct Reader {
    pub config: ReaderConfig,
    pub reassembler: FrameReassembler,
    pub events: broadcast::Sender<LinkEvent>,
    pub records: broadcast::Sender<Record>,
    /// Loopback target; set only when echo is enabled.
    pub echo: Option<mpsc::Sender<WriteRequest>>,
}

impl Reader {
    pub async fn run<R>(mut self, mut source: R, cancel: CancellationToken) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return ReaderExit::Cancelled,
                read = source.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    debug!("Port reached end of stream");
                    return ReaderExit::Closed;
                }
                Ok(n) => self.handle_chunk(&buf[..n]).await,
                Err(e) if !is_transient(e.kind()) => {
                    warn!(error = %e, "Port failed");
                    return ReaderExit::Failed(e);
                }
                Err(e) => {
                    warn!(error = %e, "Read failed, retrying");
                    let _ = self.events.send(LinkEvent::IoError { kind: e.kind() });
                    tokio::select! {
                        _ = cancel.cancelled() => return ReaderExit::Cancelled,
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
            }
        }
    }

    async fn handle_chunk(&mut self, chunk: &[u8]) {
        trace!(bytes = chunk.len(), "Read from device");

        if let Some(echo) = &self.echo {
            let request = WriteRequest::detached(Bytes::copy_from_slice(chunk));
            if echo.send(request).await.is_err() {
                debug!("Writer gone, echo disabled");
                self.echo = None;
            }
        }

        let pushed = self.reassembler.push(chunk);
        if let Some(dropped) = pushed.dropped {
            let _ = self.events.send(LinkEvent::DecodeError { dropped });
        }
        for record in pushed.records {
            trace!(%record, "Record");
            let _ = self.records.send(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmitPolicy, ReassemblerConfig};
    use std::{
        collections::VecDeque,
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    };
    use tokio::io::{AsyncWriteExt, ReadBuf};

    /// Plays back a scripted sequence of reads, then reports end of stream.
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl AsyncRead for Script {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.0.pop_front() {
                Some(Ok(data)) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                Some(Err(e)) => Poll::Ready(Err(e)),
                None => Poll::Ready(Ok(())),
            }
        }
    }

    struct Harness {
        reader: Reader,
        events: broadcast::Receiver<LinkEvent>,
        records: broadcast::Receiver<Record>,
    }

    fn harness(echo: Option<mpsc::Sender<WriteRequest>>) -> Harness {
        let (events_tx, events) = broadcast::channel(16);
        let (records_tx, records) = broadcast::channel(16);
        let reader = Reader {
            config: ReaderConfig {
                chunk_size: 8,
                echo: echo.is_some(),
                retry_delay: Duration::from_millis(10),
            },
            reassembler: FrameReassembler::new(ReassemblerConfig {
                min_fields: 2,
                emit: EmitPolicy::Delimited,
                ..Default::default()
            }),
            events: events_tx,
            records: records_tx,
            echo,
        };
        Harness {
            reader,
            events,
            records,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let mut h = harness(None);
        let script = Script(VecDeque::from(vec![
            Ok(b"1,2".to_vec()),
            Err(io::Error::from(io::ErrorKind::TimedOut)),
            Ok(b"#".to_vec()),
        ]));

        let exit = h.reader.run(script, CancellationToken::new()).await;
        assert!(matches!(exit, ReaderExit::Closed));
        assert_eq!(
            h.events.try_recv().unwrap(),
            LinkEvent::IoError {
                kind: io::ErrorKind::TimedOut
            }
        );
        assert_eq!(h.records.try_recv().unwrap().fields, ["1", "2"]);
    }

    #[tokio::test]
    async fn fatal_error_ends_the_loop() {
        let h = harness(None);
        let script = Script(VecDeque::from(vec![Err(io::Error::from(
            io::ErrorKind::BrokenPipe,
        ))]));
        let exit = h.reader.run(script, CancellationToken::new()).await;
        assert!(matches!(exit, ReaderExit::Failed(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[tokio::test(start_paused = true)]
    async fn pulled_device_ends_the_loop() {
        let mut h = harness(None);
        // EIO, as a USB tty reports once its device is gone
        let script = Script(VecDeque::from(vec![
            Ok(b"1,2#".to_vec()),
            Err(io::Error::from_raw_os_error(5)),
            Err(io::Error::from_raw_os_error(5)),
        ]));

        let exit = tokio::time::timeout(
            Duration::from_secs(60),
            h.reader.run(script, CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(matches!(exit, ReaderExit::Failed(e) if e.raw_os_error() == Some(5)));
        assert_eq!(h.records.try_recv().unwrap().fields, ["1", "2"]);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_errors_are_fatal() {
        let h = harness(None);
        let script = Script(VecDeque::from(vec![Err(io::Error::other("device vanished"))]));
        let exit = h.reader.run(script, CancellationToken::new()).await;
        assert!(matches!(exit, ReaderExit::Failed(_)));
    }

    #[tokio::test]
    async fn decode_errors_are_reported() {
        let mut h = harness(None);
        let script = Script(VecDeque::from(vec![
            Ok(b"a,".to_vec()),
            Ok(vec![0xfe, 0xfe]),
            Ok(b"b#".to_vec()),
        ]));
        h.reader.run(script, CancellationToken::new()).await;
        assert_eq!(h.events.try_recv().unwrap(), LinkEvent::DecodeError { dropped: 2 });
        assert_eq!(h.records.try_recv().unwrap().fields, ["a", "b"]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_read() {
        let h = harness(None);
        // Never written to, so the read blocks
        let (_device, link) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.reader.run(link, cancel.clone()));

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(exit, ReaderExit::Cancelled));
    }

    #[tokio::test]
    async fn echo_forwards_each_chunk() {
        let (tx, mut rx) = mpsc::channel(4);
        let h = harness(Some(tx));
        let (mut device, link) = tokio::io::duplex(64);
        device.write_all(b"ping").await.unwrap();
        drop(device);

        h.reader.run(link, CancellationToken::new()).await;
        let echoed = rx.recv().await.unwrap();
        assert_eq!(&echoed.data[..], b"ping");
        assert!(echoed.done.is_none());
    }
}
