//! Write task.
//!
//! The only code that touches the port's write half. Consumer sends and
//! loopback echoes both arrive as [`WriteRequest`]s on one channel, so they
//! are written whole and in arrival order.

use std::io;

use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

use crate::tracing::prelude::*;

pub(crate) struct WriteRequest {
    pub data: Bytes,
    /// Receives the outcome; `None` for fire-and-forget writes.
    pub done: Option<oneshot::Sender<io::Result<()>>>,
}

impl WriteRequest {
    pub fn new(data: Bytes) -> (Self, oneshot::Receiver<io::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                data,
                done: Some(tx),
            },
            rx,
        )
    }

    pub fn detached(data: Bytes) -> Self {
        Self { data, done: None }
    }

    /// Report the outcome to the requester, if it is still waiting.
    pub fn finish(self, result: io::Result<()>) {
        if let Some(done) = self.done {
            let _ = done.send(result);
        }
    }
}

pub(crate) async fn run<W>(
    mut sink: W,
    mut requests: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(r) => r,
                None => break,
            },
        };

        let result = write_all(&mut sink, &request.data).await;
        match &result {
            Ok(()) => trace!(bytes = request.data.len(), "Wrote to device"),
            Err(e) => warn!(error = %e, bytes = request.data.len(), "Write to device failed"),
        }
        request.finish(result);
    }

    trace!("Writer exiting");
}

async fn write_all<W: AsyncWrite + Unpin>(sink: &mut W, data: &[u8]) -> io::Result<()> {
    sink.write_all(data).await?;
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn writes_in_order_and_reports_results() {
        let (device, link) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(link, rx, cancel.clone()));

        let (first, first_done) = WriteRequest::new(Bytes::from_static(b"LED,1#"));
        tx.send(first).await.unwrap();
        tx.send(WriteRequest::detached(Bytes::from_static(b"LED,0#")))
            .await
            .unwrap();
        first_done.await.unwrap().unwrap();

        let mut device = device;
        let mut buf = [0u8; 12];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"LED,1#LED,0#");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_is_reported() {
        let (device, link) = tokio::io::duplex(64);
        drop(device);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(run(link, rx, CancellationToken::new()));

        let (request, done) = WriteRequest::new(Bytes::from_static(b"x#"));
        tx.send(request).await.unwrap();
        assert!(done.await.unwrap().is_err());

        drop(tx);
        task.await.unwrap();
    }
}
