//! Connection lifecycle.
//!
//! A [`Connection`] owns one open byte stream. The stream is split on open:
//! the write half stays here behind an async mutex, and the read half moves
//! into a background task that runs it through a [`FrameReassembler`] and
//! hands every frame to the [`ResponseDispatcher`]. Read errors and EOF are
//! published on the error channel rather than returned, since they are not
//! tied to any particular caller.
//!
//! The command gate lives on the connection, so reopening a port always
//! starts with a free gate and an empty reassembly buffer.

use crate::error::{DeviceError, DeviceResult, StreamFault};
use crate::protocol::dispatch::ResponseDispatcher;
use crate::protocol::framer::FrameReassembler;
use crate::protocol::gate::{CommandGate, GateTiming};
use crate::serial::{open_serial_async, DynSerial, SerialParams};
use std::fmt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

const READ_CHUNK: usize = 256;

/// One open transport plus its reader task and command gate.
pub struct Connection {
    path: String,
    writer: Mutex<Option<WriteHalf<DynSerial>>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    gate: CommandGate,
    dispatcher: ResponseDispatcher,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Open a serial port and start reading from it.
    ///
    /// # Errors
    /// [`DeviceError::Open`] if the device cannot be opened.
    pub async fn open(
        path: &str,
        params: SerialParams,
        dispatcher: ResponseDispatcher,
        timing: GateTiming,
    ) -> DeviceResult<Self> {
        let stream = open_serial_async(path, params).await?;
        tracing::info!(port = path, baud = params.baud_rate, "opened serial port");
        Ok(Self::from_stream(path, Box::new(stream), dispatcher, timing))
    }

    /// Wrap an already-open byte stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream(
        label: impl Into<String>,
        stream: DynSerial,
        dispatcher: ResponseDispatcher,
        timing: GateTiming,
    ) -> Self {
        let path = label.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let gate = CommandGate::new(timing);

        let span = tracing::info_span!("serial_reader", port = %path);
        let task = tokio::spawn(
            read_loop(read_half, dispatcher.clone(), gate.clone()).instrument(span),
        );

        Self {
            path,
            writer: Mutex::new(Some(write_half)),
            reader: parking_lot::Mutex::new(Some(task)),
            gate,
            dispatcher,
            closed: watch::Sender::new(false),
        }
    }

    /// Port path (or label) this connection was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Command gate scoped to this connection.
    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    /// Dispatcher fed by this connection's reader.
    pub fn dispatcher(&self) -> &ResponseDispatcher {
        &self.dispatcher
    }

    /// Watch that flips to `true` when `close` starts.
    ///
    /// Waiters race it against their reply so a close ends them at once.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Whether `close` has not been called yet.
    pub async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Write and flush raw bytes.
    ///
    /// # Errors
    /// [`DeviceError::NotConnected`] after `close`, [`DeviceError::Write`] if
    /// the transport rejects the bytes.
    pub async fn write(&self, bytes: &[u8]) -> DeviceResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(DeviceError::NotConnected)?;

        writer
            .write_all(bytes)
            .await
            .map_err(|source| DeviceError::Write { source })?;
        writer
            .flush()
            .await
            .map_err(|source| DeviceError::Write { source })?;
        tracing::trace!(port = %self.path, bytes = ?String::from_utf8_lossy(bytes), "wrote");
        Ok(())
    }

    /// Stop the reader and shut the transport down. No-op if already closed.
    ///
    /// # Errors
    /// [`DeviceError::Close`] if the transport reports a shutdown failure.
    pub async fn close(&self) -> DeviceResult<()> {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        self.closed.send_replace(true);

        let reader = self.reader.lock().take();
        if let Some(task) = reader {
            task.abort();
            // Wait for the task to drop its read half.
            let _ = task.await;
        }

        let result = writer
            .shutdown()
            .await
            .map_err(|source| DeviceError::Close { source });
        drop(writer);
        self.gate.release();

        match &result {
            Ok(()) => tracing::info!(port = %self.path, "closed serial port"),
            Err(err) => tracing::warn!(port = %self.path, error = %err, "serial port closed uncleanly"),
        }
        result
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.abort();
        }
    }
}

async fn read_loop(
    mut reader: ReadHalf<DynSerial>,
    dispatcher: ResponseDispatcher,
    gate: CommandGate,
) {
    let mut framer = FrameReassembler::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                gate.release();
                dispatcher.publish_error(StreamFault::eof());
                break;
            }
            Ok(n) => {
                for frame in framer.push(&chunk[..n]) {
                    let reply = !frame.is_empty();
                    dispatcher.dispatch(frame);
                    // Publish first: the next command must not subscribe in time to see this frame.
                    if reply {
                        gate.release();
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                ) =>
            {
                continue;
            }
            Err(e) => {
                gate.release();
                dispatcher.publish_error(StreamFault::from_io(&e));
                break;
            }
        }
    }

    if framer.pending() > 0 {
        tracing::debug!(bytes = framer.pending(), "discarding unterminated tail");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;

    fn duplex_connection() -> (tokio::io::DuplexStream, Connection) {
        let (host, device) = tokio::io::duplex(256);
        let conn = Connection::from_stream(
            "duplex",
            Box::new(device),
            ResponseDispatcher::new(16),
            GateTiming::default(),
        );
        (host, conn)
    }

    #[tokio::test]
    async fn inbound_bytes_are_framed_and_dispatched() {
        let (mut host, conn) = duplex_connection();
        let mut readings = conn.dispatcher().subscribe_readings();
        let mut responses = conn.dispatcher().subscribe_responses();

        host.write_all(b"1.23,4.5").await.unwrap();
        host.write_all(b"6\nREADY\n").await.unwrap();

        let reading = timeout(Duration::from_secs(1), readings.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((reading.value1, reading.value2), (1.23, 4.56));
        assert_eq!(responses.recv().await.unwrap(), "1.23,4.56");
        assert_eq!(responses.recv().await.unwrap(), "READY");
    }

    #[tokio::test]
    async fn write_reaches_the_wire() {
        let (mut host, conn) = duplex_connection();
        conn.write(b"s\n").await.unwrap();

        let mut buf = [0u8; 8];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"s\n");
    }

    #[tokio::test]
    async fn inbound_frame_releases_gate() {
        let (mut host, conn) = duplex_connection();
        let mut responses = conn.dispatcher().subscribe_responses();
        let permit = conn.gate().acquire().await;
        assert!(conn.gate().is_busy());

        host.write_all(b"ack\n").await.unwrap();
        responses.recv().await.unwrap();
        assert!(!conn.gate().is_busy());
        drop(permit);
    }

    #[tokio::test]
    async fn peer_hangup_is_published_as_fault() {
        let (host, conn) = duplex_connection();
        let mut faults = conn.dispatcher().subscribe_errors();
        drop(host);

        let fault = timeout(Duration::from_secs(1), faults.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fault.kind, std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_writes() {
        let (_host, conn) = duplex_connection();
        assert!(conn.is_open().await);

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(!conn.is_open().await);
        assert!(matches!(
            conn.write(b"b\n").await,
            Err(DeviceError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_notifies_waiters() {
        let (_host, conn) = duplex_connection();
        let mut closed = conn.closed();
        assert!(!*closed.borrow());

        conn.close().await.unwrap();
        timeout(Duration::from_secs(1), closed.wait_for(|closed| *closed))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn write_to_vanished_peer_is_write_error() {
        let (host, conn) = duplex_connection();
        drop(host);
        assert!(matches!(
            conn.write(b"b\n").await,
            Err(DeviceError::Write { .. })
        ));
    }
}
