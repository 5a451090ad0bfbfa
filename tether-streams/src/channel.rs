//! Newline-delimited JSON message channel.
//!
//! # Wire format
//!
//! One JSON value per line, terminated by exactly one `\n` (0x0A). No length
//! prefix. JSON escapes newlines inside strings, so any value survives.
//!
//! ```text
//! {"cmd":"ready"}\n{"state":"alive","pid":4242}\n{"partial
//! └──── message ──┘ └────────── message ────────┘ └ pending ┘
//! ```
//!
//! The outbound side encodes with `serde_json` and writes one frame per
//! [`MessageChannel::send`]. The inbound side is consumed by a background
//! task that feeds a [`LineDecoder`] and queues [`ChannelEvent`]s for
//! [`MessageChannel::recv`].

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_core::{ChannelConfig, ParseErrorPolicy};

use crate::error::ChannelError;

const READ_CHUNK: usize = 8 * 1024;

/// Event produced by the inbound side of a channel.
#[derive(Debug)]
pub enum ChannelEvent {
    Message(Value),
    Error(ChannelError),
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Splits a byte stream into JSON lines.
///
/// Holds only the unterminated tail of the stream: after every
/// [`LineDecoder::feed`] the retained bytes contain no `\n`.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and decode every line they complete, in order.
    ///
    /// A line that fails to decode yields [`ChannelError::Parse`] in its slot
    /// and is consumed like any other line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Value, ChannelError>> {
        // The retained tail has no newline, so only the new bytes need scanning.
        let mut scan = self.buffer.len();
        self.buffer.extend_from_slice(bytes);

        let mut decoded = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[scan..].iter().position(|b| *b == b'\n') {
            let end = scan + offset;
            decoded.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
            scan = start;
        }
        self.buffer.drain(..start);
        decoded
    }

    /// Discard the partial line without decoding it.
    pub fn flush(&mut self) {
        self.buffer.clear();
    }

    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

fn decode_line(line: &[u8]) -> Result<Value, ChannelError> {
    serde_json::from_slice(line).map_err(|source| ChannelError::Parse {
        line: String::from_utf8_lossy(line).into_owned(),
        source,
    })
}

/// Encode `message` as one wire frame (JSON followed by `\n`).
pub fn encode<M: Serialize + ?Sized>(message: &M) -> Result<Vec<u8>, ChannelError> {
    let mut frame = serde_json::to_vec(message).map_err(ChannelError::Serialization)?;
    frame.push(b'\n');
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Message exchange over an outbound byte sink and an inbound byte source.
pub struct MessageChannel<W> {
    writer: tokio::sync::Mutex<W>,
    decoder: Arc<Mutex<LineDecoder>>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
    reader_task: JoinHandle<()>,
}

impl<W> MessageChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Build a channel and start consuming `reader` immediately.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<R>(writer: W, reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::with_config(writer, reader, &ChannelConfig::default())
    }

    pub fn with_config<R>(writer: W, reader: R, config: &ChannelConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let decoder = Arc::new(Mutex::new(LineDecoder::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&decoder),
            events_tx,
            config.on_parse_error,
        ));

        Self {
            writer: tokio::sync::Mutex::new(writer),
            decoder,
            events: tokio::sync::Mutex::new(events_rx),
            reader_task,
        }
    }

    /// Encode `message`, terminate it with `\n`, write and flush it.
    ///
    /// # Errors
    /// [`ChannelError::Serialization`] if `message` has no JSON form (nothing
    /// is written), [`ChannelError::Io`] if the sink fails.
    pub async fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<(), ChannelError> {
        let frame = encode(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Next inbound event, in arrival order.
    ///
    /// Returns `None` once the inbound source has ended and every queued
    /// event was received.
    pub async fn recv(&self) -> Option<ChannelEvent> {
        self.events.lock().await.recv().await
    }

    /// Drop the unterminated tail, e.g. after the peer restarted.
    pub fn flush(&self) {
        let mut decoder = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);
        if !decoder.pending().is_empty() {
            tracing::debug!(
                discarded = decoder.pending().len(),
                "flushing partial inbound line"
            );
        }
        decoder.flush();
    }

    /// Copy of the bytes received after the last newline.
    pub fn pending(&self) -> Vec<u8> {
        self.decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending()
            .to_vec()
    }
}

impl<W> Drop for MessageChannel<W> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop<R>(
    mut reader: R,
    decoder: Arc<Mutex<LineDecoder>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    policy: ParseErrorPolicy,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!("inbound stream reached EOF");
                break;
            }
            Ok(read) => read,
            Err(err) => {
                tracing::warn!(error = %err, "inbound stream read failed");
                let _ = events.send(ChannelEvent::Error(err.into()));
                break;
            }
        };

        let decoded = decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .feed(&chunk[..read]);

        for item in decoded {
            let event = match item {
                Ok(message) => ChannelEvent::Message(message),
                Err(err) => match policy {
                    ParseErrorPolicy::Propagate => ChannelEvent::Error(err),
                    ParseErrorPolicy::Skip => {
                        tracing::warn!(error = %err, "skipping malformed inbound line");
                        continue;
                    }
                },
            };
            if events.send(event).is_err() {
                return;
            }
        }
    }
}
