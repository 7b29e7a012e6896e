//! [`FramedChannel`] – line-delimited messages over a duplex stream.
//!
//! Messages are at most `capacity` payload bytes followed by
//! [`TERMINATOR`].  The terminator is stripped before delivery and never
//! appears inside a [`Message`].
//!
//! # Overflow
//!
//! A peer that sends more than `capacity` bytes before the terminator does
//! not get an error: the read still runs to the terminator, the first
//! `capacity` bytes are delivered, the excess is discarded and counted in
//! [`Message::dropped`], and a warning is logged.  Callers that care can
//! check [`Message::is_truncated`].

use std::fmt;
use std::io;

use robopi_types::{BUFFER_SIZE, ResponseCode, TERMINATOR};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{error, trace, warn};

/// Failure to obtain or deliver a message.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The peer closed the stream (zero-byte read), possibly mid-message.
    #[error("peer disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// One terminator-stripped message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8>,
    dropped: usize,
}

impl Message {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of payload bytes discarded because the message exceeded the
    /// read capacity.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

/// Append the line terminator to a response mnemonic.
///
/// The length of the returned buffer is the number of bytes to send.
pub fn prepare_response(text: &str) -> Vec<u8> {
    let mut framed = Vec::with_capacity(text.len() + 1);
    framed.extend_from_slice(text.as_bytes());
    framed.push(TERMINATOR);
    framed
}

/// A message-oriented view of one duplex stream.
///
/// Reads go through a [`BUFFER_SIZE`]-byte receive buffer.  Bytes that
/// arrive after a terminator stay buffered for the next
/// [`read_message`][Self::read_message].
pub struct FramedChannel<S> {
    inner: BufReader<S>,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::with_capacity(BUFFER_SIZE, stream),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Read the next message, keeping at most `capacity` payload bytes.
    ///
    /// # Errors
    ///
    /// * [`FrameError::Disconnected`] – the peer closed the stream before a
    ///   terminator arrived.
    /// * [`FrameError::Io`] – the underlying read failed.
    pub async fn read_message(&mut self, capacity: usize) -> Result<Message, FrameError> {
        let mut bytes = Vec::with_capacity(capacity);
        let mut dropped = 0usize;

        loop {
            let available = match self.inner.fill_buf().await {
                Ok(available) => available,
                // TLS peers that vanish without close_notify surface as EOF errors.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(FrameError::Disconnected);
                }
                Err(e) => return Err(FrameError::Io(e)),
            };
            if available.is_empty() {
                if !bytes.is_empty() || dropped > 0 {
                    trace!(partial = bytes.len() + dropped, "stream ended mid-message");
                }
                return Err(FrameError::Disconnected);
            }
            trace!(received = ?available, "bytes received");

            let terminator = available.iter().position(|&b| b == TERMINATOR);
            let payload = match terminator {
                Some(end) => &available[..end],
                None => available,
            };

            let keep = payload.len().min(capacity.saturating_sub(bytes.len()));
            bytes.extend_from_slice(&payload[..keep]);
            dropped += payload.len() - keep;

            let consumed = payload.len() + usize::from(terminator.is_some());
            self.inner.consume(consumed);

            if terminator.is_some() {
                break;
            }
        }

        if dropped > 0 {
            warn!(capacity, dropped, "message too long, truncating");
        }
        Ok(Message { bytes, dropped })
    }

    /// Write `bytes` with a single write call and flush.
    ///
    /// A short write is logged as an error and reported through the return
    /// value; it is not retried.
    pub async fn send_message(&mut self, bytes: &[u8]) -> Result<usize, FrameError> {
        let written = self.inner.write(bytes).await?;
        self.inner.flush().await?;
        if written < bytes.len() {
            error!(expected = bytes.len(), written, "short write");
        }
        Ok(written)
    }

    /// Frame and send `code`.
    pub async fn send_response(&mut self, code: ResponseCode) -> Result<usize, FrameError> {
        trace!(response = %code, "sending response");
        self.send_message(&prepare_response(code.mnemonic())).await
    }

    /// Write one raw, unterminated frame in full.  Not flushed.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<usize, FrameError> {
        self.inner.write_all(frame).await?;
        Ok(frame.len())
    }

    pub async fn flush(&mut self) -> Result<(), FrameError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and close the write half, signalling end-of-stream to the peer.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
