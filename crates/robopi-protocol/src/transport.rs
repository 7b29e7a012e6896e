//! The [`ChannelAcceptor`] seam between TCP and the channel engines.
//!
//! Both listening endpoints hand every accepted [`TcpStream`] to the same
//! acceptor, which performs whatever handshake secures the channel and
//! returns the stream the engines talk over.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Upgrades accepted TCP connections into channel streams.
#[async_trait]
pub trait ChannelAcceptor: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Run the channel handshake on `stream`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of a failed handshake; the caller drops the
    /// connection and keeps listening.
    async fn accept(&self, stream: TcpStream) -> io::Result<Self::Stream>;
}

/// Passes TCP streams through unchanged.
///
/// Only for loopback simulation and tests: nothing on the wire is
/// encrypted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAcceptor;

#[async_trait]
impl ChannelAcceptor for PlainAcceptor {
    type Stream = TcpStream;

    async fn accept(&self, stream: TcpStream) -> io::Result<TcpStream> {
        Ok(stream)
    }
}
