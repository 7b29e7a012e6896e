//! [`ImageEngine`] – the image channel.
//!
//! Every picture is its own connection on the image port:
//!
//! 1. the operator connects and sends `PICTURE`;
//! 2. the server answers `PICTURE_ERR` (wrong token, or the session is not
//!    connected) and closes, or answers `PICTURE_OK`;
//! 3. after `PICTURE_OK` the camera captures to file and the file is
//!    streamed as consecutive [`BUFFER_SIZE`]-byte frames (the last one may
//!    be shorter) with no length prefix and no acknowledgement;
//! 4. the server closes the connection, which marks the end of the body.
//!
//! A failed capture or a broken transfer only aborts that one request.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use robopi_hal::Camera;
use robopi_types::{BUFFER_SIZE, CMD_LEN, Command, ResponseCode, RobotError};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::framing::{FrameError, FramedChannel};
use crate::state::SessionState;
use crate::transport::ChannelAcceptor;

/// Where captures are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub dir: PathBuf,
    /// Base file name, without extension.
    pub name: String,
}

impl Default for CaptureTarget {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("robopi"),
            name: "snapshot".to_string(),
        }
    }
}

/// Why a picture request did not complete.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Capture(#[from] RobotError),

    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read picture: {0}")]
    Read(#[source] io::Error),
}

/// Result of one served request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// `PICTURE_ERR` was sent; nothing was captured.
    Rejected,
    /// The picture body was sent in full.
    Sent { bytes: u64, frames: u64 },
}

/// Totals for one image channel run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImageReport {
    pub requests: u64,
    pub pictures: u64,
    pub bytes: u64,
}

/// Stream `source` to `channel` as [`BUFFER_SIZE`]-byte frames.
///
/// Every frame but the last is full; an empty source sends nothing.
pub async fn send_picture<S, R>(
    channel: &mut FramedChannel<S>,
    source: &mut R,
) -> Result<Transfer, ImageError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut frame = [0u8; BUFFER_SIZE];
    let mut bytes = 0u64;
    let mut frames = 0u64;

    loop {
        let len = fill_frame(source, &mut frame).await.map_err(ImageError::Read)?;
        if len == 0 {
            break;
        }
        channel.send_frame(&frame[..len]).await?;
        bytes += len as u64;
        frames += 1;
    }
    channel.flush().await?;

    debug!(bytes, frames, "picture bytes sent");
    Ok(Transfer::Sent { bytes, frames })
}

/// Read until `frame` is full or `source` is exhausted.
async fn fill_frame<R>(source: &mut R, frame: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < frame.len() {
        let n = source.read(&mut frame[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Serves picture requests for one session.
pub struct ImageEngine<A> {
    state: SessionState,
    acceptor: Arc<A>,
    camera: Arc<dyn Camera>,
    target: CaptureTarget,
}

impl<A: ChannelAcceptor> ImageEngine<A> {
    pub fn new(
        state: SessionState,
        acceptor: Arc<A>,
        camera: Arc<dyn Camera>,
        target: CaptureTarget,
    ) -> Self {
        Self {
            state,
            acceptor,
            camera,
            target,
        }
    }

    /// Accept and serve image connections on `listener` until the session
    /// ends (closed, or disconnected after having been connected).
    ///
    /// A request already being served when the session ends is finished
    /// first.
    pub async fn run(&self, listener: &TcpListener) -> ImageReport {
        let mut report = ImageReport::default();
        let ended = self.state.ended();
        tokio::pin!(ended);

        loop {
            let (tcp, peer) = tokio::select! {
                biased;
                _ = &mut ended => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "image accept error");
                        continue;
                    }
                },
            };

            let stream = match self.acceptor.accept(tcp).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(%peer, error = %e, "image channel handshake failed");
                    continue;
                }
            };
            debug!(%peer, "image connection established");

            let mut channel = FramedChannel::new(stream);
            report.requests += 1;
            match self.serve(&mut channel).await {
                Ok(Transfer::Sent { bytes, frames }) => {
                    report.pictures += 1;
                    report.bytes += bytes;
                    info!(%peer, bytes, frames, "picture sent");
                }
                Ok(Transfer::Rejected) => {}
                Err(e) => warn!(%peer, error = %e, "picture transfer aborted"),
            }
            if let Err(e) = channel.shutdown().await {
                debug!(%peer, error = %e, "image channel shutdown failed");
            }
        }

        report
    }

    /// Handle the single request of one image connection.
    pub async fn serve<S>(&self, channel: &mut FramedChannel<S>) -> Result<Transfer, ImageError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = channel.read_message(CMD_LEN).await?;

        if Command::parse(request.as_bytes()) != Some(Command::Picture) {
            warn!(request = %request, "invalid picture request");
            channel.send_response(ResponseCode::PictureErr).await?;
            return Ok(Transfer::Rejected);
        }

        if !self.state.is_connected() {
            info!("picture requested outside a connected session");
            channel.send_response(ResponseCode::PictureErr).await?;
            return Ok(Transfer::Rejected);
        }

        channel.send_response(ResponseCode::PictureOk).await?;

        let path = self
            .camera
            .capture(&self.target.dir, &self.target.name)
            .await?;
        let mut file = File::open(&path)
            .await
            .map_err(|source| ImageError::Open { path, source })?;

        send_picture(channel, &mut file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use robopi_hal::SimCamera;
    use tokio::io::{AsyncWriteExt, ReadBuf, duplex};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    use crate::transport::PlainAcceptor;

    const LONG: Duration = Duration::from_secs(5);

    /// Write half that records every write call; reads are always EOF.
    #[derive(Default)]
    struct FrameRecorder {
        writes: Vec<Vec<u8>>,
    }

    impl AsyncRead for FrameRecorder {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for FrameRecorder {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.writes.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn engine_with(
        camera: Arc<SimCamera>,
        dir: &tempfile::TempDir,
    ) -> ImageEngine<PlainAcceptor> {
        ImageEngine::new(
            SessionState::new(),
            Arc::new(PlainAcceptor),
            camera,
            CaptureTarget {
                dir: dir.path().to_path_buf(),
                name: "snap".to_string(),
            },
        )
    }

    /// Send `request` over an in-memory stream, serve it, and return the
    /// serve result and everything the client received.
    async fn request_over_duplex(
        engine: &ImageEngine<PlainAcceptor>,
        request: &[u8],
    ) -> (Result<Transfer, ImageError>, Vec<u8>) {
        let (mut client, server) = duplex(64);
        let mut channel = FramedChannel::new(server);

        let client_side = async {
            client.write_all(request).await.unwrap();
            let mut received = Vec::new();
            client.read_to_end(&mut received).await.unwrap();
            received
        };
        let server_side = async {
            let result = engine.serve(&mut channel).await;
            channel.shutdown().await.unwrap();
            result
        };

        let (received, result) = tokio::join!(client_side, server_side);
        (result, received)
    }

    fn split_response(received: &[u8]) -> (&[u8], &[u8]) {
        let end = received
            .iter()
            .position(|&b| b == b'\n')
            .expect("response line");
        (&received[..end], &received[end + 1..])
    }

    // ── send_picture ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_picture_splits_into_full_frames_and_a_short_tail() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut channel = FramedChannel::new(FrameRecorder::default());
        let mut source: &[u8] = &data;

        let transfer = send_picture(&mut channel, &mut source).await.unwrap();
        assert_eq!(transfer, Transfer::Sent { bytes: 100, frames: 4 });

        let sizes: Vec<usize> = channel.get_ref().writes.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![32, 32, 32, 4]);
        assert_eq!(channel.get_ref().writes.concat(), data);
    }

    #[tokio::test]
    async fn send_picture_exact_multiple_has_no_tail() {
        let data = vec![7u8; 2 * BUFFER_SIZE];
        let mut channel = FramedChannel::new(FrameRecorder::default());
        let mut source: &[u8] = &data;

        let transfer = send_picture(&mut channel, &mut source).await.unwrap();
        assert_eq!(transfer, Transfer::Sent { bytes: 64, frames: 2 });
        assert!(channel.get_ref().writes.iter().all(|w| w.len() == BUFFER_SIZE));
    }

    #[tokio::test]
    async fn send_picture_of_empty_source_sends_nothing() {
        let mut channel = FramedChannel::new(FrameRecorder::default());
        let mut source: &[u8] = &[];

        let transfer = send_picture(&mut channel, &mut source).await.unwrap();
        assert_eq!(transfer, Transfer::Sent { bytes: 0, frames: 0 });
        assert!(channel.get_ref().writes.is_empty());
    }

    // ── serve ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn picture_while_disconnected_is_refused_without_capture() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = Arc::new(SimCamera::new("front", 100));
        let engine = engine_with(camera.clone(), &dir);

        let (result, received) = request_over_duplex(&engine, b"PICTURE\n").await;
        assert_eq!(result.unwrap(), Transfer::Rejected);
        assert_eq!(received, b"PICTURE_ERR\n");
        assert_eq!(camera.capture_count(), 0);
    }

    #[tokio::test]
    async fn picture_while_connected_streams_the_capture() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = Arc::new(SimCamera::new("front", 1000));
        let engine = engine_with(camera.clone(), &dir);
        engine.state.set_connected(true);

        let (result, received) = request_over_duplex(&engine, b"PICTURE\n").await;
        let frames = 1000u64.div_ceil(BUFFER_SIZE as u64);
        assert_eq!(result.unwrap(), Transfer::Sent { bytes: 1000, frames });
        assert_eq!(camera.capture_count(), 1);

        let (response, body) = split_response(&received);
        assert_eq!(response, b"PICTURE_OK");
        assert_eq!(body, camera.image_bytes().as_slice());
    }

    #[tokio::test]
    async fn wrong_token_is_refused_without_capture() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = Arc::new(SimCamera::new("front", 100));
        let engine = engine_with(camera.clone(), &dir);
        engine.state.set_connected(true);

        for request in [&b"PING\n"[..], b"picture\n", b"RESEND_PICTURE\n"] {
            let (result, received) = request_over_duplex(&engine, request).await;
            assert_eq!(result.unwrap(), Transfer::Rejected);
            assert_eq!(received, b"PICTURE_ERR\n");
        }
        assert_eq!(camera.capture_count(), 0);
    }

    #[tokio::test]
    async fn capture_failure_aborts_after_picture_ok() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = Arc::new(SimCamera::failing("front"));
        let engine = engine_with(camera.clone(), &dir);
        engine.state.set_connected(true);

        let (result, received) = request_over_duplex(&engine, b"PICTURE\n").await;
        assert!(matches!(result, Err(ImageError::Capture(_))));
        assert_eq!(received, b"PICTURE_OK\n");
        assert_eq!(camera.capture_count(), 1);
    }

    // ── run ─────────────────────────────────────────────────────────────────

    async fn fetch(addr: std::net::SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    }

    #[tokio::test]
    async fn run_serves_requests_until_disconnect() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = Arc::new(SimCamera::new("front", 77));
        let engine = Arc::new(engine_with(camera.clone(), &dir));
        let state = engine.state.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(&listener).await })
        };

        // Before CONN: refused.
        assert_eq!(fetch(addr, b"PICTURE\n").await, b"PICTURE_ERR\n");

        // The gate flips without restarting the engine.
        state.set_connected(true);
        for _ in 0..2 {
            let received = fetch(addr, b"PICTURE\n").await;
            let (response, body) = split_response(&received);
            assert_eq!(response, b"PICTURE_OK");
            assert_eq!(body, camera.image_bytes().as_slice());
        }

        state.set_connected(false);
        let report = timeout(LONG, task).await.unwrap().unwrap();
        assert_eq!(
            report,
            ImageReport {
                requests: 3,
                pictures: 2,
                bytes: 2 * 77,
            }
        );
        assert_eq!(camera.capture_count(), 2);
    }

    #[tokio::test]
    async fn run_survives_failed_transfers_and_stops_on_close() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = Arc::new(SimCamera::failing("front"));
        let engine = Arc::new(engine_with(camera.clone(), &dir));
        let state = engine.state.clone();
        state.set_connected(true);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run(&listener).await })
        };

        assert_eq!(fetch(addr, b"PICTURE\n").await, b"PICTURE_OK\n");
        assert_eq!(fetch(addr, b"PICTURE\n").await, b"PICTURE_OK\n");

        state.close();
        let report = timeout(LONG, task).await.unwrap().unwrap();
        assert_eq!(report.requests, 2);
        assert_eq!(report.pictures, 0);
        assert_eq!(camera.capture_count(), 2);
    }
}
