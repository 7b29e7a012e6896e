//! [`SessionCoordinator`] – one operator at a time.
//!
//! The coordinator owns both listeners.  For every accepted control
//! connection it:
//!
//! 1. runs the channel handshake (TLS in production);
//! 2. creates a fresh [`SessionState`] and hands clones to a
//!    [`CommandEngine`] task and an [`ImageEngine`] task;
//! 3. while the command task runs, answers any further control connection
//!    with `CONN_ERR` and closes it;
//! 4. once the command task is done, drops any busy client still being
//!    turned away, closes the session, waits for the image task (bounded by
//!    [`SessionSettings::teardown_grace`]), idles the drive and logs a
//!    [`SessionReport`];
//! 5. goes back to accepting.
//!
//! A shutdown signal aborts the active session and makes
//! [`SessionCoordinator::run`] return.  The aborted command task is joined
//! before the drive is idled, so a motion already in progress cannot land
//! after the idle.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use robopi_hal::{Camera, MotorDrive};
use robopi_protocol::{
    CaptureTarget, ChannelAcceptor, CommandEngine, CommandReport, FramedChannel, ImageEngine,
    ImageReport, SessionState,
};
use robopi_types::{CMD_LEN, DEFAULT_SPEED, ResponseCode, RobotError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Per-session tunables.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Normalised speed for every motion primitive.
    pub speed: f32,
    pub capture: CaptureTarget,
    /// How long the image channel may take to finish after the command
    /// channel is done before it is aborted.
    pub teardown_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            capture: CaptureTarget::default(),
            teardown_grace: Duration::from_secs(5),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Listeners
// ────────────────────────────────────────────────────────────────────────────

/// The bound control and image endpoints.
pub struct Listeners {
    control: TcpListener,
    image: Arc<TcpListener>,
}

impl Listeners {
    /// Bind both endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Transport`] if either address cannot be bound.
    pub async fn bind(control: SocketAddr, image: SocketAddr) -> Result<Self, RobotError> {
        let control_listener = TcpListener::bind(control)
            .await
            .map_err(|e| RobotError::Transport(format!("bind error on {control}: {e}")))?;
        let image_listener = TcpListener::bind(image)
            .await
            .map_err(|e| RobotError::Transport(format!("bind error on {image}: {e}")))?;
        Ok(Self {
            control: control_listener,
            image: Arc::new(image_listener),
        })
    }

    pub fn control_addr(&self) -> io::Result<SocketAddr> {
        self.control.local_addr()
    }

    pub fn image_addr(&self) -> io::Result<SocketAddr> {
        self.image.local_addr()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reports
// ────────────────────────────────────────────────────────────────────────────

/// What happened during one session; logged at teardown.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub commands: u64,
    pub pictures: u64,
    pub picture_bytes: u64,
}

impl SessionReport {
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Totals for one [`SessionCoordinator::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSummary {
    /// Sessions that completed the control handshake.
    pub sessions: u64,
    /// Control connections turned away while a session was active.
    pub busy_rejections: u64,
    /// Commands handled across all sessions.
    pub commands: u64,
    /// Pictures sent across all sessions.
    pub pictures: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// SessionCoordinator
// ────────────────────────────────────────────────────────────────────────────

/// Accepts operator sessions and runs their two channels.
pub struct SessionCoordinator<A> {
    acceptor: Arc<A>,
    drive: Arc<dyn MotorDrive>,
    camera: Arc<dyn Camera>,
    settings: SessionSettings,
}

impl<A: ChannelAcceptor> SessionCoordinator<A> {
    pub fn new(acceptor: Arc<A>, drive: Arc<dyn MotorDrive>, camera: Arc<dyn Camera>) -> Self {
        Self {
            acceptor,
            drive,
            camera,
            settings: SessionSettings::default(),
        }
    }

    /// Override the per-session settings (builder-style).
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Bind `control` and `image`, then [`run`][Self::run].
    pub async fn serve(
        &self,
        control: SocketAddr,
        image: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CoordinatorSummary, RobotError> {
        let listeners = Listeners::bind(control, image).await?;
        info!(%control, %image, "robot server listening");
        Ok(self.run(listeners, shutdown).await)
    }

    /// Serve sessions one after another until `shutdown` turns `true` (or
    /// its sender is dropped).
    pub async fn run(
        &self,
        listeners: Listeners,
        mut shutdown: watch::Receiver<bool>,
    ) -> CoordinatorSummary {
        let mut summary = CoordinatorSummary::default();

        loop {
            let (tcp, peer) = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                accepted = listeners.control.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "control accept error");
                        continue;
                    }
                },
            };

            let id = Uuid::new_v4();
            let span = info_span!("session", session = %id, %peer);
            let report = self
                .serve_session(id, tcp, peer, &listeners, &mut shutdown, &mut summary)
                .instrument(span)
                .await;

            if let Some(report) = report {
                summary.sessions += 1;
                summary.commands += report.commands;
                summary.pictures += report.pictures;
                info!(
                    session = %report.id,
                    peer = %report.peer,
                    started_at = %report.started_at.to_rfc3339(),
                    duration_ms = report.duration().num_milliseconds(),
                    commands = report.commands,
                    pictures = report.pictures,
                    picture_bytes = report.picture_bytes,
                    "session ended"
                );
            }
        }

        info!(
            sessions = summary.sessions,
            busy_rejections = summary.busy_rejections,
            "robot server stopped"
        );
        summary
    }

    /// Run one session to completion.  `None` if the control handshake did
    /// not succeed.
    async fn serve_session(
        &self,
        id: Uuid,
        tcp: TcpStream,
        peer: SocketAddr,
        listeners: &Listeners,
        shutdown: &mut watch::Receiver<bool>,
        summary: &mut CoordinatorSummary,
    ) -> Option<SessionReport> {
        let started_at = Utc::now();
        info!("client connection accepted");

        let stream = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => return None,
            handshake = self.acceptor.accept(tcp) => match handshake {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "control channel handshake failed");
                    return None;
                }
            },
        };

        let state = SessionState::new();
        let command = Arc::new(
            CommandEngine::new(state.clone(), Arc::clone(&self.drive))
                .with_speed(self.settings.speed),
        );
        let image = ImageEngine::new(
            state.clone(),
            Arc::clone(&self.acceptor),
            Arc::clone(&self.camera),
            self.settings.capture.clone(),
        );

        let engine = Arc::clone(&command);
        let mut command_task = tokio::spawn(
            async move {
                let mut channel = FramedChannel::new(stream);
                engine.run(&mut channel).await
            }
            .instrument(info_span!("channel", channel = "cmd")),
        );
        let image_listener = Arc::clone(&listeners.image);
        let mut image_task = tokio::spawn(
            async move { image.run(&image_listener).await }
                .instrument(info_span!("channel", channel = "pic")),
        );

        let mut rejections = JoinSet::new();
        let command_report = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => {
                    info!("shutdown requested, aborting session");
                    command_task.abort();
                    // A motion primitive already running must finish before
                    // the drive is idled below.
                    let _ = (&mut command_task).await;
                    break None;
                }
                joined = &mut command_task => match joined {
                    Ok(report) => break Some(report),
                    Err(e) => {
                        error!(error = %e, "command task failed");
                        break None;
                    }
                },
                accepted = listeners.control.accept() => match accepted {
                    Ok((tcp, extra)) => {
                        summary.busy_rejections += 1;
                        rejections.spawn(
                            reject_busy(Arc::clone(&self.acceptor), tcp, extra)
                                .instrument(info_span!("busy", peer = %extra)),
                        );
                    }
                    Err(e) => error!(error = %e, "control accept error"),
                },
                Some(_) = rejections.join_next(), if !rejections.is_empty() => {}
            }
        };
        // Busy clients that never sent anything are dropped with the session.
        rejections.shutdown().await;
        state.close();

        let image_report = match timeout(self.settings.teardown_grace, &mut image_task).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                error!(error = %e, "image task failed");
                ImageReport::default()
            }
            Err(_) => {
                warn!("image channel did not finish in time, aborting it");
                image_task.abort();
                ImageReport::default()
            }
        };

        if let Err(e) = self.drive.idle() {
            warn!(error = %e, "failed to idle the drive at session end");
        }

        if let Some(CommandReport { end, .. }) = &command_report {
            debug!(end = ?end, "command channel finished");
        }

        Some(SessionReport {
            id,
            peer,
            started_at,
            ended_at: Utc::now(),
            commands: command.commands_handled(),
            pictures: image_report.pictures,
            picture_bytes: image_report.bytes,
        })
    }
}

/// Resolve once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Turn away a control connection that arrived while a session is active:
/// answer its first message with `CONN_ERR` and close.
async fn reject_busy<A: ChannelAcceptor>(acceptor: Arc<A>, tcp: TcpStream, peer: SocketAddr) {
    let stream = match acceptor.accept(tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%peer, error = %e, "busy rejection handshake failed");
            return;
        }
    };

    let mut channel = FramedChannel::new(stream);
    if channel.read_message(CMD_LEN).await.is_err() {
        return;
    }
    if let Err(e) = channel.send_response(ResponseCode::ConnErr).await {
        debug!(%peer, error = %e, "busy rejection send failed");
        return;
    }
    let _ = channel.shutdown().await;
    info!(%peer, "rejected control connection, a session is already active");
}
