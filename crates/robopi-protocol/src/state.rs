//! [`SessionState`] – the `connected` flag shared by one session's channels.
//!
//! The command channel is the only writer; the image channel reads it as a
//! gate before serving a picture.  A second signal, *closed*, is raised by
//! the session owner once the command channel has finished so the image
//! channel can stop accepting requests.
//!
//! Both signals are [`tokio::sync::watch`] cells: reads see the latest
//! write, and waiters are woken on change instead of polling.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

struct Shared {
    connected: watch::Sender<bool>,
    closed: watch::Sender<bool>,
}

/// Per-session connection state.  Clones share the same cells.
#[derive(Clone)]
pub struct SessionState {
    shared: Arc<Shared>,
}

impl SessionState {
    /// A fresh session: not connected, not closed.
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared { connected, closed }),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.send_replace(connected);
    }

    /// Mark the session as over.  Idempotent.
    pub fn close(&self) {
        self.shared.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolve once [`close`][Self::close] has been called.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Resolve when the session is over for the image channel: it was
    /// closed, or it went from connected back to disconnected.
    ///
    /// Create the future once and keep polling it; a fresh future created
    /// after the falling edge only sees the close.
    pub async fn ended(&self) {
        let mut connected = self.shared.connected.subscribe();
        let falling_edge = async move {
            if connected.wait_for(|connected| *connected).await.is_err() {
                return;
            }
            let _ = connected.wait_for(|connected| !*connected).await;
        };
        tokio::select! {
            _ = falling_edge => {}
            _ = self.closed() => {}
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}
