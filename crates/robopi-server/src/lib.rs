//! `robopi-server` – the RoboPi control-plane server.
//!
//! Ties the protocol engines to real sockets:
//!
//! - [`coordinator`] – [`SessionCoordinator`]: owns the control and image
//!   listeners, runs one operator session at a time and turns away anyone
//!   else with `CONN_ERR`.
//! - [`tls`] – [`TlsChannelAcceptor`]: loads the PEM identity and runs the
//!   server side of the TLS handshake for both channels.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use robopi_hal::{SimCamera, SimMotorDrive};
//! use robopi_server::{SessionCoordinator, TlsChannelAcceptor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let acceptor = TlsChannelAcceptor::from_pem_files(
//!         Path::new("cert.pem"),
//!         Path::new("key.pem"),
//!     )
//!     .expect("TLS identity");
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!
//!     SessionCoordinator::new(
//!         Arc::new(acceptor),
//!         Arc::new(SimMotorDrive::new("drive_base")),
//!         Arc::new(SimCamera::new("front", 4096)),
//!     )
//!     .serve(
//!         "[::]:2025".parse().unwrap(),
//!         "[::]:2026".parse().unwrap(),
//!         shutdown,
//!     )
//!     .await
//!     .expect("robot server failed");
//! }
//! ```

pub mod coordinator;
pub mod tls;

pub use coordinator::{
    CoordinatorSummary, Listeners, SessionCoordinator, SessionReport, SessionSettings,
};
pub use tls::TlsChannelAcceptor;
