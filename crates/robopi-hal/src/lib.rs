//! `robopi-hal` – hardware collaborators of the control plane.
//!
//! The protocol engines never talk to devices directly; they call the traits
//! defined here so drivers can be swapped without touching protocol logic.
//!
//! # Modules
//!
//! - [`motor`] – [`MotorDrive`][motor::MotorDrive]: the differential-drive
//!   motion primitives, plus [`execute`][motor::execute] which maps a
//!   [`Motion`][robopi_types::Motion] onto the matching primitive.
//! - [`camera`] – [`Camera`][camera::Camera]: "capture to file", with
//!   [`CamSettings`][camera::CamSettings] and the `fswebcam`-backed
//!   [`FswebcamCamera`][camera::FswebcamCamera].
//! - [`sim`] – recording stand-ins for both traits, used by tests and by
//!   hardware-free runs.

pub mod camera;
pub mod motor;
pub mod sim;

pub use camera::{CamSettings, Camera, FswebcamCamera, ImageFormat};
pub use motor::{MotorDrive, execute, normalize_speed};
pub use sim::{DriveCall, SimCamera, SimMotorDrive};
