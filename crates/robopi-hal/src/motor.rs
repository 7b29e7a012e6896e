//! Generic [`MotorDrive`] trait for the robot's differential drive.
//!
//! A driver exposes one primitive per manoeuvre.  Speeds are normalised to
//! `[0.0, 1.0]`; drivers scale them to whatever their controller expects.

use robopi_types::{Motion, RobotError};
use tracing::debug;

/// The motion primitives of a two-motor drive base.
///
/// Methods take `&self` so one driver can be shared between the accept loop
/// and the session that currently owns the robot; implementations use
/// interior mutability for any state they keep.
pub trait MotorDrive: Send + Sync {
    /// Stable identifier, e.g. `"drive_base"`.
    fn id(&self) -> &str;

    fn run_forward(&self, speed: f32) -> Result<(), RobotError>;
    fn run_backward(&self, speed: f32) -> Result<(), RobotError>;
    fn rotate_left(&self, speed: f32) -> Result<(), RobotError>;
    fn rotate_right(&self, speed: f32) -> Result<(), RobotError>;
    /// Forward arc to the left.
    fn turn_left_front(&self, speed: f32) -> Result<(), RobotError>;
    /// Forward arc to the right.
    fn turn_right_front(&self, speed: f32) -> Result<(), RobotError>;
    /// Backward arc to the left.
    fn turn_left_back(&self, speed: f32) -> Result<(), RobotError>;
    /// Backward arc to the right.
    fn turn_right_back(&self, speed: f32) -> Result<(), RobotError>;

    /// Release both motors.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::HardwareFault`] if the controller cannot be
    /// reached.
    fn idle(&self) -> Result<(), RobotError>;
}

/// Clamp `speed` into `[0.0, 1.0]`.  `NaN` becomes `0.0`.
pub fn normalize_speed(speed: f32) -> f32 {
    if speed.is_nan() { 0.0 } else { speed.clamp(0.0, 1.0) }
}

/// Translate `motion` into the matching primitive on `drive`.
///
/// [`Motion::Stop`] maps to [`MotorDrive::idle`] and ignores `speed`.
pub fn execute(drive: &dyn MotorDrive, motion: Motion, speed: f32) -> Result<(), RobotError> {
    let speed = normalize_speed(speed);
    debug!(drive = drive.id(), motion = motion.token(), speed, "executing motion");
    match motion {
        Motion::Forward => drive.run_forward(speed),
        Motion::Backward => drive.run_backward(speed),
        Motion::Stop => drive.idle(),
        Motion::RotateLeft => drive.rotate_left(speed),
        Motion::RotateRight => drive.rotate_right(speed),
        Motion::FrontLeft => drive.turn_left_front(speed),
        Motion::FrontRight => drive.turn_right_front(speed),
        Motion::BackLeft => drive.turn_left_back(speed),
        Motion::BackRight => drive.turn_right_back(speed),
    }
}
