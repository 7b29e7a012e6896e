//! In-process stand-ins for CI and hardware-free runs.
//!
//! [`SimMotorDrive`] records every primitive it receives; [`SimCamera`]
//! writes a deterministic byte pattern instead of grabbing a frame.  Both
//! can be told to fail so error paths are testable.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use robopi_types::RobotError;
use tracing::info;

use crate::camera::{Camera, ImageFormat};
use crate::motor::MotorDrive;

// ────────────────────────────────────────────────────────────────────────────
// Motor drive
// ────────────────────────────────────────────────────────────────────────────

/// One primitive call received by a [`SimMotorDrive`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveCall {
    Forward(f32),
    Backward(f32),
    RotateLeft(f32),
    RotateRight(f32),
    TurnLeftFront(f32),
    TurnRightFront(f32),
    TurnLeftBack(f32),
    TurnRightBack(f32),
    Idle,
}

/// A simulated drive base that logs and records every call.
pub struct SimMotorDrive {
    id: String,
    faulty: bool,
    calls: Mutex<Vec<DriveCall>>,
}

impl SimMotorDrive {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            faulty: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A drive whose every call is recorded and then reported as a
    /// [`RobotError::HardwareFault`].
    pub fn faulty(id: impl Into<String>) -> Self {
        Self {
            faulty: true,
            ..Self::new(id)
        }
    }

    /// Every call received so far, oldest first.
    pub fn calls(&self) -> Vec<DriveCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_call(&self) -> Option<DriveCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }

    fn record(&self, call: DriveCall) -> Result<(), RobotError> {
        info!(drive = %self.id, ?call, "sim drive");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.faulty {
            return Err(RobotError::HardwareFault {
                component: self.id.clone(),
                details: format!("simulated fault on {call:?}"),
            });
        }
        Ok(())
    }
}

impl MotorDrive for SimMotorDrive {
    fn id(&self) -> &str {
        &self.id
    }

    fn run_forward(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::Forward(speed))
    }

    fn run_backward(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::Backward(speed))
    }

    fn rotate_left(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::RotateLeft(speed))
    }

    fn rotate_right(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::RotateRight(speed))
    }

    fn turn_left_front(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::TurnLeftFront(speed))
    }

    fn turn_right_front(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::TurnRightFront(speed))
    }

    fn turn_left_back(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::TurnLeftBack(speed))
    }

    fn turn_right_back(&self, speed: f32) -> Result<(), RobotError> {
        self.record(DriveCall::TurnRightBack(speed))
    }

    fn idle(&self) -> Result<(), RobotError> {
        self.record(DriveCall::Idle)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera writing `image_size` bytes of a repeating pattern.
pub struct SimCamera {
    id: String,
    image_size: usize,
    format: ImageFormat,
    failing: bool,
    captures: AtomicUsize,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, image_size: usize) -> Self {
        Self {
            id: id.into(),
            image_size,
            format: ImageFormat::Jpg,
            failing: false,
            captures: AtomicUsize::new(0),
        }
    }

    /// A camera whose captures always fail (but are still counted).
    pub fn failing(id: impl Into<String>) -> Self {
        Self {
            failing: true,
            ..Self::new(id, 0)
        }
    }

    /// Number of capture calls received so far.
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    /// The exact bytes every capture writes.
    pub fn image_bytes(&self) -> Vec<u8> {
        (0..self.image_size).map(|i| (i % 251) as u8).collect()
    }
}

#[async_trait]
impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture(&self, dir: &Path, name: &str) -> Result<PathBuf, RobotError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(RobotError::Capture(format!("simulated failure on {}", self.id)));
        }

        let path = dir.join(format!("{name}.{}", self.format.extension()));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RobotError::Capture(format!("cannot create {}: {e}", dir.display())))?;
        tokio::fs::write(&path, self.image_bytes())
            .await
            .map_err(|e| RobotError::Capture(format!("cannot write {}: {e}", path.display())))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_drive_records_calls_in_order() {
        let drive = SimMotorDrive::new("drive_base");
        assert_eq!(drive.id(), "drive_base");
        assert!(drive.last_call().is_none());

        drive.run_forward(0.5).unwrap();
        drive.idle().unwrap();

        assert_eq!(drive.calls(), vec![DriveCall::Forward(0.5), DriveCall::Idle]);
        assert_eq!(drive.last_call(), Some(DriveCall::Idle));
    }

    #[test]
    fn faulty_drive_records_then_fails() {
        let drive = SimMotorDrive::faulty("drive_base");
        assert!(drive.rotate_right(0.3).is_err());
        assert_eq!(drive.calls(), vec![DriveCall::RotateRight(0.3)]);
    }

    #[tokio::test]
    async fn sim_camera_writes_pattern_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = SimCamera::new("front", 100);

        let path = camera.capture(dir.path(), "snap").await.unwrap();
        assert_eq!(path, dir.path().join("snap.jpg"));

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 100);
        assert_eq!(written, camera.image_bytes());
        assert_eq!(camera.capture_count(), 1);
    }

    #[tokio::test]
    async fn sim_camera_creates_missing_directory() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let nested = dir.path().join("a").join("b");
        let camera = SimCamera::new("front", 8);
        let path = camera.capture(&nested, "snap").await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn failing_camera_counts_and_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let camera = SimCamera::failing("front");
        let result = camera.capture(dir.path(), "snap").await;
        assert!(matches!(result, Err(RobotError::Capture(_))));
        assert_eq!(camera.capture_count(), 1);
    }
}
