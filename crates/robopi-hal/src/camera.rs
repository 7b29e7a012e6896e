//! Generic [`Camera`] trait and the `fswebcam` driver.
//!
//! A camera "captures to file": it is told a destination directory and a
//! base name, and returns the path of the image it wrote.  The image channel
//! then streams that file to the operator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use robopi_types::RobotError;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

/// Encoding of captured images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpg,
    Png,
}

impl ImageFormat {
    /// File extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

/// Capture parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CamSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub format: ImageFormat,
    /// Draw the capture tool's text banner onto the image.
    #[serde(default)]
    pub banner: bool,
}

fn default_width() -> u32 {
    512
}
fn default_height() -> u32 {
    512
}

impl Default for CamSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            format: ImageFormat::default(),
            banner: false,
        }
    }
}

impl CamSettings {
    /// Path of the file a capture named `name` lands in under `dir`.
    pub fn output_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.{}", self.format.extension()))
    }
}

/// An image-capture device.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Stable identifier for this camera, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Capture one image into `dir` under the base name `name` and return the
    /// path of the written file.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Capture`] if the device fails or no file was
    /// produced.
    async fn capture(&self, dir: &Path, name: &str) -> Result<PathBuf, RobotError>;
}

// ────────────────────────────────────────────────────────────────────────────
// fswebcam driver
// ────────────────────────────────────────────────────────────────────────────

/// Captures with the `fswebcam` command-line tool (USB webcams on Linux).
pub struct FswebcamCamera {
    id: String,
    settings: CamSettings,
    program: String,
}

impl FswebcamCamera {
    pub fn new(id: impl Into<String>, settings: CamSettings) -> Self {
        Self {
            id: id.into(),
            settings,
            program: "fswebcam".to_string(),
        }
    }

    /// Run `program` instead of `fswebcam` (builder-style).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to the capture tool for a capture into `output`.
    pub fn command_args(&self, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-r".to_string(),
            format!("{}x{}", self.settings.width, self.settings.height),
        ];
        if !self.settings.banner {
            args.push("--no-banner".to_string());
        }
        args.push(output.display().to_string());
        args
    }
}

#[async_trait]
impl Camera for FswebcamCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture(&self, dir: &Path, name: &str) -> Result<PathBuf, RobotError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            RobotError::Capture(format!("cannot create {}: {e}", dir.display()))
        })?;

        let output = self.settings.output_path(dir, name);
        let args = self.command_args(&output);
        debug!(camera = %self.id, program = %self.program, ?args, "running capture tool");

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| RobotError::Capture(format!("cannot run {}: {e}", self.program)))?;

        if !result.status.success() {
            return Err(RobotError::Capture(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        // Some capture tools exit 0 when no device frame was grabbed.
        tokio::fs::metadata(&output).await.map_err(|e| {
            RobotError::Capture(format!("no image at {}: {e}", output.display()))
        })?;

        info!(camera = %self.id, path = %output.display(), "picture captured");
        Ok(output)
    }
}
