//! Configuration – reads/writes `~/.robopi/config.toml`.

use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use robopi_hal::CamSettings;
use robopi_types::{DEFAULT_CONTROL_PORT, DEFAULT_IMAGE_PORT, DEFAULT_SPEED, RobotError};
use serde::{Deserialize, Serialize};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Which camera driver to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    #[default]
    Fswebcam,
    Sim,
}

impl FromStr for CameraBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fswebcam" => Ok(CameraBackend::Fswebcam),
            "sim" => Ok(CameraBackend::Sim),
            other => Err(format!("unknown camera backend {other:?}")),
        }
    }
}

impl fmt::Display for CameraBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraBackend::Fswebcam => write!(f, "fswebcam"),
            CameraBackend::Sim => write!(f, "sim"),
        }
    }
}

/// Which motor drive to run.  Hardware drivers plug in through
/// [`robopi_hal::MotorDrive`]; only the simulator ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorBackend {
    #[default]
    Sim,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub backend: CameraBackend,
    #[serde(flatten)]
    pub settings: CamSettings,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorConfig {
    #[serde(default)]
    pub backend: MotorBackend,
}

/// Persisted server configuration stored in `~/.robopi/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listen address for both endpoints.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_control_port")]
    pub control_port: u16,

    #[serde(default = "default_image_port")]
    pub image_port: u16,

    /// PEM certificate chain.
    #[serde(default = "default_tls_cert")]
    pub tls_cert: PathBuf,

    /// PEM private key.
    #[serde(default = "default_tls_key")]
    pub tls_key: PathBuf,

    /// Serve both channels without TLS.  Only for loopback simulation.
    #[serde(default)]
    pub insecure_plaintext: bool,

    /// Normalised speed in `[0, 1]` for every motion command.
    #[serde(default = "default_speed")]
    pub default_speed: f32,

    #[serde(default = "default_picture_dir")]
    pub picture_dir: PathBuf,

    #[serde(default = "default_picture_name")]
    pub picture_name: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub motor: MotorConfig,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V6(Ipv6Addr::UNSPECIFIED)
}
fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}
fn default_image_port() -> u16 {
    DEFAULT_IMAGE_PORT
}
fn default_tls_cert() -> PathBuf {
    robopi_dir().join("cert.pem")
}
fn default_tls_key() -> PathBuf {
    robopi_dir().join("key.pem")
}
fn default_speed() -> f32 {
    DEFAULT_SPEED
}
fn default_picture_dir() -> PathBuf {
    PathBuf::from("/tmp/robopi")
}
fn default_picture_name() -> String {
    "snapshot".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            image_port: default_image_port(),
            tls_cert: default_tls_cert(),
            tls_key: default_tls_key(),
            insecure_plaintext: false,
            default_speed: default_speed(),
            picture_dir: default_picture_dir(),
            picture_name: default_picture_name(),
            log_format: LogFormat::default(),
            camera: CameraConfig::default(),
            motor: MotorConfig::default(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// `~/.robopi`.
pub fn robopi_dir() -> PathBuf {
    robopi_dir_for_home(&home_dir())
}

pub(crate) fn robopi_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".robopi")
}

/// Path of the config file: `ROBOPI_CONFIG` if set, else
/// `~/.robopi/config.toml`.
pub fn config_path() -> PathBuf {
    match std::env::var("ROBOPI_CONFIG") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_path_for_home(&home_dir()),
    }
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    robopi_dir_for_home(home).join("config.toml")
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, RobotError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        RobotError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| RobotError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `ROBOPI_*` environment variable overrides to `cfg`.  Values that
/// do not parse are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROBOPI_BIND_ADDRESS` | `bind_address` |
/// | `ROBOPI_CONTROL_PORT` | `control_port` |
/// | `ROBOPI_IMAGE_PORT` | `image_port` |
/// | `ROBOPI_TLS_CERT` | `tls_cert` |
/// | `ROBOPI_TLS_KEY` | `tls_key` |
/// | `ROBOPI_CAMERA_BACKEND` | `camera.backend` |
/// | `ROBOPI_LOG_FORMAT` | `log_format` |
pub fn apply_env_overrides(cfg: &mut Config) {
    override_parsed("ROBOPI_BIND_ADDRESS", &mut cfg.bind_address);
    override_parsed("ROBOPI_CONTROL_PORT", &mut cfg.control_port);
    override_parsed("ROBOPI_IMAGE_PORT", &mut cfg.image_port);
    if let Ok(v) = std::env::var("ROBOPI_TLS_CERT")
        && !v.is_empty()
    {
        cfg.tls_cert = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ROBOPI_TLS_KEY")
        && !v.is_empty()
    {
        cfg.tls_key = PathBuf::from(v);
    }
    override_parsed("ROBOPI_CAMERA_BACKEND", &mut cfg.camera.backend);
    override_parsed("ROBOPI_LOG_FORMAT", &mut cfg.log_format);
}

fn override_parsed<T: FromStr>(var: &str, field: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.parse::<T>()
    {
        *field = parsed;
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), RobotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            RobotError::Config(format!("failed to create {}: {e}", parent.display()))
        })?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                RobotError::Config(format!("failed to restrict {}: {e}", parent.display()))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RobotError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| {
                RobotError::Config(format!("failed to write config at {}: {e}", path.display()))
            })?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| {
        RobotError::Config(format!("failed to write config at {}: {e}", path.display()))
    })?;
    Ok(())
}

/// Load the config at `path` with environment overrides applied, writing
/// the defaults there first if it does not exist yet.  The flag is `true`
/// when the file was just created.
pub fn load_or_create(path: &Path) -> Result<(Config, bool), RobotError> {
    let (mut cfg, created) = match load_from(path)? {
        Some(cfg) => (cfg, false),
        None => {
            let cfg = Config::default();
            save_to(&cfg, path)?;
            (cfg, true)
        }
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use robopi_hal::ImageFormat;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.control_port, 2025);
        assert_eq!(loaded.image_port, 2026);
        assert_eq!(loaded.camera.settings.width, 512);
        assert_eq!(loaded.camera.backend, CameraBackend::Fswebcam);
        assert_eq!(loaded.picture_name, "snapshot");
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "insecure_plaintext = true\n\n[camera]\nbackend = \"sim\"\nformat = \"png\"\n",
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert!(cfg.insecure_plaintext);
        assert_eq!(cfg.camera.backend, CameraBackend::Sim);
        assert_eq!(cfg.camera.settings.format, ImageFormat::Png);
        assert_eq!(cfg.camera.settings.height, 512);
        assert_eq!(cfg.control_port, 2025);
        assert_eq!(cfg.log_format, LogFormat::Compact);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "control_port = \"not a number\"\n").unwrap();

        let err = load_from(&path).err().unwrap();
        assert!(matches!(err, RobotError::Config(_)));
    }

    #[test]
    fn load_or_create_writes_defaults_once() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let (_, created) = load_or_create(&path).expect("first run");
        assert!(created);
        assert!(path.exists());

        let (_, created) = load_or_create(&path).expect("second run");
        assert!(!created);
    }

    #[test]
    fn config_path_points_to_robopi_dir() {
        let p = config_path_for_home("/home/operator");
        assert_eq!(p, PathBuf::from("/home/operator/.robopi/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn enum_names_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("sim".parse::<CameraBackend>(), Ok(CameraBackend::Sim));
        assert!("JSON".parse::<LogFormat>().is_err());
        assert_eq!(CameraBackend::Fswebcam.to_string(), "fswebcam");
    }

    #[test]
    fn apply_env_overrides_changes_control_port() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOPI_CONTROL_PORT", "3025") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.control_port, 3025);
        unsafe { std::env::remove_var("ROBOPI_CONTROL_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOPI_IMAGE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.image_port, 2026);
        unsafe { std::env::remove_var("ROBOPI_IMAGE_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_bind_address() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("ROBOPI_BIND_ADDRESS", "127.0.0.1") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bind_address, IpAddr::from([127, 0, 0, 1]));
        unsafe { std::env::remove_var("ROBOPI_BIND_ADDRESS") };
    }

    #[test]
    fn apply_env_overrides_changes_tls_paths() {
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("ROBOPI_TLS_CERT", "/etc/robopi/cert.pem");
            std::env::set_var("ROBOPI_TLS_KEY", "/etc/robopi/key.pem");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tls_cert, PathBuf::from("/etc/robopi/cert.pem"));
        assert_eq!(cfg.tls_key, PathBuf::from("/etc/robopi/key.pem"));
        unsafe {
            std::env::remove_var("ROBOPI_TLS_CERT");
            std::env::remove_var("ROBOPI_TLS_KEY");
        }
    }

    #[test]
    fn apply_env_overrides_changes_camera_backend_and_log_format() {
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("ROBOPI_CAMERA_BACKEND", "sim");
            std::env::set_var("ROBOPI_LOG_FORMAT", "json");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.camera.backend, CameraBackend::Sim);
        assert_eq!(cfg.log_format, LogFormat::Json);
        unsafe {
            std::env::remove_var("ROBOPI_CAMERA_BACKEND");
            std::env::remove_var("ROBOPI_LOG_FORMAT");
        }
    }
}
