//! `robopi` – the RoboPi robot server.
//!
//! 1. Loads `~/.robopi/config.toml` (written with defaults on first run).
//! 2. Initialises logging and the optional OTLP span exporter.
//! 3. Picks the motor and camera backends and the TLS identity.
//! 4. Serves operator sessions on the control and image ports until
//!    **Ctrl-C**, then idles the drive and exits.

mod config;
mod telemetry;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use robopi_hal::{Camera, FswebcamCamera, MotorDrive, SimCamera, SimMotorDrive, normalize_speed};
use robopi_protocol::{CaptureTarget, ChannelAcceptor, PlainAcceptor};
use robopi_server::{CoordinatorSummary, SessionCoordinator, SessionSettings, TlsChannelAcceptor};
use robopi_types::RobotError;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{CameraBackend, Config, MotorBackend};

/// Size of the image the simulated camera produces.
const SIM_IMAGE_SIZE: usize = 4096;

fn main() -> ExitCode {
    let path = config::config_path();
    let (cfg, created) = match config::load_or_create(&path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            eprintln!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            (cfg, false)
        }
    };

    let _guard = telemetry::init_tracing("robopi", cfg.log_format);

    print_banner(&cfg);
    if created {
        println!(
            "  Default configuration written to {}",
            path.display().to_string().bold()
        );
    } else {
        println!("  Config loaded from {}", path.display().to_string().bold());
    }
    println!();

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping the robot server …".yellow().bold()
        );
        shutdown_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(&cfg, shutdown_rx)) {
        Ok(summary) => {
            println!(
                "{}",
                format!(
                    "  ✓ Served {} session(s), turned away {} client(s).",
                    summary.sessions, summary.busy_rejections
                )
                .green()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "robot server failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(
    cfg: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<CoordinatorSummary, RobotError> {
    let drive = build_drive(cfg);
    let camera = build_camera(cfg);
    let settings = SessionSettings {
        speed: normalize_speed(cfg.default_speed),
        capture: CaptureTarget {
            dir: cfg.picture_dir.clone(),
            name: cfg.picture_name.clone(),
        },
        ..SessionSettings::default()
    };
    info!(
        drive = drive.id(),
        camera = camera.id(),
        backend = %cfg.camera.backend,
        speed = settings.speed,
        "collaborators ready"
    );

    if cfg.insecure_plaintext {
        warn!("TLS disabled by insecure_plaintext; both channels run unencrypted");
        run_with(Arc::new(PlainAcceptor), drive, camera, settings, cfg, shutdown).await
    } else {
        let acceptor = TlsChannelAcceptor::from_pem_files(&cfg.tls_cert, &cfg.tls_key)?;
        run_with(Arc::new(acceptor), drive, camera, settings, cfg, shutdown).await
    }
}

async fn run_with<A: ChannelAcceptor>(
    acceptor: Arc<A>,
    drive: Arc<dyn MotorDrive>,
    camera: Arc<dyn Camera>,
    settings: SessionSettings,
    cfg: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<CoordinatorSummary, RobotError> {
    let control = SocketAddr::new(cfg.bind_address, cfg.control_port);
    let image = SocketAddr::new(cfg.bind_address, cfg.image_port);

    let summary = SessionCoordinator::new(acceptor, Arc::clone(&drive), camera)
        .with_settings(settings)
        .serve(control, image, shutdown)
        .await?;

    // Never leave the robot moving on the way out.
    if let Err(e) = drive.idle() {
        warn!(error = %e, "failed to idle the drive on exit");
    }
    Ok(summary)
}

fn build_drive(cfg: &Config) -> Arc<dyn MotorDrive> {
    match cfg.motor.backend {
        MotorBackend::Sim => Arc::new(SimMotorDrive::new("drive_base")),
    }
}

fn build_camera(cfg: &Config) -> Arc<dyn Camera> {
    match cfg.camera.backend {
        CameraBackend::Fswebcam => {
            Arc::new(FswebcamCamera::new("front", cfg.camera.settings.clone()))
        }
        CameraBackend::Sim => Arc::new(SimCamera::new("front", SIM_IMAGE_SIZE)),
    }
}

fn print_banner(cfg: &Config) {
    println!();
    println!("{}", r#"   ___       __        ___  _ "#.bold().cyan());
    println!("{}", r#"  / _ \___  / /  ___  / _ \(_)"#.bold().cyan());
    println!("{}", r#" / , _/ _ \/ _ \/ _ \/ ___/ / "#.bold().cyan());
    println!("{}", r#"/_/|_|\___/_.__/\___/_/  /_/  "#.bold().cyan());
    println!();
    println!(
        "  {} v{}",
        "RoboPi robot server".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(
        "  control {}  image {}  tls {}",
        cfg.control_port.to_string().bold(),
        cfg.image_port.to_string().bold(),
        if cfg.insecure_plaintext {
            "off".red()
        } else {
            "on".green()
        }
    );
    println!();
}
