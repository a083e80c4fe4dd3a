//! arrivald - person arrival alerts for one camera
//!
//! This daemon:
//! 1. Loads configuration (config file, `.env`, environment)
//! 2. Opens the detection stream and runs the camera loop
//! 3. Sends one photo per arrival to Telegram
//! 4. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use arrival_watch::{
    config::DetectorKind, AppConfig, CameraLoop, DetectorBackend, Dispatcher, FocalRegionDetector,
    NoFocalRegion, RegionRefiner, RtspConnector, Shutdown, SnapshotCapturer, StreamEndpoints,
    StubBackend, TelegramNotifier,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Send a photo alert each time a person arrives in front of the camera"
)]
struct Args {
    /// JSON or TOML config file. Environment variables override its values.
    #[arg(long, env = "ARRIVAL_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera label used in captions and logs (overrides CAMERA_NAME).
    #[arg(long)]
    camera_name: Option<String>,

    /// Verify the Telegram credentials, send a test message and exit.
    #[arg(long)]
    check_notifier: bool,
}

fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match dotenv {
        Ok(path) => log::info!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => log::debug!("no .env file"),
        Err(e) => log::warn!("failed to load .env: {}", e),
    }

    let args = Args::parse();
    let mut config = AppConfig::load_from(args.config.as_deref())?;
    if let Some(name) = args.camera_name.filter(|n| !n.trim().is_empty()) {
        config.camera_name = name.trim().to_string();
    }

    let notifier = Arc::new(TelegramNotifier::new(config.telegram_config())?);
    if args.check_notifier {
        return check_notifier(&notifier, &config.camera_name);
    }

    let endpoints = StreamEndpoints::from_settings(&config.stream)?;
    let connector = Arc::new(RtspConnector::default());
    let detector = build_detector(&config)?;
    let refiner = RegionRefiner::new(build_focal_detector(&config)?, config.snapshot.crop_padding);
    let capturer = SnapshotCapturer::new(
        connector.clone(),
        endpoints.snapshot.clone(),
        refiner,
        config.snapshot.jpeg_quality,
    );
    let dispatcher = Dispatcher::new(notifier);

    let mut camera = CameraLoop::new(
        config.loop_settings(),
        endpoints,
        connector,
        detector,
        capturer,
        dispatcher,
    );

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || handler_shutdown.trigger())
        .expect("error setting Ctrl-C handler");

    log::info!(
        "arrivald {} starting for camera {}",
        env!("CARGO_PKG_VERSION"),
        config.camera_name
    );
    let stats = camera.run(&shutdown)?;
    log::info!(
        "shutdown complete: {} arrivals, {} notifications sent, {} failed",
        stats.arrivals,
        stats.notifications_sent,
        stats.notifications_failed
    );
    Ok(())
}

fn check_notifier(notifier: &TelegramNotifier, camera: &str) -> Result<()> {
    let bot = notifier.verify()?;
    log::info!("telegram token ok (bot @{})", bot);
    notifier.send_text(&format!("arrivald test message from camera {}", camera))?;
    log::info!("telegram test message sent");
    Ok(())
}

fn build_detector(config: &AppConfig) -> Result<Box<dyn DetectorBackend>> {
    match config.detection.backend {
        DetectorKind::Stub => {
            log::warn!("detector backend is stub; no arrivals will be reported");
            Ok(Box::new(StubBackend::new()))
        }
        DetectorKind::Tract => build_tract_detector(config),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract_detector(config: &AppConfig) -> Result<Box<dyn DetectorBackend>> {
    let path = config
        .detection
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("DETECTOR_MODEL_PATH must be set for the tract backend"))?;
    log::info!("loading detector model {}", path.display());
    Ok(Box::new(arrival_watch::detect::TractBackend::new(path, 640)?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_detector(_config: &AppConfig) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend tract requires building with the backend-tract feature"
    ))
}

fn build_focal_detector(config: &AppConfig) -> Result<Box<dyn FocalRegionDetector>> {
    match config.detection.face_model_path.as_ref() {
        None => Ok(Box::new(NoFocalRegion)),
        Some(path) => load_face_model(path),
    }
}

#[cfg(feature = "backend-tract")]
fn load_face_model(path: &std::path::Path) -> Result<Box<dyn FocalRegionDetector>> {
    log::info!("loading face model {}", path.display());
    Ok(Box::new(arrival_watch::detect::TractFaceBackend::new(path)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_face_model(path: &std::path::Path) -> Result<Box<dyn FocalRegionDetector>> {
    log::warn!(
        "FACE_MODEL_PATH={} ignored: built without the backend-tract feature",
        path.display()
    );
    Ok(Box::new(NoFocalRegion))
}
