use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{Bus, Config};
use dbus_interface::FaceIdService;

const BUS_NAME: &str = "org.faceid.Gallery1";
const OBJECT_PATH: &str = "/org/faceid/Gallery1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceidd starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        data_dir = %config.data_dir.display(),
        detection_threshold = config.settings.detection_threshold,
        match_threshold = config.settings.match_threshold,
        identify_threshold = config.settings.identify_threshold,
        bus = ?config.bus,
        "configuration loaded"
    );

    // Display snapshots are per-run scratch output.
    faceid_core::artifacts::reset_dir(&config.display_dir())
        .context("clearing display snapshot directory")?;

    let engine = engine::spawn_engine(&config).context("starting engine")?;

    if let Some(path) = &config.warmup_image {
        match engine.identify(path.clone()).await {
            Ok(result) => tracing::info!(matched = result.matched, "warm-up identify complete"),
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "warm-up identify failed"),
        }
    }
    match engine.project().await {
        Ok(outcome) if outcome.is_rendered() => {}
        Ok(_) => tracing::info!("gallery projection skipped at startup"),
        Err(e) => tracing::warn!(error = %e, "startup projection failed"),
    }

    let builder = match config.bus {
        Bus::Session => zbus::connection::Builder::session()?,
        Bus::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceIdService::new(engine))?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "faceidd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("faceidd shutting down");

    Ok(())
}
