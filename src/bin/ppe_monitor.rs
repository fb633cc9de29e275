//! ppe_monitor - PPE compliance monitoring daemon
//!
//! Loads configuration from defaults, `PPE_CONFIG` and `PPE_*` env vars,
//! loads the detector once, then serves the viewer page, `/status`, the live
//! `/video_feed` stream and `POST /detect` until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::mpsc;

use ppe_monitor::{ApiServer, MonitorConfig, PpeDetector};

fn main() -> Result<()> {
    let cfg = MonitorConfig::load().context("load configuration")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cfg.log_level))
        .init();

    log::info!(
        "ppe_monitor {} starting: camera={} model={} required={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.source,
        cfg.model.path.display(),
        cfg.required.categories()
    );

    // Keep serving /status when the model is missing so the problem is visible.
    let detector = match PpeDetector::load(&cfg.model) {
        Ok(detector) => Some(detector.into_shared()),
        Err(err) => {
            log::error!("detector unavailable: {}", err);
            None
        }
    };

    let api_handle = ApiServer::new(cfg.clone(), detector).spawn()?;
    log::info!("ppe_monitor running on http://{}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("ppe_monitor waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
