use std::sync::Arc;

use anyhow::{bail, Result};
use livepeek_capture::{can_record, CaptureBackend, PowerMeter, SyntheticBackend};
use livepeek_session::{CaptureSession, SessionEvent};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{AppConfig, BackendKind};
use crate::preview::LoggingPreview;

/// Runs one capture session until Ctrl-C or the configured duration.
///
/// # Configuration
/// `LIVEPEEK_CONFIG` names an optional JSON file (see [`AppConfig`]);
/// `LIVEPEEK_RUN_SECS` bounds the run.
///
/// # Flow
/// 1. Build the backend and probe that capture is permitted
/// 2. Spawn the session with a logging preview and a power meter
/// 3. Start capture; on failure the session keeps retrying on its refresh ticks
/// 4. Log status periodically, then stop the session on exit
pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    let backend = build_backend(&config)?;

    if !can_record(backend.as_ref()).await {
        bail!("screen capture is not permitted for this process");
    }

    let preview = Arc::new(LoggingPreview::new());
    let meter = Arc::new(PowerMeter::new());
    let session = CaptureSession::builder(backend, preview.clone())
        .settings(config.settings.clone())
        .audio_sink(meter.clone())
        .spawn();

    tokio::spawn(log_events(session.subscribe()));

    if let Err(e) = session.start().await {
        warn!(
            "Capture did not start ({}); retrying every {:?}",
            e,
            config.settings.refresh_interval()
        );
    }

    let deadline = async {
        match config.run_for() {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut status_ticker = tokio::time::interval(config.status_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                break;
            }

            _ = &mut deadline => {
                info!("Run duration elapsed, stopping");
                break;
            }

            _ = status_ticker.tick() => {
                let snapshot = session.snapshot();
                if !snapshot.is_running() {
                    continue;
                }
                if snapshot.audio_enabled {
                    let levels = meter.levels();
                    info!(
                        "{:.1} fps | audio avg {:.1} dB, peak {:.1} dB",
                        preview.fps(),
                        levels.average_power_db,
                        levels.peak_power_db
                    );
                } else {
                    info!("{:.1} fps | content {}", preview.fps(), snapshot.content_size);
                }
            }
        }
    }

    if let Err(e) = session.stop().await {
        warn!("Stop reported: {}", e);
    }
    meter.process_silence();
    info!(
        "Presented {} frames, metered {} audio buffers",
        preview.frames_presented(),
        meter.buffers_processed()
    );
    Ok(())
}

fn build_backend(config: &AppConfig) -> Result<Arc<dyn CaptureBackend>> {
    match config.backend {
        BackendKind::Synthetic => {
            info!(
                "Synthetic backend: {} display(s), {} window(s)",
                config.synthetic.displays.len(),
                config.synthetic.windows.len()
            );
            Ok(Arc::new(SyntheticBackend::new(config.synthetic.clone())))
        }
        #[cfg(feature = "gst")]
        BackendKind::Gstreamer => {
            let backend = livepeek_capture::gst::GstBackend::new(config.gstreamer.clone())?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "gst"))]
        BackendKind::Gstreamer => bail!("built without the `gst` feature; rebuild with --features gst"),
    }
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged(state)) => info!("Session state: {}", state.label()),
            Ok(SessionEvent::CatalogUpdated { displays, windows, applications }) => info!(
                "Catalog: {} display(s), {} window(s), {} application(s)",
                displays, windows, applications
            ),
            Ok(SessionEvent::ConfigurationRejected(e)) => warn!("Reconfiguration rejected: {}", e),
            Ok(event) => tracing::debug!("{:?}", event),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event log lagged by {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
