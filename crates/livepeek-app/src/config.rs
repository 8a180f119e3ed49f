use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use livepeek_capture::SyntheticBackend;
use livepeek_core::{SessionSettings, TargetCatalog};
use serde::Deserialize;

/// Path of an optional JSON file holding an [`AppConfig`].
pub const CONFIG_ENV: &str = "LIVEPEEK_CONFIG";
/// Optional run duration in seconds; overrides `runSecs` from the file.
pub const RUN_SECS_ENV: &str = "LIVEPEEK_RUN_SECS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Synthetic,
    Gstreamer,
}

/// Top-level configuration of the `livepeek` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub settings: SessionSettings,
    /// Targets offered by the synthetic backend.
    pub synthetic: TargetCatalog,
    #[cfg(feature = "gst")]
    pub gstreamer: livepeek_capture::gst::GstCatalog,
    /// Stop after this many seconds; run until Ctrl-C when unset.
    #[serde(alias = "runSecs")]
    pub run_secs: Option<u64>,
    /// How often audio levels and preview FPS are logged.
    #[serde(alias = "statusIntervalMs")]
    pub status_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Synthetic,
            settings: SessionSettings::default(),
            synthetic: SyntheticBackend::demo_catalog(),
            #[cfg(feature = "gst")]
            gstreamer: Default::default(),
            run_secs: None,
            status_interval_ms: 1_000,
        }
    }
}

impl AppConfig {
    /// Reads `LIVEPEEK_CONFIG` (if set) and applies `LIVEPEEK_RUN_SECS`.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(secs) = std::env::var(RUN_SECS_ENV).ok().and_then(|s| s.parse().ok()) {
            config.run_secs = Some(secs);
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.run_secs.map(Duration::from_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(100))
    }
}

#[cfg(test)]
mod tests {
    use livepeek_core::{CaptureType, DisplayId};

    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.backend, BackendKind::Synthetic);
        assert_eq!(config.settings, SessionSettings::default());
        assert_eq!(config.synthetic, SyntheticBackend::demo_catalog());
        assert_eq!(config.run_for(), None);
        assert_eq!(config.status_interval(), Duration::from_secs(1));
    }

    #[test]
    fn parses_settings_and_custom_catalog() {
        let json = r#"{
            "backend": "synthetic",
            "runSecs": 5,
            "settings": { "captureType": "window", "captureAudio": true, "frameRate": 30 },
            "synthetic": { "displays": [ { "id": 7, "width": 800, "height": 600 } ] }
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.run_for(), Some(Duration::from_secs(5)));
        assert_eq!(config.settings.capture_type, CaptureType::Window);
        assert!(config.settings.capture_audio);
        assert_eq!(config.settings.frame_rate, 30);
        assert_eq!(config.settings.queue_depth, 5);
        assert_eq!(config.synthetic.displays[0].id, DisplayId(7));
        assert!(config.synthetic.windows.is_empty());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        assert!(AppConfig::from_json(r#"{ "backend": "screencapturekit" }"#).is_err());
    }
}
