use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{CaptureType, Display, RunningApplication, Window, WindowId};

// MARK: - StreamConfiguration

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureResolution {
    Automatic,
    Nominal,
    #[default]
    Best,
}

/// Parameters pushed to the capture backend for one stream.
///
/// Recomputed from scratch on every configuration-changing event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    /// Output size in pixels; `0` lets the backend choose.
    pub width: u32,
    pub height: u32,
    pub minimum_frame_interval: Duration,
    pub queue_depth: u32,
    pub captures_audio: bool,
    pub excludes_current_process_audio: bool,
    pub capture_resolution: CaptureResolution,
    pub excluded_applications: BTreeSet<String>,
    pub excluded_window_ids: BTreeSet<WindowId>,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            minimum_frame_interval: Duration::from_secs(1) / 60,
            queue_depth: 5,
            captures_audio: false,
            excludes_current_process_audio: false,
            capture_resolution: CaptureResolution::Best,
            excluded_applications: BTreeSet::new(),
            excluded_window_ids: BTreeSet::new(),
        }
    }
}

// MARK: - ContentFilter

/// Which on-screen content a stream includes.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentFilter {
    Display {
        display: Display,
        excluded_applications: Vec<RunningApplication>,
        excluded_windows: Vec<WindowId>,
    },
    /// A single window, independent of the display it sits on.
    Window { window: Window },
}

impl ContentFilter {
    pub fn capture_type(&self) -> CaptureType {
        match self {
            Self::Display { .. } => CaptureType::Display,
            Self::Window { .. } => CaptureType::Window,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Display { display, .. } => display.label(),
            Self::Window { window } => window.label(),
        }
    }
}

// MARK: - Picker

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PickingMode {
    SingleWindow,
    MultipleWindows,
    SingleDisplay,
}

/// Constraints applied to filters supplied by the system content picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PickerConfiguration {
    pub active: bool,
    pub allowed_modes: BTreeSet<PickingMode>,
    pub excluded_bundle_ids: BTreeSet<String>,
    pub excluded_window_ids: BTreeSet<WindowId>,
}

impl Default for PickerConfiguration {
    fn default() -> Self {
        Self {
            active: false,
            allowed_modes: [PickingMode::SingleWindow, PickingMode::SingleDisplay].into_iter().collect(),
            excluded_bundle_ids: BTreeSet::new(),
            excluded_window_ids: BTreeSet::new(),
        }
    }
}

impl PickerConfiguration {
    /// Why `filter` may not be taken from the picker, if it may not.
    pub fn refusal(&self, filter: &ContentFilter) -> Option<String> {
        if !self.active {
            return Some("picker is not active".into());
        }
        match filter {
            ContentFilter::Display { display, .. } => {
                if !self.allowed_modes.contains(&PickingMode::SingleDisplay) {
                    return Some(format!("display picking is disabled ({})", display.label()));
                }
            }
            ContentFilter::Window { window } => {
                let window_allowed = self.allowed_modes.contains(&PickingMode::SingleWindow)
                    || self.allowed_modes.contains(&PickingMode::MultipleWindows);
                if !window_allowed {
                    return Some(format!("window picking is disabled ({})", window.label()));
                }
                if self.excluded_window_ids.contains(&window.id) {
                    return Some(format!("window {} is excluded", window.id));
                }
                if let Some(app) = &window.owning_application {
                    if self.excluded_bundle_ids.contains(&app.bundle_identifier) {
                        return Some(format!("{} is excluded", app.bundle_identifier));
                    }
                }
            }
        }
        None
    }
}

// MARK: - SessionSettings

/// User-facing knobs that feed configuration and filter derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    #[serde(alias = "captureType")]
    pub capture_type: CaptureType,
    #[serde(alias = "captureAudio")]
    pub capture_audio: bool,
    #[serde(alias = "excludeSelf")]
    pub exclude_self: bool,
    #[serde(alias = "ownBundleId")]
    pub own_bundle_id: String,
    #[serde(alias = "excludedBundleIds")]
    pub excluded_bundle_ids: BTreeSet<String>,
    #[serde(alias = "excludedWindowIds")]
    pub excluded_window_ids: BTreeSet<WindowId>,
    #[serde(alias = "refreshIntervalMs")]
    pub refresh_interval_ms: u64,
    #[serde(alias = "frameRate")]
    pub frame_rate: u32,
    #[serde(alias = "queueDepth")]
    pub queue_depth: u32,
    #[serde(alias = "backingScaleFactor")]
    pub backing_scale_factor: u32,
    #[serde(alias = "windowScale")]
    pub window_scale: u32,
    pub picker: PickerConfiguration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capture_type: CaptureType::Display,
            capture_audio: false,
            exclude_self: true,
            own_bundle_id: "dev.livepeek.app".into(),
            excluded_bundle_ids: BTreeSet::new(),
            excluded_window_ids: BTreeSet::new(),
            refresh_interval_ms: 3_000,
            frame_rate: 60,
            queue_depth: 5,
            backing_scale_factor: 2,
            window_scale: 2,
            picker: PickerConfiguration::default(),
        }
    }
}

impl SessionSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn minimum_frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DisplayId, Rect};

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{
            "captureType": "window",
            "captureAudio": true,
            "refreshIntervalMs": 500,
            "excludedWindowIds": [12, 40],
            "picker": { "active": true, "allowedModes": ["singleDisplay"] }
        }"#;

        let settings: SessionSettings = serde_json::from_str(json).expect("valid camelCase settings");
        assert_eq!(settings.capture_type, CaptureType::Window);
        assert!(settings.capture_audio);
        assert_eq!(settings.refresh_interval(), Duration::from_millis(500));
        assert!(settings.excluded_window_ids.contains(&WindowId(40)));
        assert!(settings.picker.active);
        assert!(settings.picker.excluded_bundle_ids.is_empty());
    }

    #[test]
    fn deserializes_snake_case_fields_with_defaults() {
        let json = r#"{ "capture_type": "display", "frame_rate": 30 }"#;

        let settings: SessionSettings = serde_json::from_str(json).expect("valid snake_case settings");
        assert_eq!(settings.frame_rate, 30);
        assert_eq!(settings.refresh_interval_ms, 3_000);
        assert_eq!(settings.minimum_frame_interval(), Duration::from_secs(1) / 30);
        assert!(settings.exclude_self);
    }

    #[test]
    fn picker_refusals() {
        let display = Display { id: DisplayId(1), width: 1920, height: 1080 };
        let filter = ContentFilter::Display {
            display,
            excluded_applications: vec![],
            excluded_windows: vec![],
        };
        let mut picker = PickerConfiguration::default();
        assert!(picker.refusal(&filter).is_some(), "inactive picker");

        picker.active = true;
        assert!(picker.refusal(&filter).is_none());

        picker.allowed_modes.remove(&PickingMode::SingleDisplay);
        assert!(picker.refusal(&filter).is_some());

        let window = Window {
            id: WindowId(9),
            title: Some("Notes".into()),
            frame: Rect::new(0.0, 0.0, 300.0, 200.0),
            owning_application: None,
            is_on_screen: true,
        };
        picker.excluded_window_ids.insert(WindowId(9));
        assert!(picker.refusal(&ContentFilter::Window { window }).is_some());
    }
}
