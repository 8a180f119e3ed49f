//! Derivation of the backend-facing stream configuration and content filter
//! from the user's settings and current selection.

use std::collections::BTreeSet;

use livepeek_core::{
    CaptureError, CaptureResolution, CaptureType, ContentFilter, SessionSettings,
    StreamConfiguration, TargetCatalog,
};

use crate::selection::Selection;

/// Bundle ids kept out of display captures.
pub fn excluded_applications(settings: &SessionSettings) -> BTreeSet<String> {
    let mut excluded = settings.excluded_bundle_ids.clone();
    if settings.exclude_self && !settings.own_bundle_id.is_empty() {
        excluded.insert(settings.own_bundle_id.clone());
    }
    excluded
}

pub fn stream_configuration(settings: &SessionSettings, selection: &Selection) -> StreamConfiguration {
    let (width, height) = match settings.capture_type {
        CaptureType::Display => selection
            .display
            .as_ref()
            .map(|d| {
                (
                    d.width.saturating_mul(settings.backing_scale_factor),
                    d.height.saturating_mul(settings.backing_scale_factor),
                )
            })
            .unwrap_or((0, 0)),
        CaptureType::Window => selection
            .window
            .as_ref()
            .map(|w| {
                (
                    (w.frame.width() as u32).saturating_mul(settings.window_scale),
                    (w.frame.height() as u32).saturating_mul(settings.window_scale),
                )
            })
            .unwrap_or((0, 0)),
    };

    StreamConfiguration {
        width,
        height,
        minimum_frame_interval: settings.minimum_frame_interval(),
        queue_depth: settings.queue_depth,
        captures_audio: settings.capture_audio,
        excludes_current_process_audio: false,
        capture_resolution: CaptureResolution::Best,
        excluded_applications: excluded_applications(settings),
        excluded_window_ids: settings.excluded_window_ids.clone(),
    }
}

pub fn content_filter(
    settings: &SessionSettings,
    selection: &Selection,
    catalog: &TargetCatalog,
) -> Result<ContentFilter, CaptureError> {
    let missing = || CaptureError::NoTargetSelected { capture_type: settings.capture_type };
    match settings.capture_type {
        CaptureType::Display => {
            let display = selection.display.clone().ok_or_else(missing)?;
            let excluded = excluded_applications(settings);
            let excluded_applications = catalog
                .applications
                .iter()
                .filter(|app| excluded.contains(&app.bundle_identifier))
                .cloned()
                .collect();
            Ok(ContentFilter::Display {
                display,
                excluded_applications,
                excluded_windows: settings.excluded_window_ids.iter().copied().collect(),
            })
        }
        CaptureType::Window => {
            let window = selection.window.clone().ok_or_else(missing)?;
            Ok(ContentFilter::Window { window })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use livepeek_core::{Display, DisplayId, Rect, RunningApplication, Window, WindowId};

    use super::*;

    fn app(bundle: &str, name: &str) -> RunningApplication {
        RunningApplication {
            process_id: 7,
            bundle_identifier: bundle.into(),
            application_name: name.into(),
        }
    }

    fn fixture() -> (TargetCatalog, Selection) {
        let display = Display { id: DisplayId(1), width: 1512, height: 982 };
        let window = Window {
            id: WindowId(40),
            title: Some("notes".into()),
            frame: Rect::new(10.0, 10.0, 800.5, 600.0),
            owning_application: Some(app("com.example.notes", "Notes")),
            is_on_screen: true,
        };
        let catalog = TargetCatalog {
            displays: vec![display.clone()],
            windows: vec![window.clone()],
            applications: vec![
                app("dev.livepeek.app", "LivePeek"),
                app("com.example.notes", "Notes"),
                app("com.example.chat", "Chat"),
            ],
        };
        (catalog, Selection { display: Some(display), window: Some(window) })
    }

    #[test]
    fn display_configuration_scales_by_backing_factor() {
        let (_, selection) = fixture();
        let settings = SessionSettings::default();
        let config = stream_configuration(&settings, &selection);
        assert_eq!((config.width, config.height), (3024, 1964));
        assert_eq!(config.minimum_frame_interval, Duration::from_secs(1) / 60);
        assert_eq!(config.queue_depth, 5);
        assert!(!config.captures_audio);
        assert!(config.excluded_applications.contains("dev.livepeek.app"));
    }

    #[test]
    fn window_configuration_truncates_frame_then_scales() {
        let (_, selection) = fixture();
        let settings = SessionSettings { capture_type: CaptureType::Window, ..Default::default() };
        let config = stream_configuration(&settings, &selection);
        assert_eq!((config.width, config.height), (1600, 1200));
    }

    #[test]
    fn configuration_without_selection_lets_backend_choose() {
        let config = stream_configuration(&SessionSettings::default(), &Selection::default());
        assert_eq!((config.width, config.height), (0, 0));
    }

    #[test]
    fn display_filter_excludes_listed_applications() {
        let (catalog, selection) = fixture();
        let settings = SessionSettings {
            excluded_bundle_ids: ["com.example.chat".to_owned()].into_iter().collect(),
            excluded_window_ids: [WindowId(3)].into_iter().collect(),
            ..Default::default()
        };
        let ContentFilter::Display { display, excluded_applications, excluded_windows } =
            content_filter(&settings, &selection, &catalog).unwrap()
        else {
            panic!("expected a display filter");
        };
        assert_eq!(display.id, DisplayId(1));
        let bundles: Vec<_> =
            excluded_applications.iter().map(|a| a.bundle_identifier.as_str()).collect();
        assert_eq!(bundles, ["dev.livepeek.app", "com.example.chat"]);
        assert_eq!(excluded_windows, [WindowId(3)]);
    }

    #[test]
    fn including_self_drops_own_bundle_from_exclusions() {
        let (catalog, selection) = fixture();
        let settings = SessionSettings { exclude_self: false, ..Default::default() };
        let filter = content_filter(&settings, &selection, &catalog).unwrap();
        assert!(matches!(
            filter,
            ContentFilter::Display { ref excluded_applications, .. } if excluded_applications.is_empty()
        ));
    }

    #[test]
    fn window_filter_covers_only_selected_window() {
        let (catalog, selection) = fixture();
        let settings = SessionSettings { capture_type: CaptureType::Window, ..Default::default() };
        let filter = content_filter(&settings, &selection, &catalog).unwrap();
        assert_eq!(filter.capture_type(), CaptureType::Window);
        assert!(matches!(filter, ContentFilter::Window { window } if window.id == WindowId(40)));
    }

    #[test]
    fn missing_selection_is_an_error() {
        let (catalog, _) = fixture();
        let settings = SessionSettings { capture_type: CaptureType::Window, ..Default::default() };
        assert_eq!(
            content_filter(&settings, &Selection::default(), &catalog),
            Err(CaptureError::NoTargetSelected { capture_type: CaptureType::Window })
        );
    }
}
