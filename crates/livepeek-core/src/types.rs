use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;

// MARK: - Geometry

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Self = Self { width: 0.0, height: 0.0 };
    /// Placeholder published before the first frame arrives.
    pub const UNIT: Self = Self { width: 1.0, height: 1.0 };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const ZERO: Self = Self { origin: Point { x: 0.0, y: 0.0 }, size: Size::ZERO };

    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { origin: Point { x, y }, size: Size { width, height } }
    }

    /// Parses the dictionary form platforms attach to frames
    /// (`X`, `Y`, `Width`, `Height`). Any missing or non-finite field yields `None`.
    pub fn from_dictionary<'a, I>(entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let (mut x, mut y, mut w, mut h) = (None, None, None, None);
        for (key, value) in entries {
            if !value.is_finite() {
                return None;
            }
            match key {
                "X" => x = Some(value),
                "Y" => y = Some(value),
                "Width" => w = Some(value),
                "Height" => h = Some(value),
                _ => {}
            }
        }
        let (w, h) = (w?, h?);
        if w < 0.0 || h < 0.0 {
            return None;
        }
        Some(Self::new(x?, y?, w, h))
    }

    pub fn width(&self) -> f64 {
        self.size.width
    }

    pub fn height(&self) -> f64 {
        self.size.height
    }
}

// MARK: - SurfaceHandle

/// Opaque reference to a GPU-backed image, shared without copying.
///
/// Cloning is cheap: the pixel storage is reference counted.
#[derive(Clone)]
pub struct SurfaceHandle {
    id: u64,
    width: u32,
    height: u32,
    bytes_per_row: u32,
    pixels: Bytes,
}

impl SurfaceHandle {
    pub fn new(id: u64, width: u32, height: u32, bytes_per_row: u32, pixels: Bytes) -> Self {
        Self { id, width, height, bytes_per_row, pixels }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.bytes_per_row
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }
}

impl PartialEq for SurfaceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

// MARK: - CapturedFrame

/// One captured video frame ready for presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// `None` only for the [`CapturedFrame::invalid`] sentinel.
    pub surface: Option<SurfaceHandle>,
    pub content_rect: Rect,
    pub content_scale: f64,
    pub scale_factor: f64,
}

impl CapturedFrame {
    /// Placeholder frame; never delivered to a consumer.
    pub fn invalid() -> Self {
        Self { surface: None, content_rect: Rect::ZERO, content_scale: 0.0, scale_factor: 0.0 }
    }

    pub fn size(&self) -> Size {
        self.content_rect.size
    }

    pub fn is_valid(&self) -> bool {
        self.surface.is_some()
    }
}

// MARK: - Capture targets

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display#{}", self.0)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningApplication {
    pub process_id: i32,
    pub bundle_identifier: String,
    pub application_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Display {
    pub id: DisplayId,
    /// Size in points.
    pub width: u32,
    pub height: u32,
}

impl Display {
    pub fn label(&self) -> String {
        format!("Display: {} x {}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub id: WindowId,
    #[serde(default)]
    pub title: Option<String>,
    pub frame: Rect,
    #[serde(default)]
    pub owning_application: Option<RunningApplication>,
    #[serde(default = "default_true")]
    pub is_on_screen: bool,
}

fn default_true() -> bool {
    true
}

impl Window {
    pub fn label(&self) -> String {
        match (&self.owning_application, &self.title) {
            (Some(app), Some(title)) => format!("{}: {}", app.application_name, title),
            (None, Some(title)) => title.clone(),
            (Some(app), None) => format!("{}: {}", app.application_name, self.id),
            (None, None) => String::new(),
        }
    }

    fn application_name(&self) -> &str {
        self.owning_application
            .as_ref()
            .map(|app| app.application_name.as_str())
            .unwrap_or("")
    }
}

/// Something a session can be pointed at.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    Display(Display),
    Window(Window),
}

impl CaptureTarget {
    pub fn label(&self) -> String {
        match self {
            Self::Display(display) => display.label(),
            Self::Window(window) => window.label(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureType {
    #[default]
    Display,
    Window,
}

impl fmt::Display for CaptureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Display => write!(f, "display"),
            Self::Window => write!(f, "window"),
        }
    }
}

// MARK: - TargetCatalog

/// Everything currently capturable, as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetCatalog {
    #[serde(default)]
    pub displays: Vec<Display>,
    #[serde(default)]
    pub windows: Vec<Window>,
    #[serde(default)]
    pub applications: Vec<RunningApplication>,
}

impl TargetCatalog {
    pub fn display(&self, id: DisplayId) -> Option<&Display> {
        self.displays.iter().find(|display| display.id == id)
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.iter().find(|window| window.id == id)
    }

    /// Windows worth offering for selection: sorted by owning-application
    /// name, without ownerless or nameless windows, without our own windows.
    pub fn selectable_windows(&self, own_bundle_id: &str) -> Vec<Window> {
        let mut windows: Vec<Window> = self
            .windows
            .iter()
            .filter(|window| !window.application_name().is_empty())
            .filter(|window| {
                window
                    .owning_application
                    .as_ref()
                    .map_or(false, |app| app.bundle_identifier != own_bundle_id)
            })
            .cloned()
            .collect();
        windows.sort_by(|a, b| a.application_name().cmp(b.application_name()));
        windows
    }
}

// MARK: - StreamHandle

/// Backend-issued identity of an open capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

// MARK: - SessionState

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Stopping,
    Failed(CaptureError),
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Failed(_) => "Failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str, bundle: &str) -> RunningApplication {
        RunningApplication {
            process_id: 42,
            bundle_identifier: bundle.into(),
            application_name: name.into(),
        }
    }

    fn window(id: u32, title: Option<&str>, owner: Option<RunningApplication>) -> Window {
        Window {
            id: WindowId(id),
            title: title.map(str::to_owned),
            frame: Rect::new(0.0, 0.0, 800.0, 600.0),
            owning_application: owner,
            is_on_screen: true,
        }
    }

    #[test]
    fn rect_from_dictionary_requires_all_fields() {
        let rect = Rect::from_dictionary([("X", 0.0), ("Y", 10.0), ("Width", 640.0), ("Height", 480.0)])
            .expect("complete dictionary");
        assert_eq!(rect.size, Size::new(640.0, 480.0));

        assert!(Rect::from_dictionary([("X", 0.0), ("Y", 0.0), ("Width", 640.0)]).is_none());
        assert!(Rect::from_dictionary([("X", 0.0), ("Y", 0.0), ("Width", f64::NAN), ("Height", 1.0)]).is_none());
    }

    #[test]
    fn invalid_frame_is_a_sentinel() {
        let frame = CapturedFrame::invalid();
        assert!(!frame.is_valid());
        assert_eq!(frame.size(), Size::ZERO);
    }

    #[test]
    fn window_labels() {
        let safari = app("Safari", "com.apple.Safari");
        assert_eq!(window(7, Some("Docs"), Some(safari.clone())).label(), "Safari: Docs");
        assert_eq!(window(7, Some("Docs"), None).label(), "Docs");
        assert_eq!(window(7, None, Some(safari)).label(), "Safari: 7");
        assert_eq!(window(7, None, None).label(), "");

        let display = Display { id: DisplayId(1), width: 1512, height: 982 };
        assert_eq!(CaptureTarget::Display(display).label(), "Display: 1512 x 982");
    }

    #[test]
    fn selectable_windows_sorted_and_filtered() {
        let catalog = TargetCatalog {
            windows: vec![
                window(1, Some("Terminal"), Some(app("Terminal", "com.apple.Terminal"))),
                window(2, Some("Menu"), None),
                window(3, Some("Preview"), Some(app("LivePeek", "dev.livepeek.app"))),
                window(4, Some("Inbox"), Some(app("Mail", "com.apple.mail"))),
                window(5, Some("Ghost"), Some(app("", "com.example.ghost"))),
            ],
            ..Default::default()
        };

        let ids: Vec<u32> = catalog
            .selectable_windows("dev.livepeek.app")
            .iter()
            .map(|w| w.id.0)
            .collect();
        assert_eq!(ids, vec![4, 1]);
    }
}
