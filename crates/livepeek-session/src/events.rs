use livepeek_core::{
    CaptureError, CaptureType, DisplayId, SessionState, Size, TargetCatalog, WindowId,
};

/// Notification emitted by the session actor.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ContentSizeChanged(Size),
    CatalogUpdated { displays: usize, windows: usize, applications: usize },
    SelectionChanged { display: Option<DisplayId>, window: Option<WindowId> },
    /// A live reconfiguration reached the backend.
    ConfigurationApplied { filter: String },
    /// A live reconfiguration failed; the previous configuration stays.
    ConfigurationRejected(CaptureError),
}

/// Everything observable about a session at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub content_size: Size,
    pub catalog: TargetCatalog,
    pub capture_type: CaptureType,
    pub audio_enabled: bool,
    pub selected_display: Option<DisplayId>,
    pub selected_window: Option<WindowId>,
    /// A picker filter is waiting for the next reconfiguration.
    pub picker_override_pending: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            content_size: Size::UNIT,
            catalog: TargetCatalog::default(),
            capture_type: CaptureType::Display,
            audio_enabled: false,
            selected_display: None,
            selected_window: None,
            picker_override_pending: false,
        }
    }
}

impl SessionSnapshot {
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}
