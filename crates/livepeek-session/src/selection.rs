use livepeek_core::{Display, TargetCatalog, Window};

/// Currently selected display and window.
///
/// Both are tracked regardless of capture type so switching type keeps the
/// other selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub display: Option<Display>,
    pub window: Option<Window>,
}

impl Selection {
    /// Brings the selection up to date with a fresh catalog: a selection
    /// still present takes the refreshed value, a vanished or missing one
    /// falls back to the first entry. Returns whether anything changed.
    pub fn reconcile(&mut self, catalog: &TargetCatalog) -> bool {
        let display = self
            .display
            .as_ref()
            .and_then(|current| catalog.display(current.id))
            .or_else(|| catalog.displays.first())
            .cloned();
        let window = self
            .window
            .as_ref()
            .and_then(|current| catalog.window(current.id))
            .or_else(|| catalog.windows.first())
            .cloned();

        let changed = display.as_ref().map(|d| d.id) != self.display.as_ref().map(|d| d.id)
            || window.as_ref().map(|w| w.id) != self.window.as_ref().map(|w| w.id);
        self.display = display;
        self.window = window;
        changed
    }
}
