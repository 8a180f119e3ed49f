//! `CaptureSession` — the actor that owns one capture stream's lifecycle.
//!
//! ```text
//! CaptureSession (handle) ──Command──► SessionActor ──open/update/stop──► CaptureBackend
//!        ▲                                 │   ▲
//!        │ watch<SessionSnapshot>          │   └── FrameStream ◄── CaptureStreamOutput
//!        └─ broadcast<SessionEvent> ◄──────┘
//!                                          └──► PreviewSink::update_frame
//! ```
//!
//! The actor loop selects over three sources: handle commands, the current
//! frame stream, and a refresh ticker that is armed by `start()` and
//! disarmed by `stop()`. On every tick the catalog is refreshed, and capture
//! restarts if it is not running.

use std::collections::BTreeSet;
use std::sync::Arc;

use livepeek_capture::{
    frame_channel, AudioSink, CaptureBackend, CaptureStreamOutput, FrameProducer, FrameStream,
    PreviewSink,
};
use livepeek_core::{
    CaptureError, CaptureType, CapturedFrame, ContentFilter, DisplayId, SessionSettings,
    SessionState, Size, StreamConfiguration, StreamHandle, TargetCatalog, WindowId,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::events::{SessionEvent, SessionSnapshot};
use crate::filter::{content_filter, stream_configuration};
use crate::selection::Selection;

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    RefreshCatalog,
    SetCaptureType(CaptureType),
    SelectDisplay(DisplayId),
    SelectWindow(WindowId),
    SetAudioEnabled(bool),
    SetExcludeSelf(bool),
    SetExcludedBundleIds(BTreeSet<String>),
    SetExcludedWindowIds(BTreeSet<WindowId>),
    SetPickerActive(bool),
    ApplyPickerFilter(ContentFilter),
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), CaptureError>>,
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects the collaborators of a session before spawning its actor.
pub struct SessionBuilder {
    backend: Arc<dyn CaptureBackend>,
    preview: Arc<dyn PreviewSink>,
    audio: Option<Arc<dyn AudioSink>>,
    settings: SessionSettings,
}

impl SessionBuilder {
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Route decoded PCM to `sink`. Without one, audio samples are dropped.
    pub fn audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio = Some(sink);
        self
    }

    /// Spawn the session actor on the current tokio runtime.
    pub fn spawn(self) -> CaptureSession {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let period = self.settings.refresh_interval();
        let mut refresh = tokio::time::interval_at(Instant::now() + period, period);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let actor = SessionActor {
            backend: self.backend,
            preview: self.preview,
            audio: self.audio,
            settings: self.settings,
            catalog: TargetCatalog::default(),
            selection: Selection::default(),
            state: SessionState::Idle,
            content_size: Size::UNIT,
            active: None,
            picker_filter: None,
            polling: false,
            refresh,
            snapshot: watch::channel(SessionSnapshot::default()).0,
            events: events.clone(),
        };
        actor.publish();
        let snapshot = actor.snapshot.subscribe();

        tokio::spawn(actor.run(command_rx));

        CaptureSession { commands: command_tx, snapshot, events }
    }
}

// ── CaptureSession ────────────────────────────────────────────────────────────

/// Cloneable handle to a running session actor.
///
/// Every command resolves once the actor has fully handled it. The actor
/// stops capture and exits when the last handle is dropped.
#[derive(Clone)]
pub struct CaptureSession {
    commands: mpsc::Sender<Request>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl CaptureSession {
    pub fn builder(backend: Arc<dyn CaptureBackend>, preview: Arc<dyn PreviewSink>) -> SessionBuilder {
        SessionBuilder { backend, preview, audio: None, settings: SessionSettings::default() }
    }

    /// Refresh the catalog, open a stream for the current selection and arm
    /// the refresh ticker. A no-op while already running.
    pub async fn start(&self) -> Result<(), CaptureError> {
        self.request(Command::Start).await
    }

    /// Stop the backend stream, finish the frame sequence and go idle.
    pub async fn stop(&self) -> Result<(), CaptureError> {
        self.request(Command::Stop).await
    }

    pub async fn refresh_catalog(&self) -> Result<(), CaptureError> {
        self.request(Command::RefreshCatalog).await
    }

    pub async fn set_capture_type(&self, capture_type: CaptureType) -> Result<(), CaptureError> {
        self.request(Command::SetCaptureType(capture_type)).await
    }

    pub async fn select_display(&self, id: DisplayId) -> Result<(), CaptureError> {
        self.request(Command::SelectDisplay(id)).await
    }

    pub async fn select_window(&self, id: WindowId) -> Result<(), CaptureError> {
        self.request(Command::SelectWindow(id)).await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<(), CaptureError> {
        self.request(Command::SetAudioEnabled(enabled)).await
    }

    pub async fn set_exclude_self(&self, exclude: bool) -> Result<(), CaptureError> {
        self.request(Command::SetExcludeSelf(exclude)).await
    }

    pub async fn set_excluded_bundle_ids(&self, ids: BTreeSet<String>) -> Result<(), CaptureError> {
        self.request(Command::SetExcludedBundleIds(ids)).await
    }

    pub async fn set_excluded_window_ids(&self, ids: BTreeSet<WindowId>) -> Result<(), CaptureError> {
        self.request(Command::SetExcludedWindowIds(ids)).await
    }

    /// Deactivating the picker also discards a pending picker filter.
    pub async fn set_picker_active(&self, active: bool) -> Result<(), CaptureError> {
        self.request(Command::SetPickerActive(active)).await
    }

    /// Store a filter chosen in the system picker. It replaces the locally
    /// built filter for the next reconfiguration only.
    pub async fn apply_picker_filter(&self, filter: ContentFilter) -> Result<(), CaptureError> {
        self.request(Command::ApplyPickerFilter(filter)).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.snapshot.borrow().is_running()
    }

    /// A receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request(&self, command: Command) -> Result<(), CaptureError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| CaptureError::SessionClosed)?;
        response.await.map_err(|_| CaptureError::SessionClosed)?
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

struct ActiveStream {
    /// `None` when the backend refused to open the stream.
    handle: Option<StreamHandle>,
    producer: FrameProducer,
    frames: FrameStream,
}

struct SessionActor {
    backend: Arc<dyn CaptureBackend>,
    preview: Arc<dyn PreviewSink>,
    audio: Option<Arc<dyn AudioSink>>,
    settings: SessionSettings,
    catalog: TargetCatalog,
    selection: Selection,
    state: SessionState,
    content_size: Size,
    active: Option<ActiveStream>,
    picker_filter: Option<ContentFilter>,
    polling: bool,
    refresh: Interval,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

async fn next_frame(active: &mut Option<ActiveStream>) -> Option<Result<CapturedFrame, CaptureError>> {
    match active {
        Some(active) => active.frames.next().await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Request>) {
        loop {
            tokio::select! {
                request = commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        debug!("All session handles dropped");
                        break;
                    };
                    let result = self.handle(command).await;
                    let _ = reply.send(result);
                }

                item = next_frame(&mut self.active) => {
                    self.on_stream_item(item).await;
                }

                _ = self.refresh.tick(), if self.polling => {
                    self.on_refresh_tick().await;
                }
            }
        }

        if let Err(e) = self.stop().await {
            warn!("Stopping capture on exit: {}", e);
        }
        info!("Capture session exited");
    }

    async fn handle(&mut self, command: Command) -> Result<(), CaptureError> {
        match command {
            Command::Start => self.start().await,
            Command::Stop => self.stop().await,
            Command::RefreshCatalog => self.refresh_catalog().await,
            Command::SetCaptureType(capture_type) => {
                self.settings.capture_type = capture_type;
                self.publish();
                self.reconfigure().await;
                Ok(())
            }
            Command::SelectDisplay(id) => {
                let display = self
                    .catalog
                    .display(id)
                    .cloned()
                    .ok_or_else(|| CaptureError::UnknownTarget { target: format!("display {id}") })?;
                self.selection.display = Some(display);
                self.selection_changed();
                self.reconfigure().await;
                Ok(())
            }
            Command::SelectWindow(id) => {
                let window = self
                    .catalog
                    .window(id)
                    .cloned()
                    .ok_or_else(|| CaptureError::UnknownTarget { target: format!("window {id}") })?;
                self.selection.window = Some(window);
                self.selection_changed();
                self.reconfigure().await;
                Ok(())
            }
            Command::SetAudioEnabled(enabled) => {
                self.settings.capture_audio = enabled;
                self.publish();
                self.reconfigure().await;
                Ok(())
            }
            Command::SetExcludeSelf(exclude) => {
                self.settings.exclude_self = exclude;
                self.reconfigure().await;
                Ok(())
            }
            Command::SetExcludedBundleIds(ids) => {
                self.settings.excluded_bundle_ids = ids;
                self.reconfigure().await;
                Ok(())
            }
            Command::SetExcludedWindowIds(ids) => {
                self.settings.excluded_window_ids = ids;
                self.reconfigure().await;
                Ok(())
            }
            Command::SetPickerActive(active) => {
                self.settings.picker.active = active;
                if !active {
                    self.picker_filter = None;
                }
                self.publish();
                Ok(())
            }
            Command::ApplyPickerFilter(filter) => {
                if let Some(reason) = self.settings.picker.refusal(&filter) {
                    warn!("Picker filter {} rejected: {}", filter.label(), reason);
                    return Err(CaptureError::PickerRejected { reason });
                }
                info!("Picker selected {}", filter.label());
                self.picker_filter = Some(filter);
                self.publish();
                Ok(())
            }
        }
    }

    // MARK: - Lifecycle

    async fn start(&mut self) -> Result<(), CaptureError> {
        if !self.polling {
            self.polling = true;
            self.refresh.reset();
        }
        self.start_capture().await
    }

    async fn start_capture(&mut self) -> Result<(), CaptureError> {
        if self.state.is_running() {
            return Ok(());
        }

        if let Err(e) = self.refresh_catalog().await {
            error!("Capture start failed: {}", e);
            self.transition(SessionState::Failed(e.clone()));
            return Err(e);
        }

        let config = self.stream_configuration();
        let filter = match self.content_filter() {
            Ok(filter) => filter,
            Err(e) => {
                error!("Capture start failed: {}", e);
                self.transition(SessionState::Failed(e.clone()));
                return Err(e);
            }
        };

        let (producer, frames) = frame_channel();
        let output = Arc::new(CaptureStreamOutput::new(producer.clone(), self.audio.clone()));
        self.transition(SessionState::Running);

        match self.backend.open_stream(&config, &filter, output).await {
            Ok(handle) => {
                info!(
                    "Capture[{}] started: {} at {}x{} (audio={})",
                    handle,
                    filter.label(),
                    config.width,
                    config.height,
                    config.captures_audio
                );
                self.active = Some(ActiveStream { handle: Some(handle), producer, frames });
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    CaptureError::StartFailure { .. } => e,
                    other => CaptureError::start_failure(other.to_string()),
                };
                producer.finish(Err(e.clone()));
                self.active = Some(ActiveStream { handle: None, producer, frames });
                let item = next_frame(&mut self.active).await;
                self.on_stream_item(item).await;
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.polling = false;

        let Some(mut active) = self.active.take() else {
            if self.state != SessionState::Idle {
                self.transition(SessionState::Idle);
            }
            return Ok(());
        };
        self.transition(SessionState::Stopping);

        let outcome = match active.handle {
            Some(handle) => self.backend.stop(handle).await,
            None => Ok(()),
        };
        match &outcome {
            Ok(()) => active.producer.finish(Ok(())),
            Err(e) => {
                warn!("Backend stop failed: {}", e);
                active.producer.finish(Err(CaptureError::terminated(e.to_string())))
            }
        };

        while let Some(item) = active.frames.next().await {
            if let Err(e) = item {
                debug!("Frame stream finished with: {}", e);
            }
        }
        let stats = active.frames.stats();
        info!(
            "Capture stopped ({} frames delivered, {} overwritten)",
            stats.delivered, stats.overwritten
        );

        self.transition(SessionState::Idle);
        outcome
    }

    /// Push a fresh configuration and filter into the running stream.
    /// Failures are logged and reported as events; the stream keeps running.
    async fn reconfigure(&mut self) {
        if !self.state.is_running() {
            return;
        }
        let Some(handle) = self.active.as_ref().and_then(|active| active.handle) else {
            return;
        };

        let config = self.stream_configuration();
        let filter = match self.picker_filter.take() {
            Some(filter) => {
                debug!("Capture[{}] using picker filter", handle);
                filter
            }
            None => match self.content_filter() {
                Ok(filter) => filter,
                Err(e) => {
                    warn!("Capture[{}] reconfigure skipped: {}", handle, e);
                    self.emit(SessionEvent::ConfigurationRejected(e));
                    self.publish();
                    return;
                }
            },
        };

        let applied = match self.backend.update_configuration(handle, &config).await {
            Ok(()) => self.backend.update_filter(handle, &filter).await,
            Err(e) => Err(e),
        };
        match applied {
            Ok(()) => {
                info!("Capture[{}] reconfigured: {}", handle, filter.label());
                self.emit(SessionEvent::ConfigurationApplied { filter: filter.label() });
            }
            Err(e) => {
                warn!("Capture[{}] failed to update the stream: {}", handle, e);
                self.emit(SessionEvent::ConfigurationRejected(e));
            }
        }
        self.publish();
    }

    // MARK: - Stream and ticker

    async fn on_stream_item(&mut self, item: Option<Result<CapturedFrame, CaptureError>>) {
        match item {
            Some(Ok(frame)) => self.on_frame(frame),
            Some(Err(e)) => {
                error!("Capture error: {}", e);
                self.release_stream().await;
                self.transition(SessionState::Failed(e));
            }
            None => {
                info!("Capture stream ended");
                self.release_stream().await;
                self.transition(SessionState::Idle);
            }
        }
    }

    fn on_frame(&mut self, frame: CapturedFrame) {
        self.preview.update_frame(&frame);
        let size = frame.size();
        if size != self.content_size {
            debug!("Content size {} -> {}", self.content_size, size);
            self.content_size = size;
            self.emit(SessionEvent::ContentSizeChanged(size));
            self.publish();
        }
    }

    /// Drop a stream whose sequence already finished, releasing its
    /// backend resources.
    async fn release_stream(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if let Some(handle) = active.handle {
            if let Err(e) = self.backend.stop(handle).await {
                debug!("Capture[{}] release: {}", handle, e);
            }
        }
        let stats = active.frames.stats();
        debug!("Stream released ({} delivered, {} overwritten)", stats.delivered, stats.overwritten);
    }

    async fn on_refresh_tick(&mut self) {
        if self.state.is_running() {
            if let Err(e) = self.refresh_catalog().await {
                warn!("Catalog refresh failed: {}", e);
            }
        } else {
            debug!("Refresh tick: restarting capture");
            // Failures already moved the session to Failed.
            let _ = self.start_capture().await;
        }
    }

    // MARK: - Catalog and derivation

    async fn refresh_catalog(&mut self) -> Result<(), CaptureError> {
        let catalog = self.backend.enumerate_targets().await?;
        let windows = catalog.selectable_windows(&self.settings.own_bundle_id);
        self.catalog = TargetCatalog {
            displays: catalog.displays,
            windows,
            applications: catalog.applications,
        };
        self.emit(SessionEvent::CatalogUpdated {
            displays: self.catalog.displays.len(),
            windows: self.catalog.windows.len(),
            applications: self.catalog.applications.len(),
        });

        if self.selection.reconcile(&self.catalog) {
            self.selection_changed();
            self.reconfigure().await;
        } else {
            self.publish();
        }
        Ok(())
    }

    fn stream_configuration(&self) -> StreamConfiguration {
        stream_configuration(&self.settings, &self.selection)
    }

    fn content_filter(&self) -> Result<ContentFilter, CaptureError> {
        content_filter(&self.settings, &self.selection, &self.catalog)
    }

    // MARK: - Publishing

    fn transition(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!("Session {} -> {}", self.state.label(), state.label());
        self.state = state.clone();
        self.emit(SessionEvent::StateChanged(state));
        self.publish();
    }

    fn selection_changed(&mut self) {
        self.emit(SessionEvent::SelectionChanged {
            display: self.selection.display.as_ref().map(|d| d.id),
            window: self.selection.window.as_ref().map(|w| w.id),
        });
        self.publish();
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state.clone(),
            content_size: self.content_size,
            catalog: self.catalog.clone(),
            capture_type: self.settings.capture_type,
            audio_enabled: self.settings.capture_audio,
            selected_display: self.selection.display.as_ref().map(|d| d.id),
            selected_window: self.selection.window.as_ref().map(|w| w.id),
            picker_override_pending: self.picker_filter.is_some(),
        });
    }
}
