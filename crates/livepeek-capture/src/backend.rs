use std::sync::Arc;

use async_trait::async_trait;
use livepeek_core::{
    CaptureError, ContentFilter, MediaType, SampleBuffer, StreamConfiguration, StreamHandle,
    TargetCatalog,
};
use tracing::{debug, warn};

// MARK: - StreamDelegate

/// Receiver of everything an open stream produces.
///
/// Called on backend-owned threads; implementations must return quickly and
/// never block.
pub trait StreamDelegate: Send + Sync {
    fn did_output_sample(&self, sample: SampleBuffer, kind: MediaType);

    /// The stream died. Called at most once per stream.
    fn did_stop_with_error(&self, error: CaptureError);
}

// MARK: - CaptureBackend

/// Platform screen-capture service.
///
/// Implementations:
/// - [`crate::SyntheticBackend`]: in-process generator, two delivery threads
/// - `GstBackend`: GStreamer source pipelines (`gst` feature)
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Current displays, windows and applications.
    async fn enumerate_targets(&self) -> Result<TargetCatalog, CaptureError>;

    /// Opens a stream and starts delivering samples to `delegate`.
    async fn open_stream(
        &self,
        config: &StreamConfiguration,
        filter: &ContentFilter,
        delegate: Arc<dyn StreamDelegate>,
    ) -> Result<StreamHandle, CaptureError>;

    async fn update_configuration(
        &self,
        handle: StreamHandle,
        config: &StreamConfiguration,
    ) -> Result<(), CaptureError>;

    async fn update_filter(&self, handle: StreamHandle, filter: &ContentFilter) -> Result<(), CaptureError>;

    async fn stop(&self, handle: StreamHandle) -> Result<(), CaptureError>;
}

/// Probes whether capture is authorised by attempting an enumeration.
pub async fn can_record(backend: &dyn CaptureBackend) -> bool {
    match backend.enumerate_targets().await {
        Ok(catalog) => {
            debug!(
                "can_record: {} display(s), {} window(s)",
                catalog.displays.len(),
                catalog.windows.len()
            );
            true
        }
        Err(e) => {
            warn!("can_record: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyntheticBackend;

    #[tokio::test]
    async fn can_record_reflects_permission() {
        let backend = SyntheticBackend::new(SyntheticBackend::demo_catalog());
        assert!(can_record(&backend).await);

        backend.set_permission_granted(false);
        assert!(!can_record(&backend).await);
    }
}
