//! Single-slot hand-off between backend threads and the session loop.
//!
//! Producers never wait. A frame sent while the previous one is still
//! unconsumed replaces it (latest wins, counted in [`BridgeStats::overwritten`]);
//! the termination signal is stored separately and can never be overwritten.
//!
//! ```text
//! FrameProducer::send ──┐
//! FrameProducer::send ──┼──► Slot { latest, termination } ──► FrameStream::next().await
//! FrameProducer::finish ┘          (Mutex + Notify)
//! ```
//!
//! After `finish`, the consumer still receives the frame that was waiting
//! (if any), then the termination: `None` for a clean end, `Some(Err(_))`
//! for a failure. Everything sent after `finish` is ignored.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use livepeek_core::{CaptureError, CapturedFrame};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Default)]
struct Slot {
    latest: Option<CapturedFrame>,
    termination: Option<Result<(), CaptureError>>,
    finished: bool,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    notify: Notify,
    producers: AtomicUsize,
    delivered: AtomicU64,
    overwritten: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, result: Result<(), CaptureError>) -> bool {
        {
            let mut slot = self.lock();
            if slot.finished {
                return false;
            }
            slot.finished = true;
            slot.termination = Some(result);
        }
        self.notify.notify_one();
        true
    }

    fn stats(&self) -> BridgeStats {
        BridgeStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
        }
    }
}

/// Frame counters for one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Frames handed to the consumer.
    pub delivered: u64,
    /// Frames replaced before the consumer got to them.
    pub overwritten: u64,
}

/// Creates a connected producer/consumer pair.
pub fn frame_channel() -> (FrameProducer, FrameStream) {
    let shared = Arc::new(Shared::default());
    shared.producers.store(1, Ordering::Relaxed);
    (FrameProducer { shared: Arc::clone(&shared) }, FrameStream { shared })
}

// ── FrameProducer ─────────────────────────────────────────────────────────────

/// Producer side; clone freely across delivery threads.
///
/// Dropping the last producer without calling `finish` ends the sequence
/// cleanly.
pub struct FrameProducer {
    shared: Arc<Shared>,
}

impl FrameProducer {
    /// Publishes `frame`, replacing any frame not yet consumed.
    ///
    /// Returns `false` if the frame was discarded (sentinel frame or
    /// finished sequence).
    pub fn send(&self, frame: CapturedFrame) -> bool {
        if !frame.is_valid() {
            trace!("bridge: sentinel frame discarded");
            return false;
        }
        {
            let mut slot = self.shared.lock();
            if slot.finished {
                return false;
            }
            if slot.latest.replace(frame).is_some() {
                self.shared.overwritten.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.shared.notify.notify_one();
        true
    }

    /// Ends the sequence. Only the first call has any effect.
    pub fn finish(&self, result: Result<(), CaptureError>) -> bool {
        self.shared.finish(result)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.stats()
    }
}

impl Clone for FrameProducer {
    fn clone(&self) -> Self {
        self.shared.producers.fetch_add(1, Ordering::Relaxed);
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        if self.shared.producers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.finish(Ok(()));
        }
    }
}

// ── FrameStream ───────────────────────────────────────────────────────────────

/// Consumer side of the bridge.
pub struct FrameStream {
    shared: Arc<Shared>,
}

impl FrameStream {
    /// Waits for the next frame.
    ///
    /// Returns `None` once the sequence has ended cleanly; a failure is
    /// returned exactly once as `Some(Err(_))`, followed by `None`.
    pub async fn next(&mut self) -> Option<Result<CapturedFrame, CaptureError>> {
        loop {
            {
                let mut slot = self.shared.lock();
                if let Some(frame) = slot.latest.take() {
                    self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                    return Some(Ok(frame));
                }
                if slot.finished {
                    return match slot.termination.take() {
                        Some(Err(e)) => Some(Err(e)),
                        _ => None,
                    };
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.stats()
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        // Nobody left to deliver to; turn further sends into no-ops.
        let mut slot = self.shared.lock();
        slot.finished = true;
        slot.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use livepeek_core::{Rect, SurfaceHandle};

    use super::*;

    fn frame(id: u64) -> CapturedFrame {
        CapturedFrame {
            surface: Some(SurfaceHandle::new(id, 4, 4, 16, Bytes::from_static(&[0; 64]))),
            content_rect: Rect::new(0.0, 0.0, 100.0 + id as f64, 50.0),
            content_scale: 1.0,
            scale_factor: 2.0,
        }
    }

    fn surface_id(frame: &CapturedFrame) -> u64 {
        frame.surface.as_ref().map(SurfaceHandle::id).unwrap_or_default()
    }

    #[tokio::test]
    async fn latest_frame_wins_and_error_survives() {
        let (producer, mut stream) = frame_channel();
        for id in 1..=5 {
            assert!(producer.send(frame(id)));
        }
        assert!(producer.finish(Err(CaptureError::terminated("display unplugged"))));

        let first = stream.next().await.expect("frame").expect("not an error");
        assert_eq!(surface_id(&first), 5);

        let second = stream.next().await.expect("termination");
        assert_eq!(second, Err(CaptureError::terminated("display unplugged")));
        assert!(stream.next().await.is_none());

        assert_eq!(stream.stats(), BridgeStats { delivered: 1, overwritten: 4 });
    }

    #[tokio::test]
    async fn finish_is_idempotent_and_silences_producers() {
        let (producer, mut stream) = frame_channel();
        assert!(producer.finish(Ok(())));
        assert!(!producer.finish(Err(CaptureError::terminated("late"))));
        assert!(!producer.send(frame(1)));
        assert!(producer.is_finished());

        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn sentinel_frames_are_never_delivered() {
        let (producer, mut stream) = frame_channel();
        assert!(!producer.send(CapturedFrame::invalid()));
        producer.finish(Ok(()));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn pending_pull_resolves_once_on_finish_from_another_thread() {
        let (producer, mut stream) = frame_channel();
        let consumer = tokio::spawn(async move {
            let first = stream.next().await;
            let second = stream.next().await;
            (first, second)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        std::thread::spawn(move || {
            producer.finish(Ok(()));
        })
        .join()
        .expect("producer thread");

        let (first, second) = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("pull must not hang")
            .expect("consumer task");
        assert!(first.is_none());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn frames_from_threads_arrive_in_order() {
        let (producer, mut stream) = frame_channel();
        let sender = std::thread::spawn(move || {
            for id in 1..=200 {
                producer.send(frame(id));
                std::thread::sleep(Duration::from_micros(50));
            }
        });

        let mut last = 0;
        while let Some(item) = stream.next().await {
            let id = surface_id(&item.expect("no failure"));
            assert!(id > last, "frame {id} after {last}");
            last = id;
        }
        sender.join().expect("sender thread");
        assert_eq!(last, 200);
    }

    #[tokio::test]
    async fn dropping_last_producer_ends_cleanly() {
        let (producer, mut stream) = frame_channel();
        let other = producer.clone();
        drop(producer);
        other.send(frame(3));
        drop(other);

        assert_eq!(stream.next().await.map(|r| r.map(|f| surface_id(&f))), Some(Ok(3)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_turns_sends_into_noops() {
        let (producer, stream) = frame_channel();
        drop(stream);
        assert!(!producer.send(frame(1)));
        assert!(!producer.finish(Ok(())));
    }
}
