//! Periodic face location over the live preview.
//!
//! Every tick tries to take the single cycle permit. If a cycle is still
//! running the tick is dropped; ticks never queue. A cycle grabs one analysis
//! frame, locates faces and publishes a [`DetectionSnapshot`], replacing the
//! previous one.

use chrono::Utc;
use porter_core::{DetectionError, DetectionSnapshot, FaceLocator, FaceRegion, FrameSize};
use porter_hw::{CameraError, CaptureHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The locator is shared between the loop and still preparation.
pub type SharedLocator = Arc<Mutex<Box<dyn FaceLocator>>>;

/// Lock the shared locator, recovering it if a previous holder panicked.
pub fn lock_locator(locator: &SharedLocator) -> MutexGuard<'_, Box<dyn FaceLocator>> {
    locator.lock().unwrap_or_else(|poisoned| {
        tracing::debug!("face locator lock poisoned, recovering");
        PoisonError::into_inner(poisoned)
    })
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("capture: {0}")]
    Capture(#[from] CameraError),
    #[error("detection: {0}")]
    Detection(#[from] DetectionError),
}

#[derive(Debug, Default)]
pub struct LoopStats {
    ticks: AtomicU64,
    ticks_dropped: AtomicU64,
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopCounters {
    pub ticks: u64,
    pub ticks_dropped: u64,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
}

impl LoopStats {
    pub fn counters(&self) -> LoopCounters {
        LoopCounters {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
        }
    }
}

/// Read side of a running loop.
#[derive(Clone)]
pub struct DetectionFeed {
    snapshots: watch::Receiver<Option<DetectionSnapshot>>,
    stats: Arc<LoopStats>,
}

impl DetectionFeed {
    pub fn latest(&self) -> Option<DetectionSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DetectionSnapshot>> {
        self.snapshots.clone()
    }

    pub fn counters(&self) -> LoopCounters {
        self.stats.counters()
    }
}

/// Everything a cycle needs, cloned into the blocking task.
#[derive(Clone)]
struct Cycle {
    handle: CaptureHandle,
    locator: SharedLocator,
    publisher: Arc<watch::Sender<Option<DetectionSnapshot>>>,
    stats: Arc<LoopStats>,
    /// Consecutive failures, for log throttling.
    failures: Arc<AtomicU64>,
}

pub struct FrameLoop {
    timer: JoinHandle<()>,
    gate: Arc<Semaphore>,
    feed: DetectionFeed,
}

impl FrameLoop {
    /// Start ticking every `period` on the current runtime.
    pub fn spawn(handle: CaptureHandle, locator: SharedLocator, period: Duration) -> Self {
        let gate = Arc::new(Semaphore::new(1));
        let (tx, rx) = watch::channel(None);
        let stats = Arc::new(LoopStats::default());

        let cycle = Cycle {
            handle,
            locator,
            publisher: Arc::new(tx),
            stats: Arc::clone(&stats),
            failures: Arc::new(AtomicU64::new(0)),
        };
        let timer = tokio::spawn(run_timer(cycle, Arc::clone(&gate), period));
        tracing::info!(period_ms = period.as_millis() as u64, "frame loop started");

        Self {
            timer,
            gate,
            feed: DetectionFeed { snapshots: rx, stats },
        }
    }

    pub fn feed(&self) -> DetectionFeed {
        self.feed.clone()
    }

    pub fn latest(&self) -> Option<DetectionSnapshot> {
        self.feed.latest()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DetectionSnapshot>> {
        self.feed.subscribe()
    }

    pub fn counters(&self) -> LoopCounters {
        self.feed.counters()
    }

    /// Cancel the timer and wait for a cycle in progress to finish.
    pub async fn stop(mut self) -> LoopCounters {
        self.timer.abort();
        if let Err(e) = (&mut self.timer).await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "frame loop timer ended abnormally");
            }
        }
        // The permit only comes back once the in-flight cycle has released it.
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.gate.close();

        let counters = self.feed.counters();
        tracing::info!(?counters, "frame loop stopped");
        counters
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

async fn run_timer(cycle: Cycle, gate: Arc<Semaphore>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        cycle.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let permit = match Arc::clone(&gate).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                cycle.stats.ticks_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("previous cycle still running, tick dropped");
                continue;
            }
        };

        cycle.stats.cycles_started.fetch_add(1, Ordering::Relaxed);
        let cycle = cycle.clone();
        tokio::task::spawn_blocking(move || cycle.run(permit));
    }
}

impl Cycle {
    fn run(&self, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        match self.locate() {
            Ok((frame_size, faces)) => {
                self.failures.store(0, Ordering::Relaxed);
                let sequence = self.stats.cycles_completed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(sequence, faces = faces.len(), "detection published");
                self.publisher.send_replace(Some(DetectionSnapshot {
                    sequence,
                    frame_size,
                    faces,
                    captured_at: Utc::now(),
                }));
            }
            Err(e) => {
                self.stats.cycles_failed.fetch_add(1, Ordering::Relaxed);
                let streak = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                if streak == 1 || streak % 100 == 0 {
                    tracing::error!(error = %e, consecutive = streak, "frame cycle failed");
                } else {
                    tracing::debug!(error = %e, consecutive = streak, "frame cycle failed");
                }
            }
        }
    }

    fn locate(&self) -> Result<(FrameSize, Vec<FaceRegion>), CycleError> {
        let format = lock_locator(&self.locator).preferred_format();
        let frame = self.handle.capture_analysis_frame(format)?;
        let faces = lock_locator(&self.locator).locate(&frame)?;
        Ok((
            FrameSize {
                width: frame.width,
                height: frame.height,
            },
            faces,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SlowLocator;
    use porter_hw::{Camera, PreviewSession, SyntheticDevice};

    fn preview(width: u32, height: u32) -> PreviewSession {
        Camera::new(Box::new(SyntheticDevice::new(width, height)))
            .start_preview()
            .unwrap()
    }

    fn shared(locator: SlowLocator) -> SharedLocator {
        let boxed: Box<dyn FaceLocator> = Box::new(locator);
        Arc::new(Mutex::new(boxed))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_locator_drops_ticks() {
        let session = preview(64, 48);
        let locator = SlowLocator::new(Duration::from_millis(200), vec![FaceRegion::new(1, 2, 3, 4)]);
        let calls = Arc::clone(&locator.calls);

        let frame_loop = FrameLoop::spawn(session.handle(), shared(locator), Duration::from_millis(66));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let counters = frame_loop.stop().await;

        assert_eq!(calls.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(calls.active.load(Ordering::SeqCst), 0);
        assert!(counters.ticks_dropped > 0, "{counters:?}");
        assert!(counters.cycles_completed >= 2, "{counters:?}");
        assert_eq!(counters.cycles_started, counters.cycles_completed);
        assert_eq!(counters.ticks, counters.cycles_started + counters.ticks_dropped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publishes_latest_snapshot() {
        let session = preview(64, 48);
        let face = FaceRegion::new(10, 10, 20, 20);
        let frame_loop = FrameLoop::spawn(
            session.handle(),
            shared(SlowLocator::new(Duration::ZERO, vec![face])),
            Duration::from_millis(10),
        );

        let mut rx = frame_loop.subscribe();
        rx.changed().await.unwrap();
        let first = rx.borrow_and_update().clone().unwrap();
        rx.changed().await.unwrap();
        let second = rx.borrow_and_update().clone().unwrap();

        assert_eq!(first.faces, vec![face]);
        assert_eq!(first.frame_size, FrameSize { width: 64, height: 48 });
        assert!(second.sequence > first.sequence);
        frame_loop.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detection_survives_locator_panic() {
        let session = preview(32, 32);
        let face = FaceRegion::new(2, 2, 8, 8);
        let locator = shared(SlowLocator::new(Duration::ZERO, vec![face]));

        let held = Arc::clone(&locator);
        let _ = std::thread::spawn(move || {
            let _guard = held.lock().unwrap();
            panic!("locator crashed");
        })
        .join();
        assert!(locator.is_poisoned());

        let frame_loop = FrameLoop::spawn(session.handle(), locator, Duration::from_millis(10));
        let mut rx = frame_loop.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().faces, vec![face]);
        let counters = frame_loop.stop().await;
        assert_eq!(counters.cycles_failed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_release_gate() {
        let session = preview(32, 32);
        let frame_loop = FrameLoop::spawn(session.handle(), shared(SlowLocator::failing()), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let counters = frame_loop.stop().await;

        assert!(counters.cycles_failed >= 3, "{counters:?}");
        assert_eq!(counters.cycles_completed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stopped_preview_produces_no_snapshot() {
        let session = preview(32, 32);
        let handle = session.handle();
        let _camera = session.stop_preview().unwrap();

        let frame_loop = FrameLoop::spawn(
            handle,
            shared(SlowLocator::new(Duration::ZERO, vec![])),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(frame_loop.latest().is_none());
        let counters = frame_loop.stop().await;
        assert!(counters.cycles_failed > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight_cycle() {
        let session = preview(32, 32);
        let locator = SlowLocator::new(Duration::from_millis(150), vec![]);
        let calls = Arc::clone(&locator.calls);
        let frame_loop = FrameLoop::spawn(session.handle(), shared(locator), Duration::from_millis(20));

        // First tick fires immediately; stop while its cycle is sleeping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.active.load(Ordering::SeqCst), 1);
        let counters = frame_loop.stop().await;
        assert_eq!(calls.active.load(Ordering::SeqCst), 0);

        let entered = calls.entered.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.entered.load(Ordering::SeqCst), entered);
        assert_eq!(counters.cycles_completed, 1);
    }
}
