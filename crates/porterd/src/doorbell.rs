//! Single-flight flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A flag that at most one holder can set at a time.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
}

impl InFlight {
    /// Claim the flag, or `None` if another holder has it.
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the flag when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Debounces doorbell presses: a press while one is being handled is ignored.
#[derive(Debug, Clone, Default)]
pub struct Doorbell {
    flag: InFlight,
}

impl Doorbell {
    pub fn try_press(&self) -> Option<InFlightGuard> {
        let guard = self.flag.try_begin();
        if guard.is_none() {
            tracing::debug!("doorbell press ignored, previous press still in progress");
        }
        guard
    }

    pub fn is_pressed(&self) -> bool {
        self.flag.is_busy()
    }
}
