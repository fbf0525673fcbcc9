//! Shared compositor context.
//!
//! Everything that used to be a process global in a classic compositor
//! (serial counter, presentation clock, the big compositor lock and the
//! backend → dispatch event channel) lives here and is passed explicitly
//! to outputs, backends and the compositor state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::core::backend::BackendEvent;
use crate::core::render::cleanup::CleanupQueue;

// ============================================================================
// Process Lock
// ============================================================================

/// Process-wide re-entrant lock.
///
/// The dispatch thread holds it while promoting surface state and rebuilding
/// the scene; render threads hold it while reading the scene and submitting
/// a frame. Re-entrancy means a thread that already holds it (e.g. a commit
/// that triggers a synchronous repaint) never deadlocks on itself.
#[derive(Default)]
pub struct ProcessLock {
    inner: ReentrantMutex<()>,
}

/// Scoped guard, the lock is released on drop.
pub struct ProcessLockGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> ProcessLockGuard<'_> {
        ProcessLockGuard {
            _guard: self.inner.lock(),
        }
    }

    pub fn try_lock_for(&self, timeout: Duration) -> Option<ProcessLockGuard<'_>> {
        self.inner
            .try_lock_for(timeout)
            .map(|guard| ProcessLockGuard { _guard: guard })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.inner.is_owned_by_current_thread()
    }
}

// ============================================================================
// Presentation Clock
// ============================================================================

/// Clock used for presentation timestamps (`wp_presentation.clock_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationClock {
    pub id: libc::clockid_t,
}

impl PresentationClock {
    pub const MONOTONIC: PresentationClock = PresentationClock {
        id: libc::CLOCK_MONOTONIC,
    };

    /// Current time on this clock.
    pub fn now(&self) -> Duration {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: ts is a valid out-pointer for the duration of the call.
        let rc = unsafe { libc::clock_gettime(self.id, &mut ts) };
        if rc != 0 {
            return Duration::ZERO;
        }
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }

    /// Milliseconds truncated to u32, as used by `wl_callback.done`.
    pub fn now_ms(&self) -> u32 {
        self.now().as_millis() as u32
    }
}

impl Default for PresentationClock {
    fn default() -> Self {
        Self::MONOTONIC
    }
}

// ============================================================================
// Context
// ============================================================================

struct ContextInner {
    lock: ProcessLock,
    serial: AtomicU32,
    clock: PresentationClock,
    events: Sender<BackendEvent>,
    cleanup: CleanupQueue,
}

/// Handle threaded through outputs, backends and the compositor state.
#[derive(Clone)]
pub struct CompositorContext {
    inner: Arc<ContextInner>,
}

impl CompositorContext {
    /// Create a context and the receiving end of its backend event channel.
    pub fn new() -> (Self, Receiver<BackendEvent>) {
        Self::with_clock(PresentationClock::MONOTONIC)
    }

    pub fn with_clock(clock: PresentationClock) -> (Self, Receiver<BackendEvent>) {
        let (tx, rx) = mpsc::channel();
        let ctx = Self {
            inner: Arc::new(ContextInner {
                lock: ProcessLock::new(),
                serial: AtomicU32::new(1),
                clock,
                events: tx,
                cleanup: CleanupQueue::new(),
            }),
        };
        (ctx, rx)
    }

    pub fn lock(&self) -> &ProcessLock {
        &self.inner.lock
    }

    pub fn clock(&self) -> PresentationClock {
        self.inner.clock
    }

    /// Next protocol serial. Never returns 0.
    pub fn next_serial(&self) -> u32 {
        loop {
            let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }

    /// Post an event to the dispatch thread. Fails silently once the
    /// compositor state (the receiver) is gone.
    pub fn post(&self, event: BackendEvent) {
        if self.inner.events.send(event).is_err() {
            tracing::debug!("Backend event dropped: compositor state is gone");
        }
    }

    pub fn event_sender(&self) -> Sender<BackendEvent> {
        self.inner.events.clone()
    }

    pub fn cleanup(&self) -> &CleanupQueue {
        &self.inner.cleanup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_reentrant() {
        let lock = ProcessLock::new();
        let _a = lock.lock();
        let _b = lock.lock();
        assert!(lock.is_owned_by_current_thread());
    }

    #[test]
    fn test_lock_blocks_other_threads() {
        let (ctx, _rx) = CompositorContext::new();
        let guard = ctx.lock().lock();
        let other = ctx.clone();
        let acquired = std::thread::spawn(move || {
            other.lock().try_lock_for(Duration::from_millis(20)).is_some()
        })
        .join()
        .unwrap();
        assert!(!acquired);
        drop(guard);
        assert!(!ctx.lock().is_locked());
    }

    #[test]
    fn test_serials_skip_zero() {
        let (ctx, _rx) = CompositorContext::new();
        ctx.inner.serial.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(ctx.next_serial(), u32::MAX);
        assert_eq!(ctx.next_serial(), 1);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = PresentationClock::MONOTONIC;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
