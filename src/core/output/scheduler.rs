//! Per-output repaint state machine.
//!
//! `Idle → PendingRepaint → Rendering → Idle`. Requests while a repaint is
//! pending are coalesced; a request while rendering marks the output dirty
//! so the frame's completion goes straight back to `PendingRepaint`.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepaintState {
    Idle,
    PendingRepaint,
    Rendering,
}

#[derive(Debug)]
struct SchedulerInner {
    state: RepaintState,
    dirty: bool,
    frame: u64,
}

#[derive(Debug)]
pub struct RepaintScheduler {
    inner: Mutex<SchedulerInner>,
}

impl RepaintScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                state: RepaintState::Idle,
                dirty: false,
                frame: 0,
            }),
        }
    }

    pub fn state(&self) -> RepaintState {
        self.inner.lock().state
    }

    /// Number of the last frame started
    pub fn frame(&self) -> u64 {
        self.inner.lock().frame
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Ask for a repaint. Returns true when the output was idle and the
    /// backend must be woken.
    pub fn request_repaint(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            RepaintState::Idle => {
                inner.state = RepaintState::PendingRepaint;
                true
            }
            RepaintState::PendingRepaint => false,
            RepaintState::Rendering => {
                inner.dirty = true;
                false
            }
        }
    }

    /// Start a frame if one is pending. Returns the new frame number.
    pub fn begin_frame(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.state != RepaintState::PendingRepaint {
            return None;
        }
        inner.state = RepaintState::Rendering;
        inner.dirty = false;
        inner.frame += 1;
        Some(inner.frame)
    }

    /// The frame left the pipeline (presented or dropped). Returns true if
    /// another repaint was requested meanwhile.
    pub fn finish_frame(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RepaintState::Rendering {
            return false;
        }
        if inner.dirty {
            inner.dirty = false;
            inner.state = RepaintState::PendingRepaint;
            true
        } else {
            inner.state = RepaintState::Idle;
            false
        }
    }
}

impl Default for RepaintScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_coalesce() {
        let sched = RepaintScheduler::new();
        assert!(sched.request_repaint());
        assert!(!sched.request_repaint());
        assert_eq!(sched.state(), RepaintState::PendingRepaint);
        assert_eq!(sched.begin_frame(), Some(1));
        assert_eq!(sched.begin_frame(), None);
        assert!(!sched.finish_frame());
        assert_eq!(sched.state(), RepaintState::Idle);
    }

    #[test]
    fn test_request_while_rendering_sets_dirty() {
        let sched = RepaintScheduler::new();
        sched.request_repaint();
        sched.begin_frame();
        assert!(!sched.request_repaint());
        assert!(sched.is_dirty());
        assert!(sched.finish_frame());
        assert_eq!(sched.state(), RepaintState::PendingRepaint);
        assert_eq!(sched.begin_frame(), Some(2));
    }
}
