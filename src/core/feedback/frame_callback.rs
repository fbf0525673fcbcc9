//! `wl_surface.frame` callbacks.

use std::sync::Arc;

use parking_lot::Mutex;

/// Receiver of a frame callback's single `done` event.
pub trait CallbackSink: Send + Sync {
    fn done(&self, time_ms: u32);
}

/// A frame callback. `done` consumes it, so it fires at most once.
pub struct FrameCallback {
    sink: Box<dyn CallbackSink>,
}

impl FrameCallback {
    pub fn new(sink: impl CallbackSink + 'static) -> Self {
        Self { sink: Box::new(sink) }
    }

    pub fn done(self, time_ms: u32) {
        self.sink.done(time_ms);
    }
}

impl std::fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameCallback")
    }
}

/// Test double that records every `done` time.
#[derive(Clone, Default)]
pub struct RecordingCallback {
    fired: Arc<Mutex<Vec<u32>>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> FrameCallback {
        FrameCallback::new(self.clone())
    }

    pub fn fired(&self) -> Vec<u32> {
        self.fired.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.fired.lock().len()
    }
}

impl CallbackSink for RecordingCallback {
    fn done(&self, time_ms: u32) {
        self.fired.lock().push(time_ms);
    }
}
