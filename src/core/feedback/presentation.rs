//! `wp_presentation` feedback.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::core::output::OutputId;

bitflags! {
    /// `wp_presentation_feedback.kind`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PresentationFlags: u32 {
        const VSYNC = 0x1;
        const HW_CLOCK = 0x2;
        const HW_COMPLETION = 0x4;
        const ZERO_COPY = 0x8;
    }
}

/// Timing of one presented frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationInfo {
    /// Presentation time on the compositor's presentation clock
    pub time: Duration,
    /// Refresh interval in nanoseconds, 0 if unknown
    pub refresh_ns: u32,
    /// Output frame counter (MSC)
    pub seq: u64,
    pub flags: PresentationFlags,
}

impl PresentationInfo {
    pub fn tv_sec_hi(&self) -> u32 {
        (self.time.as_secs() >> 32) as u32
    }

    pub fn tv_sec_lo(&self) -> u32 {
        (self.time.as_secs() & 0xFFFF_FFFF) as u32
    }

    pub fn tv_nsec(&self) -> u32 {
        self.time.subsec_nanos()
    }

    pub fn seq_hi(&self) -> u32 {
        (self.seq >> 32) as u32
    }

    pub fn seq_lo(&self) -> u32 {
        (self.seq & 0xFFFF_FFFF) as u32
    }

    /// Milliseconds for `wl_callback.done`
    pub fn time_ms(&self) -> u32 {
        self.time.as_millis() as u32
    }
}

/// Receiver of one feedback object's events.
pub trait FeedbackSink: Send + Sync {
    /// Sent for every `wl_output` the client bound for `output`
    fn sync_output(&self, output: OutputId);
    fn presented(&self, info: &PresentationInfo);
    fn discarded(&self);
}

/// A presentation feedback request.
///
/// Consumed by `present` or `discard`. Dropping it unconsumed sends
/// `discarded`, so every feedback gets exactly one terminal event.
pub struct PresentationFeedback {
    sink: Option<Box<dyn FeedbackSink>>,
}

impl PresentationFeedback {
    pub fn new(sink: impl FeedbackSink + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    pub fn present(mut self, output: OutputId, info: &PresentationInfo) {
        if let Some(sink) = self.sink.take() {
            sink.sync_output(output);
            sink.presented(info);
        }
    }

    pub fn discard(mut self) {
        if let Some(sink) = self.sink.take() {
            sink.discarded();
        }
    }
}

impl Drop for PresentationFeedback {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.discarded();
        }
    }
}

impl std::fmt::Debug for PresentationFeedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentationFeedback")
            .field("pending", &self.sink.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackEvent {
    SyncOutput(OutputId),
    Presented(PresentationInfo),
    Discarded,
}

/// Test double that records feedback events.
#[derive(Clone, Default)]
pub struct RecordingFeedback {
    events: Arc<Mutex<Vec<FeedbackEvent>>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feedback(&self) -> PresentationFeedback {
        PresentationFeedback::new(self.clone())
    }

    pub fn events(&self) -> Vec<FeedbackEvent> {
        self.events.lock().clone()
    }

    pub fn was_presented(&self) -> bool {
        self.events().iter().any(|e| matches!(e, FeedbackEvent::Presented(_)))
    }

    pub fn was_discarded(&self) -> bool {
        self.events().contains(&FeedbackEvent::Discarded)
    }
}

impl FeedbackSink for RecordingFeedback {
    fn sync_output(&self, output: OutputId) {
        self.events.lock().push(FeedbackEvent::SyncOutput(output));
    }

    fn presented(&self, info: &PresentationInfo) {
        self.events.lock().push(FeedbackEvent::Presented(*info));
    }

    fn discarded(&self) {
        self.events.lock().push(FeedbackEvent::Discarded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_terminal_event_once() {
        let rec = RecordingFeedback::new();
        let info = PresentationInfo {
            time: Duration::new(5, 10),
            refresh_ns: 16_666_666,
            seq: 3,
            flags: PresentationFlags::VSYNC,
        };
        rec.feedback().present(7, &info);
        assert_eq!(
            rec.events(),
            vec![FeedbackEvent::SyncOutput(7), FeedbackEvent::Presented(info)]
        );
    }

    #[test]
    fn test_dropped_feedback_is_discarded() {
        let rec = RecordingFeedback::new();
        drop(rec.feedback());
        assert_eq!(rec.events(), vec![FeedbackEvent::Discarded]);
    }

    #[test]
    fn test_split_timestamps() {
        let info = PresentationInfo {
            time: Duration::new((1u64 << 32) + 4, 99),
            seq: (2u64 << 32) | 9,
            ..Default::default()
        };
        assert_eq!((info.tv_sec_hi(), info.tv_sec_lo(), info.tv_nsec()), (1, 4, 99));
        assert_eq!((info.seq_hi(), info.seq_lo()), (2, 9));
    }
}
