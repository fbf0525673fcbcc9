//! Per-output queue of frame callbacks and presentation feedback.
//!
//! Commits add to `queued`. When a frame starts rendering the queued items
//! move to that frame's in-flight list, and the frame's presentation (or
//! discard) releases them.

use std::collections::BTreeMap;

use crate::core::surface::SurfaceId;

use super::frame_callback::FrameCallback;
use super::presentation::PresentationFeedback;

#[derive(Debug)]
struct FrameItem {
    surface: SurfaceId,
    callbacks: Vec<FrameCallback>,
    feedbacks: Vec<PresentationFeedback>,
}

/// Everything tied to one frame.
#[derive(Debug, Default)]
pub struct FrameBatch {
    pub callbacks: Vec<FrameCallback>,
    pub feedbacks: Vec<PresentationFeedback>,
}

impl FrameBatch {
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.feedbacks.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct FrameQueue {
    queued: Vec<FrameItem>,
    in_flight: BTreeMap<u64, Vec<FrameItem>>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a commit's callbacks and feedback. Feedback from an earlier
    /// commit of the same surface that has not started rendering is
    /// superseded and discarded.
    pub fn enqueue(
        &mut self,
        surface: SurfaceId,
        callbacks: Vec<FrameCallback>,
        feedbacks: Vec<PresentationFeedback>,
    ) {
        if callbacks.is_empty() && feedbacks.is_empty() {
            return;
        }
        match self.queued.iter_mut().find(|item| item.surface == surface) {
            Some(item) => {
                item.callbacks.extend(callbacks);
                for old in std::mem::replace(&mut item.feedbacks, feedbacks) {
                    old.discard();
                }
            }
            None => self.queued.push(FrameItem {
                surface,
                callbacks,
                feedbacks,
            }),
        }
    }

    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    pub fn in_flight_frames(&self) -> usize {
        self.in_flight.len()
    }

    /// Frame `frame` started rendering: everything queued rides on it.
    pub fn begin_frame(&mut self, frame: u64) {
        if self.queued.is_empty() {
            return;
        }
        let items = std::mem::take(&mut self.queued);
        self.in_flight.entry(frame).or_default().extend(items);
    }

    /// Frame `frame` was presented. Earlier frames still in flight were
    /// superseded by it and are released together.
    pub fn take_presented(&mut self, frame: u64) -> FrameBatch {
        let later = self.in_flight.split_off(&frame.saturating_add(1));
        let done = std::mem::replace(&mut self.in_flight, later);
        let mut batch = FrameBatch::default();
        for item in done.into_values().flatten() {
            batch.callbacks.extend(item.callbacks);
            batch.feedbacks.extend(item.feedbacks);
        }
        batch
    }

    /// Frame `frame` never reached the screen. Its feedback is returned for
    /// discarding; its callbacks go back to the queue for the next frame.
    pub fn take_discarded(&mut self, frame: u64) -> Vec<PresentationFeedback> {
        let Some(items) = self.in_flight.remove(&frame) else {
            return Vec::new();
        };
        let mut feedbacks = Vec::new();
        for item in items {
            feedbacks.extend(item.feedbacks);
            self.enqueue(item.surface, item.callbacks, Vec::new());
        }
        feedbacks
    }

    /// Remove everything belonging to a destroyed surface.
    pub fn remove_surface(&mut self, surface: SurfaceId) {
        self.queued.retain(|item| item.surface != surface);
        for items in self.in_flight.values_mut() {
            items.retain(|item| item.surface != surface);
        }
    }

    /// Empty the queue, e.g. when the output goes away.
    pub fn drain(&mut self) -> FrameBatch {
        let mut batch = FrameBatch::default();
        let in_flight = std::mem::take(&mut self.in_flight);
        for item in self.queued.drain(..).chain(in_flight.into_values().flatten()) {
            batch.callbacks.extend(item.callbacks);
            batch.feedbacks.extend(item.feedbacks);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feedback::frame_callback::RecordingCallback;
    use crate::core::feedback::presentation::RecordingFeedback;

    #[test]
    fn test_superseded_feedback_is_discarded() {
        let mut queue = FrameQueue::new();
        let first = RecordingFeedback::new();
        let second = RecordingFeedback::new();
        queue.enqueue(1, Vec::new(), vec![first.feedback()]);
        queue.enqueue(1, Vec::new(), vec![second.feedback()]);
        assert!(first.was_discarded());
        assert!(second.events().is_empty());
    }

    #[test]
    fn test_items_follow_their_frame() {
        let mut queue = FrameQueue::new();
        let early = RecordingCallback::new();
        let late = RecordingCallback::new();
        queue.enqueue(1, vec![early.callback()], Vec::new());
        queue.begin_frame(1);
        queue.enqueue(2, vec![late.callback()], Vec::new());

        let batch = queue.take_presented(1);
        assert_eq!(batch.callbacks.len(), 1);
        for cb in batch.callbacks {
            cb.done(16);
        }
        assert_eq!(early.fired(), vec![16]);
        assert_eq!(late.count(), 0);
        assert!(queue.has_queued());
    }

    #[test]
    fn test_discarded_frame_requeues_callbacks() {
        let mut queue = FrameQueue::new();
        let cb = RecordingCallback::new();
        let fb = RecordingFeedback::new();
        queue.enqueue(4, vec![cb.callback()], vec![fb.feedback()]);
        queue.begin_frame(9);
        for feedback in queue.take_discarded(9) {
            feedback.discard();
        }
        assert!(fb.was_discarded());
        assert!(queue.has_queued());
        assert_eq!(queue.in_flight_frames(), 0);
    }
}
