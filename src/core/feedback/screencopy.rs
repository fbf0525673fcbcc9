//! Output capture requests (wlr-screencopy semantics).

use std::sync::Arc;

use crate::core::output::OutputId;
use crate::core::render::renderer::WL_SHM_FORMAT_XRGB8888;
use crate::core::surface::buffer::{Buffer, BufferType};
use crate::util::geometry::{Rect, Size};
use crate::util::region::Region;

use super::presentation::PresentationInfo;

/// Buffer a client must provide for a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyConstraints {
    /// `wl_shm` format
    pub format: u32,
    pub size: Size,
    pub stride: u32,
}

impl CopyConstraints {
    pub fn for_region(region: Rect) -> Self {
        Self {
            format: WL_SHM_FORMAT_XRGB8888,
            size: region.size(),
            stride: region.width.max(0) as u32 * 4,
        }
    }

    pub fn accepts(&self, buffer: &BufferType) -> bool {
        match buffer {
            BufferType::Shm(shm) => {
                shm.format == self.format
                    && shm.width == self.size.width
                    && shm.height == self.size.height
                    && shm.stride as u32 >= self.stride
            }
            BufferType::DmaBuf(_) => false,
        }
    }
}

/// Outcome of a completed capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    pub info: PresentationInfo,
    /// Damage since the previous capture, relative to the captured region
    pub damage: Region,
}

pub trait ScreencopySink: Send + Sync {
    fn ready(&self, result: &CopyResult);
    fn failed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    /// Constraints sent, waiting for the client's buffer
    Created,
    /// Buffer received, waiting for a frame
    Armed { with_damage: bool },
    /// Copied during a frame, waiting for its presentation
    Copied { frame: u64 },
    /// The renderer could not copy into the buffer
    Failed,
}

/// A single capture. `complete` or `fail` consumes it; dropping it
/// unconsumed reports `failed`.
pub struct ScreencopyRequest {
    pub output: OutputId,
    /// Output-local region in physical pixels
    pub region: Rect,
    pub constraints: CopyConstraints,
    state: CopyState,
    buffer: Option<Arc<Buffer>>,
    damage: Region,
    sink: Option<Box<dyn ScreencopySink>>,
}

impl ScreencopyRequest {
    pub fn new(output: OutputId, region: Rect, sink: impl ScreencopySink + 'static) -> Self {
        Self {
            output,
            region,
            constraints: CopyConstraints::for_region(region),
            state: CopyState::Created,
            buffer: None,
            damage: Region::new(),
            sink: Some(Box::new(sink)),
        }
    }

    pub fn state(&self) -> CopyState {
        self.state
    }

    /// Attach the destination buffer. Returns false (and the request must
    /// be failed) when the buffer does not match the constraints.
    pub fn arm(&mut self, buffer: Arc<Buffer>, with_damage: bool) -> bool {
        if self.state != CopyState::Created || !self.constraints.accepts(&buffer.buffer_type) {
            return false;
        }
        self.buffer = Some(buffer);
        self.state = CopyState::Armed { with_damage };
        true
    }

    /// Whether a frame with `frame_damage` (output-local) should be copied.
    pub fn wants_frame(&self, frame_damage: &Region) -> bool {
        match self.state {
            CopyState::Armed { with_damage: false } => true,
            CopyState::Armed { with_damage: true } => frame_damage.intersects_rect(&self.region),
            _ => false,
        }
    }

    pub fn buffer(&self) -> Option<&Arc<Buffer>> {
        self.buffer.as_ref()
    }

    /// The copy was recorded into frame `frame`.
    pub fn mark_copied(&mut self, frame: u64, frame_damage: &Region) {
        self.damage = frame_damage
            .intersect_rect(&self.region)
            .translated(-self.region.x, -self.region.y);
        self.state = CopyState::Copied { frame };
    }

    pub fn mark_failed(&mut self) {
        self.state = CopyState::Failed;
    }

    /// Whether the request reached a terminal state by frame `presented`.
    pub fn is_settled_by(&self, presented: u64) -> bool {
        match self.state {
            CopyState::Copied { frame } => frame <= presented,
            CopyState::Failed => true,
            _ => false,
        }
    }

    pub fn complete(mut self, info: &PresentationInfo) {
        if let Some(sink) = self.sink.take() {
            sink.ready(&CopyResult {
                info: *info,
                damage: std::mem::take(&mut self.damage),
            });
        }
    }

    pub fn fail(mut self) {
        if let Some(sink) = self.sink.take() {
            sink.failed();
        }
    }
}

impl Drop for ScreencopyRequest {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.failed();
        }
    }
}

impl std::fmt::Debug for ScreencopyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreencopyRequest")
            .field("output", &self.output)
            .field("region", &self.region)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Option<CopyResult>>>>);

    impl ScreencopySink for Recorder {
        fn ready(&self, result: &CopyResult) {
            self.0.lock().push(Some(result.clone()));
        }
        fn failed(&self) {
            self.0.lock().push(None);
        }
    }

    #[test]
    fn test_dropped_request_fails_once() {
        let rec = Recorder::default();
        drop(ScreencopyRequest::new(1, Rect::new(0, 0, 10, 10), rec.clone()));
        assert_eq!(*rec.0.lock(), vec![None]);
    }

    #[test]
    fn test_damage_is_region_relative() {
        let rec = Recorder::default();
        let mut req = ScreencopyRequest::new(1, Rect::new(100, 100, 50, 50), rec.clone());
        req.state = CopyState::Armed { with_damage: true };
        let damage = Region::from_rect(Rect::new(0, 0, 120, 120));
        assert!(req.wants_frame(&damage));
        req.mark_copied(3, &damage);
        req.complete(&PresentationInfo::default());
        let events = rec.0.lock();
        let result = events[0].as_ref().unwrap();
        assert_eq!(result.damage.bounds(), Rect::new(0, 0, 20, 20));
    }

    #[test]
    fn test_with_damage_waits_for_damage() {
        let rec = Recorder::default();
        let mut req = ScreencopyRequest::new(1, Rect::new(0, 0, 10, 10), rec);
        req.state = CopyState::Armed { with_damage: true };
        assert!(!req.wants_frame(&Region::from_rect(Rect::new(50, 50, 5, 5))));
    }
}
