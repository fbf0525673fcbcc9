//! Outputs and their repaint pipeline.

pub mod damage;
pub mod exclusive_zone;
pub mod paint;
pub mod scheduler;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use wayland_server::backend::GlobalId;

use crate::core::backend::BackendOutput;
use crate::core::errors::{CoreError, Result};
use crate::core::feedback::queue::FrameQueue;
use crate::core::feedback::screencopy::ScreencopyRequest;
use crate::core::surface::transform::Transform;
use crate::util::geometry::{Point, Rect, Size};
use crate::util::logging::OUTPUT;
use crate::util::region::Region;
use crate::wlog;

pub use damage::{FrameDamage, OutputDamage};
pub use exclusive_zone::{available_area, Anchor, Edge, ExclusiveZone};
pub use paint::{FrameReport, ScenePainter};
pub use scheduler::{RepaintScheduler, RepaintState};

pub type OutputId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    /// Physical size in pixels
    pub size: Size,
    pub refresh_mhz: u32,
    pub preferred: bool,
}

impl OutputMode {
    pub fn refresh_ns(&self) -> u32 {
        if self.refresh_mhz == 0 {
            0
        } else {
            (1_000_000_000_000u64 / self.refresh_mhz as u64) as u32
        }
    }
}

/// Static description of an output as enumerated by the backend.
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub name: String,
    pub description: String,
    pub make: String,
    pub model: String,
    pub physical_size_mm: Size,
    pub modes: Vec<OutputMode>,
    pub current_mode: usize,
    pub scale: i32,
    pub transform: Transform,
}

impl OutputInfo {
    pub fn mode(&self) -> Option<&OutputMode> {
        self.modes.get(self.current_mode)
    }
}

/// Placement of an output in the global (logical) layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputGeometry {
    pub position: Point,
    /// Current mode size in physical pixels, untransformed
    pub mode_size: Size,
    pub scale: i32,
    pub transform: Transform,
}

impl OutputGeometry {
    pub fn logical_size(&self) -> Size {
        let s = self.scale.max(1);
        let t = self.transform.transform_size(self.mode_size);
        Size::new(t.width / s, t.height / s)
    }

    /// Global logical rect
    pub fn rect(&self) -> Rect {
        Rect::from_loc_size(self.position, self.logical_size())
    }

    /// Output-local physical rect covering the whole framebuffer
    pub fn local_rect(&self) -> Rect {
        Rect::from_loc_size(Point::default(), self.mode_size)
    }

    /// Map a global logical rect into output-local physical pixels.
    pub fn to_local_physical(&self, global: Rect) -> Rect {
        let s = self.scale.max(1);
        let r = global.translate(-self.position.x, -self.position.y);
        let scaled = Rect::new(r.x * s, r.y * s, r.width * s, r.height * s);
        self.transform
            .invert()
            .transform_rect(scaled, self.transform.transform_size(self.mode_size))
    }

    pub fn region_to_local_physical(&self, global: &Region) -> Region {
        let clip = self.rect();
        let mut out = Region::new();
        for rect in global.intersect_rect(&clip).rects() {
            out.add(self.to_local_physical(*rect));
        }
        out
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// Output state shared between the dispatch thread and the render thread.
pub struct OutputShared {
    pub id: OutputId,
    pub scheduler: RepaintScheduler,
    pub damage: Mutex<OutputDamage>,
    pub frames: Mutex<FrameQueue>,
    pub screencopy: Mutex<Vec<ScreencopyRequest>>,
    geometry: RwLock<OutputGeometry>,
    refresh_ns: AtomicU32,
}

impl OutputShared {
    pub fn new(id: OutputId, geometry: OutputGeometry, image_count: usize, refresh_ns: u32) -> Self {
        Self {
            id,
            scheduler: RepaintScheduler::new(),
            damage: Mutex::new(OutputDamage::new(image_count)),
            frames: Mutex::new(FrameQueue::new()),
            screencopy: Mutex::new(Vec::new()),
            geometry: RwLock::new(geometry),
            refresh_ns: AtomicU32::new(refresh_ns),
        }
    }

    pub fn geometry(&self) -> OutputGeometry {
        *self.geometry.read()
    }

    pub fn set_geometry(&self, geometry: OutputGeometry) {
        *self.geometry.write() = geometry;
        self.damage.lock().damage_all();
    }

    pub fn refresh_ns(&self) -> u32 {
        self.refresh_ns.load(Ordering::Relaxed)
    }

    pub fn set_refresh_ns(&self, refresh_ns: u32) {
        self.refresh_ns.store(refresh_ns, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for OutputShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputShared")
            .field("id", &self.id)
            .field("state", &self.scheduler.state())
            .field("geometry", &self.geometry())
            .finish()
    }
}

// ============================================================================
// Output
// ============================================================================

/// An output owned by the compositor state.
pub struct Output {
    pub id: OutputId,
    pub info: OutputInfo,
    pub shared: Arc<OutputShared>,
    pub backend: Arc<dyn BackendOutput>,
    pub exclusive_zones: Vec<ExclusiveZone>,
    available: Rect,
    /// `wl_output` global, when advertised
    pub global: Option<GlobalId>,
}

impl Output {
    pub fn new(id: OutputId, info: OutputInfo, shared: Arc<OutputShared>, backend: Arc<dyn BackendOutput>) -> Self {
        let available = shared.geometry().rect();
        Self {
            id,
            info,
            shared,
            backend,
            exclusive_zones: Vec::new(),
            available,
            global: None,
        }
    }

    /// Geometry for an output described by `info` placed at `position`.
    pub fn initial_geometry(info: &OutputInfo, position: Point) -> OutputGeometry {
        OutputGeometry {
            position,
            mode_size: info.mode().map(|m| m.size).unwrap_or_default(),
            scale: info.scale.max(1),
            transform: info.transform,
        }
    }

    pub fn geometry(&self) -> OutputGeometry {
        self.shared.geometry()
    }

    /// Global logical rect
    pub fn rect(&self) -> Rect {
        self.shared.geometry().rect()
    }

    /// Output rect minus exclusive zones
    pub fn available_area(&self) -> Rect {
        self.available
    }

    /// Add global damage (logical coordinates).
    pub fn add_damage(&self, global: &Region) {
        let local = self.geometry().region_to_local_physical(global);
        if !local.is_empty() {
            self.shared.damage.lock().add(&local);
        }
    }

    pub fn damage_all(&self) {
        self.shared.damage.lock().damage_all();
    }

    /// Request a repaint, waking the backend only on the idle transition.
    pub fn schedule_repaint(&self) {
        if self.shared.scheduler.request_repaint() {
            wlog!(OUTPUT, "Output {} repaint requested", self.id);
            self.backend.repaint();
        }
    }

    /// Replace the exclusive zones. Returns true when the available area
    /// changed.
    pub fn update_exclusive_zones(&mut self, zones: Vec<ExclusiveZone>) -> bool {
        self.exclusive_zones = zones;
        let available = available_area(self.rect(), &self.exclusive_zones);
        let changed = available != self.available;
        self.available = available;
        if changed {
            wlog!(OUTPUT, "Output {} available area now {:?}", self.id, available);
        }
        changed
    }

    /// Switch to mode `index`.
    pub fn set_mode(&mut self, index: usize) -> Result<()> {
        let mode = *self
            .info
            .modes
            .get(index)
            .ok_or_else(|| CoreError::backend_error(format!("output {} has no mode {}", self.id, index)))?;
        self.backend.set_mode(index)?;
        self.info.current_mode = index;
        let mut geometry = self.geometry();
        geometry.mode_size = mode.size;
        self.shared.set_geometry(geometry);
        self.shared.set_refresh_ns(mode.refresh_ns());
        let zones = std::mem::take(&mut self.exclusive_zones);
        self.update_exclusive_zones(zones);
        self.schedule_repaint();
        Ok(())
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("name", &self.info.name)
            .field("rect", &self.rect())
            .field("available", &self.available)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(scale: i32, transform: Transform) -> OutputGeometry {
        OutputGeometry {
            position: Point::new(100, 0),
            mode_size: Size::new(200, 100),
            scale,
            transform,
        }
    }

    #[test]
    fn test_logical_size() {
        assert_eq!(geometry(2, Transform::Normal).logical_size(), Size::new(100, 50));
        assert_eq!(geometry(1, Transform::Rotate90).logical_size(), Size::new(100, 200));
    }

    #[test]
    fn test_global_to_local_physical() {
        let g = geometry(2, Transform::Normal);
        assert_eq!(g.to_local_physical(Rect::new(110, 10, 5, 5)), Rect::new(20, 20, 10, 10));
    }

    #[test]
    fn test_mode_switch_keeps_exclusive_zones() {
        let (mut state, _running) = crate::core::state::test_support::state();
        let id = *state.outputs.keys().next().unwrap();
        let output = state.outputs.get_mut(&id).unwrap();
        let panel = ExclusiveZone { surface: 1, layer: 2, edge: Some(Edge::Top), size: 30 };
        assert!(output.update_exclusive_zones(vec![panel]));
        assert_eq!(output.available_area(), Rect::new(0, 30, 640, 450));

        output.set_mode(0).unwrap();
        assert_eq!(output.exclusive_zones, vec![panel]);
        assert_eq!(output.available_area(), Rect::new(0, 30, 640, 450));
        assert!(output.set_mode(1).is_err());
    }

    #[test]
    fn test_region_clipped_to_output() {
        let g = geometry(1, Transform::Normal);
        let region = Region::from_rect(Rect::new(0, 0, 150, 10));
        let local = g.region_to_local_physical(&region);
        assert_eq!(local.bounds(), Rect::new(0, 0, 50, 10));
    }
}
