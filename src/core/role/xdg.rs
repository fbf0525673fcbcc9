//! State shared by xdg toplevels and popups.

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::util::geometry::Rect;
use crate::util::logging::ROLE;
use crate::wlog;

use super::configure::ConfigureQueue;
use super::{CommittedView, PendingView};

/// `xdg_surface` error codes
pub mod error {
    pub const NOT_CONSTRUCTED: u32 = 1;
    pub const ALREADY_CONSTRUCTED: u32 = 2;
    pub const UNCONFIGURED_BUFFER: u32 = 3;
    pub const INVALID_SERIAL: u32 = 4;
    pub const INVALID_SIZE: u32 = 5;
    pub const DEFUNCT_ROLE_OBJECT: u32 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XdgLifecycle {
    /// No configure acknowledged since the role was created or unmapped
    #[default]
    Unconfigured,
    /// Initial configure acknowledged, no buffer yet
    WaitingFirstBuffer,
    Mapped,
}

#[derive(Debug, Clone)]
pub struct XdgSurfaceState<C> {
    pub lifecycle: XdgLifecycle,
    pub configures: ConfigureQueue<C>,
    /// An initial configure was sent for the current map cycle
    pub initial_configure_sent: bool,
    pending_geometry: Option<Rect>,
    geometry: Option<Rect>,
    /// Effective window geometry, surface-local
    window_geometry: Rect,
}

impl<C: Clone> XdgSurfaceState<C> {
    pub fn new() -> Self {
        Self {
            lifecycle: XdgLifecycle::Unconfigured,
            configures: ConfigureQueue::new(),
            initial_configure_sent: false,
            pending_geometry: None,
            geometry: None,
            window_geometry: Rect::default(),
        }
    }

    pub fn set_window_geometry(&mut self, rect: Rect) -> Result<(), ProtocolError> {
        if rect.width <= 0 || rect.height <= 0 {
            return Err(ProtocolError::new(
                ErrorTarget::XdgSurface,
                error::INVALID_SIZE,
                format!("window geometry {}x{} is not positive", rect.width, rect.height),
            ));
        }
        self.pending_geometry = Some(rect);
        Ok(())
    }

    pub fn window_geometry(&self) -> Rect {
        self.window_geometry
    }

    pub fn send_configure(&mut self, serial: u32, configure: C) {
        self.configures.push(serial, configure);
        self.initial_configure_sent = true;
    }

    pub fn ack_configure(&mut self, serial: u32) -> Result<C, ProtocolError> {
        let configure = self.configures.ack(serial).ok_or_else(|| {
            ProtocolError::new(
                ErrorTarget::XdgSurface,
                error::INVALID_SERIAL,
                format!("serial {} was not sent or is superseded", serial),
            )
        })?;
        if self.lifecycle == XdgLifecycle::Unconfigured {
            self.lifecycle = XdgLifecycle::WaitingFirstBuffer;
        }
        Ok(configure)
    }

    pub fn is_mapped(&self) -> bool {
        self.lifecycle == XdgLifecycle::Mapped
    }

    pub fn validate(&self, pending: &PendingView) -> Result<(), ProtocolError> {
        if pending.has_buffer() && self.lifecycle == XdgLifecycle::Unconfigured {
            return Err(ProtocolError::new(
                ErrorTarget::XdgSurface,
                error::UNCONFIGURED_BUFFER,
                "buffer committed before the initial configure was acked",
            ));
        }
        Ok(())
    }

    /// Promote the window geometry and step the lifecycle. Returns
    /// (mapped, needs initial configure).
    pub fn commit(&mut self, committed: &CommittedView) -> (bool, bool) {
        self.geometry = self.pending_geometry;
        self.window_geometry = clamp_geometry(self.geometry, committed.bounds);

        if !committed.has_buffer {
            if self.lifecycle == XdgLifecycle::Mapped {
                wlog!(ROLE, "xdg surface unmapped, configure required again");
                self.reset();
            }
            return (false, !self.initial_configure_sent);
        }
        if self.lifecycle == XdgLifecycle::WaitingFirstBuffer {
            self.lifecycle = XdgLifecycle::Mapped;
        }
        (self.lifecycle == XdgLifecycle::Mapped, false)
    }

    /// Recompute the window geometry after a subsurface changed the bounds
    pub fn refresh_geometry(&mut self, bounds: Rect) -> bool {
        let geometry = clamp_geometry(self.geometry, bounds);
        let changed = geometry != self.window_geometry;
        self.window_geometry = geometry;
        changed
    }

    /// Back to the state of a freshly created role
    pub fn reset(&mut self) {
        self.lifecycle = XdgLifecycle::Unconfigured;
        self.initial_configure_sent = false;
        self.configures.clear();
    }
}

impl<C: Clone> Default for XdgSurfaceState<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Window geometry: the set geometry clipped to the surface bounds, or the
/// bounds when unset or disjoint.
pub fn clamp_geometry(set: Option<Rect>, bounds: Rect) -> Rect {
    match set {
        Some(rect) => rect.intersection(&bounds).unwrap_or(bounds),
        None => bounds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::geometry::{Point, Size};

    fn committed(has_buffer: bool) -> CommittedView {
        CommittedView {
            has_buffer,
            size: Size::new(100, 100),
            offset: Point::default(),
            bounds: Rect::new(0, 0, 100, 100),
            parent_mapped: false,
        }
    }

    fn pending(has_buffer: bool) -> PendingView {
        PendingView {
            buffer_size: has_buffer.then(|| Size::new(100, 100)),
            size: Size::new(100, 100),
            attaches: has_buffer,
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut xdg: XdgSurfaceState<()> = XdgSurfaceState::new();
        assert!(xdg.validate(&pending(true)).is_err());
        assert_eq!(xdg.commit(&committed(false)), (false, true));

        xdg.send_configure(5, ());
        assert_eq!(xdg.commit(&committed(false)), (false, false));
        xdg.ack_configure(5).unwrap();
        assert_eq!(xdg.lifecycle, XdgLifecycle::WaitingFirstBuffer);
        assert!(xdg.validate(&pending(true)).is_ok());
        assert_eq!(xdg.commit(&committed(true)), (true, false));

        // Null buffer unmaps and requires a new initial configure
        assert_eq!(xdg.commit(&committed(false)), (false, true));
        assert_eq!(xdg.lifecycle, XdgLifecycle::Unconfigured);
    }

    #[test]
    fn test_invalid_serial_keeps_state() {
        let mut xdg: XdgSurfaceState<()> = XdgSurfaceState::new();
        xdg.send_configure(3, ());
        let err = xdg.ack_configure(4).unwrap_err();
        assert_eq!(err.code, error::INVALID_SERIAL);
        assert_eq!(xdg.lifecycle, XdgLifecycle::Unconfigured);
    }

    #[test]
    fn test_geometry_clamp() {
        let bounds = Rect::new(0, 0, 100, 100);
        assert_eq!(clamp_geometry(None, bounds), bounds);
        assert_eq!(clamp_geometry(Some(Rect::new(10, 10, 200, 50)), bounds), Rect::new(10, 10, 90, 50));
        assert_eq!(clamp_geometry(Some(Rect::new(300, 300, 10, 10)), bounds), bounds);
    }

    #[test]
    fn test_window_geometry_double_buffered() {
        let mut xdg: XdgSurfaceState<()> = XdgSurfaceState::new();
        assert!(xdg.set_window_geometry(Rect::new(0, 0, 0, 10)).is_err());
        xdg.set_window_geometry(Rect::new(5, 5, 50, 50)).unwrap();
        assert_eq!(xdg.window_geometry(), Rect::default());
        xdg.commit(&committed(false));
        assert_eq!(xdg.window_geometry(), Rect::new(5, 5, 50, 50));
    }
}
