//! `xdg_toplevel` role.

use bitflags::bitflags;

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::surface::SurfaceId;
use crate::util::geometry::{Rect, Size};

use super::xdg::XdgSurfaceState;
use super::{CommittedView, PendingView, RoleCommitOutcome, RoleHandler, RoleKind};

/// `xdg_toplevel` error codes
pub mod error {
    pub const INVALID_RESIZE_EDGE: u32 = 0;
    pub const INVALID_PARENT: u32 = 1;
    pub const INVALID_SIZE: u32 = 2;
}

bitflags! {
    /// Window states sent with a toplevel configure
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ToplevelStates: u32 {
        const MAXIMIZED = 1 << 0;
        const FULLSCREEN = 1 << 1;
        const RESIZING = 1 << 2;
        const ACTIVATED = 1 << 3;
        const TILED_LEFT = 1 << 4;
        const TILED_RIGHT = 1 << 5;
        const TILED_TOP = 1 << 6;
        const TILED_BOTTOM = 1 << 7;
        const SUSPENDED = 1 << 8;
    }
}

impl ToplevelStates {
    /// `xdg_toplevel.state` values as the wire array (native endian u32s)
    pub fn to_wire(self) -> Vec<u8> {
        // Flag bit n maps to protocol state n + 1
        self.iter()
            .map(|flag| flag.bits().trailing_zeros() + 1)
            .flat_map(|state| state.to_ne_bytes())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToplevelConfigure {
    /// 0x0 lets the client pick
    pub size: Size,
    pub states: ToplevelStates,
    pub bounds: Option<Size>,
}

#[derive(Debug, Clone)]
pub struct ToplevelRole {
    pub xdg: XdgSurfaceState<ToplevelConfigure>,
    pub title: String,
    pub app_id: String,
    pub parent: Option<SurfaceId>,
    pending_min: Size,
    pending_max: Size,
    pub min_size: Size,
    pub max_size: Size,
    /// Last configure the client acknowledged
    pub current: ToplevelConfigure,
    pub close_requested: bool,
    alive: bool,
}

impl ToplevelRole {
    pub fn new() -> Self {
        Self {
            xdg: XdgSurfaceState::new(),
            title: String::new(),
            app_id: String::new(),
            parent: None,
            pending_min: Size::default(),
            pending_max: Size::default(),
            min_size: Size::default(),
            max_size: Size::default(),
            current: ToplevelConfigure::default(),
            close_requested: false,
            alive: true,
        }
    }

    fn size_error(msg: String) -> ProtocolError {
        ProtocolError::new(ErrorTarget::XdgToplevel, error::INVALID_SIZE, msg)
    }

    pub fn set_min_size(&mut self, width: i32, height: i32) -> Result<(), ProtocolError> {
        if width < 0 || height < 0 {
            return Err(Self::size_error(format!("negative min size {}x{}", width, height)));
        }
        self.pending_min = Size::new(width, height);
        Ok(())
    }

    pub fn set_max_size(&mut self, width: i32, height: i32) -> Result<(), ProtocolError> {
        if width < 0 || height < 0 {
            return Err(Self::size_error(format!("negative max size {}x{}", width, height)));
        }
        self.pending_max = Size::new(width, height);
        Ok(())
    }

    pub fn ack_configure(&mut self, serial: u32) -> Result<(), ProtocolError> {
        self.current = self.xdg.ack_configure(serial)?;
        Ok(())
    }

    /// Clamp a compositor-chosen size to the committed min/max (0 = unset)
    pub fn clamp_size(&self, size: Size) -> Size {
        let clamp = |v: i32, min: i32, max: i32| {
            let v = if min > 0 { v.max(min) } else { v };
            if max > 0 {
                v.min(max)
            } else {
                v
            }
        };
        Size::new(
            clamp(size.width, self.min_size.width, self.max_size.width),
            clamp(size.height, self.min_size.height, self.max_size.height),
        )
    }

    pub fn window_geometry(&self) -> Rect {
        self.xdg.window_geometry()
    }

    pub fn is_mapped(&self) -> bool {
        self.xdg.is_mapped()
    }

    pub fn destroy(&mut self) {
        self.alive = false;
        self.xdg.reset();
    }
}

impl Default for ToplevelRole {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleHandler for ToplevelRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Toplevel
    }

    fn validate_commit(&self, pending: &PendingView) -> Result<(), ProtocolError> {
        let (min, max) = (self.pending_min, self.pending_max);
        if (max.width > 0 && max.width < min.width) || (max.height > 0 && max.height < min.height) {
            return Err(Self::size_error(format!(
                "max size {}x{} smaller than min size {}x{}",
                max.width, max.height, min.width, min.height
            )));
        }
        self.xdg.validate(pending)
    }

    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome {
        if !self.alive {
            return RoleCommitOutcome::default();
        }
        self.min_size = self.pending_min;
        self.max_size = self.pending_max;
        let (mapped, needs_configure) = self.xdg.commit(committed);
        RoleCommitOutcome {
            mapped,
            needs_configure,
            relayout: false,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::geometry::Point;

    fn pending() -> PendingView {
        PendingView {
            buffer_size: None,
            size: Size::default(),
            attaches: false,
        }
    }

    #[test]
    fn test_min_max_validation() {
        let mut role = ToplevelRole::new();
        role.set_min_size(200, 100).unwrap();
        role.set_max_size(100, 0).unwrap();
        let err = role.validate_commit(&pending()).unwrap_err();
        assert_eq!((err.target, err.code), (ErrorTarget::XdgToplevel, error::INVALID_SIZE));
        assert!(role.set_min_size(-1, 0).is_err());
        role.set_max_size(0, 0).unwrap();
        assert!(role.validate_commit(&pending()).is_ok());
    }

    #[test]
    fn test_min_max_double_buffered() {
        let mut role = ToplevelRole::new();
        role.set_min_size(50, 50).unwrap();
        assert_eq!(role.clamp_size(Size::new(10, 10)), Size::new(10, 10));
        role.handle_commit(&CommittedView {
            has_buffer: false,
            size: Size::default(),
            offset: Point::default(),
            bounds: Rect::default(),
            parent_mapped: false,
        });
        assert_eq!(role.clamp_size(Size::new(10, 10)), Size::new(50, 50));
    }

    #[test]
    fn test_states_wire() {
        let wire = (ToplevelStates::MAXIMIZED | ToplevelStates::ACTIVATED).to_wire();
        let values: Vec<u32> = wire
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![1, 4]);
    }
}
