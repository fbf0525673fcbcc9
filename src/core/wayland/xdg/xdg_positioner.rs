//! xdg_positioner: a mutable placement description copied into popups
//! when they are created or repositioned.

use parking_lot::Mutex;
use wayland_protocols::xdg::shell::server::xdg_positioner::{self, XdgPositioner};
use wayland_server::{Dispatch, DisplayHandle, Resource, WEnum};

use crate::core::role::Positioner;
use crate::core::state::CompositorState;
use crate::core::wayland::report;
use crate::util::geometry::{Point, Rect, Size};

/// Snapshot of the rules a positioner holds right now.
pub fn snapshot(positioner: &XdgPositioner) -> Positioner {
    positioner
        .data::<Mutex<Positioner>>()
        .map(|p| *p.lock())
        .unwrap_or_default()
}

fn raw<T: Into<u32>>(value: WEnum<T>) -> u32 {
    match value {
        WEnum::Value(v) => v.into(),
        WEnum::Unknown(raw) => raw,
    }
}

impl Dispatch<XdgPositioner, Mutex<Positioner>> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &XdgPositioner,
        request: xdg_positioner::Request,
        data: &Mutex<Positioner>,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let result = {
            let mut positioner = data.lock();
            match request {
                xdg_positioner::Request::SetSize { width, height } => positioner.set_size(width, height),
                xdg_positioner::Request::SetAnchorRect { x, y, width, height } => {
                    positioner.set_anchor_rect(Rect::new(x, y, width, height))
                }
                xdg_positioner::Request::SetAnchor { anchor } => positioner.set_anchor(raw(anchor)),
                xdg_positioner::Request::SetGravity { gravity } => positioner.set_gravity(raw(gravity)),
                xdg_positioner::Request::SetConstraintAdjustment { constraint_adjustment } => {
                    let bits = match constraint_adjustment {
                        WEnum::Value(v) => v.bits(),
                        WEnum::Unknown(raw) => raw,
                    };
                    positioner.set_constraint_adjustment(bits);
                    Ok(())
                }
                xdg_positioner::Request::SetOffset { x, y } => {
                    positioner.offset = Point::new(x, y);
                    Ok(())
                }
                xdg_positioner::Request::SetReactive => {
                    positioner.reactive = true;
                    Ok(())
                }
                xdg_positioner::Request::SetParentSize { parent_width, parent_height } => {
                    positioner.parent_size = Some(Size::new(parent_width, parent_height));
                    Ok(())
                }
                xdg_positioner::Request::SetParentConfigure { serial } => {
                    positioner.parent_configure = Some(serial);
                    Ok(())
                }
                _ => Ok(()),
            }
        };
        report(state, None, resource, result.map_err(Into::into));
    }
}
