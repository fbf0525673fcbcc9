//! xdg-shell: `xdg_wm_base`, `xdg_positioner`, `xdg_surface`,
//! `xdg_toplevel` and `xdg_popup`.

pub mod xdg_popup;
pub mod xdg_positioner;
pub mod xdg_surface;
pub mod xdg_toplevel;
pub mod xdg_wm_base;

use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;

use crate::core::surface::SurfaceId;

/// User data of `xdg_surface`, `xdg_toplevel` and `xdg_popup`.
///
/// Errors the state reports against `xdg_wm_base` are posted on the
/// `wm_base` the object was created from.
#[derive(Debug, Clone)]
pub struct XdgSurfaceData {
    pub surface: SurfaceId,
    pub wm_base: XdgWmBase,
}
