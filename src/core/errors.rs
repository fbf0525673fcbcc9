//! Core error types

use thiserror::Error;

/// Interface whose resource must carry a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTarget {
    Surface,
    Subcompositor,
    Subsurface,
    XdgWmBase,
    XdgSurface,
    XdgToplevel,
    XdgPopup,
    XdgPositioner,
    LayerShell,
    LayerSurface,
    SessionLock,
    SessionLockSurface,
    Viewport,
    Viewporter,
    FractionalScale,
    ContentType,
    LinuxBufferParams,
    ScreencopyFrame,
    Shm,
    Pointer,
    DataDevice,
}

impl ErrorTarget {
    pub fn interface(&self) -> &'static str {
        match self {
            ErrorTarget::Surface => "wl_surface",
            ErrorTarget::Subcompositor => "wl_subcompositor",
            ErrorTarget::Subsurface => "wl_subsurface",
            ErrorTarget::XdgWmBase => "xdg_wm_base",
            ErrorTarget::XdgSurface => "xdg_surface",
            ErrorTarget::XdgToplevel => "xdg_toplevel",
            ErrorTarget::XdgPopup => "xdg_popup",
            ErrorTarget::XdgPositioner => "xdg_positioner",
            ErrorTarget::LayerShell => "zwlr_layer_shell_v1",
            ErrorTarget::LayerSurface => "zwlr_layer_surface_v1",
            ErrorTarget::SessionLock => "ext_session_lock_v1",
            ErrorTarget::SessionLockSurface => "ext_session_lock_surface_v1",
            ErrorTarget::Viewport => "wp_viewport",
            ErrorTarget::Viewporter => "wp_viewporter",
            ErrorTarget::FractionalScale => "wp_fractional_scale_manager_v1",
            ErrorTarget::ContentType => "wp_content_type_manager_v1",
            ErrorTarget::LinuxBufferParams => "zwp_linux_buffer_params_v1",
            ErrorTarget::ScreencopyFrame => "zwlr_screencopy_frame_v1",
            ErrorTarget::Shm => "wl_shm",
            ErrorTarget::Pointer => "wl_pointer",
            ErrorTarget::DataDevice => "wl_data_device",
        }
    }
}

/// A protocol violation by a client. The glue posts it on the resource
/// matching `target` and the client gets disconnected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}#{}: {}", .target.interface(), .code, .message)]
pub struct ProtocolError {
    pub target: ErrorTarget,
    pub code: u32,
    pub message: String,
}

impl ProtocolError {
    pub fn new(target: ErrorTarget, code: impl Into<u32>, message: impl Into<String>) -> Self {
        Self {
            target,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Core compositor errors
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Buffer import failed: {0}")]
    BufferImport(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("DMA-BUF feedback error: {0}")]
    Feedback(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Invalid surface ID: {0}")]
    InvalidSurfaceId(u32),

    #[error("Invalid output ID: {0}")]
    InvalidOutputId(u32),

    #[error("I/O error: {0}")]
    Io(String),
}

impl CoreError {
    pub fn state_error(msg: impl Into<String>) -> Self {
        Self::StateError(msg.into())
    }

    pub fn backend_error(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn io(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }

    /// The protocol error, if this is one.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            CoreError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
