//! Staging and unstable extensions: session lock, viewporter, fractional
//! scale, content type, presentation time and linux-dmabuf.

pub mod content_type;
pub mod fractional_scale;
pub mod linux_dmabuf;
pub mod presentation_time;
pub mod session_lock;
pub mod viewporter;
