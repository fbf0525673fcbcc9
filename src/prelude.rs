//! Common imports and types used throughout Vitrine.

pub use std::sync::Arc;
pub use std::collections::HashMap;
pub use parking_lot::{Mutex, RwLock};

pub use crate::core::errors::{CoreError, ErrorTarget, ProtocolError};
pub use crate::core::surface::SurfaceId;
pub use crate::core::output::OutputId;
pub use crate::util::geometry::{Point, Rect, RectF, Size};
pub use crate::util::region::Region;

pub type Result<T> = std::result::Result<T, crate::core::errors::CoreError>;
