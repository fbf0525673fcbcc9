pub mod surface;
pub mod buffer;
pub mod shm;
pub mod state;
pub mod commit;
pub mod damage;
pub mod transform;
pub mod viewport;

pub use surface::Surface;
pub use buffer::{Buffer, BufferBinding, BufferId, BufferType, DmaBufData, DmaBufPlane, ShmBufferData};
pub use state::{BufferAttach, ContentType, CurrentState, SurfaceState};
pub use damage::Damage;
pub use transform::Transform;
pub use viewport::{SurfaceGeometry, ViewportState};

pub type SurfaceId = u32;

#[cfg(test)]
pub mod tests;
