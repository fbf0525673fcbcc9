//! Core Wayland protocol objects.

pub mod compositor;
pub mod output;
pub mod seat;
pub mod shm;
pub mod subcompositor;
