use std::sync::Weak;

use parking_lot::RwLock;

use crate::core::surface::{Surface, SurfaceId};
use crate::util::geometry::{Point, Rect, Size};

/// Represents a node in the scene graph.
///
/// A node is either a container positioning its children (a surface tree
/// root, a layer band) or a leaf drawing one surface's content.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub id: u32,
    pub surface_id: Option<SurfaceId>,
    /// Leaf only; a destroyed surface no longer upgrades
    pub surface: Option<Weak<RwLock<Surface>>>,
    /// Position relative to the parent node
    pub position: Point,
    pub size: Size,
    pub visible: bool,
    /// Children bottom to top
    pub children: Vec<u32>,
}

impl SceneNode {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            surface_id: None,
            surface: None,
            position: Point::default(),
            size: Size::default(),
            visible: true,
            children: Vec::new(),
        }
    }

    pub fn with_surface(mut self, surface_id: SurfaceId, surface: Weak<RwLock<Surface>>) -> Self {
        self.surface_id = Some(surface_id);
        self.surface = Some(surface);
        self
    }

    pub fn set_position(&mut self, position: Point) {
        self.position = position;
    }

    pub fn set_size(&mut self, size: Size) {
        self.size = size;
    }

    /// Returns the absolute bounding box in scene coordinates
    pub fn bounding_box(&self, parent: Point) -> Rect {
        Rect::from_loc_size(parent + self.position, self.size)
    }
}
