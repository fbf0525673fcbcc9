use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::core::render::node::SceneNode;
use crate::core::surface::{Surface, SurfaceId};
use crate::util::geometry::{Point, Rect};

/// Represents a flattened surface to be rendered.
#[derive(Debug, Clone)]
pub struct FlattenedSurface {
    pub surface_id: SurfaceId,
    pub surface: Arc<RwLock<Surface>>,
    /// Global logical rect
    pub rect: Rect,
}

/// Manages the scene graph shared with render threads.
///
/// Rebuilt by the dispatch thread under the process lock; render threads
/// flatten it under the same lock.
#[derive(Debug, Default)]
pub struct Scene {
    pub nodes: HashMap<u32, SceneNode>,
    pub root_id: Option<u32>,
    next_node_id: u32,
}

impl Scene {
    pub fn new() -> Self {
        let mut scene = Self {
            nodes: HashMap::new(),
            root_id: None,
            next_node_id: 1,
        };
        let root = scene.next_node_id();
        scene.add_node(SceneNode::new(root));
        scene.set_root(root);
        scene
    }

    /// Generate next scene node ID
    pub fn next_node_id(&mut self) -> u32 {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    pub fn set_root(&mut self, node_id: u32) {
        self.root_id = Some(node_id);
    }

    pub fn add_node(&mut self, node: SceneNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn remove_node(&mut self, node_id: u32) {
        // Remove from parent's children first
        for node in self.nodes.values_mut() {
            node.children.retain(|&id| id != node_id);
        }
        if let Some(node) = self.nodes.remove(&node_id) {
            for child in node.children {
                self.remove_node(child);
            }
        }
    }

    pub fn add_child(&mut self, parent_id: u32, child_id: u32) {
        if let Some(parent) = self.nodes.get_mut(&parent_id) {
            if !parent.children.contains(&child_id) {
                parent.children.push(child_id);
            }
        }
    }

    /// Add a leaf drawing `surface` under `parent`.
    pub fn add_surface_leaf(
        &mut self,
        parent_id: u32,
        surface_id: SurfaceId,
        surface: Weak<RwLock<Surface>>,
        rect_in_parent: Rect,
    ) -> u32 {
        let id = self.next_node_id();
        let mut node = SceneNode::new(id).with_surface(surface_id, surface);
        node.set_position(rect_in_parent.loc());
        node.set_size(rect_in_parent.size());
        self.add_node(node);
        self.add_child(parent_id, id);
        id
    }

    /// Add an empty container under `parent`.
    pub fn add_container(&mut self, parent_id: u32, position: Point) -> u32 {
        let id = self.next_node_id();
        let mut node = SceneNode::new(id);
        node.set_position(position);
        self.add_node(node);
        self.add_child(parent_id, id);
        id
    }

    /// Flattens the scene graph into a z-ordered (bottom first) list of
    /// surfaces that are still alive.
    pub fn flatten(&self) -> Vec<FlattenedSurface> {
        let mut result = Vec::new();
        if let Some(root_id) = self.root_id {
            self.flatten_recursive(root_id, Point::default(), &mut result);
        }
        result
    }

    fn flatten_recursive(&self, node_id: u32, parent: Point, result: &mut Vec<FlattenedSurface>) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        if !node.visible {
            return;
        }
        let abs = parent + node.position;

        if let (Some(surface_id), Some(weak)) = (node.surface_id, &node.surface) {
            if let Some(surface) = weak.upgrade() {
                result.push(FlattenedSurface {
                    surface_id,
                    surface,
                    rect: node.bounding_box(parent),
                });
            }
        }

        // Recurse into children (z-order is determined by child index)
        for &child_id in &node.children {
            self.flatten_recursive(child_id, abs, result);
        }
    }

    pub fn surface_count(&self) -> usize {
        self.nodes.values().filter(|n| n.surface_id.is_some()).count()
    }

    /// Dump the scene graph to a string for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Some(root_id) = self.root_id {
            self.dump_recursive(root_id, 0, &mut out);
        } else {
            out.push_str("(empty scene)\n");
        }
        out
    }

    fn dump_recursive(&self, node_id: u32, depth: usize, out: &mut String) {
        if let Some(node) = self.nodes.get(&node_id) {
            let indent = "  ".repeat(depth);
            out.push_str(&format!(
                "{}Node {}: pos=({},{}) size={}x{} surface={:?}\n",
                indent, node.id, node.position.x, node.position.y, node.size.width, node.size.height, node.surface_id
            ));

            for &child_id in &node.children {
                self.dump_recursive(child_id, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::geometry::Size;

    #[test]
    fn test_flatten_accumulates_positions_and_skips_dead() {
        let mut scene = Scene::new();
        let root = scene.root_id.unwrap();
        let alive = Arc::new(RwLock::new(Surface::new(1, None, None)));
        let dead = Arc::new(RwLock::new(Surface::new(2, None, None)));

        let tree = scene.add_container(root, Point::new(100, 50));
        scene.add_surface_leaf(tree, 1, Arc::downgrade(&alive), Rect::new(0, 0, 10, 10));
        scene.add_surface_leaf(tree, 2, Arc::downgrade(&dead), Rect::new(5, 5, 10, 10));
        drop(dead);

        let flat = scene.flatten();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].surface_id, 1);
        assert_eq!(flat[0].rect, Rect::from_loc_size(Point::new(100, 50), Size::new(10, 10)));
    }

    #[test]
    fn test_remove_node_drops_subtree() {
        let mut scene = Scene::new();
        let root = scene.root_id.unwrap();
        let tree = scene.add_container(root, Point::default());
        scene.add_container(tree, Point::default());
        scene.remove_node(tree);
        assert_eq!(scene.nodes.len(), 1);
    }
}
