//! Space reserved on output edges by layer surfaces.

use bitflags::bitflags;

use crate::core::surface::SurfaceId;
use crate::util::geometry::Rect;

bitflags! {
    /// `zwlr_layer_surface_v1.anchor`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Anchor: u32 {
        const TOP = 1;
        const BOTTOM = 2;
        const LEFT = 4;
        const RIGHT = 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

impl Edge {
    pub fn anchor(self) -> Anchor {
        match self {
            Edge::Top => Anchor::TOP,
            Edge::Bottom => Anchor::BOTTOM,
            Edge::Left => Anchor::LEFT,
            Edge::Right => Anchor::RIGHT,
        }
    }

    /// The edge a layer surface with `anchor` reserves space on, if any.
    ///
    /// Anchoring to one edge, or to one edge plus both perpendicular ones,
    /// picks that edge. `preferred` (set_exclusive_edge) wins when it is one
    /// of the anchored edges.
    pub fn from_anchor(anchor: Anchor, preferred: Option<Edge>) -> Option<Edge> {
        if let Some(edge) = preferred {
            if anchor.contains(edge.anchor()) {
                return Some(edge);
            }
        }
        let horizontal = Anchor::LEFT | Anchor::RIGHT;
        let vertical = Anchor::TOP | Anchor::BOTTOM;
        if anchor == Anchor::TOP || anchor == Anchor::TOP | horizontal {
            Some(Edge::Top)
        } else if anchor == Anchor::BOTTOM || anchor == Anchor::BOTTOM | horizontal {
            Some(Edge::Bottom)
        } else if anchor == Anchor::LEFT || anchor == Anchor::LEFT | vertical {
            Some(Edge::Left)
        } else if anchor == Anchor::RIGHT || anchor == Anchor::RIGHT | vertical {
            Some(Edge::Right)
        } else {
            None
        }
    }
}

/// A reservation made by one layer surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusiveZone {
    pub surface: SurfaceId,
    /// Layer index (background = 0 ... overlay = 3); lower layers reserve first
    pub layer: u32,
    pub edge: Option<Edge>,
    /// > 0 reserves, 0 respects other zones, -1 ignores them
    pub size: i32,
}

impl ExclusiveZone {
    pub fn reserves(&self) -> bool {
        self.size > 0 && self.edge.is_some()
    }
}

/// Shrink `output` by every reserving zone, lower layers first.
pub fn available_area(output: Rect, zones: &[ExclusiveZone]) -> Rect {
    let mut ordered: Vec<&ExclusiveZone> = zones.iter().filter(|z| z.reserves()).collect();
    ordered.sort_by_key(|z| z.layer);

    let mut usable = output;
    for zone in ordered {
        let size = zone.size;
        match zone.edge {
            Some(Edge::Top) => {
                usable.y += size;
                usable.height = (usable.height - size).max(0);
            }
            Some(Edge::Bottom) => {
                usable.height = (usable.height - size).max(0);
            }
            Some(Edge::Left) => {
                usable.x += size;
                usable.width = (usable.width - size).max(0);
            }
            Some(Edge::Right) => {
                usable.width = (usable.width - size).max(0);
            }
            None => {}
        }
    }
    usable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_from_anchor() {
        assert_eq!(Edge::from_anchor(Anchor::TOP | Anchor::LEFT | Anchor::RIGHT, None), Some(Edge::Top));
        assert_eq!(Edge::from_anchor(Anchor::TOP | Anchor::LEFT, None), None);
        assert_eq!(
            Edge::from_anchor(Anchor::TOP | Anchor::LEFT, Some(Edge::Left)),
            Some(Edge::Left)
        );
        assert_eq!(Edge::from_anchor(Anchor::all(), None), None);
    }

    #[test]
    fn test_panels_shrink_available_area() {
        let output = Rect::new(0, 0, 1920, 1080);
        let zones = [
            ExclusiveZone { surface: 1, layer: 2, edge: Some(Edge::Top), size: 30 },
            ExclusiveZone { surface: 2, layer: 2, edge: Some(Edge::Left), size: 50 },
            ExclusiveZone { surface: 3, layer: 2, edge: Some(Edge::Bottom), size: 0 },
        ];
        assert_eq!(available_area(output, &zones), Rect::new(50, 30, 1870, 1050));
    }
}
