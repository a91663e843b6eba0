use gamegraph_protocol::{Game, Node, NodeId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn center(&self) -> Position {
        Position {
            x: self.width / 2.0,
            y: self.height / 2.0,
        }
    }
}

/// On-canvas coordinates kept outside the store, so dragging does not churn state.
/// Positions are written back with [`NodeLayout::apply_to`] when nodes are saved.
#[derive(Debug, Clone, Default)]
pub struct NodeLayout {
    positions: HashMap<NodeId, Position>,
}

impl NodeLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every tracked position with the coordinates stored on the game's nodes.
    pub fn sync_from(&mut self, game: &Game) {
        self.positions = game
            .nodes
            .iter()
            .map(|n| (n.id.clone(), Position { x: n.x, y: n.y }))
            .collect();
    }

    pub fn position(&self, node_id: &str) -> Option<Position> {
        self.positions.get(node_id).copied()
    }

    pub fn move_node(&mut self, node_id: impl Into<NodeId>, to: Position) {
        self.positions.insert(node_id.into(), to);
    }

    pub fn remove(&mut self, node_id: &str) -> Option<Position> {
        self.positions.remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.positions.keys()
    }

    /// Translates all positions so the bounding box centre lands on the viewport centre.
    pub fn center_canvas(&mut self, viewport: Viewport) {
        let mut it = self.positions.values();
        let Some(first) = it.next() else {
            return;
        };
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for p in it {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        let target = viewport.center();
        let dx = target.x - (min_x + max_x) / 2.0;
        let dy = target.y - (min_y + max_y) / 2.0;
        for p in self.positions.values_mut() {
            p.x += dx;
            p.y += dy;
        }
    }

    /// Copies the tracked position into `node`. Returns false when the node is untracked.
    pub fn apply_to(&self, node: &mut Node) -> bool {
        match self.positions.get(&node.id) {
            Some(p) => {
                node.x = p.x;
                node.y = p.y;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, x: f64, y: f64) -> Node {
        Node {
            id: id.into(),
            name: id.into(),
            x,
            y,
            subnodes: Vec::new(),
            information_levels: Vec::new(),
            editors: Vec::new(),
        }
    }

    fn game(nodes: Vec<Node>) -> Game {
        Game {
            id: "g".into(),
            title: "t".into(),
            image: None,
            nodes,
            users: Vec::new(),
        }
    }

    #[test]
    fn sync_move_and_apply() {
        let mut layout = NodeLayout::new();
        layout.sync_from(&game(vec![node("a", 1.0, 2.0), node("b", 3.0, 4.0)]));
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.position("a"), Some(Position { x: 1.0, y: 2.0 }));

        layout.move_node("a", Position { x: 10.0, y: 20.0 });
        let mut a = node("a", 1.0, 2.0);
        assert!(layout.apply_to(&mut a));
        assert_eq!((a.x, a.y), (10.0, 20.0));

        let mut stray = node("zzz", 7.0, 7.0);
        assert!(!layout.apply_to(&mut stray));
        assert_eq!((stray.x, stray.y), (7.0, 7.0));

        assert!(layout.remove("b").is_some());
        assert!(layout.position("b").is_none());
    }

    #[test]
    fn resync_drops_stale_positions() {
        let mut layout = NodeLayout::new();
        layout.move_node("old", Position::default());
        layout.sync_from(&game(vec![node("a", 0.0, 0.0)]));
        assert!(layout.position("old").is_none());
    }

    #[test]
    fn centering_moves_bounding_box_to_viewport_center() {
        let mut layout = NodeLayout::new();
        layout.sync_from(&game(vec![node("a", 0.0, 0.0), node("b", 100.0, 50.0)]));
        layout.center_canvas(Viewport {
            width: 800.0,
            height: 600.0,
        });
        assert_eq!(layout.position("a"), Some(Position { x: 350.0, y: 275.0 }));
        assert_eq!(layout.position("b"), Some(Position { x: 450.0, y: 325.0 }));
    }

    #[test]
    fn centering_an_empty_layout_is_a_no_op() {
        let mut layout = NodeLayout::new();
        layout.center_canvas(Viewport {
            width: 10.0,
            height: 10.0,
        });
        assert!(layout.is_empty());
    }
}
