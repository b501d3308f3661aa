//! Lazy traversal of the shape graph.

use std::collections::HashSet;

use super::brep::{EntityStore, Node, Orientation, Shape, ShapeKind};

/// Depth-first walk yielding every distinct sub-shape of one kind.
///
/// Orientations compose down the graph; a node reached twice is reported once,
/// with the orientation of its first visit.
pub struct Explorer<'a> {
    store: &'a EntityStore,
    root: Shape,
    kind: ShapeKind,
    stack: Vec<Shape>,
    seen: HashSet<Node>,
}

impl<'a> Explorer<'a> {
    pub fn new(store: &'a EntityStore, root: Shape, kind: ShapeKind) -> Self {
        Self {
            store,
            root,
            kind,
            stack: vec![root],
            seen: HashSet::new(),
        }
    }

    pub fn restart(&mut self) {
        self.stack.clear();
        self.stack.push(self.root);
        self.seen.clear();
    }

    fn push_children(&mut self, shape: Shape) {
        let o = shape.orientation;
        let store = self.store;
        let mut children: Vec<Shape> = Vec::new();
        match shape.node {
            Node::Compound(id) => {
                if let Some(c) = store.compounds.get(id) {
                    children.extend(c.children.iter().map(|s| s.composed(o)));
                }
            }
            Node::Solid(id) => {
                if let Some(s) = store.solids.get(id) {
                    children.extend(s.shells.iter().map(|sh| Shape::oriented(Node::Shell(*sh), o)));
                }
            }
            Node::Shell(id) => {
                if let Some(s) = store.shells.get(id) {
                    children.extend(s.faces.iter().map(|f| f.composed(o)));
                }
            }
            Node::Face(id) => {
                if let Some(f) = store.faces.get(id) {
                    children.extend(f.loops().map(|l| Shape::oriented(Node::Wire(l), o)));
                }
            }
            Node::Wire(id) => {
                if let Some(l) = store.loops.get(id) {
                    for he in &l.half_edges {
                        if let Some(h) = store.half_edges.get(*he) {
                            children.push(Shape::oriented(
                                Node::Edge(h.edge),
                                o.compose(Orientation::from_forward(h.forward)),
                            ));
                        }
                    }
                }
            }
            Node::Edge(id) => {
                if let Some(e) = store.edges.get(id) {
                    children.push(Shape::oriented(Node::Vertex(e.start_vertex), o));
                    children.push(Shape::oriented(Node::Vertex(e.end_vertex), o.reversed()));
                }
            }
            Node::Vertex(_) => {}
        }
        // reversed so the first child is visited first
        self.stack.extend(children.into_iter().rev());
    }
}

impl Iterator for Explorer<'_> {
    type Item = Shape;

    fn next(&mut self) -> Option<Shape> {
        while let Some(shape) = self.stack.pop() {
            let kind = shape.kind();
            if kind == self.kind {
                if self.seen.insert(shape.node) {
                    return Some(shape);
                }
                continue;
            }
            // nothing of a higher kind lives below this node
            if kind > self.kind {
                continue;
            }
            if self.seen.insert(shape.node) {
                self.push_children(shape);
            }
        }
        None
    }
}

/// Collects distinct sub-shapes of `kind`.
pub fn sub_shapes(store: &EntityStore, root: &Shape, kind: ShapeKind) -> Vec<Shape> {
    Explorer::new(store, *root, kind).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point3d;
    use crate::topology::primitives::{make_box, make_compound};

    #[test]
    fn test_box_counts() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        assert_eq!(Explorer::new(&store, b, ShapeKind::Face).count(), 6);
        assert_eq!(Explorer::new(&store, b, ShapeKind::Edge).count(), 12);
        assert_eq!(Explorer::new(&store, b, ShapeKind::Vertex).count(), 8);
        assert_eq!(Explorer::new(&store, b, ShapeKind::Solid).count(), 1);
    }

    #[test]
    fn test_restart_replays_sequence() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 2.0, 3.0));
        let mut ex = Explorer::new(&store, b, ShapeKind::Edge);
        let first: Vec<Shape> = ex.by_ref().collect();
        assert!(ex.next().is_none());
        ex.restart();
        let second: Vec<Shape> = ex.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_shared_children_reported_once() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let c = make_compound(&mut store, vec![b, b.reversed()]);
        assert_eq!(Explorer::new(&store, c, ShapeKind::Face).count(), 6);
        // the first visit is forward
        for f in Explorer::new(&store, c, ShapeKind::Face) {
            assert!(f.orientation.is_forward());
        }
    }

    #[test]
    fn test_reversed_root_flips_faces() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        for f in Explorer::new(&store, b.reversed(), ShapeKind::Face) {
            assert!(!f.orientation.is_forward());
        }
    }
}
