//! Bounding volume hierarchy over element boxes, used to find candidate pairs.

use crate::geometry::transform::BoundingBox;

const LEAF_SIZE: usize = 4;
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
enum Node {
    Leaf { bbox: BoundingBox, items: Vec<(usize, BoundingBox)> },
    Inner { bbox: BoundingBox, left: Box<Node>, right: Box<Node> },
}

impl Node {
    fn bbox(&self) -> &BoundingBox {
        match self {
            Node::Leaf { bbox, .. } | Node::Inner { bbox, .. } => bbox,
        }
    }
}

/// Median-split hierarchy; items are caller indices.
#[derive(Debug, Clone)]
pub struct Bvh {
    root: Option<Node>,
}

fn union_of(items: &[(usize, BoundingBox)]) -> BoundingBox {
    items.iter().fold(BoundingBox::empty(), |acc, (_, b)| acc.union(b))
}

fn build(mut items: Vec<(usize, BoundingBox)>, depth: usize) -> Node {
    let bbox = union_of(&items);
    if items.len() <= LEAF_SIZE || depth >= MAX_DEPTH {
        return Node::Leaf { bbox, items };
    }
    let axis = bbox.longest_axis();
    items.sort_by(|(_, a), (_, b)| a.center_on_axis(axis).total_cmp(&b.center_on_axis(axis)));
    let right = items.split_off(items.len() / 2);
    Node::Inner {
        bbox,
        left: Box::new(build(items, depth + 1)),
        right: Box::new(build(right, depth + 1)),
    }
}

impl Bvh {
    pub fn build(items: Vec<(usize, BoundingBox)>) -> Self {
        let items: Vec<_> = items.into_iter().filter(|(_, b)| b.is_valid()).collect();
        if items.is_empty() {
            return Self { root: None };
        }
        Self { root: Some(build(items, 0)) }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Indices of items whose box overlaps `query`, ascending.
    pub fn query(&self, query: &BoundingBox) -> Vec<usize> {
        let mut out = Vec::new();
        let Some(root) = &self.root else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !node.bbox().intersects(query) {
                continue;
            }
            match node {
                Node::Leaf { items, .. } => out.extend(items.iter().filter(|(_, b)| b.intersects(query)).map(|(i, _)| *i)),
                Node::Inner { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        out.sort_unstable();
        out
    }
}
