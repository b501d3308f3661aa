//! What the pave phase hands to face splitting, classification and building.

use std::collections::{HashMap, HashSet};

use crate::topology::brep::{EdgeId, EntityStore, FaceId, VertexId};

/// Edges and vertices found inside one face.
#[derive(Debug, Clone, Default)]
pub struct FaceInfo {
    /// Split edges of the other operand lying in the face interior.
    pub on_edges: Vec<EdgeId>,
    /// Section edges crossing the face.
    pub section_edges: Vec<EdgeId>,
    /// Vertices of the other operand, or new ones, lying in the face interior.
    pub in_vertices: Vec<VertexId>,
}

impl FaceInfo {
    pub fn is_empty(&self) -> bool {
        self.on_edges.is_empty() && self.section_edges.is_empty()
    }

    pub fn interior_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.section_edges.iter().chain(&self.on_edges).copied()
    }
}

/// Split state of the operands after the pave phase.
#[derive(Debug, Clone, Default)]
pub struct SplitData {
    /// Ordered pieces of every changed edge with their sense relative to it.
    pub edge_images: HashMap<EdgeId, Vec<(EdgeId, bool)>>,
    /// Result edge to the original edge whose curve parametrisation it shares.
    pub carrier_origin: HashMap<EdgeId, EdgeId>,
    pub face_info: HashMap<FaceId, FaceInfo>,
    pub section_edges: Vec<EdgeId>,
    pub common_edges: Vec<EdgeId>,
    pub on_edges: Vec<EdgeId>,
    pub touch_vertices: Vec<VertexId>,
    pub same_domain: Vec<(FaceId, FaceId)>,
    /// Faces rebuilt by face splitting, keyed by the face they replace.
    pub face_images: HashMap<FaceId, Vec<FaceId>>,
}

impl SplitData {
    /// Pieces of `edge` in its parameter order; the edge itself when it was not split.
    pub fn image_of(&self, edge: EdgeId) -> Vec<(EdgeId, bool)> {
        self.edge_images.get(&edge).cloned().unwrap_or_else(|| vec![(edge, true)])
    }

    /// Faces standing for `face` after splitting; the face itself when it was kept.
    pub fn face_image_of(&self, face: FaceId) -> Vec<FaceId> {
        self.face_images.get(&face).cloned().unwrap_or_else(|| vec![face])
    }

    /// The face needs re-wiring: a boundary edge changed or something lies inside it.
    pub fn face_changed(&self, store: &EntityStore, face: FaceId) -> bool {
        if self.face_info.get(&face).is_some_and(|i| !i.is_empty()) {
            return true;
        }
        store.faces[face].loops().any(|lp| {
            store.loops[lp].half_edges.iter().any(|he| {
                let e = store.half_edges[*he].edge;
                self.edge_images.get(&e).is_some_and(|img| img.len() != 1 || img[0] != (e, true))
            })
        })
    }

    /// Faces of another operand lying on the same surface as `face`.
    pub fn same_domain_partners(&self, face: FaceId) -> Vec<FaceId> {
        self.same_domain
            .iter()
            .filter_map(|&(a, b)| {
                if a == face {
                    Some(b)
                } else if b == face {
                    Some(a)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Edges lying in more than one operand: section, common and on-face edges.
    pub fn intersection_edges(&self) -> Vec<EdgeId> {
        let mut seen = HashSet::new();
        self.section_edges
            .iter()
            .chain(&self.common_edges)
            .chain(&self.on_edges)
            .copied()
            .filter(|e| seen.insert(*e))
            .collect()
    }
}
