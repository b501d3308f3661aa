use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use thiserror::Error;

use crate::geometry::curves::Curve;
use crate::geometry::curves2d::Curve2d;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::surfaces::Surface;
use crate::geometry::transform::BoundingBox;
use crate::geometry::vector::Vec3;

use super::explore::Explorer;

// ─── Entity Keys ─────────────────────────────────────────────────────────────

new_key_type! {
    pub struct VertexId;
    pub struct EdgeId;
    pub struct HalfEdgeId;
    pub struct LoopId;
    pub struct FaceId;
    pub struct ShellId;
    pub struct SolidId;
    pub struct CompoundId;
}

// ─── Shape handles ───────────────────────────────────────────────────────────

/// Kinds ordered from the top of the graph down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShapeKind {
    Compound,
    Solid,
    Shell,
    Face,
    Wire,
    Edge,
    Vertex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Forward,
    Reversed,
}

impl Orientation {
    pub fn reversed(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reversed,
            Orientation::Reversed => Orientation::Forward,
        }
    }

    /// Orientation of a child seen through a parent with orientation `self`.
    pub fn compose(self, child: Orientation) -> Self {
        match self {
            Orientation::Forward => child,
            Orientation::Reversed => child.reversed(),
        }
    }

    pub fn is_forward(self) -> bool {
        self == Orientation::Forward
    }

    pub fn sign(self) -> f64 {
        if self.is_forward() { 1.0 } else { -1.0 }
    }

    pub fn from_forward(forward: bool) -> Self {
        if forward { Orientation::Forward } else { Orientation::Reversed }
    }
}

/// A node of the shape graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Node {
    Vertex(VertexId),
    Edge(EdgeId),
    Wire(LoopId),
    Face(FaceId),
    Shell(ShellId),
    Solid(SolidId),
    Compound(CompoundId),
}

impl Node {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Node::Vertex(_) => ShapeKind::Vertex,
            Node::Edge(_) => ShapeKind::Edge,
            Node::Wire(_) => ShapeKind::Wire,
            Node::Face(_) => ShapeKind::Face,
            Node::Shell(_) => ShapeKind::Shell,
            Node::Solid(_) => ShapeKind::Solid,
            Node::Compound(_) => ShapeKind::Compound,
        }
    }
}

/// An oriented reference to a node. Two handles to the same node with
/// different orientations are the same shape used in opposite senses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub node: Node,
    pub orientation: Orientation,
}

impl Shape {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            orientation: Orientation::Forward,
        }
    }

    pub fn oriented(node: Node, orientation: Orientation) -> Self {
        Self { node, orientation }
    }

    pub fn vertex(id: VertexId) -> Self {
        Self::new(Node::Vertex(id))
    }

    pub fn edge(id: EdgeId) -> Self {
        Self::new(Node::Edge(id))
    }

    pub fn wire(id: LoopId) -> Self {
        Self::new(Node::Wire(id))
    }

    pub fn face(id: FaceId) -> Self {
        Self::new(Node::Face(id))
    }

    pub fn shell(id: ShellId) -> Self {
        Self::new(Node::Shell(id))
    }

    pub fn solid(id: SolidId) -> Self {
        Self::new(Node::Solid(id))
    }

    pub fn compound(id: CompoundId) -> Self {
        Self::new(Node::Compound(id))
    }

    pub fn kind(&self) -> ShapeKind {
        self.node.kind()
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn reversed(&self) -> Self {
        Self {
            node: self.node,
            orientation: self.orientation.reversed(),
        }
    }

    /// The same node seen through a parent orientation.
    pub fn composed(&self, parent: Orientation) -> Self {
        Self {
            node: self.node,
            orientation: parent.compose(self.orientation),
        }
    }

    pub fn as_face(&self) -> Option<FaceId> {
        match self.node {
            Node::Face(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<EdgeId> {
        match self.node {
            Node::Edge(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_vertex(&self) -> Option<VertexId> {
        match self.node {
            Node::Vertex(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_solid(&self) -> Option<SolidId> {
        match self.node {
            Node::Solid(id) => Some(id),
            _ => None,
        }
    }
}

/// Structural identity: both handles reference the same node.
pub fn same_node(a: &Shape, b: &Shape) -> bool {
    a.node == b.node
}

// ─── Topological Entities ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub point: Point3d,
    pub tolerance: f64,
}

/// A bounded piece of a curve, `t_start < t_end`, `start_vertex` sits at `t_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub curve: Curve,
    pub t_start: f64,
    pub t_end: f64,
    pub start_vertex: VertexId,
    pub end_vertex: VertexId,
    pub tolerance: f64,
    /// Zero-length edge at a surface singularity; its curve is a point.
    pub degenerate: bool,
}

impl Edge {
    pub fn range(&self) -> (f64, f64) {
        (self.t_start, self.t_end)
    }

    pub fn point_at(&self, t: f64) -> Point3d {
        self.curve.evaluate(t)
    }

    pub fn mid_param(&self) -> f64 {
        0.5 * (self.t_start + self.t_end)
    }

    pub fn is_closed(&self) -> bool {
        self.start_vertex == self.end_vertex
    }

    pub fn length(&self) -> f64 {
        if self.degenerate {
            return 0.0;
        }
        self.curve.length(self.t_start, self.t_end)
    }
}

/// Use of an edge by a loop. `forward` traverses the edge from `t_start` to `t_end`.
/// The pcurve, when present, is evaluated at the edge's 3D parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfEdge {
    pub edge: EdgeId,
    pub forward: bool,
    pub pcurve: Option<Curve2d>,
}

/// Ordered chain of half-edges. In a face it is closed, counter-clockwise
/// in parameter space for the outer boundary and clockwise for holes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Loop {
    pub half_edges: Vec<HalfEdgeId>,
}

/// A trimmed surface. A forward face's outward side is the surface's natural normal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    pub surface: Surface,
    pub outer_loop: LoopId,
    pub inner_loops: Vec<LoopId>,
    pub tolerance: f64,
}

impl Face {
    pub fn loops(&self) -> impl Iterator<Item = LoopId> + '_ {
        std::iter::once(self.outer_loop).chain(self.inner_loops.iter().copied())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Shell {
    pub faces: Vec<Shape>,
}

/// First shell is the outer boundary; the rest bound cavities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Solid {
    pub shells: Vec<ShellId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Compound {
    pub children: Vec<Shape>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("{kind:?} referenced by the shape is not in the store")]
    MissingEntity { kind: ShapeKind },
    #[error("loop {loop_id:?} is not closed")]
    OpenLoop { loop_id: LoopId },
    #[error("need at least {needed} points, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("degenerate geometry: {0}")]
    Degenerate(String),
}

/// Entity counts of a shape, each node counted once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyCount {
    pub vertices: usize,
    pub edges: usize,
    pub faces: usize,
    pub shells: usize,
    pub solids: usize,
}

// ─── Entity Store ────────────────────────────────────────────────────────────

/// Arena-based storage for all topological entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStore {
    pub vertices: SlotMap<VertexId, Vertex>,
    pub edges: SlotMap<EdgeId, Edge>,
    pub half_edges: SlotMap<HalfEdgeId, HalfEdge>,
    pub loops: SlotMap<LoopId, Loop>,
    pub faces: SlotMap<FaceId, Face>,
    pub shells: SlotMap<ShellId, Shell>,
    pub solids: SlotMap<SolidId, Solid>,
    pub compounds: SlotMap<CompoundId, Compound>,
}

/// Snapshot restored by [`EntityStore::rollback`].
#[derive(Debug, Clone)]
pub struct StoreCheckpoint(EntityStore);

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(&self) -> StoreCheckpoint {
        StoreCheckpoint(self.clone())
    }

    pub fn rollback(&mut self, checkpoint: StoreCheckpoint) {
        *self = checkpoint.0;
    }

    pub fn add_vertex(&mut self, point: Point3d, tolerance: f64) -> VertexId {
        self.vertices.insert(Vertex { point, tolerance })
    }

    pub fn add_edge(
        &mut self,
        curve: Curve,
        range: (f64, f64),
        start_vertex: VertexId,
        end_vertex: VertexId,
        tolerance: f64,
    ) -> EdgeId {
        self.edges.insert(Edge {
            curve,
            t_start: range.0,
            t_end: range.1,
            start_vertex,
            end_vertex,
            tolerance,
            degenerate: false,
        })
    }

    /// Degenerated edge collapsed onto `vertex`; `range` spans the singular side of the face.
    pub fn add_degenerate_edge(&mut self, vertex: VertexId, range: (f64, f64), tolerance: f64) -> EdgeId {
        let point = self.vertices[vertex].point;
        self.edges.insert(Edge {
            curve: Curve::Line(crate::geometry::curves::Line3d::degenerate(point)),
            t_start: range.0,
            t_end: range.1,
            start_vertex: vertex,
            end_vertex: vertex,
            tolerance,
            degenerate: true,
        })
    }

    pub fn add_half_edge(&mut self, edge: EdgeId, forward: bool, pcurve: Option<Curve2d>) -> HalfEdgeId {
        self.half_edges.insert(HalfEdge { edge, forward, pcurve })
    }

    pub fn add_loop(&mut self, half_edges: Vec<HalfEdgeId>) -> LoopId {
        self.loops.insert(Loop { half_edges })
    }

    pub fn add_face(&mut self, surface: Surface, outer_loop: LoopId, inner_loops: Vec<LoopId>, tolerance: f64) -> FaceId {
        self.faces.insert(Face {
            surface,
            outer_loop,
            inner_loops,
            tolerance,
        })
    }

    pub fn add_shell(&mut self, faces: Vec<Shape>) -> ShellId {
        self.shells.insert(Shell { faces })
    }

    pub fn add_solid(&mut self, shells: Vec<ShellId>) -> SolidId {
        self.solids.insert(Solid { shells })
    }

    pub fn add_compound(&mut self, children: Vec<Shape>) -> CompoundId {
        self.compounds.insert(Compound { children })
    }

    /// Start and end vertex in traversal order.
    pub fn half_edge_vertices(&self, he: HalfEdgeId) -> (VertexId, VertexId) {
        let h = &self.half_edges[he];
        let e = &self.edges[h.edge];
        if h.forward {
            (e.start_vertex, e.end_vertex)
        } else {
            (e.end_vertex, e.start_vertex)
        }
    }

    /// Curve parameters at the start and end of the traversal.
    pub fn half_edge_params(&self, he: HalfEdgeId) -> (f64, f64) {
        let h = &self.half_edges[he];
        let e = &self.edges[h.edge];
        if h.forward { (e.t_start, e.t_end) } else { (e.t_end, e.t_start) }
    }

    pub fn contains(&self, node: &Node) -> bool {
        match node {
            Node::Vertex(id) => self.vertices.contains_key(*id),
            Node::Edge(id) => self.edges.contains_key(*id),
            Node::Wire(id) => self.loops.contains_key(*id),
            Node::Face(id) => self.faces.contains_key(*id),
            Node::Shell(id) => self.shells.contains_key(*id),
            Node::Solid(id) => self.solids.contains_key(*id),
            Node::Compound(id) => self.compounds.contains_key(*id),
        }
    }

    /// Checks every node reachable from `shape` exists.
    pub fn validate(&self, shape: &Shape) -> Result<(), TopologyError> {
        let mut stack = vec![shape.node];
        while let Some(node) = stack.pop() {
            if !self.contains(&node) {
                return Err(TopologyError::MissingEntity { kind: node.kind() });
            }
            match node {
                Node::Compound(id) => stack.extend(self.compounds[id].children.iter().map(|c| c.node)),
                Node::Solid(id) => stack.extend(self.solids[id].shells.iter().map(|s| Node::Shell(*s))),
                Node::Shell(id) => stack.extend(self.shells[id].faces.iter().map(|f| f.node)),
                Node::Face(id) => stack.extend(self.faces[id].loops().map(Node::Wire)),
                Node::Wire(id) => {
                    for he in &self.loops[id].half_edges {
                        let Some(h) = self.half_edges.get(*he) else {
                            return Err(TopologyError::MissingEntity { kind: ShapeKind::Edge });
                        };
                        stack.push(Node::Edge(h.edge));
                    }
                }
                Node::Edge(id) => {
                    let e = &self.edges[id];
                    stack.push(Node::Vertex(e.start_vertex));
                    stack.push(Node::Vertex(e.end_vertex));
                }
                Node::Vertex(_) => {}
            }
        }
        Ok(())
    }

    /// Largest vertex, edge or face tolerance in `shape`.
    pub fn shape_tolerance(&self, shape: &Shape) -> f64 {
        let mut tol: f64 = 0.0;
        for v in Explorer::new(self, *shape, ShapeKind::Vertex) {
            if let Some(id) = v.as_vertex() {
                tol = tol.max(self.vertices[id].tolerance);
            }
        }
        for e in Explorer::new(self, *shape, ShapeKind::Edge) {
            if let Some(id) = e.as_edge() {
                tol = tol.max(self.edges[id].tolerance);
            }
        }
        for f in Explorer::new(self, *shape, ShapeKind::Face) {
            if let Some(id) = f.as_face() {
                tol = tol.max(self.faces[id].tolerance);
            }
        }
        tol
    }

    pub fn count_topology(&self, shape: &Shape) -> TopologyCount {
        let count = |kind| Explorer::new(self, *shape, kind).count();
        TopologyCount {
            vertices: count(ShapeKind::Vertex),
            edges: count(ShapeKind::Edge),
            faces: count(ShapeKind::Face),
            shells: count(ShapeKind::Shell),
            solids: count(ShapeKind::Solid),
        }
    }

    pub fn edge_bounding_box(&self, edge: EdgeId) -> BoundingBox {
        let e = &self.edges[edge];
        if e.degenerate {
            return BoundingBox::from_points(&[self.vertices[e.start_vertex].point]);
        }
        e.curve.bounding_box(e.t_start, e.t_end)
    }

    /// Box of a face: its boundary plus a sampled cover of its parameter rectangle
    /// for curved surfaces.
    pub fn face_bounding_box(&self, face: FaceId) -> BoundingBox {
        let f = &self.faces[face];
        let mut bb = BoundingBox::empty();
        let mut uv_min = Point2d::new(f64::INFINITY, f64::INFINITY);
        let mut uv_max = Point2d::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for lp in f.loops() {
            for &he in &self.loops[lp].half_edges {
                let edge = self.half_edges[he].edge;
                bb = bb.union(&self.edge_bounding_box(edge));
                let e = &self.edges[edge];
                if let Some(pc) = &self.half_edges[he].pcurve {
                    for uv in pc.polyline(e.t_start, e.t_end, 8) {
                        uv_min = Point2d::new(uv_min.x.min(uv.x), uv_min.y.min(uv.y));
                        uv_max = Point2d::new(uv_max.x.max(uv.x), uv_max.y.max(uv.y));
                    }
                }
            }
        }
        if matches!(f.surface, Surface::Plane(_)) || !uv_min.x.is_finite() {
            return bb;
        }
        let n = 12;
        let mut sag: f64 = 0.0;
        let at = |i: usize, j: usize| {
            let u = uv_min.x + (uv_max.x - uv_min.x) * i as f64 / n as f64;
            let v = uv_min.y + (uv_max.y - uv_min.y) * j as f64 / n as f64;
            (u, v)
        };
        for i in 0..=n {
            for j in 0..=n {
                let (u, v) = at(i, j);
                bb.expand_to_include(&f.surface.evaluate(u, v));
                if i < n && j < n {
                    let (u1, v1) = at(i + 1, j + 1);
                    let mid = f.surface.evaluate(0.5 * (u + u1), 0.5 * (v + v1));
                    let corners = [
                        f.surface.evaluate(u, v),
                        f.surface.evaluate(u1, v),
                        f.surface.evaluate(u, v1),
                        f.surface.evaluate(u1, v1),
                    ];
                    let avg = Point3d::centroid(&corners).unwrap_or(mid);
                    sag = sag.max(mid.distance_to(&avg));
                }
            }
        }
        bb.expanded(1.5 * sag)
    }

    pub fn bounding_box(&self, shape: &Shape) -> BoundingBox {
        let mut bb = BoundingBox::empty();
        let mut any_face = false;
        for f in Explorer::new(self, *shape, ShapeKind::Face) {
            if let Some(id) = f.as_face() {
                bb = bb.union(&self.face_bounding_box(id));
                any_face = true;
            }
        }
        if !any_face {
            for e in Explorer::new(self, *shape, ShapeKind::Edge) {
                if let Some(id) = e.as_edge() {
                    bb = bb.union(&self.edge_bounding_box(id));
                }
            }
        }
        for v in Explorer::new(self, *shape, ShapeKind::Vertex) {
            if let Some(id) = v.as_vertex() {
                bb.expand_to_include(&self.vertices[id].point);
            }
        }
        bb
    }

    /// Outward normal of a face used with orientation `orientation`.
    pub fn face_normal(&self, face: FaceId, orientation: Orientation, uv: &Point2d) -> Vec3 {
        self.faces[face].surface.normal_at(uv.x, uv.y) * orientation.sign()
    }
}
