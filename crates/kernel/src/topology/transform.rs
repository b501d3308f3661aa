//! Placement of shapes. Transforms are baked into a fresh copy of the graph,
//! so every shape in the store is already in world coordinates.

use std::collections::HashMap;

use tracing::{debug, instrument};

use super::brep::*;
use crate::geometry::curves::Curve;
use crate::geometry::curves2d::{Conic2d, Curve2d, Line2d};
use crate::geometry::point::Point2d;
use crate::geometry::surfaces::Surface;
use crate::geometry::transform::Transform;
use crate::geometry::vector::Vec2;

struct Copier<'t> {
    t: &'t Transform,
    scale: f64,
    vertices: HashMap<VertexId, VertexId>,
    edges: HashMap<EdgeId, EdgeId>,
    loops: HashMap<LoopId, LoopId>,
    faces: HashMap<FaceId, FaceId>,
    shells: HashMap<ShellId, ShellId>,
    solids: HashMap<SolidId, SolidId>,
    compounds: HashMap<CompoundId, CompoundId>,
}

/// How much a curve's parameter stretches under a uniform scale.
fn param_scale(curve: &Curve, s: f64) -> f64 {
    match curve {
        Curve::Line(_) => s,
        _ => 1.0,
    }
}

/// How each parameter-space coordinate of a surface stretches.
fn uv_scale(surface: &Surface, s: f64) -> Vec2 {
    match surface {
        Surface::Plane(_) => Vec2::new(s, s),
        Surface::Cylinder(_) | Surface::Cone(_) => Vec2::new(1.0, s),
        _ => Vec2::new(1.0, 1.0),
    }
}

fn scale_uv(p: Point2d, m: Vec2) -> Point2d {
    Point2d::new(p.x * m.x, p.y * m.y)
}

impl Copier<'_> {
    fn vertex(&mut self, store: &mut EntityStore, id: VertexId) -> VertexId {
        if let Some(&v) = self.vertices.get(&id) {
            return v;
        }
        let src = &store.vertices[id];
        let point = self.t.transform_point(&src.point);
        let v = store.add_vertex(point, src.tolerance);
        self.vertices.insert(id, v);
        v
    }

    fn edge(&mut self, store: &mut EntityStore, id: EdgeId) -> EdgeId {
        if let Some(&e) = self.edges.get(&id) {
            return e;
        }
        let src = store.edges[id].clone();
        let sv = self.vertex(store, src.start_vertex);
        let ev = self.vertex(store, src.end_vertex);
        let sigma = if src.degenerate { 1.0 } else { param_scale(&src.curve, self.scale) };
        let e = store.edges.insert(Edge {
            curve: src.curve.transformed(self.t),
            t_start: src.t_start * sigma,
            t_end: src.t_end * sigma,
            start_vertex: sv,
            end_vertex: ev,
            tolerance: src.tolerance,
            degenerate: src.degenerate,
        });
        self.edges.insert(id, e);
        e
    }

    fn pcurve(&self, pc: &Curve2d, sigma: f64, m: Vec2) -> Curve2d {
        match pc {
            Curve2d::Line(l) => Curve2d::Line(Line2d {
                origin: scale_uv(l.origin, m),
                direction: Vec2::new(l.direction.x * m.x / sigma, l.direction.y * m.y / sigma),
            }),
            Curve2d::Conic(c) => Curve2d::Conic(Conic2d {
                center: scale_uv(c.center, m),
                x_dir: Vec2::new(c.x_dir.x * m.x, c.x_dir.y * m.y),
                y_dir: Vec2::new(c.y_dir.x * m.x, c.y_dir.y * m.y),
            }),
            Curve2d::Projected(p) => {
                let mut q = p.clone();
                q.curve = p.curve.transformed(self.t);
                q.surface = p.surface.transformed(self.t);
                for (t, uv) in &mut q.table {
                    *t *= sigma;
                    *uv = scale_uv(*uv, m);
                }
                Curve2d::Projected(q)
            }
        }
    }

    fn wire(&mut self, store: &mut EntityStore, id: LoopId, surface: Option<&Surface>) -> LoopId {
        if let Some(&l) = self.loops.get(&id) {
            return l;
        }
        let src = store.loops[id].half_edges.clone();
        let mut half_edges = Vec::with_capacity(src.len());
        for he in src {
            let h = store.half_edges[he].clone();
            let edge = self.edge(store, h.edge);
            let sigma = {
                let e = &store.edges[h.edge];
                if e.degenerate { 1.0 } else { param_scale(&e.curve, self.scale) }
            };
            let m = surface.map(|s| uv_scale(s, self.scale)).unwrap_or(Vec2::new(1.0, 1.0));
            let pcurve = h.pcurve.as_ref().map(|pc| self.pcurve(pc, sigma, m));
            half_edges.push(store.add_half_edge(edge, h.forward, pcurve));
        }
        let l = store.add_loop(half_edges);
        self.loops.insert(id, l);
        l
    }

    fn face(&mut self, store: &mut EntityStore, id: FaceId) -> FaceId {
        if let Some(&f) = self.faces.get(&id) {
            return f;
        }
        let src = store.faces[id].clone();
        let outer = self.wire(store, src.outer_loop, Some(&src.surface));
        let inner: Vec<LoopId> = src
            .inner_loops
            .iter()
            .map(|l| self.wire(store, *l, Some(&src.surface)))
            .collect();
        let f = store.add_face(src.surface.transformed(self.t), outer, inner, src.tolerance);
        self.faces.insert(id, f);
        f
    }

    fn shape(&mut self, store: &mut EntityStore, shape: &Shape) -> Shape {
        let node = match shape.node {
            Node::Vertex(id) => Node::Vertex(self.vertex(store, id)),
            Node::Edge(id) => Node::Edge(self.edge(store, id)),
            Node::Wire(id) => Node::Wire(self.wire(store, id, None)),
            Node::Face(id) => Node::Face(self.face(store, id)),
            Node::Shell(id) => Node::Shell(self.shell(store, id)),
            Node::Solid(id) => match self.solids.get(&id) {
                Some(&s) => Node::Solid(s),
                None => {
                    let src = store.solids[id].shells.clone();
                    let shells = src.into_iter().map(|sh| self.shell(store, sh)).collect();
                    let s = store.add_solid(shells);
                    self.solids.insert(id, s);
                    Node::Solid(s)
                }
            },
            Node::Compound(id) => match self.compounds.get(&id) {
                Some(&c) => Node::Compound(c),
                None => {
                    let src = store.compounds[id].children.clone();
                    let children = src.iter().map(|c| self.shape(store, c)).collect();
                    let c = store.add_compound(children);
                    self.compounds.insert(id, c);
                    Node::Compound(c)
                }
            },
        };
        Shape::oriented(node, shape.orientation)
    }

    fn shell(&mut self, store: &mut EntityStore, id: ShellId) -> ShellId {
        if let Some(&s) = self.shells.get(&id) {
            return s;
        }
        let src = store.shells[id].faces.clone();
        let faces = src.iter().map(|f| self.shape(store, f)).collect();
        let s = store.add_shell(faces);
        self.shells.insert(id, s);
        s
    }
}

/// Deep copy of `shape` with `t` applied to every carrier. Sharing inside the
/// copied graph is preserved; pcurves are remapped to the placed surfaces.
#[instrument(skip(store, t))]
pub fn transformed_copy(store: &mut EntityStore, shape: &Shape, t: &Transform) -> Shape {
    let mut copier = Copier {
        t,
        scale: t.scale_factor(),
        vertices: HashMap::new(),
        edges: HashMap::new(),
        loops: HashMap::new(),
        faces: HashMap::new(),
        shells: HashMap::new(),
        solids: HashMap::new(),
        compounds: HashMap::new(),
    };
    let out = copier.shape(store, shape);
    debug!(
        vertices = copier.vertices.len(),
        edges = copier.edges.len(),
        faces = copier.faces.len(),
        "baked transform into copy"
    );
    out
}
