//! Phase 1: find every interference between elements of different operands.

pub mod edge;
pub mod face;
pub mod vertex;

use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::geometry::transform::BoundingBox;
use crate::topology::brep::{EdgeId, EntityStore, FaceId, Shape, ShapeKind, VertexId};
use crate::topology::domain::FaceDomain;
use crate::topology::explore::Explorer;

use super::bvh::Bvh;
use super::context::OperationContext;
use super::diagnostics::{BooleanFailure, Phase, Warning};
use super::interference::{Element, Interference, InterferenceTable};
use face::FaceSide;

/// Result of evaluating one candidate pair.
#[derive(Debug, Default)]
pub struct PairOutcome {
    pub records: Vec<Interference>,
    /// A solver ran out of budget before settling the pair.
    pub unresolved: bool,
}

impl PairOutcome {
    fn single(record: Option<Interference>) -> Self {
        Self {
            records: record.into_iter().collect(),
            unresolved: false,
        }
    }
}

/// Distinct vertices, edges and faces of one operand.
#[derive(Debug, Clone, Default)]
pub struct OperandElements {
    pub vertices: Vec<VertexId>,
    pub edges: Vec<EdgeId>,
    pub faces: Vec<FaceId>,
}

impl OperandElements {
    pub fn collect(store: &EntityStore, shape: &Shape) -> Self {
        Self {
            vertices: Explorer::new(store, *shape, ShapeKind::Vertex).filter_map(|s| s.as_vertex()).collect(),
            edges: Explorer::new(store, *shape, ShapeKind::Edge)
                .filter_map(|s| s.as_edge())
                .filter(|e| !store.edges[*e].degenerate)
                .collect(),
            faces: Explorer::new(store, *shape, ShapeKind::Face).filter_map(|s| s.as_face()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Candidate {
    VertexVertex(VertexId, VertexId),
    VertexEdge(VertexId, EdgeId),
    VertexFace(VertexId, FaceId),
    EdgeEdge(EdgeId, EdgeId),
    EdgeFace(EdgeId, FaceId),
    FaceFace(FaceId, FaceId),
}

impl Candidate {
    fn elements(&self) -> (Element, Element) {
        match *self {
            Candidate::VertexVertex(a, b) => (Element::Vertex(a), Element::Vertex(b)),
            Candidate::VertexEdge(a, b) => (Element::Vertex(a), Element::Edge(b)),
            Candidate::VertexFace(a, b) => (Element::Vertex(a), Element::Face(b)),
            Candidate::EdgeEdge(a, b) => (Element::Edge(a), Element::Edge(b)),
            Candidate::EdgeFace(a, b) => (Element::Edge(a), Element::Face(b)),
            Candidate::FaceFace(a, b) => (Element::Face(a), Element::Face(b)),
        }
    }
}

/// Tolerance-inflated boxes of one operand's elements.
struct Boxes {
    vertices: Vec<BoundingBox>,
    edges: Vec<BoundingBox>,
    faces: Vec<BoundingBox>,
}

impl Boxes {
    fn new(store: &EntityStore, el: &OperandElements, fuzzy: f64) -> Self {
        Self {
            vertices: el
                .vertices
                .iter()
                .map(|v| {
                    let vx = &store.vertices[*v];
                    BoundingBox::new(vx.point, vx.point).expanded(vx.tolerance + fuzzy)
                })
                .collect(),
            edges: el
                .edges
                .iter()
                .map(|e| store.edge_bounding_box(*e).expanded(store.edges[*e].tolerance + fuzzy))
                .collect(),
            faces: el
                .faces
                .iter()
                .map(|f| store.face_bounding_box(*f).expanded(store.faces[*f].tolerance + fuzzy))
                .collect(),
        }
    }
}

fn tree(boxes: &[BoundingBox]) -> Bvh {
    Bvh::build(boxes.iter().copied().enumerate().collect())
}

/// Candidate pairs between operand `a` and operand `b`.
fn candidates(a: (&OperandElements, &Boxes), b: (&OperandElements, &Boxes), out: &mut Vec<Candidate>) {
    let (ea, ba) = a;
    let (eb, bb) = b;
    let (tv, te, tf) = (tree(&bb.vertices), tree(&bb.edges), tree(&bb.faces));
    for (i, bx) in ba.vertices.iter().enumerate() {
        let v = ea.vertices[i];
        out.extend(tv.query(bx).into_iter().map(|j| Candidate::VertexVertex(v, eb.vertices[j])));
        out.extend(te.query(bx).into_iter().map(|j| Candidate::VertexEdge(v, eb.edges[j])));
        out.extend(tf.query(bx).into_iter().map(|j| Candidate::VertexFace(v, eb.faces[j])));
    }
    for (i, bx) in ba.edges.iter().enumerate() {
        let e = ea.edges[i];
        out.extend(tv.query(bx).into_iter().map(|j| Candidate::VertexEdge(eb.vertices[j], e)));
        out.extend(te.query(bx).into_iter().map(|j| Candidate::EdgeEdge(e, eb.edges[j])));
        out.extend(tf.query(bx).into_iter().map(|j| Candidate::EdgeFace(e, eb.faces[j])));
    }
    for (i, bx) in ba.faces.iter().enumerate() {
        let f = ea.faces[i];
        out.extend(tv.query(bx).into_iter().map(|j| Candidate::VertexFace(eb.vertices[j], f)));
        out.extend(te.query(bx).into_iter().map(|j| Candidate::EdgeFace(eb.edges[j], f)));
        out.extend(tf.query(bx).into_iter().map(|j| Candidate::FaceFace(f, eb.faces[j])));
    }
}

fn evaluate(
    store: &EntityStore,
    pair: Candidate,
    domains: &HashMap<FaceId, FaceDomain>,
    ctx: &OperationContext,
) -> PairOutcome {
    let fuzzy = ctx.fuzzy;
    let budget = ctx.options.budget.numeric();
    match pair {
        Candidate::VertexVertex(a, b) => PairOutcome::single(vertex::vertex_vertex(store, a, b, fuzzy)),
        Candidate::VertexEdge(v, e) => PairOutcome::single(vertex::vertex_edge(store, v, e, fuzzy)),
        Candidate::VertexFace(v, f) => match domains.get(&f) {
            Some(d) => PairOutcome::single(vertex::vertex_face(store, v, f, d, fuzzy)),
            None => PairOutcome::default(),
        },
        Candidate::EdgeEdge(a, b) => edge::edge_edge(store, a, b, fuzzy, &budget),
        Candidate::EdgeFace(e, f) => match domains.get(&f) {
            Some(d) => edge::edge_face(store, e, f, d, fuzzy, &budget),
            None => PairOutcome::default(),
        },
        Candidate::FaceFace(a, b) => match (domains.get(&a), domains.get(&b)) {
            (Some(da), Some(db)) => face::face_face(
                store,
                FaceSide { face: a, domain: da },
                FaceSide { face: b, domain: db },
                ctx,
            ),
            _ => PairOutcome::default(),
        },
    }
}

/// Parameter-space outlines of every face of the operands.
pub fn face_domains(store: &EntityStore, operands: &[OperandElements], ctx: &OperationContext) -> HashMap<FaceId, FaceDomain> {
    let faces: Vec<FaceId> = operands.iter().flat_map(|o| o.faces.iter().copied()).collect();
    let domains = ctx.map(&faces, |f| FaceDomain::new(store, *f));
    faces.into_iter().zip(domains).collect()
}

/// Runs phase 1 over every pair of operands.
#[instrument(skip_all, fields(operands = operands.len()))]
pub fn intersect_operands(
    store: &EntityStore,
    operands: &[OperandElements],
    domains: &HashMap<FaceId, FaceDomain>,
    ctx: &OperationContext,
) -> Result<InterferenceTable, BooleanFailure> {
    let boxes: Vec<Boxes> = operands.iter().map(|o| Boxes::new(store, o, ctx.fuzzy)).collect();
    let mut pairs = Vec::new();
    for i in 0..operands.len() {
        for j in i + 1..operands.len() {
            candidates((&operands[i], &boxes[i]), (&operands[j], &boxes[j]), &mut pairs);
        }
    }
    debug!(candidates = pairs.len(), "bounding box filter done");

    let outcomes = ctx.map(&pairs, |pair| {
        if ctx.is_cancelled() {
            return PairOutcome::default();
        }
        evaluate(store, *pair, domains, ctx)
    });
    ctx.checkpoint(Phase::Intersection)?;

    let mut table = InterferenceTable::default();
    for (pair, outcome) in pairs.iter().zip(outcomes) {
        if outcome.unresolved {
            let (a, b) = pair.elements();
            ctx.warn(Warning::UnresolvedInterference {
                elements: vec![a.node(), b.node()],
            });
            table.unresolved.push((a, b));
        }
        table.records.extend(outcome.records);
    }
    info!(
        records = table.records.len(),
        sections = table.sections().count(),
        unresolved = table.unresolved.len(),
        "intersection phase done"
    );
    Ok(table)
}
