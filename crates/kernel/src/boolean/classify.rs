//! Phase 4: state of every split face and free edge relative to the other operand.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use tracing::{debug, info, instrument};

use crate::geometry::curves::Ray;
use crate::geometry::intersection::{ray_aabb, ray_surface};
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::transform::BoundingBox;
use crate::geometry::vector::Vec3;
use crate::topology::brep::{EdgeId, EntityStore, FaceId, Node, Orientation, Shape, ShapeKind};
use crate::topology::domain::{FaceDomain, PointState};
use crate::topology::explore::Explorer;

use super::arguments::is_solid;
use super::context::OperationContext;
use super::diagnostics::{BooleanFailure, Phase, Warning};
use super::ds::SplitData;
use super::intersect::OperandElements;
use super::BooleanOp;

/// How a piece lying on the other operand's boundary faces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Same,
    Opposite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    In,
    Out,
    On(Sense),
}

/// A face of the split operands, with the orientation it has in its operand.
#[derive(Debug, Clone, Copy)]
pub struct Piece {
    pub face: FaceId,
    pub orientation: Orientation,
    pub operand: usize,
    /// Operand face this piece was split from.
    pub origin: FaceId,
}

impl Piece {
    pub fn shape(&self) -> Shape {
        Shape::oriented(Node::Face(self.face), self.orientation)
    }
}

/// A split edge of an operand that belongs to no face, as in a wire.
#[derive(Debug, Clone, Copy)]
pub struct EdgePiece {
    pub edge: EdgeId,
    pub orientation: Orientation,
    pub operand: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub pieces: Vec<Piece>,
    pub states: Vec<State>,
    pub edges: Vec<EdgePiece>,
    pub edge_states: Vec<State>,
}

impl Classification {
    pub fn state_of(&self, face: FaceId) -> Option<State> {
        self.pieces.iter().position(|p| p.face == face).map(|i| self.states[i])
    }

    pub fn count(&self, operand: usize, state: State) -> usize {
        self.pieces
            .iter()
            .zip(&self.states)
            .filter(|(p, s)| p.operand == operand && **s == state)
            .count()
    }
}

/// Skewed probe directions; none is parallel to a coordinate plane.
const DIRECTIONS: [[f64; 3]; 7] = [
    [0.5377, 0.8160, 0.2110],
    [-0.7071, 0.3118, 0.6348],
    [0.2643, -0.5512, 0.7913],
    [-0.3365, -0.7610, -0.5547],
    [0.8447, -0.1195, -0.5217],
    [-0.6510, 0.6580, -0.3780],
    [0.1262, 0.4437, -0.8873],
];

enum Probe {
    /// Crossing parity from a ray that met no edge and no tangency.
    Clean(bool),
    /// The ray grazed a face or crossed a face boundary; the parity is a guess.
    Unclear(bool),
    /// The probe point lies on the boundary of the solid.
    OnSurface,
}

enum Verdict {
    Inside(bool),
    OnSurface,
    Unclear(Option<bool>),
}

/// The faces of one operand, as rays see them.
struct Target<'a> {
    faces: Vec<(FaceId, &'a FaceDomain, BoundingBox)>,
    bbox: BoundingBox,
    solid: bool,
}

impl<'a> Target<'a> {
    fn new(store: &EntityStore, shape: &Shape, elements: &OperandElements, domains: &'a HashMap<FaceId, FaceDomain>) -> Self {
        let faces = elements
            .faces
            .iter()
            .filter_map(|f| {
                let bbox = store.face_bounding_box(*f).expanded(store.faces[*f].tolerance);
                domains.get(f).map(|d| (*f, d, bbox))
            })
            .collect();
        Self {
            faces,
            bbox: store.bounding_box(shape),
            solid: is_solid(store, shape),
        }
    }
}

impl Target<'_> {
    fn probe(&self, store: &EntityStore, ctx: &OperationContext, origin: &Point3d, dir: Vec3) -> Probe {
        let ray = Ray::new(*origin, dir);
        let reach = self.bbox.diagonal() + origin.distance_to(&self.bbox.center()) + 1.0;
        let mut ts: Vec<f64> = Vec::new();
        let mut clean = true;
        for (f, domain, bbox) in &self.faces {
            if ray_aabb(&ray, &bbox.min, &bbox.max).is_none() {
                continue;
            }
            let tol = face_tolerance(store, ctx, *f);
            for hit in ray_surface(&ray, &domain.surface, reach) {
                let Some((state, _)) = domain.classify_point(&hit.point, tol) else { continue };
                if state == PointState::Outside {
                    continue;
                }
                if hit.t <= tol {
                    return Probe::OnSurface;
                }
                let normal = hit.normal.normalized().unwrap_or(hit.normal);
                if state == PointState::OnBoundary || normal.dot(&ray.direction).abs() < 1e-3 {
                    clean = false;
                }
                ts.push(hit.t);
            }
        }
        ts.sort_by(|a, b| a.total_cmp(b));
        ts.dedup_by(|b, a| (*b - *a).abs() <= ctx.tolerance.coincidence);
        let inside = ts.len() % 2 == 1;
        if clean { Probe::Clean(inside) } else { Probe::Unclear(inside) }
    }

    /// Ray parity at the first sample point that gives a clean answer.
    fn locate(&self, store: &EntityStore, ctx: &OperationContext, points: &[Point3d]) -> Verdict {
        let max = ctx.options.classifier.max_probes.max(1);
        let mut probes = 0;
        let mut guess = None;
        let mut on_surface = false;
        'points: for p in points {
            for d in DIRECTIONS {
                if probes == max {
                    break 'points;
                }
                probes += 1;
                match self.probe(store, ctx, p, Vec3::new(d[0], d[1], d[2])) {
                    Probe::Clean(inside) => return Verdict::Inside(inside),
                    Probe::Unclear(inside) => guess = Some(inside),
                    Probe::OnSurface => {
                        on_surface = true;
                        continue 'points;
                    }
                }
            }
        }
        if guess.is_none() && on_surface {
            return Verdict::OnSurface;
        }
        Verdict::Unclear(guess)
    }
}

fn face_tolerance(store: &EntityStore, ctx: &OperationContext, face: FaceId) -> f64 {
    store.faces[face].tolerance + ctx.fuzzy + ctx.tolerance.coincidence
}

/// Ray parity of `point` against a closed set of faces. `None` when the point
/// lies on them or no probe settles it.
pub fn point_in_faces(store: &EntityStore, faces: &[FaceId], point: &Point3d, ctx: &OperationContext) -> Option<bool> {
    let domains: Vec<FaceDomain> = faces.iter().map(|f| FaceDomain::new(store, *f)).collect();
    let mut bbox = BoundingBox::empty();
    let mut entries = Vec::with_capacity(faces.len());
    for (f, d) in faces.iter().zip(&domains) {
        let fb = store.face_bounding_box(*f);
        bbox = bbox.union(&fb);
        entries.push((*f, d, fb.expanded(store.faces[*f].tolerance)));
    }
    let target = Target {
        faces: entries,
        bbox,
        solid: true,
    };
    match target.locate(store, ctx, std::slice::from_ref(point)) {
        Verdict::Inside(inside) => Some(inside),
        Verdict::Unclear(guess) => guess,
        Verdict::OnSurface => None,
    }
}

struct Classifier<'a> {
    store: &'a EntityStore,
    data: &'a SplitData,
    targets: Vec<Target<'a>>,
    orientation_of: HashMap<FaceId, Orientation>,
    unresolved: HashSet<FaceId>,
    ctx: &'a OperationContext,
}

impl Classifier<'_> {
    fn tolerance_of(&self, face: FaceId) -> f64 {
        face_tolerance(self.store, self.ctx, face)
    }

    /// Same-domain test against the split faces coincident with the piece's origin.
    fn on_state(&self, piece: &Piece, samples: &[Point2d]) -> Option<State> {
        let partners = self.data.same_domain_partners(piece.origin);
        if partners.is_empty() {
            return None;
        }
        let surface = &self.store.faces[piece.face].surface;
        let images: Vec<(FaceId, FaceDomain)> = partners
            .iter()
            .flat_map(|p| self.data.face_image_of(*p))
            .map(|f| (f, FaceDomain::new(self.store, f)))
            .collect();
        for uv in samples.iter().take(4) {
            let p = surface.evaluate_uv(uv);
            let mut on_boundary = false;
            for (f, domain) in &images {
                let tol = self.tolerance_of(piece.face).max(self.tolerance_of(*f));
                match domain.classify_point(&p, tol) {
                    Some((PointState::Inside, uv2)) => {
                        let n1 = self.store.face_normal(piece.face, piece.orientation, uv);
                        let other = self.orientation_of.get(f).copied().unwrap_or(Orientation::Forward);
                        let n2 = self.store.face_normal(*f, other, &uv2);
                        let sense = if n1.dot(&n2) >= 0.0 { Sense::Same } else { Sense::Opposite };
                        return Some(State::On(sense));
                    }
                    Some((PointState::OnBoundary, _)) => on_boundary = true,
                    _ => {}
                }
            }
            // a sample on a partner's boundary says nothing; try the next one
            if !on_boundary {
                return None;
            }
        }
        None
    }

    fn classify_face(&self, piece: &Piece) -> Result<State, BooleanFailure> {
        let domain = FaceDomain::new(self.store, piece.face);
        let samples = domain.interior_samples();
        if let Some(state) = self.on_state(piece, &samples) {
            return Ok(state);
        }
        let target = &self.targets[1 - piece.operand];
        if !target.solid {
            return Ok(State::Out);
        }
        let surface = &self.store.faces[piece.face].surface;
        let points: Vec<Point3d> = samples.iter().map(|uv| surface.evaluate_uv(uv)).collect();

        if self.unresolved.contains(&piece.origin) {
            // Out, unless the samples straddle the other boundary
            let mut seen: Option<bool> = None;
            for p in points.iter().take(3) {
                let Verdict::Inside(inside) = target.locate(self.store, self.ctx, std::slice::from_ref(p)) else { continue };
                if seen.is_some_and(|s| s != inside) {
                    return Err(BooleanFailure::UnresolvedInterference {
                        elements: vec![Node::Face(piece.origin)],
                    });
                }
                seen = Some(inside);
            }
            return Ok(State::Out);
        }

        Ok(match target.locate(self.store, self.ctx, &points) {
            Verdict::Inside(true) => State::In,
            Verdict::Inside(false) => State::Out,
            // lies on the other solid without a same-domain record
            Verdict::OnSurface => {
                debug!(face = ?piece.face, "piece on the other boundary without a coincident face");
                self.ctx.warn(Warning::AmbiguousClassification {
                    element: Node::Face(piece.face),
                });
                State::Out
            }
            Verdict::Unclear(guess) => {
                self.ctx.warn(Warning::AmbiguousClassification {
                    element: Node::Face(piece.face),
                });
                if guess == Some(true) { State::In } else { State::Out }
            }
        })
    }

    fn classify_edge(&self, piece: &EdgePiece) -> State {
        let target = &self.targets[1 - piece.operand];
        let edge = &self.store.edges[piece.edge];
        let (t0, t1) = edge.range();
        let points: Vec<Point3d> = [0.5, 0.37, 0.63].iter().map(|f| edge.point_at(t0 + (t1 - t0) * f)).collect();
        if !target.solid {
            // an edge may still run along a face of a sheet operand
            let tol = edge.tolerance + self.ctx.fuzzy;
            let on = target
                .faces
                .iter()
                .any(|(_, d, _)| matches!(d.classify_point(&points[0], tol), Some((PointState::Inside | PointState::OnBoundary, _))));
            return if on { State::On(Sense::Same) } else { State::Out };
        }
        match target.locate(self.store, self.ctx, &points) {
            Verdict::Inside(true) => State::In,
            Verdict::Inside(false) => State::Out,
            Verdict::OnSurface => State::On(Sense::Same),
            Verdict::Unclear(guess) => {
                self.ctx.warn(Warning::AmbiguousClassification {
                    element: Node::Edge(piece.edge),
                });
                if guess == Some(true) { State::In } else { State::Out }
            }
        }
    }
}

/// Split faces and free split edges of every operand.
pub fn collect_pieces(store: &EntityStore, shapes: &[Shape], data: &SplitData) -> (Vec<Piece>, Vec<EdgePiece>) {
    let mut pieces = Vec::new();
    let mut edges = Vec::new();
    for (operand, shape) in shapes.iter().enumerate() {
        let mut face_edges = HashSet::new();
        for f in Explorer::new(store, *shape, ShapeKind::Face) {
            let Some(origin) = f.as_face() else { continue };
            face_edges.extend(Explorer::new(store, f, ShapeKind::Edge).filter_map(|e| e.as_edge()));
            for face in data.face_image_of(origin) {
                pieces.push(Piece {
                    face,
                    orientation: f.orientation(),
                    operand,
                    origin,
                });
            }
        }
        for e in Explorer::new(store, *shape, ShapeKind::Edge) {
            let Some(id) = e.as_edge() else { continue };
            if face_edges.contains(&id) || store.edges[id].degenerate {
                continue;
            }
            for (piece, same) in data.image_of(id) {
                let orientation = if same { e.orientation() } else { e.orientation().reversed() };
                edges.push(EdgePiece {
                    edge: piece,
                    orientation,
                    operand,
                });
            }
        }
    }
    (pieces, edges)
}

/// Each piece is classified exactly once.
fn fill_slot(slot: &OnceLock<State>, state: State) -> Result<(), BooleanFailure> {
    slot.set(state).map_err(|_| BooleanFailure::TopologyInconsistent {
        reason: "face piece classified twice".into(),
    })
}

/// Classifies every piece of the two operands against the other one.
#[instrument(skip_all)]
pub fn classify(
    store: &EntityStore,
    shapes: &[Shape],
    operands: &[OperandElements],
    domains: &HashMap<FaceId, FaceDomain>,
    data: &SplitData,
    unresolved: &[FaceId],
    ctx: &OperationContext,
) -> Result<Classification, BooleanFailure> {
    if shapes.len() != 2 || operands.len() != 2 {
        return Err(BooleanFailure::InvalidArguments {
            reason: format!("classification takes two operands, got {}", shapes.len()),
        });
    }
    let (pieces, edges) = collect_pieces(store, shapes, data);
    let classifier = Classifier {
        store,
        data,
        targets: shapes
            .iter()
            .zip(operands)
            .map(|(s, o)| Target::new(store, s, o, domains))
            .collect(),
        orientation_of: pieces.iter().map(|p| (p.face, p.orientation)).collect(),
        unresolved: unresolved.iter().copied().collect(),
        ctx,
    };

    let slots: Vec<OnceLock<State>> = (0..pieces.len()).map(|_| OnceLock::new()).collect();
    let indices: Vec<usize> = (0..pieces.len()).collect();
    let results = ctx.map(&indices, |&i| -> Result<(), BooleanFailure> {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let state = classifier.classify_face(&pieces[i])?;
        fill_slot(&slots[i], state)
    });
    results.into_iter().collect::<Result<Vec<()>, _>>()?;
    ctx.checkpoint(Phase::Classification)?;

    let states = slots
        .into_iter()
        .map(OnceLock::into_inner)
        .collect::<Option<Vec<State>>>()
        .ok_or_else(|| BooleanFailure::TopologyInconsistent {
            reason: "face piece left unclassified".into(),
        })?;
    let edge_states = ctx.map(&edges, |e| classifier.classify_edge(e));

    let out = Classification {
        pieces,
        states,
        edges,
        edge_states,
    };
    info!(
        pieces = out.pieces.len(),
        inside = out.count(0, State::In) + out.count(1, State::In),
        on = out.states.iter().filter(|s| matches!(s, State::On(_))).count(),
        edges = out.edges.len(),
        "classification done"
    );
    Ok(out)
}

/// Pieces kept by an operation; boundary results list edges and vertices only.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub faces: Vec<Shape>,
    pub edges: Vec<Shape>,
    pub vertices: Vec<Shape>,
    /// Common of touching solids: only the shared faces remain.
    pub touching: bool,
}

/// Applies the keep rule of `op` to classified pieces. Operand 0 is the object.
pub fn select(op: BooleanOp, cl: &Classification, data: &SplitData, store: &EntityStore) -> Selection {
    let mut sel = Selection::default();
    if op == BooleanOp::Section {
        let edges = data.intersection_edges();
        let mut used = HashSet::new();
        for e in &edges {
            used.insert(store.edges[*e].start_vertex);
            used.insert(store.edges[*e].end_vertex);
        }
        sel.edges = edges.into_iter().map(Shape::edge).collect();
        sel.vertices = data
            .touch_vertices
            .iter()
            .filter(|v| !used.contains(v))
            .map(|v| Shape::vertex(*v))
            .collect();
        return sel;
    }

    let same = State::On(Sense::Same);
    let opposite = State::On(Sense::Opposite);
    for (p, s) in cl.pieces.iter().zip(&cl.states) {
        let object = p.operand == 0;
        let keep = match op {
            BooleanOp::Common => *s == State::In || (object && *s == same),
            BooleanOp::Fuse => *s == State::Out || (object && *s == same),
            BooleanOp::Cut => {
                if object {
                    *s == State::Out || *s == opposite
                } else {
                    *s == State::In
                }
            }
            BooleanOp::Section => false,
        };
        if keep {
            let shape = p.shape();
            let reversed = op == BooleanOp::Cut && !object;
            sel.faces.push(if reversed { shape.reversed() } else { shape });
        }
    }
    if op == BooleanOp::Common && sel.faces.is_empty() {
        sel.faces = cl
            .pieces
            .iter()
            .zip(&cl.states)
            .filter(|(p, s)| p.operand == 0 && **s == opposite)
            .map(|(p, _)| p.shape())
            .collect();
        sel.touching = !sel.faces.is_empty();
    }

    for (e, s) in cl.edges.iter().zip(&cl.edge_states) {
        let object = e.operand == 0;
        let keep = match op {
            BooleanOp::Common => *s == State::In || matches!(s, State::On(_)),
            BooleanOp::Fuse => *s == State::Out || (object && matches!(s, State::On(_))),
            BooleanOp::Cut => object && *s == State::Out,
            BooleanOp::Section => false,
        };
        if keep {
            sel.edges.push(Shape::oriented(Node::Edge(e.edge), e.orientation));
        }
    }
    debug!(faces = sel.faces.len(), edges = sel.edges.len(), "pieces selected");
    sel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::builder_face::split_faces;
    use crate::boolean::filler::fill;
    use crate::boolean::intersect::{face_domains, intersect_operands};
    use crate::boolean::options::BooleanOptions;
    use crate::topology::primitives::{make_box, make_polyline_wire, make_sphere};

    fn classified(store: &mut EntityStore, shapes: &[Shape]) -> (Classification, SplitData) {
        classified_with(store, shapes, false)
    }

    /// `unresolved_object` marks every face of the first operand as unresolved.
    fn classified_with(store: &mut EntityStore, shapes: &[Shape], unresolved_object: bool) -> (Classification, SplitData) {
        let ctx = OperationContext::new(&BooleanOptions::default(), 0.0);
        let ops: Vec<OperandElements> = shapes.iter().map(|s| OperandElements::collect(store, s)).collect();
        let domains = face_domains(store, &ops, &ctx);
        let table = intersect_operands(store, &ops, &domains, &ctx).unwrap();
        let mut data = fill(store, shapes, &ops, &table, &domains, &ctx).unwrap();
        split_faces(store, &ops, &domains, &mut data, &ctx).unwrap();
        let unresolved = if unresolved_object { ops[0].faces.clone() } else { Vec::new() };
        (classify(store, shapes, &ops, &domains, &data, &unresolved, &ctx).unwrap(), data)
    }

    #[test]
    fn test_second_classification_of_a_piece_fails() {
        let slot = OnceLock::new();
        assert!(fill_slot(&slot, State::In).is_ok());
        let twice = fill_slot(&slot, State::Out);
        assert!(matches!(twice, Err(BooleanFailure::TopologyInconsistent { .. })));
        assert_eq!(slot.get(), Some(&State::In));
    }

    #[test]
    fn test_overlapping_boxes_states() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let b = make_box(&mut store, Point3d::new(0.5, 0.5, 0.5), Point3d::new(1.5, 1.5, 1.5));
        let (cl, _) = classified(&mut store, &[a, b]);
        // the small squares of each split face are inside the other box
        assert_eq!(cl.count(0, State::In), 3);
        assert_eq!(cl.count(1, State::In), 3);
        assert_eq!(cl.count(0, State::Out), 6);
        assert_eq!(cl.count(1, State::Out), 6);
    }

    #[test]
    fn test_touching_boxes_are_on_opposite() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let b = make_box(&mut store, Point3d::new(1.0, 0.0, 0.0), Point3d::new(2.0, 1.0, 1.0));
        let (cl, data) = classified(&mut store, &[a, b]);
        assert_eq!(cl.count(0, State::On(Sense::Opposite)), 1);
        assert_eq!(cl.count(1, State::On(Sense::Opposite)), 1);
        assert_eq!(cl.count(0, State::In), 0);

        let fuse = select(BooleanOp::Fuse, &cl, &data, &store);
        assert_eq!(fuse.faces.len(), 10);
        let common = select(BooleanOp::Common, &cl, &data, &store);
        assert!(common.touching);
        assert_eq!(common.faces.len(), 1);
        let shared = common.faces[0].as_face().unwrap();
        assert_eq!(cl.state_of(shared), Some(State::On(Sense::Opposite)));
    }

    #[test]
    fn test_box_inside_sphere() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, Point3d::new(-0.2, -0.2, -0.2), Point3d::new(0.2, 0.2, 0.2));
        let b = make_sphere(&mut store, Point3d::ORIGIN, 1.0);
        let (cl, data) = classified(&mut store, &[a, b]);
        assert_eq!(cl.count(0, State::In), 6);
        assert_eq!(cl.count(1, State::Out), 1);
        let cut = select(BooleanOp::Cut, &cl, &data, &store);
        assert_eq!(cut.faces.len(), 0);
        let fuse = select(BooleanOp::Fuse, &cl, &data, &store);
        assert_eq!(fuse.faces.len(), 1);
    }

    #[test]
    fn test_unresolved_faces_fall_back_to_out() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, Point3d::new(-0.2, -0.2, -0.2), Point3d::new(0.2, 0.2, 0.2));
        let b = make_sphere(&mut store, Point3d::ORIGIN, 1.0);
        let (cl, _) = classified_with(&mut store, &[a, b], true);
        assert_eq!(cl.count(0, State::Out), 6);
        assert_eq!(cl.count(1, State::Out), 1);
    }

    #[test]
    fn test_wire_through_box_is_split_and_classified() {
        let mut store = EntityStore::new();
        let w = make_polyline_wire(&mut store, &[Point3d::new(-1.0, 0.5, 0.5), Point3d::new(2.0, 0.5, 0.5)]).unwrap();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let (cl, data) = classified(&mut store, &[w, b]);
        assert_eq!(cl.edges.len(), 3);
        let inside = cl.edge_states.iter().filter(|s| **s == State::In).count();
        assert_eq!(inside, 1);
        let common = select(BooleanOp::Common, &cl, &data, &store);
        assert_eq!(common.edges.len(), 1);
        let cut = select(BooleanOp::Cut, &cl, &data, &store);
        assert_eq!(cut.edges.len(), 2);
        assert!(cut.faces.is_empty());
    }
}
