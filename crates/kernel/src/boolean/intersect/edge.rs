//! Edge/edge and edge/face tests.

use crate::geometry::curve_intersection::NumericBudget;
use crate::geometry::point::Point3d;
use crate::geometry::SurfaceEval;
use crate::geometry::CurveEval;
use crate::topology::brep::{EdgeId, EntityStore, FaceId};
use crate::topology::domain::{FaceDomain, PointState};

use super::PairOutcome;
use crate::boolean::interference::{Coincidence, Element, Interference, Param};

/// True when `p` falls within the tolerance ball of one of the edge's end vertices.
fn near_end(store: &EntityStore, e: EdgeId, p: &Point3d, fuzzy: f64) -> bool {
    let edge = &store.edges[e];
    [edge.start_vertex, edge.end_vertex].iter().any(|&v| {
        let vx = &store.vertices[v];
        vx.point.distance_to(p) <= vx.tolerance + edge.tolerance + fuzzy
    })
}

/// Crossings interior to both edges, and coincident stretches.
pub fn edge_edge(store: &EntityStore, a: EdgeId, b: EdgeId, fuzzy: f64, budget: &NumericBudget) -> PairOutcome {
    let mut out = PairOutcome::default();
    let (ea, eb) = (&store.edges[a], &store.edges[b]);
    if ea.degenerate || eb.degenerate {
        return out;
    }
    let tol = ea.tolerance + eb.tolerance + fuzzy;
    let res = ea.curve.intersect_with(ea.range(), &eb.curve, eb.range(), tol, budget);
    out.unresolved = res.unresolved;
    for hit in &res.points {
        // contact at a vertex is found by the vertex tests
        if near_end(store, a, &hit.point, fuzzy) || near_end(store, b, &hit.point, fuzzy) {
            continue;
        }
        out.records.push(Interference::point(
            Element::Edge(a),
            Param::Curve(hit.t1),
            Element::Edge(b),
            Param::Curve(hit.t2),
            hit.point,
            hit.distance,
        ));
    }
    for ov in &res.overlaps {
        let (t0, t1) = ov.range1;
        if ea.curve.length(t0, t1) <= tol {
            continue;
        }
        out.records.push(Interference {
            a: Element::Edge(a),
            param_a: Param::Range(t0, t1),
            b: Element::Edge(b),
            param_b: Param::Range(ov.range2.0, ov.range2.1),
            point: ea.curve.evaluate(0.5 * (t0 + t1)),
            tolerance: tol,
            coincidence: Coincidence::Overlap {
                same_direction: ov.same_direction,
            },
        });
    }
    out
}

/// Piercing points strictly inside the face, and stretches of the edge lying on it.
pub fn edge_face(
    store: &EntityStore,
    e: EdgeId,
    f: FaceId,
    domain: &FaceDomain,
    fuzzy: f64,
    budget: &NumericBudget,
) -> PairOutcome {
    let mut out = PairOutcome::default();
    let edge = &store.edges[e];
    if edge.degenerate {
        return out;
    }
    let tol = edge.tolerance + store.faces[f].tolerance + fuzzy;
    let res = domain.surface.intersect_curve(&edge.curve, edge.range(), tol, budget);
    out.unresolved = res.unresolved;
    for hit in &res.points {
        if near_end(store, e, &hit.point, fuzzy) {
            continue;
        }
        if domain.classify_uv(hit.uv, domain.uv_tolerance(hit.uv, tol)) != PointState::Inside {
            continue;
        }
        out.records.push(Interference::point(
            Element::Edge(e),
            Param::Curve(hit.t),
            Element::Face(f),
            Param::Surface(domain.unwrap(hit.uv, domain.uv_tolerance(hit.uv, tol))),
            hit.point,
            hit.distance,
        ));
    }
    for &(t0, t1) in &res.overlaps {
        if edge.curve.length(t0, t1) <= tol {
            continue;
        }
        let touches_interior = (1..8).any(|k| {
            let p = edge.curve.evaluate(t0 + (t1 - t0) * k as f64 / 8.0);
            matches!(domain.classify_point(&p, tol), Some((PointState::Inside, _)))
        });
        if !touches_interior {
            continue;
        }
        out.records.push(Interference {
            a: Element::Edge(e),
            param_a: Param::Range(t0, t1),
            b: Element::Face(f),
            param_b: Param::None,
            point: edge.curve.evaluate(0.5 * (t0 + t1)),
            tolerance: tol,
            coincidence: Coincidence::Overlap { same_direction: true },
        });
    }
    out
}
