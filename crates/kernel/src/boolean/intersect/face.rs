//! Face/face intersection: analytic sections or marching, then clipping to both faces.

use tracing::trace;

use crate::geometry::curve_intersection::{intersect_curves, NumericBudget};
use crate::geometry::curves::Curve;
use crate::geometry::nurbs::NurbsCurve;
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::surface_intersection::{intersect_analytic, march, refine_on_both, DualPoint, SurfaceIntersection};
use crate::geometry::transform::BoundingBox;
use crate::geometry::surfaces::Surface;
use crate::geometry::SurfaceEval;
use crate::topology::brep::{EdgeId, EntityStore, FaceId};
use crate::topology::domain::{FaceDomain, PointState};
use crate::Tolerance;

use super::PairOutcome;
use crate::boolean::context::OperationContext;
use crate::boolean::interference::{Coincidence, Element, Interference, Param, SectionCurve};

/// One side of a face/face test.
pub struct FaceSide<'a> {
    pub face: FaceId,
    pub domain: &'a FaceDomain,
}

fn boundary_edges(store: &EntityStore, face: FaceId) -> Vec<EdgeId> {
    let mut out: Vec<EdgeId> = Vec::new();
    for lp in store.faces[face].loops() {
        for &he in &store.loops[lp].half_edges {
            let e = store.half_edges[he].edge;
            if !store.edges[e].degenerate && !out.contains(&e) {
                out.push(e);
            }
        }
    }
    out
}

fn inside(domain: &FaceDomain, p: &Point3d, tol: f64) -> Option<PointState> {
    domain.classify_point(p, tol).map(|(s, _)| s)
}

/// Parameter window of a carrier curve that can reach both face boxes.
fn carrier_range(curve: &Curve, boxes: [&BoundingBox; 2]) -> Option<(f64, f64)> {
    if let Some(d) = curve.natural_domain() {
        return Some(d);
    }
    let Curve::Line(line) = curve else {
        return None;
    };
    let mut lo = f64::NEG_INFINITY;
    let mut hi = f64::INFINITY;
    for b in boxes {
        let ts = b.corners().map(|c| (c - line.origin).dot(&line.direction));
        let (mn, mx) = ts.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(a, z), t| (a.min(*t), z.max(*t)));
        lo = lo.max(mn);
        hi = hi.min(mx);
    }
    (hi > lo).then_some((lo, hi))
}

/// Largest distance of the curve from either surface.
fn deviation(curve: &Curve, range: (f64, f64), a: &FaceDomain, b: &FaceDomain) -> f64 {
    (0..=8)
        .map(|k| {
            let p = curve.evaluate(range.0 + (range.1 - range.0) * k as f64 / 8.0);
            a.surface.project(&p).distance.max(b.surface.project(&p).distance)
        })
        .fold(0.0, f64::max)
}

/// Parameters where `curve` meets the boundary of either face.
fn boundary_cuts(
    store: &EntityStore,
    curve: &Curve,
    range: (f64, f64),
    a: &FaceSide<'_>,
    b: &FaceSide<'_>,
    tol: f64,
    budget: &NumericBudget,
) -> Vec<f64> {
    let mut cuts = Vec::new();
    for side in [a, b] {
        for e in boundary_edges(store, side.face) {
            let edge = &store.edges[e];
            let res = intersect_curves(curve, range, &edge.curve, edge.range(), tol + edge.tolerance, budget);
            cuts.extend(res.points.iter().map(|h| h.t1));
            for ov in &res.overlaps {
                cuts.push(ov.range1.0);
                cuts.push(ov.range1.1);
            }
        }
    }
    cuts
}

/// Splits `curve` at every crossing with either face's boundary and keeps the
/// runs whose midpoints are inside both faces.
pub fn clip_section(
    store: &EntityStore,
    curve: &Curve,
    a: &FaceSide<'_>,
    b: &FaceSide<'_>,
    tol: f64,
    budget: &NumericBudget,
) -> Vec<SectionCurve> {
    let boxes = [
        store.face_bounding_box(a.face).expanded(tol),
        store.face_bounding_box(b.face).expanded(tol),
    ];
    let Some(range) = carrier_range(curve, [&boxes[0], &boxes[1]]) else {
        return Vec::new();
    };
    let mut cuts = vec![range.0, range.1];
    cuts.extend(boundary_cuts(store, curve, range, a, b, tol, budget));
    cuts.retain(|t| *t >= range.0 && *t <= range.1);
    cuts.sort_by(|x, y| x.total_cmp(y));
    let eps = 1e-12 * (range.1 - range.0).abs().max(1.0);
    cuts.dedup_by(|x, y| (*x - *y).abs() <= eps);

    let keep: Vec<bool> = cuts
        .windows(2)
        .map(|w| {
            let p = curve.evaluate(0.5 * (w[0] + w[1]));
            inside(a.domain, &p, tol) == Some(PointState::Inside) && inside(b.domain, &p, tol) == Some(PointState::Inside)
        })
        .collect();

    let mut runs: Vec<(f64, f64)> = Vec::new();
    for (w, k) in cuts.windows(2).zip(&keep) {
        if !*k {
            continue;
        }
        match runs.last_mut() {
            Some(last) if (last.1 - w[0]).abs() <= eps => last.1 = w[1],
            _ => runs.push((w[0], w[1])),
        }
    }

    let period = curve.period();
    let mut closed = false;
    if let Some(p) = period {
        if runs.len() == 1 && (runs[0].1 - runs[0].0 - p).abs() <= eps {
            closed = true;
        } else if runs.len() > 1 {
            let first = runs[0];
            let n = runs.len() - 1;
            if (first.0 - range.0).abs() <= eps && (runs[n].1 - range.1).abs() <= eps {
                // the run crossing the period seam
                runs[n].1 = first.1 + p;
                runs.remove(0);
            }
        }
    } else if runs.len() == 1
        && (runs[0].0 - range.0).abs() <= eps
        && (runs[0].1 - range.1).abs() <= eps
        && curve.evaluate(range.0).distance_to(&curve.evaluate(range.1)) <= tol
    {
        // a loop returning to its start, such as a marched trace
        closed = true;
    }

    runs.into_iter()
        .filter(|r| curve.length(r.0, r.1) > tol)
        .map(|r| SectionCurve {
            curve: curve.clone(),
            range: r,
            closed,
            tolerance: deviation(curve, r, a.domain, b.domain)
                .max(store.faces[a.face].tolerance)
                .max(store.faces[b.face].tolerance),
        })
        .collect()
}

/// Numeric same-surface test on points sampled inside each face.
fn sampled_same_domain(a: &FaceSide<'_>, b: &FaceSide<'_>, tol: f64, ctx: &OperationContext) -> bool {
    let policy = &ctx.options.same_domain;
    let gap = policy.gap_factor * tol;
    let mut tested = 0;
    for (from, to) in [(a, b), (b, a)] {
        for uv in from.domain.interior_samples().into_iter().take(policy.samples.max(1)) {
            let p = from.domain.surface.evaluate_uv(&uv);
            let proj = to.domain.surface.project(&p);
            if proj.distance > gap {
                return false;
            }
            let n1 = from.domain.surface.normal_at(uv.x, uv.y);
            let n2 = to.domain.surface.normal_at(proj.uv.x, proj.uv.y);
            let sin = n1.cross(&n2).length();
            if sin > policy.angular_tolerance.sin() {
                return false;
            }
            tested += 1;
        }
    }
    tested > 0
}

fn section_records(a: FaceId, b: FaceId, sections: Vec<SectionCurve>) -> impl Iterator<Item = Interference> {
    sections.into_iter().map(move |s| Interference {
        a: Element::Face(a),
        param_a: Param::None,
        b: Element::Face(b),
        param_b: Param::None,
        point: s.start(),
        tolerance: s.tolerance,
        coincidence: Coincidence::Section(s),
    })
}

fn marching_seeds(store: &EntityStore, a: &FaceSide<'_>, b: &FaceSide<'_>, tol: f64, budget: &NumericBudget) -> Vec<Point3d> {
    let mut seeds = Vec::new();
    for (edges_of, surface) in [(a, &b.domain.surface), (b, &a.domain.surface)] {
        for e in boundary_edges(store, edges_of.face) {
            let edge = &store.edges[e];
            let res = surface.intersect_curve(&edge.curve, edge.range(), tol, budget);
            seeds.extend(res.points.iter().map(|h| h.point));
        }
    }
    let (min, max) = (a.domain.min, a.domain.max);
    for i in 0..8 {
        for j in 0..8 {
            let uv = Point2d::new(
                min.x + (max.x - min.x) * (i as f64 + 0.5) / 8.0,
                min.y + (max.y - min.y) * (j as f64 + 0.5) / 8.0,
            );
            if a.domain.classify_uv(uv, 1e-9) == PointState::Inside {
                seeds.push(a.domain.surface.evaluate_uv(&uv));
            }
        }
    }
    seeds
}

/// Largest number of times one marched chord is halved.
const MAX_HALVINGS: usize = 8;

/// Inserts points on both surfaces until every chord midpoint lies within `sag` of them.
struct ChordRefiner<'a> {
    sa: &'a Surface,
    sb: &'a Surface,
    sag: f64,
    tol: f64,
    iterations: usize,
}

impl ChordRefiner<'_> {
    fn split(&self, a: Point3d, b: Point3d, depth: usize, out: &mut Vec<Point3d>) {
        let m = a.midpoint(&b);
        if depth == 0 || self.sa.project(&m).distance.max(self.sb.project(&m).distance) <= self.sag {
            return;
        }
        let Some(q) = refine_on_both(self.sa, self.sb, &m, self.iterations, self.tol) else {
            return;
        };
        if q.point.distance_to(&a) <= 1e-10 || q.point.distance_to(&b) <= 1e-10 {
            return;
        }
        self.split(a, q.point, depth - 1, out);
        out.push(q.point);
        self.split(q.point, b, depth - 1, out);
    }

    fn densify(&self, pts: &[Point3d]) -> Vec<Point3d> {
        let mut out = Vec::with_capacity(pts.len());
        for (i, w) in pts.windows(2).enumerate() {
            if i == 0 {
                out.push(w[0]);
            }
            self.split(w[0], w[1], MAX_HALVINGS, &mut out);
            out.push(w[1]);
        }
        out
    }
}

fn segment_gap(a: &Point3d, b: &Point3d, p: &Point3d) -> f64 {
    let d = *b - *a;
    let len2 = d.dot(&d);
    if len2 <= 1e-300 {
        return a.distance_to(p);
    }
    let t = ((*p - *a).dot(&d) / len2).clamp(0.0, 1.0);
    (*a + d * t).distance_to(p)
}

/// Reorders a closed polyline (last point equal to the first) so that it
/// starts and ends at `at`, a point lying on it.
fn restart_loop(pts: &[Point3d], at: Point3d) -> Vec<Point3d> {
    let ring = &pts[..pts.len() - 1];
    let n = ring.len();
    if n < 3 {
        return pts.to_vec();
    }
    let gap = |i: usize| segment_gap(&ring[i], &ring[(i + 1) % n], &at);
    let k = (0..n).min_by(|i, j| gap(*i).total_cmp(&gap(*j))).unwrap_or(0);
    let mut out = vec![at];
    for s in 1..=n {
        let p = ring[(k + s) % n];
        if out.last().is_none_or(|q| q.distance_to(&p) > 1e-10) {
            out.push(p);
        }
    }
    if out.len() > 1 && out[out.len() - 1].distance_to(&at) <= 1e-10 {
        out.pop();
    }
    out.push(at);
    out
}

/// First point where a closed trace meets a face boundary away from its start.
fn boundary_point_on_loop(store: &EntityStore, pts: &[Point3d], a: &FaceSide<'_>, b: &FaceSide<'_>, tol: f64, budget: &NumericBudget) -> Option<Point3d> {
    let curve = Curve::Nurbs(NurbsCurve::polyline(pts)?);
    let range = curve.natural_domain()?;
    let eps = 1e-9 * (range.1 - range.0).abs().max(1.0);
    let mut cuts = boundary_cuts(store, &curve, range, a, b, tol, budget);
    cuts.retain(|t| *t > range.0 + eps && *t < range.1 - eps);
    cuts.sort_by(|x, y| x.total_cmp(y));
    cuts.first().map(|t| curve.evaluate(*t))
}

fn march_sections(
    store: &EntityStore,
    a: &FaceSide<'_>,
    b: &FaceSide<'_>,
    tol: f64,
    ctx: &OperationContext,
    out: &mut PairOutcome,
) {
    let budget = ctx.options.budget.numeric();
    let (sa, sb) = (&a.domain.surface, &b.domain.surface);
    let span = store
        .face_bounding_box(a.face)
        .diagonal()
        .min(store.face_bounding_box(b.face).diagonal());
    let step = (span / 64.0).max(10.0 * tol);
    let sag = (1e-6 * span).max(tol);
    let settings = ctx.options.budget.march(step, tol);
    let in_both = |d: &DualPoint| {
        a.domain.classify_uv(d.uv1, a.domain.uv_tolerance(d.uv1, tol)) != PointState::Outside
            && b.domain.classify_uv(d.uv2, b.domain.uv_tolerance(d.uv2, tol)) != PointState::Outside
    };

    let mut traces: Vec<(Vec<Point3d>, bool)> = Vec::new();
    for seed in marching_seeds(store, a, b, tol, &budget) {
        let Some(dual) = refine_on_both(sa, sb, &seed, settings.iterations, tol) else {
            continue;
        };
        if !in_both(&dual) || traces.iter().flat_map(|(t, _)| t).any(|p| p.distance_to(&dual.point) <= step) {
            continue;
        }
        let walk = march(sa, sb, dual, &settings, &in_both);
        out.unresolved |= walk.truncated;
        let mut pts: Vec<Point3d> = Vec::with_capacity(walk.points.len());
        for d in &walk.points {
            if pts.last().is_none_or(|q| q.distance_to(&d.point) > 1e-10) {
                pts.push(d.point);
            }
        }
        let closed = walk.closed && pts.len() > 2;
        if closed && pts[0].distance_to(&pts[pts.len() - 1]) > 1e-10 {
            pts.push(pts[0]);
        }
        if pts.len() >= 2 {
            traces.push((pts, closed));
        }
    }

    let refiner = ChordRefiner {
        sa,
        sb,
        sag,
        tol,
        iterations: settings.iterations.max(16),
    };
    for (pts, closed) in traces {
        let mut pts = refiner.densify(&pts);
        if closed {
            // start the loop on a boundary so no extra vertex lands inside the faces
            if let Some(at) = boundary_point_on_loop(store, &pts, a, b, tol, &budget) {
                pts = restart_loop(&pts, at);
            }
        }
        let Some(nurbs) = NurbsCurve::polyline(&pts) else {
            continue;
        };
        let chord_dev = pts
            .windows(2)
            .map(|w| {
                let m = w[0].midpoint(&w[1]);
                sa.project(&m).distance.max(sb.project(&m).distance)
            })
            .fold(0.0, f64::max);
        let curve = Curve::Nurbs(nurbs);
        let mut sections = clip_section(store, &curve, a, b, tol.max(chord_dev), &budget);
        for s in &mut sections {
            s.tolerance = s.tolerance.max(chord_dev);
        }
        trace!(points = pts.len(), closed, pieces = sections.len(), chord_dev, "marched section");
        out.records.extend(section_records(a.face, b.face, sections));
    }
}

/// Intersects two faces of different operands.
pub fn face_face(store: &EntityStore, a: FaceSide<'_>, b: FaceSide<'_>, ctx: &OperationContext) -> PairOutcome {
    let mut out = PairOutcome::default();
    let (fa, fb) = (&store.faces[a.face], &store.faces[b.face]);
    let tol = fa.tolerance + fb.tolerance + ctx.fuzzy;
    let budget = ctx.options.budget.numeric();
    let analytic_tol = Tolerance {
        coincidence: tol,
        ..ctx.tolerance
    };

    let same_domain = |out: &mut PairOutcome| {
        out.records.push(Interference {
            a: Element::Face(a.face),
            param_a: Param::None,
            b: Element::Face(b.face),
            param_b: Param::None,
            point: store.face_bounding_box(a.face).center(),
            tolerance: tol,
            coincidence: Coincidence::SameDomain,
        });
    };

    match intersect_analytic(&fa.surface, &fb.surface, &analytic_tol) {
        Some(SurfaceIntersection::None) => {}
        Some(SurfaceIntersection::Coincident) => same_domain(&mut out),
        Some(SurfaceIntersection::Point(p)) => {
            let on = |d: &FaceDomain| inside(d, &p, tol).is_some_and(|s| s != PointState::Outside);
            if on(a.domain) && on(b.domain) {
                out.records.push(Interference {
                    a: Element::Face(a.face),
                    param_a: Param::Surface(a.domain.surface.project(&p).uv),
                    b: Element::Face(b.face),
                    param_b: Param::Surface(b.domain.surface.project(&p).uv),
                    point: p,
                    tolerance: tol,
                    coincidence: Coincidence::Touch,
                });
            }
        }
        Some(curves) => {
            for curve in curves.curves() {
                let sections = clip_section(store, &curve, &a, &b, tol, &budget);
                out.records.extend(section_records(a.face, b.face, sections));
            }
        }
        None if sampled_same_domain(&a, &b, tol, ctx) => same_domain(&mut out),
        None => march_sections(store, &a, &b, tol, ctx, &mut out),
    }
    out
}
