//! Curve/curve and curve/surface intersection.
//!
//! Analytic pairs go through closed forms. Everything else is sampled,
//! seeded, and refined with Newton iterations. Stretches where the two carriers
//! coincide within tolerance come back as parameter ranges.

use nalgebra::{Matrix2, Vector2};
use std::f64::consts::PI;

use super::curves::{Circle3d, Curve, Line3d, wrap_angle};
use super::intersection::{line_line_closest, line_surface_params};
use super::point::{Point2d, Point3d};
use super::surfaces::{Plane, Surface};

#[derive(Debug, Clone, Copy)]
pub struct CurveHit {
    pub t1: f64,
    pub t2: f64,
    pub point: Point3d,
    pub distance: f64,
}

/// A coincident stretch; `range2` is sorted, `same_direction` tells whether
/// the parameters grow together.
#[derive(Debug, Clone, Copy)]
pub struct CurveOverlap {
    pub range1: (f64, f64),
    pub range2: (f64, f64),
    pub same_direction: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CurveCurveIntersection {
    pub points: Vec<CurveHit>,
    pub overlaps: Vec<CurveOverlap>,
    /// A seed was found but the refinement did not converge.
    pub unresolved: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CurveSurfaceHit {
    pub t: f64,
    pub uv: Point2d,
    pub point: Point3d,
    pub distance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CurveSurfaceIntersection {
    pub points: Vec<CurveSurfaceHit>,
    pub overlaps: Vec<(f64, f64)>,
    pub unresolved: bool,
}

/// Sampling density and iteration cap of the numeric paths.
#[derive(Debug, Clone, Copy)]
pub struct NumericBudget {
    pub samples: usize,
    pub iterations: usize,
}

impl Default for NumericBudget {
    fn default() -> Self {
        Self {
            samples: 64,
            iterations: 32,
        }
    }
}

fn sorted(r: (f64, f64)) -> (f64, f64) {
    if r.0 <= r.1 { r } else { (r.1, r.0) }
}

fn in_range(t: f64, r: (f64, f64), slack: f64) -> bool {
    t >= r.0 - slack && t <= r.1 + slack
}

fn uniform(r: (f64, f64), n: usize) -> Vec<f64> {
    (0..=n).map(|i| r.0 + (r.1 - r.0) * i as f64 / n as f64).collect()
}

/// Parameter slack matching a 3D tolerance on a circle-like curve.
fn param_slack(curve: &Curve, tol: f64) -> f64 {
    match curve {
        Curve::Circle(c) => tol / c.radius.max(1e-12),
        Curve::Ellipse(e) => tol / e.minor_radius.max(1e-12),
        _ => tol,
    }
}

// ─── Curve / curve ───────────────────────────────────────────────────────────

/// Intersects `c1` over `r1` with `c2` over `r2`.
pub fn intersect_curves(
    c1: &Curve,
    r1: (f64, f64),
    c2: &Curve,
    r2: (f64, f64),
    tol: f64,
    budget: &NumericBudget,
) -> CurveCurveIntersection {
    let r1 = sorted(r1);
    let r2 = sorted(r2);
    let mut out = match (c1, c2) {
        (Curve::Line(a), Curve::Line(b)) => line_line(a, r1, b, r2, tol),
        (Curve::Line(l), Curve::Circle(c)) => line_circle(l, r1, c, c2, r2, tol, false),
        (Curve::Circle(c), Curve::Line(l)) => line_circle(l, r2, c, c1, r1, tol, true),
        (Curve::Circle(a), Curve::Circle(b)) if !co_circular(a, b, tol) => {
            circle_circle(a, c1, r1, b, c2, r2, tol)
        }
        _ => numeric_curves(c1, r1, c2, r2, tol, budget),
    };
    out.points.sort_by(|a, b| a.t1.total_cmp(&b.t1));
    let mut kept: Vec<CurveHit> = Vec::with_capacity(out.points.len());
    for hit in out.points.drain(..) {
        let inside_overlap = out.overlaps.iter().any(|o| in_range(hit.t1, o.range1, param_slack(c1, tol)));
        let duplicate = kept.iter().any(|k| k.point.distance_to(&hit.point) <= tol);
        if !inside_overlap && !duplicate {
            kept.push(hit);
        }
    }
    out.points = kept;
    out
}

fn line_line(a: &Line3d, r1: (f64, f64), b: &Line3d, r2: (f64, f64), tol: f64) -> CurveCurveIntersection {
    let mut out = CurveCurveIntersection::default();
    if a.direction.cross(&b.direction).length() < 1e-12 {
        if b.distance_to_point(&a.origin) > tol {
            return out;
        }
        let to_a = |t2: f64| (b.evaluate(t2) - a.origin).dot(&a.direction);
        let to_b = |t1: f64| (a.evaluate(t1) - b.origin).dot(&b.direction);
        let (s0, s1) = sorted((to_a(r2.0), to_a(r2.1)));
        let lo = r1.0.max(s0);
        let hi = r1.1.min(s1);
        if hi - lo > tol {
            out.overlaps.push(CurveOverlap {
                range1: (lo, hi),
                range2: sorted((to_b(lo), to_b(hi))),
                same_direction: a.direction.dot(&b.direction) > 0.0,
            });
        } else if hi - lo >= -tol {
            // collinear segments meeting end to end
            let t1 = (0.5 * (lo + hi)).clamp(r1.0, r1.1);
            let t2 = to_b(t1).clamp(r2.0, r2.1);
            let (p1, p2) = (a.evaluate(t1), b.evaluate(t2));
            out.points.push(CurveHit {
                t1,
                t2,
                point: p1.midpoint(&p2),
                distance: p1.distance_to(&p2),
            });
        }
        return out;
    }
    if let Some((_, t1, _, t2, d)) = line_line_closest(a, b) {
        if d <= tol && in_range(t1, r1, tol) && in_range(t2, r2, tol) {
            let t1 = t1.clamp(r1.0, r1.1);
            let t2 = t2.clamp(r2.0, r2.1);
            let (p1, p2) = (a.evaluate(t1), b.evaluate(t2));
            let distance = p1.distance_to(&p2);
            if distance <= tol {
                out.points.push(CurveHit {
                    t1,
                    t2,
                    point: p1.midpoint(&p2),
                    distance,
                });
            }
        }
    }
    out
}

fn line_circle(
    l: &Line3d,
    rl: (f64, f64),
    c: &Circle3d,
    curve_c: &Curve,
    rc: (f64, f64),
    tol: f64,
    swapped: bool,
) -> CurveCurveIntersection {
    let mut out = CurveCurveIntersection::default();
    let n = c.normal;
    let dn = l.direction.dot(&n);
    let h0 = (l.origin - c.center).dot(&n);
    let mut candidates = Vec::new();
    if dn.abs() < 1e-12 {
        if h0.abs() > tol {
            return out;
        }
        let w = (l.origin - c.center).reject_from(&n);
        let b = w.dot(&l.direction);
        let disc = b * b - (w.dot(&w) - c.radius * c.radius);
        if disc > 0.0 {
            let sq = disc.sqrt();
            candidates.push(-b - sq);
            candidates.push(-b + sq);
        } else {
            candidates.push(-b);
        }
    } else {
        candidates.push(-h0 / dn);
    }
    let slack = tol / c.radius.max(1e-12);
    for t in candidates {
        if !in_range(t, rl, tol) {
            continue;
        }
        let t = t.clamp(rl.0, rl.1);
        let p = l.evaluate(t);
        let Some(radial) = (p - c.center).reject_from(&n).normalized() else {
            continue;
        };
        let on_circle = c.center + radial * c.radius;
        let distance = p.distance_to(&on_circle);
        if distance > tol {
            continue;
        }
        let a = curve_c.normalize_param(c.angle_of(&p), rc, 1e-12);
        if !in_range(a, rc, slack) {
            continue;
        }
        let a = a.clamp(rc.0, rc.1);
        let (t1, t2) = if swapped { (a, t) } else { (t, a) };
        out.points.push(CurveHit {
            t1,
            t2,
            point: p.midpoint(&c.evaluate(a)),
            distance: p.distance_to(&c.evaluate(a)),
        });
    }
    out
}

fn co_circular(a: &Circle3d, b: &Circle3d, tol: f64) -> bool {
    a.center.distance_to(&b.center) <= tol
        && (a.radius - b.radius).abs() <= tol
        && a.normal.cross(&b.normal).length() < 1e-9
}

/// Angles where a circle crosses a plane, including a tangent touch.
pub fn circle_plane_angles(c: &Circle3d, plane: &Plane, tol: f64) -> Vec<f64> {
    let a = c.radius * c.x_axis.dot(&plane.normal);
    let b = c.radius * c.y_axis().dot(&plane.normal);
    let k = plane.distance_to_point(&c.center);
    // k + a cos(t) + b sin(t) = 0, with a cos + b sin = r cos(t - phi)
    let r = a.hypot(b);
    if r < 1e-15 {
        return vec![];
    }
    let phi = b.atan2(a);
    let q = -k / r;
    if q.abs() > 1.0 {
        if k.abs() - r <= tol {
            let t = if k > 0.0 { phi + PI } else { phi };
            return vec![wrap_angle(t)];
        }
        return vec![];
    }
    let delta = q.acos();
    if delta < 1e-9 || (PI - delta) < 1e-9 {
        return vec![wrap_angle(phi + delta)];
    }
    vec![wrap_angle(phi + delta), wrap_angle(phi - delta)]
}

fn circle_circle(
    a: &Circle3d,
    ca: &Curve,
    ra: (f64, f64),
    b: &Circle3d,
    cb: &Curve,
    rb: (f64, f64),
    tol: f64,
) -> CurveCurveIntersection {
    let mut out = CurveCurveIntersection::default();
    let parallel = a.normal.cross(&b.normal).length() < 1e-9;
    let mut pts = Vec::new();
    if parallel {
        if (b.center - a.center).dot(&a.normal).abs() > tol {
            return out;
        }
        let offset = (b.center - a.center).reject_from(&a.normal);
        let d = offset.length();
        if d < 1e-12 || d > a.radius + b.radius + tol || d < (a.radius - b.radius).abs() - tol {
            return out;
        }
        let ex = offset / d;
        let ey = a.normal.cross(&ex);
        let x = (d * d + a.radius * a.radius - b.radius * b.radius) / (2.0 * d);
        let h = (a.radius * a.radius - x * x).max(0.0).sqrt();
        let base = a.center + ex * x;
        if h <= 0.5 * tol {
            pts.push(base);
        } else {
            pts.push(base + ey * h);
            pts.push(base - ey * h);
        }
    } else {
        let plane_b = Plane::new(b.center, b.normal);
        pts.extend(circle_plane_angles(a, &plane_b, tol).into_iter().map(|t| a.evaluate(t)));
    }
    for p in pts {
        let ta = ca.normalize_param(a.angle_of(&p), ra, 1e-12);
        let tb = cb.normalize_param(b.angle_of(&p), rb, 1e-12);
        if !in_range(ta, ra, tol / a.radius) || !in_range(tb, rb, tol / b.radius) {
            continue;
        }
        let (ta, tb) = (ta.clamp(ra.0, ra.1), tb.clamp(rb.0, rb.1));
        let (pa, pb) = (a.evaluate(ta), b.evaluate(tb));
        let distance = pa.distance_to(&pb);
        if distance <= tol {
            out.points.push(CurveHit {
                t1: ta,
                t2: tb,
                point: pa.midpoint(&pb),
                distance,
            });
        }
    }
    out
}

/// Closest points of two segments: (distance, s on the first, u on the second).
fn segment_distance(a0: &Point3d, a1: &Point3d, b0: &Point3d, b1: &Point3d) -> (f64, f64, f64) {
    let d1 = *a1 - *a0;
    let d2 = *b1 - *b0;
    let r = *a0 - *b0;
    let a = d1.dot(&d1);
    let e = d2.dot(&d2);
    let f = d2.dot(&r);
    let (s, u) = if a < 1e-300 && e < 1e-300 {
        (0.0, 0.0)
    } else if a < 1e-300 {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(&r);
        if e < 1e-300 {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;
            let mut s = if denom > 1e-300 { ((b * f - c * e) / denom).clamp(0.0, 1.0) } else { 0.0 };
            let mut u = (b * s + f) / e;
            if u < 0.0 {
                u = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if u > 1.0 {
                u = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, u)
        }
    };
    let pa = *a0 + d1 * s;
    let pb = *b0 + d2 * u;
    (pa.distance_to(&pb), s, u)
}

/// Largest chord deviation of the sampled polyline, doubled.
fn polyline_sag(curve: &Curve, ts: &[f64], pts: &[Point3d]) -> f64 {
    let mut sag: f64 = 0.0;
    for i in 0..ts.len().saturating_sub(1) {
        let mid = curve.evaluate(0.5 * (ts[i] + ts[i + 1]));
        sag = sag.max(mid.distance_to(&pts[i].midpoint(&pts[i + 1])));
    }
    2.0 * sag
}

#[derive(Debug, Clone, Copy)]
struct Refined {
    t1: f64,
    t2: f64,
    distance: f64,
    converged: bool,
}

/// Gauss-Newton on `c1(t1) - c2(t2) = 0`, switching to alternating projection
/// when the normal matrix is singular (tangent contact).
fn refine_curve_pair(
    c1: &Curve,
    r1: (f64, f64),
    c2: &Curve,
    r2: (f64, f64),
    mut t1: f64,
    mut t2: f64,
    iterations: usize,
) -> Refined {
    let mut converged = false;
    for _ in 0..iterations {
        let f = c1.evaluate(t1) - c2.evaluate(t2);
        let d1 = c1.derivative(t1);
        let d2 = c2.derivative(t2);
        let off = -d1.dot(&d2);
        let jtj = Matrix2::new(d1.dot(&d1), off, off, d2.dot(&d2));
        let jtf = Vector2::new(d1.dot(&f), -d2.dot(&f));
        let Some(step) = jtj.lu().solve(&(-jtf)) else {
            break;
        };
        let n1 = (t1 + step.x).clamp(r1.0, r1.1);
        let n2 = (t2 + step.y).clamp(r2.0, r2.1);
        let moved = (n1 - t1).abs() + (n2 - t2).abs();
        t1 = n1;
        t2 = n2;
        if !moved.is_finite() {
            break;
        }
        if moved < 1e-14 * (1.0 + t1.abs() + t2.abs()) {
            converged = true;
            break;
        }
    }
    if !converged {
        for _ in 0..iterations * 2 {
            let n2 = c2.project(&c1.evaluate(t1), r2).param;
            let n1 = c1.project(&c2.evaluate(n2), r1).param;
            let moved = (n1 - t1).abs() + (n2 - t2).abs();
            t1 = n1;
            t2 = n2;
            if moved < 1e-12 * (1.0 + t1.abs() + t2.abs()) {
                converged = true;
                break;
            }
        }
    }
    Refined {
        t1,
        t2,
        distance: c1.evaluate(t1).distance_to(&c2.evaluate(t2)),
        converged,
    }
}

/// Coincident stretches of `c1` lying on `c2`, found by projecting samples.
fn sampled_curve_overlaps(
    c1: &Curve,
    r1: (f64, f64),
    c2: &Curve,
    r2: (f64, f64),
    tol: f64,
    samples: usize,
) -> Vec<CurveOverlap> {
    let on = |t: f64| c2.project(&c1.evaluate(t), r2).distance <= tol;
    let map = |t: f64| c2.project(&c1.evaluate(t), r2).param;

    // c2 entirely inside c1
    let back = |t: f64| c1.project(&c2.evaluate(t), r1);
    let (s, m, e) = (back(r2.0), back(0.5 * (r2.0 + r2.1)), back(r2.1));
    if s.distance <= tol && m.distance <= tol && e.distance <= tol && (s.param - e.param).abs() > param_slack(c1, tol) {
        return vec![CurveOverlap {
            range1: sorted((s.param, e.param)),
            range2: r2,
            same_direction: e.param > s.param,
        }];
    }

    let n = samples.max(8);
    let ts = uniform(r1, n);
    let flags: Vec<bool> = ts.iter().map(|&t| on(t)).collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < ts.len() {
        if !flags[i] {
            i += 1;
            continue;
        }
        let mut j = i;
        while j + 1 < ts.len() && flags[j + 1] && on(0.5 * (ts[j] + ts[j + 1])) {
            j += 1;
        }
        if j > i {
            let lo = if i == 0 { ts[0] } else { bisect_edge(&on, ts[i - 1], ts[i]) };
            let hi = if j + 1 == ts.len() { ts[j] } else { bisect_edge(&on, ts[j + 1], ts[j]) };
            if c1.length(lo, hi) > tol {
                let (m0, m1) = (map(lo), map(hi));
                out.push(CurveOverlap {
                    range1: (lo, hi),
                    range2: sorted((m0, m1)),
                    same_direction: m1 >= m0,
                });
            }
        }
        i = j + 1;
    }
    out
}

/// Boundary of a predicate between `outside` (false) and `inside` (true).
fn bisect_edge(pred: &dyn Fn(f64) -> bool, mut outside: f64, mut inside: f64) -> f64 {
    for _ in 0..48 {
        let mid = 0.5 * (outside + inside);
        if pred(mid) {
            inside = mid;
        } else {
            outside = mid;
        }
    }
    inside
}

fn numeric_curves(
    c1: &Curve,
    r1: (f64, f64),
    c2: &Curve,
    r2: (f64, f64),
    tol: f64,
    budget: &NumericBudget,
) -> CurveCurveIntersection {
    let mut out = CurveCurveIntersection {
        overlaps: sampled_curve_overlaps(c1, r1, c2, r2, tol, budget.samples),
        ..Default::default()
    };
    let n = budget.samples.max(8);
    let ts1 = uniform(r1, n);
    let ts2 = uniform(r2, n);
    let p1: Vec<Point3d> = ts1.iter().map(|&t| c1.evaluate(t)).collect();
    let p2: Vec<Point3d> = ts2.iter().map(|&t| c2.evaluate(t)).collect();
    let reach = polyline_sag(c1, &ts1, &p1) + polyline_sag(c2, &ts2, &p2) + tol;
    let slack = param_slack(c1, tol);

    for i in 0..n {
        for j in 0..n {
            let (d, s, u) = segment_distance(&p1[i], &p1[i + 1], &p2[j], &p2[j + 1]);
            if d > reach {
                continue;
            }
            let t1 = ts1[i] + (ts1[i + 1] - ts1[i]) * s;
            let t2 = ts2[j] + (ts2[j + 1] - ts2[j]) * u;
            if out.overlaps.iter().any(|o| in_range(t1, o.range1, slack)) {
                continue;
            }
            let r = refine_curve_pair(c1, r1, c2, r2, t1, t2, budget.iterations);
            if r.distance <= tol {
                out.points.push(CurveHit {
                    t1: r.t1,
                    t2: r.t2,
                    point: c1.evaluate(r.t1).midpoint(&c2.evaluate(r.t2)),
                    distance: r.distance,
                });
            } else if !r.converged {
                out.unresolved = true;
            }
        }
    }
    out
}

// ─── Curve / surface ─────────────────────────────────────────────────────────

/// Intersects `curve` over `range` with the untrimmed `surface`.
pub fn intersect_curve_surface(
    curve: &Curve,
    range: (f64, f64),
    surface: &Surface,
    tol: f64,
    budget: &NumericBudget,
) -> CurveSurfaceIntersection {
    let range = sorted(range);
    let mut out = match (curve, surface) {
        (Curve::Line(_), Surface::Nurbs(_)) => curve_surface_numeric(curve, range, surface, tol, budget),
        (Curve::Line(l), _) => line_surface(curve, l, range, surface, tol, budget),
        (Curve::Circle(c), Surface::Plane(p)) => circle_plane(curve, c, range, p, tol),
        _ => curve_surface_numeric(curve, range, surface, tol, budget),
    };
    finish_surface_hits(&mut out, curve, tol);
    out
}

fn surface_hit(curve: &Curve, surface: &Surface, t: f64) -> CurveSurfaceHit {
    let point = curve.evaluate(t);
    let pr = surface.project(&point);
    CurveSurfaceHit {
        t,
        uv: pr.uv,
        point,
        distance: pr.distance,
    }
}

fn finish_surface_hits(out: &mut CurveSurfaceIntersection, curve: &Curve, tol: f64) {
    out.points.sort_by(|a, b| a.t.total_cmp(&b.t));
    let slack = param_slack(curve, tol);
    let mut kept: Vec<CurveSurfaceHit> = Vec::with_capacity(out.points.len());
    for hit in out.points.drain(..) {
        if out.overlaps.iter().any(|o| in_range(hit.t, *o, slack)) {
            continue;
        }
        match kept.iter_mut().find(|k| k.point.distance_to(&hit.point) <= tol) {
            Some(k) if hit.distance < k.distance => *k = hit,
            Some(_) => {}
            None => kept.push(hit),
        }
    }
    out.points = kept;
}

fn line_surface(
    curve: &Curve,
    l: &Line3d,
    range: (f64, f64),
    surface: &Surface,
    tol: f64,
    budget: &NumericBudget,
) -> CurveSurfaceIntersection {
    // a line lying on the surface (plane, cylinder ruling, cone generator)
    let probes = uniform(range, 4);
    if probes.iter().all(|&t| surface.signed_distance(&l.evaluate(t)).abs() <= tol) {
        return curve_surface_numeric(curve, range, surface, tol, budget);
    }
    let mut out = CurveSurfaceIntersection::default();
    let roots = line_surface_params(&l.origin, &l.direction, surface).unwrap_or_default();
    for t in &roots {
        if in_range(*t, range, tol) {
            let hit = surface_hit(curve, surface, t.clamp(range.0, range.1));
            if hit.distance <= tol {
                out.points.push(hit);
            }
        }
    }
    if roots.is_empty() {
        for t in touch_params(curve, range, surface, tol, budget) {
            out.points.push(surface_hit(curve, surface, t));
        }
    }
    out
}

fn circle_plane(curve: &Curve, c: &Circle3d, range: (f64, f64), plane: &Plane, tol: f64) -> CurveSurfaceIntersection {
    let mut out = CurveSurfaceIntersection::default();
    if c.normal.cross(&plane.normal).length() < 1e-12 {
        if plane.distance_to_point(&c.center).abs() <= tol {
            out.overlaps.push(range);
        }
        return out;
    }
    let surface = Surface::Plane(*plane);
    let slack = tol / c.radius.max(1e-12);
    for a in circle_plane_angles(c, plane, tol) {
        let t = curve.normalize_param(a, range, 1e-12);
        if in_range(t, range, slack) {
            let hit = surface_hit(curve, &surface, t.clamp(range.0, range.1));
            if hit.distance <= tol {
                out.points.push(hit);
            }
        }
    }
    out
}

/// Signed distance of `p`, walking the foot point from the previous sample on
/// free-form surfaces.
fn walked_distance(surface: &Surface, p: &Point3d, seed: &mut Option<Point2d>) -> f64 {
    match surface {
        Surface::Nurbs(n) => {
            let start = seed.unwrap_or_else(|| n.seed_parameters(p));
            let pr = surface.newton_project(p, start);
            *seed = Some(pr.uv);
            (*p - pr.point).dot(&surface.normal_at(pr.uv.x, pr.uv.y))
        }
        _ => surface.signed_distance(p),
    }
}

fn sample_params(curve: &Curve, range: (f64, f64), tol: f64, samples: usize) -> Vec<f64> {
    let n = samples.max(8);
    let sag = tol.max(1e-6 * curve.length(range.0, range.1));
    curve.adaptive_params(range.0, range.1, sag, n, 4 * n)
}

/// Tangent contacts: local minima of |distance| that stay on one side.
fn touch_params(curve: &Curve, range: (f64, f64), surface: &Surface, tol: f64, budget: &NumericBudget) -> Vec<f64> {
    let ts = sample_params(curve, range, tol, budget.samples);
    let mut seed = None;
    let f: Vec<f64> = ts.iter().map(|&t| walked_distance(surface, &curve.evaluate(t), &mut seed)).collect();
    let mut out = Vec::new();
    for i in 1..ts.len().saturating_sub(1) {
        let same_side = f[i - 1].signum() == f[i].signum() && f[i].signum() == f[i + 1].signum();
        if same_side && f[i].abs() <= f[i - 1].abs() && f[i].abs() <= f[i + 1].abs() {
            let t = golden_min(|t| surface.signed_distance(&curve.evaluate(t)).abs(), ts[i - 1], ts[i + 1], budget.iterations * 2);
            if surface.signed_distance(&curve.evaluate(t)).abs() <= tol {
                out.push(t);
            }
        }
    }
    out
}

fn golden_min<F: Fn(f64) -> f64>(f: F, mut a: f64, mut b: f64, iterations: usize) -> f64 {
    let g = 0.5 * (5f64.sqrt() - 1.0);
    let mut x1 = b - g * (b - a);
    let mut x2 = a + g * (b - a);
    let (mut f1, mut f2) = (f(x1), f(x2));
    for _ in 0..iterations {
        if f1 < f2 {
            b = x2;
            x2 = x1;
            f2 = f1;
            x1 = b - g * (b - a);
            f1 = f(x1);
        } else {
            a = x1;
            x1 = x2;
            f1 = f2;
            x2 = a + g * (b - a);
            f2 = f(x2);
        }
    }
    0.5 * (a + b)
}

/// Illinois false position on a bracketed sign change.
fn bracket_root<F: Fn(f64) -> f64>(f: F, mut a: f64, mut b: f64, mut fa: f64, mut fb: f64, iterations: usize) -> f64 {
    let mut side = 0;
    let mut c = a;
    for _ in 0..iterations.max(8) * 2 {
        c = (a * fb - b * fa) / (fb - fa);
        if !c.is_finite() {
            c = 0.5 * (a + b);
        }
        let fc = f(c);
        if fc == 0.0 || (b - a).abs() < 1e-15 * (1.0 + c.abs()) {
            break;
        }
        if fc * fb > 0.0 {
            b = c;
            fb = fc;
            if side == -1 {
                fa *= 0.5;
            }
            side = -1;
        } else {
            a = c;
            fa = fc;
            if side == 1 {
                fb *= 0.5;
            }
            side = 1;
        }
    }
    c
}

/// Sampled walk along the curve: sign changes of the signed distance become
/// crossings, runs within tolerance become overlaps, flat minima become touches.
pub fn curve_surface_numeric(
    curve: &Curve,
    range: (f64, f64),
    surface: &Surface,
    tol: f64,
    budget: &NumericBudget,
) -> CurveSurfaceIntersection {
    let range = sorted(range);
    let mut out = CurveSurfaceIntersection::default();
    let ts = sample_params(curve, range, tol, budget.samples);
    let mut seed = None;
    let f: Vec<f64> = ts
        .iter()
        .map(|&t| walked_distance(surface, &curve.evaluate(t), &mut seed))
        .collect();
    let dist = |t: f64| surface.signed_distance(&curve.evaluate(t));
    let on = |t: f64| dist(t).abs() <= tol;

    // overlaps
    let mut in_overlap = vec![false; ts.len()];
    let mut i = 0;
    while i < ts.len() {
        if f[i].abs() > tol {
            i += 1;
            continue;
        }
        let mut j = i;
        while j + 1 < ts.len() && f[j + 1].abs() <= tol && on(0.5 * (ts[j] + ts[j + 1])) {
            j += 1;
        }
        if j > i {
            let lo = if i == 0 { ts[0] } else { bisect_edge(&on, ts[i - 1], ts[i]) };
            let hi = if j + 1 == ts.len() { ts[j] } else { bisect_edge(&on, ts[j + 1], ts[j]) };
            if curve.length(lo, hi) > tol {
                out.overlaps.push((lo, hi));
                for flag in in_overlap.iter_mut().take(j + 1).skip(i) {
                    *flag = true;
                }
            }
        }
        i = j + 1;
    }

    // crossings
    for k in 0..ts.len().saturating_sub(1) {
        if in_overlap[k] || in_overlap[k + 1] {
            continue;
        }
        if f[k] * f[k + 1] < 0.0 {
            let t = bracket_root(dist, ts[k], ts[k + 1], f[k], f[k + 1], budget.iterations);
            let hit = surface_hit(curve, surface, t);
            if hit.distance <= tol {
                out.points.push(hit);
            } else {
                out.unresolved = true;
            }
        }
    }

    // crossings landing on an interior sample
    for k in 1..ts.len().saturating_sub(1) {
        if !in_overlap[k] && f[k].abs() <= tol && f[k - 1] * f[k + 1] < 0.0 {
            out.points.push(surface_hit(curve, surface, ts[k]));
        }
    }

    // curve ends resting on the surface
    for k in [0, ts.len() - 1] {
        if !in_overlap[k] && f[k].abs() <= tol {
            out.points.push(surface_hit(curve, surface, ts[k]));
        }
    }

    // tangent touches
    for k in 1..ts.len().saturating_sub(1) {
        if in_overlap[k] {
            continue;
        }
        let same_side = f[k - 1].signum() == f[k].signum() && f[k].signum() == f[k + 1].signum();
        if same_side && f[k].abs() <= f[k - 1].abs() && f[k].abs() <= f[k + 1].abs() {
            let t = golden_min(|t| dist(t).abs(), ts[k - 1], ts[k + 1], budget.iterations * 2);
            let hit = surface_hit(curve, surface, t);
            if hit.distance <= tol {
                out.points.push(hit);
            }
        }
    }

    finish_surface_hits(&mut out, curve, tol);
    out
}
