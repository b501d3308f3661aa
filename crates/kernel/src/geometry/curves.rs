use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

use super::nurbs::NurbsCurve;
use super::point::Point3d;
use super::quadrature;
use super::transform::{BoundingBox, Transform};
use super::vector::Vec3;

/// Analytic and parametric curve representations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Curve {
    Line(Line3d),
    Circle(Circle3d),
    Ellipse(Ellipse3d),
    Nurbs(NurbsCurve),
}

/// An infinite line parameterised by arc length from `origin`.
/// Bounded segments are expressed through an edge's parameter range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Line3d {
    pub origin: Point3d,
    pub direction: Vec3,
}

impl Line3d {
    pub fn new(origin: Point3d, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    pub fn from_points(a: Point3d, b: Point3d) -> Self {
        Self::new(a, b - a)
    }

    /// Point carrier of a degenerated edge.
    pub fn degenerate(at: Point3d) -> Self {
        Self {
            origin: at,
            direction: Vec3::ZERO,
        }
    }

    pub fn evaluate(&self, t: f64) -> Point3d {
        self.origin + self.direction * t
    }

    pub fn closest_point(&self, p: &Point3d) -> (Point3d, f64) {
        let t = (*p - self.origin).dot(&self.direction);
        (self.evaluate(t), t)
    }

    pub fn distance_to_point(&self, p: &Point3d) -> f64 {
        let (closest, _) = self.closest_point(p);
        p.distance_to(&closest)
    }
}

/// A circle in 3D space, parameterised by angle from `x_axis`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Circle3d {
    pub center: Point3d,
    pub normal: Vec3,
    pub radius: f64,
    pub x_axis: Vec3,
}

impl Circle3d {
    pub fn new(center: Point3d, normal: Vec3, radius: f64) -> Self {
        let normal = normal.normalize();
        Self {
            center,
            normal,
            radius,
            x_axis: normal.any_perpendicular(),
        }
    }

    pub fn with_axes(center: Point3d, normal: Vec3, x_axis: Vec3, radius: f64) -> Self {
        let normal = normal.normalize();
        Self {
            center,
            normal,
            x_axis: x_axis.reject_from(&normal).normalize(),
            radius,
        }
    }

    pub fn y_axis(&self) -> Vec3 {
        self.normal.cross(&self.x_axis)
    }

    pub fn evaluate(&self, t: f64) -> Point3d {
        self.center
            + self.x_axis * (self.radius * t.cos())
            + self.y_axis() * (self.radius * t.sin())
    }

    pub fn derivative(&self, t: f64) -> Vec3 {
        self.x_axis * (-self.radius * t.sin()) + self.y_axis() * (self.radius * t.cos())
    }

    /// Angle in [0, 2pi) of the projection of `p` into the circle plane.
    pub fn angle_of(&self, p: &Point3d) -> f64 {
        let v = *p - self.center;
        let a = v.dot(&self.y_axis()).atan2(v.dot(&self.x_axis));
        if a < 0.0 { a + TAU } else { a }
    }
}

/// An ellipse in 3D space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ellipse3d {
    pub center: Point3d,
    pub normal: Vec3,
    pub major_axis: Vec3,
    pub major_radius: f64,
    pub minor_radius: f64,
}

impl Ellipse3d {
    pub fn new(
        center: Point3d,
        normal: Vec3,
        major_axis: Vec3,
        major_radius: f64,
        minor_radius: f64,
    ) -> Self {
        let normal = normal.normalize();
        Self {
            center,
            normal,
            major_axis: major_axis.reject_from(&normal).normalize(),
            major_radius,
            minor_radius,
        }
    }

    pub fn minor_axis(&self) -> Vec3 {
        self.normal.cross(&self.major_axis)
    }

    pub fn evaluate(&self, t: f64) -> Point3d {
        self.center
            + self.major_axis * (self.major_radius * t.cos())
            + self.minor_axis() * (self.minor_radius * t.sin())
    }

    pub fn derivative(&self, t: f64) -> Vec3 {
        self.major_axis * (-self.major_radius * t.sin())
            + self.minor_axis() * (self.minor_radius * t.cos())
    }
}

/// Closest point on a curve within a parameter range.
#[derive(Debug, Clone, Copy)]
pub struct CurveProjection {
    pub param: f64,
    pub point: Point3d,
    pub distance: f64,
}

const NEWTON_STEPS: usize = 32;

impl Curve {
    pub fn evaluate(&self, t: f64) -> Point3d {
        match self {
            Curve::Line(l) => l.evaluate(t),
            Curve::Circle(c) => c.evaluate(t),
            Curve::Ellipse(e) => e.evaluate(t),
            Curve::Nurbs(n) => n.evaluate(t),
        }
    }

    pub fn derivative(&self, t: f64) -> Vec3 {
        match self {
            Curve::Line(l) => l.direction,
            Curve::Circle(c) => c.derivative(t),
            Curve::Ellipse(e) => e.derivative(t),
            Curve::Nurbs(n) => n.derivative(t),
        }
    }

    pub fn second_derivative(&self, t: f64) -> Vec3 {
        match self {
            Curve::Line(_) => Vec3::ZERO,
            Curve::Circle(c) => (c.evaluate(t) - c.center) * -1.0,
            Curve::Ellipse(e) => (e.evaluate(t) - e.center) * -1.0,
            Curve::Nurbs(n) => n.second_derivative(t),
        }
    }

    /// Period of closed analytic curves.
    pub fn period(&self) -> Option<f64> {
        match self {
            Curve::Circle(_) | Curve::Ellipse(_) => Some(TAU),
            _ => None,
        }
    }

    /// Parameter bounds for curves that have them.
    pub fn natural_domain(&self) -> Option<(f64, f64)> {
        match self {
            Curve::Line(_) => None,
            Curve::Circle(_) | Curve::Ellipse(_) => Some((0.0, TAU)),
            Curve::Nurbs(n) => Some(n.domain()),
        }
    }

    pub fn curvature(&self, t: f64) -> f64 {
        let d1 = self.derivative(t);
        let speed = d1.length();
        if speed < 1e-15 {
            return 0.0;
        }
        d1.cross(&self.second_derivative(t)).length() / (speed * speed * speed)
    }

    /// Shifts `t` by whole periods so it falls in `[range.0, range.0 + period)`.
    /// Non-periodic curves return `t` unchanged.
    pub fn normalize_param(&self, t: f64, range: (f64, f64), eps: f64) -> f64 {
        let Some(p) = self.period() else {
            return t;
        };
        let mut s = t;
        while s < range.0 - eps {
            s += p;
        }
        while s >= range.0 + p - eps {
            s -= p;
        }
        // near the wrap point prefer the end of the range
        if (s - range.0).abs() <= eps && (range.1 - range.0 - p).abs() <= eps && t > range.0 + 0.5 * p {
            s = range.1;
        }
        s
    }

    /// Closest point within `range` (closed form for line and circle).
    pub fn project(&self, p: &Point3d, range: (f64, f64)) -> CurveProjection {
        match self {
            Curve::Line(l) => {
                let (_, t) = l.closest_point(p);
                let t = t.clamp(range.0.min(range.1), range.0.max(range.1));
                self.projection_at(p, t)
            }
            Curve::Circle(c) => {
                let a = self.normalize_param(c.angle_of(p), range, 1e-12);
                if a >= range.0 && a <= range.1 {
                    return self.projection_at(p, a);
                }
                let s = self.projection_at(p, range.0);
                let e = self.projection_at(p, range.1);
                if s.distance <= e.distance { s } else { e }
            }
            _ => self.project_numeric(p, range),
        }
    }

    fn projection_at(&self, p: &Point3d, t: f64) -> CurveProjection {
        let point = self.evaluate(t);
        CurveProjection {
            param: t,
            point,
            distance: point.distance_to(p),
        }
    }

    /// Sampled seed followed by Newton iterations on (C(t) - p) . C'(t) = 0.
    fn project_numeric(&self, p: &Point3d, range: (f64, f64)) -> CurveProjection {
        let (lo, hi) = (range.0.min(range.1), range.0.max(range.1));
        let samples = 48;
        let mut best = self.projection_at(p, lo);
        for i in 1..=samples {
            let t = lo + (hi - lo) * i as f64 / samples as f64;
            let cand = self.projection_at(p, t);
            if cand.distance < best.distance {
                best = cand;
            }
        }
        let mut t = best.param;
        for _ in 0..NEWTON_STEPS {
            let c = self.evaluate(t);
            let d1 = self.derivative(t);
            let d2 = self.second_derivative(t);
            let r = c - *p;
            let f = r.dot(&d1);
            let df = d1.dot(&d1) + r.dot(&d2);
            if df.abs() < 1e-30 {
                break;
            }
            let next = (t - f / df).clamp(lo, hi);
            if (next - t).abs() < 1e-14 * (1.0 + t.abs()) {
                t = next;
                break;
            }
            t = next;
        }
        let refined = self.projection_at(p, t);
        if refined.distance <= best.distance { refined } else { best }
    }

    /// Curvature-adaptive parameter samples over `[t0, t1]` (inclusive).
    pub fn adaptive_params(&self, t0: f64, t1: f64, max_sag: f64, min_segments: usize, max_segments: usize) -> Vec<f64> {
        let span = t1 - t0;
        if span.abs() < 1e-300 {
            return vec![t0, t1];
        }
        if let Curve::Line(_) = self {
            let n = min_segments.max(1);
            return (0..=n).map(|i| t0 + span * i as f64 / n as f64).collect();
        }
        let min_step = span.abs() / max_segments.max(1) as f64;
        let max_step = span.abs() / min_segments.max(1) as f64;
        let dir = span.signum();
        let mut out = vec![t0];
        let mut t = t0;
        while (t1 - t) * dir > min_step * 0.5 {
            let kappa = self.curvature(t);
            let speed = self.derivative(t).length().max(1e-15);
            let ds = if kappa > 1e-12 {
                (8.0 * max_sag / kappa).sqrt()
            } else {
                f64::INFINITY
            };
            let step = (ds / speed).clamp(min_step, max_step);
            t += dir * step;
            if (t1 - t) * dir <= min_step * 0.5 {
                break;
            }
            out.push(t);
        }
        out.push(t1);
        out
    }

    /// Uniform samples over `[t0, t1]` (inclusive).
    pub fn sample(&self, t0: f64, t1: f64, segments: usize) -> Vec<Point3d> {
        let n = segments.max(1);
        (0..=n)
            .map(|i| self.evaluate(t0 + (t1 - t0) * i as f64 / n as f64))
            .collect()
    }

    pub fn length(&self, t0: f64, t1: f64) -> f64 {
        match self {
            Curve::Line(l) => (t1 - t0).abs() * l.direction.length(),
            Curve::Circle(c) => (t1 - t0).abs() * c.radius,
            _ => quadrature::integrate(|t| self.derivative(t).length(), t0, t1, 16).abs(),
        }
    }

    pub fn bounding_box(&self, t0: f64, t1: f64) -> BoundingBox {
        match self {
            Curve::Line(_) => BoundingBox::from_points(&[self.evaluate(t0), self.evaluate(t1)]),
            Curve::Nurbs(n) => BoundingBox::from_points(&n.control_points),
            Curve::Circle(c) => {
                let n = 32;
                let sag = c.radius * (1.0 - ((t1 - t0).abs() / (2.0 * n as f64)).cos());
                BoundingBox::from_points(&self.sample(t0, t1, n)).expanded(sag)
            }
            Curve::Ellipse(e) => {
                let n = 32;
                let sag = e.major_radius * (1.0 - ((t1 - t0).abs() / (2.0 * n as f64)).cos());
                BoundingBox::from_points(&self.sample(t0, t1, n)).expanded(sag)
            }
        }
    }

    pub fn transformed(&self, t: &Transform) -> Curve {
        let s = t.scale_factor();
        match self {
            Curve::Line(l) => Curve::Line(Line3d {
                origin: t.transform_point(&l.origin),
                direction: t.transform_direction(&l.direction),
            }),
            Curve::Circle(c) => Curve::Circle(Circle3d {
                center: t.transform_point(&c.center),
                normal: t.transform_direction(&c.normal),
                radius: c.radius * s,
                x_axis: t.transform_direction(&c.x_axis),
            }),
            Curve::Ellipse(e) => Curve::Ellipse(Ellipse3d {
                center: t.transform_point(&e.center),
                normal: t.transform_direction(&e.normal),
                major_axis: t.transform_direction(&e.major_axis),
                major_radius: e.major_radius * s,
                minor_radius: e.minor_radius * s,
            }),
            Curve::Nurbs(n) => Curve::Nurbs(n.transformed(t)),
        }
    }

    /// Curve type name for logging.
    pub fn curve_type_name(&self) -> &'static str {
        match self {
            Curve::Line(_) => "Line",
            Curve::Circle(_) => "Circle",
            Curve::Ellipse(_) => "Ellipse",
            Curve::Nurbs(_) => "Nurbs",
        }
    }
}

/// A ray for containment probes.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Point3d,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Point3d, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    pub fn at(&self, t: f64) -> Point3d {
        self.origin + self.direction * t
    }
}

/// Wraps an angle into [0, 2pi).
pub fn wrap_angle(a: f64) -> f64 {
    let r = a.rem_euclid(TAU);
    if r >= TAU - 1e-15 { 0.0 } else { r }
}

/// Smallest signed difference `b - a` modulo 2pi, in (-pi, pi].
pub fn angle_delta(a: f64, b: f64) -> f64 {
    let mut d = (b - a).rem_euclid(TAU);
    if d > PI {
        d -= TAU;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_line_closest_point() {
        let l = Line3d::new(Point3d::ORIGIN, Vec3::X);
        let (closest, t) = l.closest_point(&Point3d::new(5.0, 3.0, 0.0));
        assert!((t - 5.0).abs() < 1e-12);
        assert_abs_diff_eq!(closest, Point3d::new(5.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_circle_angle_of_roundtrip() {
        let c = Circle3d::new(Point3d::new(1.0, 2.0, 3.0), Vec3::new(0.0, 1.0, 1.0), 2.5);
        for i in 0..12 {
            let t = i as f64 * 0.5;
            let a = c.angle_of(&c.evaluate(t));
            assert!(angle_delta(a, t).abs() < 1e-10);
        }
    }

    #[test]
    fn test_project_clamps_to_range() {
        let c = Curve::Line(Line3d::new(Point3d::ORIGIN, Vec3::X));
        let pr = c.project(&Point3d::new(5.0, 1.0, 0.0), (0.0, 2.0));
        assert!((pr.param - 2.0).abs() < 1e-12);
        assert!((pr.distance - 10f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_circle_projection_in_wrapped_range() {
        let c = Curve::Circle(Circle3d::with_axes(Point3d::ORIGIN, Vec3::Z, Vec3::X, 1.0));
        // the range straddles angle zero
        let pr = c.project(&Point3d::new(2.0, 0.0, 0.0), (5.5, 7.0));
        assert!((pr.param - TAU).abs() < 1e-9);
        assert!((pr.distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ellipse_numeric_projection() {
        let e = Curve::Ellipse(Ellipse3d::new(Point3d::ORIGIN, Vec3::Z, Vec3::X, 4.0, 2.0));
        let target = e.evaluate(1.1);
        let pr = e.project(&(target + Vec3::Z * 0.5), (0.0, TAU));
        assert!((pr.param - 1.1).abs() < 1e-8);
        assert!((pr.distance - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_circle_curvature_and_length() {
        let c = Curve::Circle(Circle3d::new(Point3d::ORIGIN, Vec3::Z, 2.0));
        assert!((c.curvature(0.3) - 0.5).abs() < 1e-12);
        assert!((c.length(0.0, TAU) - 4.0 * PI).abs() < 1e-12);
        let e = Curve::Ellipse(Ellipse3d::new(Point3d::ORIGIN, Vec3::Z, Vec3::X, 2.0, 2.0));
        assert!((e.length(0.0, TAU) - 4.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_sampling_refines_with_curvature() {
        let tight = Curve::Circle(Circle3d::new(Point3d::ORIGIN, Vec3::Z, 0.1));
        let loose = Curve::Circle(Circle3d::new(Point3d::ORIGIN, Vec3::Z, 10.0));
        let a = tight.adaptive_params(0.0, 1.0, 1e-4, 2, 512);
        let b = loose.adaptive_params(0.0, 1.0, 1e-4, 2, 512);
        assert!(b.len() > a.len());
        assert_eq!(a.first().copied(), Some(0.0));
        assert_eq!(b.last().copied(), Some(1.0));
    }

    #[test]
    fn test_normalize_param_for_full_circle() {
        let c = Curve::Circle(Circle3d::new(Point3d::ORIGIN, Vec3::Z, 1.0));
        assert!((c.normalize_param(-0.5, (0.0, TAU), 1e-12) - (TAU - 0.5)).abs() < 1e-12);
        assert!((c.normalize_param(7.0, (0.0, TAU), 1e-12) - (7.0 - TAU)).abs() < 1e-12);
    }

    #[test]
    fn test_wrap_and_delta() {
        assert!((wrap_angle(-0.25) - (TAU - 0.25)).abs() < 1e-12);
        assert!((angle_delta(TAU - 0.1, 0.1) - 0.2).abs() < 1e-12);
    }
}
