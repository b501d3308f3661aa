//! Curves in a surface's parameter space (pcurves).
//!
//! Every pcurve is evaluated at the 3D parameter of the edge it belongs to,
//! so a split edge can reuse its parent's pcurve over a sub-range.

use serde::{Deserialize, Serialize};

use super::curves::Curve;
use super::point::Point2d;
use super::surfaces::{Plane, Surface};
use super::vector::{Vec2, Vec3};
use std::f64::consts::TAU;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Curve2d {
    Line(Line2d),
    Conic(Conic2d),
    Projected(ProjectedCurve),
}

/// `uv(t) = origin + direction * t`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Line2d {
    pub origin: Point2d,
    pub direction: Vec2,
}

/// `uv(t) = center + x_dir cos t + y_dir sin t`; radii are folded into the axes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Conic2d {
    pub center: Point2d,
    pub x_dir: Vec2,
    pub y_dir: Vec2,
}

/// Exact image of a 3D curve on a surface, with a sampled branch table that
/// pins periodic parameters to one sheet of the face domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedCurve {
    pub curve: Curve,
    pub surface: Surface,
    pub table: Vec<(f64, Point2d)>,
}

impl ProjectedCurve {
    /// Samples `curve` over `[t0, t1]`, unwraps periodic coordinates, then shifts
    /// the table by whole periods so it starts at `anchor` or best fits `domain`.
    pub fn build(
        curve: &Curve,
        surface: &Surface,
        t0: f64,
        t1: f64,
        anchor: Option<Point2d>,
        domain: Option<(Point2d, Point2d)>,
    ) -> Self {
        let params = curve.adaptive_params(t0, t1, 1e-3 * (t1 - t0).abs().max(1e-9), 16, 256);
        let mut table: Vec<(f64, Point2d)> = Vec::with_capacity(params.len());
        let mut first_singular = false;
        for &t in &params {
            let raw = surface.parameters_of(&curve.evaluate(t));
            let singular = surface.is_singular(&raw);
            let mut uv = raw;
            if let Some(&(_, prev)) = table.last() {
                uv = unwrap_near(surface, uv, prev);
                if singular {
                    uv.x = prev.x;
                }
            }
            if singular && table.is_empty() {
                first_singular = true;
            }
            table.push((t, uv));
        }
        // a singular first sample takes its u from its neighbour
        if first_singular && table.len() > 1 {
            let u = table[1].1.x;
            table[0].1.x = u;
        }

        let shift = Self::branch_shift(surface, &table, anchor, domain);
        for (_, uv) in &mut table {
            uv.x += shift.x;
            uv.y += shift.y;
        }
        Self {
            curve: curve.clone(),
            surface: surface.clone(),
            table,
        }
    }

    fn branch_shift(
        surface: &Surface,
        table: &[(f64, Point2d)],
        anchor: Option<Point2d>,
        domain: Option<(Point2d, Point2d)>,
    ) -> Vec2 {
        let Some(&(_, first)) = table.first() else {
            return Vec2::ZERO;
        };
        let pick = |period: Option<f64>, coord: &dyn Fn(&Point2d) -> f64, target: Option<f64>, lo: f64, hi: f64| -> f64 {
            let Some(p) = period else {
                return 0.0;
            };
            if let Some(a) = target {
                return ((a - coord(&first)) / p).round() * p;
            }
            // minimise the part of the table outside [lo, hi]
            let mut best = (f64::INFINITY, 0.0);
            for k in -2..=2 {
                let s = k as f64 * p;
                let excess: f64 = table
                    .iter()
                    .map(|(_, uv)| {
                        let c = coord(uv) + s;
                        (lo - c).max(0.0) + (c - hi).max(0.0)
                    })
                    .sum();
                if excess < best.0 - 1e-12 {
                    best = (excess, s);
                }
            }
            best.1
        };
        let (lo, hi) = domain.unwrap_or((Point2d::new(0.0, 0.0), Point2d::new(
            surface.u_period().unwrap_or(0.0),
            surface.v_period().unwrap_or(0.0),
        )));
        let du = pick(surface.u_period(), &|p: &Point2d| p.x, anchor.map(|a| a.x), lo.x, hi.x);
        let dv = pick(surface.v_period(), &|p: &Point2d| p.y, anchor.map(|a| a.y), lo.y, hi.y);
        Vec2::new(du, dv)
    }

    fn hint(&self, t: f64) -> Point2d {
        let n = self.table.len();
        if n == 0 {
            return Point2d::ORIGIN;
        }
        if n == 1 {
            return self.table[0].1;
        }
        let ascending = self.table[n - 1].0 >= self.table[0].0;
        let idx = self
            .table
            .partition_point(|(s, _)| if ascending { *s < t } else { *s > t });
        let i = idx.clamp(1, n - 1);
        let (ta, a) = self.table[i - 1];
        let (tb, b) = self.table[i];
        let w = if (tb - ta).abs() < 1e-300 { 0.0 } else { ((t - ta) / (tb - ta)).clamp(0.0, 1.0) };
        a.lerp(&b, w)
    }

    pub fn evaluate(&self, t: f64) -> Point2d {
        let hint = self.hint(t);
        let raw = self.surface.parameters_of(&self.curve.evaluate(t));
        let mut uv = unwrap_near(&self.surface, raw, hint);
        if self.surface.is_singular(&raw) {
            uv.x = hint.x;
        }
        uv
    }
}

/// Moves `uv` by whole periods to the sheet closest to `reference`.
pub fn unwrap_near(surface: &Surface, mut uv: Point2d, reference: Point2d) -> Point2d {
    if let Some(p) = surface.u_period() {
        uv.x += ((reference.x - uv.x) / p).round() * p;
    }
    if let Some(p) = surface.v_period() {
        uv.y += ((reference.y - uv.y) / p).round() * p;
    }
    uv
}

/// Shift by whole periods that puts `[a, b]` next to `anchor`, or best inside `[lo, hi]`.
fn periodic_shift(a: f64, b: f64, period: f64, anchor: Option<f64>, bounds: Option<(f64, f64)>) -> f64 {
    if let Some(x) = anchor {
        return ((x - a) / period).round() * period;
    }
    let Some((lo, hi)) = bounds else {
        return 0.0;
    };
    let (min, max) = (a.min(b), a.max(b));
    let mut best = (f64::INFINITY, 0.0);
    for k in -2..=2 {
        let s = k as f64 * period;
        let excess = (lo - (min + s)).max(0.0) + ((max + s) - hi).max(0.0);
        if excess < best.0 - 1e-12 {
            best = (excess, s);
        }
    }
    best.1
}

/// Pcurve of `curve` over `[t0, t1]` on `surface`.
///
/// Planes get exact lines and conics; cylinder rulings and parallels get exact
/// lines. Everything else is projected.
pub fn pcurve_for(
    curve: &Curve,
    t0: f64,
    t1: f64,
    surface: &Surface,
    anchor: Option<Point2d>,
    domain: Option<(Point2d, Point2d)>,
) -> Curve2d {
    let to_plane = |plane: &Plane, v: &Vec3| Vec2::new(v.dot(&plane.u_axis), v.dot(&plane.v_axis));
    match (surface, curve) {
        (Surface::Plane(p), Curve::Line(l)) => {
            return Curve2d::line(p.parameters_of(&l.origin), to_plane(p, &l.direction));
        }
        (Surface::Plane(p), Curve::Circle(c)) => {
            return Curve2d::Conic(Conic2d {
                center: p.parameters_of(&c.center),
                x_dir: to_plane(p, &c.x_axis) * c.radius,
                y_dir: to_plane(p, &c.y_axis()) * c.radius,
            });
        }
        (Surface::Plane(p), Curve::Ellipse(e)) => {
            return Curve2d::Conic(Conic2d {
                center: p.parameters_of(&e.center),
                x_dir: to_plane(p, &e.major_axis) * e.major_radius,
                y_dir: to_plane(p, &e.minor_axis()) * e.minor_radius,
            });
        }
        (Surface::Cylinder(cyl), Curve::Line(l)) if l.direction.cross(&cyl.axis).length() < 1e-12 => {
            let start = surface.parameters_of(&l.evaluate(t0));
            let origin = surface.parameters_of(&l.origin);
            let shift = periodic_shift(
                start.x,
                start.x,
                TAU,
                anchor.map(|a| a.x),
                domain.map(|(lo, hi)| (lo.x, hi.x)),
            );
            let u = start.x + shift;
            return Curve2d::line(Point2d::new(u, origin.y), Vec2::new(0.0, l.direction.dot(&cyl.axis)));
        }
        (Surface::Cylinder(cyl), Curve::Circle(c))
            if c.normal.cross(&cyl.axis).length() < 1e-12
                && (c.center - cyl.origin).reject_from(&cyl.axis).length() < 1e-9
                && (c.radius - cyl.radius).abs() < 1e-9 =>
        {
            let s = c.normal.dot(&cyl.axis).signum();
            let at0 = surface.parameters_of(&c.evaluate(0.0));
            let (a, b) = (at0.x + s * t0, at0.x + s * t1);
            let shift = periodic_shift(a, b, TAU, anchor.map(|p| p.x), domain.map(|(lo, hi)| (lo.x, hi.x)));
            return Curve2d::line(Point2d::new(at0.x + shift, at0.y), Vec2::new(s, 0.0));
        }
        _ => {}
    }
    Curve2d::Projected(ProjectedCurve::build(curve, surface, t0, t1, anchor, domain))
}

impl Curve2d {
    pub fn line(origin: Point2d, direction: Vec2) -> Self {
        Curve2d::Line(Line2d { origin, direction })
    }

    pub fn evaluate(&self, t: f64) -> Point2d {
        match self {
            Curve2d::Line(l) => l.origin + l.direction * t,
            Curve2d::Conic(c) => c.center + c.x_dir * t.cos() + c.y_dir * t.sin(),
            Curve2d::Projected(p) => p.evaluate(t),
        }
    }

    pub fn derivative(&self, t: f64) -> Vec2 {
        match self {
            Curve2d::Line(l) => l.direction,
            Curve2d::Conic(c) => c.x_dir * (-t.sin()) + c.y_dir * t.cos(),
            Curve2d::Projected(p) => {
                let h = 1e-6 * (1.0 + t.abs());
                (p.evaluate(t + h) - p.evaluate(t - h)) * (0.5 / h)
            }
        }
    }

    /// Polygon approximation over `[t0, t1]`; straight pcurves yield their endpoints.
    pub fn polyline(&self, t0: f64, t1: f64, segments: usize) -> Vec<Point2d> {
        let n = match self {
            Curve2d::Line(_) => 1,
            _ => segments.max(2),
        };
        (0..=n)
            .map(|i| self.evaluate(t0 + (t1 - t0) * i as f64 / n as f64))
            .collect()
    }

    /// Same curve translated in parameter space.
    pub fn shifted(&self, d: Vec2) -> Self {
        match self {
            Curve2d::Line(l) => Curve2d::Line(Line2d {
                origin: l.origin + d,
                direction: l.direction,
            }),
            Curve2d::Conic(c) => Curve2d::Conic(Conic2d {
                center: c.center + d,
                ..*c
            }),
            Curve2d::Projected(p) => {
                let mut q = p.clone();
                for (_, uv) in &mut q.table {
                    *uv = *uv + d;
                }
                Curve2d::Projected(q)
            }
        }
    }

    pub fn is_straight(&self) -> bool {
        matches!(self, Curve2d::Line(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::curves::{Circle3d, Line3d};
    use crate::geometry::point::Point3d;
    use crate::geometry::surfaces::Sphere;
    use crate::geometry::vector::Vec3;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{PI, TAU};

    #[test]
    fn test_line_and_conic_evaluate() {
        let l = Curve2d::line(Point2d::new(1.0, 1.0), Vec2::new(0.0, 2.0));
        assert_abs_diff_eq!(l.evaluate(0.5), Point2d::new(1.0, 2.0), epsilon = 1e-12);
        let c = Curve2d::Conic(Conic2d {
            center: Point2d::ORIGIN,
            x_dir: Vec2::new(2.0, 0.0),
            y_dir: Vec2::new(0.0, 2.0),
        });
        assert_abs_diff_eq!(c.evaluate(PI / 2.0), Point2d::new(0.0, 2.0), epsilon = 1e-12);
        assert_eq!(l.polyline(0.0, 1.0, 32).len(), 2);
    }

    #[test]
    fn test_latitude_circle_spans_domain() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.2));
        let z = 1.0;
        let r = (1.44f64 - z * z).sqrt();
        let circle = Curve::Circle(Circle3d::with_axes(Point3d::new(0.0, 0.0, z), Vec3::Z, Vec3::X, r));
        let domain = Some((Point2d::new(0.0, -PI / 2.0), Point2d::new(TAU, PI / 2.0)));
        let pc = ProjectedCurve::build(&circle, &s, 0.0, TAU, None, domain);
        let start = pc.evaluate(0.0);
        let end = pc.evaluate(TAU);
        assert!(start.x.abs() < 1e-9, "start u {}", start.x);
        assert!((end.x - TAU).abs() < 1e-9, "end u {}", end.x);
        assert!((pc.evaluate(1.0).y - (z / 1.2).asin()).abs() < 1e-12);
    }

    #[test]
    fn test_anchor_selects_sheet() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0));
        let meridian_dir = Vec3::new(1.0, 0.0, 1.0);
        let line = Curve::Line(Line3d::new(Point3d::new(1.0, 0.0, 0.0), meridian_dir));
        // a short chord near the seam, pinned to u = 2pi
        let pc = ProjectedCurve::build(&line, &s, 0.0, 1e-3, Some(Point2d::new(TAU, 0.0)), None);
        assert!((pc.evaluate(0.0).x - TAU).abs() < 1e-9);
    }

    #[test]
    fn test_meridian_through_pole_keeps_u() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0));
        // starts at -x (u = pi) and climbs to the north pole
        let great = Curve::Circle(Circle3d::with_axes(Point3d::ORIGIN, Vec3::Y, -Vec3::X, 1.0));
        let pc = ProjectedCurve::build(&great, &s, 0.0, PI / 2.0, None, None);
        let at_pole = pc.evaluate(PI / 2.0);
        let near = pc.evaluate(PI / 2.0 - 1e-3);
        assert!((near.x - PI).abs() < 1e-9);
        assert!((at_pole.x - PI).abs() < 1e-9);
        assert!((at_pole.y - PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_pcurve_for_plane_circle_is_exact() {
        let plane = Surface::Plane(crate::geometry::surfaces::Plane::xy());
        let circle = Curve::Circle(Circle3d::new(Point3d::new(1.0, 2.0, 0.0), Vec3::Z, 0.5));
        let pc = pcurve_for(&circle, 0.0, TAU, &plane, None, None);
        assert!(matches!(pc, Curve2d::Conic(_)));
        for i in 0..8 {
            let t = i as f64 * 0.7;
            let p = circle.evaluate(t);
            assert_abs_diff_eq!(pc.evaluate(t), Point2d::new(p.x, p.y), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pcurve_for_cylinder_parallel_spans_domain() {
        use crate::geometry::surfaces::Cylinder;
        let s = Surface::Cylinder(Cylinder::from_axes(Point3d::ORIGIN, Vec3::Z, Vec3::X, 1.0));
        let circle = Curve::Circle(Circle3d::with_axes(Point3d::new(0.0, 0.0, 0.5), Vec3::Z, Vec3::X, 1.0));
        let domain = Some((Point2d::new(0.0, 0.0), Point2d::new(TAU, 1.0)));
        let pc = pcurve_for(&circle, 0.0, TAU, &s, None, domain);
        assert!(pc.is_straight());
        assert_abs_diff_eq!(pc.evaluate(0.0), Point2d::new(0.0, 0.5), epsilon = 1e-12);
        assert_abs_diff_eq!(pc.evaluate(TAU), Point2d::new(TAU, 0.5), epsilon = 1e-12);
    }
}
