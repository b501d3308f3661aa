use nalgebra::{Matrix4, Vector4};

use crate::Tolerance;

use super::curves::{Circle3d, Curve, Ellipse3d, Line3d};
use super::point::{Point2d, Point3d};
use super::surfaces::{Cylinder, Plane, Sphere, Surface};
use super::vector::Vec3;

/// Result of intersecting two analytic surfaces.
#[derive(Debug, Clone)]
pub enum SurfaceIntersection {
    /// Surfaces do not intersect.
    None,
    /// Surfaces touch at a single point (tangent contact).
    Point(Point3d),
    /// Surfaces intersect along a curve.
    Curve(Curve),
    /// Two separate curves (a plane parallel to a cylinder axis, parallel cylinders).
    TwoCurves(Curve, Curve),
    /// Surfaces are coincident (identical geometric locus).
    Coincident,
}

impl SurfaceIntersection {
    pub fn curves(self) -> Vec<Curve> {
        match self {
            SurfaceIntersection::Curve(c) => vec![c],
            SurfaceIntersection::TwoCurves(a, b) => vec![a, b],
            _ => vec![],
        }
    }
}

/// Closed-form intersection for the analytic pairs that have one.
/// `None` means the pair needs marching.
pub fn intersect_analytic(s1: &Surface, s2: &Surface, tol: &Tolerance) -> Option<SurfaceIntersection> {
    Some(match (s1, s2) {
        (Surface::Plane(a), Surface::Plane(b)) => plane_plane(a, b, tol),
        (Surface::Plane(p), Surface::Cylinder(c)) | (Surface::Cylinder(c), Surface::Plane(p)) => {
            plane_cylinder(p, c, tol)
        }
        (Surface::Plane(p), Surface::Sphere(s)) | (Surface::Sphere(s), Surface::Plane(p)) => plane_sphere(p, s, tol),
        (Surface::Sphere(a), Surface::Sphere(b)) => sphere_sphere(a, b, tol),
        (Surface::Cylinder(a), Surface::Cylinder(b)) if a.axis.cross(&b.axis).length() < tol.angular.max(1e-12) => {
            parallel_cylinders(a, b, tol)
        }
        _ => return None,
    })
}

// ─── Plane–Plane ─────────────────────────────────────────────────────────────

/// Parallel planes are `None` or `Coincident`; otherwise a line.
pub fn plane_plane(p1: &Plane, p2: &Plane, tol: &Tolerance) -> SurfaceIntersection {
    let cross = p1.normal.cross(&p2.normal);
    let cross_len = cross.length();

    if cross_len < tol.angular.max(1e-12) {
        if p1.distance_to_point(&p2.origin).abs() <= tol.coincidence {
            return SurfaceIntersection::Coincident;
        }
        return SurfaceIntersection::None;
    }

    let dir = cross / cross_len;
    // n_i . P = d_i for both planes, P in span(n1, n2)
    let d1 = p1.origin.to_vec3().dot(&p1.normal);
    let d2 = p2.origin.to_vec3().dot(&p2.normal);
    let n1n2 = p1.normal.dot(&p2.normal);
    let denom = 1.0 - n1n2 * n1n2;
    let c1 = (d1 - d2 * n1n2) / denom;
    let c2 = (d2 - d1 * n1n2) / denom;
    let origin = Point3d::ORIGIN + p1.normal * c1 + p2.normal * c2;

    SurfaceIntersection::Curve(Curve::Line(Line3d { origin, direction: dir }))
}

// ─── Plane–Cylinder ──────────────────────────────────────────────────────────

/// Circle when the plane is perpendicular to the axis, zero to two rulings when
/// parallel to it, an ellipse otherwise.
pub fn plane_cylinder(plane: &Plane, cyl: &Cylinder, tol: &Tolerance) -> SurfaceIntersection {
    let cos_theta = plane.normal.dot(&cyl.axis).abs();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

    if sin_theta < tol.angular.max(1e-12) {
        let center = plane.project_point(&cyl.origin);
        let circle = Circle3d::with_axes(center, cyl.axis, cyl.ref_dir, cyl.radius);
        return SurfaceIntersection::Curve(Curve::Circle(circle));
    }

    if cos_theta < tol.angular.max(1e-12) {
        let dist = plane.distance_to_point(&cyl.origin).abs();
        if dist > cyl.radius + tol.coincidence {
            return SurfaceIntersection::None;
        }
        let foot = plane.project_point(&cyl.origin);
        if (dist - cyl.radius).abs() <= tol.coincidence {
            return SurfaceIntersection::Curve(Curve::Line(Line3d {
                origin: foot,
                direction: cyl.axis,
            }));
        }
        let half_chord = (cyl.radius * cyl.radius - dist * dist).max(0.0).sqrt();
        let lateral = cyl.axis.cross(&plane.normal).normalize();
        return SurfaceIntersection::TwoCurves(
            Curve::Line(Line3d {
                origin: foot + lateral * half_chord,
                direction: cyl.axis,
            }),
            Curve::Line(Line3d {
                origin: foot - lateral * half_chord,
                direction: cyl.axis,
            }),
        );
    }

    // minor radius R, major radius R / cos(theta), centred where the axis pierces the plane
    let denom = plane.normal.dot(&cyl.axis);
    let t = (plane.origin - cyl.origin).dot(&plane.normal) / denom;
    let center = cyl.origin + cyl.axis * t;
    let Some(major_axis) = cyl.axis.reject_from(&plane.normal).normalized() else {
        return SurfaceIntersection::None;
    };
    let ellipse = Ellipse3d::new(center, plane.normal, major_axis, cyl.radius / cos_theta, cyl.radius);
    SurfaceIntersection::Curve(Curve::Ellipse(ellipse))
}

// ─── Plane–Sphere ────────────────────────────────────────────────────────────

pub fn plane_sphere(plane: &Plane, sphere: &Sphere, tol: &Tolerance) -> SurfaceIntersection {
    let signed_dist = plane.distance_to_point(&sphere.center);
    let dist = signed_dist.abs();

    if dist > sphere.radius + tol.coincidence {
        return SurfaceIntersection::None;
    }
    let center = sphere.center - plane.normal * signed_dist;
    if (dist - sphere.radius).abs() <= tol.coincidence {
        return SurfaceIntersection::Point(center);
    }
    let circle_radius = (sphere.radius * sphere.radius - dist * dist).max(0.0).sqrt();
    let x_axis = sphere.ref_dir.reject_from(&plane.normal).normalized().unwrap_or(plane.u_axis);
    SurfaceIntersection::Curve(Curve::Circle(Circle3d::with_axes(center, plane.normal, x_axis, circle_radius)))
}

// ─── Sphere–Sphere ───────────────────────────────────────────────────────────

pub fn sphere_sphere(a: &Sphere, b: &Sphere, tol: &Tolerance) -> SurfaceIntersection {
    let offset = b.center - a.center;
    let d = offset.length();
    if d <= tol.coincidence {
        if (a.radius - b.radius).abs() <= tol.coincidence {
            return SurfaceIntersection::Coincident;
        }
        return SurfaceIntersection::None;
    }
    if d > a.radius + b.radius + tol.coincidence || d < (a.radius - b.radius).abs() - tol.coincidence {
        return SurfaceIntersection::None;
    }
    let axis = offset / d;
    let x = (d * d + a.radius * a.radius - b.radius * b.radius) / (2.0 * d);
    let h2 = a.radius * a.radius - x * x;
    let center = a.center + axis * x;
    if h2 <= (tol.coincidence * a.radius).max(0.0) {
        return SurfaceIntersection::Point(center);
    }
    SurfaceIntersection::Curve(Curve::Circle(Circle3d::new(center, axis, h2.sqrt())))
}

// ─── Cylinder–Cylinder (parallel axes) ───────────────────────────────────────

fn parallel_cylinders(a: &Cylinder, b: &Cylinder, tol: &Tolerance) -> SurfaceIntersection {
    let offset = (b.origin - a.origin).reject_from(&a.axis);
    let d = offset.length();
    if d <= tol.coincidence {
        if (a.radius - b.radius).abs() <= tol.coincidence {
            return SurfaceIntersection::Coincident;
        }
        return SurfaceIntersection::None;
    }
    if d > a.radius + b.radius + tol.coincidence || d < (a.radius - b.radius).abs() - tol.coincidence {
        return SurfaceIntersection::None;
    }
    let ex = offset / d;
    let ey = a.axis.cross(&ex);
    let x = (d * d + a.radius * a.radius - b.radius * b.radius) / (2.0 * d);
    let h = (a.radius * a.radius - x * x).max(0.0).sqrt();
    let base = a.origin + ex * x;
    let ruling = |p: Point3d| Curve::Line(Line3d { origin: p, direction: a.axis });
    if h <= tol.coincidence {
        return SurfaceIntersection::Curve(ruling(base));
    }
    SurfaceIntersection::TwoCurves(ruling(base + ey * h), ruling(base - ey * h))
}

// ─── Marching ────────────────────────────────────────────────────────────────

/// A point on both surfaces with its parameters on each.
#[derive(Debug, Clone, Copy)]
pub struct DualPoint {
    pub point: Point3d,
    pub uv1: Point2d,
    pub uv2: Point2d,
}

/// Polyline traced along the intersection of two surfaces.
#[derive(Debug, Clone)]
pub struct MarchedCurve {
    pub points: Vec<DualPoint>,
    pub closed: bool,
    /// The walk hit its step budget or a tangency before leaving the domain.
    pub truncated: bool,
}

/// Limits of a marching run.
#[derive(Debug, Clone, Copy)]
pub struct MarchSettings {
    pub step: f64,
    pub max_steps: usize,
    pub iterations: usize,
    pub tolerance: f64,
}

/// Alternating projection onto both surfaces, seeded by `p`.
pub fn refine_on_both(s1: &Surface, s2: &Surface, p: &Point3d, iterations: usize, tol: f64) -> Option<DualPoint> {
    let mut q = *p;
    for _ in 0..iterations.max(4) * 4 {
        let a = s1.project(&q);
        let b = s2.project(&a.point);
        let next = a.point.midpoint(&b.point);
        let moved = next.distance_to(&q);
        q = next;
        if a.point.distance_to(&b.point) <= tol * 1e-2 && moved <= tol * 1e-2 {
            break;
        }
    }
    let a = s1.project(&q);
    let b = s2.project(&q);
    (a.distance <= tol && b.distance <= tol).then_some(DualPoint {
        point: q,
        uv1: a.uv,
        uv2: b.uv,
    })
}

/// Newton correction on `(u1, v1, u2, v2)`: `S1 = S2` and `(S1 - anchor) . t = 0`.
fn correct(
    s1: &Surface,
    s2: &Surface,
    mut uv1: Point2d,
    mut uv2: Point2d,
    anchor: &Point3d,
    t: &Vec3,
    settings: &MarchSettings,
) -> Option<DualPoint> {
    for _ in 0..settings.iterations {
        let p1 = s1.evaluate_uv(&uv1);
        let p2 = s2.evaluate_uv(&uv2);
        let (a_u, a_v) = s1.derivatives(uv1.x, uv1.y);
        let (b_u, b_v) = s2.derivatives(uv2.x, uv2.y);
        let gap = p1 - p2;
        let f = Vector4::new(gap.x, gap.y, gap.z, (p1 - *anchor).dot(t));
        if gap.length() <= settings.tolerance * 1e-3 && f.w.abs() <= settings.tolerance * 1e-3 {
            return Some(DualPoint {
                point: p1.midpoint(&p2),
                uv1,
                uv2,
            });
        }
        let jac = Matrix4::new(
            a_u.x, a_v.x, -b_u.x, -b_v.x,
            a_u.y, a_v.y, -b_u.y, -b_v.y,
            a_u.z, a_v.z, -b_u.z, -b_v.z,
            a_u.dot(t), a_v.dot(t), 0.0, 0.0,
        );
        let delta = jac.lu().solve(&(-f))?;
        uv1 = Point2d::new(uv1.x + delta.x, uv1.y + delta.y);
        uv2 = Point2d::new(uv2.x + delta.z, uv2.y + delta.w);
    }
    let p1 = s1.evaluate_uv(&uv1);
    let p2 = s2.evaluate_uv(&uv2);
    (p1.distance_to(&p2) <= settings.tolerance).then_some(DualPoint {
        point: p1.midpoint(&p2),
        uv1,
        uv2,
    })
}

fn march_tangent(s1: &Surface, s2: &Surface, p: &DualPoint) -> Option<Vec3> {
    let n1 = s1.normal_at(p.uv1.x, p.uv1.y);
    let n2 = s2.normal_at(p.uv2.x, p.uv2.y);
    n1.cross(&n2).normalized()
}

/// Predictor-corrector walk in both directions from `seed`, continuing while
/// `inside` accepts the point. A walk that returns to the seed is closed.
pub fn march(
    s1: &Surface,
    s2: &Surface,
    seed: DualPoint,
    settings: &MarchSettings,
    inside: &dyn Fn(&DualPoint) -> bool,
) -> MarchedCurve {
    let mut halves: Vec<Vec<DualPoint>> = Vec::with_capacity(2);
    let mut truncated = false;
    for sign in [1.0, -1.0] {
        let mut trace = vec![seed];
        let mut prev_dir: Option<Vec3> = None;
        let mut closed = false;
        while trace.len() <= settings.max_steps {
            let Some(current) = trace.last().copied() else {
                break;
            };
            let Some(mut dir) = march_tangent(s1, s2, &current) else {
                truncated = true;
                break;
            };
            dir = match prev_dir {
                Some(prev) if prev.dot(&dir) < 0.0 => -dir,
                None => dir * sign,
                _ => dir,
            };
            let mut step = settings.step;
            let mut next = None;
            for _ in 0..6 {
                let anchor = current.point + dir * step;
                if let Some(c) = correct(s1, s2, current.uv1, current.uv2, &anchor, &dir, settings) {
                    next = Some(c);
                    break;
                }
                step *= 0.5;
            }
            let Some(next) = next else {
                truncated = true;
                break;
            };
            if !inside(&next) {
                // keep the exit point so the caller can clip against the boundary
                trace.push(next);
                break;
            }
            if trace.len() > 3 && next.point.distance_to(&seed.point) <= 0.75 * settings.step {
                closed = true;
                break;
            }
            prev_dir = Some(dir);
            trace.push(next);
        }
        if closed {
            let mut points = trace;
            points.push(seed);
            return MarchedCurve {
                points,
                closed: true,
                truncated: false,
            };
        }
        if trace.len() > settings.max_steps {
            truncated = true;
        }
        halves.push(trace);
    }
    let mut points: Vec<DualPoint> = halves.pop().unwrap_or_default();
    points.reverse();
    if let Some(forward) = halves.pop() {
        points.extend(forward.into_iter().skip(1));
    }
    MarchedCurve {
        points,
        closed: false,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    fn default_tol() -> Tolerance {
        Tolerance::default()
    }

    fn assert_on(s: &Surface, p: &Point3d, tol: f64) {
        let d = s.signed_distance(p).abs();
        assert!(d < tol, "{} off by {:.2e} at {:?}", s.surface_type_name(), d, p);
    }

    fn samples(curve: &Curve) -> Vec<Point3d> {
        let (t0, t1) = curve.natural_domain().unwrap_or((-10.0, 10.0));
        curve.sample(t0, t1, 24)
    }

    #[test]
    fn plane_plane_transverse_and_coincident() {
        let p1 = Plane::xy();
        let p2 = Plane::xz();
        match plane_plane(&p1, &p2, &default_tol()) {
            SurfaceIntersection::Curve(Curve::Line(line)) => {
                assert!(line.direction.is_parallel_to(&Vec3::X, 1e-10));
            }
            other => panic!("expected a line, got {:?}", other),
        }
        let flipped = Plane::new(Point3d::new(1.0, 2.0, 0.0), -Vec3::Z);
        assert!(matches!(plane_plane(&p1, &flipped, &default_tol()), SurfaceIntersection::Coincident));
        let lifted = Plane::new(Point3d::new(0.0, 0.0, 5.0), Vec3::Z);
        assert!(matches!(plane_plane(&p1, &lifted, &default_tol()), SurfaceIntersection::None));
    }

    #[test]
    fn plane_plane_oblique_line_on_both() {
        let p1 = Plane::xy();
        let p2 = Plane::new(Point3d::ORIGIN, Vec3::new(0.0, -FRAC_PI_4.sin(), FRAC_PI_4.cos()));
        let curves = plane_plane(&p1, &p2, &default_tol()).curves();
        assert_eq!(curves.len(), 1);
        for p in samples(&curves[0]) {
            assert_on(&Surface::Plane(p1), &p, 1e-7);
            assert_on(&Surface::Plane(p2), &p, 1e-7);
        }
    }

    #[test]
    fn plane_cylinder_cases() {
        let cyl = Cylinder::new(Point3d::ORIGIN, Vec3::Z, 3.0);
        let s_cyl = Surface::Cylinder(cyl);
        let cap = Plane::new(Point3d::new(0.0, 0.0, 5.0), Vec3::Z);
        match plane_cylinder(&cap, &cyl, &default_tol()) {
            SurfaceIntersection::Curve(c @ Curve::Circle(_)) => {
                for p in samples(&c) {
                    assert_on(&Surface::Plane(cap), &p, 1e-7);
                    assert_on(&s_cyl, &p, 1e-7);
                }
            }
            other => panic!("expected circle, got {:?}", other),
        }

        let side = Plane::new(Point3d::new(1.0, 0.0, 0.0), Vec3::X);
        let curves = plane_cylinder(&side, &cyl, &default_tol()).curves();
        assert_eq!(curves.len(), 2);

        let tangent = Plane::new(Point3d::new(3.0, 0.0, 0.0), Vec3::X);
        assert_eq!(plane_cylinder(&tangent, &cyl, &default_tol()).curves().len(), 1);

        let oblique = Plane::new(Point3d::ORIGIN, Vec3::new(1.0, 0.0, 1.0));
        let ellipse = plane_cylinder(&oblique, &cyl, &default_tol()).curves();
        assert_eq!(ellipse[0].curve_type_name(), "Ellipse");
        for p in samples(&ellipse[0]) {
            assert_on(&Surface::Plane(oblique), &p, 1e-9);
            assert_on(&s_cyl, &p, 1e-9);
        }
    }

    #[test]
    fn plane_sphere_circle_and_touch() {
        let sphere = Sphere::new(Point3d::ORIGIN, 2.0);
        let cut = Plane::new(Point3d::new(0.0, 0.0, 1.0), Vec3::Z);
        match plane_sphere(&cut, &sphere, &default_tol()) {
            SurfaceIntersection::Curve(Curve::Circle(c)) => assert!((c.radius - 3f64.sqrt()).abs() < 1e-12),
            other => panic!("expected circle, got {:?}", other),
        }
        let touch = Plane::new(Point3d::new(0.0, 0.0, 2.0), Vec3::Z);
        assert!(matches!(plane_sphere(&touch, &sphere, &default_tol()), SurfaceIntersection::Point(_)));
    }

    #[test]
    fn sphere_sphere_circle() {
        let a = Sphere::new(Point3d::ORIGIN, 1.0);
        let b = Sphere::new(Point3d::new(1.0, 0.0, 0.0), 1.0);
        match sphere_sphere(&a, &b, &default_tol()) {
            SurfaceIntersection::Curve(c @ Curve::Circle(_)) => {
                for p in samples(&c) {
                    assert_on(&Surface::Sphere(a), &p, 1e-9);
                    assert_on(&Surface::Sphere(b), &p, 1e-9);
                }
            }
            other => panic!("expected circle, got {:?}", other),
        }
        assert!(matches!(sphere_sphere(&a, &a, &default_tol()), SurfaceIntersection::Coincident));
        let far = Sphere::new(Point3d::new(5.0, 0.0, 0.0), 1.0);
        assert!(matches!(sphere_sphere(&a, &far, &default_tol()), SurfaceIntersection::None));
    }

    #[test]
    fn coaxial_cylinders_are_coincident() {
        let a = Surface::Cylinder(Cylinder::new(Point3d::ORIGIN, Vec3::Z, 1.0));
        let b = Surface::Cylinder(Cylinder::new(Point3d::new(0.0, 0.0, 4.0), -Vec3::Z, 1.0));
        assert!(matches!(intersect_analytic(&a, &b, &default_tol()), Some(SurfaceIntersection::Coincident)));
    }

    #[test]
    fn march_crossing_cylinders() {
        let a = Surface::Cylinder(Cylinder::new(Point3d::ORIGIN, Vec3::Z, 1.0));
        let b = Surface::Cylinder(Cylinder::new(Point3d::new(0.0, 0.0, 0.0), Vec3::X, 0.8));
        assert!(intersect_analytic(&a, &b, &default_tol()).is_none());
        let Some(seed) = refine_on_both(&a, &b, &Point3d::new(0.55, 0.0, 0.65), 32, 1e-9) else {
            panic!("seed did not converge");
        };
        let settings = MarchSettings {
            step: 0.05,
            max_steps: 400,
            iterations: 16,
            tolerance: 1e-9,
        };
        let curve = march(&a, &b, seed, &settings, &|_| true);
        assert!(curve.closed, "{} points", curve.points.len());
        for p in &curve.points {
            assert_on(&a, &p.point, 1e-8);
            assert_on(&b, &p.point, 1e-8);
        }
    }

    #[test]
    fn march_stops_at_domain_exit() {
        let plane = Surface::Plane(Plane::xy());
        let sphere = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0));
        let Some(seed) = refine_on_both(&plane, &sphere, &Point3d::new(1.0, 0.1, 0.0), 32, 1e-9) else {
            panic!("seed did not converge");
        };
        let settings = MarchSettings {
            step: 0.05,
            max_steps: 400,
            iterations: 16,
            tolerance: 1e-9,
        };
        let curve = march(&plane, &sphere, seed, &settings, &|p| p.point.x > 0.0);
        assert!(!curve.closed);
        let ends = [curve.points[0].point, curve.points[curve.points.len() - 1].point];
        for e in ends {
            assert!(e.x <= 0.0 && e.x > -0.06, "end {:?}", e);
        }
    }
}
