use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, TAU};

use super::curves::wrap_angle;
use super::nurbs::NurbsSurface;
use super::point::{Point2d, Point3d};
use super::transform::Transform;
use super::vector::Vec3;

/// All surface types supported by the kernel.
///
/// Every surface's natural normal is `Su x Sv`; a face referenced with
/// `Orientation::Forward` has its material behind that normal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Surface {
    Plane(Plane),
    Cylinder(Cylinder),
    Cone(Cone),
    Sphere(Sphere),
    Torus(Torus),
    Nurbs(NurbsSurface),
}

/// An infinite plane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Plane {
    pub origin: Point3d,
    pub normal: Vec3,
    pub u_axis: Vec3,
    pub v_axis: Vec3,
}

impl Plane {
    pub fn new(origin: Point3d, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Self::from_axes(origin, normal, normal.any_perpendicular())
    }

    /// Plane with an explicit u direction; v completes a right-handed frame.
    pub fn from_axes(origin: Point3d, normal: Vec3, u_axis: Vec3) -> Self {
        let normal = normal.normalize();
        let u_axis = u_axis.reject_from(&normal).normalize();
        Self {
            origin,
            normal,
            u_axis,
            v_axis: normal.cross(&u_axis),
        }
    }

    pub fn xy() -> Self {
        Self {
            origin: Point3d::ORIGIN,
            normal: Vec3::Z,
            u_axis: Vec3::X,
            v_axis: Vec3::Y,
        }
    }

    pub fn xz() -> Self {
        Self::from_axes(Point3d::ORIGIN, Vec3::Y, Vec3::Z)
    }

    pub fn yz() -> Self {
        Self::from_axes(Point3d::ORIGIN, Vec3::X, Vec3::Y)
    }

    pub fn evaluate(&self, u: f64, v: f64) -> Point3d {
        self.origin + self.u_axis * u + self.v_axis * v
    }

    /// Signed distance along the normal.
    pub fn distance_to_point(&self, p: &Point3d) -> f64 {
        (*p - self.origin).dot(&self.normal)
    }

    pub fn project_point(&self, p: &Point3d) -> Point3d {
        *p - self.normal * self.distance_to_point(p)
    }

    pub fn parameters_of(&self, p: &Point3d) -> Point2d {
        let v = *p - self.origin;
        Point2d::new(v.dot(&self.u_axis), v.dot(&self.v_axis))
    }
}

/// A cylinder surface (infinite along axis), u = angle from `ref_dir`,
/// v = height along `axis`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cylinder {
    pub origin: Point3d,
    pub axis: Vec3,
    pub radius: f64,
    pub ref_dir: Vec3,
}

impl Cylinder {
    pub fn new(origin: Point3d, axis: Vec3, radius: f64) -> Self {
        let axis = axis.normalize();
        Self {
            origin,
            axis,
            radius,
            ref_dir: axis.any_perpendicular(),
        }
    }

    /// Cylinder whose seam (u = 0) runs along `ref_dir`.
    pub fn from_axes(origin: Point3d, axis: Vec3, ref_dir: Vec3, radius: f64) -> Self {
        let axis = axis.normalize();
        let ref_dir = ref_dir.reject_from(&axis).normalized().unwrap_or_else(|| axis.any_perpendicular());
        Self {
            origin,
            axis,
            radius,
            ref_dir,
        }
    }

    fn y_dir(&self) -> Vec3 {
        self.axis.cross(&self.ref_dir)
    }

    pub fn radial(&self, u: f64) -> Vec3 {
        self.ref_dir * u.cos() + self.y_dir() * u.sin()
    }

    pub fn evaluate(&self, u: f64, v: f64) -> Point3d {
        self.origin + self.radial(u) * self.radius + self.axis * v
    }

    pub fn parameters_of(&self, p: &Point3d) -> Point2d {
        let w = *p - self.origin;
        let h = w.dot(&self.axis);
        let u = w.dot(&self.y_dir()).atan2(w.dot(&self.ref_dir));
        Point2d::new(wrap_angle(u), h)
    }
}

/// A cone surface, u = angle, v = distance from the apex along the axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cone {
    pub apex: Point3d,
    pub axis: Vec3,
    pub half_angle: f64,
    pub ref_dir: Vec3,
}

impl Cone {
    pub fn new(apex: Point3d, axis: Vec3, half_angle: f64) -> Self {
        let axis = axis.normalize();
        Self {
            apex,
            axis,
            half_angle,
            ref_dir: axis.any_perpendicular(),
        }
    }

    fn y_dir(&self) -> Vec3 {
        self.axis.cross(&self.ref_dir)
    }

    pub fn radial(&self, u: f64) -> Vec3 {
        self.ref_dir * u.cos() + self.y_dir() * u.sin()
    }

    pub fn evaluate(&self, u: f64, v: f64) -> Point3d {
        let r = v * self.half_angle.tan();
        self.apex + self.axis * v + self.radial(u) * r
    }

    pub fn parameters_of(&self, p: &Point3d) -> Point2d {
        let w = *p - self.apex;
        let h = w.dot(&self.axis);
        let radial = w.reject_from(&self.axis);
        let u = radial.dot(&self.y_dir()).atan2(radial.dot(&self.ref_dir));
        // orthogonal projection onto the generator line at angle u
        let (s, c) = self.half_angle.sin_cos();
        let along = h * c + radial.length() * s;
        Point2d::new(wrap_angle(u), along * c)
    }
}

/// A sphere surface, u = longitude in [0, 2pi) about `axis` measured from
/// `ref_dir`, v = latitude in [-pi/2, pi/2].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sphere {
    pub center: Point3d,
    pub radius: f64,
    pub axis: Vec3,
    pub ref_dir: Vec3,
}

impl Sphere {
    pub fn new(center: Point3d, radius: f64) -> Self {
        Self {
            center,
            radius,
            axis: Vec3::Z,
            ref_dir: Vec3::X,
        }
    }

    fn y_dir(&self) -> Vec3 {
        self.axis.cross(&self.ref_dir)
    }

    pub fn radial(&self, u: f64) -> Vec3 {
        self.ref_dir * u.cos() + self.y_dir() * u.sin()
    }

    pub fn evaluate(&self, u: f64, v: f64) -> Point3d {
        self.center + self.radial(u) * (self.radius * v.cos()) + self.axis * (self.radius * v.sin())
    }

    pub fn parameters_of(&self, p: &Point3d) -> Point2d {
        let w = *p - self.center;
        let x = w.dot(&self.ref_dir);
        let y = w.dot(&self.y_dir());
        let z = w.dot(&self.axis);
        let rho = (x * x + y * y).sqrt();
        let v = z.atan2(rho);
        let u = if rho < 1e-14 * self.radius.max(1.0) { 0.0 } else { wrap_angle(y.atan2(x)) };
        Point2d::new(u, v)
    }
}

/// A torus surface, u = major angle, v = minor angle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Torus {
    pub center: Point3d,
    pub axis: Vec3,
    pub major_radius: f64,
    pub minor_radius: f64,
}

impl Torus {
    pub fn new(center: Point3d, axis: Vec3, major_radius: f64, minor_radius: f64) -> Self {
        Self {
            center,
            axis: axis.normalize(),
            major_radius,
            minor_radius,
        }
    }

    fn frame(&self) -> (Vec3, Vec3) {
        let ref_dir = self.axis.any_perpendicular();
        (ref_dir, self.axis.cross(&ref_dir))
    }

    pub fn evaluate(&self, u: f64, v: f64) -> Point3d {
        let (ref_dir, y_dir) = self.frame();
        let radial = ref_dir * u.cos() + y_dir * u.sin();
        let ring_center = self.center + radial * self.major_radius;
        ring_center + radial * (self.minor_radius * v.cos()) + self.axis * (self.minor_radius * v.sin())
    }

    pub fn parameters_of(&self, p: &Point3d) -> Point2d {
        let (ref_dir, y_dir) = self.frame();
        let w = *p - self.center;
        let h = w.dot(&self.axis);
        let planar = w.reject_from(&self.axis);
        let u = planar.dot(&y_dir).atan2(planar.dot(&ref_dir));
        let radial = ref_dir * u.cos() + y_dir * u.sin();
        let q = w - radial * self.major_radius;
        let v = h.atan2(q.dot(&radial));
        Point2d::new(wrap_angle(u), wrap_angle(v))
    }
}

/// Closest point on a surface.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceProjection {
    pub uv: Point2d,
    pub point: Point3d,
    pub distance: f64,
}

const FD_STEP: f64 = 1e-6;

impl Surface {
    pub fn evaluate(&self, u: f64, v: f64) -> Point3d {
        match self {
            Surface::Plane(p) => p.evaluate(u, v),
            Surface::Cylinder(c) => c.evaluate(u, v),
            Surface::Cone(c) => c.evaluate(u, v),
            Surface::Sphere(s) => s.evaluate(u, v),
            Surface::Torus(t) => t.evaluate(u, v),
            Surface::Nurbs(n) => n.evaluate(u, v),
        }
    }

    pub fn evaluate_uv(&self, uv: &Point2d) -> Point3d {
        self.evaluate(uv.x, uv.y)
    }

    /// First partial derivatives (Su, Sv).
    pub fn derivatives(&self, u: f64, v: f64) -> (Vec3, Vec3) {
        match self {
            Surface::Plane(p) => (p.u_axis, p.v_axis),
            Surface::Cylinder(c) => {
                let du = c.ref_dir * (-u.sin()) + c.y_dir() * u.cos();
                (du * c.radius, c.axis)
            }
            Surface::Sphere(s) => {
                let r = s.radius;
                let (su, cu) = u.sin_cos();
                let (sv, cv) = v.sin_cos();
                let tangent = s.ref_dir * (-su) + s.y_dir() * cu;
                (tangent * (r * cv), s.radial(u) * (-r * sv) + s.axis * (r * cv))
            }
            _ => {
                let pu0 = self.evaluate(u - FD_STEP, v);
                let pu1 = self.evaluate(u + FD_STEP, v);
                let pv0 = self.evaluate(u, v - FD_STEP);
                let pv1 = self.evaluate(u, v + FD_STEP);
                ((pu1 - pu0) / (2.0 * FD_STEP), (pv1 - pv0) / (2.0 * FD_STEP))
            }
        }
    }

    /// Second partial derivatives (Suu, Suv, Svv) by central differences.
    pub fn second_derivatives(&self, u: f64, v: f64) -> (Vec3, Vec3, Vec3) {
        let h = 1e-4;
        let (u0, v0) = self.derivatives(u - h, v);
        let (u1, v1) = self.derivatives(u + h, v);
        let (_, w0) = self.derivatives(u, v - h);
        let (_, w1) = self.derivatives(u, v + h);
        ((u1 - u0) / (2.0 * h), (v1 - v0) / (2.0 * h), (w1 - w0) / (2.0 * h))
    }

    /// Unit natural normal `Su x Sv`; falls back to closed forms at singular points.
    pub fn normal_at(&self, u: f64, v: f64) -> Vec3 {
        match self {
            Surface::Plane(p) => p.normal,
            Surface::Sphere(s) => (s.evaluate(u, v) - s.center).normalize(),
            Surface::Cylinder(c) => c.radial(u),
            Surface::Cone(c) => {
                let (s, co) = c.half_angle.sin_cos();
                let n = c.radial(u) * co - c.axis * s;
                if v < 0.0 { -n } else { n }
            }
            _ => {
                let (su, sv) = self.derivatives(u, v);
                su.cross(&sv).normalized().unwrap_or(Vec3::Z)
            }
        }
    }

    /// Parameters of the foot point of `p` (exact for points on the surface).
    pub fn parameters_of(&self, p: &Point3d) -> Point2d {
        match self {
            Surface::Plane(pl) => pl.parameters_of(p),
            Surface::Cylinder(c) => c.parameters_of(p),
            Surface::Cone(c) => c.parameters_of(p),
            Surface::Sphere(s) => s.parameters_of(p),
            Surface::Torus(t) => t.parameters_of(p),
            Surface::Nurbs(n) => self.newton_project(p, n.seed_parameters(p)).uv,
        }
    }

    pub fn project(&self, p: &Point3d) -> SurfaceProjection {
        let uv = self.parameters_of(p);
        match self {
            Surface::Nurbs(_) => self.newton_project(p, uv),
            _ => {
                let point = self.evaluate_uv(&uv);
                SurfaceProjection {
                    uv,
                    point,
                    distance: point.distance_to(p),
                }
            }
        }
    }

    /// Gauss–Newton refinement of a foot point starting at `seed`.
    pub fn newton_project(&self, p: &Point3d, seed: Point2d) -> SurfaceProjection {
        let mut uv = seed;
        for _ in 0..24 {
            let s = self.evaluate_uv(&uv);
            let (su, sv) = self.derivatives(uv.x, uv.y);
            let r = *p - s;
            let a11 = su.dot(&su);
            let a12 = su.dot(&sv);
            let a22 = sv.dot(&sv);
            let b1 = r.dot(&su);
            let b2 = r.dot(&sv);
            let det = a11 * a22 - a12 * a12;
            if det.abs() < 1e-30 {
                break;
            }
            let du = (b1 * a22 - b2 * a12) / det;
            let dv = (a11 * b2 - a12 * b1) / det;
            uv = Point2d::new(uv.x + du, uv.y + dv);
            if let Surface::Nurbs(n) = self {
                uv = n.clamp_parameters(uv);
            }
            if du.abs() + dv.abs() < 1e-14 {
                break;
            }
        }
        let point = self.evaluate_uv(&uv);
        SurfaceProjection {
            uv,
            point,
            distance: point.distance_to(p),
        }
    }

    /// Signed distance from `p` along the natural normal at its foot point.
    pub fn signed_distance(&self, p: &Point3d) -> f64 {
        match self {
            Surface::Plane(pl) => pl.distance_to_point(p),
            Surface::Sphere(s) => p.distance_to(&s.center) - s.radius,
            Surface::Cylinder(c) => (*p - c.origin).reject_from(&c.axis).length() - c.radius,
            _ => {
                let pr = self.project(p);
                (*p - pr.point).dot(&self.normal_at(pr.uv.x, pr.uv.y))
            }
        }
    }

    pub fn u_period(&self) -> Option<f64> {
        match self {
            Surface::Cylinder(_) | Surface::Cone(_) | Surface::Sphere(_) | Surface::Torus(_) => Some(TAU),
            _ => None,
        }
    }

    pub fn v_period(&self) -> Option<f64> {
        match self {
            Surface::Torus(_) => Some(TAU),
            _ => None,
        }
    }

    /// True where `Su` vanishes (sphere poles, cone apex).
    pub fn is_singular(&self, uv: &Point2d) -> bool {
        match self {
            Surface::Sphere(_) => (uv.y.abs() - FRAC_PI_2).abs() < 1e-9,
            Surface::Cone(_) => uv.y.abs() < 1e-12,
            _ => false,
        }
    }

    /// Natural normal scaled to the local area element, `Su x Sv`.
    pub fn area_element(&self, u: f64, v: f64) -> Vec3 {
        let (su, sv) = self.derivatives(u, v);
        su.cross(&sv)
    }

    /// Shortest 3D length of a unit step in each parameter direction.
    pub fn metric_scale(&self, uv: &Point2d) -> (f64, f64) {
        let (su, sv) = self.derivatives(uv.x, uv.y);
        (su.length(), sv.length())
    }

    pub fn transformed(&self, t: &Transform) -> Surface {
        let s = t.scale_factor();
        match self {
            Surface::Plane(p) => Surface::Plane(Plane {
                origin: t.transform_point(&p.origin),
                normal: t.transform_direction(&p.normal),
                u_axis: t.transform_direction(&p.u_axis),
                v_axis: t.transform_direction(&p.v_axis),
            }),
            Surface::Cylinder(c) => Surface::Cylinder(Cylinder {
                origin: t.transform_point(&c.origin),
                axis: t.transform_direction(&c.axis),
                radius: c.radius * s,
                ref_dir: t.transform_direction(&c.ref_dir),
            }),
            Surface::Cone(c) => Surface::Cone(Cone {
                apex: t.transform_point(&c.apex),
                axis: t.transform_direction(&c.axis),
                half_angle: c.half_angle,
                ref_dir: t.transform_direction(&c.ref_dir),
            }),
            Surface::Sphere(sp) => Surface::Sphere(Sphere {
                center: t.transform_point(&sp.center),
                radius: sp.radius * s,
                axis: t.transform_direction(&sp.axis),
                ref_dir: t.transform_direction(&sp.ref_dir),
            }),
            Surface::Torus(to) => Surface::Torus(Torus {
                center: t.transform_point(&to.center),
                axis: t.transform_direction(&to.axis),
                major_radius: to.major_radius * s,
                minor_radius: to.minor_radius * s,
            }),
            Surface::Nurbs(n) => Surface::Nurbs(n.transformed(t)),
        }
    }

    pub fn surface_type_name(&self) -> &'static str {
        match self {
            Surface::Plane(_) => "Plane",
            Surface::Cylinder(_) => "Cylinder",
            Surface::Cone(_) => "Cone",
            Surface::Sphere(_) => "Sphere",
            Surface::Torus(_) => "Torus",
            Surface::Nurbs(_) => "Nurbs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn all_analytic() -> Vec<(Surface, Point2d)> {
        vec![
            (
                Surface::Plane(Plane::from_axes(Point3d::new(1.0, 2.0, 3.0), Vec3::new(1.0, 1.0, 0.0), Vec3::Z)),
                Point2d::new(0.4, -1.3),
            ),
            (
                Surface::Cylinder(Cylinder::new(Point3d::ORIGIN, Vec3::new(0.0, 1.0, 1.0), 2.0)),
                Point2d::new(1.2, 0.7),
            ),
            (
                Surface::Cone(Cone::new(Point3d::ORIGIN, Vec3::Z, 0.4)),
                Point2d::new(2.5, 1.5),
            ),
            (Surface::Sphere(Sphere::new(Point3d::new(0.5, 0.0, 0.0), 3.0)), Point2d::new(4.0, 0.6)),
            (Surface::Torus(Torus::new(Point3d::ORIGIN, Vec3::Z, 5.0, 1.0)), Point2d::new(0.3, 2.0)),
        ]
    }

    #[test]
    fn test_parameters_of_inverts_evaluate() {
        for (s, uv) in all_analytic() {
            let p = s.evaluate_uv(&uv);
            let back = s.parameters_of(&p);
            assert_abs_diff_eq!(s.evaluate_uv(&back), p, epsilon = 1e-9);
            assert!((back.x - uv.x).abs() < 1e-9, "{} u {} vs {}", s.surface_type_name(), back.x, uv.x);
        }
    }

    #[test]
    fn test_natural_normal_matches_derivatives() {
        for (s, uv) in all_analytic() {
            let n = s.normal_at(uv.x, uv.y);
            let (su, sv) = s.derivatives(uv.x, uv.y);
            let cross = su.cross(&sv).normalize();
            assert_abs_diff_eq!(n, cross, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_plane_distance_and_projection() {
        let p = Plane::xy();
        let pt = Point3d::new(1.0, 2.0, 5.0);
        assert!((p.distance_to_point(&pt) - 5.0).abs() < 1e-12);
        assert_abs_diff_eq!(p.project_point(&pt), Point3d::new(1.0, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_pole_is_singular() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0));
        let uv = s.parameters_of(&Point3d::new(0.0, 0.0, 1.0));
        assert!(s.is_singular(&uv));
        assert!(!s.is_singular(&Point2d::new(0.0, 0.0)));
        assert_eq!(s.u_period(), Some(TAU));
    }

    #[test]
    fn test_signed_distance_sign_follows_normal() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 2.0));
        assert!(s.signed_distance(&Point3d::new(3.0, 0.0, 0.0)) > 0.0);
        assert!(s.signed_distance(&Point3d::new(1.0, 0.0, 0.0)) < 0.0);
        let c = Surface::Cylinder(Cylinder::new(Point3d::ORIGIN, Vec3::Z, 1.0));
        assert!((c.signed_distance(&Point3d::new(0.0, 3.0, 7.0)) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_area_element_of_sphere() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 2.0));
        let a = s.area_element(0.3, 0.4);
        assert!((a.length() - 4.0 * 0.4f64.cos()).abs() < 1e-12);
        assert!((s.normal_at(PI, 0.0).x + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rotated_sphere_follows_frame() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0));
        let t = Transform::rotation_axis_angle(Vec3::X, 0.9);
        let moved = s.transformed(&t);
        let expected = t.transform_point(&s.evaluate(1.0, 0.4));
        assert_abs_diff_eq!(moved.evaluate(1.0, 0.4), expected, epsilon = 1e-12);
        let back = moved.parameters_of(&expected);
        assert!((back.x - 1.0).abs() < 1e-9 && (back.y - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_transformed_cylinder_keeps_radius_under_rotation() {
        let c = Surface::Cylinder(Cylinder::new(Point3d::ORIGIN, Vec3::Z, 1.5));
        let t = Transform::rotation_z(0.7).then(&Transform::translation(1.0, 0.0, 0.0));
        let moved = c.transformed(&t);
        let p = moved.evaluate(0.2, 0.3);
        let expected = t.transform_point(&c.evaluate(0.2, 0.3));
        assert_abs_diff_eq!(p, expected, epsilon = 1e-12);
    }
}
