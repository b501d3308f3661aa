//! Closed-form line/surface roots, containment rays, and the polynomial
//! solvers behind them.

use super::curves::{Curve, Line3d, Ray};
use super::point::Point3d;
use super::surfaces::{Cone, Cylinder, Plane, Sphere, Surface, Torus};
use super::vector::Vec3;

/// Result of a ray-surface intersection.
#[derive(Debug, Clone)]
pub struct RaySurfaceHit {
    pub point: Point3d,
    pub t: f64,
    /// Natural normal of the surface at the hit.
    pub normal: Vec3,
}

// ─── Line-Line ───────────────────────────────────────────────────────────────

/// Closest points between two infinite lines, or `None` when parallel.
/// Returns (point_on_l1, t1, point_on_l2, t2, distance).
pub fn line_line_closest(l1: &Line3d, l2: &Line3d) -> Option<(Point3d, f64, Point3d, f64, f64)> {
    let w = l1.origin - l2.origin;
    let a = l1.direction.dot(&l1.direction);
    let b = l1.direction.dot(&l2.direction);
    let c = l2.direction.dot(&l2.direction);
    let d = l1.direction.dot(&w);
    let e = l2.direction.dot(&w);

    let denom = a * c - b * b;
    if denom.abs() < 1e-15 * (a * c).max(1e-300) {
        return None;
    }

    let t1 = (b * e - c * d) / denom;
    let t2 = (a * e - b * d) / denom;
    let p1 = l1.evaluate(t1);
    let p2 = l2.evaluate(t2);
    Some((p1, t1, p2, t2, p1.distance_to(&p2)))
}

// ─── Line-Surface ────────────────────────────────────────────────────────────

/// Parameters `t` where `origin + t * dir` meets an analytic surface.
/// `None` for free-form surfaces, which need the marching intersector.
pub fn line_surface_params(origin: &Point3d, dir: &Vec3, surface: &Surface) -> Option<Vec<f64>> {
    let speed = dir.length();
    if speed < 1e-300 {
        return Some(vec![]);
    }
    let unit = *dir / speed;
    let roots = match surface {
        Surface::Plane(p) => line_plane(origin, &unit, p),
        Surface::Sphere(s) => line_sphere(origin, &unit, s),
        Surface::Cylinder(c) => line_cylinder(origin, &unit, c),
        Surface::Cone(c) => line_cone(origin, &unit, c),
        Surface::Torus(t) => line_torus(origin, &unit, t),
        Surface::Nurbs(_) => return None,
    };
    let mut out: Vec<f64> = roots.into_iter().map(|s| s / speed).collect();
    out.sort_by(f64::total_cmp);
    out.dedup_by(|a, b| (*a - *b).abs() < 1e-12 * (1.0 + a.abs()));
    Some(out)
}

fn line_plane(o: &Point3d, d: &Vec3, plane: &Plane) -> Vec<f64> {
    let denom = d.dot(&plane.normal);
    if denom.abs() < 1e-15 {
        return vec![];
    }
    vec![(plane.origin - *o).dot(&plane.normal) / denom]
}

fn line_sphere(o: &Point3d, d: &Vec3, sphere: &Sphere) -> Vec<f64> {
    let oc = *o - sphere.center;
    let b = oc.dot(d);
    let c = oc.dot(&oc) - sphere.radius * sphere.radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return vec![];
    }
    let sq = disc.sqrt();
    vec![-b - sq, -b + sq]
}

fn line_cylinder(o: &Point3d, d: &Vec3, cyl: &Cylinder) -> Vec<f64> {
    let oc = *o - cyl.origin;
    let d_proj = d.reject_from(&cyl.axis);
    let oc_proj = oc.reject_from(&cyl.axis);
    let a = d_proj.dot(&d_proj);
    if a < 1e-15 {
        return vec![];
    }
    let b = 2.0 * d_proj.dot(&oc_proj);
    let c = oc_proj.dot(&oc_proj) - cyl.radius * cyl.radius;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return vec![];
    }
    let sq = disc.sqrt();
    vec![(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)]
}

/// Both nappes of the cone: `((P - apex) . axis)^2 = |P - apex|^2 cos^2(half_angle)`.
fn line_cone(o: &Point3d, d: &Vec3, cone: &Cone) -> Vec<f64> {
    let co = *o - cone.apex;
    let cos2 = cone.half_angle.cos().powi(2);
    let d_a = d.dot(&cone.axis);
    let co_a = co.dot(&cone.axis);
    let a = d_a * d_a - cos2;
    let b = 2.0 * (d_a * co_a - cos2 * co.dot(d));
    let c = co_a * co_a - cos2 * co.dot(&co);
    if a.abs() < 1e-15 {
        if b.abs() < 1e-15 {
            return vec![];
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc < -1e-12 {
        return vec![];
    }
    let sq = disc.max(0.0).sqrt();
    vec![(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)]
}

/// Quartic from `(|P|^2 + R^2 - r^2)^2 = 4 R^2 (x^2 + y^2)` in the torus frame.
fn line_torus(o: &Point3d, d: &Vec3, torus: &Torus) -> Vec<f64> {
    let z_axis = torus.axis;
    let x_axis = z_axis.any_perpendicular();
    let y_axis = z_axis.cross(&x_axis);
    let rel = *o - torus.center;
    let (ox, oy, oz) = (rel.dot(&x_axis), rel.dot(&y_axis), rel.dot(&z_axis));
    let (dx, dy, dz) = (d.dot(&x_axis), d.dot(&y_axis), d.dot(&z_axis));

    let sum_d2 = dx * dx + dy * dy + dz * dz;
    let sum_od = ox * dx + oy * dy + oz * dz;
    let sum_o2 = ox * ox + oy * oy + oz * oz;
    let r2 = torus.major_radius * torus.major_radius;
    let s2 = torus.minor_radius * torus.minor_radius;
    let k = sum_o2 - r2 - s2;

    let a4 = sum_d2 * sum_d2;
    let a3 = 4.0 * sum_d2 * sum_od;
    let a2 = 2.0 * sum_d2 * k + 4.0 * sum_od * sum_od + 4.0 * r2 * dz * dz;
    let a1 = 4.0 * k * sum_od + 8.0 * r2 * oz * dz;
    let a0 = k * k - 4.0 * r2 * (s2 - oz * oz);

    let poly = |t: f64| (((a4 * t + a3) * t + a2) * t + a1) * t + a0;
    let dpoly = |t: f64| ((4.0 * a4 * t + 3.0 * a3) * t + 2.0 * a2) * t + a1;
    solve_quartic(a4, a3, a2, a1, a0)
        .into_iter()
        .map(|mut t| {
            // Ferrari roots lose digits; two Newton steps restore them
            for _ in 0..2 {
                let df = dpoly(t);
                if df.abs() > 1e-300 {
                    t -= poly(t) / df;
                }
            }
            t
        })
        .collect()
}

// ─── Rays ────────────────────────────────────────────────────────────────────

/// Forward hits of `ray` on the full (untrimmed) surface, sorted by distance.
///
/// Free-form surfaces fall back to numeric curve/surface intersection over
/// `[0, reach]`.
pub fn ray_surface(ray: &Ray, surface: &Surface, reach: f64) -> Vec<RaySurfaceHit> {
    let params = match line_surface_params(&ray.origin, &ray.direction, surface) {
        Some(p) => p,
        None => {
            let line = Curve::Line(Line3d::new(ray.origin, ray.direction));
            super::curve_intersection::curve_surface_numeric(
                &line,
                (0.0, reach),
                surface,
                1e-9,
                &super::curve_intersection::NumericBudget { samples: 128, iterations: 32 },
            )
                .points
                .into_iter()
                .map(|h| h.t)
                .collect()
        }
    };
    let mut hits: Vec<RaySurfaceHit> = params
        .into_iter()
        .filter(|t| *t >= -1e-12)
        .map(|t| {
            let t = t.max(0.0);
            let point = ray.at(t);
            let uv = surface.parameters_of(&point);
            RaySurfaceHit {
                point,
                t,
                normal: surface.normal_at(uv.x, uv.y),
            }
        })
        .collect();
    hits.sort_by(|a, b| a.t.total_cmp(&b.t));
    hits.dedup_by(|a, b| (a.t - b.t).abs() < 1e-10);
    hits
}

pub fn ray_plane(ray: &Ray, plane: &Plane) -> Option<RaySurfaceHit> {
    ray_surface(ray, &Surface::Plane(*plane), 0.0).into_iter().next()
}

pub fn ray_sphere(ray: &Ray, sphere: &Sphere) -> Vec<RaySurfaceHit> {
    ray_surface(ray, &Surface::Sphere(*sphere), 0.0)
}

pub fn ray_cylinder(ray: &Ray, cyl: &Cylinder) -> Vec<RaySurfaceHit> {
    ray_surface(ray, &Surface::Cylinder(*cyl), 0.0)
}

pub fn ray_cone(ray: &Ray, cone: &Cone) -> Vec<RaySurfaceHit> {
    ray_surface(ray, &Surface::Cone(*cone), 0.0)
}

pub fn ray_torus(ray: &Ray, torus: &Torus) -> Vec<RaySurfaceHit> {
    ray_surface(ray, &Surface::Torus(*torus), 0.0)
}

// ─── Quartic Solver (Ferrari's method) ─────────────────────────────────────

/// Solve a quartic equation: a*x^4 + b*x^3 + c*x^2 + d*x + e = 0
/// Returns all real roots.
pub(crate) fn solve_quartic(a: f64, b: f64, c: f64, d: f64, e: f64) -> Vec<f64> {
    if a.abs() < 1e-15 {
        return solve_cubic(b, c, d, e);
    }

    // Normalize: x^4 + px^3 + qx^2 + rx + s = 0
    let p = b / a;
    let q = c / a;
    let r = d / a;
    let s = e / a;

    // Depressed quartic via substitution x = t - p/4:
    // t^4 + alpha*t^2 + beta*t + gamma = 0
    let p2 = p * p;
    let alpha = q - 3.0 * p2 / 8.0;
    let beta = r - p * q / 2.0 + p2 * p / 8.0;
    let gamma = s - p * r / 4.0 + p2 * q / 16.0 - 3.0 * p2 * p2 / 256.0;

    let shift = -p / 4.0;

    if beta.abs() < 1e-15 {
        // Biquadratic: t^4 + alpha*t^2 + gamma = 0
        let disc = alpha * alpha - 4.0 * gamma;
        if disc < -1e-15 {
            return vec![];
        }
        let disc = disc.max(0.0).sqrt();
        let mut roots = Vec::new();
        for u2 in [(-alpha + disc) / 2.0, (-alpha - disc) / 2.0] {
            if u2 >= -1e-15 {
                let u = u2.max(0.0).sqrt();
                roots.push(u + shift);
                if u > 1e-10 {
                    roots.push(-u + shift);
                }
            }
        }
        return roots;
    }

    // Ferrari's method: find a root of the resolvent cubic
    // y^3 - alpha/2 * y^2 - gamma * y + (alpha*gamma - beta^2)/2 = 0
    // which we write as: y^3 + c2*y^2 + c1*y + c0 = 0
    let c2 = -alpha / 2.0;
    let c1 = -gamma;
    let c0 = (alpha * gamma - beta * beta) / 2.0;

    let cubic_roots = solve_cubic(1.0, c2, c1, c0);

    // Pick the resolvent root that gives a positive discriminant
    let Some(&first) = cubic_roots.first() else {
        return vec![];
    };
    let mut y = first;
    for &yr in &cubic_roots {
        if 2.0 * yr - alpha > 1e-15 {
            y = yr;
            break;
        }
    }

    let w2 = 2.0 * y - alpha;
    if w2 < -1e-12 {
        return vec![];
    }
    let w = w2.max(0.0).sqrt();

    if w.abs() < 1e-12 {
        // Degenerate case
        return vec![];
    }

    let mut roots = Vec::new();

    // Two quadratics: t^2 + w*t + (y + beta/(2w)) = 0
    //                 t^2 - w*t + (y - beta/(2w)) = 0
    let bw = beta / (2.0 * w);
    for (sign_w, offset) in [(1.0, y + bw), (-1.0, y - bw)] {
        let disc = sign_w * sign_w * w * w / 4.0 - offset;
        if disc >= -1e-12 {
            let sq = disc.max(0.0).sqrt();
            roots.push(-sign_w * w / 2.0 + sq + shift);
            roots.push(-sign_w * w / 2.0 - sq + shift);
        }
    }

    roots
}

/// Solve a cubic equation: a*x^3 + b*x^2 + c*x + d = 0
/// Returns all real roots using Cardano's method.
pub(crate) fn solve_cubic(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    if a.abs() < 1e-15 {
        return solve_quadratic(b, c, d);
    }

    // Normalize: x^3 + px^2 + qx + r = 0
    let p = b / a;
    let q = c / a;
    let r = d / a;

    // Depressed cubic via x = t - p/3: t^3 + at + b = 0
    let a_dep = q - p * p / 3.0;
    let b_dep = r - p * q / 3.0 + 2.0 * p * p * p / 27.0;
    let shift = -p / 3.0;

    let disc = -4.0 * a_dep * a_dep * a_dep - 27.0 * b_dep * b_dep;

    if disc > 1e-15 {
        // Three distinct real roots (trigonometric method)
        let m = (-a_dep / 3.0).sqrt();
        let theta = (-b_dep / (2.0 * m * m * m)).acos() / 3.0;
        let two_pi_3 = 2.0 * std::f64::consts::PI / 3.0;
        vec![
            2.0 * m * theta.cos() + shift,
            2.0 * m * (theta - two_pi_3).cos() + shift,
            2.0 * m * (theta + two_pi_3).cos() + shift,
        ]
    } else {
        // One real root (Cardano's formula)
        let half_b = b_dep / 2.0;
        let q3_over_27 = a_dep * a_dep * a_dep / 27.0;
        let inner = half_b * half_b + q3_over_27;
        let sqrt_inner = inner.max(0.0).sqrt();

        let u = cbrt(-half_b + sqrt_inner);
        let v = cbrt(-half_b - sqrt_inner);
        vec![u + v + shift]
    }
}

fn cbrt(x: f64) -> f64 {
    if x >= 0.0 {
        x.cbrt()
    } else {
        -(-x).cbrt()
    }
}

/// Solve a quadratic equation: a*x^2 + b*x + c = 0
pub(crate) fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a.abs() < 1e-15 {
        if b.abs() < 1e-15 {
            return vec![];
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc < -1e-15 {
        return vec![];
    }
    let disc = disc.max(0.0).sqrt();
    vec![(-b + disc) / (2.0 * a), (-b - disc) / (2.0 * a)]
}

// ─── Ray-AABB (BVH traversal) ────────────────────────────────────────────────

pub fn ray_aabb(ray: &Ray, bb_min: &Point3d, bb_max: &Point3d) -> Option<f64> {
    let mut tmin = f64::NEG_INFINITY;
    let mut tmax = f64::INFINITY;

    let ray_origin = [ray.origin.x, ray.origin.y, ray.origin.z];
    let ray_dir = [ray.direction.x, ray.direction.y, ray.direction.z];
    let min = [bb_min.x, bb_min.y, bb_min.z];
    let max = [bb_max.x, bb_max.y, bb_max.z];

    for i in 0..3 {
        if ray_dir[i].abs() < 1e-15 {
            if ray_origin[i] < min[i] || ray_origin[i] > max[i] {
                return None;
            }
        } else {
            let inv_d = 1.0 / ray_dir[i];
            let mut t0 = (min[i] - ray_origin[i]) * inv_d;
            let mut t1 = (max[i] - ray_origin[i]) * inv_d;
            if inv_d < 0.0 {
                std::mem::swap(&mut t0, &mut t1);
            }
            tmin = tmin.max(t0);
            tmax = tmax.min(t1);
            if tmax < tmin {
                return None;
            }
        }
    }

    if tmax < 0.0 {
        None
    } else {
        Some(tmin.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn test_line_line_closest() {
        let l1 = Line3d::new(Point3d::ORIGIN, Vec3::X);
        let l2 = Line3d::new(Point3d::new(2.0, -1.0, 3.0), Vec3::Y);
        let (p1, t1, p2, t2, d) = line_line_closest(&l1, &l2).unwrap();
        assert!((t1 - 2.0).abs() < 1e-12 && (t2 - 1.0).abs() < 1e-12);
        assert!((d - 3.0).abs() < 1e-12);
        assert!(p1.distance_to(&Point3d::new(2.0, 0.0, 0.0)) < 1e-12);
        assert!(p2.distance_to(&Point3d::new(2.0, 0.0, 3.0)) < 1e-12);
        let parallel = Line3d::new(Point3d::new(0.0, 1.0, 0.0), Vec3::X);
        assert!(line_line_closest(&l1, &parallel).is_none());
    }

    #[test]
    fn test_line_surface_params_are_two_sided() {
        let s = Surface::Sphere(Sphere::new(Point3d::ORIGIN, 1.0));
        let params = line_surface_params(&Point3d::ORIGIN, &(Vec3::X * 2.0), &s).unwrap();
        assert_eq!(params.len(), 2);
        assert!((params[0] + 0.5).abs() < 1e-12 && (params[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ray_plane() {
        let ray = Ray::new(Point3d::new(0.0, 0.0, 10.0), -Vec3::Z);
        let hit = ray_plane(&ray, &Plane::xy()).unwrap();
        assert!((hit.t - 10.0).abs() < 1e-12);
        assert!(hit.point.distance_to(&Point3d::ORIGIN) < 1e-12);
        let behind = Ray::new(Point3d::new(0.0, 0.0, 10.0), Vec3::Z);
        assert!(ray_plane(&behind, &Plane::xy()).is_none());
    }

    #[test]
    fn test_ray_sphere() {
        let ray = Ray::new(Point3d::new(0.0, 0.0, 10.0), -Vec3::Z);
        let hits = ray_sphere(&ray, &Sphere::new(Point3d::ORIGIN, 1.0));
        assert_eq!(hits.len(), 2);
        assert!((hits[0].point.z - 1.0).abs() < 1e-10);
        assert!((hits[1].point.z + 1.0).abs() < 1e-10);
        assert!(hits[0].normal.z > 0.99);
        let miss = Ray::new(Point3d::new(5.0, 0.0, 10.0), -Vec3::Z);
        assert!(ray_sphere(&miss, &Sphere::new(Point3d::ORIGIN, 1.0)).is_empty());
    }

    #[test]
    fn test_ray_cylinder() {
        let ray = Ray::new(Point3d::new(10.0, 0.0, 0.0), -Vec3::X);
        let hits = ray_cylinder(&ray, &Cylinder::new(Point3d::ORIGIN, Vec3::Z, 3.0));
        assert_eq!(hits.len(), 2);
        assert!((hits[0].point.x - 3.0).abs() < 1e-10);
        assert!((hits[1].point.x + 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_ray_cone_double_nappe() {
        let cone = Cone::new(Point3d::new(0.0, 0.0, 5.0), Vec3::Z, FRAC_PI_4);
        let ray = Ray::new(Point3d::new(1.0, 0.0, -10.0), Vec3::Z);
        let hits = ray_cone(&ray, &cone);
        assert_eq!(hits.len(), 2, "got {}", hits.len());
        assert!((hits[0].point.z - 4.0).abs() < 1e-6);
        assert!((hits[1].point.z - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_ray_torus_through_center() {
        let torus = Torus::new(Point3d::ORIGIN, Vec3::Z, 5.0, 1.0);
        let ray = Ray::new(Point3d::new(-10.0, 0.0, 0.0), Vec3::X);
        let hits = ray_torus(&ray, &torus);
        assert_eq!(hits.len(), 4, "got {}", hits.len());
        for (hit, ex) in hits.iter().zip([-6.0, -4.0, 4.0, 6.0]) {
            assert!((hit.point.x - ex).abs() < 1e-9, "expected x={}, got {}", ex, hit.point.x);
        }
        let above = Ray::new(Point3d::new(-10.0, 0.0, 10.0), Vec3::X);
        assert!(ray_torus(&above, &torus).is_empty());
    }

    #[test]
    fn test_ray_aabb() {
        let ray = Ray::new(Point3d::new(-5.0, 0.5, 0.5), Vec3::X);
        let t = ray_aabb(&ray, &Point3d::ORIGIN, &Point3d::new(1.0, 1.0, 1.0));
        assert!(t.is_some_and(|t| (t - 5.0).abs() < 1e-10));
        let miss = Ray::new(Point3d::new(-5.0, 5.0, 5.0), Vec3::X);
        assert!(ray_aabb(&miss, &Point3d::ORIGIN, &Point3d::new(1.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn test_solve_cubic_three_roots() {
        let mut roots = solve_cubic(1.0, -6.0, 11.0, -6.0);
        assert_eq!(roots.len(), 3, "{:?}", roots);
        roots.sort_by(f64::total_cmp);
        for (r, ex) in roots.iter().zip([1.0, 2.0, 3.0]) {
            assert!((r - ex).abs() < 1e-8);
        }
    }

    #[test]
    fn test_solve_quartic_four_roots() {
        let mut roots = solve_quartic(1.0, -10.0, 35.0, -50.0, 24.0);
        roots.sort_by(f64::total_cmp);
        roots.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
        assert_eq!(roots.len(), 4, "{:?}", roots);
        for (r, ex) in roots.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert!((r - ex).abs() < 1e-6);
        }
        let biquad = solve_quartic(1.0, 0.0, -5.0, 0.0, 4.0);
        assert_eq!(biquad.len(), 4);
    }
}
